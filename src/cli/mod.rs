//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parallel BDD feature runner with reruns and merged cucumber reports
#[derive(Parser, Debug)]
#[command(name = "featurepool")]
#[command(version)]
#[command(about = "Run cucumber features in parallel, rerun failures and merge the reports")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a set of units
    Run(RunArgs),

    /// Merge report fragments produced elsewhere
    Merge(MergeArgs),

    /// Manage configuration files
    Config(ConfigArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// YAML or JSON file listing the run units
    #[arg(short, long)]
    pub units: PathBuf,

    /// Configuration file (default: discovered featurepool.yaml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum number of units run concurrently
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Rerun failed units
    #[arg(long)]
    pub rerun: bool,

    /// Rerun attempts per failed unit (implies --rerun)
    #[arg(long)]
    pub attempts: Option<u32>,

    /// Unit granularity (feature, scenario)
    #[arg(short, long)]
    pub granularity: Option<String>,

    /// Overall run deadline in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Directory for the merged reports and run artifacts
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Console output format (table, json, json-pretty, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Arguments for the merge command
#[derive(Parser, Debug)]
pub struct MergeArgs {
    /// Fragment format (json, junit, message)
    #[arg(short, long)]
    pub format: String,

    /// Granularity the fragments were produced at (feature, scenario)
    #[arg(short, long, default_value = "feature")]
    pub granularity: String,

    /// Write the merged report here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Prefix JUnit testcase names with the fragment they came from
    #[arg(long)]
    pub prefix_testcase_names: bool,

    /// Name of the merged JUnit testsuite
    #[arg(long, default_value = "featurepool")]
    pub suite_name: String,

    /// Mark the merged run as failed
    #[arg(long)]
    pub failed: bool,

    /// Fragment files, one per unit
    #[arg(required = true)]
    pub fragments: Vec<PathBuf>,
}

/// Arguments for config management
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "featurepool.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Configuration file (default: discovered featurepool.yaml)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Output format (yaml, json)
        #[arg(long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file (default: discovered featurepool.yaml)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
