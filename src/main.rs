//! featurepool - parallel BDD feature runner
//!
//! Runs cucumber features or scenarios on a bounded worker pool, reruns the
//! failures, and merges every unit's JSON, JUnit and message reports into one
//! consolidated set.
//!
//! ## Usage
//!
//! ```bash
//! # Run the units listed in units.yaml on 8 workers, rerunning failures twice
//! featurepool run --units units.yaml --threads 8 --attempts 2
//!
//! # Merge fragments produced by another tool
//! featurepool merge --format junit --prefix-testcase-names reports/*.xml
//!
//! # Write an example configuration
//! featurepool config init
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

mod cli;

use cli::Args;
use featurepool::config::{find_config_file, load_units, RunConfig};
use featurepool::context::RunContext;
use featurepool::engine::CommandExecutor;
use featurepool::events::{EventBus, EventKinds, JsonLinesSink, LogSink};
use featurepool::executor::SuiteRunner;
use featurepool::models::{Granularity, ReportFormat, ReportFragment};
use featurepool::output::{OutputFormat, ResultFormatter};
use featurepool::report::{MergeOptions, ReportAggregator};
use featurepool::utils::logger::{filter_directive, init_logger, init_logger_with, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        cli::Command::Run(run_args) => {
            let code = run_units(run_args, args.verbose).await?;
            std::process::exit(code);
        }
        cli::Command::Merge(merge_args) => {
            init_logger(level(args.verbose));
            merge_fragments(merge_args)?;
        }
        cli::Command::Config(config_args) => {
            init_logger(level(args.verbose));
            manage_config(config_args)?;
        }
    }

    Ok(())
}

fn level(verbose: bool) -> LogLevel {
    if verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}

/// Explicit file, else the discovered one, else defaults
fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path.map(Path::to_path_buf).or_else(find_config_file) {
        Some(path) => RunConfig::load(&path),
        None => Ok(RunConfig::default()),
    }
}

async fn run_units(args: cli::RunArgs, verbose: bool) -> Result<i32> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if args.rerun {
        config.rerun.enabled = true;
    }
    if let Some(attempts) = args.attempts {
        config.rerun.enabled = true;
        config.rerun.attempts = attempts;
    }
    if let Some(granularity) = &args.granularity {
        config.granularity = Granularity::from_str(granularity)
            .ok_or_else(|| anyhow::anyhow!("Unknown granularity: {granularity}"))?;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = Some(timeout);
    }
    if let Some(output_dir) = args.output_dir {
        config.report.output_dir = output_dir;
    }

    if verbose {
        init_logger(LogLevel::Debug);
    } else {
        init_logger_with(&filter_directive(&config.log_level));
    }

    let units = load_units(&args.units)?;
    info!("Loaded {} units from {}", units.len(), args.units.display());

    let context = Arc::new(RunContext::new(config));
    let config = context.config();

    let mut bus = EventBus::new(&context);
    if config.events.log_sink {
        bus.subscribe(Arc::new(LogSink), EventKinds::All);
    }
    if let Some(path) = &config.events.json_lines_file {
        match JsonLinesSink::create(path) {
            Ok(sink) => bus.subscribe(Arc::new(sink), EventKinds::All),
            Err(e) => warn!("Cannot write events to {}: {}", path.display(), e),
        }
    }

    let executor = Arc::new(CommandExecutor::from_config(
        &config.engine,
        &config.report.formats,
    ));
    let runner = SuiteRunner::new(context.clone(), executor, Arc::new(bus));
    let report = runner.run(units).await?;

    let format = OutputFormat::from_str(&args.format).unwrap_or(OutputFormat::Table);
    let mut formatter = ResultFormatter::new(format);
    if args.no_color {
        formatter = formatter.no_color();
    }
    println!("{}", formatter.format_report(&report));

    Ok(report.exit_code())
}

fn merge_fragments(args: cli::MergeArgs) -> Result<()> {
    let format = ReportFormat::from_str(&args.format)
        .ok_or_else(|| anyhow::anyhow!("Unknown report format: {}", args.format))?;
    let granularity = Granularity::from_str(&args.granularity)
        .ok_or_else(|| anyhow::anyhow!("Unknown granularity: {}", args.granularity))?;

    let fragments: BTreeMap<String, Vec<ReportFragment>> = args
        .fragments
        .iter()
        .map(|path| {
            (
                path.display().to_string(),
                vec![ReportFragment::file(format, path)],
            )
        })
        .collect();

    let now = chrono::Utc::now();
    let aggregator = ReportAggregator::with_options(MergeOptions {
        granularity,
        prefix_testcase_names: args.prefix_testcase_names,
        suite_name: args.suite_name,
        run_success: !args.failed,
        started_at: Some(now),
        finished_at: Some(now),
    });
    let report = aggregator.merge(&fragments, format);
    if report.dropped > 0 {
        warn!("{} fragment(s) could not be merged", report.dropped);
    }

    match &args.output {
        Some(path) => {
            std::fs::write(path, &report.content)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            println!(
                "✓ Merged {} fragment(s) into {}",
                report.merged,
                path.display()
            );
        }
        None => println!("{}", String::from_utf8_lossy(&report.content)),
    }

    Ok(())
}

fn manage_config(args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }

            RunConfig::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { file, format } => {
            let config = load_config(file.as_deref())?;
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or_else(find_config_file)
                .ok_or_else(|| anyhow::anyhow!("No configuration file found"))?;

            match RunConfig::load(&path) {
                Ok(_) => println!("✓ Configuration file is valid: {}", path.display()),
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}
