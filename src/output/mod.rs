//! Output formatting module
//!
//! Console renderings of run outcomes and statistics.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter};
