//! Output formatting module
//!
//! Console reporters for live runs and exporters for saved reports.

mod export;
mod formatter;

pub use export::{export, write_report, ReportFormat};
pub use formatter::{
    ConsoleReporter, OutputFormat, Reporter, ResultFormatter, Symbols, SummaryReporter,
};
