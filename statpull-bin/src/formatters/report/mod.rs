mod compact;
mod json;

pub(crate) use compact::Compact;
pub(crate) use json::Json;

use crate::commands::Report;
use anyhow::Result;

pub(crate) trait ReportFormatter {
    /// Format the result of a collection run
    fn format(&self, report: &Report) -> Result<String>;
}
