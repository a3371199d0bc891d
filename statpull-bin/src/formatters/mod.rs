pub(crate) mod color;
pub(crate) mod log;
pub(crate) mod report;

use self::report::ReportFormatter;
use crate::options::{OutputFormat, OutputMode};

pub(crate) fn get_report_formatter(
    format: OutputFormat,
    mode: OutputMode,
) -> Box<dyn ReportFormatter> {
    match format {
        OutputFormat::Compact => Box::new(report::Compact::new(mode)),
        OutputFormat::Json => Box::new(report::Json::new()),
    }
}
