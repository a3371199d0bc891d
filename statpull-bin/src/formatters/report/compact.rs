use anyhow::Result;
use console::Style;
use std::{
    fmt::{self, Display},
    sync::LazyLock,
    time::Duration,
};

use crate::commands::Report;
use crate::formatters::color::{BOLD_GREEN, BOLD_PINK, BOLD_YELLOW, DIM, NORMAL, PINK, color};
use crate::options::OutputMode;

use super::ReportFormatter;

struct CompactReport<'a> {
    report: &'a Report,
}

impl Display for CompactReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        let failed = &report.summary.failed;

        if !failed.is_empty() {
            let noun = if failed.len() == 1 { "team" } else { "teams" };
            color!(
                f,
                BOLD_PINK,
                "Could not collect {} {noun}. Find details below.\n\n",
                failed.len()
            )?;
            for failure in failed {
                color!(f, BOLD_YELLOW, "[{}]:\n", failure.item)?;
                color!(f, PINK, "  ✗ {}\n", failure.error)?;
            }
            writeln!(f)?;
        }

        color!(f, NORMAL, "📊 {} Teams", report.teams.len())?;
        color!(f, NORMAL, " {} Matches", report.matches.len())?;
        color!(f, NORMAL, " {} Stat lines", report.stats.len())?;

        let duration = Duration::from_secs(report.duration_secs);
        color!(f, DIM, " (in {})", humantime::format_duration(duration))?;

        color!(f, BOLD_GREEN, " ✅ {} OK", report.summary.succeeded())?;
        let err_str = if failed.len() == 1 { "Error" } else { "Errors" };
        color!(f, BOLD_PINK, " 🚫 {} {}", failed.len(), err_str)?;

        write_if_any(report.dispatch.timed_out, "⏳", "Timeouts", &BOLD_YELLOW, f)?;
        write_if_any(report.dispatch.cancelled, "👻", "Cancelled", &BOLD_YELLOW, f)?;

        Ok(())
    }
}

fn write_if_any(
    value: u64,
    symbol: &str,
    text: &str,
    style: &LazyLock<Style>,
    f: &mut fmt::Formatter<'_>,
) -> Result<(), fmt::Error> {
    if value > 0 {
        color!(f, style, " {} {} {}", symbol, value, text)?;
    }
    Ok(())
}

pub(crate) struct Compact {
    mode: OutputMode,
}

impl Compact {
    pub(crate) const fn new(mode: OutputMode) -> Self {
        Self { mode }
    }
}

impl ReportFormatter for Compact {
    fn format(&self, report: &Report) -> Result<String> {
        let formatted = CompactReport { report }.to_string();
        if self.mode.is_plain() {
            return Ok(console::strip_ansi_codes(&formatted).into_owned());
        }
        Ok(formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::sample_report;

    #[test]
    fn test_compact_lists_failures_and_counts() {
        let formatted = Compact::new(OutputMode::Plain)
            .format(&sample_report())
            .unwrap();

        assert!(formatted.starts_with("Could not collect 1 team."));
        assert!(formatted.contains("[9]:\n  ✗ no team data for `9`"));
        assert!(formatted.contains("📊 1 Teams 1 Matches 2 Stat lines"));
        assert!(formatted.contains("(in 3s)"));
        assert!(formatted.contains("✅ 1 OK 🚫 1 Error"));
        assert!(!formatted.contains('\u{1b}'));
    }

    #[test]
    fn test_compact_without_failures() {
        let mut report = sample_report();
        report.summary.failed.clear();

        let formatted = Compact::new(OutputMode::Plain).format(&report).unwrap();
        assert!(formatted.starts_with("📊 1 Teams"));
        assert!(formatted.contains("🚫 0 Errors"));
    }
}
