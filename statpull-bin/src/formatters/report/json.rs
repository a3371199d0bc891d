use anyhow::{Context, Result};

use super::ReportFormatter;
use crate::commands::Report;

pub(crate) struct Json;

impl Json {
    pub(crate) const fn new() -> Self {
        Self {}
    }
}

impl ReportFormatter for Json {
    /// Format every collected record as one JSON object
    fn format(&self, report: &Report) -> Result<String> {
        serde_json::to_string_pretty(report).context("Cannot format report as JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::sample_report;
    use serde_json::Value;

    #[test]
    fn test_json_contains_all_collections() {
        let formatted = Json::new().format(&sample_report()).unwrap();
        let json: Value = serde_json::from_str(&formatted).unwrap();

        assert_eq!(json["teams"][0]["name"], "Owls");
        assert_eq!(json["matches"].as_array().unwrap().len(), 1);
        assert_eq!(json["stats"][1]["player"], "bo");
        assert_eq!(json["summary"]["processed"], 2);
        assert_eq!(json["summary"]["failed"][0]["item"], "9");
        assert_eq!(json["duration_secs"], 3);
    }
}
