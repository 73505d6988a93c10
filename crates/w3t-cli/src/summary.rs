//! Result output for the terminal and for JSON consumers.

use console::style;
use serde::Serialize;
use std::fmt::Write as _;
use w3t_nat::{DiscoveryReport, FilteringOutcome, MappingOutcome, Outcome, SuiteReport};

/// Results of the suites that were run
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    /// Server that was probed
    pub server: String,
    /// Mapping suite result, if run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<SuiteReport<MappingOutcome>>,
    /// Filtering suite result, if run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtering: Option<SuiteReport<FilteringOutcome>>,
}

impl From<DiscoveryReport> for Summary {
    fn from(report: DiscoveryReport) -> Self {
        Self {
            server: report.server,
            mapping: Some(report.mapping),
            filtering: Some(report.filtering),
        }
    }
}

impl Summary {
    /// Whether every suite that ran reached a classification
    pub fn is_conclusive(&self) -> bool {
        self.mapping.as_ref().is_none_or(|r| r.outcome.is_conclusive())
            && self.filtering.as_ref().is_none_or(|r| r.outcome.is_conclusive())
    }

    /// Human-readable summary
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "NAT behavior via {}", style(&self.server).bold());
        if let Some(report) = &self.mapping {
            render_suite(&mut out, "Mapping", report);
        }
        if let Some(report) = &self.filtering {
            render_suite(&mut out, "Filtering", report);
        }
        out
    }
}

fn render_suite<O: Outcome>(out: &mut String, label: &str, report: &SuiteReport<O>) {
    let outcome = if report.outcome.is_conclusive() {
        style(report.outcome.to_string()).green()
    } else {
        style(report.outcome.to_string()).yellow()
    };
    let _ = writeln!(
        out,
        "  {label:<10} {outcome} ({} round trips)",
        report.round_trips
    );
    if let Some(failure) = &report.failure {
        let _ = writeln!(out, "  {:<10} {}", "", style(failure).dim());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> Summary {
        Summary {
            server: "stun.example.org:3478".to_string(),
            mapping: Some(SuiteReport::completed(MappingOutcome::AddressDependent, 3)),
            filtering: Some(SuiteReport::aborted(
                FilteringOutcome::Inconclusive,
                1,
                "probe cancelled",
            )),
        }
    }

    #[test]
    fn test_render() {
        console::set_colors_enabled(false);
        let text = summary().render();

        assert!(text.contains("NAT behavior via stun.example.org:3478"));
        assert!(text.contains("Mapping    address dependent (3 round trips)"));
        assert!(text.contains("Filtering  inconclusive (1 round trips)"));
        assert!(text.contains("probe cancelled"));
    }

    #[test]
    fn test_conclusive() {
        let mut summary = summary();
        assert!(!summary.is_conclusive());

        summary.filtering = None;
        assert!(summary.is_conclusive());
    }

    #[test]
    fn test_json_skips_suites_not_run() {
        let mut summary = summary();
        summary.mapping = None;

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("mapping").is_none());
        assert_eq!(json["filtering"]["outcome"], "inconclusive");
    }
}
