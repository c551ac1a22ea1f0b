//! Machine-readable run reports
//!
//! JSON, CSV and JUnit XML renditions of a `RunReport`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::models::{Outcome, RunReport, UnexpectedSuccessPolicy, UnitRecord};

/// Export format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    #[serde(rename = "json-pretty")]
    JsonPretty,
    Csv,
    Junit,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ReportFormat::Json),
            "json-pretty" | "pretty" => Some(ReportFormat::JsonPretty),
            "csv" => Some(ReportFormat::Csv),
            "junit" | "xml" => Some(ReportFormat::Junit),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}

/// Render a report in the given format
pub fn export(report: &RunReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => Ok(serde_json::to_string(report)?),
        ReportFormat::JsonPretty => Ok(serde_json::to_string_pretty(report)?),
        ReportFormat::Csv => to_csv(report),
        ReportFormat::Junit => Ok(to_junit(report)),
    }
}

/// Render and write a report to `path`
pub fn write_report(path: &Path, report: &RunReport, format: ReportFormat) -> Result<()> {
    let contents = export(report, format)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, contents)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!("Wrote report to {}", path.display());
    Ok(())
}

fn to_csv(report: &RunReport) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "module",
        "container",
        "unit",
        "outcome",
        "duration_secs",
        "detail",
        "location",
    ])?;
    for record in &report.records {
        writer.write_record([
            record.id.module.clone(),
            record.id.container.clone(),
            record.id.name.clone(),
            record.outcome.kind().name().to_string(),
            format!("{:.6}", record.duration.as_secs_f64()),
            record.outcome.detail().unwrap_or_default().to_string(),
            record
                .outcome
                .location()
                .map(|l| l.to_string())
                .unwrap_or_default(),
        ])?;
    }
    let bytes = writer.into_inner().context("Failed to flush CSV writer")?;
    Ok(String::from_utf8(bytes)?)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() && c != '\n' && c != '\t' => {}
            c => out.push(c),
        }
    }
    out
}

fn testcase(out: &mut String, record: &UnitRecord, policy: UnexpectedSuccessPolicy) {
    let classname = record.id.container_path();
    let _ = write!(
        out,
        "    <testcase classname=\"{}\" name=\"{}\" time=\"{:.3}\"",
        escape(&classname),
        escape(&record.id.name),
        record.duration.as_secs_f64()
    );
    let location = record
        .outcome
        .location()
        .map(|l| format!("\n  at {l}"))
        .unwrap_or_default();
    match &record.outcome {
        Outcome::Pass | Outcome::ExpectedFailure { .. } => out.push_str(" />\n"),
        Outcome::Fail { reason, .. } => {
            let _ = writeln!(
                out,
                ">\n      <failure message=\"{}\">{}</failure>\n    </testcase>",
                escape(reason),
                escape(&format!("{reason}{location}"))
            );
        }
        Outcome::Error { cause, .. } => {
            let _ = writeln!(
                out,
                ">\n      <error message=\"{}\">{}</error>\n    </testcase>",
                escape(cause),
                escape(&format!("{cause}{location}"))
            );
        }
        Outcome::Skipped { reason } => {
            let _ = writeln!(
                out,
                ">\n      <skipped message=\"{}\" />\n    </testcase>",
                escape(reason)
            );
        }
        Outcome::UnexpectedSuccess if record.outcome.is_failure(policy) => {
            let _ = writeln!(
                out,
                ">\n      <failure message=\"unexpected success\" />\n    </testcase>"
            );
        }
        Outcome::UnexpectedSuccess => {
            let _ = writeln!(
                out,
                ">\n      <system-out>unexpected success</system-out>\n    </testcase>"
            );
        }
    }
}

fn to_junit(report: &RunReport) -> String {
    let mut suites: BTreeMap<&str, Vec<&UnitRecord>> = BTreeMap::new();
    let mut order = Vec::new();
    for record in &report.records {
        let module = record.id.module.as_str();
        if !suites.contains_key(module) {
            order.push(module);
        }
        suites.entry(module).or_default().push(record);
    }

    let failures = |records: &[&UnitRecord]| {
        records
            .iter()
            .filter(|r| {
                r.outcome.is_failure(report.policy)
                    && !matches!(r.outcome, Outcome::Error { .. })
            })
            .count()
    };
    let errors = |records: &[&UnitRecord]| {
        records
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Error { .. }))
            .count()
    };
    let skipped = |records: &[&UnitRecord]| {
        records
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Skipped { .. }))
            .count()
    };

    let all: Vec<&UnitRecord> = report.records.iter().collect();
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        out,
        "<testsuites name=\"unitrun\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{:.3}\" timestamp=\"{}\">",
        all.len(),
        failures(&all),
        errors(&all),
        skipped(&all),
        report.elapsed.as_secs_f64(),
        report.started_at.to_rfc3339()
    );
    for module in order {
        let records = &suites[module];
        let time: f64 = records.iter().map(|r| r.duration.as_secs_f64()).sum();
        let _ = writeln!(
            out,
            "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"{}\" skipped=\"{}\" time=\"{:.3}\">",
            escape(module),
            records.len(),
            failures(records),
            errors(records),
            skipped(records),
            time
        );
        for record in records {
            testcase(&mut out, record, report.policy);
        }
        out.push_str("  </testsuite>\n");
    }
    out.push_str("</testsuites>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceLocation;
    use crate::models::UnitId;
    use std::time::Duration;

    fn sample() -> RunReport {
        let mut report = RunReport::new(UnexpectedSuccessPolicy::Failure);
        report.record(UnitRecord::new(
            UnitId::new("math", "Arith", "test_add"),
            Outcome::Pass,
            Duration::from_millis(10),
        ));
        report.record(UnitRecord::new(
            UnitId::new("math", "Arith", "test_div"),
            Outcome::fail("1 < 2", Some(SourceLocation::new("math.rs", 4, 9))),
            Duration::from_millis(20),
        ));
        report.record(UnitRecord::new(
            UnitId::new("io", "Files", "test_read"),
            Outcome::skipped("no disk"),
            Duration::ZERO,
        ));
        report.finish(Duration::from_millis(50), None);
        report
    }

    #[test]
    fn test_report_format_from_str() {
        assert_eq!(ReportFormat::from_str("JSON"), Some(ReportFormat::Json));
        assert_eq!(ReportFormat::from_str("xml"), Some(ReportFormat::Junit));
        assert_eq!(
            ReportFormat::from_extension(Path::new("out/report.csv")),
            Some(ReportFormat::Csv)
        );
        assert_eq!(ReportFormat::from_str("html"), None);
    }

    #[test]
    fn test_json_export() {
        let json = export(&sample(), ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["records"].as_array().unwrap().len(), 3);
        assert_eq!(value["records"][1]["outcome"]["kind"], "fail");
        assert_eq!(value["counts"]["pass"], 1);
    }

    #[test]
    fn test_csv_export() {
        let csv = export(&sample(), ReportFormat::Csv).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("module,container,unit,outcome"));
        assert!(lines[2].starts_with("math,Arith,test_div,fail,"));
        assert!(lines[2].ends_with(",1 < 2,math.rs:4:9"));
    }

    #[test]
    fn test_junit_export() {
        let xml = export(&sample(), ReportFormat::Junit).unwrap();
        assert!(xml.contains("tests=\"3\" failures=\"1\" errors=\"0\" skipped=\"1\""));
        assert!(xml.contains("<testsuite name=\"math\" tests=\"2\""));
        assert!(xml.contains("<failure message=\"1 &lt; 2\">"));
        assert!(xml.contains("<skipped message=\"no disk\" />"));
        let math = xml.find("name=\"math\"").unwrap();
        let io = xml.find("name=\"io\"").unwrap();
        assert!(math < io);
    }

    #[test]
    fn test_junit_unexpected_success_follows_policy() {
        let build = |policy| {
            let mut report = RunReport::new(policy);
            report.record(UnitRecord::new(
                UnitId::new("bugs", "Known", "test_fixed"),
                Outcome::UnexpectedSuccess,
                Duration::from_millis(3),
            ));
            report
        };

        let strict = export(&build(UnexpectedSuccessPolicy::Failure), ReportFormat::Junit).unwrap();
        assert!(strict.contains("tests=\"1\" failures=\"1\""));
        assert!(strict.contains("<failure message=\"unexpected success\" />"));

        let lenient = build(UnexpectedSuccessPolicy::Success);
        assert!(lenient.is_successful());
        let xml = export(&lenient, ReportFormat::Junit).unwrap();
        assert!(xml.contains("tests=\"1\" failures=\"0\" errors=\"0\""));
        assert!(!xml.contains("<failure"));
        assert!(xml.contains("<system-out>unexpected success</system-out>"));
    }

    #[test]
    fn test_write_report_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/report.json");
        write_report(&path, &sample(), ReportFormat::JsonPretty).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"test_add\""));
    }
}
