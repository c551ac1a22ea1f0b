//! Outcome models
//!
//! Per-unit outcomes, run records and the aggregated run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ScopeError, SourceLocation};
use crate::models::{ScopeLevel, UnitId};

/// Outcome category, used for counting and display
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Pass,
    Fail,
    Error,
    Skipped,
    ExpectedFailure,
    UnexpectedSuccess,
}

impl OutcomeKind {
    pub fn all() -> [OutcomeKind; 6] {
        [
            OutcomeKind::Pass,
            OutcomeKind::Fail,
            OutcomeKind::Error,
            OutcomeKind::Skipped,
            OutcomeKind::ExpectedFailure,
            OutcomeKind::UnexpectedSuccess,
        ]
    }

    /// Snake-case name, as serialized
    pub fn name(&self) -> &'static str {
        match self {
            OutcomeKind::Pass => "pass",
            OutcomeKind::Fail => "fail",
            OutcomeKind::Error => "error",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::ExpectedFailure => "expected_failure",
            OutcomeKind::UnexpectedSuccess => "unexpected_success",
        }
    }

    /// Plural name used in summaries
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeKind::Pass => "passed",
            OutcomeKind::Fail => "failures",
            OutcomeKind::Error => "errors",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::ExpectedFailure => "expected failures",
            OutcomeKind::UnexpectedSuccess => "unexpected successes",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Pass => write!(f, "ok"),
            OutcomeKind::Fail => write!(f, "FAIL"),
            OutcomeKind::Error => write!(f, "ERROR"),
            OutcomeKind::Skipped => write!(f, "skipped"),
            OutcomeKind::ExpectedFailure => write!(f, "expected failure"),
            OutcomeKind::UnexpectedSuccess => write!(f, "unexpected success"),
        }
    }
}

/// How an unexpected success counts toward run success
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnexpectedSuccessPolicy {
    #[default]
    Failure,
    Success,
}

impl FromStr for UnexpectedSuccessPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "failure" | "fail" => Ok(UnexpectedSuccessPolicy::Failure),
            "success" | "pass" => Ok(UnexpectedSuccessPolicy::Success),
            other => Err(format!("unknown unexpected-success policy: {other}")),
        }
    }
}

/// Classification of one unit's execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail {
        reason: String,
        location: Option<SourceLocation>,
    },
    Error {
        cause: String,
        location: Option<SourceLocation>,
    },
    Skipped {
        reason: String,
    },
    ExpectedFailure {
        reason: String,
    },
    UnexpectedSuccess,
}

impl Outcome {
    pub fn fail(reason: impl Into<String>, location: Option<SourceLocation>) -> Self {
        Outcome::Fail {
            reason: reason.into(),
            location,
        }
    }

    pub fn error(cause: impl Into<String>, location: Option<SourceLocation>) -> Self {
        Outcome::Error {
            cause: cause.into(),
            location,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Outcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Pass => OutcomeKind::Pass,
            Outcome::Fail { .. } => OutcomeKind::Fail,
            Outcome::Error { .. } => OutcomeKind::Error,
            Outcome::Skipped { .. } => OutcomeKind::Skipped,
            Outcome::ExpectedFailure { .. } => OutcomeKind::ExpectedFailure,
            Outcome::UnexpectedSuccess => OutcomeKind::UnexpectedSuccess,
        }
    }

    /// Whether this outcome makes the run unsuccessful
    pub fn is_failure(&self, policy: UnexpectedSuccessPolicy) -> bool {
        match self {
            Outcome::Fail { .. } | Outcome::Error { .. } => true,
            Outcome::UnexpectedSuccess => policy == UnexpectedSuccessPolicy::Failure,
            _ => false,
        }
    }

    /// Reason, cause or skip message, if any
    pub fn detail(&self) -> Option<&str> {
        match self {
            Outcome::Fail { reason, .. }
            | Outcome::Skipped { reason }
            | Outcome::ExpectedFailure { reason } => Some(reason),
            Outcome::Error { cause, .. } => Some(cause),
            Outcome::Pass | Outcome::UnexpectedSuccess => None,
        }
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Outcome::Fail { location, .. } | Outcome::Error { location, .. } => location.as_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail() {
            Some(detail) if matches!(self, Outcome::Skipped { .. }) => {
                write!(f, "{} {detail:?}", self.kind())
            }
            _ => write!(f, "{}", self.kind()),
        }
    }
}

mod duration_secs {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs.max(0.0)).map_err(D::Error::custom)
    }
}

/// One reported unit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: UnitId,
    pub outcome: Outcome,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub defined_at: Option<SourceLocation>,
}

impl UnitRecord {
    pub fn new(id: UnitId, outcome: Outcome, duration: Duration) -> Self {
        Self {
            id,
            outcome,
            duration,
            defined_at: None,
        }
    }

    pub fn with_definition(mut self, defined_at: Option<SourceLocation>) -> Self {
        self.defined_at = defined_at;
        self
    }
}

/// Teardown error recorded against the scope that raised it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScopeFault {
    pub level: ScopeLevel,
    pub scope: String,
    pub cause: String,
    pub location: Option<SourceLocation>,
}

impl From<&ScopeError> for ScopeFault {
    fn from(err: &ScopeError) -> Self {
        let (level, scope) = match err {
            ScopeError::Setup { level, scope, .. } | ScopeError::Teardown { level, scope, .. } => {
                (*level, scope.clone())
            }
        };
        Self {
            level,
            scope,
            cause: err.cause().message().to_string(),
            location: err.location().cloned(),
        }
    }
}

impl fmt::Display for ScopeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} teardown of '{}': {}", self.level, self.scope, self.cause)
    }
}

/// Per-kind tallies
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts(BTreeMap<OutcomeKind, usize>);

impl Counts {
    pub fn add(&mut self, kind: OutcomeKind) {
        *self.0.entry(kind).or_insert(0) += 1;
    }

    pub fn get(&self, kind: OutcomeKind) -> usize {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    /// Number of outcomes that count against the run
    pub fn failures(&self, policy: UnexpectedSuccessPolicy) -> usize {
        let unexpected = match policy {
            UnexpectedSuccessPolicy::Failure => self.get(OutcomeKind::UnexpectedSuccess),
            UnexpectedSuccessPolicy::Success => 0,
        };
        self.get(OutcomeKind::Fail) + self.get(OutcomeKind::Error) + unexpected
    }

    pub fn is_successful(&self, policy: UnexpectedSuccessPolicy) -> bool {
        self.failures(policy) == 0
    }

    pub fn merge(&mut self, other: &Counts) {
        for (kind, n) in &other.0 {
            *self.0.entry(*kind).or_insert(0) += n;
        }
    }
}

/// Aggregated result of a run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub records: Vec<UnitRecord>,
    pub counts: Counts,
    pub faults: Vec<ScopeFault>,
    pub policy: UnexpectedSuccessPolicy,
    /// Why the run stopped early, if it did
    pub cancelled: Option<String>,
}

impl RunReport {
    pub fn new(policy: UnexpectedSuccessPolicy) -> Self {
        Self {
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            records: Vec::new(),
            counts: Counts::default(),
            faults: Vec::new(),
            policy,
            cancelled: None,
        }
    }

    pub fn record(&mut self, record: UnitRecord) {
        self.counts.add(record.outcome.kind());
        self.records.push(record);
    }

    pub fn add_fault(&mut self, fault: ScopeFault) {
        self.faults.push(fault);
    }

    pub fn finish(&mut self, elapsed: Duration, cancelled: Option<String>) {
        self.elapsed = elapsed;
        self.cancelled = cancelled;
    }

    /// Append another partial report, keeping this report's start time
    pub fn merge(&mut self, other: RunReport) {
        self.counts.merge(&other.counts);
        self.records.extend(other.records);
        self.faults.extend(other.faults);
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn is_successful(&self) -> bool {
        self.counts.is_successful(self.policy)
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Fail { .. } | Outcome::Error { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, outcome: Outcome) -> UnitRecord {
        UnitRecord::new(UnitId::new("m", "C", name), outcome, Duration::from_millis(5))
    }

    #[test]
    fn test_counts_sum_to_total() {
        let mut report = RunReport::new(UnexpectedSuccessPolicy::Failure);
        report.record(record("test_a", Outcome::Pass));
        report.record(record("test_b", Outcome::fail("x", None)));
        report.record(record("test_c", Outcome::skipped("later")));
        report.record(record("test_d", Outcome::UnexpectedSuccess));

        assert_eq!(report.counts.total(), report.total());
        assert_eq!(report.counts.get(OutcomeKind::Pass), 1);
        assert_eq!(report.counts.failures(UnexpectedSuccessPolicy::Failure), 2);
        assert_eq!(report.counts.failures(UnexpectedSuccessPolicy::Success), 1);
        assert!(!report.is_successful());
        assert_eq!(report.failures().count(), 1);
    }

    #[test]
    fn test_unexpected_success_policy() {
        assert!(Outcome::UnexpectedSuccess.is_failure(UnexpectedSuccessPolicy::Failure));
        assert!(!Outcome::UnexpectedSuccess.is_failure(UnexpectedSuccessPolicy::Success));
        assert!(!Outcome::ExpectedFailure { reason: "x".into() }
            .is_failure(UnexpectedSuccessPolicy::Failure));
        assert_eq!(
            "success".parse::<UnexpectedSuccessPolicy>(),
            Ok(UnexpectedSuccessPolicy::Success)
        );
        assert!("maybe".parse::<UnexpectedSuccessPolicy>().is_err());
    }

    #[test]
    fn test_kind_name_matches_serialized_tag() {
        for kind in OutcomeKind::all() {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.name());
        }
    }

    #[test]
    fn test_merge_keeps_order() {
        let mut first = RunReport::new(UnexpectedSuccessPolicy::Failure);
        first.record(record("test_a", Outcome::Pass));
        let mut second = RunReport::new(UnexpectedSuccessPolicy::Failure);
        second.record(record("test_b", Outcome::error("boom", None)));

        first.merge(second);
        let names: Vec<_> = first.records.iter().map(|r| r.id.name.as_str()).collect();
        assert_eq!(names, vec!["test_a", "test_b"]);
        assert_eq!(first.counts.get(OutcomeKind::Error), 1);
    }

    #[test]
    fn test_outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(Outcome::skipped("no db")).unwrap();
        assert_eq!(json["kind"], "skipped");
        assert_eq!(json["reason"], "no db");

        let rec = serde_json::to_value(record("test_a", Outcome::Pass)).unwrap();
        assert_eq!(rec["duration"], 0.005);
    }

    #[test]
    fn test_out_of_range_duration_rejected() {
        let mut rec = serde_json::to_value(record("test_a", Outcome::Pass)).unwrap();
        rec["duration"] = serde_json::json!(1e300);
        assert!(serde_json::from_value::<UnitRecord>(rec.clone()).is_err());

        rec["duration"] = serde_json::json!(-2.0);
        let parsed: UnitRecord = serde_json::from_value(rec).unwrap();
        assert_eq!(parsed.duration, Duration::ZERO);
    }
}
