//! Console output
//!
//! `ConsoleReporter` streams one symbol (or line) per unit, then failure
//! details and a summary. `ResultFormatter` renders listings and one-line
//! summaries.

use serde::{Deserialize, Serialize};
use std::io::{self, Write};

use crate::models::{Decoration, Outcome, OutcomeKind, RunReport, UnexpectedSuccessPolicy, UnitRecord};
use crate::registry::{Suite, SuiteEntry};

const HEAVY_RULE: &str = "======================================================================";
const LIGHT_RULE: &str = "----------------------------------------------------------------------";

const GREEN: &str = "32";
const RED: &str = "31";
const YELLOW: &str = "33";
const CYAN: &str = "36";

/// Receives records as units finish and the report at the end
pub trait Reporter {
    fn run_started(&mut self, _total: usize) -> io::Result<()> {
        Ok(())
    }

    fn unit_finished(&mut self, record: &UnitRecord) -> io::Result<()>;

    fn run_finished(&mut self, report: &RunReport) -> io::Result<()>;
}

/// Console output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Progress stream, failure details and summary
    #[default]
    Text,
    /// Single summary line
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "table" => Some(OutputFormat::Text),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Progress symbol per outcome kind
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Symbols {
    pub pass: String,
    pub fail: String,
    pub error: String,
    pub skipped: String,
    pub expected_failure: String,
    pub unexpected_success: String,
}

impl Default for Symbols {
    fn default() -> Self {
        Self {
            pass: ".".to_string(),
            fail: "F".to_string(),
            error: "E".to_string(),
            skipped: "s".to_string(),
            expected_failure: "x".to_string(),
            unexpected_success: "u".to_string(),
        }
    }
}

impl Symbols {
    pub fn symbol(&self, kind: OutcomeKind) -> &str {
        match kind {
            OutcomeKind::Pass => &self.pass,
            OutcomeKind::Fail => &self.fail,
            OutcomeKind::Error => &self.error,
            OutcomeKind::Skipped => &self.skipped,
            OutcomeKind::ExpectedFailure => &self.expected_failure,
            OutcomeKind::UnexpectedSuccess => &self.unexpected_success,
        }
    }
}

fn color_of(kind: OutcomeKind) -> &'static str {
    match kind {
        OutcomeKind::Pass => GREEN,
        OutcomeKind::Fail | OutcomeKind::Error => RED,
        OutcomeKind::Skipped => YELLOW,
        OutcomeKind::ExpectedFailure | OutcomeKind::UnexpectedSuccess => CYAN,
    }
}

fn paint(colorize: bool, code: &str, text: &str) -> String {
    if colorize {
        format!("\x1b[{code}m{text}\x1b[0m")
    } else {
        text.to_string()
    }
}

/// Non-pass tallies, e.g. `failures=1, skipped=2`
fn tally(report: &RunReport) -> Vec<String> {
    let mut parts: Vec<String> = OutcomeKind::all()
        .into_iter()
        .filter(|kind| *kind != OutcomeKind::Pass)
        .filter_map(|kind| {
            let n = report.counts.get(kind);
            (n > 0).then(|| format!("{}={n}", kind.label()))
        })
        .collect();
    if !report.faults.is_empty() {
        parts.push(format!("teardown errors={}", report.faults.len()));
    }
    parts
}

fn verdict(report: &RunReport) -> String {
    let word = if report.is_successful() { "OK" } else { "FAILED" };
    let parts = tally(report);
    if parts.is_empty() {
        word.to_string()
    } else {
        format!("{word} ({})", parts.join(", "))
    }
}

/// Progress and summary writer
pub struct ConsoleReporter<W: Write> {
    out: W,
    verbose: bool,
    colorize: bool,
    symbols: Symbols,
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            verbose: false,
            colorize: false,
            symbols: Symbols::default(),
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_color(mut self, colorize: bool) -> Self {
        self.colorize = colorize;
        self
    }

    pub fn with_symbols(mut self, symbols: Symbols) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_failure(&mut self, record: &UnitRecord) -> io::Result<()> {
        let heading = match record.outcome {
            Outcome::Fail { .. } => "FAIL",
            _ => "ERROR",
        };
        writeln!(self.out, "{HEAVY_RULE}")?;
        writeln!(
            self.out,
            "{}: {}",
            paint(self.colorize, RED, heading),
            record.id
        )?;
        writeln!(self.out, "{LIGHT_RULE}")?;
        if let Some(detail) = record.outcome.detail() {
            writeln!(self.out, "{detail}")?;
        }
        if let Some(location) = record.outcome.location() {
            writeln!(self.out, "  at {location}")?;
        }
        if let Some(defined) = &record.defined_at {
            writeln!(self.out, "  defined at {defined}")?;
        }
        writeln!(self.out)
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn unit_finished(&mut self, record: &UnitRecord) -> io::Result<()> {
        let kind = record.outcome.kind();
        if self.verbose {
            let status = paint(self.colorize, color_of(kind), &record.outcome.to_string());
            writeln!(self.out, "{} ... {status}", record.id)?;
        } else {
            let symbol = paint(self.colorize, color_of(kind), self.symbols.symbol(kind));
            write!(self.out, "{symbol}")?;
        }
        self.out.flush()
    }

    fn run_finished(&mut self, report: &RunReport) -> io::Result<()> {
        if !self.verbose && report.total() > 0 {
            writeln!(self.out)?;
        }
        writeln!(self.out)?;

        for record in report.failures() {
            self.write_failure(record)?;
        }
        for fault in &report.faults {
            writeln!(self.out, "{HEAVY_RULE}")?;
            writeln!(
                self.out,
                "{}: {} '{}'",
                paint(self.colorize, YELLOW, "TEARDOWN ERROR"),
                fault.level,
                fault.scope
            )?;
            writeln!(self.out, "{LIGHT_RULE}")?;
            writeln!(self.out, "{}", fault.cause)?;
            if let Some(location) = &fault.location {
                writeln!(self.out, "  at {location}")?;
            }
            writeln!(self.out)?;
        }

        writeln!(self.out, "{LIGHT_RULE}")?;
        let noun = if report.total() == 1 { "test" } else { "tests" };
        writeln!(
            self.out,
            "Ran {} {noun} in {:.3}s",
            report.total(),
            report.elapsed.as_secs_f64()
        )?;
        writeln!(self.out)?;
        if let Some(reason) = &report.cancelled {
            writeln!(self.out, "Run cancelled: {reason}")?;
        }
        let color = if report.is_successful() { GREEN } else { RED };
        writeln!(self.out, "{}", paint(self.colorize, color, &verdict(report)))?;
        self.out.flush()
    }
}

/// Writes only the one-line summary
pub struct SummaryReporter<W: Write> {
    out: W,
    formatter: ResultFormatter,
}

impl<W: Write> SummaryReporter<W> {
    pub fn new(out: W, formatter: ResultFormatter) -> Self {
        Self { out, formatter }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Reporter for SummaryReporter<W> {
    fn unit_finished(&mut self, _record: &UnitRecord) -> io::Result<()> {
        Ok(())
    }

    fn run_finished(&mut self, report: &RunReport) -> io::Result<()> {
        writeln!(self.out, "{}", self.formatter.format_summary(report))?;
        self.out.flush()
    }
}

/// Listing and summary renderer
#[derive(Clone, Debug)]
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn with_color(mut self, colorize: bool) -> Self {
        self.colorize = colorize;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// One line: verdict, totals and elapsed time
    pub fn format_summary(&self, report: &RunReport) -> String {
        let color = if report.is_successful() { GREEN } else { RED };
        let mut line = format!(
            "{}: {} tests, {} passed in {:.3}s",
            paint(self.colorize, color, &verdict(report)),
            report.total(),
            report.counts.get(OutcomeKind::Pass),
            report.elapsed.as_secs_f64()
        );
        if report.policy == UnexpectedSuccessPolicy::Success
            && report.counts.get(OutcomeKind::UnexpectedSuccess) > 0
        {
            line.push_str(" (unexpected successes tolerated)");
        }
        if let Some(reason) = &report.cancelled {
            line.push_str(&format!(" [cancelled: {reason}]"));
        }
        line
    }

    /// Units of a suite, one per line; `detailed` adds metadata
    pub fn format_listing(&self, suite: &Suite, detailed: bool) -> String {
        let mut output = String::new();
        for entry in suite.entries() {
            match entry {
                SuiteEntry::Failed(err) => {
                    output.push_str(&format!(
                        "{} {}\n",
                        paint(self.colorize, RED, "[load error]"),
                        err
                    ));
                }
                SuiteEntry::Loaded(module) => {
                    for (container, unit) in module.units() {
                        output.push_str(&format!(
                            "{}::{}::{}\n",
                            module.name, container.name, unit.name
                        ));
                        if !detailed {
                            continue;
                        }
                        let subject = crate::selector::Subject {
                            module,
                            container,
                            unit,
                        };
                        let tags = subject.tags();
                        if !tags.is_empty() {
                            let tags: Vec<_> = tags.into_iter().collect();
                            output.push_str(&format!("    tags: {}\n", tags.join(", ")));
                        }
                        let attrs: Vec<String> = module
                            .meta
                            .attrs
                            .keys()
                            .chain(container.meta.attrs.keys())
                            .chain(unit.meta.attrs.keys())
                            .collect::<std::collections::BTreeSet<_>>()
                            .into_iter()
                            .filter_map(|k| subject.lookup(k).map(|v| format!("{k}={v}")))
                            .collect();
                        if !attrs.is_empty() {
                            output.push_str(&format!("    attrs: {}\n", attrs.join(", ")));
                        }
                        if let Some(mark) = describe(&unit.meta.decoration) {
                            output.push_str(&format!("    {mark}\n"));
                        }
                        if let Some(path) = &module.path {
                            output.push_str(&format!("    file: {}\n", path.display()));
                        }
                    }
                }
            }
        }
        let modules = suite.modules().count();
        output.push_str(&format!(
            "\n{} tests in {} modules",
            suite.unit_count() - suite.failures().count(),
            modules
        ));
        let failures = suite.failures().count();
        if failures > 0 {
            output.push_str(&format!(", {failures} failed to load"));
        }
        output.push('\n');
        output
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Text)
    }
}

fn describe(decoration: &Decoration) -> Option<String> {
    match decoration {
        Decoration::None => None,
        Decoration::Skip { reason } => Some(format!("skip: {reason}")),
        Decoration::ConditionalSkip { condition, reason } => {
            Some(format!("skip if {}: {reason}", condition.label()))
        }
        Decoration::ExpectedFailure => Some("expected failure".to_string()),
    }
}
