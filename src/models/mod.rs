//! Data models for the test runner
//!
//! The test tree built by discovery and the outcomes produced by a run.

mod outcome;
mod unit;

pub use outcome::{
    Counts, Outcome, OutcomeKind, RunReport, ScopeFault, UnexpectedSuccessPolicy, UnitRecord,
};
pub use unit::{
    Annotated, AttrValue, Condition, Decoration, Fixtures, Metadata, ScopeLevel, TestContainer,
    TestFn, TestModule, TestUnit, UnitId,
};
