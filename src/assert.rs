//! Assertion helpers for test bodies
//!
//! Each helper returns `Err(TestError::Assertion)` on mismatch so a body can
//! propagate it with `?`, and records the caller's location.

use std::fmt::Debug;

use crate::error::TestError;

pub type TestResult = Result<(), TestError>;

#[track_caller]
pub fn ensure(condition: bool, message: impl Into<String>) -> TestResult {
    if condition {
        Ok(())
    } else {
        Err(TestError::assertion(message))
    }
}

#[track_caller]
pub fn ensure_eq<L, R>(left: L, right: R) -> TestResult
where
    L: PartialEq<R> + Debug,
    R: Debug,
{
    if left == right {
        Ok(())
    } else {
        Err(TestError::assertion(format!(
            "assertion `left == right` failed\n  left: {left:?}\n right: {right:?}"
        )))
    }
}

#[track_caller]
pub fn ensure_ne<L, R>(left: L, right: R) -> TestResult
where
    L: PartialEq<R> + Debug,
    R: Debug,
{
    if left != right {
        Ok(())
    } else {
        Err(TestError::assertion(format!(
            "assertion `left != right` failed\n  left: {left:?}\n right: {right:?}"
        )))
    }
}

#[track_caller]
pub fn ensure_contains(haystack: &str, needle: &str) -> TestResult {
    if haystack.contains(needle) {
        Ok(())
    } else {
        Err(TestError::assertion(format!(
            "expected {haystack:?} to contain {needle:?}"
        )))
    }
}

/// Unconditional failure
#[track_caller]
pub fn fail(message: impl Into<String>) -> TestResult {
    Err(TestError::assertion(message))
}

/// Stop the body here and report the unit as skipped
pub fn skip(reason: impl Into<String>) -> TestResult {
    Err(TestError::skip(reason))
}
