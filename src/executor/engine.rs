//! Execution engine
//!
//! Runs one unit body in isolation and classifies the result.

use std::time::Duration;

use crate::error::TestError;
use crate::executor::panic::guarded;
use crate::executor::Context;
use crate::models::{Outcome, TestUnit};
use crate::utils::Timer;

/// Map a body result to its outcome
pub fn classify(result: Result<(), TestError>, expected_failure: bool) -> Outcome {
    match (result, expected_failure) {
        (Err(TestError::Skip { reason }), _) => Outcome::Skipped { reason },
        (Ok(()), false) => Outcome::Pass,
        (Ok(()), true) => Outcome::UnexpectedSuccess,
        (Err(err), true) => Outcome::ExpectedFailure {
            reason: err.message().to_string(),
        },
        (Err(TestError::Assertion { message, location }), false) => Outcome::Fail {
            reason: message,
            location,
        },
        (Err(TestError::Unhandled { message, location }), false) => Outcome::Error {
            cause: message,
            location,
        },
    }
}

/// Run a unit body with panics caught and return its outcome and duration
pub fn execute(unit: &TestUnit, expected_failure: bool, ctx: &mut Context<'_>) -> (Outcome, Duration) {
    let timer = Timer::start(ctx.scope().to_string());
    let result = guarded(&unit.body, ctx);
    let duration = timer.stop();
    (classify(result, expected_failure), duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert::{ensure_eq, skip};
    use crate::executor::ScopeStores;
    use crate::models::OutcomeKind;

    fn run(unit: &TestUnit, expected_failure: bool) -> Outcome {
        let mut stores = ScopeStores::default();
        let mut ctx = Context::new("m::C::unit", &mut stores);
        execute(unit, expected_failure, &mut ctx).0
    }

    #[test]
    fn test_classification() {
        let pass = TestUnit::new("test_pass", |_| Ok(()));
        let fail = TestUnit::new("test_fail", |_| ensure_eq(1, 2));
        let error = TestUnit::new("test_error", |_| Err(TestError::unhandled("io")));
        let skipped = TestUnit::new("test_skip", |_| skip("not now"));

        assert_eq!(run(&pass, false), Outcome::Pass);
        assert_eq!(run(&fail, false).kind(), OutcomeKind::Fail);
        assert_eq!(run(&error, false).kind(), OutcomeKind::Error);
        assert_eq!(run(&skipped, false), Outcome::skipped("not now"));
    }

    #[test]
    fn test_expected_failure() {
        let raising = TestUnit::new("test_known_bug", |_| ensure_eq(1, 2));
        let passing = TestUnit::new("test_fixed_bug", |_| Ok(()));

        assert_eq!(run(&raising, true).kind(), OutcomeKind::ExpectedFailure);
        assert_eq!(run(&passing, true), Outcome::UnexpectedSuccess);
        // A skip is a skip even when failure is expected
        let skipping = TestUnit::new("test_skip", |_| skip("later"));
        assert_eq!(run(&skipping, true).kind(), OutcomeKind::Skipped);
    }

    #[test]
    fn test_fail_keeps_location() {
        let unit = TestUnit::new("test_fail", |_| ensure_eq("a", "b"));
        match run(&unit, false) {
            Outcome::Fail { location, .. } => {
                assert!(location.unwrap().file.ends_with("engine.rs"))
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_panicking_body_is_isolated() {
        let unit = TestUnit::new("test_panic", |_| panic!("kaboom"));
        match run(&unit, false) {
            Outcome::Error { cause, .. } => assert_eq!(cause, "panicked: kaboom"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
