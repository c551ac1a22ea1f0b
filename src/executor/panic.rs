//! Panic isolation for units and fixtures
//!
//! A process-wide hook records the message and location of panics raised
//! inside a guarded call and keeps them off stderr. Panics outside a guarded
//! call go to the previously installed hook.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::error::{SourceLocation, TestError};
use crate::executor::Context;
use crate::models::TestFn;

static INSTALL: Once = Once::new();

thread_local! {
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_PANIC: RefCell<Option<CapturedPanic>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone)]
struct CapturedPanic {
    message: String,
    location: Option<SourceLocation>,
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Install the capturing hook; idempotent
pub fn install_hook() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if GUARD_DEPTH.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let captured = CapturedPanic {
                message: payload_message(info.payload()),
                location: info.location().map(SourceLocation::from_std),
            };
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(captured));
        }));
    });
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Self {
        GUARD_DEPTH.with(|d| d.set(d.get() + 1));
        DepthGuard
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        GUARD_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Map a caught panic to a body error. `assert!`-family panics are
/// assertion failures; anything else is unhandled.
fn classify_panic(message: String, location: Option<SourceLocation>) -> TestError {
    if message.starts_with("assertion") {
        TestError::Assertion { message, location }
    } else {
        TestError::Unhandled {
            message: format!("panicked: {message}"),
            location,
        }
    }
}

/// Run `f` with panics converted into `TestError`
pub fn guarded(f: &TestFn, ctx: &mut Context<'_>) -> Result<(), TestError> {
    install_hook();
    LAST_PANIC.with(|slot| slot.borrow_mut().take());

    let result = {
        let _depth = DepthGuard::enter();
        panic::catch_unwind(AssertUnwindSafe(|| f(ctx)))
    };

    match result {
        Ok(outcome) => outcome,
        Err(payload) => {
            let captured = LAST_PANIC.with(|slot| slot.borrow_mut().take());
            let (message, location) = match captured {
                Some(c) => (c.message, c.location),
                None => (payload_message(payload.as_ref()), None),
            };
            Err(classify_panic(message, location))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ScopeStores;
    use std::sync::Arc;

    fn run(f: TestFn) -> Result<(), TestError> {
        let mut stores = ScopeStores::default();
        let mut ctx = Context::new("m::C::test", &mut stores);
        guarded(&f, &mut ctx)
    }

    #[test]
    fn test_assert_panic_is_assertion() {
        let err = run(Arc::new(|_| {
            assert_eq!(1, 2);
            Ok(())
        }))
        .unwrap_err();
        assert!(err.is_assertion());
        assert!(err.location().unwrap().file.ends_with("panic.rs"));
    }

    #[test]
    fn test_other_panic_is_unhandled() {
        let err = run(Arc::new(|_| {
            let missing: Option<u8> = None;
            missing.unwrap();
            Ok(())
        }))
        .unwrap_err();
        assert!(matches!(err, TestError::Unhandled { .. }));
        assert!(err.message().starts_with("panicked: called `Option::unwrap()`"));
    }

    #[test]
    fn test_returned_error_passes_through() {
        let err = run(Arc::new(|_| Err(TestError::skip("nope")))).unwrap_err();
        assert!(err.is_skip());
        assert!(run(Arc::new(|_| Ok(()))).is_ok());
    }
}
