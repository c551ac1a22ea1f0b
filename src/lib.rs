//! unitrun - xUnit-style test framework core
//!
//! Tests are organised as modules of containers of units. Fixtures are
//! attached at module, class (container) and instance (per-unit) scope.
//! Units are discovered, filtered by tag and attribute predicates, run with
//! their fixtures, and classified into one outcome each.
//!
//! ```no_run
//! use unitrun::prelude::*;
//!
//! let module = TestModule::new("math").container(
//!     TestContainer::new("Arith")
//!         .setup(|ctx| {
//!             ctx.instance().insert("x", 2i64);
//!             Ok(())
//!         })
//!         .unit(TestUnit::new("test_double", |ctx| {
//!             let x = *ctx.instance().get::<i64>("x").unwrap_or(&0);
//!             ensure_eq(x * 2, 4)
//!         })),
//! );
//!
//! let suite = Registry::default().discover(&[StaticModule::from_module(module)]);
//! let mut reporter = ConsoleReporter::new(std::io::stdout());
//! let report = TestRunner::new(RunOptions::default())
//!     .run(&suite, &mut reporter)
//!     .expect("report written");
//! assert!(report.is_successful());
//! ```

pub mod assert;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod models;
pub mod output;
pub mod registry;
pub mod selector;
pub mod utils;

/// Everything needed to write and run tests in Rust
pub mod prelude {
    pub use crate::assert::{ensure, ensure_contains, ensure_eq, ensure_ne, fail, skip, TestResult};
    pub use crate::error::{SourceLocation, TestError};
    pub use crate::executor::{Context, RunOptions, TestRunner};
    pub use crate::models::{
        Annotated, AttrValue, Condition, Outcome, OutcomeKind, RunReport, TestContainer,
        TestModule, TestUnit,
    };
    pub use crate::output::{ConsoleReporter, Reporter};
    pub use crate::registry::{Registry, StaticModule};
    pub use crate::selector::Selector;
}
