//! Test execution engine
//!
//! Fixture scopes, isolated unit execution, and the sequential and parallel
//! runners built on them.

pub mod engine;
mod fixture;
mod panic;
mod parallel;
mod runner;

pub use fixture::{Context, FixtureManager, ScopeEntry, ScopeFixture, ScopeState, ScopeStores, Store};
pub use panic::install_hook;
pub use parallel::ParallelExecutor;
pub use runner::{execute_entry, CancelToken, RunOptions, TestRunner};
