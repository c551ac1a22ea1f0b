//! Error taxonomy
//!
//! Body-level errors (`TestError`), scope-level errors raised by fixtures
//! (`ScopeError`), module load failures (`DiscoveryError`) and selection
//! expression errors (`SelectorError`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::Location;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::ScopeLevel;

/// Position in a source file that a failure points back to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    /// 0 when only the file is known (suite files)
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    pub fn from_std(location: &Location<'_>) -> Self {
        Self::new(location.file(), location.line(), location.column())
    }

    /// Location of the caller of the enclosing `#[track_caller]` function
    #[track_caller]
    pub fn caller() -> Self {
        Self::from_std(Location::caller())
    }

    pub fn file_only(path: &Path) -> Self {
        Self::new(path.display().to_string(), 0, 0)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.file)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}

/// Error raised from a test body or a fixture function
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TestError {
    /// An expectation was not met
    #[error("{message}")]
    Assertion {
        message: String,
        location: Option<SourceLocation>,
    },

    /// Any other fault
    #[error("{message}")]
    Unhandled {
        message: String,
        location: Option<SourceLocation>,
    },

    /// Cooperative early exit, not a real failure
    #[error("skipped: {reason}")]
    Skip { reason: String },
}

impl TestError {
    #[track_caller]
    pub fn assertion(message: impl Into<String>) -> Self {
        TestError::Assertion {
            message: message.into(),
            location: Some(SourceLocation::caller()),
        }
    }

    #[track_caller]
    pub fn unhandled(message: impl Into<String>) -> Self {
        TestError::Unhandled {
            message: message.into(),
            location: Some(SourceLocation::caller()),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        TestError::Skip {
            reason: reason.into(),
        }
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            TestError::Assertion { location, .. } | TestError::Unhandled { location, .. } => {
                location.as_ref()
            }
            TestError::Skip { .. } => None,
        }
    }

    pub fn is_assertion(&self) -> bool {
        matches!(self, TestError::Assertion { .. })
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, TestError::Skip { .. })
    }

    /// Message without the `skipped:` prefix
    pub fn message(&self) -> &str {
        match self {
            TestError::Assertion { message, .. } | TestError::Unhandled { message, .. } => message,
            TestError::Skip { reason } => reason,
        }
    }
}

impl From<anyhow::Error> for TestError {
    fn from(err: anyhow::Error) -> Self {
        TestError::Unhandled {
            message: format!("{err:#}"),
            location: None,
        }
    }
}

impl From<std::io::Error> for TestError {
    fn from(err: std::io::Error) -> Self {
        TestError::Unhandled {
            message: format!("I/O error: {err}"),
            location: None,
        }
    }
}

/// A module could not be loaded during discovery
#[derive(Error, Debug, Clone, PartialEq)]
#[error("failed to load module '{module}': {cause}")]
pub struct DiscoveryError {
    pub module: String,
    pub path: Option<PathBuf>,
    pub cause: String,
}

impl DiscoveryError {
    pub fn new(module: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            path: None,
            cause: cause.into(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Fixture errors, attributed to the scope that raised them
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScopeError {
    /// Terminal for the scope: no units run and its teardown is not called
    #[error("{level} setup failed for '{scope}': {cause}")]
    Setup {
        level: ScopeLevel,
        scope: String,
        cause: TestError,
    },

    /// Recorded against the scope; never changes a unit's outcome
    #[error("{level} teardown failed for '{scope}': {cause}")]
    Teardown {
        level: ScopeLevel,
        scope: String,
        cause: TestError,
    },
}

impl ScopeError {
    pub fn cause(&self) -> &TestError {
        match self {
            ScopeError::Setup { cause, .. } | ScopeError::Teardown { cause, .. } => cause,
        }
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.cause().location()
    }
}

/// Selection expression errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty selection expression")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string starting at position {0}")]
    UnterminatedString(usize),

    #[error("expected {expected} at position {pos}, found {found}")]
    Expected {
        expected: &'static str,
        found: String,
        pos: usize,
    },

    #[error("invalid attribute constraint '{0}'")]
    InvalidConstraint(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assertion_records_caller() {
        let err = TestError::assertion("boom");
        let location = err.location().unwrap();
        assert!(location.file.ends_with("error.rs"));
        assert!(location.line > 0);
        assert!(err.is_assertion());
    }

    #[test]
    fn test_skip_has_no_location() {
        let err = TestError::skip("not today");
        assert!(err.is_skip());
        assert!(err.location().is_none());
        assert_eq!(err.message(), "not today");
        assert_eq!(err.to_string(), "skipped: not today");
    }

    #[test]
    fn test_anyhow_maps_to_unhandled() {
        let err: TestError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, TestError::Unhandled { .. }));
        assert_eq!(err.message(), "disk full");
    }

    #[test]
    fn test_scope_error_display() {
        let err = ScopeError::Setup {
            level: ScopeLevel::Class,
            scope: "math::Arith".to_string(),
            cause: TestError::unhandled("db down"),
        };
        assert_eq!(err.to_string(), "class setup failed for 'math::Arith': db down");
        assert!(err.location().is_some());
    }

    #[test]
    fn test_location_display() {
        assert_eq!(SourceLocation::new("a.rs", 3, 7).to_string(), "a.rs:3:7");
        assert_eq!(
            SourceLocation::file_only(Path::new("suite/test_a.yaml")).to_string(),
            "suite/test_a.yaml"
        );
    }
}
