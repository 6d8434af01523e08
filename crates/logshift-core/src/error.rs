//! Error types for the migration engine
//!
//! Errors are grouped by the concern that raises them:
//! - configuration loading and validation
//! - per-component driver failures
//! - post-migration validation
//! - pipeline stage transitions
//!
//! [`EngineError`] wraps all of them and maps each to an [`ErrorCategory`].

use crate::types::Stage;
use logshift_backup::BackupError;
use logshift_transform::{ComponentTag, ParseError, TransformError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level engine error
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Required tooling missing at start-up
    #[error("prerequisite missing: {0}")]
    Prerequisite(String),

    /// Component migration failed
    #[error("migration failed: {0}")]
    Driver(#[from] DriverError),

    /// Post-migration validation failed
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Illegal stage transition
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Backup store failure
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    /// Report could not be written
    #[error("report error at {path}: {message}")]
    Report { path: PathBuf, message: String },

    /// Run aborted by the user
    #[error("operation cancelled")]
    Cancelled,
}

/// Failure classes surfaced to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    /// Structural parse failed (recovered locally)
    Parse,
    /// A file could not be rewritten safely
    Transform,
    /// A component rule failed
    PostCondition,
    /// Re-parse, import or test failure after migration
    Validation,
    /// Missing tooling or bad configuration at start-up
    Prerequisite,
    /// Filesystem or backup failure
    Io,
    /// User abort
    Cancelled,
}

impl EngineError {
    /// Failure class of this error
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::Prerequisite(_) => ErrorCategory::Prerequisite,
            Self::Driver(e) => e.category(),
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Pipeline(_) => ErrorCategory::Validation,
            Self::Backup(_) | Self::Report { .. } => ErrorCategory::Io,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

/// Configuration errors, raised at INIT
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file unreadable
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file malformed
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A component is configured twice
    #[error("component {0} configured more than once")]
    DuplicateComponent(ComponentTag),

    /// A dependency names an unconfigured component
    #[error("component {component} depends on unconfigured {dependency}")]
    UnknownDependency {
        component: ComponentTag,
        dependency: ComponentTag,
    },

    /// Dependency cycle
    #[error("dependency cycle involving {0:?}")]
    Cycle(Vec<ComponentTag>),

    /// A path glob does not compile
    #[error("invalid glob {pattern:?} for {component}: {message}")]
    InvalidGlob {
        component: ComponentTag,
        pattern: String,
        message: String,
    },

    /// Out-of-range value
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

/// Errors raised while migrating one component
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// A declared dependency has not succeeded in this run
    #[error("{component} requires {dependency} to succeed first")]
    DependencyNotSatisfied {
        component: ComponentTag,
        dependency: ComponentTag,
    },

    /// One file could not be read or written; siblings continue
    #[error("{0}")]
    File(String),

    /// Transformer failure on one file
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    /// Backup failure
    #[error("backup failed: {0}")]
    Backup(#[from] BackupError),

    /// File enumeration failed
    #[error("discovery failed under {root}: {message}")]
    Discovery { root: PathBuf, message: String },

    /// A worker task died
    #[error("worker failed: {0}")]
    Worker(String),

    /// Component finished with errors
    #[error("component {component} failed: {}", errors.join("; "))]
    ComponentFailed {
        component: ComponentTag,
        errors: Vec<String>,
    },

    /// Run aborted
    #[error("cancelled")]
    Cancelled,
}

impl DriverError {
    /// Failure class
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DependencyNotSatisfied { .. } => ErrorCategory::Prerequisite,
            Self::Transform(TransformError::Parser(_)) => ErrorCategory::Parse,
            Self::File(_) | Self::Transform(_) | Self::Worker(_) => ErrorCategory::Transform,
            Self::ComponentFailed { .. } => ErrorCategory::PostCondition,
            Self::Backup(_) | Self::Discovery { .. } => ErrorCategory::Io,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

/// Errors raised by the validator
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// A touched file no longer parses
    #[error("{path} does not parse: {source}")]
    Reparse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    /// Logger symbol used without its import
    #[error("{path} uses {symbol} without importing it")]
    MissingImport { path: PathBuf, symbol: String },

    /// Import does not resolve to a file
    #[error("{path}: import {specifier:?} does not resolve")]
    UnresolvedImport { path: PathBuf, specifier: String },

    /// Direct output left in a strict component
    #[error("{count} direct output call(s) remain in strict component {component}")]
    StrictResidual { component: ComponentTag, count: usize },

    /// Test suite exited non-zero
    #[error("test suite failed with exit code {code:?}")]
    TestsFailed { code: Option<i32> },

    /// Test suite exceeded its time budget
    #[error("test suite timed out after {secs}s")]
    TestTimeout { secs: u64 },

    /// Test suite could not be started
    #[error("cannot run test suite: {0}")]
    Runner(String),

    /// Validation failed with the listed errors
    #[error("{}", .0.join("; "))]
    Failed(Vec<String>),
}

/// Stage machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Transition not allowed
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: Stage, to: Stage },
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_level_errors_are_categorised() {
        assert_eq!(DriverError::File("not valid UTF-8".into()).category(), ErrorCategory::Transform);
        assert_eq!(
            DriverError::from(TransformError::Parser(ParseError::NoTree)).category(),
            ErrorCategory::Parse
        );
        let broke = TransformError::BrokeSyntax {
            path: PathBuf::from("a.ts"),
            source: ParseError::syntax(1, 1, "x"),
        };
        assert_eq!(DriverError::from(broke).category(), ErrorCategory::Transform);
        assert_eq!(
            DriverError::from(BackupError::NoManifest(PathBuf::from("/b"))).category(),
            ErrorCategory::Io
        );
    }

    #[test]
    fn categories_follow_taxonomy() {
        assert_eq!(
            EngineError::Prerequisite("no grammar".into()).category(),
            ErrorCategory::Prerequisite
        );
        assert_eq!(
            EngineError::from(ValidationError::TestsFailed { code: Some(1) }).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            EngineError::from(DriverError::ComponentFailed {
                component: ComponentTag::Storage,
                errors: vec!["x".into()],
            })
            .category(),
            ErrorCategory::PostCondition
        );
        assert_eq!(EngineError::Cancelled.category(), ErrorCategory::Cancelled);
    }

    #[test]
    fn component_failure_lists_messages() {
        let err = DriverError::ComponentFailed {
            component: ComponentTag::Memory,
            errors: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "component Memory failed: a; b");
    }
}
