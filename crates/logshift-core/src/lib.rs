//! logshift migration engine
//!
//! Drives the transform layer across a whole project:
//!
//! - **Config**: component table, priorities, dependencies, rules
//! - **Driver**: backup, rewrite and post-conditions per component
//! - **Validator**: re-parse, import resolution, residual calls, test suite
//! - **Orchestrator**: the staged pipeline with progress events and reports
//!
//! # Example
//!
//! ```rust,ignore
//! use logshift_core::{EngineConfig, Orchestrator};
//!
//! let config = EngineConfig::discover(Path::new("."))?;
//! let orchestrator = Orchestrator::new(config);
//! let mut events = orchestrator.subscribe();
//! let outcome = orchestrator.run().await?;
//! println!("{}", outcome.report_path.display());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod rules;
pub mod runner;
pub mod schedule;
pub mod types;
pub mod validator;

pub use logshift_transform::ComponentTag;

pub use config::{
    default_components, ComponentMigrationConfig, EngineConfig, PerfConfig, PostConditionRule,
    Priority, CONFIG_FILE,
};
pub use driver::{ComponentOutcome, FileOutcome, MigrationDriver};
pub use error::{
    ConfigError, DriverError, EngineError, EngineResult, ErrorCategory, PipelineError,
    ValidationError,
};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use pipeline::{allowed_transitions, validate_transition};
pub use progress::{CancelToken, ProgressBus, ProgressEvent, ProgressKind};
pub use report::{AnalysisReport, MigrationReport, RollbackRecommendation, RollbackScope};
pub use rules::{RuleFinding, Severity};
pub use runner::{CommandTestRunner, PerfSampler, TestOutcome, TestRunner};
pub use schedule::plan_order;
pub use types::{
    ComponentMigrationResult, ComponentState, FileMetrics, MigrationRecord, MigrationSummary,
    PipelineState, RunId, Stage,
};
pub use validator::{ValidationReport, Validator};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
