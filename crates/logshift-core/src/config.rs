//! Engine configuration
//!
//! Loaded once at INIT from `logshift.toml`; every field has a default so an
//! empty file (or no file) is a valid configuration.

use crate::error::ConfigError;
use crate::schedule::plan_order;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use logshift_transform::{ComponentTag, DEFAULT_LOGGER_SYMBOL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the project root
pub const CONFIG_FILE: &str = "logshift.toml";

/// Migration priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    /// Migrated first
    Critical,
    /// After critical
    High,
    /// After high
    Medium,
    /// Last
    Low,
}

/// Named check run after a component is migrated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PostConditionRule {
    /// No `console.*` call may remain
    NoDirectStdout,
    /// Every file using the logger symbol imports it
    ImportPresent,
    /// Logger calls must not carry credentials
    NoSecretLeak,
    /// Logger calls should carry a correlation field
    CorrelationToken,
}

/// Static configuration of one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMigrationConfig {
    /// Component
    pub component: ComponentTag,
    /// Globs relative to the project root
    pub paths: Vec<String>,
    /// Priority class
    pub priority: Priority,
    /// Components that must succeed first
    #[serde(default)]
    pub dependencies: Vec<ComponentTag>,
    /// Rules checked after migration
    #[serde(default)]
    pub rules: Vec<PostConditionRule>,
    /// Residual direct output is an error rather than a warning
    #[serde(default)]
    pub strict_residual: bool,
}

impl ComponentMigrationConfig {
    /// Compile `paths` into a matcher over root-relative paths
    ///
    /// Matching is case-insensitive and `*` never crosses `/`.
    ///
    /// # Errors
    /// `ConfigError::InvalidGlob` for a pattern that does not compile.
    pub fn glob_set(&self) -> Result<GlobSet, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.paths {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .literal_separator(true)
                .build()
                .map_err(|e| ConfigError::InvalidGlob {
                    component: self.component,
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
            builder.add(glob);
        }
        builder.build().map_err(|e| ConfigError::InvalidGlob {
            component: self.component,
            pattern: self.paths.join(", "),
            message: e.to_string(),
        })
    }
}

/// Optional before/after timing sampler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfConfig {
    /// Command that performs a batch of logging calls
    pub command: Vec<String>,
    /// Number of timed invocations per measurement
    #[serde(default = "default_perf_iterations")]
    pub iterations: u32,
    /// Overhead above which a warning is raised
    #[serde(default = "default_perf_threshold")]
    pub threshold_percent: f64,
}

fn default_perf_iterations() -> u32 {
    3
}

fn default_perf_threshold() -> f64 {
    10.0
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Project being migrated
    pub project_root: PathBuf,
    /// Where run directories are created
    pub backup_root: PathBuf,
    /// Where reports are written
    pub report_dir: PathBuf,
    /// Logger module, extension-less
    pub logger_module: PathBuf,
    /// Logger symbol
    pub logger_symbol: String,
    /// Test command; empty disables TESTING
    pub test_command: Vec<String>,
    /// Hard ceiling for the test command
    pub test_timeout_secs: u64,
    /// Concurrent file workers
    pub max_workers: usize,
    /// Directory names never descended into
    pub exclude_dirs: Vec<String>,
    /// Configuration files snapshotted at INIT
    pub critical_files: Vec<PathBuf>,
    /// Duration estimate per call
    pub per_call_estimate_ms: u64,
    /// Optional performance sampler
    pub perf: Option<PerfConfig>,
    /// Transform without writing
    pub dry_run: bool,
    /// Component table
    pub components: Vec<ComponentMigrationConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            backup_root: PathBuf::from(".logshift/backups"),
            report_dir: PathBuf::from(".logshift/reports"),
            logger_module: PathBuf::from("src/utils/component-logger"),
            logger_symbol: DEFAULT_LOGGER_SYMBOL.to_string(),
            test_command: vec!["npm".into(), "test".into()],
            test_timeout_secs: 600,
            max_workers: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            exclude_dirs: [
                "node_modules",
                "dist",
                "build",
                "coverage",
                ".git",
                ".logshift",
                "vendor",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            critical_files: vec![PathBuf::from("package.json"), PathBuf::from("tsconfig.json")],
            per_call_estimate_ms: 5,
            perf: None,
            dry_run: false,
            components: default_components(),
        }
    }
}

fn component(
    component: ComponentTag,
    paths: &[&str],
    priority: Priority,
    dependencies: &[ComponentTag],
    rules: &[PostConditionRule],
    strict_residual: bool,
) -> ComponentMigrationConfig {
    ComponentMigrationConfig {
        component,
        paths: paths.iter().map(|p| (*p).to_string()).collect(),
        priority,
        dependencies: dependencies.to_vec(),
        rules: rules.to_vec(),
        strict_residual,
    }
}

/// Built-in component table
#[must_use]
pub fn default_components() -> Vec<ComponentMigrationConfig> {
    use ComponentTag as C;
    use PostConditionRule as R;
    use Priority as P;

    vec![
        // catch-all: unclassified files are Core
        component(C::Core, &["**/*"], P::Critical, &[], &[R::NoDirectStdout, R::ImportPresent], false),
        component(C::Mcp, &["**/mcp/**"], P::Critical, &[C::Core], &[R::NoDirectStdout, R::ImportPresent], true),
        component(
            C::Interface,
            &["**/cli/**", "**/commands/**", "**/ui/**", "**/api/**"],
            P::High,
            &[C::Core],
            &[R::ImportPresent],
            true,
        ),
        component(
            C::Coordination,
            &["**/coordination/**", "**/swarm/**", "**/agents/**", "**/orchestrat*", "**/orchestrat*/**"],
            P::High,
            &[C::Core],
            &[R::ImportPresent, R::CorrelationToken],
            false,
        ),
        component(C::Memory, &["**/memory/**"], P::High, &[C::Core], &[R::ImportPresent], false),
        component(
            C::Storage,
            &["**/storage/**", "**/persistence/**", "**/db/**", "**/database/**"],
            P::Medium,
            &[C::Memory],
            &[R::ImportPresent, R::NoSecretLeak],
            false,
        ),
        component(C::Terminal, &["**/terminal/**"], P::Medium, &[C::Core], &[R::ImportPresent], false),
        component(
            C::Hooks,
            &["**/hooks/**"],
            P::Medium,
            &[C::Coordination],
            &[R::ImportPresent, R::CorrelationToken],
            false,
        ),
        component(
            C::Enterprise,
            &["**/enterprise/**"],
            P::Low,
            &[C::Core],
            &[R::ImportPresent, R::NoSecretLeak],
            false,
        ),
    ]
}

impl EngineConfig {
    /// Defaults rooted at `project_root`
    #[must_use]
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ..Self::default()
        }
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed input.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load a config file
    ///
    /// A relative `project_root` inside the file is taken relative to the
    /// file's directory.
    ///
    /// # Errors
    /// `ConfigError::Read` or `ConfigError::Parse`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text, path)?;
        if config.project_root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.project_root = base.join(&config.project_root);
        }
        Ok(config)
    }

    /// Load `<project_root>/logshift.toml` if it exists, else defaults
    ///
    /// # Errors
    /// As [`EngineConfig::load`].
    pub fn discover(project_root: &Path) -> Result<Self, ConfigError> {
        let candidate = project_root.join(CONFIG_FILE);
        if candidate.is_file() {
            let mut config = Self::load(&candidate)?;
            config.project_root = project_root.to_path_buf();
            Ok(config)
        } else {
            Ok(Self::for_project(project_root))
        }
    }

    /// Resolve a configured path against the project root
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    /// Absolute backup root
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.resolve(&self.backup_root)
    }

    /// Absolute report directory
    #[must_use]
    pub fn report_path(&self) -> PathBuf {
        self.resolve(&self.report_dir)
    }

    /// Absolute logger module path (extension-less)
    #[must_use]
    pub fn logger_module_path(&self) -> PathBuf {
        self.resolve(&self.logger_module)
    }

    /// Configuration for one component
    #[must_use]
    pub fn component(&self, tag: ComponentTag) -> Option<&ComponentMigrationConfig> {
        self.components.iter().find(|c| c.component == tag)
    }

    /// Check invariants
    ///
    /// # Errors
    /// The first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_workers",
                message: "must be at least 1".into(),
            });
        }
        if self.test_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "test_timeout_secs",
                message: "must be at least 1".into(),
            });
        }
        if self.logger_symbol.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "logger_symbol",
                message: "must not be empty".into(),
            });
        }
        if let Some(perf) = &self.perf {
            if perf.command.is_empty() || perf.iterations == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "perf",
                    message: "command and at least one iteration required".into(),
                });
            }
        }

        let mut seen = BTreeSet::new();
        for c in &self.components {
            if !seen.insert(c.component) {
                return Err(ConfigError::DuplicateComponent(c.component));
            }
            c.glob_set()?;
        }
        for c in &self.components {
            if let Some(dep) = c.dependencies.iter().find(|d| !seen.contains(*d)) {
                return Err(ConfigError::UnknownDependency {
                    component: c.component,
                    dependency: *dep,
                });
            }
        }

        plan_order(&self.components).map(|_| ())
    }
}
