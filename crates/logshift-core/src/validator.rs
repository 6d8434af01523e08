//! Post-migration validation
//!
//! Independent checks over the whole tree:
//! - touched files still parse
//! - logger imports are present and resolve
//! - residual direct output (error only for strict components)
//! - the project's own test suite
//! - optional timing overhead

use crate::config::EngineConfig;
use crate::discovery::Discovery;
use crate::error::ValidationError;
use crate::runner::{PerfSampler, TestOutcome, TestRunner};
use crate::types::MigrationRecord;
use logshift_transform::imports::{resolution_candidates, ImportMatcher};
use logshift_transform::scan::{count_output_calls, logger_calls};
use logshift_transform::{classify, parse_source, ComponentTag, SourceLanguage, Strategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Test-suite summary carried in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    /// Exit code
    pub exit_code: Option<i32>,
    /// Wall time
    pub duration_ms: u64,
    /// Killed on timeout
    pub timed_out: bool,
}

impl From<&TestOutcome> for TestSummary {
    fn from(o: &TestOutcome) -> Self {
        Self {
            exit_code: o.exit_code,
            duration_ms: o.duration_ms,
            timed_out: o.timed_out,
        }
    }
}

/// Outcome of validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// No error recorded
    pub passed: bool,
    /// Hard failures
    pub errors: Vec<String>,
    /// Soft findings
    pub warnings: Vec<String>,
    /// Touched files re-parsed
    pub files_checked: usize,
    /// Direct output calls left project-wide
    pub residual_calls: usize,
    /// Residual calls per component
    pub residual_by_component: BTreeMap<ComponentTag, usize>,
    /// Test suite result, when it ran
    pub tests: Option<TestSummary>,
    /// Timing overhead, when measured
    pub perf_overhead_percent: Option<f64>,
}

impl ValidationReport {
    fn error(&mut self, err: &ValidationError) {
        tracing::error!(error = %err, "validation error");
        self.errors.push(err.to_string());
        self.passed = false;
    }

    fn warn(&mut self, message: String) {
        tracing::warn!(warning = %message, "validation warning");
        self.warnings.push(message);
    }

    /// Merge another report into this one
    pub fn merge(&mut self, other: ValidationReport) {
        self.passed = self.passed && other.passed;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.files_checked += other.files_checked;
        self.residual_calls += other.residual_calls;
        for (tag, n) in other.residual_by_component {
            *self.residual_by_component.entry(tag).or_default() += n;
        }
        self.tests = self.tests.take().or(other.tests);
        self.perf_overhead_percent = self.perf_overhead_percent.or(other.perf_overhead_percent);
    }
}

/// Whole-tree validator
#[derive(Debug, Clone)]
pub struct Validator {
    root: PathBuf,
    symbol: String,
    imports: ImportMatcher,
    discovery: Discovery,
    strict: BTreeSet<ComponentTag>,
    dry_run: bool,
}

impl Validator {
    /// Build from engine configuration
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            root: config.project_root.clone(),
            symbol: config.logger_symbol.clone(),
            imports: ImportMatcher::new(&config.logger_symbol),
            discovery: Discovery::from_config(config),
            strict: config
                .components
                .iter()
                .filter(|c| c.strict_residual)
                .map(|c| c.component)
                .collect(),
            dry_run: config.dry_run,
        }
    }

    /// Static checks over the tree
    ///
    /// # Errors
    /// `ValidationError::Runner` if the tree cannot be enumerated.
    #[tracing::instrument(skip_all, fields(touched = touched.len()))]
    pub fn check_tree(&self, touched: &[MigrationRecord]) -> Result<ValidationReport, ValidationError> {
        let mut report = ValidationReport {
            passed: true,
            ..ValidationReport::default()
        };

        if self.dry_run {
            report.warn("dry run: re-parse of touched files skipped".into());
        } else {
            self.check_reparse(touched, &mut report);
        }

        let sources = self
            .discovery
            .sources()
            .map_err(|e| ValidationError::Runner(e.to_string()))?;

        for entry in &sources {
            let Ok(content) = std::fs::read_to_string(&entry.path) else {
                continue;
            };
            self.check_imports(&entry.path, &content, &mut report);

            let residual = count_output_calls(&content, &entry.path);
            if residual > 0 {
                report.residual_calls += residual;
                *report
                    .residual_by_component
                    .entry(classify(Path::new(&entry.relative)))
                    .or_default() += residual;
            }
        }

        let by_component = report.residual_by_component.clone();
        for (component, count) in by_component {
            if self.strict.contains(&component) && !self.dry_run {
                report.error(&ValidationError::StrictResidual { component, count });
            }
        }
        if report.residual_calls > 0 {
            report.warn(format!(
                "{} direct output call(s) remain project-wide",
                report.residual_calls
            ));
        }

        tracing::info!(
            passed = report.passed,
            errors = report.errors.len(),
            residual = report.residual_calls,
            "tree validated"
        );
        Ok(report)
    }

    fn check_reparse(&self, touched: &[MigrationRecord], report: &mut ValidationReport) {
        for record in touched.iter().filter(|r| r.touched()) {
            report.files_checked += 1;
            let content = match std::fs::read_to_string(&record.file) {
                Ok(c) => c,
                Err(e) => {
                    report.error(&ValidationError::Runner(format!(
                        "cannot read {}: {e}",
                        record.file.display()
                    )));
                    continue;
                }
            };
            let language = SourceLanguage::from_path(&record.file).unwrap_or(SourceLanguage::Tsx);
            if let Err(source) = parse_source(&content, language) {
                if record.strategy == Some(Strategy::Textual) {
                    report.warn(format!(
                        "{}: pre-existing syntax error ({source})",
                        record.file.display()
                    ));
                } else {
                    report.error(&ValidationError::Reparse {
                        path: record.file.clone(),
                        source,
                    });
                }
            }
        }
    }

    fn check_imports(&self, path: &Path, content: &str, report: &mut ValidationReport) {
        if logger_calls(content, path, &self.symbol).is_empty() {
            return;
        }
        match self.imports.specifier(content) {
            None => report.error(&ValidationError::MissingImport {
                path: path.to_path_buf(),
                symbol: self.symbol.clone(),
            }),
            Some(specifier) => {
                let resolves = !specifier.starts_with('.')
                    || resolution_candidates(path, &specifier)
                        .iter()
                        .any(|c| c.is_file());
                if !resolves {
                    report.error(&ValidationError::UnresolvedImport {
                        path: path.to_path_buf(),
                        specifier,
                    });
                }
            }
        }
    }

    /// Run the project's test suite and fold the outcome in
    pub async fn run_tests(&self, runner: &dyn TestRunner, report: &mut ValidationReport) {
        if self.dry_run {
            report.warn("dry run: test suite skipped".into());
            return;
        }
        match runner.run(&self.root).await {
            Ok(outcome) => {
                report.tests = Some(TestSummary::from(&outcome));
                if outcome.timed_out {
                    report.error(&ValidationError::TestTimeout {
                        secs: runner.timeout().as_secs(),
                    });
                } else if !outcome.passed() {
                    report.error(&ValidationError::TestsFailed {
                        code: outcome.exit_code,
                    });
                }
            }
            Err(e) => report.error(&e),
        }
    }

    /// Compare sampled timings; overhead above the threshold is a warning
    pub fn record_perf(
        sampler: &PerfSampler,
        before: Duration,
        after: Duration,
        report: &mut ValidationReport,
    ) {
        let overhead = PerfSampler::overhead_percent(before, after);
        report.perf_overhead_percent = Some(overhead);
        if overhead > sampler.threshold_percent() {
            report.warn(format!(
                "logging overhead {overhead:.1}% exceeds {:.1}%",
                sampler.threshold_percent()
            ));
        }
    }

    /// Tree checks followed by the test suite
    ///
    /// # Errors
    /// `ValidationError::Runner` if the tree cannot be enumerated.
    pub async fn validate(
        &self,
        touched: &[MigrationRecord],
        runner: Option<&dyn TestRunner>,
    ) -> Result<ValidationReport, ValidationError> {
        let mut report = self.check_tree(touched)?;
        if let Some(runner) = runner {
            self.run_tests(runner, &mut report).await;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    const LOGGER: &str = "export const ComponentLogger = {};\n";

    struct Tree {
        dir: TempDir,
        config: EngineConfig,
    }

    impl Tree {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let config = EngineConfig::for_project(dir.path());
            let t = Self { dir, config };
            t.write("src/utils/component-logger.ts", LOGGER);
            t
        }

        fn write(&self, rel: &str, content: &str) -> PathBuf {
            let p = self.dir.path().join(rel);
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(&p, content).unwrap();
            p
        }
    }

    fn touched(path: PathBuf, strategy: Strategy) -> MigrationRecord {
        let mut r = MigrationRecord::new(path, ComponentTag::Storage);
        r.success = true;
        r.total_replacements = 1;
        r.strategy = Some(strategy);
        r
    }

    #[derive(Debug)]
    struct Fixed(TestOutcome);

    #[async_trait]
    impl TestRunner for Fixed {
        fn is_available(&self) -> bool {
            true
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
        async fn run(&self, _: &Path) -> Result<TestOutcome, ValidationError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn clean_tree_passes() {
        let t = Tree::new();
        let f = t.write(
            "src/storage/kv.ts",
            "import { ComponentLogger } from '../utils/component-logger';\nComponentLogger.info(\"Storage\", 1);\n",
        );
        let report = Validator::new(&t.config)
            .check_tree(&[touched(f, Strategy::Structural)])
            .unwrap();
        assert!(report.passed, "{:?}", report.errors);
        assert_eq!(report.files_checked, 1);
        assert_eq!(report.residual_calls, 0);
    }

    #[test]
    fn broken_structural_file_is_an_error() {
        let t = Tree::new();
        let f = t.write("src/storage/kv.ts", "let = ;\n");
        let report = Validator::new(&t.config)
            .check_tree(&[touched(f, Strategy::Structural)])
            .unwrap();
        assert!(!report.passed);
    }

    #[test]
    fn broken_textual_file_is_a_warning() {
        let t = Tree::new();
        let f = t.write("src/storage/kv.ts", "let = ;\n");
        let report = Validator::new(&t.config)
            .check_tree(&[touched(f, Strategy::Textual)])
            .unwrap();
        assert!(report.passed);
        assert!(report.warnings[0].contains("pre-existing syntax error"));
    }

    #[test]
    fn missing_and_unresolved_imports_fail() {
        let t = Tree::new();
        t.write("src/storage/a.ts", "ComponentLogger.info(\"Storage\");\n");
        t.write(
            "src/storage/b.ts",
            "import { ComponentLogger } from './nowhere';\nComponentLogger.info(\"Storage\");\n",
        );
        let report = Validator::new(&t.config).check_tree(&[]).unwrap();
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().any(|e| e.contains("without importing")));
        assert!(report.errors.iter().any(|e| e.contains("does not resolve")));
    }

    #[test]
    fn residual_is_warning_unless_strict() {
        let t = Tree::new();
        t.write("src/storage/a.ts", "console.log(1);\n");
        let report = Validator::new(&t.config).check_tree(&[]).unwrap();
        assert!(report.passed);
        assert_eq!(report.residual_by_component[&ComponentTag::Storage], 1);

        t.write("src/cli/main.ts", "console.log(1);\n");
        let report = Validator::new(&t.config).check_tree(&[]).unwrap();
        assert!(!report.passed);
        assert!(report.errors[0].contains("Interface"));
    }

    #[tokio::test]
    async fn failing_suite_fails_validation() {
        let t = Tree::new();
        let runner = Fixed(TestOutcome {
            exit_code: Some(1),
            duration_ms: 3,
            timed_out: false,
            output_tail: String::new(),
        });
        let report = Validator::new(&t.config).validate(&[], Some(&runner)).await.unwrap();
        assert!(!report.passed);
        assert_eq!(report.tests.unwrap().exit_code, Some(1));
    }

    #[tokio::test]
    async fn timed_out_suite_fails_validation() {
        let t = Tree::new();
        let runner = Fixed(TestOutcome {
            exit_code: None,
            duration_ms: 1000,
            timed_out: true,
            output_tail: String::new(),
        });
        let report = Validator::new(&t.config).validate(&[], Some(&runner)).await.unwrap();
        assert!(!report.passed);
        assert!(report.errors[0].contains("timed out"));
    }
}
