//! Migration pipeline
//!
//! ```text
//! INIT -> ANALYSIS -> MIGRATION -> VALIDATION -> TESTING -> COMPLETE
//!   \_________\___________\____________\___________\_____-> FAILED
//! ```
//!
//! The orchestrator is the only writer of [`PipelineState`]. Every stage
//! transition and every processed file is broadcast as a [`ProgressEvent`]
//! snapshot. Whatever the outcome, a run ends with a rollback script (when
//! anything was backed up) and a JSON report.
//!
//! [`ProgressEvent`]: crate::progress::ProgressEvent

use crate::config::EngineConfig;
use crate::discovery::Discovery;
use crate::driver::{FileOutcome, MigrationDriver};
use crate::error::{DriverError, EngineError, EngineResult, ValidationError};
use crate::pipeline::validate_transition;
use crate::progress::{CancelToken, ProgressBus, ProgressEvent, ProgressKind};
use crate::report::{AnalysisReport, MigrationReport, RollbackRecommendation};
use crate::runner::{CommandTestRunner, PerfSampler, TestRunner};
use crate::schedule::plan_order;
use crate::types::{ComponentMigrationResult, MigrationSummary, PipelineState, RunId, Stage};
use crate::validator::{ValidationReport, Validator};
use chrono::Utc;
use logshift_backup::{write_empty_rollback_script, BackupError, BackupStore};
use logshift_transform::parser::check_grammar;
use logshift_transform::scan::count_output_calls;
use logshift_transform::{ClassificationCache, ComponentTag, SourceLanguage};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Report and where it was written
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Final report
    pub report: MigrationReport,
    /// Report file
    pub report_path: PathBuf,
}

/// Mutable state of one run, owned by [`Orchestrator::run`]
struct RunContext {
    state: PipelineState,
    summary: MigrationSummary,
    components: Vec<ComponentMigrationResult>,
    failed_components: Vec<ComponentTag>,
    validation: Option<ValidationReport>,
    cache: ClassificationCache,
    store: Option<Arc<BackupStore>>,
    perf_baseline: Option<Duration>,
}

impl RunContext {
    fn new(run_id: RunId) -> Self {
        Self {
            state: PipelineState::new(run_id),
            summary: MigrationSummary::default(),
            components: Vec::new(),
            failed_components: Vec::new(),
            validation: None,
            cache: ClassificationCache::new(),
            store: None,
            perf_baseline: None,
        }
    }
}

/// Whether the logger module exists in any supported form
fn logger_module_exists(module: &Path) -> bool {
    if module.is_file() {
        return true;
    }
    SourceLanguage::EXTENSIONS.iter().any(|ext| {
        let mut with_ext = module.as_os_str().to_owned();
        with_ext.push(".");
        with_ext.push(ext);
        Path::new(&with_ext).is_file() || module.join(format!("index.{ext}")).is_file()
    })
}

/// Count files and calls per component
///
/// Every file goes through `cache`, so later stages see the same tags.
fn analyze_tree(
    discovery: &Discovery,
    cache: &mut ClassificationCache,
    per_call_ms: u64,
) -> Result<AnalysisReport, DriverError> {
    let mut report = AnalysisReport::default();
    for entry in discovery.sources()? {
        let classification = cache.classify(Path::new(&entry.relative));
        if classification.is_default() {
            tracing::warn!(
                file = %entry.relative,
                "no classification rule matched; defaulted to Core"
            );
            report.defaulted_files.push(entry.relative.clone());
        }
        let calls = std::fs::read_to_string(&entry.path)
            .map(|content| count_output_calls(&content, &entry.path))
            .unwrap_or(0);

        report.total_files += 1;
        report.total_calls += calls;
        *report.files_by_component.entry(classification.tag).or_default() += 1;
        *report.calls_by_component.entry(classification.tag).or_default() += calls;
    }
    report.estimated_duration_ms = (report.total_calls as u64).saturating_mul(per_call_ms);
    Ok(report)
}

/// Drives a run through every stage
#[derive(Debug)]
pub struct Orchestrator {
    config: EngineConfig,
    runner: Option<Arc<dyn TestRunner>>,
    perf: Option<PerfSampler>,
    progress: ProgressBus,
    cancel: CancelToken,
}

impl Orchestrator {
    /// Create orchestrator; the test runner comes from `config.test_command`
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let timeout = Duration::from_secs(config.test_timeout_secs);
        let runner = (!config.test_command.is_empty()).then(|| {
            Arc::new(CommandTestRunner::new(config.test_command.clone(), timeout)) as Arc<dyn TestRunner>
        });
        let perf = config.perf.clone().map(|p| PerfSampler::new(p, timeout));
        Self {
            config,
            runner,
            perf,
            progress: ProgressBus::default(),
            cancel: CancelToken::new(),
        }
    }

    /// Replace the test runner
    #[must_use]
    pub fn with_test_runner(mut self, runner: Arc<dyn TestRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to progress snapshots
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Token that aborts the run when cancelled
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run ANALYSIS alone, without touching anything
    ///
    /// # Errors
    /// `EngineError::Config` for invalid configuration, `EngineError::Driver`
    /// if the tree cannot be walked.
    pub async fn analyze(&self) -> EngineResult<AnalysisReport> {
        self.config.validate()?;
        let discovery = Discovery::from_config(&self.config);
        let per_call = self.config.per_call_estimate_ms;
        tokio::task::spawn_blocking(move || {
            analyze_tree(&discovery, &mut ClassificationCache::new(), per_call)
        })
        .await
        .map_err(|e| DriverError::Worker(e.to_string()))?
        .map_err(EngineError::from)
    }

    /// Run the whole pipeline
    ///
    /// A failed run is not an `Err`: it yields a report with status FAILED.
    ///
    /// # Errors
    /// `EngineError::Report` if the report cannot be written.
    #[tracing::instrument(skip(self), fields(root = %self.config.project_root.display()))]
    pub async fn run(&self) -> EngineResult<RunOutcome> {
        let mut ctx = RunContext::new(RunId::new());
        tracing::info!(run_id = %ctx.state.run_id, dry_run = self.config.dry_run, "run started");
        self.progress.emit(ProgressKind::StageChanged, &ctx.state);

        let failed_stage = match self.drive(&mut ctx).await {
            Ok(()) => {
                self.transition(&mut ctx, Stage::Complete)?;
                None
            }
            Err(err) => {
                let stage = ctx.state.stage;
                tracing::error!(stage = %stage, error = %err, category = ?err.category(), "run failed");
                ctx.state.errors.push(err.to_string());
                self.transition(&mut ctx, Stage::Failed)?;
                Some(stage)
            }
        };

        let rollback_script = match self.write_rollback_script(&ctx, failed_stage.is_some()) {
            Ok(path) => path,
            Err(e) => {
                ctx.state.errors.push(format!("rollback script not written: {e}"));
                None
            }
        };
        let backup_dir = ctx.store.as_ref().map(|s| s.run_dir().to_path_buf());

        let rollback_recommendation = failed_stage.map(|stage| {
            RollbackRecommendation::for_failure(
                stage,
                &ctx.failed_components,
                backup_dir.as_deref(),
                rollback_script.as_deref(),
            )
        });

        let finished_at = Utc::now();
        let duration_ms = u64::try_from((finished_at - ctx.state.started_at).num_milliseconds()).unwrap_or(0);
        let report = MigrationReport {
            run_id: ctx.state.run_id,
            status: ctx.state.stage,
            failed_stage,
            started_at: ctx.state.started_at,
            finished_at,
            duration_ms,
            dry_run: self.config.dry_run,
            summary: ctx.summary,
            components: ctx.components,
            validation: ctx.validation,
            errors: ctx.state.errors,
            warnings: ctx.state.warnings,
            backup_dir,
            rollback_script,
            rollback_recommendation,
        };
        let report_path = report.write_to(&self.config.report_path())?;
        tracing::info!(
            status = %report.status,
            report = %report_path.display(),
            duration_ms,
            "run finished"
        );
        Ok(RunOutcome {
            report,
            report_path,
        })
    }

    /// Script covering the run's backups; a failure before any backup still gets a no-op one
    fn write_rollback_script(&self, ctx: &RunContext, failed: bool) -> Result<Option<PathBuf>, BackupError> {
        match ctx.store.as_deref() {
            Some(store) => store.write_rollback_script().map(Some),
            None if failed && self.config.project_root.is_dir() => {
                let run_id = ctx.state.run_id.to_string();
                write_empty_rollback_script(&self.config.backup_dir().join(&run_id), &run_id).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn drive(&self, ctx: &mut RunContext) -> EngineResult<()> {
        self.stage_init(ctx).await?;

        self.enter(ctx, Stage::Analysis)?;
        self.stage_analysis(ctx).await?;

        self.enter(ctx, Stage::Migration)?;
        self.stage_migration(ctx).await?;

        self.enter(ctx, Stage::Validation)?;
        self.stage_validation(ctx).await?;

        self.enter(ctx, Stage::Testing)?;
        self.stage_testing(ctx).await
    }

    fn transition(&self, ctx: &mut RunContext, to: Stage) -> EngineResult<()> {
        validate_transition(ctx.state.stage, to)?;
        tracing::info!(from = %ctx.state.stage, to = %to, "stage transition");
        ctx.state.stage = to;
        if to.is_terminal() {
            ctx.state.current_component = None;
        }
        self.progress.emit(ProgressKind::StageChanged, &ctx.state);
        Ok(())
    }

    fn enter(&self, ctx: &mut RunContext, to: Stage) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.transition(ctx, to)
    }

    async fn stage_init(&self, ctx: &mut RunContext) -> EngineResult<()> {
        self.config.validate()?;

        for language in [SourceLanguage::TypeScript, SourceLanguage::Tsx] {
            check_grammar(language).map_err(|e| EngineError::Prerequisite(e.to_string()))?;
        }
        if !self.config.project_root.is_dir() {
            return Err(EngineError::Prerequisite(format!(
                "project root {} is not a directory",
                self.config.project_root.display()
            )));
        }
        let module = self.config.logger_module_path();
        if !logger_module_exists(&module) {
            return Err(EngineError::Prerequisite(format!(
                "logger module {} not found",
                module.display()
            )));
        }
        if !self.config.dry_run {
            if let Some(runner) = &self.runner {
                if !runner.is_available() {
                    return Err(EngineError::Prerequisite(format!(
                        "test runner unavailable: {}",
                        self.config.test_command.join(" ")
                    )));
                }
            }
        }

        if self.config.dry_run {
            tracing::info!("dry run: no backups or writes");
            return Ok(());
        }

        let store = BackupStore::create(
            self.config.backup_dir(),
            &ctx.state.run_id.to_string(),
            &self.config.project_root,
        )?;
        for file in &self.config.critical_files {
            let path = self.config.resolve(file);
            if store.snapshot_config(&path)?.is_none() {
                tracing::debug!(file = %path.display(), "critical file absent; not snapshotted");
            }
        }
        ctx.store = Some(Arc::new(store));

        if let Some(sampler) = &self.perf {
            ctx.perf_baseline = Some(sampler.measure(&self.config.project_root).await?);
        }
        Ok(())
    }

    async fn stage_analysis(&self, ctx: &mut RunContext) -> EngineResult<()> {
        let discovery = Discovery::from_config(&self.config);
        let per_call = self.config.per_call_estimate_ms;
        let mut cache = std::mem::take(&mut ctx.cache);
        let (report, cache) = tokio::task::spawn_blocking(move || {
            let report = analyze_tree(&discovery, &mut cache, per_call);
            (report, cache)
        })
        .await
        .map_err(|e| DriverError::Worker(e.to_string()))?;
        ctx.cache = cache;
        let report = report?;

        ctx.state.total_files = report.total_files;
        ctx.state.total_calls = report.total_calls;
        ctx.state.estimated_completion = i64::try_from(report.estimated_duration_ms)
            .ok()
            .map(chrono::Duration::milliseconds)
            .and_then(|d| Utc::now().checked_add_signed(d));
        ctx.state.warnings.extend(
            report
                .defaulted_files
                .iter()
                .map(|f| format!("{f}: no classification rule matched; defaulted to Core")),
        );

        tracing::info!(
            files = report.total_files,
            calls = report.total_calls,
            defaulted = report.defaulted_files.len(),
            estimated_ms = report.estimated_duration_ms,
            "analysis complete"
        );
        self.progress.emit(ProgressKind::StageChanged, &ctx.state);
        Ok(())
    }

    async fn stage_migration(&self, ctx: &mut RunContext) -> EngineResult<()> {
        let order = plan_order(&self.config.components)?;
        let driver = MigrationDriver::new(&self.config, ctx.store.clone(), self.cancel.clone());
        let mut succeeded = BTreeSet::new();

        for tag in order {
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let Some(component) = self.config.component(tag) else {
                continue;
            };
            ctx.state.current_component = Some(tag);
            tracing::info!(component = %tag, "migrating component");

            let state = &mut ctx.state;
            let summary = &mut ctx.summary;
            let progress = &self.progress;
            let on_file = |outcome: &FileOutcome| {
                state.processed_files += 1;
                match &outcome.record {
                    Some(record) => {
                        state.processed_calls += record.total_replacements;
                        summary.push(record.clone());
                    }
                    None => summary.skip(),
                }
                progress.emit(ProgressKind::FileProcessed, state);
            };

            let outcome = match driver
                .migrate_component(component, &succeeded, &mut ctx.cache, on_file)
                .await
            {
                Ok(outcome) => outcome,
                Err(DriverError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    ctx.failed_components.push(tag);
                    return Err(e.into());
                }
            };

            let result = outcome.result;
            ctx.state.warnings.extend(result.warnings.iter().cloned());
            ctx.components.push(result.clone());
            self.progress.emit(ProgressKind::ComponentFinished, &ctx.state);

            if !result.success {
                ctx.state.errors.extend(result.errors.iter().cloned());
                ctx.failed_components.push(tag);
                return Err(DriverError::ComponentFailed {
                    component: tag,
                    errors: result.errors,
                }
                .into());
            }
            succeeded.insert(tag);
        }
        ctx.state.current_component = None;
        Ok(())
    }

    async fn stage_validation(&self, ctx: &mut RunContext) -> EngineResult<()> {
        let validator = Validator::new(&self.config);
        let touched: Vec<_> = ctx.summary.touched().cloned().collect();
        let mut report = tokio::task::spawn_blocking(move || validator.check_tree(&touched))
            .await
            .map_err(|e| DriverError::Worker(e.to_string()))??;

        if let (Some(sampler), Some(before)) = (&self.perf, ctx.perf_baseline) {
            let after = sampler.measure(&self.config.project_root).await?;
            Validator::record_perf(sampler, before, after, &mut report);
        }

        ctx.state.warnings.extend(report.warnings.iter().cloned());
        let passed = report.passed;
        let errors = report.errors.clone();
        ctx.validation = Some(report);
        if passed {
            Ok(())
        } else {
            ctx.state.errors.extend(errors.iter().cloned());
            Err(ValidationError::Failed(errors).into())
        }
    }

    async fn stage_testing(&self, ctx: &mut RunContext) -> EngineResult<()> {
        let Some(runner) = self.runner.as_deref() else {
            ctx.state.warnings.push("no test command configured; TESTING skipped".into());
            return Ok(());
        };

        let validator = Validator::new(&self.config);
        let mut report = ValidationReport {
            passed: true,
            ..ValidationReport::default()
        };
        validator.run_tests(runner, &mut report).await;

        ctx.state.warnings.extend(report.warnings.iter().cloned());
        let passed = report.passed;
        let errors = report.errors.clone();
        match ctx.validation.as_mut() {
            Some(existing) => existing.merge(report),
            None => ctx.validation = Some(report),
        }
        if passed {
            Ok(())
        } else {
            ctx.state.errors.extend(errors.iter().cloned());
            Err(ValidationError::Failed(errors).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> (TempDir, EngineConfig) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for (rel, content) in [
            ("src/utils/component-logger.ts", "export const ComponentLogger = {};\n"),
            ("src/core/bus.ts", "console.log('bus');\n"),
            ("src/storage/kv.ts", "console.warn('kv');\n"),
            ("src/index.ts", "export {};\n"),
        ] {
            let p = root.join(rel);
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(p, content).unwrap();
        }
        let mut config = EngineConfig::for_project(root);
        config.test_command = Vec::new();
        config.max_workers = 2;
        (dir, config)
    }

    #[tokio::test]
    async fn analysis_counts_and_flags_defaults() {
        let (_dir, config) = project();
        let report = Orchestrator::new(config).analyze().await.unwrap();
        assert_eq!(report.total_files, 3);
        assert_eq!(report.total_calls, 2);
        assert_eq!(report.calls_by_component[&ComponentTag::Storage], 1);
        assert_eq!(report.defaulted_files, vec!["src/index.ts".to_string()]);
        assert_eq!(report.estimated_duration_ms, 10);
    }

    #[tokio::test]
    async fn missing_logger_module_fails_at_init() {
        let (dir, config) = project();
        std::fs::remove_file(dir.path().join("src/utils/component-logger.ts")).unwrap();
        let outcome = Orchestrator::new(config).run().await.unwrap();

        assert_eq!(outcome.report.status, Stage::Failed);
        assert_eq!(outcome.report.failed_stage, Some(Stage::Init));
        assert!(outcome.report.backup_dir.is_none());
        let script = std::fs::read_to_string(outcome.report.rollback_script.unwrap()).unwrap();
        assert!(script.contains("restored 0 file(s)"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/core/bus.ts")).unwrap(),
            "console.log('bus');\n"
        );
    }

    #[tokio::test]
    async fn successful_dry_run_leaves_no_script() {
        let (_dir, mut config) = project();
        config.dry_run = true;
        let outcome = Orchestrator::new(config).run().await.unwrap();
        assert!(outcome.report.succeeded(), "{:?}", outcome.report.errors);
        assert!(outcome.report.rollback_script.is_none());
    }

    #[tokio::test]
    async fn stage_events_are_broadcast_in_order() {
        let (_dir, config) = project();
        let orchestrator = Orchestrator::new(config);
        let mut rx = orchestrator.subscribe();
        let outcome = orchestrator.run().await.unwrap();
        assert!(outcome.report.succeeded(), "{:?}", outcome.report.errors);

        let mut stages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if event.kind == ProgressKind::StageChanged && stages.last() != Some(&event.state.stage) {
                stages.push(event.state.stage);
            }
        }
        assert_eq!(
            stages,
            vec![
                Stage::Init,
                Stage::Analysis,
                Stage::Migration,
                Stage::Validation,
                Stage::Testing,
                Stage::Complete
            ]
        );
    }

    #[tokio::test]
    async fn cancelled_run_fails_with_rollback_script() {
        let (_dir, config) = project();
        let orchestrator = Orchestrator::new(config);
        orchestrator.cancel_token().cancel();
        let outcome = orchestrator.run().await.unwrap();

        assert_eq!(outcome.report.status, Stage::Failed);
        assert!(outcome.report.errors.iter().any(|e| e.contains("cancelled")));
        assert!(outcome.report.rollback_script.unwrap().is_file());
    }
}
