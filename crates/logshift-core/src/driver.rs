//! Component migration driver
//!
//! Migrates the files of one component:
//!
//! ```text
//! PENDING -> BACKING_UP -> TRANSFORMING -> POST_CONDITIONS -> SUCCEEDED | FAILED
//! ```
//!
//! File work runs on the blocking pool, at most `max_workers` files at a
//! time. Each file is owned by exactly one worker per phase, and workers hand
//! results back through the `on_file` callback instead of touching shared
//! state. A failing file is recorded and its siblings carry on.

use crate::config::{ComponentMigrationConfig, EngineConfig};
use crate::discovery::{Discovery, SourceEntry};
use crate::error::DriverError;
use crate::progress::CancelToken;
use crate::rules::{check_rules, RuleContext, ScannedFile, Severity};
use crate::types::{ComponentMigrationResult, ComponentState, FileMetrics, MigrationRecord};
use futures::stream::{self, StreamExt};
use logshift_backup::{BackupReceipt, BackupStore};
use logshift_transform::scan::mentions_output_calls;
use logshift_transform::{ClassificationCache, ComponentTag, Transformer};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of handling one file, handed to the orchestrator
#[derive(Debug, Clone)]
pub struct FileOutcome {
    /// File path
    pub path: PathBuf,
    /// Record, `None` when the file had no output calls and was skipped
    pub record: Option<MigrationRecord>,
    /// Non-fatal notes (textual fallback and the like)
    pub warnings: Vec<String>,
}

impl FileOutcome {
    fn skipped(path: PathBuf) -> Self {
        Self {
            path,
            record: None,
            warnings: Vec::new(),
        }
    }

    fn failed(path: PathBuf, component: ComponentTag, err: &DriverError) -> Self {
        let mut record = MigrationRecord::new(path.clone(), component);
        record_error(&mut record, err);
        Self {
            path,
            record: Some(record),
            warnings: Vec::new(),
        }
    }
}

/// Aggregate of one component run
#[derive(Debug, Clone)]
pub struct ComponentOutcome {
    /// Reportable result
    pub result: ComponentMigrationResult,
    /// Final driver state
    pub state: ComponentState,
    /// Files in scope for the component
    pub files_in_scope: usize,
    /// Files skipped for having no output calls
    pub skipped: usize,
}

struct ReadyFile {
    path: PathBuf,
    content: String,
    receipt: Option<BackupReceipt>,
    elapsed: Duration,
}

enum Prepared {
    Skipped { path: PathBuf, content: String },
    Ready(ReadyFile),
    Failed(FileOutcome),
    Cancelled,
}

enum Processed {
    Done { outcome: FileOutcome, content: String },
    Cancelled,
}

/// Log a file-level failure and attach it to the record
fn record_error(record: &mut MigrationRecord, err: &DriverError) {
    tracing::warn!(
        file = %record.file.display(),
        category = ?err.category(),
        error = %err,
        "file failed"
    );
    record.errors.push(err.to_string());
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn advance(component: ComponentTag, state: &mut ComponentState, next: ComponentState) {
    tracing::debug!(component = %component, from = ?*state, to = ?next, "component state");
    *state = next;
}

/// Applies the transformer across a component's files
#[derive(Debug)]
pub struct MigrationDriver {
    transformer: Arc<Transformer>,
    store: Option<Arc<BackupStore>>,
    discovery: Discovery,
    max_workers: usize,
    symbol: String,
    cancel: CancelToken,
}

impl MigrationDriver {
    /// Create driver; `store` is `None` for dry runs
    #[must_use]
    pub fn new(config: &EngineConfig, store: Option<Arc<BackupStore>>, cancel: CancelToken) -> Self {
        Self {
            transformer: Arc::new(Transformer::new(
                config.logger_symbol.clone(),
                config.logger_module_path(),
            )),
            store,
            discovery: Discovery::from_config(config),
            max_workers: config.max_workers.max(1),
            symbol: config.logger_symbol.clone(),
            cancel,
        }
    }

    /// Whether writes are suppressed
    #[inline]
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.store.is_none()
    }

    /// Files in scope for `config`: matching its globs and classified to it
    ///
    /// # Errors
    /// `DriverError::Discovery` if enumeration fails.
    pub fn files_for(
        &self,
        config: &ComponentMigrationConfig,
        cache: &mut ClassificationCache,
    ) -> Result<Vec<SourceEntry>, DriverError> {
        let globs = config.glob_set().map_err(|e| DriverError::Discovery {
            root: self.discovery.root().to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(self
            .discovery
            .matching(&globs)?
            .into_iter()
            .filter(|e| cache.classify(Path::new(&e.relative)).tag == config.component)
            .collect())
    }

    /// Migrate one component
    ///
    /// # Errors
    /// - `DriverError::DependencyNotSatisfied` if a dependency has not succeeded
    /// - `DriverError::Discovery` if files cannot be enumerated
    /// - `DriverError::Cancelled` if the run was aborted
    ///
    /// File-level failures are not errors here; they mark the result failed.
    #[tracing::instrument(skip_all, fields(component = %config.component))]
    pub async fn migrate_component<F>(
        &self,
        config: &ComponentMigrationConfig,
        succeeded: &BTreeSet<ComponentTag>,
        cache: &mut ClassificationCache,
        mut on_file: F,
    ) -> Result<ComponentOutcome, DriverError>
    where
        F: FnMut(&FileOutcome) + Send,
    {
        let component = config.component;
        let mut state = ComponentState::Pending;

        if let Some(dep) = config.dependencies.iter().find(|d| !succeeded.contains(*d)) {
            return Err(DriverError::DependencyNotSatisfied {
                component,
                dependency: *dep,
            });
        }

        let files = self.files_for(config, cache)?;
        let files_in_scope = files.len();
        let mut result = ComponentMigrationResult::new(component);
        let mut scanned: Vec<ScannedFile> = Vec::with_capacity(files.len());
        let mut skipped = 0;

        advance(component, &mut state, ComponentState::BackingUp);
        let ready = self
            .backing_up(component, files, &mut result, &mut scanned, &mut skipped, &mut on_file)
            .await?;

        advance(component, &mut state, ComponentState::Transforming);
        self.transforming(component, ready, &mut result, &mut scanned, &mut on_file)
            .await?;

        advance(component, &mut state, ComponentState::PostConditions);
        let ctx = RuleContext::new(component, &self.symbol, &scanned);
        let mut rule_error = false;
        for finding in check_rules(&config.rules, &ctx) {
            match finding.severity {
                Severity::Error => {
                    rule_error = true;
                    tracing::error!(component = %component, finding = %finding, "post-condition failed");
                    result.errors.push(finding.to_string());
                }
                Severity::Warning => {
                    tracing::warn!(component = %component, finding = %finding, "post-condition warning");
                    result.warnings.push(finding.to_string());
                }
            }
        }
        result.validation_passed = !rule_error;
        result.success = result.errors.is_empty();

        let end = if result.success {
            ComponentState::Succeeded
        } else {
            ComponentState::Failed
        };
        advance(component, &mut state, end);

        tracing::info!(
            component = %component,
            files = result.files_migrated,
            calls = result.calls_migrated,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "component migrated"
        );

        Ok(ComponentOutcome {
            result,
            state,
            files_in_scope,
            skipped,
        })
    }

    async fn backing_up<F>(
        &self,
        component: ComponentTag,
        files: Vec<SourceEntry>,
        result: &mut ComponentMigrationResult,
        scanned: &mut Vec<ScannedFile>,
        skipped: &mut usize,
        on_file: &mut F,
    ) -> Result<Vec<ReadyFile>, DriverError>
    where
        F: FnMut(&FileOutcome) + Send,
    {
        let mut prepared = stream::iter(files)
            .map(|entry| {
                let store = self.store.clone();
                let cancel = self.cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return Prepared::Cancelled;
                    }
                    let path = entry.path;
                    let worker_path = path.clone();
                    tokio::task::spawn_blocking(move || prepare(worker_path, component, store.as_deref()))
                        .await
                        .unwrap_or_else(|e| {
                            let err = DriverError::Worker(e.to_string());
                            Prepared::Failed(FileOutcome::failed(path, component, &err))
                        })
                }
            })
            .buffer_unordered(self.max_workers);

        let mut ready = Vec::new();
        while let Some(item) = prepared.next().await {
            match item {
                Prepared::Cancelled => {}
                Prepared::Skipped { path, content } => {
                    *skipped += 1;
                    tracing::debug!(file = %path.display(), "no output calls; skipped");
                    on_file(&FileOutcome::skipped(path.clone()));
                    scanned.push(ScannedFile { path, content });
                }
                Prepared::Failed(outcome) => {
                    result.errors.extend(
                        outcome
                            .record
                            .iter()
                            .flat_map(|r| r.errors.iter())
                            .map(|e| format!("{}: {e}", outcome.path.display())),
                    );
                    on_file(&outcome);
                }
                Prepared::Ready(file) => ready.push(file),
            }
        }

        if self.cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        Ok(ready)
    }

    async fn transforming<F>(
        &self,
        component: ComponentTag,
        ready: Vec<ReadyFile>,
        result: &mut ComponentMigrationResult,
        scanned: &mut Vec<ScannedFile>,
        on_file: &mut F,
    ) -> Result<(), DriverError>
    where
        F: FnMut(&FileOutcome) + Send,
    {
        let mut processed = stream::iter(ready)
            .map(|file| {
                let store = self.store.clone();
                let transformer = Arc::clone(&self.transformer);
                let cancel = self.cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return Processed::Cancelled;
                    }
                    let path = file.path.clone();
                    let fallback = file.content.clone();
                    tokio::task::spawn_blocking(move || {
                        rewrite(file, component, &transformer, store.as_deref())
                    })
                    .await
                    .unwrap_or_else(|e| Processed::Done {
                        outcome: FileOutcome::failed(path, component, &DriverError::Worker(e.to_string())),
                        content: fallback,
                    })
                }
            })
            .buffer_unordered(self.max_workers);

        while let Some(item) = processed.next().await {
            let Processed::Done { outcome, content } = item else {
                continue;
            };
            if let Some(record) = &outcome.record {
                if record.touched() {
                    result.files_migrated += 1;
                    result.calls_migrated += record.total_replacements;
                }
                result.performance_impact_ms += record.metrics.processing_time_ms;
                result.errors.extend(
                    record
                        .errors
                        .iter()
                        .map(|e| format!("{}: {e}", outcome.path.display())),
                );
            }
            result.warnings.extend(
                outcome
                    .warnings
                    .iter()
                    .map(|w| format!("{}: {w}", outcome.path.display())),
            );
            on_file(&outcome);
            scanned.push(ScannedFile {
                path: outcome.path,
                content,
            });
        }

        if self.cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        Ok(())
    }
}

/// Read one file and, if it may contain output calls, back it up
fn prepare(path: PathBuf, component: ComponentTag, store: Option<&BackupStore>) -> Prepared {
    let started = Instant::now();
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) => {
            let err = DriverError::File(format!("read failed: {e}"));
            return Prepared::Failed(FileOutcome::failed(path, component, &err));
        }
    };
    let content = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(_) => {
            let err = DriverError::File("not valid UTF-8".into());
            return Prepared::Failed(FileOutcome::failed(path, component, &err));
        }
    };

    if !mentions_output_calls(&content) {
        return Prepared::Skipped { path, content };
    }

    let receipt = match store.map(|s| s.backup(&path, content.as_bytes(), component)) {
        None => None,
        Some(Ok(r)) => Some(r),
        Some(Err(e)) => {
            return Prepared::Failed(FileOutcome::failed(path, component, &DriverError::Backup(e)));
        }
    };

    Prepared::Ready(ReadyFile {
        path,
        content,
        receipt,
        elapsed: started.elapsed(),
    })
}

/// Transform one backed-up file and persist it through its receipt
fn rewrite(
    file: ReadyFile,
    component: ComponentTag,
    transformer: &Transformer,
    store: Option<&BackupStore>,
) -> Processed {
    let started = Instant::now();
    let ReadyFile {
        path,
        content,
        receipt,
        elapsed,
    } = file;

    let mut record = MigrationRecord::new(path.clone(), component);
    record.backup_path = receipt.as_ref().map(|r| r.entry().backup_path.clone());
    record.metrics = FileMetrics {
        original_size: content.len(),
        new_size: content.len(),
        processing_time_ms: 0,
    };

    let output = match transformer.transform(&content, component, &path) {
        Ok(o) => o,
        Err(e) => {
            record_error(&mut record, &DriverError::Transform(e));
            record.metrics.processing_time_ms = millis(elapsed + started.elapsed());
            return Processed::Done {
                outcome: FileOutcome {
                    path,
                    record: Some(record),
                    warnings: Vec::new(),
                },
                content,
            };
        }
    };

    record.strategy = Some(output.strategy);
    record.total_replacements = output.replacements;
    record.patterns_used = output.patterns.clone();

    let mut final_content = content;
    if output.is_rewrite() {
        match (store, receipt) {
            (Some(store), Some(receipt)) => {
                match store.write_with_receipt(receipt, output.content.as_bytes()) {
                    Ok(written) => {
                        record.write_sequence = Some(written.sequence);
                        final_content = output.content;
                    }
                    Err(e) => {
                        record_error(&mut record, &DriverError::File(format!("write failed: {e}")));
                        record.total_replacements = 0;
                    }
                }
            }
            (Some(_), None) => {
                let err = DriverError::File("no backup receipt; file left untouched".into());
                record_error(&mut record, &err);
                record.total_replacements = 0;
            }
            // dry run
            (None, _) => final_content = output.content,
        }
    }

    record.success = record.errors.is_empty();
    record.metrics.new_size = final_content.len();
    record.metrics.processing_time_ms = millis(elapsed + started.elapsed());

    tracing::debug!(
        file = %path.display(),
        component = %component,
        replacements = record.total_replacements,
        strategy = ?output.strategy,
        "file processed"
    );

    Processed::Done {
        outcome: FileOutcome {
            path,
            record: Some(record),
            warnings: output.warnings,
        },
        content: final_content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_components, PostConditionRule};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Project {
        dir: TempDir,
        config: EngineConfig,
    }

    impl Project {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = EngineConfig::for_project(dir.path());
            config.max_workers = 2;
            Self { dir, config }
        }

        fn write(&self, rel: &str, content: &str) -> PathBuf {
            let p = self.dir.path().join(rel);
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(&p, content).unwrap();
            p
        }

        fn store(&self) -> Arc<BackupStore> {
            Arc::new(
                BackupStore::create(self.config.backup_dir(), "run", self.dir.path()).unwrap(),
            )
        }

        fn component(&self, tag: ComponentTag) -> ComponentMigrationConfig {
            self.config.component(tag).unwrap().clone()
        }
    }

    fn all_succeeded() -> BTreeSet<ComponentTag> {
        ComponentTag::ALL.into_iter().collect()
    }

    #[tokio::test]
    async fn migrates_backs_up_and_reports_each_file() {
        let p = Project::new();
        let kv = p.write(
            "src/storage/kv.ts",
            "console.log('a');\nconsole.warn('b');\nconsole.error('c');\n",
        );
        p.write("src/storage/types.ts", "export type K = string;\n");
        let store = p.store();
        let driver = MigrationDriver::new(&p.config, Some(Arc::clone(&store)), CancelToken::new());

        let mut outcomes = Vec::new();
        let outcome = driver
            .migrate_component(
                &p.component(ComponentTag::Storage),
                &all_succeeded(),
                &mut ClassificationCache::new(),
                |o| outcomes.push(o.clone()),
            )
            .await
            .unwrap();

        assert!(outcome.result.success, "{:?}", outcome.result.errors);
        assert_eq!(outcome.state, ComponentState::Succeeded);
        assert_eq!(outcome.result.files_migrated, 1);
        assert_eq!(outcome.result.calls_migrated, 3);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcomes.len(), 2);

        let migrated = std::fs::read_to_string(&kv).unwrap();
        assert_eq!(migrated.matches("\"Storage\"").count(), 3);
        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.entries()[0].original_path, kv);
    }

    #[tokio::test]
    async fn unsatisfied_dependency_is_refused() {
        let p = Project::new();
        let driver = MigrationDriver::new(&p.config, None, CancelToken::new());
        let err = driver
            .migrate_component(
                &p.component(ComponentTag::Storage),
                &BTreeSet::new(),
                &mut ClassificationCache::new(),
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DriverError::DependencyNotSatisfied {
                component: ComponentTag::Storage,
                dependency: ComponentTag::Memory
            }
        ));
    }

    #[tokio::test]
    async fn dry_run_leaves_files_untouched() {
        let p = Project::new();
        let src = "console.log('x');\n";
        let file = p.write("src/memory/cache.ts", src);
        let driver = MigrationDriver::new(&p.config, None, CancelToken::new());

        let mut records = Vec::new();
        let outcome = driver
            .migrate_component(
                &p.component(ComponentTag::Memory),
                &all_succeeded(),
                &mut ClassificationCache::new(),
                |o| records.extend(o.record.clone()),
            )
            .await
            .unwrap();

        assert!(driver.is_dry_run());
        assert_eq!(outcome.result.calls_migrated, 1);
        assert_eq!(std::fs::read_to_string(file).unwrap(), src);
        assert_eq!(records[0].backup_path, None);
    }

    #[tokio::test]
    async fn unreadable_file_fails_component_but_not_siblings() {
        let p = Project::new();
        let good = p.write("src/memory/good.ts", "console.info(1);\n");
        let bad = p.dir.path().join("src/memory/bad.ts");
        std::fs::write(&bad, [0xff, 0xfe, 0x00]).unwrap();
        let driver = MigrationDriver::new(&p.config, Some(p.store()), CancelToken::new());

        let outcome = driver
            .migrate_component(
                &p.component(ComponentTag::Memory),
                &all_succeeded(),
                &mut ClassificationCache::new(),
                |_| {},
            )
            .await
            .unwrap();

        assert!(!outcome.result.success);
        assert_eq!(outcome.state, ComponentState::Failed);
        assert!(outcome.result.errors[0].contains("UTF-8"));
        assert!(std::fs::read_to_string(good).unwrap().contains("ComponentLogger.info"));
    }

    #[tokio::test]
    async fn backup_failure_is_reported_per_file() {
        let p = Project::new();
        let file = p.write("src/memory/cache.ts", "console.log(1);\n");
        let store = p.store();
        // a regular file where the component directory should go
        std::fs::write(store.run_dir().join("Memory"), "").unwrap();
        let driver = MigrationDriver::new(&p.config, Some(store), CancelToken::new());

        let mut records = Vec::new();
        let outcome = driver
            .migrate_component(
                &p.component(ComponentTag::Memory),
                &all_succeeded(),
                &mut ClassificationCache::new(),
                |o| records.extend(o.record.clone()),
            )
            .await
            .unwrap();

        assert!(!outcome.result.success);
        assert!(records[0].errors[0].starts_with("backup failed:"), "{:?}", records[0].errors);
        assert!(outcome.result.errors[0].contains("cache.ts: backup failed:"));
        assert_eq!(std::fs::read_to_string(file).unwrap(), "console.log(1);\n");
    }

    #[tokio::test]
    async fn error_rule_fails_component() {
        let p = Project::new();
        p.write("src/storage/auth.ts", "console.log('login', user.password);\n");
        let driver = MigrationDriver::new(&p.config, Some(p.store()), CancelToken::new());

        let config = p.component(ComponentTag::Storage);
        assert!(config.rules.contains(&PostConditionRule::NoSecretLeak));
        let outcome = driver
            .migrate_component(&config, &all_succeeded(), &mut ClassificationCache::new(), |_| {})
            .await
            .unwrap();

        assert!(!outcome.result.success);
        assert!(!outcome.result.validation_passed);
        assert!(outcome.result.errors[0].contains("NoSecretLeak"));
    }

    #[tokio::test]
    async fn files_classified_elsewhere_are_out_of_scope() {
        let p = Project::new();
        p.write("src/storage/kv.ts", "console.log(1);\n");
        p.write("src/index.ts", "console.log(2);\n");
        let driver = MigrationDriver::new(&p.config, None, CancelToken::new());
        let core = default_components().remove(0);

        let files = driver
            .files_for(&core, &mut ClassificationCache::new())
            .unwrap();
        let names: Vec<_> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["src/index.ts"]);
    }

    #[tokio::test]
    async fn cancelled_run_stops_before_touching_files() {
        let p = Project::new();
        let file = p.write("src/core/bus.ts", "console.log(1);\n");
        let cancel = CancelToken::new();
        cancel.cancel();
        let driver = MigrationDriver::new(&p.config, Some(p.store()), cancel);

        let err = driver
            .migrate_component(
                &p.component(ComponentTag::Core),
                &BTreeSet::new(),
                &mut ClassificationCache::new(),
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Cancelled));
        assert_eq!(std::fs::read_to_string(file).unwrap(), "console.log(1);\n");
    }
}
