//! Core data model
//!
//! Records and results are serialized with camelCase field names; those
//! names are the report schema.

use chrono::{DateTime, Utc};
use logshift_transform::{ComponentTag, Strategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use ulid::Ulid;

/// Unique run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Configuration snapshot and prerequisite checks
    Init,
    /// File and call counting
    Analysis,
    /// Per-component rewriting
    Migration,
    /// Whole-tree checks
    Validation,
    /// External test suite
    Testing,
    /// Terminal success
    Complete,
    /// Terminal failure
    Failed,
}

impl Stage {
    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Upper-case label
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Analysis => "ANALYSIS",
            Self::Migration => "MIGRATION",
            Self::Validation => "VALIDATION",
            Self::Testing => "TESTING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-component driver state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    /// Not started
    Pending,
    /// Reading and snapshotting candidate files
    BackingUp,
    /// Rewriting and persisting
    Transforming,
    /// Running component rules
    PostConditions,
    /// Finished without errors
    Succeeded,
    /// Finished with at least one error
    Failed,
}

/// Size and timing of one file rewrite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetrics {
    /// Bytes before
    pub original_size: usize,
    /// Bytes after
    pub new_size: usize,
    /// Wall time spent on the file
    pub processing_time_ms: u64,
}

/// Outcome for one file in one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    /// File path
    pub file: PathBuf,
    /// Component the file was migrated under
    pub component: ComponentTag,
    /// Number of rewritten call sites
    pub total_replacements: usize,
    /// Distinct call patterns rewritten
    pub patterns_used: Vec<String>,
    /// Whether the file was processed without error
    pub success: bool,
    /// Snapshot location, absent in dry runs and for failed files
    pub backup_path: Option<PathBuf>,
    /// File-level errors
    pub errors: Vec<String>,
    /// Size and timing
    pub metrics: FileMetrics,
    /// Strategy that produced the content
    #[serde(skip)]
    pub strategy: Option<Strategy>,
    /// Backup store ordering stamp of the write
    #[serde(skip)]
    pub write_sequence: Option<u64>,
}

impl MigrationRecord {
    /// Empty record for `file`
    #[must_use]
    pub fn new(file: impl Into<PathBuf>, component: ComponentTag) -> Self {
        Self {
            file: file.into(),
            component,
            total_replacements: 0,
            patterns_used: Vec::new(),
            success: false,
            backup_path: None,
            errors: Vec::new(),
            metrics: FileMetrics::default(),
            strategy: None,
            write_sequence: None,
        }
    }

    /// Whether the file content was changed
    #[inline]
    #[must_use]
    pub fn touched(&self) -> bool {
        self.success && self.total_replacements > 0
    }
}

/// Aggregate outcome of migrating one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentMigrationResult {
    /// Component
    pub component: ComponentTag,
    /// No error recorded and no error-severity rule failed
    pub success: bool,
    /// Files rewritten
    pub files_migrated: usize,
    /// Call sites rewritten
    pub calls_migrated: usize,
    /// Post-condition rules produced no error
    pub validation_passed: bool,
    /// Total processing time of the component's files
    pub performance_impact_ms: u64,
    /// Errors
    pub errors: Vec<String>,
    /// Warnings
    pub warnings: Vec<String>,
}

impl ComponentMigrationResult {
    /// Fresh result for `component`
    #[must_use]
    pub fn new(component: ComponentTag) -> Self {
        Self {
            component,
            success: false,
            files_migrated: 0,
            calls_migrated: 0,
            validation_passed: false,
            performance_impact_ms: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Run-wide totals over every record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    /// Files considered
    pub total_files: usize,
    /// Files rewritten
    pub migrated_files: usize,
    /// Files with no output calls
    pub skipped_files: usize,
    /// Call sites rewritten
    pub total_replacements: usize,
    /// Per-file records
    pub records: Vec<MigrationRecord>,
}

impl MigrationSummary {
    /// Fold one record into the totals
    pub fn push(&mut self, record: MigrationRecord) {
        self.total_files += 1;
        if record.touched() {
            self.migrated_files += 1;
        }
        self.total_replacements += record.total_replacements;
        self.records.push(record);
    }

    /// Count a file that was skipped before any work
    pub fn skip(&mut self) {
        self.total_files += 1;
        self.skipped_files += 1;
    }

    /// Files whose content changed
    pub fn touched(&self) -> impl Iterator<Item = &MigrationRecord> {
        self.records.iter().filter(|r| r.touched())
    }
}

/// The orchestrator's single mutable state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    /// Run identifier
    pub run_id: RunId,
    /// Current stage
    pub stage: Stage,
    /// Files discovered during analysis
    pub total_files: usize,
    /// Files handled so far
    pub processed_files: usize,
    /// Calls counted during analysis
    pub total_calls: usize,
    /// Calls rewritten so far
    pub processed_calls: usize,
    /// Component being migrated
    pub current_component: Option<ComponentTag>,
    /// Accumulated errors
    pub errors: Vec<String>,
    /// Accumulated warnings
    pub warnings: Vec<String>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Linear estimate of completion
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl PipelineState {
    /// Initial state for a run
    #[must_use]
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            stage: Stage::Init,
            total_files: 0,
            processed_files: 0,
            total_calls: 0,
            processed_calls: 0,
            current_component: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
            estimated_completion: None,
        }
    }

    /// Percentage of calls processed, 100 when nothing is left to do
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        if self.total_calls == 0 {
            return 100.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let pct = self.processed_calls as f64 / self.total_calls as f64 * 100.0;
        pct.min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn record_serializes_with_report_field_names() {
        let mut record = MigrationRecord::new("/p/src/storage/kv.ts", ComponentTag::Storage);
        record.total_replacements = 3;
        record.success = true;
        record.strategy = Some(Strategy::Structural);

        let json = serde_json::to_value(&record).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "backupPath",
                "component",
                "errors",
                "file",
                "metrics",
                "patternsUsed",
                "success",
                "totalReplacements"
            ]
        );
        assert_eq!(json["component"], "Storage");
        assert_eq!(json["metrics"]["processingTimeMs"], 0);
    }

    #[test]
    fn summary_counts_touched_and_skipped() {
        let mut summary = MigrationSummary::default();
        let mut touched = MigrationRecord::new("a.ts", ComponentTag::Core);
        touched.success = true;
        touched.total_replacements = 2;
        summary.push(touched);
        summary.push(MigrationRecord::new("b.ts", ComponentTag::Core));
        summary.skip();

        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.migrated_files, 1);
        assert_eq!(summary.skipped_files, 1);
        assert_eq!(summary.total_replacements, 2);
        assert_eq!(summary.touched().count(), 1);
    }

    #[test]
    fn stage_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Stage::Validation).unwrap(), "\"VALIDATION\"");
        assert_eq!(
            serde_json::to_string(&ComponentState::PostConditions).unwrap(),
            "\"POST_CONDITIONS\""
        );
        assert!(Stage::Failed.is_terminal());
        assert!(!Stage::Testing.is_terminal());
    }

    #[test]
    fn progress_percent_is_bounded() {
        let mut state = PipelineState::new(RunId::new());
        assert!((state.progress_percent() - 100.0).abs() < f64::EPSILON);
        state.total_calls = 4;
        state.processed_calls = 1;
        assert!((state.progress_percent() - 25.0).abs() < f64::EPSILON);
    }
}
