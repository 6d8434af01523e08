//! Run reports
//!
//! One JSON report per run, written on success and on failure.

use crate::error::EngineError;
use crate::types::{ComponentMigrationResult, MigrationSummary, RunId, Stage};
use crate::validator::ValidationReport;
use chrono::{DateTime, Utc};
use logshift_transform::ComponentTag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// How much to roll back after a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "components")]
pub enum RollbackScope {
    /// Only the listed components
    Component(Vec<ComponentTag>),
    /// Every backup of the run
    Full,
    /// Nothing was written
    None,
}

/// Advice attached to a failure report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRecommendation {
    /// Scope
    pub scope: RollbackScope,
    /// Why
    pub reason: String,
    /// Command that performs it, if any
    pub command: Option<String>,
}

impl RollbackRecommendation {
    /// Recommendation for a run that failed at `stage`
    ///
    /// `failed_components` is only consulted for MIGRATION failures.
    #[must_use]
    pub fn for_failure(
        stage: Stage,
        failed_components: &[ComponentTag],
        run_dir: Option<&Path>,
        rollback_script: Option<&Path>,
    ) -> Self {
        let run_flag = run_dir.map(|d| format!("logshift rollback --run-dir '{}'", d.display()));
        match stage {
            Stage::Init | Stage::Analysis => Self {
                scope: RollbackScope::None,
                reason: format!("failed during {stage}; no files were modified"),
                command: None,
            },
            Stage::Migration if !failed_components.is_empty() => Self {
                scope: RollbackScope::Component(failed_components.to_vec()),
                reason: format!(
                    "migration of {} failed; earlier components are intact",
                    failed_components
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                command: run_flag.map(|cmd| {
                    failed_components
                        .iter()
                        .map(|c| format!("{cmd} --component {c}"))
                        .collect::<Vec<_>>()
                        .join(" && ")
                }),
            },
            _ => Self {
                scope: RollbackScope::Full,
                reason: format!("failed during {stage}; the migrated tree is not trusted"),
                command: rollback_script
                    .map(|s| format!("sh '{}'", s.display()))
                    .or(run_flag),
            },
        }
    }
}

/// Final report of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Run identifier
    pub run_id: RunId,
    /// Terminal stage
    pub status: Stage,
    /// Stage in which the run failed
    pub failed_stage: Option<Stage>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
    /// Wall time
    pub duration_ms: u64,
    /// Dry run flag
    pub dry_run: bool,
    /// Per-file totals and records
    pub summary: MigrationSummary,
    /// Per-component results, in migration order
    pub components: Vec<ComponentMigrationResult>,
    /// Validation outcome, when validation ran
    pub validation: Option<ValidationReport>,
    /// Accumulated errors
    pub errors: Vec<String>,
    /// Accumulated warnings
    pub warnings: Vec<String>,
    /// Run backup directory
    pub backup_dir: Option<PathBuf>,
    /// Rollback script location
    pub rollback_script: Option<PathBuf>,
    /// Present when the run failed
    pub rollback_recommendation: Option<RollbackRecommendation>,
}

impl MigrationReport {
    /// Whether the run completed
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == Stage::Complete
    }

    /// Report file name for a run
    #[must_use]
    pub fn file_name(run_id: RunId) -> String {
        format!("migration-report-{run_id}.json")
    }

    /// Write to `<dir>/migration-report-<run_id>.json`
    ///
    /// # Errors
    /// `EngineError::Report` on serialization or IO failure.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, EngineError> {
        let path = dir.join(Self::file_name(self.run_id));
        let report_err = |message: String| EngineError::Report {
            path: path.clone(),
            message,
        };
        std::fs::create_dir_all(dir).map_err(|e| report_err(e.to_string()))?;
        let json = serde_json::to_vec_pretty(self).map_err(|e| report_err(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| report_err(e.to_string()))?;
        Ok(path)
    }

    /// Read a previously written report
    ///
    /// # Errors
    /// `EngineError::Report` on IO or decode failure.
    pub fn read_from(path: &Path) -> Result<Self, EngineError> {
        let report_err = |message: String| EngineError::Report {
            path: path.to_path_buf(),
            message,
        };
        let raw = std::fs::read(path).map_err(|e| report_err(e.to_string()))?;
        serde_json::from_slice(&raw).map_err(|e| report_err(e.to_string()))
    }
}

/// Output of the ANALYSIS stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    /// Source files found
    pub total_files: usize,
    /// Direct output calls found
    pub total_calls: usize,
    /// Files per component
    pub files_by_component: BTreeMap<ComponentTag, usize>,
    /// Calls per component
    pub calls_by_component: BTreeMap<ComponentTag, usize>,
    /// Files no rule matched (defaulted to Core)
    pub defaulted_files: Vec<String>,
    /// Linear estimate
    pub estimated_duration_ms: u64,
}
