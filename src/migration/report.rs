// ABOUTME: Per-table migration outcomes and the run summary
// ABOUTME: Decides commit or rollback and renders the JSON report

use crate::config::CommitPolicy;
use crate::migration::verify::Verification;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Why a single table could not be copied
///
/// These never abort the run; they are recorded in the table's outcome and
/// feed the commit decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableFailure {
    #[error("no columns in common (target: {target_preview}; source: {source_preview})")]
    NoCommonColumns {
        target_preview: String,
        source_preview: String,
    },

    #[error("allow-listed column(s) missing: {}", .missing.join(", "))]
    MissingAllowedColumns { missing: Vec<String> },

    #[error("source column(s) absent from target would be dropped: {}", .columns.join(", "))]
    DroppedColumns { columns: Vec<String> },

    #[error("copy failed: {message}")]
    Database { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableOutcome {
    SkippedMissingSource,
    SkippedMissingTarget,
    SkippedEmptySchema,
    Migrated {
        rows: u64,
        dropped_columns: Vec<String>,
    },
    Failed {
        reason: TableFailure,
    },
}

impl TableOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TableOutcome::Failed { .. })
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            TableOutcome::SkippedMissingSource
                | TableOutcome::SkippedMissingTarget
                | TableOutcome::SkippedEmptySchema
        )
    }

    pub fn rows(&self) -> u64 {
        match self {
            TableOutcome::Migrated { rows, .. } => *rows,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableReport {
    pub table: String,
    #[serde(flatten)]
    pub outcome: TableOutcome,
}

/// Final state of the run's transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CommitDecision {
    Commit,
    CommitWithWarnings { failed_tables: Vec<String> },
    Rollback { reason: RollbackReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackReason {
    VerificationFailed,
    TableFailures,
    DryRun,
    Declined,
    /// The single table asked for was missing or had no columns
    NothingMigrated,
}

impl CommitDecision {
    pub fn commits(&self) -> bool {
        !matches!(self, CommitDecision::Rollback { .. })
    }

    /// Whether this decision should make the process exit non-zero
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CommitDecision::Rollback {
                reason: RollbackReason::VerificationFailed
                    | RollbackReason::TableFailures
                    | RollbackReason::Declined
                    | RollbackReason::NothingMigrated
            }
        )
    }
}

/// Decide what happens to the transaction
///
/// Verification failure always rolls back. Table failures roll back under the
/// strict policy and commit with warnings under best-effort. A dry run rolls
/// back whatever the outcome would have been, unless that outcome is itself
/// an error.
pub fn decide(
    policy: CommitPolicy,
    failed_tables: &[String],
    verified: bool,
    dry_run: bool,
) -> CommitDecision {
    let decision = if !verified {
        CommitDecision::Rollback {
            reason: RollbackReason::VerificationFailed,
        }
    } else if failed_tables.is_empty() {
        CommitDecision::Commit
    } else {
        match policy {
            CommitPolicy::BestEffort => CommitDecision::CommitWithWarnings {
                failed_tables: failed_tables.to_vec(),
            },
            CommitPolicy::Strict => CommitDecision::Rollback {
                reason: RollbackReason::TableFailures,
            },
        }
    };

    if dry_run && decision.commits() {
        CommitDecision::Rollback {
            reason: RollbackReason::DryRun,
        }
    } else {
        decision
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub source_schema: String,
    pub target_schema: String,
    pub tables: Vec<TableReport>,
    pub verification: Option<Verification>,
    pub decision: Option<CommitDecision>,
}

impl MigrationReport {
    pub fn new(source_schema: &str, target_schema: &str) -> Self {
        Self {
            source_schema: source_schema.to_string(),
            target_schema: target_schema.to_string(),
            tables: Vec::new(),
            verification: None,
            decision: None,
        }
    }

    pub fn record(&mut self, table: &str, outcome: TableOutcome) {
        self.tables.push(TableReport {
            table: table.to_string(),
            outcome,
        });
    }

    pub fn failed_tables(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|t| t.outcome.is_failure())
            .map(|t| t.table.clone())
            .collect()
    }

    pub fn migrated_count(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| matches!(t.outcome, TableOutcome::Migrated { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.tables.iter().filter(|t| t.outcome.is_skip()).count()
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.outcome.rows()).sum()
    }

    pub fn log_summary(&self) {
        tracing::info!("");
        tracing::info!("========================================");
        tracing::info!(
            "Migration Summary: {} -> {}",
            self.source_schema,
            self.target_schema
        );
        tracing::info!("========================================");
        tracing::info!("Tables processed: {}", self.tables.len());
        tracing::info!("✓ Migrated: {} ({} rows)", self.migrated_count(), self.total_rows());
        tracing::info!("⏭ Skipped: {}", self.skipped_count());
        let failed = self.failed_tables();
        if failed.is_empty() {
            tracing::info!("✗ Failed: 0");
        } else {
            tracing::warn!("✗ Failed: {} ({})", failed.len(), failed.join(", "));
        }
        tracing::info!("========================================");
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize migration report")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write migration report to {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
        Ok(())
    }
}
