//! Run, target and discovery reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::schema::ReconciliationOp;
use crate::error::{ReplicateError, Result};

/// Result of a replication run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Whether DDL was only planned.
    pub dry_run: bool,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Source databases replicated.
    pub databases: usize,

    /// Source tables replicated.
    pub tables: usize,

    /// One entry per target, in configuration order.
    pub targets: Vec<TargetReport>,
}

impl ReplicationReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Every target completed without a failed operation.
    pub fn is_success(&self) -> bool {
        self.targets
            .iter()
            .all(|t| t.status == TargetStatus::Completed && t.operations_failed == 0)
    }

    /// Whether any target stopped because of cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.targets.iter().any(|t| t.status == TargetStatus::Cancelled)
    }

    /// One-line summary, e.g. "2 targets: 1 completed, 1 skipped; 7 applied, 0 failed".
    pub fn summary(&self) -> String {
        let count = |status: TargetStatus| self.targets.iter().filter(|t| t.status == status).count();
        let applied: usize = self.targets.iter().map(|t| t.operations_applied).sum();
        let failed: usize = self.targets.iter().map(|t| t.operations_failed).sum();

        let mut summary = format!(
            "{} targets: {} completed, {} skipped",
            self.targets.len(),
            count(TargetStatus::Completed),
            count(TargetStatus::Skipped)
        );
        let cancelled = count(TargetStatus::Cancelled);
        if cancelled > 0 {
            summary.push_str(&format!(", {} cancelled", cancelled));
        }
        if self.dry_run {
            let planned: usize = self.targets.iter().map(|t| t.planned.len()).sum();
            summary.push_str(&format!("; {} planned", planned));
        } else {
            summary.push_str(&format!("; {} applied, {} failed", applied, failed));
        }
        summary
    }
}

/// Final state of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    /// Every selected database was processed. Individual operations may
    /// still have failed.
    Completed,
    /// A database could not be ensured; remaining work was not attempted.
    Skipped,
    /// Stopped between tables by a cancellation request.
    Cancelled,
}

/// Outcome of reconciling one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    /// Target label.
    pub target: String,

    pub status: TargetStatus,

    /// Why the target was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Databases fully processed.
    pub databases: usize,

    /// Tables diffed.
    pub tables_checked: usize,

    /// DDL operations the target accepted.
    pub operations_applied: usize,

    /// DDL operations or reads that failed.
    pub operations_failed: usize,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailedOperation>,

    /// Operations computed in dry-run mode.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<PlannedOperation>,
}

impl TargetReport {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            status: TargetStatus::Completed,
            error: None,
            databases: 0,
            tables_checked: 0,
            operations_applied: 0,
            operations_failed: 0,
            failures: Vec::new(),
            planned: Vec::new(),
        }
    }

    pub(crate) fn record_failure(
        &mut self,
        database: &str,
        table: &str,
        operation: &str,
        error: &ReplicateError,
    ) {
        self.operations_failed += 1;
        self.failures.push(FailedOperation {
            database: database.to_string(),
            table: table.to_string(),
            operation: operation.to_string(),
            cause: error.to_string(),
        });
    }
}

/// A logged-and-skipped failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedOperation {
    pub database: String,
    pub table: String,
    pub operation: String,
    pub cause: String,
}

/// An operation computed but not issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedOperation {
    pub database: String,
    #[serde(flatten)]
    pub operation: ReconciliationOp,
}

/// One source database with its tables in dependency order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDatabase {
    pub name: String,
    pub tables: Vec<String>,
}

/// Connectivity of one endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub label: String,
    /// "source" or "target".
    pub role: String,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
