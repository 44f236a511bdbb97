//! Task model: backend-owned long-running operations observed by polling.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::types::{EvaluationStatusResponse, RebuildStatusResponse, WireTaskStatus};
use crate::cache::QueryScope;
use crate::core::errors::ClientError;
use crate::core::ids::TaskId;
use crate::evaluation::EvaluationReport;

/// Kind of long-running task.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Vector index rebuild.
    Rebuild,
    /// Retrieval quality evaluation.
    Evaluate,
}

impl TaskKind {
    /// Path segment of the task endpoints (`/rebuild`, `/evaluate`).
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Rebuild => "rebuild",
            Self::Evaluate => "evaluate",
        }
    }

    /// Cached resources that become stale once a task of this kind succeeds.
    #[must_use]
    pub const fn dependent_scopes(self) -> &'static [QueryScope] {
        match self {
            Self::Rebuild => &[QueryScope::Health, QueryScope::Search],
            Self::Evaluate => &[QueryScope::Evaluation],
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Client-side task status.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Still running on the backend.
    Pending,
    /// Finished successfully (terminal).
    Succeeded,
    /// Finished with a backend-reported failure (terminal).
    Failed,
}

impl TaskStatus {
    /// Terminal states are absorbing: no further fetch is issued.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl From<WireTaskStatus> for TaskStatus {
    fn from(value: WireTaskStatus) -> Self {
        match value {
            WireTaskStatus::InProgress => Self::Pending,
            WireTaskStatus::Completed => Self::Succeeded,
            WireTaskStatus::Failed => Self::Failed,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion figures of an index rebuild.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RebuildMetrics {
    /// Documents embedded.
    pub documents_processed: Option<u64>,
    /// Embedding dimension of the new index.
    pub embedding_dimension: Option<u64>,
    /// Vectors stored in the new index.
    pub index_vectors: Option<u64>,
    /// Wall-clock duration.
    pub elapsed_seconds: Option<f64>,
}

impl RebuildMetrics {
    const fn is_empty(&self) -> bool {
        self.documents_processed.is_none()
            && self.embedding_dimension.is_none()
            && self.index_vectors.is_none()
            && self.elapsed_seconds.is_none()
    }
}

/// Kind-specific completion metrics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskMetrics {
    /// Rebuild figures.
    Rebuild(RebuildMetrics),
    /// Evaluation report.
    Evaluation(EvaluationReport),
}

/// Snapshot of a backend task as last observed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque identifier.
    pub id: TaskId,
    /// Task kind.
    pub kind: TaskKind,
    /// Current status.
    pub status: TaskStatus,
    /// Progress fraction in `[0, 1]`, when reported.
    pub progress: Option<f64>,
    /// Progress message.
    pub message: Option<String>,
    /// Completion metrics, when reported.
    pub metrics: Option<TaskMetrics>,
    /// Failure message.
    pub error: Option<String>,
}

impl Task {
    /// Build a task snapshot from a rebuild status payload.
    #[must_use]
    pub fn from_rebuild(id: TaskId, response: RebuildStatusResponse) -> Self {
        let metrics = RebuildMetrics {
            documents_processed: response.documents_processed,
            embedding_dimension: response.embedding_dimension,
            index_vectors: response.index_vectors,
            elapsed_seconds: response.elapsed_seconds,
        };
        Self {
            id,
            kind: TaskKind::Rebuild,
            status: response.status.into(),
            progress: response.progress.and_then(normalize_progress),
            message: response.message,
            metrics: (!metrics.is_empty()).then_some(TaskMetrics::Rebuild(metrics)),
            error: response.error,
        }
    }

    /// Build a task snapshot from an evaluation status payload.
    #[must_use]
    pub fn from_evaluation(id: TaskId, response: EvaluationStatusResponse) -> Self {
        Self {
            id,
            kind: TaskKind::Evaluate,
            status: response.status.into(),
            progress: response.progress.and_then(normalize_progress),
            message: response.message,
            metrics: response.result.map(TaskMetrics::Evaluation),
            error: response.error,
        }
    }

    /// Progress as a whole percentage, `0` when absent.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Clamped to 0..=100
    pub fn percent(&self) -> u8 {
        self.progress
            .map_or(0, |p| (p * 100.0).round().clamp(0.0, 100.0) as u8)
    }

    /// The reported failure as an error, when the task failed.
    #[must_use]
    pub fn failure(&self) -> Option<ClientError> {
        (self.status == TaskStatus::Failed).then(|| ClientError::TaskFailed {
            task_id: self.id.clone(),
            message: self
                .error
                .clone()
                .or_else(|| self.message.clone())
                .unwrap_or_else(|| "no detail reported".to_string()),
        })
    }
}

/// Clamp a reported fraction into `[0, 1]`, dropping non-finite values.
fn normalize_progress(raw: f64) -> Option<f64> {
    raw.is_finite().then(|| raw.clamp(0.0, 1.0))
}
