//! Wire payloads exchanged with the RAG backend.
//!
//! Every external payload is a plain serde type: decoding either yields the
//! typed value or a structured [`ClientError::InvalidPayload`]
//! (see [`decode_payload`]).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::errors::ClientError;
use crate::core::ids::{SessionId, TaskId};
use crate::evaluation::EvaluationReport;

/// Decode a JSON body into a typed payload.
///
/// # Errors
/// Returns `ClientError::InvalidPayload` naming the payload type on mismatch.
pub fn decode_payload<T: DeserializeOwned>(
    payload: &'static str,
    body: &[u8],
) -> Result<T, ClientError> {
    serde_json::from_slice(body).map_err(|source| ClientError::InvalidPayload { payload, source })
}

/// Health status reported by the backend.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Index and database reachable.
    Healthy,
    /// Degraded service.
    Unhealthy,
}

/// `GET /health` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Number of indexed documents.
    pub document_count: u64,
    /// Embedding dimension of the index.
    pub embedding_dimension: u64,
    /// Number of server-held chat sessions.
    pub active_sessions: u64,
    /// Database connectivity, when reported.
    #[serde(default)]
    pub database: Option<String>,
}

/// `POST /search` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free-text query.
    pub query: String,
    /// Number of documents to retrieve (1-20).
    pub top_k: u8,
}

/// A retrieved source document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    /// Document title.
    pub title: String,
    /// Indexed content.
    pub content: String,
    /// Free-form metadata (city, dates, url...).
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Similarity score in `[0, 1]`.
    pub similarity: f64,
    /// L2 distance in embedding space.
    pub distance: f64,
}

/// `POST /search` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Retrieved documents, best first.
    pub results: Vec<DocumentResult>,
    /// Echo of the query.
    pub query: String,
}

/// `POST /chat` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// User utterance.
    pub query: String,
    /// Session to continue; absent to start a new one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Number of documents to retrieve (1-20).
    pub top_k: u8,
}

/// `POST /chat` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Assistant reply.
    pub response: String,
    /// Documents the reply is grounded on.
    #[serde(default)]
    pub sources: Vec<DocumentResult>,
    /// Echo of the query.
    pub query: String,
    /// Session the turn was recorded in.
    pub session_id: SessionId,
}

/// Speaker of a conversation turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Human operator.
    User,
    /// RAG assistant.
    Assistant,
}

impl MessageRole {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of server-held history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Speaker.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
}

/// `GET /session/{id}` response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResponse {
    /// Session identifier.
    pub session_id: SessionId,
    /// Ordered history.
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    /// Creation time, ISO 8601 (timezone optional).
    #[serde(default)]
    pub created_at: Option<String>,
    /// Last update time, ISO 8601 (timezone optional).
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// `DELETE /session/{id}` response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSessionResponse {
    /// Confirmation message.
    #[serde(default)]
    pub message: Option<String>,
    /// Status word, when reported.
    #[serde(default)]
    pub status: Option<String>,
}

/// Task status as reported on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireTaskStatus {
    /// Still running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// `POST /rebuild` and `POST /evaluate` acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAccepted {
    /// Always `accepted`.
    pub status: String,
    /// Human-readable message, when reported.
    #[serde(default)]
    pub message: Option<String>,
    /// Identifier to poll.
    pub task_id: TaskId,
}

/// `GET /rebuild/{task_id}` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebuildStatusResponse {
    /// Wire status.
    pub status: WireTaskStatus,
    /// Progress fraction.
    #[serde(default)]
    pub progress: Option<f64>,
    /// Progress message.
    #[serde(default)]
    pub message: Option<String>,
    /// Documents embedded so far.
    #[serde(default)]
    pub documents_processed: Option<u64>,
    /// Embedding dimension of the new index.
    #[serde(default)]
    pub embedding_dimension: Option<u64>,
    /// Vectors stored in the new index.
    #[serde(default)]
    pub index_vectors: Option<u64>,
    /// Wall-clock duration of the rebuild.
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    /// Failure message.
    #[serde(default)]
    pub error: Option<String>,
}

/// `POST /evaluate` request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Server-side test file to evaluate against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_file: Option<String>,
}

/// `GET /evaluate/{task_id}` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStatusResponse {
    /// Wire status.
    pub status: WireTaskStatus,
    /// Progress fraction.
    #[serde(default)]
    pub progress: Option<f64>,
    /// Progress message.
    #[serde(default)]
    pub message: Option<String>,
    /// Final report once completed.
    #[serde(default)]
    pub result: Option<EvaluationReport>,
    /// Failure message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Error body returned by the backend (`{"detail": ...}`).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ErrorBody {
    /// Either a string or a structured validation report.
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Flatten `detail` into a single line.
    #[must_use]
    pub fn detail_text(&self) -> Option<String> {
        match self.detail.as_ref()? {
            serde_json::Value::String(text) => Some(text.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}
