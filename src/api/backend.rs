//! Backend abstraction consumed by the poller, the reconciler and the chat orchestrator.

use std::future::Future;
use std::pin::Pin;

use crate::api::types::{
    ChatRequest, ChatResponse, DeleteSessionResponse, EvaluationRequest, HealthResponse,
    SearchRequest, SearchResponse, SessionResponse,
};
use crate::core::errors::ClientResult;
use crate::core::ids::{SessionId, TaskId};
use crate::tasks::task::{Task, TaskKind};

/// Boxed future type for backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Request to start a long-running task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartTask {
    /// Rebuild the vector index, optionally authenticated with `X-API-Key`.
    Rebuild {
        /// API key overriding the configured one.
        api_key: Option<String>,
    },
    /// Run an evaluation.
    Evaluate(EvaluationRequest),
}

impl StartTask {
    /// Kind of task this request starts.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        match self {
            Self::Rebuild { .. } => TaskKind::Rebuild,
            Self::Evaluate(_) => TaskKind::Evaluate,
        }
    }
}

/// Acknowledgement of a started task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartedTask {
    /// Identifier to poll.
    pub id: TaskId,
    /// Task kind.
    pub kind: TaskKind,
    /// Human-readable message, when reported.
    pub message: Option<String>,
}

/// RAG backend operations.
pub trait RagBackend: Send + Sync {
    /// Check service health.
    ///
    /// # Errors
    /// Returns a transport or server error.
    fn health(&self) -> BackendFuture<'_, ClientResult<HealthResponse>>;

    /// Stateless semantic search.
    ///
    /// # Errors
    /// Returns a transport or server error.
    fn search(&self, request: SearchRequest) -> BackendFuture<'_, ClientResult<SearchResponse>>;

    /// Send one conversational turn.
    ///
    /// # Errors
    /// Returns a transport or server error.
    fn chat(&self, request: ChatRequest) -> BackendFuture<'_, ClientResult<ChatResponse>>;

    /// Fetch the authoritative history of a session.
    ///
    /// # Errors
    /// Returns `SessionExpired` if the backend no longer knows the session.
    fn get_session(&self, id: SessionId) -> BackendFuture<'_, ClientResult<SessionResponse>>;

    /// Delete a session on the backend.
    ///
    /// # Errors
    /// Returns `SessionExpired` if the backend no longer knows the session.
    fn delete_session(
        &self,
        id: SessionId,
    ) -> BackendFuture<'_, ClientResult<DeleteSessionResponse>>;

    /// Start a long-running task.
    ///
    /// # Errors
    /// Returns a transport or server error (401 on a bad rebuild key).
    fn start_task(&self, request: StartTask) -> BackendFuture<'_, ClientResult<StartedTask>>;

    /// Fetch the current status of a task.
    ///
    /// # Errors
    /// Returns a transport or server error. A reported failure is a successful
    /// fetch whose status is `Failed`.
    fn task_status(&self, kind: TaskKind, id: TaskId) -> BackendFuture<'_, ClientResult<Task>>;
}
