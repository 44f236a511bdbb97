//! Scripted in-process backend for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::api::backend::{BackendFuture, RagBackend, StartTask, StartedTask};
use crate::api::types::{
    ChatRequest, ChatResponse, DeleteSessionResponse, DocumentResult, HealthResponse,
    HealthStatus, HistoryMessage, MessageRole, SearchRequest, SearchResponse, SessionResponse,
};
use crate::core::errors::{ClientError, ClientResult};
use crate::core::ids::{SessionId, TaskId};
use crate::tasks::task::{Task, TaskKind, TaskStatus};

/// One scripted reply, optionally held until a gate is opened.
pub struct Reply<T> {
    result: ClientResult<T>,
    gate: Option<Arc<Notify>>,
}

impl<T> Reply<T> {
    pub fn ok(value: T) -> Self {
        Self {
            result: Ok(value),
            gate: None,
        }
    }

    pub fn err(error: ClientError) -> Self {
        Self {
            result: Err(error),
            gate: None,
        }
    }

    /// Hold the reply until `gate.notify_one()`.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

/// FIFO of replies for one operation.
pub struct Script<T> {
    replies: Mutex<VecDeque<Reply<T>>>,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> Script<T> {
    pub fn push(&self, reply: Reply<T>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    async fn next(&self, operation: &str) -> ClientResult<T> {
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply { result, gate }) => {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                result
            }
            None => Err(ClientError::server(500, format!("unscripted {operation}"))),
        }
    }
}

/// A recorded backend call.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Health,
    Search(SearchRequest),
    Chat(ChatRequest),
    GetSession(SessionId),
    DeleteSession(SessionId),
    StartTask(StartTask),
    TaskStatus(TaskKind, TaskId),
}

/// Backend double answering from per-operation scripts.
#[derive(Default)]
pub struct ScriptedBackend {
    pub health: Script<HealthResponse>,
    pub search: Script<SearchResponse>,
    pub chat: Script<ChatResponse>,
    pub sessions: Script<SessionResponse>,
    pub deletes: Script<DeleteSessionResponse>,
    pub starts: Script<StartedTask>,
    pub statuses: Script<Task>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RagBackend for ScriptedBackend {
    fn health(&self) -> BackendFuture<'_, ClientResult<HealthResponse>> {
        self.record(Call::Health);
        Box::pin(self.health.next("health"))
    }

    fn search(&self, request: SearchRequest) -> BackendFuture<'_, ClientResult<SearchResponse>> {
        self.record(Call::Search(request));
        Box::pin(self.search.next("search"))
    }

    fn chat(&self, request: ChatRequest) -> BackendFuture<'_, ClientResult<ChatResponse>> {
        self.record(Call::Chat(request));
        Box::pin(self.chat.next("chat"))
    }

    fn get_session(&self, id: SessionId) -> BackendFuture<'_, ClientResult<SessionResponse>> {
        self.record(Call::GetSession(id));
        Box::pin(self.sessions.next("get_session"))
    }

    fn delete_session(
        &self,
        id: SessionId,
    ) -> BackendFuture<'_, ClientResult<DeleteSessionResponse>> {
        self.record(Call::DeleteSession(id));
        Box::pin(self.deletes.next("delete_session"))
    }

    fn start_task(&self, request: StartTask) -> BackendFuture<'_, ClientResult<StartedTask>> {
        self.record(Call::StartTask(request));
        Box::pin(self.starts.next("start_task"))
    }

    fn task_status(&self, kind: TaskKind, id: TaskId) -> BackendFuture<'_, ClientResult<Task>> {
        self.record(Call::TaskStatus(kind, id));
        Box::pin(self.statuses.next("task_status"))
    }
}

pub fn sid(raw: &str) -> SessionId {
    SessionId::new(raw).unwrap()
}

pub fn tid(raw: &str) -> TaskId {
    TaskId::new(raw).unwrap()
}

pub fn healthy(document_count: u64) -> HealthResponse {
    HealthResponse {
        status: HealthStatus::Healthy,
        document_count,
        embedding_dimension: 384,
        active_sessions: 0,
        database: Some("postgresql".to_string()),
    }
}

pub fn source(title: &str) -> DocumentResult {
    DocumentResult {
        title: title.to_string(),
        content: format!("{title} content"),
        metadata: serde_json::Map::new(),
        similarity: 0.9,
        distance: 0.1,
    }
}

pub fn chat_reply(text: &str, query: &str, session: &str) -> ChatResponse {
    ChatResponse {
        response: text.to_string(),
        sources: vec![source("Fete de la musique")],
        query: query.to_string(),
        session_id: sid(session),
    }
}

pub fn history(session: &str, turns: &[(MessageRole, &str)]) -> SessionResponse {
    SessionResponse {
        session_id: sid(session),
        history: turns
            .iter()
            .map(|(role, content)| HistoryMessage {
                role: *role,
                content: (*content).to_string(),
            })
            .collect(),
        created_at: Some("2024-01-15T14:30:00".to_string()),
        updated_at: None,
    }
}

pub fn task(kind: TaskKind, id: &str, status: TaskStatus, progress: Option<f64>) -> Task {
    Task {
        id: tid(id),
        kind,
        status,
        progress,
        message: None,
        metrics: None,
        error: (status == TaskStatus::Failed).then(|| "index corrupted".to_string()),
    }
}

pub fn not_found(session: &str) -> ClientError {
    ClientError::SessionExpired {
        session_id: sid(session),
        detail: "Session non trouvee".to_string(),
    }
}
