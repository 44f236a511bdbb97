//! HTTP client for the RAG backend.

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::api::backend::{BackendFuture, RagBackend, StartTask, StartedTask};
use crate::api::types::{
    ChatRequest, ChatResponse, DeleteSessionResponse, ErrorBody, EvaluationStatusResponse,
    HealthResponse, RebuildStatusResponse, SearchRequest, SearchResponse, SessionResponse,
    TaskAccepted, decode_payload,
};
use crate::core::config::ApiConfig;
use crate::core::errors::{ClientError, ClientResult};
use crate::core::ids::{SessionId, TaskId};
use crate::tasks::task::{Task, TaskKind};

/// Header carrying the rebuild API key.
const API_KEY_HEADER: &str = "X-API-Key";

/// `reqwest`-based implementation of [`RagBackend`].
pub struct RagClient {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl RagClient {
    /// Create a client for the configured backend.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> ClientResult<Self> {
        let client = Self::build_client(config)?;

        // `Url::join` replaces the last segment unless the base ends with '/'.
        let mut base_url = config.base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn build_client(config: &ApiConfig) -> ClientResult<reqwest::Client> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Ok(ua) = HeaderValue::from_str(&format!(
            "rag-console/{}",
            env!("CARGO_PKG_VERSION")
        )) {
            headers.insert(USER_AGENT, ua);
        }

        reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| ClientError::InvalidConfig(format!("http client: {e}")))
    }

    /// Resolve an endpoint from percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> ClientResult<Url> {
        let path = segments
            .iter()
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Ok(self.base_url.join(&path)?)
    }

    /// Send a request and decode a successful body into `T`.
    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        payload: &'static str,
    ) -> ClientResult<T> {
        let response = request.send().await.map_err(request_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(request_error)?;

        if !status.is_success() {
            let detail = serde_json::from_slice::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.detail_text())
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                });
            debug!(status = status.as_u16(), %detail, payload, "Backend returned an error");
            return Err(ClientError::server(status.as_u16(), detail));
        }

        decode_payload(payload, &body)
    }
}

/// Map a `reqwest` failure: anything short of an HTTP response is a transport error.
fn request_error(err: reqwest::Error) -> ClientError {
    if err.is_builder() {
        ClientError::InvalidConfig(err.to_string())
    } else {
        ClientError::Transport(err.to_string())
    }
}

/// A 404 on a session route means the backend forgot the session.
fn session_error(session_id: SessionId, err: ClientError) -> ClientError {
    match err {
        ClientError::Server { status, detail } if status == StatusCode::NOT_FOUND.as_u16() => {
            ClientError::SessionExpired { session_id, detail }
        }
        other => other,
    }
}

impl RagBackend for RagClient {
    fn health(&self) -> BackendFuture<'_, ClientResult<HealthResponse>> {
        Box::pin(async move {
            let url = self.endpoint(&["health"])?;
            self.execute(self.client.get(url), "health").await
        })
    }

    fn search(&self, request: SearchRequest) -> BackendFuture<'_, ClientResult<SearchResponse>> {
        Box::pin(async move {
            let url = self.endpoint(&["search"])?;
            self.execute(self.client.post(url).json(&request), "search response")
                .await
        })
    }

    fn chat(&self, request: ChatRequest) -> BackendFuture<'_, ClientResult<ChatResponse>> {
        Box::pin(async move {
            let url = self.endpoint(&["chat"])?;
            self.execute(self.client.post(url).json(&request), "chat response")
                .await
        })
    }

    fn get_session(&self, id: SessionId) -> BackendFuture<'_, ClientResult<SessionResponse>> {
        Box::pin(async move {
            let url = self.endpoint(&["session", id.as_str()])?;
            self.execute(self.client.get(url), "session")
                .await
                .map_err(|err| session_error(id, err))
        })
    }

    fn delete_session(
        &self,
        id: SessionId,
    ) -> BackendFuture<'_, ClientResult<DeleteSessionResponse>> {
        Box::pin(async move {
            let url = self.endpoint(&["session", id.as_str()])?;
            self.execute(self.client.delete(url), "session deletion")
                .await
                .map_err(|err| session_error(id, err))
        })
    }

    fn start_task(&self, request: StartTask) -> BackendFuture<'_, ClientResult<StartedTask>> {
        Box::pin(async move {
            let kind = request.kind();
            let url = self.endpoint(&[kind.path()])?;
            let builder = match request {
                StartTask::Rebuild { api_key } => {
                    let mut builder = self.client.post(url).json(&serde_json::json!({}));
                    if let Some(key) = api_key.or_else(|| self.api_key.clone()) {
                        builder = builder.header(API_KEY_HEADER, key);
                    }
                    builder
                }
                StartTask::Evaluate(body) => self.client.post(url).json(&body),
            };

            let accepted: TaskAccepted = self.execute(builder, "task acknowledgement").await?;
            debug!(task_id = %accepted.task_id, %kind, "Task accepted");
            Ok(StartedTask {
                id: accepted.task_id,
                kind,
                message: accepted.message,
            })
        })
    }

    fn task_status(&self, kind: TaskKind, id: TaskId) -> BackendFuture<'_, ClientResult<Task>> {
        Box::pin(async move {
            let url = self.endpoint(&[kind.path(), id.as_str()])?;
            let request = self.client.get(url);
            match kind {
                TaskKind::Rebuild => {
                    let status: RebuildStatusResponse =
                        self.execute(request, "rebuild status").await?;
                    Ok(Task::from_rebuild(id, status))
                }
                TaskKind::Evaluate => {
                    let status: EvaluationStatusResponse =
                        self.execute(request, "evaluation status").await?;
                    if let Some(report) = &status.result {
                        report.validate()?;
                    }
                    Ok(Task::from_evaluation(id, status))
                }
            }
        })
    }
}
