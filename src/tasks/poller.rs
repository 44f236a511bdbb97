//! Task poller: follows a backend task to a terminal state.
//!
//! One worker per tracked task id. The worker fetches immediately, then
//! every `interval` while the task is pending, and stops for good on
//! `succeeded`, `failed`, a surfaced fetch error, or cancellation.
//! Fetching is suspended while the host view is backgrounded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::backend::{RagBackend, StartTask};
use crate::cache::QueryCache;
use crate::core::config::PollConfig;
use crate::core::errors::{ClientError, ClientResult};
use crate::core::ids::TaskId;
use crate::tasks::task::{Task, TaskKind, TaskStatus};

/// Lifecycle of one tracking instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollPhase {
    /// No fetch issued yet.
    Idle,
    /// Fetching while the task is pending.
    Polling,
    /// Task reported success.
    Succeeded,
    /// Task reported failure.
    Failed,
    /// Fetching failed beyond the retry budget.
    Error,
}

impl PollPhase {
    /// Polling has ended in this phase.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Error)
    }
}

/// Latest observation, as published on the state channel.
#[derive(Clone, Debug, PartialEq)]
pub struct PollState {
    /// Where the poll loop stands.
    pub phase: PollPhase,
    /// Last task snapshot, with progress never below a value already shown.
    pub task: Option<Task>,
    /// Surfaced fetch error. Distinct from a task that reported `failed`.
    pub error: Option<String>,
}

impl PollState {
    const fn idle() -> Self {
        Self {
            phase: PollPhase::Idle,
            task: None,
            error: None,
        }
    }

    /// Nothing observed yet.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.task.is_none() && self.error.is_none()
    }
}

/// One item of the observation stream.
#[derive(Debug)]
pub enum TaskEvent {
    /// A status fetch succeeded.
    Status(Task),
    /// Fetching failed beyond the retry budget; no further event follows.
    Error(ClientError),
}

/// Foreground/background flag of the view hosting pollers.
#[derive(Clone, Debug)]
pub struct ViewVisibility {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ViewVisibility {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewVisibility {
    /// Start visible.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    /// Foreground (`true`) or background the view.
    pub fn set_visible(&self, visible: bool) {
        self.tx.send_replace(visible);
    }

    /// Whether the view is in the foreground.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Starts and tracks backend tasks.
#[derive(Clone)]
pub struct TaskPoller {
    backend: Arc<dyn RagBackend>,
    config: PollConfig,
    cache: Option<Arc<QueryCache>>,
    visibility: ViewVisibility,
}

impl TaskPoller {
    /// Poll `backend` with the given cadence and retry budget.
    #[must_use]
    pub fn new(backend: Arc<dyn RagBackend>, config: PollConfig) -> Self {
        Self {
            backend,
            config,
            cache: None,
            visibility: ViewVisibility::new(),
        }
    }

    /// Invalidate dependent cache scopes when a task succeeds.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Share a visibility flag with the view.
    #[must_use]
    pub fn with_visibility(mut self, visibility: ViewVisibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Visibility flag gating every fetch.
    #[must_use]
    pub const fn visibility(&self) -> &ViewVisibility {
        &self.visibility
    }

    /// Start a task on the backend and track it.
    ///
    /// # Errors
    /// Returns the backend error if the task is not accepted.
    pub async fn start(&self, request: StartTask) -> ClientResult<TaskSubscription> {
        let started = self.backend.start_task(request).await?;
        info!(task_id = %started.id, kind = %started.kind, "Task started");
        Ok(self.track(started.kind, started.id))
    }

    /// Track a task id. Must be called within a tokio runtime.
    #[must_use]
    pub fn track(&self, kind: TaskKind, id: TaskId) -> TaskSubscription {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PollState::idle());
        let cancelled = Arc::new(AtomicBool::new(false));

        let worker = PollWorker {
            backend: Arc::clone(&self.backend),
            cache: self.cache.clone(),
            kind,
            id: id.clone(),
            interval: self.config.interval,
            max_retries: self.config.max_retries,
            visibility: self.visibility.subscribe(),
            events: events_tx,
            state: state_tx,
            cancelled: Arc::clone(&cancelled),
        };
        let handle = tokio::spawn(worker.run());

        TaskSubscription {
            id,
            kind,
            events: events_rx,
            state: state_rx,
            cancelled,
            handle: Some(handle),
        }
    }
}

/// Handle on one tracked task. Dropping it stops polling.
pub struct TaskSubscription {
    id: TaskId,
    kind: TaskKind,
    events: mpsc::UnboundedReceiver<TaskEvent>,
    state: watch::Receiver<PollState>,
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TaskSubscription {
    /// Tracked task.
    #[must_use]
    pub const fn id(&self) -> &TaskId {
        &self.id
    }

    /// Kind of the tracked task.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Next observation; `None` once polling has ended.
    pub async fn next(&mut self) -> Option<TaskEvent> {
        self.events.recv().await
    }

    /// Latest published state.
    #[must_use]
    pub fn state(&self) -> PollState {
        self.state.borrow().clone()
    }

    /// Wait for the next state change.
    ///
    /// # Errors
    /// Returns an error once the worker is gone.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.state.changed().await
    }

    /// Stop polling now. A response already in flight is discarded.
    pub fn stop(&mut self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!(task_id = %self.id, "Task tracking stopped");
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Consume the stream until a terminal outcome.
    ///
    /// # Errors
    /// Returns `TaskFailed` for a reported failure, the surfaced fetch error,
    /// or `PollingStopped` if tracking ended first.
    pub async fn wait(mut self) -> ClientResult<Task> {
        while let Some(event) = self.next().await {
            match event {
                TaskEvent::Status(task) if task.status.is_terminal() => {
                    return match task.failure() {
                        Some(err) => Err(err),
                        None => Ok(task),
                    };
                }
                TaskEvent::Status(_) => {}
                TaskEvent::Error(err) => return Err(err),
            }
        }
        Err(ClientError::PollingStopped(self.id.clone()))
    }
}

impl Drop for TaskSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollWorker {
    backend: Arc<dyn RagBackend>,
    cache: Option<Arc<QueryCache>>,
    kind: TaskKind,
    id: TaskId,
    interval: Duration,
    max_retries: u32,
    visibility: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<TaskEvent>,
    state: watch::Sender<PollState>,
    cancelled: Arc<AtomicBool>,
}

impl PollWorker {
    async fn run(mut self) {
        let mut failures = 0u32;
        let mut shown_progress: Option<f64> = None;

        loop {
            self.wait_until_visible().await;
            if self.is_cancelled() {
                return;
            }
            self.state.send_modify(|s| s.phase = PollPhase::Polling);

            let result = self.backend.task_status(self.kind, self.id.clone()).await;
            if self.is_cancelled() {
                debug!(task_id = %self.id, "Discarding status fetched after cancellation");
                return;
            }

            match result {
                Ok(mut task) => {
                    failures = 0;
                    task.progress = clamp_progress(task.progress, shown_progress);
                    shown_progress = task.progress;
                    if self.publish(task) {
                        return;
                    }
                }
                Err(err) if err.is_retryable() && failures < self.max_retries => {
                    failures += 1;
                    warn!(
                        task_id = %self.id,
                        attempt = failures,
                        error = %err,
                        "Task status fetch failed, retrying"
                    );
                }
                Err(err) => {
                    warn!(task_id = %self.id, error = %err, "Task status unavailable");
                    self.state.send_modify(|s| {
                        s.phase = PollPhase::Error;
                        s.error = Some(err.to_string());
                    });
                    let _ = self.events.send(TaskEvent::Error(err));
                    return;
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Publish a snapshot; returns `true` when it is terminal.
    fn publish(&self, task: Task) -> bool {
        let status = task.status;
        debug!(
            task_id = %self.id,
            status = %status,
            progress = ?task.progress,
            "Task status"
        );

        let phase = match status {
            TaskStatus::Pending => PollPhase::Polling,
            TaskStatus::Succeeded => PollPhase::Succeeded,
            TaskStatus::Failed => PollPhase::Failed,
        };
        // Dependent scopes are dropped before the success is published.
        match status {
            TaskStatus::Pending => {}
            TaskStatus::Succeeded => {
                info!(task_id = %self.id, kind = %self.kind, "Task succeeded");
                if let Some(cache) = &self.cache {
                    for scope in self.kind.dependent_scopes() {
                        cache.invalidate(*scope);
                    }
                }
            }
            TaskStatus::Failed => {
                warn!(task_id = %self.id, kind = %self.kind, "Task reported failure");
            }
        }

        self.state.send_modify(|s| {
            s.phase = phase;
            s.task = Some(task.clone());
            s.error = None;
        });
        let _ = self.events.send(TaskEvent::Status(task));
        status.is_terminal()
    }

    /// Block while the view is backgrounded. A dropped visibility source
    /// counts as visible.
    async fn wait_until_visible(&mut self) {
        let mut announced = false;
        while !*self.visibility.borrow_and_update() {
            if !announced {
                debug!(task_id = %self.id, "Polling suspended in background");
                announced = true;
            }
            if self.visibility.changed().await.is_err() {
                return;
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Never report progress below what was already shown; an absent value
/// keeps the last one.
fn clamp_progress(reported: Option<f64>, shown: Option<f64>) -> Option<f64> {
    match (reported, shown) {
        (Some(p), Some(s)) => Some(p.max(s)),
        (None, s) => s,
        (p, None) => p,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::Notify;

    use crate::api::mock::{Call, Reply, ScriptedBackend, task, tid};
    use crate::cache::QueryScope;
    use crate::core::config::CacheConfig;

    fn poller(backend: &Arc<ScriptedBackend>) -> TaskPoller {
        TaskPoller::new(backend.clone(), PollConfig::default())
    }

    fn fetches(backend: &ScriptedBackend) -> usize {
        backend.count(|c| matches!(c, Call::TaskStatus(..)))
    }

    async fn collect(sub: &mut TaskSubscription) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Some(event) = sub.next().await {
            events.push(event);
        }
        events
    }

    fn status_of(event: &TaskEvent) -> (TaskStatus, Option<f64>) {
        match event {
            TaskEvent::Status(task) => (task.status, task.progress),
            TaskEvent::Error(err) => panic!("unexpected error {err}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_sequence_then_completed() {
        let backend = ScriptedBackend::new();
        for reply in [
            task(TaskKind::Rebuild, "task-1", TaskStatus::Pending, Some(0.3)),
            task(TaskKind::Rebuild, "task-1", TaskStatus::Pending, Some(0.7)),
            task(TaskKind::Rebuild, "task-1", TaskStatus::Succeeded, None),
        ] {
            backend.statuses.push(Reply::ok(reply));
        }

        let mut sub = poller(&backend).track(TaskKind::Rebuild, tid("task-1"));
        let events = collect(&mut sub).await;
        let observed: Vec<_> = events.iter().map(status_of).collect();
        assert_eq!(
            observed,
            vec![
                (TaskStatus::Pending, Some(0.3)),
                (TaskStatus::Pending, Some(0.7)),
                (TaskStatus::Succeeded, Some(0.7)),
            ]
        );
        assert_eq!(sub.state().phase, PollPhase::Succeeded);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetches(&backend), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_are_spaced_by_interval() {
        let backend = ScriptedBackend::new();
        backend.statuses.push(Reply::ok(task(TaskKind::Rebuild, "t", TaskStatus::Pending, None)));
        backend
            .statuses
            .push(Reply::ok(task(TaskKind::Rebuild, "t", TaskStatus::Succeeded, None)));

        let start = tokio::time::Instant::now();
        let mut sub = poller(&backend).track(TaskKind::Rebuild, tid("t"));
        sub.next().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        sub.next().await;
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_is_terminal_and_not_an_error() {
        let backend = ScriptedBackend::new();
        backend
            .statuses
            .push(Reply::ok(task(TaskKind::Evaluate, "e", TaskStatus::Failed, Some(0.2))));

        let sub = poller(&backend).track(TaskKind::Evaluate, tid("e"));
        let err = sub.wait().await.unwrap_err();
        assert!(matches!(err, ClientError::TaskFailed { ref message, .. } if message == "index corrupted"));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetches(&backend), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_then_recover() {
        let backend = ScriptedBackend::new();
        backend
            .statuses
            .push(Reply::err(ClientError::Transport("refused".to_string())));
        backend
            .statuses
            .push(Reply::ok(task(TaskKind::Rebuild, "t", TaskStatus::Succeeded, Some(1.0))));

        let sub = poller(&backend).track(TaskKind::Rebuild, tid("t"));
        let done = sub.wait().await.unwrap();
        assert_eq!(done.status, TaskStatus::Succeeded);
        assert_eq!(fetches(&backend), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_surfaces_after_retry_budget() {
        let backend = ScriptedBackend::new();
        for _ in 0..3 {
            backend.statuses.push(Reply::err(ClientError::server(503, "busy")));
        }

        let mut sub = poller(&backend).track(TaskKind::Rebuild, tid("t"));
        let events = collect(&mut sub).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TaskEvent::Error(ClientError::Server { status: 503, .. })));

        let state = sub.state();
        assert_eq!(state.phase, PollPhase::Error);
        assert!(state.task.is_none());
        assert!(state.error.is_some());
        assert!(!state.is_loading());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetches(&backend), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_task_is_not_retried() {
        let backend = ScriptedBackend::new();
        backend
            .statuses
            .push(Reply::err(ClientError::server(404, "Tache non trouvee")));

        let sub = poller(&backend).track(TaskKind::Rebuild, tid("gone"));
        assert!(matches!(sub.wait().await, Err(ClientError::Server { status: 404, .. })));
        assert_eq!(fetches(&backend), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_never_regresses() {
        let backend = ScriptedBackend::new();
        for progress in [Some(0.5), Some(0.4), None] {
            backend
                .statuses
                .push(Reply::ok(task(TaskKind::Rebuild, "t", TaskStatus::Pending, progress)));
        }
        backend
            .statuses
            .push(Reply::ok(task(TaskKind::Rebuild, "t", TaskStatus::Succeeded, Some(1.0))));

        let mut sub = poller(&backend).track(TaskKind::Rebuild, tid("t"));
        let progress: Vec<_> = collect(&mut sub)
            .await
            .iter()
            .map(|e| status_of(e).1)
            .collect();
        assert_eq!(progress, vec![Some(0.5), Some(0.5), Some(0.5), Some(1.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_invalidates_dependent_scopes_once() {
        let backend = ScriptedBackend::new();
        backend.statuses.push(Reply::ok(task(TaskKind::Rebuild, "t", TaskStatus::Pending, None)));
        backend
            .statuses
            .push(Reply::ok(task(TaskKind::Rebuild, "t", TaskStatus::Succeeded, None)));
        let cache = Arc::new(QueryCache::new(CacheConfig::default()));
        let mut invalidations = cache.subscribe();

        let sub = poller(&backend)
            .with_cache(cache.clone())
            .track(TaskKind::Rebuild, tid("t"));
        sub.wait().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(cache.invalidation_count(QueryScope::Health), 1);
        assert_eq!(cache.invalidation_count(QueryScope::Search), 1);
        assert_eq!(cache.invalidation_count(QueryScope::Evaluation), 0);
        assert_eq!(invalidations.recv().await.unwrap(), QueryScope::Health);
        assert_eq!(invalidations.recv().await.unwrap(), QueryScope::Search);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scopes_are_invalidated_before_success_is_seen() {
        let backend = ScriptedBackend::new();
        backend
            .statuses
            .push(Reply::ok(task(TaskKind::Evaluate, "e", TaskStatus::Succeeded, Some(1.0))));
        let cache = Arc::new(QueryCache::new(CacheConfig::default()));

        let mut sub = poller(&backend)
            .with_cache(cache.clone())
            .track(TaskKind::Evaluate, tid("e"));
        let event = sub.next().await.unwrap();
        assert_eq!(status_of(&event).0, TaskStatus::Succeeded);
        assert_eq!(cache.invalidation_count(QueryScope::Evaluation), 1);
        assert!(sub.next().await.is_none());
        assert_eq!(cache.invalidation_count(QueryScope::Evaluation), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backgrounded_view_suspends_polling() {
        let backend = ScriptedBackend::new();
        backend.statuses.push(Reply::ok(task(TaskKind::Rebuild, "t", TaskStatus::Pending, None)));
        backend
            .statuses
            .push(Reply::ok(task(TaskKind::Rebuild, "t", TaskStatus::Succeeded, None)));
        let visibility = ViewVisibility::new();
        visibility.set_visible(false);

        let mut sub = poller(&backend)
            .with_visibility(visibility.clone())
            .track(TaskKind::Rebuild, tid("t"));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetches(&backend), 0);
        assert_eq!(sub.state().phase, PollPhase::Idle);
        assert!(sub.state().is_loading());

        visibility.set_visible(true);
        assert!(matches!(sub.next().await, Some(TaskEvent::Status(_))));

        visibility.set_visible(false);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetches(&backend), 1);

        visibility.set_visible(true);
        let last = sub.next().await.unwrap();
        assert_eq!(status_of(&last).0, TaskStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_polling() {
        let backend = ScriptedBackend::new();
        for _ in 0..10 {
            backend
                .statuses
                .push(Reply::ok(task(TaskKind::Rebuild, "t", TaskStatus::Pending, Some(0.1))));
        }

        let mut sub = poller(&backend).track(TaskKind::Rebuild, tid("t"));
        sub.next().await;
        drop(sub);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fetches(&backend), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_response_after_stop_is_discarded() {
        let backend = ScriptedBackend::new();
        let gate = Arc::new(Notify::new());
        backend.statuses.push(
            Reply::ok(task(TaskKind::Rebuild, "t", TaskStatus::Succeeded, None)).gated(gate.clone()),
        );
        let cache = Arc::new(QueryCache::new(CacheConfig::default()));

        let mut sub = poller(&backend)
            .with_cache(cache.clone())
            .track(TaskKind::Rebuild, tid("t"));
        while fetches(&backend) == 0 {
            tokio::task::yield_now().await;
        }
        sub.stop();
        gate.notify_one();

        assert!(sub.next().await.is_none());
        assert!(sub.state().task.is_none());
        assert_eq!(cache.invalidation_count(QueryScope::Health), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_tracks_accepted_task() {
        let backend = ScriptedBackend::new();
        backend.starts.push(Reply::ok(crate::api::backend::StartedTask {
            id: tid("task-7"),
            kind: TaskKind::Rebuild,
            message: None,
        }));
        backend
            .statuses
            .push(Reply::ok(task(TaskKind::Rebuild, "task-7", TaskStatus::Succeeded, None)));

        let sub = poller(&backend)
            .start(StartTask::Rebuild { api_key: None })
            .await
            .unwrap();
        assert_eq!(sub.id(), &tid("task-7"));
        sub.wait().await.unwrap();
        assert_eq!(
            backend.calls()[1],
            Call::TaskStatus(TaskKind::Rebuild, tid("task-7"))
        );
    }

    #[test]
    fn test_clamp_progress() {
        assert_eq!(clamp_progress(Some(0.2), None), Some(0.2));
        assert_eq!(clamp_progress(Some(0.2), Some(0.6)), Some(0.6));
        assert_eq!(clamp_progress(None, Some(0.6)), Some(0.6));
        assert_eq!(clamp_progress(None, None), None);
    }
}
