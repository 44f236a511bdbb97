//! Console state: one chat conversation, background task watchers and the
//! health monitor, driven by parsed commands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::backend::{RagBackend, StartTask};
use crate::api::types::{EvaluationRequest, SearchRequest};
use crate::cache::{QueryCache, QueryScope};
use crate::chat::{ChatOrchestrator, SendOutcome};
use crate::console::commands::{Command, SessionRef};
use crate::console::render;
use crate::core::config::ClientConfig;
use crate::core::errors::ClientResult;
use crate::core::ids::SessionId;
use crate::evaluation::{MetricTargets, load_report};
use crate::monitoring::{HealthHandle, HealthMonitor};
use crate::session::reconciler::SelectOutcome;
use crate::storage::kv_store::KvStore;
use crate::tasks::poller::{TaskEvent, TaskPoller, TaskSubscription};
use crate::tasks::task::{TaskKind, TaskMetrics, TaskStatus};

/// How long `/health` waits for a refetch before showing the last snapshot.
const HEALTH_REFRESH_WAIT: Duration = Duration::from_secs(3);

/// Everything the REPL drives. Output lines go to `output`.
pub struct Console {
    backend: Arc<dyn RagBackend>,
    cache: Arc<QueryCache>,
    chat: ChatOrchestrator,
    poller: TaskPoller,
    health: HealthHandle,
    targets: MetricTargets,
    output: mpsc::UnboundedSender<String>,
    watchers: HashMap<TaskKind, JoinHandle<()>>,
}

impl Console {
    /// Restore chat state and start the health monitor.
    ///
    /// # Errors
    /// Returns an error if the chat state cannot be read.
    pub async fn start(
        config: &ClientConfig,
        backend: Arc<dyn RagBackend>,
        store: Arc<dyn KvStore>,
        output: mpsc::UnboundedSender<String>,
    ) -> ClientResult<Self> {
        let cache = Arc::new(QueryCache::new(config.cache.clone()));
        let chat = ChatOrchestrator::load(Arc::clone(&backend), store).await?;
        let poller =
            TaskPoller::new(Arc::clone(&backend), config.poll.clone()).with_cache(Arc::clone(&cache));
        let health = HealthMonitor::new(Arc::clone(&backend), config.health.clone())
            .with_cache(Arc::clone(&cache))
            .spawn();

        Ok(Self {
            backend,
            cache,
            chat,
            poller,
            health,
            targets: MetricTargets::default(),
            output,
            watchers: HashMap::new(),
        })
    }

    /// The chat orchestrator behind plain-text turns.
    #[must_use]
    pub const fn chat(&self) -> &ChatOrchestrator {
        &self.chat
    }

    /// Run one command. Returns `false` when the console should exit.
    ///
    /// # Errors
    /// Returns errors the user should see; the console stays usable.
    pub async fn handle(&mut self, command: Command) -> ClientResult<bool> {
        match command {
            Command::Nothing => {}
            Command::Quit => return Ok(false),
            Command::Help => self.say(render::HELP),
            Command::Chat(query) => self.chat_turn(&query).await?,
            Command::Search(query) => self.search(query).await?,
            Command::Health => self.show_health().await,
            Command::Sessions => {
                let snapshot = self.chat.snapshot().await;
                self.say(render::sessions(
                    &snapshot.sessions,
                    snapshot.session_id.as_ref(),
                ));
            }
            Command::Select(reference) => {
                if let Some(id) = self.resolve(reference).await {
                    self.select(id).await;
                }
            }
            Command::New => {
                self.chat.new_session().await;
                self.say("New conversation.");
            }
            Command::Clear => {
                self.chat.clear().await?;
                self.say("Conversation cleared.");
            }
            Command::Remove(reference) => {
                if let Some(id) = self.resolve(reference).await {
                    if self.chat.remove_session(&id).await {
                        self.say(format!("Removed {id}."));
                    } else {
                        self.say(format!("No saved conversation {id}."));
                    }
                }
            }
            Command::TopK(None) => self.say(format!("top_k = {}", self.chat.top_k().get())),
            Command::TopK(Some(value)) => {
                let top_k = self.chat.set_top_k(value).await;
                self.say(format!("top_k = {}", top_k.get()));
            }
            Command::Rebuild { api_key } => {
                let subscription = self.poller.start(StartTask::Rebuild { api_key }).await?;
                self.say(format!("[rebuild] started (task {})", subscription.id()));
                self.watch(subscription);
            }
            Command::Evaluate { test_file } => {
                let subscription = self
                    .poller
                    .start(StartTask::Evaluate(EvaluationRequest { test_file }))
                    .await?;
                self.say(format!("[evaluate] started (task {})", subscription.id()));
                self.watch(subscription);
            }
            Command::Report(Some(path)) => {
                let report = load_report(&path).await?;
                self.cache.set_evaluation(&report);
                self.say(render::report(&report, &self.targets));
            }
            Command::Report(None) => match self.cache.get_evaluation() {
                Some(report) => self.say(render::report(&report, &self.targets)),
                None => self.say("No evaluation report yet, run /evaluate or /report <file.json>."),
            },
        }
        Ok(true)
    }

    /// Stop task watchers and the health monitor.
    pub async fn shutdown(mut self) {
        for (_, watcher) in self.watchers.drain() {
            watcher.abort();
        }
        self.health.shutdown().await;
    }

    fn say(&self, line: impl Into<String>) {
        // A closed output only happens while shutting down.
        let _ = self.output.send(line.into());
    }

    async fn chat_turn(&self, query: &str) -> ClientResult<()> {
        match self.chat.send(query).await? {
            SendOutcome::Replied { .. } | SendOutcome::Failed(_) => {
                if let Some(last) = self.chat.snapshot().await.messages.last() {
                    self.say(render::message(last));
                }
            }
            SendOutcome::Discarded => {}
        }
        Ok(())
    }

    /// Show health no older than the cache TTL. A miss asks the monitor to
    /// refetch and waits briefly for it.
    async fn show_health(&self) {
        if self.cache.get_health().is_none() {
            let mut updates = self.health.subscribe();
            updates.mark_unchanged();
            self.cache.invalidate(QueryScope::Health);
            if tokio::time::timeout(HEALTH_REFRESH_WAIT, updates.changed())
                .await
                .is_err()
            {
                debug!("Health refetch still running, showing last snapshot");
            }
        }
        self.say(render::health(&self.health.snapshot()));
    }

    async fn search(&self, query: String) -> ClientResult<()> {
        let top_k = self.chat.top_k().get();
        let response = match self.cache.get_search(&query, top_k) {
            Some(cached) => {
                debug!(%query, top_k, "Search served from cache");
                cached
            }
            None => {
                let response = self
                    .backend
                    .search(SearchRequest {
                        query: query.clone(),
                        top_k,
                    })
                    .await?;
                self.cache.set_search(&query, top_k, &response);
                response
            }
        };
        self.say(render::search(&response));
        Ok(())
    }

    async fn select(&self, id: SessionId) {
        match self.chat.select(id).await {
            SelectOutcome::AlreadyActive => self.say("Already in this conversation."),
            SelectOutcome::Superseded => {}
            SelectOutcome::Restored { .. }
            | SelectOutcome::Expired
            | SelectOutcome::Unavailable { .. } => {
                let snapshot = self.chat.snapshot().await;
                for message in &snapshot.messages {
                    self.say(render::message(message));
                }
            }
        }
    }

    async fn resolve(&self, reference: SessionRef) -> Option<SessionId> {
        match reference {
            SessionRef::Id(id) => Some(id),
            SessionRef::Index(n) => {
                let found = self
                    .chat
                    .sessions()
                    .await
                    .into_iter()
                    .nth(n - 1)
                    .map(|entry| entry.id);
                if found.is_none() {
                    self.say(format!("No conversation #{n}, see /sessions."));
                }
                found
            }
        }
    }

    /// Print task progress in the background. A newer task of the same kind
    /// replaces the previous watcher, which stops its polling.
    fn watch(&mut self, mut subscription: TaskSubscription) {
        let kind = subscription.kind();
        let output = self.output.clone();
        let cache = Arc::clone(&self.cache);
        let targets = self.targets;

        let watcher = tokio::spawn(async move {
            let mut last_line = String::new();
            while let Some(event) = subscription.next().await {
                let line = render::task_event(kind, &event);
                if line != last_line {
                    let _ = output.send(line.clone());
                    last_line = line;
                }
                if let TaskEvent::Status(task) = &event
                    && task.status == TaskStatus::Succeeded
                    && let Some(TaskMetrics::Evaluation(report)) = &task.metrics
                {
                    cache.set_evaluation(report);
                    let _ = output.send(render::report(report, &targets));
                }
            }
        });

        if let Some(previous) = self.watchers.insert(kind, watcher) {
            previous.abort();
        }
    }
}
