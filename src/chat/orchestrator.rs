//! Chat orchestration: optimistic sends, session adoption, clearing and
//! switching conversations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::backend::RagBackend;
use crate::api::types::ChatRequest;
use crate::chat::state::{ChatRecord, ChatSnapshot, TopK};
use crate::core::errors::{ClientError, ClientResult};
use crate::core::ids::SessionId;
use crate::session::reconciler::{SelectOutcome, SessionReconciler};
use crate::session::registry::{SessionRegistry, SessionSummary};
use crate::session::state::{ChatMessage, SessionState};
use crate::session::title::derive_title;
use crate::storage::kv_store::KvStore;
use crate::storage::persisted::{load_record, save_record};

/// Result of a chat turn that was actually sent.
#[derive(Debug)]
pub enum SendOutcome {
    /// The assistant replied and the reply was appended.
    Replied {
        /// Session the turn belongs to.
        session_id: SessionId,
        /// The backend minted this session for the turn.
        new_session: bool,
    },
    /// The request failed; a notice was appended in place of a reply.
    Failed(ClientError),
    /// The conversation changed while the turn was in flight; nothing was
    /// appended, though a newly minted session is still registered.
    Discarded,
}

/// Held for the duration of one send; released on drop, including when the
/// send future is cancelled.
struct SendGuard<'a>(&'a AtomicBool);

impl<'a> SendGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct ChatContext {
    backend: Arc<dyn RagBackend>,
    store: Arc<dyn KvStore>,
    reconciler: SessionReconciler,
    state: Mutex<SessionState>,
    top_k: AtomicU8,
    sending: AtomicBool,
    /// Serializes record writes so the last write reflects the latest state.
    persist_lock: Mutex<()>,
}

/// Coordinates the conversation buffer, the session registry and the backend.
///
/// Cloning is cheap and yields a handle on the same conversation.
#[derive(Clone)]
pub struct ChatOrchestrator {
    inner: Arc<ChatContext>,
}

impl ChatOrchestrator {
    /// Restore the persisted registry and preferences.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read. Unreadable records load
    /// as defaults.
    pub async fn load(backend: Arc<dyn RagBackend>, store: Arc<dyn KvStore>) -> ClientResult<Self> {
        let record = load_record::<ChatRecord>(store.as_ref())
            .await?
            .unwrap_or_default();
        info!(
            sessions = record.sessions.len(),
            top_k = record.top_k.get(),
            "Chat state restored"
        );

        let registry = SessionRegistry::from_entries(record.sessions);
        Ok(Self {
            inner: Arc::new(ChatContext {
                reconciler: SessionReconciler::new(backend.clone()),
                backend,
                store,
                state: Mutex::new(SessionState::with_registry(registry)),
                top_k: AtomicU8::new(record.top_k.get()),
                sending: AtomicBool::new(false),
                persist_lock: Mutex::new(()),
            }),
        })
    }

    /// Send one turn.
    ///
    /// The user message is appended before the request is issued and is
    /// never rolled back. Backend failures are reported in the conversation
    /// and as [`SendOutcome::Failed`].
    ///
    /// # Errors
    /// Returns `EmptyQuery` for a blank query and `SendInFlight` while
    /// another turn is pending.
    pub async fn send(&self, query: &str) -> ClientResult<SendOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ClientError::EmptyQuery);
        }
        let _guard = SendGuard::acquire(&self.inner.sending).ok_or(ClientError::SendInFlight)?;

        let (epoch, active) = {
            let mut state = self.inner.state.lock().await;
            state.messages.push(ChatMessage::user(query));
            (state.epoch(), state.session_id().cloned())
        };

        let request = ChatRequest {
            query: query.to_string(),
            session_id: active.clone(),
            top_k: self.top_k().get(),
        };
        debug!(session_id = ?active, epoch, "Sending chat turn");

        match self.inner.backend.chat(request).await {
            Ok(response) => {
                let session_id = response.session_id;
                let new_session = active.as_ref() != Some(&session_id);
                let current = {
                    let mut state = self.inner.state.lock().await;
                    if new_session {
                        state
                            .registry
                            .add(SessionSummary::new(session_id.clone(), derive_title(query)));
                    }
                    let current = state.epoch() == epoch;
                    if current {
                        if new_session {
                            state.registry.set_active(session_id.clone());
                        }
                        state
                            .messages
                            .push(ChatMessage::assistant(response.response, response.sources));
                    }
                    current
                };

                if new_session {
                    info!(session_id = %session_id, "Session started");
                    self.persist().await;
                }
                if current {
                    Ok(SendOutcome::Replied {
                        session_id,
                        new_session,
                    })
                } else {
                    debug!(session_id = %session_id, "Discarding reply for a closed conversation");
                    Ok(SendOutcome::Discarded)
                }
            }
            Err(err) => {
                warn!(session_id = ?active, error = %err, "Chat turn failed");
                let mut state = self.inner.state.lock().await;
                if state.epoch() != epoch {
                    return Ok(SendOutcome::Discarded);
                }
                state.messages.push(ChatMessage::notice(err.user_message()));
                Ok(SendOutcome::Failed(err))
            }
        }
    }

    /// Delete the active session on the backend and reset the conversation.
    ///
    /// A session the backend already forgot counts as deleted. Without an
    /// active session only local state is reset. The session stays listed;
    /// use [`Self::remove_session`] to forget it.
    ///
    /// # Errors
    /// Returns the backend error; local state is left untouched.
    pub async fn clear(&self) -> ClientResult<()> {
        let active = self.inner.state.lock().await.session_id().cloned();
        let Some(id) = active else {
            self.inner.state.lock().await.switch_conversation(None);
            return Ok(());
        };

        match self.inner.backend.delete_session(id.clone()).await {
            Ok(_) | Err(ClientError::SessionExpired { .. }) => {}
            Err(err) => {
                warn!(session_id = %id, error = %err, "Session deletion failed");
                return Err(err);
            }
        }

        {
            let mut state = self.inner.state.lock().await;
            if state.session_id() == Some(&id) {
                state.switch_conversation(None);
            }
        }
        info!(session_id = %id, "Session cleared");
        Ok(())
    }

    /// Start a fresh conversation without contacting the backend.
    pub async fn new_session(&self) {
        self.inner.state.lock().await.switch_conversation(None);
    }

    /// Switch to a listed (or any known) session.
    pub async fn select(&self, id: SessionId) -> SelectOutcome {
        self.inner.reconciler.select(&self.inner.state, id).await
    }

    /// Forget a session locally. Removing the active session also resets
    /// the conversation.
    pub async fn remove_session(&self, id: &SessionId) -> bool {
        let removed = {
            let mut state = self.inner.state.lock().await;
            if state.session_id() == Some(id) {
                state.switch_conversation(None);
            }
            state.registry.remove(id).is_some()
        };
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Update the result-count preference, returning the clamped value.
    pub async fn set_top_k(&self, value: u8) -> TopK {
        let top_k = TopK::new(value);
        self.inner.top_k.store(top_k.get(), Ordering::Release);
        self.persist().await;
        top_k
    }

    /// Current result count.
    #[must_use]
    pub fn top_k(&self) -> TopK {
        TopK::new(self.inner.top_k.load(Ordering::Acquire))
    }

    /// Whether a chat turn is in flight.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.inner.sending.load(Ordering::Acquire)
    }

    /// Listed sessions, most recent first.
    pub async fn sessions(&self) -> Vec<SessionSummary> {
        self.inner.state.lock().await.registry.to_entries()
    }

    /// Copy of everything a view needs to render the chat.
    pub async fn snapshot(&self) -> ChatSnapshot {
        let state = self.inner.state.lock().await;
        ChatSnapshot {
            session_id: state.session_id().cloned(),
            messages: state.messages.clone(),
            sessions: state.registry.to_entries(),
            top_k: self.top_k(),
            loading: state.loading,
            sending: self.is_sending(),
        }
    }

    /// Write the durable record. Failures are logged, never surfaced.
    async fn persist(&self) {
        let _write = self.inner.persist_lock.lock().await;
        let record = ChatRecord {
            sessions: self.inner.state.lock().await.registry.to_entries(),
            top_k: self.top_k(),
        };
        if let Err(e) = save_record(self.inner.store.as_ref(), &record).await {
            warn!(error = %e, "Failed to persist chat state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::Notify;

    use crate::api::mock::{Call, Reply, ScriptedBackend, chat_reply, not_found, sid};
    use crate::api::types::{DeleteSessionResponse, MessageRole};
    use crate::session::state::EXPIRED_NOTICE;
    use crate::storage::kv_store::MemoryKvStore;

    async fn orchestrator(backend: &Arc<ScriptedBackend>) -> (ChatOrchestrator, Arc<MemoryKvStore>) {
        let store = Arc::new(MemoryKvStore::new());
        let chat = ChatOrchestrator::load(backend.clone(), store.clone())
            .await
            .unwrap();
        (chat, store)
    }

    async fn wait_for_call(backend: &ScriptedBackend, matches: impl Fn(&Call) -> bool + Copy) {
        while backend.count(matches) == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_first_send_adopts_and_registers_session() {
        let backend = ScriptedBackend::new();
        let gate = Arc::new(Notify::new());
        backend.chat.push(
            Reply::ok(chat_reply("Trois concerts", "concerts ce weekend", "sess-1"))
                .gated(gate.clone()),
        );
        let (chat, store) = orchestrator(&backend).await;

        let pending = {
            let chat = chat.clone();
            tokio::spawn(async move { chat.send("concerts ce weekend").await })
        };
        wait_for_call(&backend, |c| matches!(c, Call::Chat(_))).await;

        let before = chat.snapshot().await;
        assert_eq!(before.messages.len(), 1);
        assert_eq!(before.messages[0].role, MessageRole::User);
        assert!(before.sending);
        assert!(before.session_id.is_none());

        gate.notify_one();
        let outcome = pending.await.unwrap().unwrap();
        assert!(matches!(
            outcome,
            SendOutcome::Replied { ref session_id, new_session: true } if session_id.as_str() == "sess-1"
        ));

        let after = chat.snapshot().await;
        assert_eq!(after.messages.len(), 2);
        assert_eq!(after.messages[1].role, MessageRole::Assistant);
        assert_eq!(after.messages[1].sources.len(), 1);
        assert_eq!(after.sessions.len(), 1);
        assert_eq!(after.sessions[0].title, "concerts ce weekend");
        assert_eq!(after.session_id, Some(sid("sess-1")));
        assert!(!after.sending);

        match &backend.calls()[0] {
            Call::Chat(request) => {
                assert_eq!(request.session_id, None);
                assert_eq!(request.top_k, 5);
            }
            other => panic!("unexpected call {other:?}"),
        }

        let reloaded = ChatOrchestrator::load(backend.clone(), store).await.unwrap();
        let restored = reloaded.snapshot().await;
        assert_eq!(restored.sessions.len(), 1);
        assert!(restored.session_id.is_none());
        assert!(restored.messages.is_empty());
    }

    #[tokio::test]
    async fn test_follow_up_send_reuses_session() {
        let backend = ScriptedBackend::new();
        backend.chat.push(Reply::ok(chat_reply("a", "q1", "sess-1")));
        backend.chat.push(Reply::ok(chat_reply("b", "q2", "sess-1")));
        let (chat, _) = orchestrator(&backend).await;

        chat.send("q1").await.unwrap();
        let outcome = chat.send("q2").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Replied { new_session: false, .. }));

        let chats: Vec<_> = backend
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Chat(request) => Some(request.session_id),
                _ => None,
            })
            .collect();
        assert_eq!(chats, vec![None, Some(sid("sess-1"))]);
        assert_eq!(chat.sessions().await.len(), 1);
        assert_eq!(chat.snapshot().await.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_send_failure_appends_one_notice() {
        let backend = ScriptedBackend::new();
        backend
            .chat
            .push(Reply::err(ClientError::server(500, "Erreur lors du traitement")));
        let (chat, _) = orchestrator(&backend).await;

        let outcome = chat.send("concerts").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Failed(ClientError::Server { status: 500, .. })));

        let snapshot = chat.snapshot().await;
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].content, "concerts");
        assert!(snapshot.messages[1].is_notice());
        assert!(snapshot.messages[1].content.contains("Erreur lors du traitement"));
        assert!(snapshot.sessions.is_empty());
        assert!(!snapshot.sending);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let backend = ScriptedBackend::new();
        let (chat, _) = orchestrator(&backend).await;

        assert!(matches!(chat.send("   ").await, Err(ClientError::EmptyQuery)));
        assert!(backend.calls().is_empty());
        assert!(chat.snapshot().await.messages.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_send_is_rejected() {
        let backend = ScriptedBackend::new();
        let gate = Arc::new(Notify::new());
        backend
            .chat
            .push(Reply::ok(chat_reply("a", "first", "sess-1")).gated(gate.clone()));
        backend.chat.push(Reply::ok(chat_reply("b", "third", "sess-1")));
        let (chat, _) = orchestrator(&backend).await;

        let first = {
            let chat = chat.clone();
            tokio::spawn(async move { chat.send("first").await })
        };
        wait_for_call(&backend, |c| matches!(c, Call::Chat(_))).await;

        assert!(matches!(chat.send("second").await, Err(ClientError::SendInFlight)));
        assert_eq!(chat.snapshot().await.messages.len(), 1);

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert!(chat.send("third").await.is_ok());
        assert_eq!(backend.count(|c| matches!(c, Call::Chat(_))), 2);
    }

    #[tokio::test]
    async fn test_cancelled_send_releases_guard() {
        let backend = ScriptedBackend::new();
        let gate = Arc::new(Notify::new());
        backend
            .chat
            .push(Reply::ok(chat_reply("a", "first", "sess-1")).gated(gate));
        backend.chat.push(Reply::ok(chat_reply("b", "again", "sess-2")));
        let (chat, _) = orchestrator(&backend).await;

        let stuck = {
            let chat = chat.clone();
            tokio::spawn(async move { chat.send("first").await })
        };
        wait_for_call(&backend, |c| matches!(c, Call::Chat(_))).await;
        stuck.abort();
        let _ = stuck.await;

        assert!(!chat.is_sending());
        assert!(chat.send("again").await.is_ok());
    }

    #[tokio::test]
    async fn test_reply_after_new_session_is_discarded_but_registered() {
        let backend = ScriptedBackend::new();
        let gate = Arc::new(Notify::new());
        backend
            .chat
            .push(Reply::ok(chat_reply("late", "q", "sess-9")).gated(gate.clone()));
        let (chat, _) = orchestrator(&backend).await;

        let pending = {
            let chat = chat.clone();
            tokio::spawn(async move { chat.send("q").await })
        };
        wait_for_call(&backend, |c| matches!(c, Call::Chat(_))).await;
        chat.new_session().await;
        gate.notify_one();

        assert!(matches!(pending.await.unwrap().unwrap(), SendOutcome::Discarded));
        let snapshot = chat.snapshot().await;
        assert!(snapshot.messages.is_empty());
        assert!(snapshot.session_id.is_none());
        assert_eq!(snapshot.sessions[0].id, sid("sess-9"));
    }

    #[tokio::test]
    async fn test_clear_deletes_and_resets() {
        let backend = ScriptedBackend::new();
        backend.chat.push(Reply::ok(chat_reply("a", "q", "sess-1")));
        backend.deletes.push(Reply::ok(DeleteSessionResponse::default()));
        let (chat, _) = orchestrator(&backend).await;
        chat.send("q").await.unwrap();

        chat.clear().await.unwrap();
        let snapshot = chat.snapshot().await;
        assert!(snapshot.session_id.is_none());
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].id, sid("sess-1"));
        assert_eq!(
            backend.count(|c| matches!(c, Call::DeleteSession(id) if id.as_str() == "sess-1")),
            1
        );
    }

    #[tokio::test]
    async fn test_clear_failure_keeps_state() {
        let backend = ScriptedBackend::new();
        backend.chat.push(Reply::ok(chat_reply("a", "q", "sess-1")));
        backend
            .deletes
            .push(Reply::err(ClientError::Transport("refused".to_string())));
        let (chat, _) = orchestrator(&backend).await;
        chat.send("q").await.unwrap();

        assert!(chat.clear().await.is_err());
        let snapshot = chat.snapshot().await;
        assert_eq!(snapshot.session_id, Some(sid("sess-1")));
        assert_eq!(snapshot.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_expired_session_counts_as_deleted() {
        let backend = ScriptedBackend::new();
        backend.chat.push(Reply::ok(chat_reply("a", "q", "sess-1")));
        backend.deletes.push(Reply::err(not_found("sess-1")));
        let (chat, _) = orchestrator(&backend).await;
        chat.send("q").await.unwrap();

        chat.clear().await.unwrap();
        assert!(chat.snapshot().await.session_id.is_none());
    }

    #[tokio::test]
    async fn test_clear_without_session_is_local() {
        let backend = ScriptedBackend::new();
        backend.chat.push(Reply::err(ClientError::Transport("down".to_string())));
        let (chat, _) = orchestrator(&backend).await;
        chat.send("q").await.unwrap();

        chat.clear().await.unwrap();
        assert!(chat.snapshot().await.messages.is_empty());
        assert_eq!(backend.count(|c| matches!(c, Call::DeleteSession(_))), 0);
    }

    #[tokio::test]
    async fn test_select_expired_then_send_starts_new_session() {
        let backend = ScriptedBackend::new();
        backend.chat.push(Reply::ok(chat_reply("a", "q", "sess-x")));
        backend.sessions.push(Reply::err(not_found("sess-x")));
        backend.chat.push(Reply::ok(chat_reply("b", "encore", "sess-y")));
        let (chat, _) = orchestrator(&backend).await;
        chat.send("q").await.unwrap();
        chat.new_session().await;

        assert_eq!(chat.select(sid("sess-x")).await, SelectOutcome::Expired);
        let snapshot = chat.snapshot().await;
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.messages[0].content, EXPIRED_NOTICE);
        assert_eq!(snapshot.session_id, Some(sid("sess-x")));

        let outcome = chat.send("encore").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Replied { new_session: true, .. }));
        let snapshot = chat.snapshot().await;
        assert_eq!(snapshot.session_id, Some(sid("sess-y")));
        assert_eq!(snapshot.sessions.len(), 2);
        assert_eq!(snapshot.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_remove_session() {
        let backend = ScriptedBackend::new();
        backend.chat.push(Reply::ok(chat_reply("a", "one", "sess-1")));
        backend.chat.push(Reply::ok(chat_reply("b", "two", "sess-2")));
        let (chat, _) = orchestrator(&backend).await;
        chat.send("one").await.unwrap();
        chat.new_session().await;
        chat.send("two").await.unwrap();

        assert!(chat.remove_session(&sid("sess-1")).await);
        let snapshot = chat.snapshot().await;
        assert_eq!(snapshot.session_id, Some(sid("sess-2")));
        assert_eq!(snapshot.messages.len(), 2);

        assert!(chat.remove_session(&sid("sess-2")).await);
        let snapshot = chat.snapshot().await;
        assert!(snapshot.session_id.is_none());
        assert!(snapshot.messages.is_empty());
        assert!(snapshot.sessions.is_empty());
        assert!(!chat.remove_session(&sid("sess-2")).await);
    }

    #[tokio::test]
    async fn test_top_k_is_clamped_and_persisted() {
        let backend = ScriptedBackend::new();
        let (chat, store) = orchestrator(&backend).await;

        assert_eq!(chat.set_top_k(42).await.get(), 20);
        let reloaded = ChatOrchestrator::load(backend.clone(), store).await.unwrap();
        assert_eq!(reloaded.top_k().get(), 20);
    }
}
