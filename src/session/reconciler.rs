//! Session selection against the authoritative backend history.
//!
//! Selecting a session optimistically makes it active, then replaces the
//! buffer with the server history. A response is applied only if the
//! conversation is still the one it was issued for when it resolves.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::backend::RagBackend;
use crate::api::types::SessionResponse;
use crate::core::errors::ClientError;
use crate::core::ids::SessionId;
use crate::session::state::{ChatMessage, EXPIRED_NOTICE, SessionState};

/// Result of a selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectOutcome {
    /// The session was already active; nothing was fetched.
    AlreadyActive,
    /// History restored.
    Restored {
        /// Number of restored turns.
        messages: usize,
    },
    /// The backend no longer knows the session; an expiry notice is shown.
    Expired,
    /// The history could not be fetched for another reason.
    Unavailable {
        /// What went wrong.
        reason: String,
    },
    /// The conversation changed before the fetch resolved; response dropped.
    Superseded,
}

/// Fetches history for a selected session and applies it to [`SessionState`].
#[derive(Clone)]
pub struct SessionReconciler {
    backend: Arc<dyn RagBackend>,
}

impl SessionReconciler {
    /// Reconcile against `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn RagBackend>) -> Self {
        Self { backend }
    }

    /// Make `id` the active session and load its history.
    ///
    /// Never retries: a missing session stays missing.
    pub async fn select(&self, state: &Mutex<SessionState>, id: SessionId) -> SelectOutcome {
        let (epoch, listed_at) = {
            let mut guard = state.lock().await;
            if guard.session_id() == Some(&id) {
                debug!(session_id = %id, "Session already active");
                return SelectOutcome::AlreadyActive;
            }
            let epoch = guard.switch_conversation(Some(id.clone()));
            guard.loading = true;
            (epoch, guard.registry.get(&id).map(|entry| entry.created_at))
        };

        debug!(session_id = %id, epoch, "Fetching session history");
        let result = self.backend.get_session(id.clone()).await;

        let mut guard = state.lock().await;
        if guard.epoch() != epoch || guard.session_id() != Some(&id) {
            debug!(session_id = %id, "Discarding history for superseded selection");
            return SelectOutcome::Superseded;
        }

        // Messages sent while the history was loading stay after it.
        let pending = std::mem::take(&mut guard.messages);
        let outcome = match result {
            Ok(session) => {
                let restored = restore_history(&session, listed_at);
                let count = restored.len();
                guard.messages = restored;
                debug!(session_id = %id, messages = count, "Session history restored");
                SelectOutcome::Restored { messages: count }
            }
            Err(ClientError::SessionExpired { detail, .. }) => {
                debug!(session_id = %id, %detail, "Selected session expired");
                guard.messages = vec![ChatMessage::notice(EXPIRED_NOTICE)];
                SelectOutcome::Expired
            }
            Err(err) => {
                warn!(session_id = %id, error = %err, "Session history unavailable");
                guard.messages = vec![ChatMessage::notice(format!(
                    "Unable to load this conversation. {}",
                    err.user_message()
                ))];
                SelectOutcome::Unavailable {
                    reason: err.to_string(),
                }
            }
        };
        guard.messages.extend(pending);
        guard.loading = false;
        outcome
    }
}

/// Convert server history, stamping every turn with one reference time.
fn restore_history(
    session: &SessionResponse,
    listed_at: Option<DateTime<Utc>>,
) -> Vec<ChatMessage> {
    let reference = session
        .created_at
        .as_deref()
        .and_then(parse_timestamp)
        .or(listed_at)
        .unwrap_or_else(Utc::now);

    session
        .history
        .iter()
        .map(|turn| ChatMessage::restored(turn.role, turn.content.clone(), reference))
        .collect()
}

/// Parse RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}
