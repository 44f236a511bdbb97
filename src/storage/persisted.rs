//! Versioned JSON records persisted in a [`KvStore`].
//!
//! Records are wrapped in `{"version": N, "state": ...}`. A record with an
//! unknown version or a corrupted body is skipped with a warning and the
//! caller starts from its default state.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::errors::ClientResult;
use crate::storage::kv_store::KvStore;

/// State that survives restarts under a fixed key.
pub trait DurableRecord: Serialize + DeserializeOwned {
    /// Storage key.
    const KEY: &'static str;
    /// Schema version written alongside the state.
    const VERSION: u32;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    state: &'a T,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    state: serde_json::Value,
}

/// Load a record, returning `None` when absent, stale or unreadable.
///
/// # Errors
/// Returns an error only if the store itself fails.
pub async fn load_record<R: DurableRecord>(store: &dyn KvStore) -> ClientResult<Option<R>> {
    let Some(raw) = store.get(R::KEY).await? else {
        return Ok(None);
    };

    let envelope: Envelope = match serde_json::from_str(&raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(key = R::KEY, error = %e, "Discarding corrupted record");
            return Ok(None);
        }
    };

    if envelope.version != R::VERSION {
        warn!(
            key = R::KEY,
            found = envelope.version,
            expected = R::VERSION,
            "Discarding record with unknown version"
        );
        return Ok(None);
    }

    match serde_json::from_value(envelope.state) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            warn!(key = R::KEY, error = %e, "Discarding record with invalid state");
            Ok(None)
        }
    }
}

/// Write a record under its key.
///
/// # Errors
/// Returns an error if serialization or the store fails.
pub async fn save_record<R: DurableRecord>(store: &dyn KvStore, record: &R) -> ClientResult<()> {
    let raw = serde_json::to_string(&EnvelopeRef {
        version: R::VERSION,
        state: record,
    })?;
    store.set(R::KEY, raw).await
}
