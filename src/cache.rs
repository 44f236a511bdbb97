//! Query cache for backend reads, with scope-wide invalidation.
//!
//! Entries expire on their own TTL; a finished task can also drop whole
//! scopes at once, and subscribers (the health monitor) are told about it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::api::types::{HealthResponse, SearchResponse};
use crate::core::config::CacheConfig;
use crate::evaluation::EvaluationReport;

/// Capacity of the invalidation broadcast channel.
const INVALIDATION_CHANNEL_CAPACITY: usize = 16;

/// Group of cached resources invalidated together.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum QueryScope {
    /// `GET /health`.
    Health,
    /// Every `POST /search` result.
    Search,
    /// Last evaluation report.
    Evaluation,
}

impl QueryScope {
    const fn index(self) -> usize {
        match self {
            Self::Health => 0,
            Self::Search => 1,
            Self::Evaluation => 2,
        }
    }
}

/// Key of a cached resource.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum QueryKey {
    /// Health snapshot.
    Health,
    /// Search results for a query and result count.
    Search {
        /// Normalized query text.
        query: String,
        /// Result count.
        top_k: u8,
    },
    /// Last evaluation report.
    Evaluation,
}

impl QueryKey {
    /// Build a search key, normalizing case and surrounding whitespace.
    #[must_use]
    pub fn search(query: &str, top_k: u8) -> Self {
        Self::Search {
            query: query.trim().to_lowercase(),
            top_k,
        }
    }

    /// Scope this key belongs to.
    #[must_use]
    pub const fn scope(&self) -> QueryScope {
        match self {
            Self::Health => QueryScope::Health,
            Self::Search { .. } => QueryScope::Search,
            Self::Evaluation => QueryScope::Evaluation,
        }
    }
}

/// Cached payload.
#[derive(Clone, Debug)]
enum CachedValue {
    Health(HealthResponse),
    Search(SearchResponse),
    Evaluation(EvaluationReport),
}

/// Cache entry with TTL.
#[derive(Clone)]
struct CacheEntry {
    data: CachedValue,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(data: CachedValue, ttl: Option<Duration>) -> Self {
        Self {
            data,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() > at)
    }
}

/// Thread-safe cache for backend reads.
pub struct QueryCache {
    config: CacheConfig,
    entries: DashMap<QueryKey, CacheEntry>,
    invalidations: [AtomicU64; 3],
    notifier: broadcast::Sender<QueryScope>,
}

impl QueryCache {
    /// Create a new cache with the given configuration.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let (notifier, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
        Self {
            config,
            entries: DashMap::new(),
            invalidations: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            notifier,
        }
    }

    /// Subscribe to scope invalidations.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueryScope> {
        self.notifier.subscribe()
    }

    /// Get the cached health snapshot.
    #[must_use]
    pub fn get_health(&self) -> Option<HealthResponse> {
        match self.get(&QueryKey::Health)? {
            CachedValue::Health(health) => Some(health),
            _ => None,
        }
    }

    /// Cache a health snapshot.
    pub fn set_health(&self, health: &HealthResponse) {
        let ttl = Duration::from_secs(self.config.health_ttl_seconds);
        self.set(QueryKey::Health, CachedValue::Health(health.clone()), Some(ttl));
    }

    /// Get cached search results.
    #[must_use]
    pub fn get_search(&self, query: &str, top_k: u8) -> Option<SearchResponse> {
        match self.get(&QueryKey::search(query, top_k))? {
            CachedValue::Search(results) => Some(results),
            _ => None,
        }
    }

    /// Cache search results.
    pub fn set_search(&self, query: &str, top_k: u8, results: &SearchResponse) {
        if self.config.enabled {
            self.enforce_max_search_entries();
        }
        let ttl = Duration::from_secs(self.config.search_ttl_seconds);
        self.set(
            QueryKey::search(query, top_k),
            CachedValue::Search(results.clone()),
            Some(ttl),
        );
    }

    /// Get the last evaluation report.
    #[must_use]
    pub fn get_evaluation(&self) -> Option<EvaluationReport> {
        match self.get(&QueryKey::Evaluation)? {
            CachedValue::Evaluation(report) => Some(report),
            _ => None,
        }
    }

    /// Keep an evaluation report until the evaluation scope is invalidated.
    pub fn set_evaluation(&self, report: &EvaluationReport) {
        self.set(
            QueryKey::Evaluation,
            CachedValue::Evaluation(report.clone()),
            None,
        );
    }

    /// Drop every entry of a scope and notify subscribers.
    pub fn invalidate(&self, scope: QueryScope) {
        self.entries.retain(|key, _| key.scope() != scope);
        self.invalidations[scope.index()].fetch_add(1, Ordering::SeqCst);
        debug!(?scope, "Query scope invalidated");
        // No subscriber is not an error: the next read simply misses.
        let _ = self.notifier.send(scope);
    }

    /// How many times a scope has been invalidated.
    #[must_use]
    pub fn invalidation_count(&self, scope: QueryScope) -> u64 {
        self.invalidations[scope.index()].load(Ordering::SeqCst)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all entries without notifying.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn get(&self, key: &QueryKey) -> Option<CachedValue> {
        if !self.config.enabled {
            return None;
        }

        self.entries.get(key).and_then(|entry| {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                None
            } else {
                Some(entry.data.clone())
            }
        })
    }

    fn set(&self, key: QueryKey, data: CachedValue, ttl: Option<Duration>) {
        if !self.config.enabled {
            return;
        }
        self.entries.insert(key, CacheEntry::new(data, ttl));
    }

    /// Enforce the search entry limit, dropping expired entries first.
    fn enforce_max_search_entries(&self) {
        let search_len = || {
            self.entries
                .iter()
                .filter(|entry| entry.key().scope() == QueryScope::Search)
                .count()
        };

        if search_len() < self.config.max_search_entries {
            return;
        }

        self.entries.retain(|_, entry| !entry.is_expired());

        let overflow = (search_len() + 1).saturating_sub(self.config.max_search_entries);
        if overflow > 0 {
            let mut searches: Vec<(QueryKey, Option<Instant>)> = self
                .entries
                .iter()
                .filter(|entry| entry.key().scope() == QueryScope::Search)
                .map(|entry| (entry.key().clone(), entry.expires_at))
                .collect();
            searches.sort_by_key(|(_, expires_at)| *expires_at);
            for (key, _) in searches.into_iter().take(overflow) {
                self.entries.remove(&key);
            }
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::HealthStatus;

    fn health() -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            document_count: 812,
            embedding_dimension: 1024,
            active_sessions: 3,
            database: Some("connected".to_string()),
        }
    }

    fn search(query: &str) -> SearchResponse {
        SearchResponse {
            results: Vec::new(),
            query: query.to_string(),
        }
    }

    #[test]
    fn test_cache_health() {
        let cache = QueryCache::default();
        cache.set_health(&health());
        assert_eq!(cache.get_health().map(|h| h.document_count), Some(812));
    }

    #[test]
    fn test_search_key_is_normalized() {
        let cache = QueryCache::default();
        cache.set_search("  Concerts Nice ", 5, &search("concerts nice"));
        assert!(cache.get_search("concerts nice", 5).is_some());
        assert!(cache.get_search("concerts nice", 6).is_none());
    }

    #[test]
    fn test_invalidate_drops_only_scope() {
        let cache = QueryCache::default();
        cache.set_health(&health());
        cache.set_search("jazz", 5, &search("jazz"));

        cache.invalidate(QueryScope::Search);

        assert!(cache.get_health().is_some());
        assert!(cache.get_search("jazz", 5).is_none());
        assert_eq!(cache.invalidation_count(QueryScope::Search), 1);
        assert_eq!(cache.invalidation_count(QueryScope::Health), 0);
    }

    #[tokio::test]
    async fn test_invalidate_notifies_subscribers() {
        let cache = QueryCache::default();
        let mut rx = cache.subscribe();
        cache.invalidate(QueryScope::Health);
        assert_eq!(rx.recv().await.ok(), Some(QueryScope::Health));
    }

    #[test]
    fn test_cache_disabled() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = QueryCache::new(config);
        cache.set_health(&health());
        assert!(cache.get_health().is_none());
    }

    #[test]
    fn test_search_entries_are_capped() {
        let config = CacheConfig {
            max_search_entries: 2,
            ..CacheConfig::default()
        };
        let cache = QueryCache::new(config);
        cache.set_search("a", 5, &search("a"));
        cache.set_search("b", 5, &search("b"));
        cache.set_search("c", 5, &search("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get_search("c", 5).is_some());
    }
}
