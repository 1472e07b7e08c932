//! Idempotency-key cache for the intake side.
//!
//! Maps a client-supplied key to the [`AcceptedResponse`] of the first request
//! that used it. Entries never expire and are not persisted.
//!
//! Each entry also carries the envelope it promised to publish and a
//! [`PublishState`]. A request that wins [`IdempotencyCache::claim`] owns the
//! publish; everyone else replays its response. When that publish fails the
//! entry is marked [`PublishState::Failed`], and the next request for the key
//! takes it back with [`IdempotencyCache::reclaim_failed`] and republishes the
//! same envelope, so the client's stored correlation id stays valid.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use order_intake_core::{AcceptedResponse, OrderEnvelope};

/// Publish progress of a cached entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishState {
    /// The claim winner is publishing
    Pending,
    /// The envelope reached the queue
    Published,
    /// The last publish attempt failed; the next request may retry it
    Failed,
}

/// Snapshot of a cache entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedEntry {
    /// Response returned for every request with this key
    pub response: AcceptedResponse,
    /// Envelope promised by `response`, if the entry was claimed
    pub envelope: Option<OrderEnvelope>,
    /// Publish progress
    pub state: PublishState,
}

/// Result of [`IdempotencyCache::claim`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Claim {
    /// The caller inserted the entry and must publish
    Won,
    /// Another request holds the key
    Existing(CachedEntry),
}

/// Process-local idempotency cache over a lock-sharded map.
#[derive(Debug, Default)]
pub struct IdempotencyCache {
    entries: DashMap<String, CachedEntry>,
}

fn is_blank(key: &str) -> bool {
    key.trim().is_empty()
}

impl IdempotencyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the response stored for `key`.
    ///
    /// Blank keys are never looked up.
    #[must_use]
    pub fn try_get(&self, key: &str) -> Option<AcceptedResponse> {
        self.lookup(key).map(|entry| entry.response)
    }

    /// Returns the full entry for `key`.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<CachedEntry> {
        if is_blank(key) {
            return None;
        }
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Stores `response` for `key` unless a value already exists.
    ///
    /// First writer wins; later calls and blank keys are ignored.
    pub fn set(&self, key: &str, response: AcceptedResponse) {
        if is_blank(key) {
            return;
        }
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| CachedEntry {
                response,
                envelope: None,
                state: PublishState::Published,
            });
    }

    /// Atomically inserts a pending entry for `key` if none exists.
    ///
    /// Returns [`Claim::Won`] when this call inserted the entry, otherwise a
    /// snapshot of the entry that is already there. A blank key is never
    /// stored and always wins.
    pub fn claim(&self, key: &str, response: AcceptedResponse, envelope: OrderEnvelope) -> Claim {
        if is_blank(key) {
            return Claim::Won;
        }
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(existing) => Claim::Existing(existing.get().clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(CachedEntry {
                    response,
                    envelope: Some(envelope),
                    state: PublishState::Pending,
                });
                Claim::Won
            }
        }
    }

    /// Moves a failed entry back to pending and returns it.
    ///
    /// Returns `None` if the entry is missing or not failed, so only one
    /// caller gets to retry a given failure.
    pub fn reclaim_failed(&self, key: &str) -> Option<CachedEntry> {
        let mut entry = self.entries.get_mut(key)?;
        if entry.state != PublishState::Failed {
            return None;
        }
        entry.state = PublishState::Pending;
        Some(entry.value().clone())
    }

    /// Records that the envelope for `key` was published.
    pub fn mark_published(&self, key: &str) {
        self.set_state(key, PublishState::Published);
    }

    /// Records that publishing the envelope for `key` failed.
    pub fn mark_failed(&self, key: &str) {
        self.set_state(key, PublishState::Failed);
    }

    fn set_state(&self, key: &str, state: PublishState) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.state = state;
        }
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use order_intake_core::CorrelationId;
    use order_intake_core::environment::Clock;
    use order_intake_testing::{helpers, test_clock};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn response(id: &str) -> AcceptedResponse {
        AcceptedResponse::new(CorrelationId::new(id))
    }

    fn envelope() -> OrderEnvelope {
        helpers::envelope("O1", "C1", test_clock().now())
    }

    #[test]
    fn set_is_first_writer_wins() {
        let cache = IdempotencyCache::new();
        cache.set("k", response("first"));
        cache.set("k", response("second"));

        assert_eq!(cache.try_get("k"), Some(response("first")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn blank_keys_are_never_stored_or_found() {
        let cache = IdempotencyCache::new();
        cache.set("", response("a"));
        cache.set("   ", response("b"));

        assert!(cache.is_empty());
        assert_eq!(cache.try_get(""), None);
        assert_eq!(cache.try_get("\t"), None);
        assert_eq!(cache.claim(" ", response("c"), envelope()), Claim::Won);
        assert!(cache.is_empty());
    }

    #[test]
    fn claim_reports_existing_entry() {
        let cache = IdempotencyCache::new();
        assert_eq!(cache.claim("k", response("a"), envelope()), Claim::Won);

        match cache.claim("k", response("b"), envelope()) {
            Claim::Existing(entry) => {
                assert_eq!(entry.response, response("a"));
                assert_eq!(entry.state, PublishState::Pending);
            }
            Claim::Won => panic!("second claim must not win"),
        }
    }

    #[test]
    fn failed_entry_is_reclaimed_once() {
        let cache = IdempotencyCache::new();
        let promised = envelope();
        cache.claim("k", response("a"), promised.clone());

        assert_eq!(cache.reclaim_failed("k"), None);
        cache.mark_failed("k");

        let reclaimed = cache.reclaim_failed("k").expect("failed entry");
        assert_eq!(reclaimed.state, PublishState::Pending);
        assert_eq!(reclaimed.envelope, Some(promised));
        assert_eq!(cache.reclaim_failed("k"), None);

        cache.mark_published("k");
        assert_eq!(cache.lookup("k").unwrap().state, PublishState::Published);
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let cache = Arc::new(IdempotencyCache::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache.claim("shared", response(&i.to_string()), envelope())
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|claim| *claim == Claim::Won)
            .count();
        assert_eq!(winners, 1);
    }

    proptest! {
        #[test]
        fn stored_response_never_changes(writes in prop::collection::vec("[a-z]{1,8}", 1..20)) {
            let cache = IdempotencyCache::new();
            for id in &writes {
                cache.set("key", response(id));
            }
            prop_assert_eq!(cache.try_get("key"), Some(response(&writes[0])));
        }
    }
}
