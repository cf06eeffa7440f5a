// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution Cache (C8, spec §4.8): fingerprint-keyed step memoization.
//!
//! A step result is memoized under a fingerprint derived from everything
//! that can affect its output: the pattern id/version, the step name, the
//! resolved capability, the resolved arguments, and the two pieces of
//! reproducibility context (`ctx.pricing_pack_id`, `ctx.ledger_commit_hash`).
//! There is deliberately no explicit invalidation API (spec §9 Open
//! Question resolution: correctness comes from the fingerprint design, not
//! from cache-busting). Eviction is by per-entry TTL and a process-wide LRU
//! ceiling on entry count.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use qpr_core::{content_hash, HashError, Value};
use serde::Serialize;
use tokio::sync::Mutex;

/// Everything that feeds a cache fingerprint (spec §4.8 "fingerprint
/// inputs").
#[derive(Debug, Clone, Serialize)]
pub struct FingerprintInputs<'a> {
    /// Owning pattern id.
    pub pattern_id: &'a str,
    /// Pattern content version/hash, so a pattern edit invalidates prior
    /// memoized results without an explicit bust.
    pub pattern_version: &'a str,
    /// Name of the step being memoized.
    pub step_name: &'a str,
    /// Resolved capability identifier invoked by the step.
    pub capability: &'a str,
    /// Fully resolved (post-template) argument value.
    pub resolved_args: &'a Value,
    /// Pricing pack snapshot in effect, if any.
    pub pricing_pack_id: Option<&'a str>,
    /// Ledger commit hash in effect, if any.
    pub ledger_commit_hash: Option<&'a str>,
}

/// Compute the fingerprint for a set of [`FingerprintInputs`].
pub fn fingerprint(inputs: &FingerprintInputs<'_>) -> Result<String, HashError> {
    content_hash(inputs)
}

struct Entry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
    last_used: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.ttl != Duration::ZERO && now.duration_since(self.inserted_at) >= self.ttl
    }
}

/// Process-wide, fingerprint-keyed step result cache.
///
/// `max_entries` bounds memory use: once the ceiling is hit, the least
/// recently used entry is evicted to make room for a new insert. A TTL of
/// [`Duration::ZERO`] on an entry disables expiry-based eviction for that
/// entry (it can still be LRU-evicted).
pub struct ExecutionCache {
    max_entries: usize,
    entries: Mutex<HashMap<String, Entry>>,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Fingerprint found and not expired.
    Hit,
    /// Fingerprint absent, or present but past its TTL.
    Miss,
}

impl ExecutionCache {
    /// Construct an empty cache bounded to `max_entries`.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up `key`. Returns `None` on miss or expiry, touching recency on
    /// a hit.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let expired = entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false);
        if expired {
            entries.remove(key);
            tracing::debug!(target: "qpr.cache", key, "entry expired");
            return None;
        }
        if let Some(entry) = entries.get_mut(key) {
            entry.last_used = now;
            tracing::debug!(target: "qpr.cache", key, "hit");
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Look up `key`, reporting whether it was a [`CacheOutcome::Hit`] or
    /// [`CacheOutcome::Miss`] alongside the value.
    pub async fn get_with_outcome(&self, key: &str) -> (CacheOutcome, Option<Value>) {
        match self.get(key).await {
            Some(v) => (CacheOutcome::Hit, Some(v)),
            None => (CacheOutcome::Miss, None),
        }
    }

    /// Insert or replace `key`. `ttl` of zero means the entry never expires
    /// by age, only by LRU pressure; a `ttl` of zero on the call site
    /// typically means the step declared no caching at all, in which case
    /// callers should not call `put` (spec §4.8 "ttl == 0 bypasses the
    /// cache entirely").
    pub async fn put(&self, key: String, value: Value, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            self.evict_lru(&mut entries);
        }
        entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                ttl,
                last_used: now,
            },
        );
    }

    fn evict_lru(&self, entries: &mut HashMap<String, Entry>) {
        if let Some(oldest_key) = entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())
        {
            tracing::debug!(target: "qpr.cache", key = %oldest_key, "evicted (LRU ceiling)");
            entries.remove(&oldest_key);
        }
    }

    /// Current number of live (not necessarily unexpired) entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// `true` if the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
