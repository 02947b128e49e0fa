//! # Cache Store
//!
//! The node-local store behind the validation pipeline. Reader-writer
//! discipline: lookups take the write half too (they touch access
//! counters), but all lock scopes are short and never span a suspension
//! point.
//!
//! Fail-open throughout: a poisoned lock or corrupt entry degrades to a
//! miss, never to a request failure.

use crate::config::{CacheConfig, EvictionPolicy};
use crate::entry::{CacheEntry, CacheKey, LayerOutcome};
use shared_bus::EventBus;
use shared_crypto::Signer;
use shared_types::{Clock, Identity, PolicyVersion, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tracing::{debug, warn};

/// Counter snapshot returned by [`ValidationCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    /// Lookups that returned a verified, fresh entry.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Entries evicted under capacity pressure.
    pub evictions: u64,
    /// Entries discarded because checksum or signature failed.
    pub integrity_failures: u64,
    /// Entries removed by TTL (lookup or sweep).
    pub expired_removed: u64,
    /// Current entry count.
    pub entries: usize,
}

/// The signed validation cache.
pub struct ValidationCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    config: CacheConfig,
    signer: Arc<dyn Signer>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
    actor: Identity,

    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    integrity_failures: AtomicU64,
    expired_removed: AtomicU64,
}

impl ValidationCache {
    /// Creates a cache with the given configuration and collaborators.
    #[must_use]
    pub fn new(
        config: CacheConfig,
        signer: Arc<dyn Signer>,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(config.max_entries.min(1024))),
            config,
            signer,
            clock,
            bus,
            actor: Identity::from("validation-cache"),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            integrity_failures: AtomicU64::new(0),
            expired_removed: AtomicU64::new(0),
        }
    }

    /// Looks up the verdict for `(layer, input, policy_version)`.
    ///
    /// Returns the verdict only if the entry is fresh AND its checksum and
    /// signature verify. A corrupt entry is discarded and
    /// `cache.integrity.failed` is emitted.
    #[must_use]
    pub fn get(
        &self,
        layer: &str,
        input: &Value,
        policy_version: PolicyVersion,
    ) -> Option<LayerOutcome> {
        let key = CacheKey::for_input(layer, input, policy_version);
        self.get_by_key(&key)
    }

    /// Keyed lookup; see [`ValidationCache::get`].
    #[must_use]
    pub fn get_by_key(&self, key: &CacheKey) -> Option<LayerOutcome> {
        let now = self.clock.now_ms();
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Cache lock poisoned; recovering");
                poisoned.into_inner()
            }
        };

        let outcome = match entries.get_mut(key) {
            None => None,
            Some(entry) if !entry.is_fresh(now) => {
                entries.remove(key);
                self.expired_removed.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                if entry.verify(key, self.signer.as_ref()) {
                    entry.last_accessed_ms = now;
                    entry.access_count += 1;
                    Some(entry.outcome.clone())
                } else {
                    self.integrity_failures.fetch_add(1, Ordering::Relaxed);
                    self.bus.emit_best_effort(
                        "cache.integrity.failed",
                        &self.actor,
                        Value::from([
                            ("key", Value::from(key.fingerprint())),
                            ("reason", Value::from("checksum or signature mismatch")),
                        ]),
                    );
                    entries.remove(key);
                    None
                }
            }
        };
        drop(entries);

        match outcome {
            Some(outcome) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.emit_key_event("cache.hit", key, None);
                Some(outcome)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.emit_key_event("cache.miss", key, None);
                None
            }
        }
    }

    /// Stores a signed verdict under `(layer, input, policy_version)`.
    ///
    /// The TTL is clamped to the configured maximum. If the cache is at
    /// capacity, one entry is evicted per the configured policy first.
    pub fn put(
        &self,
        layer: &str,
        input: &Value,
        policy_version: PolicyVersion,
        outcome: LayerOutcome,
        ttl_ms: Option<u64>,
    ) {
        let key = CacheKey::for_input(layer, input, policy_version);
        let ttl = self.config.effective_ttl(ttl_ms);
        let now = self.clock.now_ms();
        let entry = CacheEntry::seal(&key, outcome, ttl, now, self.signer.as_ref());

        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Cache lock poisoned; recovering");
                poisoned.into_inner()
            }
        };

        if entries.len() >= self.config.max_entries && !entries.contains_key(&key) {
            self.evict_one(&mut entries, now);
        }
        entries.insert(key.clone(), entry);
        drop(entries);

        self.emit_key_event("cache.set", &key, Some(ttl));
    }

    /// Drops every entry stored under the given policy version.
    ///
    /// Called when the policy version bumps; stale verdicts must never be
    /// served under a new rule set.
    pub fn invalidate(&self, policy_version: PolicyVersion) -> usize {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|key, _| key.policy_version != policy_version);
        let removed = before - entries.len();
        debug!(policy_version = policy_version.0, removed, "Cache invalidated");
        removed
    }

    /// Removes expired entries. Called by the background sweeper.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        let removed = before - entries.len();
        drop(entries);

        if removed > 0 {
            self.expired_removed
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "Cache sweep removed expired entries");
        }
        removed
    }

    /// Spawns the periodic sweep task. The handle is held (and aborted)
    /// by the runtime.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval = std::time::Duration::from_millis(cache.config.cleanup_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            expired_removed: self.expired_removed.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configuration this cache runs under.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn evict_one(&self, entries: &mut RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry>>, now: u64) {
        let victim = entries
            .iter()
            .min_by(|(_, a), (_, b)| {
                let sa = self.eviction_score(a, now);
                let sb = self.eviction_score(b, now);
                sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            self.bus.emit_best_effort(
                "cache.evicted",
                &self.actor,
                Value::from([
                    ("key", Value::from(key.fingerprint())),
                    ("reason", Value::from("capacity")),
                ]),
            );
        }
    }

    /// Lower score = first out.
    fn eviction_score(&self, entry: &CacheEntry, now: u64) -> f64 {
        let age_s = now.saturating_sub(entry.last_accessed_ms) as f64 / 1000.0;
        let recency = 1.0 / (1.0 + age_s);
        let frequency = (entry.access_count as f64).ln_1p();
        let remaining_s = (entry.remaining_ttl_ms(now) as f64 / 1000.0).max(0.001);

        match self.config.eviction {
            EvictionPolicy::Lru => recency,
            EvictionPolicy::Lfu => frequency,
            EvictionPolicy::Ttl => remaining_s,
            EvictionPolicy::Hybrid => {
                self.config.hybrid_alpha * recency
                    + self.config.hybrid_beta * frequency
                    + self.config.hybrid_gamma * (1.0 / remaining_s)
            }
        }
    }

    fn emit_key_event(&self, event_type: &str, key: &CacheKey, ttl_ms: Option<u64>) {
        let mut payload = Value::from([
            ("layer", Value::from(key.layer.as_str())),
            ("key", Value::from(key.fingerprint())),
            ("policy_version", Value::Int(key.policy_version.0 as i64)),
        ]);
        if let Some(ttl) = ttl_ms {
            payload.merge(Value::from([("ttl_ms", Value::Int(ttl as i64))]));
        }
        self.bus.emit_best_effort(event_type, &self.actor, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_bus::core_schemas;
    use shared_crypto::HmacSigner;
    use shared_types::ManualClock;

    fn fixture() -> (Arc<ValidationCache>, Arc<ManualClock>) {
        fixture_with(CacheConfig::default())
    }

    fn fixture_with(config: CacheConfig) -> (Arc<ValidationCache>, Arc<ManualClock>) {
        let clock = ManualClock::starting_at(1_000_000);
        let cache = Arc::new(ValidationCache::new(
            config,
            Arc::new(HmacSigner::new(b"test-key".to_vec(), "cache-test")),
            clock.clone(),
            Arc::new(EventBus::new(core_schemas())),
        ));
        (cache, clock)
    }

    fn input() -> Value {
        Value::from([("request", Value::from("payload"))])
    }

    #[test]
    fn test_put_get_round_trip() {
        let (cache, _) = fixture();
        cache.put(
            "consent",
            &input(),
            PolicyVersion(1),
            LayerOutcome::pass(Value::from([("ok", Value::Bool(true))])),
            None,
        );

        let got = cache.get("consent", &input(), PolicyVersion(1)).unwrap();
        assert!(got.passed);
        assert_eq!(got.payload.get_path("ok"), Some(&Value::Bool(true)));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_miss_on_unknown_key() {
        let (cache, _) = fixture();
        assert!(cache.get("consent", &input(), PolicyVersion(1)).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let (cache, clock) = fixture();
        cache.put(
            "l",
            &input(),
            PolicyVersion(1),
            LayerOutcome::pass(Value::Null),
            Some(1_000),
        );
        assert!(cache.get("l", &input(), PolicyVersion(1)).is_some());

        clock.advance(1_001);
        assert!(cache.get("l", &input(), PolicyVersion(1)).is_none());
        assert_eq!(cache.stats().expired_removed, 1);
    }

    #[test]
    fn test_policy_invalidation() {
        let (cache, _) = fixture();
        cache.put("a", &input(), PolicyVersion(1), LayerOutcome::pass(Value::Null), None);
        cache.put("b", &input(), PolicyVersion(1), LayerOutcome::pass(Value::Null), None);
        cache.put("a", &input(), PolicyVersion(2), LayerOutcome::pass(Value::Null), None);

        assert_eq!(cache.invalidate(PolicyVersion(1)), 2);
        assert!(cache.get("a", &input(), PolicyVersion(1)).is_none());
        assert!(cache.get("a", &input(), PolicyVersion(2)).is_some());
    }

    #[test]
    fn test_capacity_eviction() {
        let config = CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        };
        let (cache, _) = fixture_with(config);
        for i in 0..3 {
            cache.put(
                "l",
                &Value::Int(i),
                PolicyVersion(1),
                LayerOutcome::pass(Value::Null),
                None,
            );
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let config = CacheConfig {
            max_entries: 2,
            eviction: EvictionPolicy::Lru,
            ..CacheConfig::default()
        };
        let (cache, clock) = fixture_with(config);
        cache.put("l", &Value::Int(0), PolicyVersion(1), LayerOutcome::pass(Value::Null), None);
        cache.put("l", &Value::Int(1), PolicyVersion(1), LayerOutcome::pass(Value::Null), None);

        // Touch entry 0 so entry 1 is the LRU victim.
        clock.advance(10);
        assert!(cache.get("l", &Value::Int(0), PolicyVersion(1)).is_some());

        cache.put("l", &Value::Int(2), PolicyVersion(1), LayerOutcome::pass(Value::Null), None);
        assert!(cache.get("l", &Value::Int(0), PolicyVersion(1)).is_some());
        assert!(cache.get("l", &Value::Int(1), PolicyVersion(1)).is_none());
    }

    #[test]
    fn test_sweep_removes_expired() {
        let (cache, clock) = fixture();
        cache.put("l", &Value::Int(0), PolicyVersion(1), LayerOutcome::pass(Value::Null), Some(500));
        cache.put("l", &Value::Int(1), PolicyVersion(1), LayerOutcome::pass(Value::Null), Some(5_000));

        clock.advance(1_000);
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hit_events_emitted() {
        let (cache, _) = fixture();
        let mut sub = cache.bus.subscribe("cache.*");

        cache.put("l", &input(), PolicyVersion(1), LayerOutcome::pass(Value::Null), None);
        let _ = cache.get("l", &input(), PolicyVersion(1));

        let set_event = sub.try_recv().unwrap().unwrap();
        assert_eq!(set_event.event_type, "cache.set");
        let hit_event = sub.try_recv().unwrap().unwrap();
        assert_eq!(hit_event.event_type, "cache.hit");
    }
}
