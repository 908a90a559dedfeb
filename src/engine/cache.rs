// ── Engine: Entity View Cache ───────────────────────────────────────────────
// Process-wide, internally synchronized cache of serialized entity views,
// keyed by `(syn_id, view-shape)`.
//
// Behavior contract:
//   • TTL with uniform random jitter in [0, 120) s so entries populated
//     together do not expire together.
//   • Bounded capacity: expired entries are dropped first, then the oldest
//     insertions.
//   • Invalidation is by syn_id prefix — every view shape for the entity
//     goes at once.
//   • Never fails the caller: every accessor is infallible; anomalies are
//     indistinguishable from misses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;
use rand::Rng;

use crate::atoms::constants::{CACHE_KEY_PREFIX, CACHE_TTL_JITTER_SECS};
use crate::atoms::types::CacheStats;

struct CacheEntry {
    payload: String,
    inserted_at: Instant,
    expires_at: Instant,
}

pub struct EntityCache {
    inner: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EntityCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        EntityCache {
            inner: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache key for an entity view shape.
    pub fn view_key(syn_id: &str, include_identifiers: bool, include_aliases: bool) -> String {
        format!("{CACHE_KEY_PREFIX}{syn_id}:{include_identifiers}:{include_aliases}")
    }

    /// Fetch a cached payload. Expired entries count as misses and are
    /// dropped in place.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut map = self.inner.lock();
        match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.payload.clone())
            }
            Some(_) => {
                map.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a payload under the default TTL plus jitter.
    pub fn set(&self, key: &str, payload: String) {
        let jitter = Duration::from_secs(rand::thread_rng().gen_range(0..CACHE_TTL_JITTER_SECS));
        self.set_with_ttl(key, payload, self.ttl + jitter);
    }

    /// Store a payload with an explicit TTL (no jitter). Used directly by
    /// tests; production writes go through `set`.
    pub fn set_with_ttl(&self, key: &str, payload: String, ttl: Duration) {
        let now = Instant::now();
        let mut map = self.inner.lock();

        if map.len() >= self.capacity && !map.contains_key(key) {
            Self::evict(&mut map, self.capacity);
        }

        map.insert(
            key.to_string(),
            CacheEntry {
                payload,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
    }

    /// Drop every cached view of `syn_id`, regardless of view shape.
    /// Returns the number of keys removed.
    pub fn invalidate_entity(&self, syn_id: &str) -> usize {
        let prefix = format!("{CACHE_KEY_PREFIX}{syn_id}:");
        let mut map = self.inner.lock();
        let before = map.len();
        map.retain(|key, _| !key.starts_with(&prefix));
        let removed = before - map.len();
        if removed > 0 {
            debug!("[cache] Invalidated {removed} view(s) for {syn_id}");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let map = self.inner.lock();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            total_keys: map.len(),
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            memory_used_bytes: map
                .iter()
                .map(|(k, v)| k.len() + v.payload.len())
                .sum(),
        }
    }

    /// Make room: expired entries first, then oldest insertions until the
    /// map is strictly below capacity.
    fn evict(map: &mut HashMap<String, CacheEntry>, capacity: usize) {
        let now = Instant::now();
        map.retain(|_, entry| entry.expires_at > now);

        while map.len() >= capacity {
            let Some(oldest) = map
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            map.remove(&oldest);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> EntityCache {
        EntityCache::new(Duration::from_secs(60), 8)
    }

    #[test]
    fn test_set_get_round_trip() {
        let c = cache();
        let key = EntityCache::view_key("CO_X", true, true);
        c.set(&key, "payload".into());
        assert_eq!(c.get(&key), Some("payload".into()));
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let c = cache();
        c.set_with_ttl("ontology:entity:CO_X:true:true", "stale".into(), Duration::ZERO);
        assert_eq!(c.get("ontology:entity:CO_X:true:true"), None);
        let stats = c.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_invalidate_is_wildcard_over_view_shapes() {
        let c = cache();
        c.set(&EntityCache::view_key("CO_X", true, true), "a".into());
        c.set(&EntityCache::view_key("CO_X", false, true), "b".into());
        c.set(&EntityCache::view_key("CO_Y", true, true), "c".into());

        assert_eq!(c.invalidate_entity("CO_X"), 2);
        assert_eq!(c.get(&EntityCache::view_key("CO_X", true, true)), None);
        assert!(c.get(&EntityCache::view_key("CO_Y", true, true)).is_some());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let c = EntityCache::new(Duration::from_secs(60), 2);
        c.set("ontology:entity:A:true:true", "1".into());
        c.set("ontology:entity:B:true:true", "2".into());
        c.set("ontology:entity:C:true:true", "3".into());
        assert!(c.stats().total_keys <= 2);
        // The newest entry always survives eviction.
        assert!(c.get("ontology:entity:C:true:true").is_some());
    }

    #[test]
    fn test_hit_rate() {
        let c = cache();
        c.set("ontology:entity:A:true:true", "1".into());
        assert!(c.get("ontology:entity:A:true:true").is_some());
        assert!(c.get("ontology:entity:missing:true:true").is_none());
        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }
}
