//! TTL cache with an injectable clock
//!
//! Price lookups are recomputed on every input change upstream, so the cache
//! only has to absorb bursts. The clock is a trait so expiry is testable
//! without sleeping.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub struct TtlCache<K, V> {
    entries: DashMap<K, (V, Instant)>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        let (value, stored_at) = entry.value();
        if self.clock.now().duration_since(*stored_at) < self.ttl {
            Some(value.clone())
        } else {
            drop(entry);
            self.entries.remove(key);
            None
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (value, self.clock.now()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Test clock advanced by hand
    pub struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        pub fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }
    }

    #[test]
    fn entry_survives_within_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache: TtlCache<&str, u64> = TtlCache::new(Duration::from_secs(30), clock.clone());

        cache.insert("celo", 29);
        clock.advance(Duration::from_secs(29));
        assert_eq!(cache.get(&"celo"), Some(29));
    }

    #[test]
    fn entry_expires_after_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache: TtlCache<&str, u64> = TtlCache::new(Duration::from_secs(30), clock.clone());

        cache.insert("celo", 29);
        clock.advance(Duration::from_secs(31));
        assert_eq!(cache.get(&"celo"), None);
        // expired entry is evicted, not just hidden
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_refreshes_age() {
        let clock = Arc::new(ManualClock::new());
        let cache: TtlCache<&str, u64> = TtlCache::new(Duration::from_secs(30), clock.clone());

        cache.insert("usdc", 1);
        clock.advance(Duration::from_secs(20));
        cache.insert("usdc", 1);
        clock.advance(Duration::from_secs(20));
        assert_eq!(cache.get(&"usdc"), Some(1));
    }
}
