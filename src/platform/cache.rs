//! Bounded LRU cache of compute capabilities keyed by physical identifier.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use prometheus::IntGauge;
use tracing::debug;

use crate::gpu::device::{ComputeCapability, DeviceIdentifier};

/// Where a cached lookup was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit,
    Miss,
}

/// Thread-safe capability cache.
///
/// The miss path runs `fetch` with the lock held, so a read-check-insert
/// sequence is atomic and concurrent lookups of one identifier fetch once.
/// An attached gauge always tracks the number of cached entries.
pub struct CapabilityCache {
    entries: Mutex<LruCache<DeviceIdentifier, ComputeCapability>>,
    size_gauge: Option<IntGauge>,
}

impl CapabilityCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            size_gauge: None,
        }
    }

    /// Like [`CapabilityCache::new`], reporting the entry count to `gauge`.
    pub fn with_gauge(capacity: usize, gauge: IntGauge) -> Self {
        gauge.set(0);
        Self {
            size_gauge: Some(gauge),
            ..Self::new(capacity)
        }
    }

    fn report_size(&self, len: usize) {
        if let Some(gauge) = &self.size_gauge {
            gauge.set(len as i64);
        }
    }

    /// Return the cached capability for `id`, or compute it with `fetch` and
    /// cache it. Errors are returned as-is and never cached.
    pub fn get_or_try_insert<E>(
        &self,
        id: &DeviceIdentifier,
        fetch: impl FnOnce() -> Result<ComputeCapability, E>,
    ) -> Result<(ComputeCapability, Lookup), E> {
        let mut entries = self.entries.lock();

        if let Some(cap) = entries.get(id) {
            debug!(device = %id, capability = %cap, "Capability cache hit");
            return Ok((*cap, Lookup::Hit));
        }

        let cap = fetch()?;
        if let Some((evicted, _)) = entries.push(id.clone(), cap) {
            if &evicted != id {
                debug!(device = %evicted, "Evicted least recently used capability");
            }
        }
        self.report_size(entries.len());
        debug!(device = %id, capability = %cap, "Capability cached");
        Ok((cap, Lookup::Miss))
    }

    /// Cached value for `id` without touching its recency.
    pub fn peek(&self, id: &DeviceIdentifier) -> Option<ComputeCapability> {
        self.entries.lock().peek(id).copied()
    }

    pub fn contains(&self, id: &DeviceIdentifier) -> bool {
        self.entries.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        self.report_size(entries.len());
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    fn fill(cache: &CapabilityCache, ids: impl Iterator<Item = u32>) {
        for i in ids {
            cache
                .get_or_try_insert::<Infallible>(&DeviceIdentifier::Index(i), || {
                    Ok(ComputeCapability::new(8, 0))
                })
                .unwrap();
        }
    }

    #[test]
    fn test_hit_after_miss() {
        let cache = CapabilityCache::new(8);
        let id = DeviceIdentifier::Index(0);
        let mut fetches = 0;

        for _ in 0..3 {
            cache
                .get_or_try_insert::<Infallible>(&id, || {
                    fetches += 1;
                    Ok(ComputeCapability::new(8, 6))
                })
                .unwrap();
        }
        assert_eq!(fetches, 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = CapabilityCache::new(8);
        fill(&cache, 0..8);
        assert_eq!(cache.len(), 8);

        // Touch 0 so that 1 becomes least recently used.
        fill(&cache, 0..1);
        fill(&cache, 8..9);

        assert_eq!(cache.len(), 8);
        assert!(cache.contains(&DeviceIdentifier::Index(0)));
        assert!(!cache.contains(&DeviceIdentifier::Index(1)));
        assert!(cache.contains(&DeviceIdentifier::Index(8)));
    }

    #[test]
    fn test_errors_not_cached() {
        let cache = CapabilityCache::new(8);
        let id = DeviceIdentifier::from("GPU-missing");

        let err = cache.get_or_try_insert(&id, || Err("not found"));
        assert_eq!(err.unwrap_err(), "not found");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_gauge_follows_inserts_and_clear() {
        let gauge = IntGauge::new("entries", "cached entries").unwrap();
        let cache = CapabilityCache::with_gauge(2, gauge.clone());

        fill(&cache, 0..3);
        assert_eq!(gauge.get(), 2);

        cache.clear();
        assert_eq!(gauge.get(), 0);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let cache = CapabilityCache::new(0);
        assert_eq!(cache.capacity(), 1);
        fill(&cache, 0..3);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&DeviceIdentifier::Index(2)));
    }
}
