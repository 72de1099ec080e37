//! Fixed-capacity memo of response bodies keyed by request URL.
//!
//! Entries are evicted strictly in insertion order: once the ring is full,
//! each new URL replaces whichever URL occupies the next slot, regardless of
//! how recently it was read.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::FetchError;

#[derive(Debug)]
struct Ring {
    values: HashMap<String, Vec<u8>>,
    slots: Vec<Option<String>>,
    index: usize,
}

/// FIFO request cache shared by every provider adapter.
#[derive(Debug)]
pub struct RequestCache {
    ring: Mutex<Ring>,
}

impl RequestCache {
    /// Create a cache holding at most `capacity` responses.
    pub fn new(capacity: usize) -> Result<Self, FetchError> {
        if capacity == 0 {
            return Err(FetchError::InvalidCacheCapacity(capacity));
        }
        Ok(Self {
            ring: Mutex::new(Ring {
                values: HashMap::with_capacity(capacity),
                slots: vec![None; capacity],
                index: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // The ring is never left half-updated, so a poisoned lock is still usable.
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached body for `url`, if present.
    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        self.lock().values.get(url).cloned()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.lock().values.contains_key(url)
    }

    /// Store a body, evicting the entry in the next ring slot when full.
    pub fn add(&self, url: impl Into<String>, body: Vec<u8>) {
        let url = url.into();
        let mut ring = self.lock();

        // A racing miss may add the same URL twice; keep its original slot.
        if let Some(existing) = ring.values.get_mut(&url) {
            *existing = body;
            return;
        }

        let index = ring.index;
        if let Some(evicted) = ring.slots[index].take() {
            debug!("Evicting {} from request cache", evicted);
            ring.values.remove(&evicted);
        }
        ring.values.insert(url.clone(), body);
        ring.slots[index] = Some(url);
        ring.index = (index + 1) % ring.slots.len();
    }

    /// Drop every entry and rewind the ring.
    pub fn clear(&self) {
        let mut ring = self.lock();
        ring.values.clear();
        ring.slots.iter_mut().for_each(|slot| *slot = None);
        ring.index = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            RequestCache::new(0),
            Err(FetchError::InvalidCacheCapacity(0))
        ));
    }

    #[test]
    fn test_get_missing() {
        let cache = RequestCache::new(2).unwrap();
        assert_eq!(cache.get("http://a"), None);
        assert!(!cache.contains("http://a"));
    }

    #[test]
    fn test_add_and_get() {
        let cache = RequestCache::new(2).unwrap();
        cache.add("http://a", b"alpha".to_vec());

        assert_eq!(cache.get("http://a"), Some(b"alpha".to_vec()));
        assert!(cache.contains("http://a"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fifo_eviction_for_each_capacity() {
        for capacity in 1..=5 {
            let cache = RequestCache::new(capacity).unwrap();
            let urls: Vec<String> = (0..=capacity).map(|i| format!("http://u/{}", i)).collect();
            for url in &urls {
                cache.add(url.as_str(), url.as_bytes().to_vec());
            }

            assert!(!cache.contains(&urls[0]), "capacity {}", capacity);
            for url in &urls[1..] {
                assert_eq!(cache.get(url), Some(url.as_bytes().to_vec()));
            }
            assert_eq!(cache.len(), capacity);
        }
    }

    #[test]
    fn test_eviction_ignores_reads() {
        let cache = RequestCache::new(2).unwrap();
        cache.add("a", vec![1]);
        cache.add("b", vec![2]);
        // Reading "a" does not protect it: eviction is by insertion order.
        assert!(cache.get("a").is_some());
        cache.add("c", vec![3]);

        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_duplicate_add_keeps_slot() {
        let cache = RequestCache::new(2).unwrap();
        cache.add("a", vec![1]);
        cache.add("a", vec![9]);
        cache.add("b", vec![2]);

        assert_eq!(cache.get("a"), Some(vec![9]));
        assert!(cache.contains("b"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear_resets() {
        let cache = RequestCache::new(2).unwrap();
        cache.add("a", vec![1]);
        cache.add("b", vec![2]);
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 2);

        cache.add("c", vec![3]);
        cache.add("d", vec![4]);
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
    }

    #[test]
    fn test_concurrent_adds_stay_bounded() {
        let cache = Arc::new(RequestCache::new(8).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        cache.add(format!("t{}-{}", t, i), vec![t as u8]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 8);
    }
}
