//! Per-track memory: first/last sighting and cached enrichment results.
//!
//! Owned by the analysis pipeline. Cached identity and plate values follow a
//! last-known-good rule: only a fresh positive result replaces them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackRecord {
    pub track_id: u64,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub identity: Option<String>,
    pub plate: Option<String>,
    /// Set by the first `update_cache`; `None` means the track was never enriched.
    pub last_cache_update: Option<Instant>,
}

impl TrackRecord {
    fn new(track_id: u64, now: Instant) -> Self {
        Self {
            track_id,
            first_seen: now,
            last_seen: now,
            identity: None,
            plate: None,
            last_cache_update: None,
        }
    }

    /// Time since the track was first seen.
    pub fn dwell(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_seen)
    }
}

#[derive(Debug, Default)]
pub struct TrackStore {
    records: HashMap<u64, TrackRecord>,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, track_id: u64) -> Option<&TrackRecord> {
        self.records.get(&track_id)
    }

    /// Record a sighting. `first_seen` is set once and never moves while the track lives.
    pub fn touch(&mut self, track_id: u64, now: Instant) -> &TrackRecord {
        let record = self
            .records
            .entry(track_id)
            .or_insert_with(|| TrackRecord::new(track_id, now));
        record.last_seen = now;
        record
    }

    /// Merge enrichment results. `None` keeps the previous value.
    pub fn update_cache(
        &mut self,
        track_id: u64,
        identity: Option<String>,
        plate: Option<String>,
        now: Instant,
    ) {
        let record = self
            .records
            .entry(track_id)
            .or_insert_with(|| TrackRecord::new(track_id, now));
        if identity.is_some() {
            record.identity = identity;
        }
        if plate.is_some() {
            record.plate = plate;
        }
        record.last_cache_update = Some(now);
    }

    /// True once the track has been through enrichment at least once.
    pub fn has_cache(&self, track_id: u64) -> bool {
        self.records
            .get(&track_id)
            .is_some_and(|record| record.last_cache_update.is_some())
    }

    /// Drop records not seen for longer than `ttl`. Returns how many were removed.
    pub fn evict_idle(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| now.saturating_duration_since(record.last_seen) <= ttl);
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_keeps_first_seen() {
        let mut store = TrackStore::new();
        let t0 = Instant::now();
        store.touch(4, t0);
        let record = store.touch(4, t0 + Duration::from_secs(11));
        assert_eq!(record.first_seen, t0);
        assert_eq!(record.dwell(t0 + Duration::from_secs(11)), Duration::from_secs(11));
        assert!(!store.has_cache(4));
    }

    #[test]
    fn misses_never_clear_cached_values() {
        let mut store = TrackStore::new();
        let t0 = Instant::now();
        store.update_cache(1, Some("Alice".to_string()), None, t0);
        store.update_cache(1, None, Some("AB12CDE".to_string()), t0 + Duration::from_secs(1));
        store.update_cache(1, None, None, t0 + Duration::from_secs(2));

        let record = store.get(1).unwrap();
        assert_eq!(record.identity.as_deref(), Some("Alice"));
        assert_eq!(record.plate.as_deref(), Some("AB12CDE"));
        assert_eq!(record.last_cache_update, Some(t0 + Duration::from_secs(2)));
        assert!(store.has_cache(1));
    }

    #[test]
    fn fresher_positive_replaces_cache() {
        let mut store = TrackStore::new();
        let t0 = Instant::now();
        store.update_cache(1, Some("Alice".to_string()), None, t0);
        store.update_cache(1, Some("Bob".to_string()), None, t0);
        assert_eq!(store.get(1).unwrap().identity.as_deref(), Some("Bob"));
    }

    #[test]
    fn evicts_idle_tracks() {
        let mut store = TrackStore::new();
        let t0 = Instant::now();
        store.touch(1, t0);
        store.touch(2, t0 + Duration::from_secs(200));

        let removed = store.evict_idle(t0 + Duration::from_secs(301), Duration::from_secs(300));
        assert_eq!(removed, 1);
        assert!(store.get(1).is_none());
        assert_eq!(store.len(), 1);
    }
}
