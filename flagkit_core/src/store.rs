//! A thread-safe in-memory store for flag and segment configuration. The store is written by a
//! configuration updater (polling or streaming) and read concurrently by flag evaluation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::flag::FeatureFlag;
use crate::segment::Segment;

/// Read access to flag and segment configuration, as required by the evaluator.
pub trait DataStore: Send + Sync {
    /// Look up a flag by key.
    fn flag(&self, key: &str) -> Option<Arc<FeatureFlag>>;
    /// Look up a segment by key.
    fn segment(&self, key: &str) -> Option<Arc<Segment>>;
}

/// A versioned slot. Deletions leave a tombstone (`item: None`) so that stale upserts arriving
/// out of order cannot resurrect a deleted item.
#[derive(Debug)]
struct Slot<T> {
    version: u64,
    item: Option<Arc<T>>,
}

#[derive(Debug, Default)]
struct Inner {
    flags: HashMap<String, Slot<FeatureFlag>>,
    segments: HashMap<String, Slot<Segment>>,
}

/// `InMemoryFeatureStore` provides thread-safe (`Sync`) storage for flag and segment
/// configuration with concurrent access for readers and writers.
///
/// Items are immutable once stored and can only be replaced by a strictly newer version.
#[derive(Debug, Default)]
pub struct InMemoryFeatureStore {
    inner: RwLock<Inner>,
}

impl InMemoryFeatureStore {
    pub fn new() -> Self {
        InMemoryFeatureStore::default()
    }

    /// Replace the entire data set.
    pub fn init(&self, flags: Vec<FeatureFlag>, segments: Vec<Segment>) {
        let inner = Inner {
            flags: flags
                .into_iter()
                .map(|flag| {
                    let key = flag.key.clone();
                    (key, Slot { version: flag.version, item: Some(Arc::new(flag)) })
                })
                .collect(),
            segments: segments
                .into_iter()
                .map(|segment| {
                    let key = segment.key.clone();
                    (key, Slot { version: segment.version, item: Some(Arc::new(segment)) })
                })
                .collect(),
        };

        *self.write() = inner;
    }

    /// Insert or replace a flag. Versions that do not advance past the stored one (or its
    /// tombstone) are ignored.
    pub fn upsert_flag(&self, flag: FeatureFlag) {
        let mut inner = self.write();
        upsert(&mut inner.flags, flag.key.clone(), flag.version, Some(flag));
    }

    /// Insert or replace a segment, with the same versioning rule as flags.
    pub fn upsert_segment(&self, segment: Segment) {
        let mut inner = self.write();
        upsert(
            &mut inner.segments,
            segment.key.clone(),
            segment.version,
            Some(segment),
        );
    }

    /// Delete a flag, leaving a tombstone at `version`.
    pub fn delete_flag(&self, key: &str, version: u64) {
        let mut inner = self.write();
        upsert(&mut inner.flags, key.to_owned(), version, None);
    }

    /// Delete a segment, leaving a tombstone at `version`.
    pub fn delete_segment(&self, key: &str, version: u64) {
        let mut inner = self.write();
        upsert(&mut inner.segments, key.to_owned(), version, None);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        // Lock operations fail only on poisoning, and no code path panics while holding the
        // lock.
        self.inner.read().expect("feature store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("feature store lock poisoned")
    }
}

fn upsert<T>(slots: &mut HashMap<String, Slot<T>>, key: String, version: u64, item: Option<T>) {
    match slots.get_mut(&key) {
        Some(slot) if slot.version >= version => {}
        Some(slot) => {
            slot.version = version;
            slot.item = item.map(Arc::new);
        }
        None => {
            slots.insert(key, Slot { version, item: item.map(Arc::new) });
        }
    }
}

impl DataStore for InMemoryFeatureStore {
    fn flag(&self, key: &str) -> Option<Arc<FeatureFlag>> {
        self.read().flags.get(key).and_then(|slot| slot.item.clone())
    }

    fn segment(&self, key: &str) -> Option<Arc<Segment>> {
        self.read()
            .segments
            .get(key)
            .and_then(|slot| slot.item.clone())
    }
}
