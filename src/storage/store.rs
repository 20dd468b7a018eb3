use lru::LruCache;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::ids::IdSet;
use crate::data::slice::TableSlice;
use crate::storage::builder::SegmentBuilder;
use crate::storage::layout::DbLayout;
use crate::storage::segment::Segment;
use crate::storage::range_map::RangeMap;

/// Announcement of a freshly sealed segment, used by the engine to install
/// the matching partition synopsis into the meta-index.
#[derive(Debug, Clone)]
pub struct SealedPartition {
    pub id: Uuid,
    pub ids: IdSet,
    pub events: u64,
}

/// A content-addressed, append-only store of sealed segments with an
/// in-memory LRU of decoded segments and a range map from event-id intervals
/// to segment UUIDs.
pub struct SegmentStore {
    layout: DbLayout,
    max_segment_size: u64,
    num_events: u64,
    /// Maps event ids to candidate segments.
    segments: RangeMap,
    /// Keeps recently used segments decoded in memory.
    cache: LruCache<Uuid, Arc<Segment>>,
    /// Accumulates incoming slices until the size threshold seals them.
    builder: SegmentBuilder,
}

impl SegmentStore {
    /// Opens the store under `dir`, registering every segment found in
    /// `dir/segments/`. Unreadable segment files are skipped with a log so
    /// startup can continue.
    pub fn open(dir: &Path, max_segment_size: u64, cache_capacity: usize) -> Result<Self> {
        let layout = DbLayout::new(dir)?;
        let capacity = NonZeroUsize::new(cache_capacity).ok_or_else(|| {
            Error::new(ErrorKind::InvalidConfiguration, "segments-cached must be positive")
        })?;
        let mut store = SegmentStore {
            layout,
            max_segment_size,
            num_events: 0,
            segments: RangeMap::new(),
            cache: LruCache::new(capacity),
            builder: SegmentBuilder::new(),
        };
        store.register_segments()?;
        info!(
            segments = store.segments.len(),
            events = store.num_events,
            "segment store opened"
        );
        Ok(store)
    }

    fn register_segments(&mut self) -> Result<()> {
        for entry in fs::read_dir(&self.layout.segments_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let id = match name.to_str().and_then(|s| s.parse::<Uuid>().ok()) {
                Some(id) => id,
                None => continue,
            };
            match Segment::load(&entry.path()) {
                Ok(segment) => self.register_segment(&segment)?,
                Err(err) => {
                    warn!(segment = %id, %err, "skipping unreadable segment");
                }
            }
        }
        Ok(())
    }

    fn register_segment(&mut self, segment: &Segment) -> Result<()> {
        for range in segment.ids().ranges() {
            self.segments.insert(*range, segment.id)?;
        }
        self.num_events += segment.num_events();
        Ok(())
    }

    /// The reserved UUID of the segment under construction.
    pub fn active_id(&self) -> Uuid {
        self.builder.id()
    }

    /// Whether unwritten data is pending in the active builder.
    pub fn dirty(&self) -> bool {
        !self.builder.is_empty()
    }

    pub fn num_events(&self) -> u64 {
        self.num_events
    }

    pub fn num_segments(&self) -> usize {
        self.segments.values().len()
    }

    pub fn cached(&self, id: &Uuid) -> bool {
        self.cache.contains(id)
    }

    pub fn cached_segments(&self) -> Vec<Uuid> {
        self.cache.iter().map(|(id, _)| *id).collect()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Appends a slice to the active builder, sealing it when it crosses the
    /// configured size threshold. A zero-row slice changes no state.
    pub fn put(&mut self, slice: TableSlice) -> Result<Option<SealedPartition>> {
        if slice.is_empty() {
            return Ok(None);
        }
        self.builder.add(slice);
        if self.builder.table_slice_bytes() >= self.max_segment_size {
            return self.seal_active().map(Some);
        }
        Ok(None)
    }

    /// Seals the active builder regardless of its size; used at shutdown.
    pub fn flush(&mut self) -> Result<Option<SealedPartition>> {
        if !self.dirty() {
            return Ok(None);
        }
        self.seal_active().map(Some)
    }

    fn seal_active(&mut self) -> Result<SealedPartition> {
        let segment = self.builder.seal();
        let sealed = SealedPartition {
            id: segment.id,
            ids: segment.ids(),
            events: segment.num_events(),
        };
        segment.write(&self.layout.segment_path(&segment.id))?;
        self.register_segment(&segment)?;
        self.cache.put(segment.id, Arc::new(segment));
        debug!(segment = %sealed.id, events = sealed.events, "sealed active segment");
        Ok(sealed)
    }

    /// Loads a segment through the cache, evicting the least recently used
    /// entry when at capacity. A failed read is retried once before the
    /// error surfaces.
    pub fn load_segment(&mut self, id: &Uuid) -> Result<Arc<Segment>> {
        if let Some(segment) = self.cache.get(id) {
            return Ok(segment.clone());
        }
        let path = self.layout.segment_path(id);
        let segment = match Segment::load(&path) {
            Ok(segment) => segment,
            Err(err) if err.kind == ErrorKind::Filesystem => {
                warn!(segment = %id, %err, "segment read failed, retrying once");
                Segment::load(&path)?
            }
            Err(err) => return Err(err),
        };
        let segment = Arc::new(segment);
        self.cache.push(*id, segment.clone());
        Ok(segment)
    }

    /// The segment UUIDs whose intervals intersect `ids`, sorted.
    pub fn select(&self, ids: &IdSet) -> Vec<Uuid> {
        self.segments.select(ids)
    }

    /// Returns exactly the rows with ids in `ids`, drawn from sealed
    /// segments and the active builder's current slices.
    pub fn get(&mut self, ids: &IdSet) -> Result<Vec<TableSlice>> {
        let mut result = Vec::new();
        for id in self.segments.select(ids) {
            let segment = self.load_segment(&id)?;
            result.extend(segment.extract(ids));
        }
        for slice in self.builder.slices() {
            result.extend(slice.select(ids));
        }
        Ok(result)
    }

    /// Erases `ids` from every sealed segment they touch. A segment fully
    /// covered by `ids` is dropped: its file, range-map entries, and cache
    /// entry all go. A partially covered segment is rewritten without the
    /// overlap under its original UUID. Returns the dropped segment UUIDs so
    /// the caller can retire their synopses.
    pub fn erase(&mut self, ids: &IdSet) -> Result<Vec<Uuid>> {
        let mut dropped = Vec::new();
        for id in self.segments.select(ids) {
            let segment = self.load_segment(&id)?;
            let keep = segment.ids().difference(ids);
            if keep.is_empty() {
                fs::remove_file(self.layout.segment_path(&id))?;
                self.segments.erase_value(&id);
                self.cache.pop(&id);
                self.num_events -= segment.num_events();
                dropped.push(id);
                debug!(segment = %id, "dropped segment");
                continue;
            }
            let slices: Vec<TableSlice> = segment
                .slices
                .iter()
                .flat_map(|slice| slice.select(&keep))
                .collect();
            let rewritten = Segment { id, slices };
            rewritten.write(&self.layout.segment_path(&id))?;
            self.segments.erase_value(&id);
            self.num_events -= segment.num_events();
            self.register_segment(&rewritten)?;
            self.cache.put(id, Arc::new(rewritten));
            debug!(segment = %id, "rewrote segment without erased ids");
        }
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::IdRange;
    use crate::data::types::{RecordField, Type};
    use crate::data::value::Value;
    use tempfile::TempDir;

    fn slice(offset: u64, n: u64) -> TableSlice {
        let layout =
            Type::record(vec![RecordField::new("x", Type::count())]).with_name("test.ev");
        let rows = (0..n).map(|i| vec![Value::Count(offset + i)]).collect();
        TableSlice::new(layout, offset, rows).unwrap()
    }

    fn open(dir: &TempDir, max_bytes: u64, cached: usize) -> SegmentStore {
        SegmentStore::open(dir.path(), max_bytes, cached).unwrap()
    }

    #[test]
    fn put_seals_at_the_size_threshold() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, 1, 4);
        // Threshold of one byte: every put seals immediately.
        let sealed = store.put(slice(0, 10)).unwrap().unwrap();
        assert_eq!(sealed.ids.ranges(), &[IdRange::new(0, 10)]);
        assert_eq!(sealed.events, 10);
        assert!(!store.dirty());
        assert_ne!(store.active_id(), sealed.id);
    }

    #[test]
    fn zero_row_slice_changes_no_state() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, 1, 4);
        assert!(store.put(slice(0, 0)).unwrap().is_none());
        assert!(!store.dirty());
        assert_eq!(store.num_events(), 0);
    }

    #[test]
    fn get_sees_sealed_and_buffered_slices() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, u64::MAX, 4);
        store.put(slice(0, 10)).unwrap();
        // Still buffered in the active builder.
        assert!(store.dirty());
        let rows = store.get(&IdSet::from_range(3, 5)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ids(), IdRange::new(3, 5));
    }

    #[test]
    fn recovery_after_restart() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open(&dir, u64::MAX, 4);
            store.put(slice(0, 10)).unwrap();
            store.put(slice(10, 10)).unwrap();
            store.flush().unwrap().unwrap();
        }
        let mut store = open(&dir, u64::MAX, 4);
        assert_eq!(store.num_events(), 20);
        let rows = store.get(&IdSet::from_range(0, 20)).unwrap();
        let total: u64 = rows.iter().map(TableSlice::len).sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, 1, 3);
        let mut sealed = Vec::new();
        for i in 0..4 {
            sealed.push(store.put(slice(i * 10, 10)).unwrap().unwrap().id);
        }
        store.clear_cache();
        for id in [&sealed[0], &sealed[1], &sealed[2], &sealed[3], &sealed[0]] {
            store.load_segment(id).unwrap();
        }
        // Capacity 3 after touching u1,u2,u3,u4,u1: u2 is gone, MRU order
        // is u1, u4, u3.
        assert_eq!(
            store.cached_segments(),
            vec![sealed[0], sealed[3], sealed[2]]
        );
        assert!(!store.cached(&sealed[1]));
    }

    #[test]
    fn erase_drops_fully_covered_segments() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, 1, 4);
        let s1 = store.put(slice(0, 10)).unwrap().unwrap();
        let s2 = store.put(slice(10, 10)).unwrap().unwrap();
        let dropped = store.erase(&IdSet::from_range(0, 10)).unwrap();
        assert_eq!(dropped, vec![s1.id]);
        assert_eq!(store.num_events(), 10);
        assert!(store.get(&IdSet::from_range(0, 10)).unwrap().is_empty());
        assert!(!store.get(&IdSet::from_range(10, 20)).unwrap().is_empty());
        assert!(store.cached(&s2.id));
    }

    #[test]
    fn erase_rewrites_partially_covered_segments() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir, 1, 4);
        let s1 = store.put(slice(0, 10)).unwrap().unwrap();
        let dropped = store.erase(&IdSet::from_range(3, 6)).unwrap();
        assert!(dropped.is_empty());
        assert_eq!(store.num_events(), 7);
        let rows = store.get(&IdSet::from_range(0, 10)).unwrap();
        let ids: IdSet = rows.iter().map(|s| s.ids()).collect();
        assert_eq!(
            ids.ranges(),
            &[IdRange::new(0, 3), IdRange::new(6, 10)]
        );
        // The rewrite survives a restart under the same UUID.
        drop(store);
        let mut store = open(&dir, 1, 4);
        assert_eq!(store.num_events(), 7);
        assert_eq!(store.select(&IdSet::from_range(0, 10)), vec![s1.id]);
    }
}
