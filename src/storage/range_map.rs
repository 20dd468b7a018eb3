use std::collections::BTreeMap;
use uuid::Uuid;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::ids::{Id, IdRange, IdSet};

/// Maps disjoint half-open id intervals to segment UUIDs.
#[derive(Debug, Default)]
pub struct RangeMap {
    entries: BTreeMap<Id, (Id, Uuid)>,
}

impl RangeMap {
    pub fn new() -> Self {
        RangeMap::default()
    }

    /// Registers an interval. Overlap with an existing interval violates the
    /// store's invariant and is rejected.
    pub fn insert(&mut self, range: IdRange, value: Uuid) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        let overlaps = |other: &IdRange| {
            Error::new(
                ErrorKind::Internal,
                format!("interval {} overlaps existing {}", range, other),
            )
        };
        if let Some((lo, (hi, _))) = self.entries.range(..range.hi).next_back() {
            let existing = IdRange::new(*lo, *hi);
            if existing.intersects(&range) {
                return Err(overlaps(&existing));
            }
        }
        self.entries.insert(range.lo, (range.hi, value));
        Ok(())
    }

    /// Drops every interval mapped to `value`.
    pub fn erase_value(&mut self, value: &Uuid) {
        self.entries.retain(|_, (_, v)| v != value);
    }

    pub fn lookup(&self, id: Id) -> Option<Uuid> {
        let (_, (hi, value)) = self.entries.range(..=id).next_back()?;
        (id < *hi).then_some(*value)
    }

    /// The sorted, duplicate-free set of values whose intervals intersect
    /// `selection`.
    pub fn select(&self, selection: &IdSet) -> Vec<Uuid> {
        let mut result: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|(lo, (hi, _))| selection.intersects(&IdRange::new(**lo, *hi)))
            .map(|(_, (_, value))| *value)
            .collect();
        result.sort_unstable();
        result.dedup();
        result
    }

    /// Every distinct value in the map, sorted.
    pub fn values(&self) -> Vec<Uuid> {
        let mut result: Vec<Uuid> = self.entries.values().map(|(_, v)| *v).collect();
        result.sort_unstable();
        result.dedup();
        result
    }

    /// The intervals mapped to `value`.
    pub fn intervals_of(&self, value: &Uuid) -> IdSet {
        self.entries
            .iter()
            .filter(|(_, (_, v))| v == value)
            .map(|(lo, (hi, _))| IdRange::new(*lo, *hi))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks the disjointness invariant; intervals are disjoint and sorted
    /// by construction, this guards against regressions.
    #[cfg(test)]
    fn is_disjoint(&self) -> bool {
        let mut prev_hi = 0;
        for (lo, (hi, _)) in &self.entries {
            if *lo < prev_hi {
                return false;
            }
            prev_hi = *hi;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_overlap() {
        let mut map = RangeMap::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        map.insert(IdRange::new(0, 10), a).unwrap();
        map.insert(IdRange::new(10, 20), b).unwrap();
        assert!(map.insert(IdRange::new(5, 15), b).is_err());
        assert!(map.insert(IdRange::new(19, 21), a).is_err());
        assert!(map.is_disjoint());
    }

    #[test]
    fn lookup_finds_covering_interval() {
        let mut map = RangeMap::new();
        let a = Uuid::new_v4();
        map.insert(IdRange::new(10, 20), a).unwrap();
        assert_eq!(map.lookup(10), Some(a));
        assert_eq!(map.lookup(19), Some(a));
        assert_eq!(map.lookup(20), None);
        assert_eq!(map.lookup(9), None);
    }

    #[test]
    fn select_returns_sorted_unique_values() {
        let mut map = RangeMap::new();
        let mut a = Uuid::new_v4();
        let mut b = Uuid::new_v4();
        if b < a {
            std::mem::swap(&mut a, &mut b);
        }
        map.insert(IdRange::new(0, 10), b).unwrap();
        map.insert(IdRange::new(10, 20), b).unwrap();
        map.insert(IdRange::new(30, 40), a).unwrap();
        let selection: IdSet = [IdRange::new(5, 15), IdRange::new(35, 36)]
            .into_iter()
            .collect();
        assert_eq!(map.select(&selection), vec![a, b]);
        assert!(map.select(&IdSet::from_range(20, 30)).is_empty());
    }

    #[test]
    fn erase_value_removes_every_interval() {
        let mut map = RangeMap::new();
        let a = Uuid::new_v4();
        map.insert(IdRange::new(0, 10), a).unwrap();
        map.insert(IdRange::new(20, 30), a).unwrap();
        assert_eq!(map.intervals_of(&a).cardinality(), 20);
        map.erase_value(&a);
        assert!(map.is_empty());
    }
}
