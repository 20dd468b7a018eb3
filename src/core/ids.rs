use serde::{Deserialize, Serialize};
use std::fmt;

/// A densely allocated 64-bit event identifier.
pub type Id = u64;

/// A half-open interval `[lo, hi)` of event ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdRange {
    pub lo: Id,
    pub hi: Id,
}

impl IdRange {
    pub fn new(lo: Id, hi: Id) -> Self {
        IdRange { lo, hi }
    }

    pub fn len(&self) -> u64 {
        self.hi.saturating_sub(self.lo)
    }

    pub fn is_empty(&self) -> bool {
        self.hi <= self.lo
    }

    pub fn contains(&self, id: Id) -> bool {
        self.lo <= id && id < self.hi
    }

    pub fn intersects(&self, other: &IdRange) -> bool {
        self.lo < other.hi && other.lo < self.hi
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {})", self.lo, self.hi)
    }
}

/// A canonicalised set of event ids, stored as disjoint sorted intervals.
///
/// Invariant: `ranges` is sorted by `lo`, contains no empty interval, and no
/// two intervals touch or overlap (adjacent intervals are coalesced).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSet {
    ranges: Vec<IdRange>,
}

impl IdSet {
    pub fn new() -> Self {
        IdSet { ranges: Vec::new() }
    }

    pub fn from_range(lo: Id, hi: Id) -> Self {
        let mut set = IdSet::new();
        set.insert(IdRange::new(lo, hi));
        set
    }

    pub fn insert(&mut self, range: IdRange) {
        if range.is_empty() {
            return;
        }
        self.ranges.push(range);
        Self::normalize(&mut self.ranges);
    }

    /// Restores the canonical form: sorted, disjoint, coalesced.
    fn normalize(ranges: &mut Vec<IdRange>) {
        ranges.retain(|r| !r.is_empty());
        ranges.sort_by_key(|r| r.lo);
        let mut merged: Vec<IdRange> = Vec::with_capacity(ranges.len());
        for r in ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if r.lo <= last.hi => last.hi = last.hi.max(r.hi),
                _ => merged.push(r),
            }
        }
        *ranges = merged;
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, id: Id) -> bool {
        // Find the last range starting at or before `id`.
        match self.ranges.binary_search_by_key(&id, |r| r.lo) {
            Ok(_) => true,
            Err(0) => false,
            Err(pos) => self.ranges[pos - 1].contains(id),
        }
    }

    /// The number of ids in the set.
    pub fn cardinality(&self) -> u64 {
        self.ranges.iter().map(IdRange::len).sum()
    }

    pub fn min(&self) -> Option<Id> {
        self.ranges.first().map(|r| r.lo)
    }

    pub fn max(&self) -> Option<Id> {
        self.ranges.last().map(|r| r.hi - 1)
    }

    pub fn ranges(&self) -> &[IdRange] {
        &self.ranges
    }

    pub fn union(&self, other: &IdSet) -> IdSet {
        let mut ranges = self.ranges.clone();
        ranges.extend_from_slice(&other.ranges);
        Self::normalize(&mut ranges);
        IdSet { ranges }
    }

    pub fn intersection(&self, other: &IdSet) -> IdSet {
        let mut result = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let a = &self.ranges[i];
            let b = &other.ranges[j];
            let lo = a.lo.max(b.lo);
            let hi = a.hi.min(b.hi);
            if lo < hi {
                result.push(IdRange::new(lo, hi));
            }
            if a.hi < b.hi {
                i += 1;
            } else {
                j += 1;
            }
        }
        IdSet { ranges: result }
    }

    pub fn difference(&self, other: &IdSet) -> IdSet {
        let mut result = Vec::new();
        let mut j = 0;
        for a in &self.ranges {
            let mut lo = a.lo;
            while j < other.ranges.len() && other.ranges[j].hi <= lo {
                j += 1;
            }
            let mut k = j;
            while k < other.ranges.len() && other.ranges[k].lo < a.hi {
                let b = &other.ranges[k];
                if b.lo > lo {
                    result.push(IdRange::new(lo, b.lo));
                }
                lo = lo.max(b.hi);
                if lo >= a.hi {
                    break;
                }
                k += 1;
            }
            if lo < a.hi {
                result.push(IdRange::new(lo, a.hi));
            }
        }
        IdSet { ranges: result }
    }

    pub fn intersects(&self, range: &IdRange) -> bool {
        if range.is_empty() {
            return false;
        }
        // Only the last interval starting below `range.hi` can intersect:
        // every earlier interval ends before it starts.
        let pos = self.ranges.partition_point(|r| r.lo < range.hi);
        pos > 0 && self.ranges[pos - 1].hi > range.lo
    }

    /// Iterates over every id in the set in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Id> + '_ {
        self.ranges.iter().flat_map(|r| r.lo..r.hi)
    }
}

impl FromIterator<IdRange> for IdSet {
    fn from_iter<I: IntoIterator<Item = IdRange>>(iter: I) -> Self {
        let mut ranges: Vec<IdRange> = iter.into_iter().collect();
        Self::normalize(&mut ranges);
        IdSet { ranges }
    }
}

impl fmt::Display for IdSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", r)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_canonicalizes() {
        let mut set = IdSet::new();
        set.insert(IdRange::new(10, 20));
        set.insert(IdRange::new(30, 40));
        set.insert(IdRange::new(20, 30));
        assert_eq!(set.ranges(), &[IdRange::new(10, 40)]);
        set.insert(IdRange::new(5, 5));
        assert_eq!(set.ranges(), &[IdRange::new(10, 40)]);
    }

    #[test]
    fn contains_and_cardinality() {
        let set: IdSet = [IdRange::new(0, 3), IdRange::new(10, 12)]
            .into_iter()
            .collect();
        assert!(set.contains(0));
        assert!(set.contains(2));
        assert!(!set.contains(3));
        assert!(set.contains(11));
        assert!(!set.contains(12));
        assert_eq!(set.cardinality(), 5);
    }

    #[test]
    fn union_merges_overlaps() {
        let a = IdSet::from_range(0, 10);
        let b: IdSet = [IdRange::new(5, 15), IdRange::new(20, 25)]
            .into_iter()
            .collect();
        let u = a.union(&b);
        assert_eq!(u.ranges(), &[IdRange::new(0, 15), IdRange::new(20, 25)]);
    }

    #[test]
    fn intersection_cuts_to_overlap() {
        let a: IdSet = [IdRange::new(0, 10), IdRange::new(20, 30)]
            .into_iter()
            .collect();
        let b = IdSet::from_range(5, 25);
        let i = a.intersection(&b);
        assert_eq!(i.ranges(), &[IdRange::new(5, 10), IdRange::new(20, 25)]);
    }

    #[test]
    fn difference_splits_ranges() {
        let a = IdSet::from_range(0, 10);
        let b = IdSet::from_range(3, 6);
        let d = a.difference(&b);
        assert_eq!(d.ranges(), &[IdRange::new(0, 3), IdRange::new(6, 10)]);
        // Subtracting a superset empties the set.
        assert!(a.difference(&IdSet::from_range(0, 100)).is_empty());
    }

    #[test]
    fn intersects_range() {
        let set: IdSet = [IdRange::new(10, 20), IdRange::new(40, 50)]
            .into_iter()
            .collect();
        assert!(set.intersects(&IdRange::new(15, 16)));
        assert!(set.intersects(&IdRange::new(0, 11)));
        assert!(set.intersects(&IdRange::new(45, 60)));
        assert!(!set.intersects(&IdRange::new(20, 40)));
        assert!(!set.intersects(&IdRange::new(50, 50)));
    }

    #[test]
    fn iter_yields_all_ids() {
        let set: IdSet = [IdRange::new(1, 3), IdRange::new(7, 9)]
            .into_iter()
            .collect();
        let ids: Vec<Id> = set.iter().collect();
        assert_eq!(ids, vec![1, 2, 7, 8]);
    }
}
