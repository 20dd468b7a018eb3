use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::core::error::Result;
use crate::core::ids::IdSet;
use crate::data::slice::TableSlice;
use crate::storage::frame;

/// An immutable, content-addressed blob of table slices. The UUID is
/// allocated when the active builder seals; the segment is written once and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub slices: Vec<TableSlice>,
}

impl Segment {
    /// The event ids covered by this segment.
    pub fn ids(&self) -> IdSet {
        self.slices.iter().map(|s| s.ids()).collect()
    }

    pub fn num_events(&self) -> u64 {
        self.slices.iter().map(TableSlice::len).sum()
    }

    /// The slices restricted to `selection`, in id order.
    pub fn extract(&self, selection: &IdSet) -> Vec<TableSlice> {
        self.slices
            .iter()
            .flat_map(|slice| slice.select(selection))
            .collect()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        frame::write_file(path, self)
    }

    pub fn load(path: &Path) -> Result<Segment> {
        frame::read_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::IdRange;
    use crate::data::types::{RecordField, Type};
    use crate::data::value::Value;

    fn slice(offset: u64, n: u64) -> TableSlice {
        let layout =
            Type::record(vec![RecordField::new("x", Type::count())]).with_name("test.ev");
        let rows = (0..n).map(|i| vec![Value::Count(offset + i)]).collect();
        TableSlice::new(layout, offset, rows).unwrap()
    }

    fn segment() -> Segment {
        Segment {
            id: Uuid::new_v4(),
            slices: vec![slice(0, 4), slice(10, 4)],
        }
    }

    #[test]
    fn ids_union_slice_ranges() {
        let seg = segment();
        assert_eq!(
            seg.ids().ranges(),
            &[IdRange::new(0, 4), IdRange::new(10, 14)]
        );
        assert_eq!(seg.num_events(), 8);
    }

    #[test]
    fn extract_restricts_to_selection() {
        let seg = segment();
        let picked = seg.extract(&IdSet::from_range(2, 12));
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].ids(), IdRange::new(2, 4));
        assert_eq!(picked[1].ids(), IdRange::new(10, 12));
    }

    #[test]
    fn disk_round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let seg = segment();
        let path = dir.path().join(seg.id.to_string());
        seg.write(&path).unwrap();
        let loaded = Segment::load(&path).unwrap();
        assert_eq!(loaded, seg);
    }
}
