use uuid::Uuid;

use crate::data::slice::TableSlice;
use crate::storage::segment::Segment;

/// The mutable accumulator behind the active segment. Its UUID is reserved
/// at construction and handed to the sealed segment, so it can never collide
/// with an already-sealed one.
#[derive(Debug)]
pub struct SegmentBuilder {
    id: Uuid,
    slices: Vec<TableSlice>,
    bytes: u64,
}

impl SegmentBuilder {
    pub fn new() -> Self {
        SegmentBuilder {
            id: Uuid::new_v4(),
            slices: Vec::new(),
            bytes: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn table_slice_bytes(&self) -> u64 {
        self.bytes
    }

    pub fn num_events(&self) -> u64 {
        self.slices.iter().map(TableSlice::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn slices(&self) -> &[TableSlice] {
        &self.slices
    }

    pub fn add(&mut self, slice: TableSlice) {
        self.bytes += slice.bytes();
        self.slices.push(slice);
    }

    /// Freezes the accumulated slices into an immutable segment and resets
    /// the builder with a fresh reserved UUID.
    pub fn seal(&mut self) -> Segment {
        let segment = Segment {
            id: self.id,
            slices: std::mem::take(&mut self.slices),
        };
        self.id = Uuid::new_v4();
        self.bytes = 0;
        segment
    }
}

impl Default for SegmentBuilder {
    fn default() -> Self {
        SegmentBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::{RecordField, Type};
    use crate::data::value::Value;

    fn slice(offset: u64) -> TableSlice {
        let layout =
            Type::record(vec![RecordField::new("x", Type::count())]).with_name("test.ev");
        TableSlice::new(layout, offset, vec![vec![Value::Count(offset)]]).unwrap()
    }

    #[test]
    fn seal_transfers_slices_and_rotates_the_id() {
        let mut builder = SegmentBuilder::new();
        let reserved = builder.id();
        builder.add(slice(0));
        builder.add(slice(1));
        assert!(builder.table_slice_bytes() > 0);
        let segment = builder.seal();
        assert_eq!(segment.id, reserved);
        assert_eq!(segment.num_events(), 2);
        assert!(builder.is_empty());
        assert_eq!(builder.table_slice_bytes(), 0);
        assert_ne!(builder.id(), reserved);
    }
}
