use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::ids::{Id, IdRange, IdSet};
use crate::data::types::{qualified_fields, Type};
use crate::data::value::Value;

/// A batch of rows conforming to one record layout, covering a dense range of
/// event ids starting at `offset`. Row `i` carries id `offset + i`; columns
/// follow the layout's flattened field order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSlice {
    pub layout: Type,
    pub offset: Id,
    pub rows: Vec<Vec<Value>>,
}

impl TableSlice {
    pub fn new(layout: Type, offset: Id, rows: Vec<Vec<Value>>) -> Result<Self> {
        if !layout.is_record() || layout.name().is_none() {
            return Err(Error::new(
                ErrorKind::TypeClash,
                format!("table slice layout must be a named record, got {}", layout),
            ));
        }
        let arity = qualified_fields(&layout).len();
        for (i, row) in rows.iter().enumerate() {
            if row.len() != arity {
                return Err(Error::new(
                    ErrorKind::TypeClash,
                    format!(
                        "row {} has {} columns but layout {} has {} fields",
                        i,
                        row.len(),
                        layout,
                        arity
                    ),
                ));
            }
        }
        Ok(TableSlice {
            layout,
            offset,
            rows,
        })
    }

    pub fn len(&self) -> u64 {
        self.rows.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The half-open id interval covered by this slice.
    pub fn ids(&self) -> IdRange {
        IdRange::new(self.offset, self.offset + self.len())
    }

    /// Approximate in-memory weight, used for segment roll-over accounting.
    pub fn bytes(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(0)
    }

    /// Restricts the slice to the rows whose ids are in `selection`,
    /// producing one sub-slice per contiguous run.
    pub fn select(&self, selection: &IdSet) -> Vec<TableSlice> {
        let overlap = selection.intersection(&IdSet::from_range(self.offset, self.offset + self.len()));
        overlap
            .ranges()
            .iter()
            .map(|r| TableSlice {
                layout: self.layout.clone(),
                offset: r.lo,
                rows: self.rows[(r.lo - self.offset) as usize..(r.hi - self.offset) as usize]
                    .to_vec(),
            })
            .collect()
    }
}
