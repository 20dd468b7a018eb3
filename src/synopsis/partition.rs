use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::data::slice::TableSlice;
use crate::data::types::{qualified_fields, QualifiedField, Type};
use crate::synopsis::{Synopsis, SynopsisBuilder};

/// The complete summary of one partition: a synopsis per qualified field and
/// a fall-back synopsis per value type. A `None` slot records that the field
/// exists but carries no synopsis; such fields always count as potential
/// matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionSynopsis {
    pub field_synopses: BTreeMap<QualifiedField, Option<Synopsis>>,
    pub type_synopses: HashMap<Type, Option<Synopsis>>,
    pub events: u64,
}

impl PartitionSynopsis {
    /// Approximate heap weight, reported in status documents.
    pub fn memusage(&self) -> usize {
        bincode::serialized_size(self).unwrap_or(0) as usize
    }
}

/// Accumulates synopses while a partition is being filled; `seal` freezes
/// them when the shard rolls over.
#[derive(Debug)]
pub struct PartitionSynopsisBuilder {
    fp_rate: f64,
    fields: BTreeMap<QualifiedField, Option<SynopsisBuilder>>,
    types: HashMap<Type, Option<SynopsisBuilder>>,
    events: u64,
}

impl PartitionSynopsisBuilder {
    pub fn new(fp_rate: f64) -> Self {
        PartitionSynopsisBuilder {
            fp_rate,
            fields: BTreeMap::new(),
            types: HashMap::new(),
            events: 0,
        }
    }

    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn add_slice(&mut self, slice: &TableSlice) {
        let fields = qualified_fields(&slice.layout);
        for (column, field) in fields.iter().enumerate() {
            let field_entry = self
                .fields
                .entry(field.clone())
                .or_insert_with(|| SynopsisBuilder::for_type(&field.ty, self.fp_rate));
            let type_key = field.ty.strip_attributes();
            for row in &slice.rows {
                let value = &row[column];
                if let Some(builder) = field_entry {
                    builder.add(value);
                }
                let type_entry = self
                    .types
                    .entry(type_key.clone())
                    .or_insert_with(|| SynopsisBuilder::for_type(&type_key, self.fp_rate));
                if let Some(builder) = type_entry {
                    builder.add(value);
                }
            }
        }
        self.events += slice.len();
    }

    pub fn seal(self) -> PartitionSynopsis {
        PartitionSynopsis {
            field_synopses: self
                .fields
                .into_iter()
                .map(|(field, builder)| (field, builder.map(SynopsisBuilder::seal)))
                .collect(),
            type_synopses: self
                .types
                .into_iter()
                .map(|(ty, builder)| (ty, builder.map(SynopsisBuilder::seal)))
                .collect(),
            events: self.events,
        }
    }
}
