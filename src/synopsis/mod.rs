//! Lossy per-field summaries consulted before any disk read.
//!
//! A synopsis answers `lookup(op, value)` with three outcomes: `Some(true)`
//! means the shard may contain a matching row (false positives allowed),
//! `Some(false)` means it cannot, and `None` means the synopsis does not
//! understand the operation and the shard must be treated as a match.

pub mod bloom;
pub mod boolean;
pub mod minmax;
pub mod partition;

use serde::{Deserialize, Serialize};

use crate::data::types::{Type, TypeKind};
use crate::data::value::Value;
use crate::expr::ast::RelOp;

pub use bloom::{BloomBuilder, BloomSynopsis};
pub use boolean::{BoolBuilder, BoolSynopsis};
pub use minmax::{MinMaxBuilder, MinMaxSynopsis};
pub use partition::{PartitionSynopsis, PartitionSynopsisBuilder};

/// An immutable synopsis, frozen at shard seal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Synopsis {
    Bloom(BloomSynopsis),
    MinMax(MinMaxSynopsis),
    Bool(BoolSynopsis),
}

impl Synopsis {
    pub fn lookup(&self, op: RelOp, value: &Value) -> Option<bool> {
        if value.is_null() {
            return None;
        }
        match self {
            Synopsis::Bloom(s) => s.lookup(op, value),
            Synopsis::MinMax(s) => s.lookup(op, value),
            Synopsis::Bool(s) => s.lookup(op, value),
        }
    }
}

/// The mutable, monotonic build side of a synopsis: `add` only ever widens
/// the set of matching values.
#[derive(Debug, Clone)]
pub enum SynopsisBuilder {
    Bloom(BloomBuilder),
    MinMax(MinMaxBuilder),
    Bool(BoolBuilder),
}

impl SynopsisBuilder {
    /// Picks the synopsis implementation for a field type. Returns `None`
    /// for types no synopsis understands; such fields always count as
    /// potential matches.
    pub fn for_type(ty: &Type, fp_rate: f64) -> Option<SynopsisBuilder> {
        match ty.kind() {
            TypeKind::String
            | TypeKind::Enumeration(_)
            | TypeKind::Address
            | TypeKind::Subnet => Some(SynopsisBuilder::Bloom(BloomBuilder::new(fp_rate))),
            TypeKind::Integer
            | TypeKind::Count
            | TypeKind::Real
            | TypeKind::Time
            | TypeKind::Duration => Some(SynopsisBuilder::MinMax(MinMaxBuilder::new())),
            TypeKind::Bool => Some(SynopsisBuilder::Bool(BoolBuilder::new())),
            TypeKind::List(elem) => SynopsisBuilder::for_type(elem, fp_rate),
            _ => None,
        }
    }

    pub fn add(&mut self, value: &Value) {
        // Container values contribute their elements.
        if let Value::List(elements) = value {
            for element in elements {
                self.add(element);
            }
            return;
        }
        if value.is_null() {
            return;
        }
        match self {
            SynopsisBuilder::Bloom(b) => b.add(value),
            SynopsisBuilder::MinMax(b) => b.add(value),
            SynopsisBuilder::Bool(b) => b.add(value),
        }
    }

    pub fn seal(self) -> Synopsis {
        match self {
            SynopsisBuilder::Bloom(b) => Synopsis::Bloom(b.seal()),
            SynopsisBuilder::MinMax(b) => Synopsis::MinMax(b.seal()),
            SynopsisBuilder::Bool(b) => Synopsis::Bool(b.seal()),
        }
    }
}
