use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind, Result};
use crate::data::types::{Type, TypeKind};

/// A sequence of named types with unique names; the record layouts among
/// them describe the rows of a shard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    types: Vec<Type>,
}

impl Schema {
    pub fn new() -> Self {
        Schema { types: Vec::new() }
    }

    /// Adds a new type. Unnamed types, `none` types, and duplicate names are
    /// rejected.
    pub fn add(&mut self, t: Type) -> bool {
        let named = match t.name() {
            Some(name) => !name.is_empty(),
            None => false,
        };
        if !named || matches!(t.kind(), TypeKind::None) {
            return false;
        }
        if self.find(t.name().unwrap()).is_some() {
            return false;
        }
        self.types.push(t);
        true
    }

    pub fn find(&self, name: &str) -> Option<&Type> {
        self.types.iter().find(|t| t.name() == Some(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Type> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn clear(&mut self) {
        self.types.clear();
    }

    /// Merges two schemata; fails if both define a type of the same name with
    /// different structure.
    pub fn merge(s1: &Schema, s2: &Schema) -> Result<Schema> {
        let mut result = s2.clone();
        for t in &s1.types {
            match s2.find(t.name().unwrap_or_default()) {
                Some(u) if t != u => {
                    return Err(Error::new(
                        ErrorKind::Format,
                        format!(
                            "type clash: cannot accommodate two types with the same name: {}",
                            t.name().unwrap_or_default()
                        ),
                    ));
                }
                Some(_) => {}
                None => result.types.push(t.clone()),
            }
        }
        Ok(result)
    }

    /// Combines two schemata, preferring definitions from `s2` on name
    /// clashes.
    pub fn combine(s1: &Schema, s2: &Schema) -> Schema {
        let mut result = s1.clone();
        for t in &s2.types {
            if let Some(existing) = result
                .types
                .iter_mut()
                .find(|x| x.name() == t.name())
            {
                *existing = t.clone();
            } else {
                result.types.push(t.clone());
            }
        }
        result
    }

    /// The record layouts in this schema.
    pub fn layouts(&self) -> impl Iterator<Item = &Type> {
        self.types.iter().filter(|t| t.is_record())
    }
}
