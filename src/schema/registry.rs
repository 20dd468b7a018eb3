use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::core::error::Result;
use crate::data::types::Type;
use crate::schema::schema::Schema;
use crate::storage::frame;

/// The layout history: for each layout name, every structure ever seen, most
/// recent first. Persisted on shutdown and loaded on startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeRegistry {
    entries: BTreeMap<String, Vec<Type>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry::default()
    }

    /// Registers a layout. A different-structure layout of a known name emits
    /// a warning unless the new layout is a superset of the old; either way
    /// the new layout becomes the current one.
    pub fn insert(&mut self, layout: Type) {
        let name = match layout.name() {
            Some(name) => name.to_string(),
            None => return,
        };
        let versions = self.entries.entry(name.clone()).or_default();
        match versions.first() {
            Some(current) if *current == layout => return,
            Some(current) => {
                if !is_superset(&layout, current) {
                    warn!(
                        layout = %name,
                        "incompatible redefinition of layout; queries spanning \
                         old and new events may miss fields"
                    );
                }
            }
            None => {}
        }
        versions.retain(|t| *t != layout);
        versions.insert(0, layout);
    }

    /// The current (most recent) layout for a name.
    pub fn current(&self, name: &str) -> Option<&Type> {
        self.entries.get(name).and_then(|v| v.first())
    }

    /// Every structure ever registered under a name, most recent first.
    pub fn history(&self, name: &str) -> &[Type] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A schema holding the current version of every layout.
    pub fn snapshot(&self) -> Schema {
        let mut schema = Schema::new();
        for versions in self.entries.values() {
            if let Some(current) = versions.first() {
                schema.add(current.clone());
            }
        }
        schema
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        frame::write_file(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        frame::read_file(path)
    }
}

/// Whether every leaf field of `old` appears in `new` with the same type.
fn is_superset(new: &Type, old: &Type) -> bool {
    let new_leaves = new.leaves();
    old.leaves()
        .iter()
        .all(|(path, ty)| new_leaves.iter().any(|(p, t)| p == path && t == ty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::RecordField;

    fn layout(name: &str, fields: &[&str]) -> Type {
        Type::record(
            fields
                .iter()
                .map(|f| RecordField::new(*f, Type::string()))
                .collect(),
        )
        .with_name(name)
    }

    #[test]
    fn insert_keeps_most_recent_first() {
        let mut registry = TypeRegistry::new();
        let v1 = layout("flow", &["src"]);
        let v2 = layout("flow", &["src", "dst"]);
        registry.insert(v1.clone());
        registry.insert(v2.clone());
        assert_eq!(registry.current("flow"), Some(&v2));
        assert_eq!(registry.history("flow"), &[v2, v1]);
    }

    #[test]
    fn reinserting_current_is_a_no_op() {
        let mut registry = TypeRegistry::new();
        let v1 = layout("flow", &["src"]);
        registry.insert(v1.clone());
        registry.insert(v1.clone());
        assert_eq!(registry.history("flow").len(), 1);
    }

    #[test]
    fn superset_detection() {
        let old = layout("flow", &["src"]);
        let new = layout("flow", &["src", "dst"]);
        assert!(is_superset(&new, &old));
        assert!(!is_superset(&old, &new));
    }

    #[test]
    fn snapshot_holds_current_layouts() {
        let mut registry = TypeRegistry::new();
        registry.insert(layout("a", &["x"]));
        registry.insert(layout("b", &["y"]));
        registry.insert(layout("a", &["x", "z"]));
        let schema = registry.snapshot();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.find("a"), Some(&layout("a", &["x", "z"])));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("type-registry.bin");
        let mut registry = TypeRegistry::new();
        registry.insert(layout("flow", &["src", "dst"]));
        registry.save(&path).unwrap();
        let loaded = TypeRegistry::load(&path).unwrap();
        assert_eq!(loaded.current("flow"), registry.current("flow"));
    }
}
