use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::error::{Error, ErrorKind, Result};

/// How deep concept references may nest before resolution gives up.
const MAX_CONCEPT_DEPTH: usize = 64;

/// A user-defined concept: a set of concrete field paths plus references to
/// other concepts whose fields are folded in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub fields: Vec<String>,
    pub concepts: Vec<String>,
}

/// User-defined mappings from concepts to sets of field paths, expanded
/// during expression resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Taxonomies {
    concepts: BTreeMap<String, Concept>,
}

impl Taxonomies {
    pub fn new() -> Self {
        Taxonomies::default()
    }

    pub fn add_concept(&mut self, name: impl Into<String>, concept: Concept) {
        self.concepts.insert(name.into(), concept);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.concepts.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    /// Resolves a concept name to the full set of member field paths,
    /// following nested concept references.
    pub fn expand(&self, name: &str) -> Result<Vec<String>> {
        let mut result = Vec::new();
        self.expand_into(name, &mut result, 0)?;
        result.sort();
        result.dedup();
        Ok(result)
    }

    fn expand_into(&self, name: &str, into: &mut Vec<String>, depth: usize) -> Result<()> {
        if depth > MAX_CONCEPT_DEPTH {
            return Err(Error::new(
                ErrorKind::RecursionLimitReached,
                format!("concept {:?} nests deeper than {}", name, MAX_CONCEPT_DEPTH),
            ));
        }
        let concept = match self.concepts.get(name) {
            Some(c) => c,
            None => return Ok(()),
        };
        into.extend(concept.fields.iter().cloned());
        for reference in &concept.concepts {
            self.expand_into(reference, into, depth + 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_nested_concepts() {
        let mut taxonomies = Taxonomies::new();
        taxonomies.add_concept(
            "net.src.ip",
            Concept {
                fields: vec!["zeek.conn.id.orig_h".into(), "flow.src_ip".into()],
                concepts: vec![],
            },
        );
        taxonomies.add_concept(
            "net.endpoint",
            Concept {
                fields: vec!["flow.host".into()],
                concepts: vec!["net.src.ip".into()],
            },
        );
        let fields = taxonomies.expand("net.endpoint").unwrap();
        assert_eq!(
            fields,
            vec!["flow.host", "flow.src_ip", "zeek.conn.id.orig_h"]
        );
    }

    #[test]
    fn unknown_concept_expands_to_nothing() {
        let taxonomies = Taxonomies::new();
        assert!(taxonomies.expand("nope").unwrap().is_empty());
    }

    #[test]
    fn cyclic_concepts_hit_the_recursion_limit() {
        let mut taxonomies = Taxonomies::new();
        taxonomies.add_concept(
            "a",
            Concept {
                fields: vec![],
                concepts: vec!["b".into()],
            },
        );
        taxonomies.add_concept(
            "b",
            Concept {
                fields: vec![],
                concepts: vec!["a".into()],
            },
        );
        let err = taxonomies.expand("a").unwrap_err();
        assert_eq!(err.kind, ErrorKind::RecursionLimitReached);
    }
}
