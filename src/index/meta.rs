use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::error::Result;
use crate::data::types::{QualifiedField, TypeKind};
use crate::data::value::Value;
use crate::expr::ast::{Expression, MetaExtractor, Operand, Predicate, RelOp};
use crate::expr::eval::{evaluate_op, fqn_ends_with};
use crate::storage::frame;
use crate::synopsis::PartitionSynopsis;

/// The process-wide catalogue of partition synopses, keyed by partition
/// UUID. `lookup` prunes the candidate set for a query before any disk read:
/// it may return partitions without matches, but never misses a partition
/// that has one.
#[derive(Debug, Default)]
pub struct MetaIndex {
    synopses: BTreeMap<Uuid, PartitionSynopsis>,
}

impl MetaIndex {
    pub fn new() -> Self {
        MetaIndex::default()
    }

    pub fn insert(&mut self, partition: Uuid, synopsis: PartitionSynopsis) {
        self.synopses.insert(partition, synopsis);
    }

    pub fn erase(&mut self, partition: &Uuid) {
        self.synopses.remove(partition);
    }

    pub fn merge(&mut self, synopses: impl IntoIterator<Item = (Uuid, PartitionSynopsis)>) {
        for (partition, synopsis) in synopses {
            self.insert(partition, synopsis);
        }
    }

    pub fn len(&self) -> usize {
        self.synopses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.synopses.is_empty()
    }

    pub fn memusage(&self) -> usize {
        self.synopses.values().map(PartitionSynopsis::memusage).sum()
    }

    /// Every known partition, sorted. The lossy synopses cannot answer
    /// negations soundly, so negations fall back to this.
    fn all_partitions(&self) -> Vec<Uuid> {
        self.synopses.keys().copied().collect()
    }

    /// Returns the sorted, duplicate-free vector of partitions that may
    /// contain events matching `expr`. Expects a normalized expression.
    pub fn lookup(&self, expr: &Expression) -> Vec<Uuid> {
        let start = Instant::now();
        let result = self.lookup_impl(expr);
        debug_assert!(result.windows(2).all(|w| w[0] < w[1]));
        debug!(
            candidates = result.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "meta index lookup"
        );
        result
    }

    fn lookup_impl(&self, expr: &Expression) -> Vec<Uuid> {
        match expr {
            Expression::And(operands) => {
                let mut iter = operands.iter();
                let mut result = match iter.next() {
                    Some(first) => self.lookup_impl(first),
                    None => return self.all_partitions(),
                };
                for operand in iter {
                    if result.is_empty() {
                        return result;
                    }
                    let candidates = self.lookup_impl(operand);
                    if candidates.is_empty() {
                        return candidates;
                    }
                    inplace_intersect(&mut result, &candidates);
                }
                result
            }
            Expression::Or(operands) => {
                let mut result = Vec::new();
                for operand in operands {
                    let candidates = self.lookup_impl(operand);
                    if candidates.len() == self.synopses.len() {
                        return candidates;
                    }
                    inplace_unify(&mut result, &candidates);
                }
                result
            }
            // A synopsis may produce false positives; negating its answer
            // would turn them into false negatives.
            Expression::Not(_) => self.all_partitions(),
            Expression::Pred(predicate) => self.lookup_predicate(predicate),
        }
    }

    fn lookup_predicate(&self, predicate: &Predicate) -> Vec<Uuid> {
        let (extractor, op, value) = match (&predicate.lhs, &predicate.rhs) {
            (Operand::Data(value), rhs) if !matches!(rhs, Operand::Data(_)) => {
                (rhs, predicate.op.flip(), value)
            }
            (lhs, Operand::Data(value)) => (lhs, predicate.op, value),
            _ => {
                warn!(predicate = %predicate, "cannot process predicate");
                return self.all_partitions();
            }
        };
        match extractor {
            Operand::Meta(MetaExtractor::Type) => {
                // Type queries need no synopses, only the layout names.
                let mut result = Vec::new();
                for (partition, synopsis) in &self.synopses {
                    let matches = synopsis.field_synopses.keys().any(|field| {
                        evaluate_op(&Value::String(field.layout.clone()), op, value)
                    });
                    if matches {
                        result.push(*partition);
                    }
                }
                result
            }
            Operand::Meta(MetaExtractor::Field) => {
                let suffix = match value {
                    Value::String(s) => s,
                    _ => {
                        warn!("#field meta queries only support string comparisons");
                        return self.all_partitions();
                    }
                };
                let mut result = Vec::new();
                for (partition, synopsis) in &self.synopses {
                    let matching = synopsis
                        .field_synopses
                        .keys()
                        .any(|field| fqn_ends_with(&field.fqn(), suffix));
                    // Include on a positive operator with a match, or a
                    // negative operator without one.
                    if !op.is_negated() == matching {
                        result.push(*partition);
                    }
                }
                result
            }
            Operand::Field(name) => {
                self.search(op, value, |field| fqn_ends_with(&field.fqn(), name))
            }
            Operand::Type(ty) => {
                let mut result = if matches!(ty.kind(), TypeKind::None) {
                    self.search(op, value, |field| field.ty.name() == ty.name())
                } else {
                    self.search(op, value, |field| {
                        field.ty == *ty && field.ty.name().is_none()
                    })
                };
                // Compatibility with databases written when `timestamp` was
                // an attribute rather than a type name.
                if ty.name() == Some("timestamp") {
                    let extra =
                        self.search(op, value, |field| field.ty.has_attribute("timestamp"));
                    inplace_unify(&mut result, &extra);
                }
                result
            }
            Operand::Data(_) => {
                warn!(predicate = %predicate, "cannot process predicate");
                self.all_partitions()
            }
        }
    }

    /// Runs a synopsis lookup over every field matching `matches`, including
    /// a partition on the first positive or abstaining hit. A field without
    /// its own synopsis falls back to the synopsis of its type, and failing
    /// that counts as a hit.
    fn search(
        &self,
        op: RelOp,
        value: &Value,
        matches: impl Fn(&QualifiedField) -> bool,
    ) -> Vec<Uuid> {
        let mut result = Vec::new();
        for (partition, synopsis) in &self.synopses {
            for (field, field_synopsis) in &synopsis.field_synopses {
                if !matches(field) {
                    continue;
                }
                let verdict = match field_synopsis {
                    Some(s) => s.lookup(op, value),
                    None => match synopsis.type_synopses.get(&field.ty.strip_attributes()) {
                        Some(Some(s)) => s.lookup(op, value),
                        // No synopsis at any level: cannot rule the
                        // partition out.
                        _ => None,
                    },
                };
                if verdict != Some(false) {
                    result.push(*partition);
                    break;
                }
            }
        }
        result
    }

    // -- persistence ----------------------------------------------------------

    /// Writes one partition synopsis to `dir/<uuid>`.
    pub fn persist_partition(&self, dir: &Path, partition: &Uuid) -> Result<()> {
        if let Some(synopsis) = self.synopses.get(partition) {
            frame::write_file(&dir.join(partition.to_string()), synopsis)?;
        }
        Ok(())
    }

    /// Removes the persisted synopsis of a dropped partition.
    pub fn remove_partition_file(dir: &Path, partition: &Uuid) -> Result<()> {
        let path = dir.join(partition.to_string());
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Loads every synopsis under `dir`, skipping unreadable files with a
    /// log so startup can continue.
    pub fn load(dir: &Path) -> Result<MetaIndex> {
        let mut index = MetaIndex::new();
        if !dir.exists() {
            return Ok(index);
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let partition = match name.to_str().and_then(|s| s.parse::<Uuid>().ok()) {
                Some(uuid) => uuid,
                None => continue,
            };
            match frame::read_file::<PartitionSynopsis>(&entry.path()) {
                Ok(synopsis) => index.insert(partition, synopsis),
                Err(err) => {
                    warn!(partition = %partition, %err, "skipping unreadable partition synopsis");
                }
            }
        }
        Ok(index)
    }
}

/// Intersects two sorted vectors in place.
fn inplace_intersect(result: &mut Vec<Uuid>, other: &[Uuid]) {
    let mut j = 0;
    result.retain(|x| {
        while j < other.len() && other[j] < *x {
            j += 1;
        }
        j < other.len() && other[j] == *x
    });
}

/// Merges two sorted vectors in place, dropping duplicates.
fn inplace_unify(result: &mut Vec<Uuid>, other: &[Uuid]) {
    let mut merged = Vec::with_capacity(result.len() + other.len());
    let (mut i, mut j) = (0, 0);
    while i < result.len() && j < other.len() {
        match result[i].cmp(&other[j]) {
            std::cmp::Ordering::Less => {
                merged.push(result[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                merged.push(other[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                merged.push(result[i]);
                i += 1;
                j += 1;
            }
        }
    }
    merged.extend_from_slice(&result[i..]);
    merged.extend_from_slice(&other[j..]);
    *result = merged;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::slice::TableSlice;
    use crate::data::types::{RecordField, Type};
    use crate::expr::normalize::normalize;
    use crate::expr::parser::parse;
    use crate::synopsis::PartitionSynopsisBuilder;

    fn flow_layout() -> Type {
        Type::record(vec![
            RecordField::new("src_ip", Type::address()),
            RecordField::new("dst_port", Type::count()),
        ])
        .with_name("net.flow")
    }

    fn flow_partition(offset: u64, ip: &str, port: u64) -> PartitionSynopsis {
        let slice = TableSlice::new(
            flow_layout(),
            offset,
            vec![vec![
                Value::Address(ip.parse().unwrap()),
                Value::Count(port),
            ]],
        )
        .unwrap();
        let mut builder = PartitionSynopsisBuilder::new(0.01);
        builder.add_slice(&slice);
        builder.seal()
    }

    fn two_partition_index() -> (MetaIndex, Uuid, Uuid) {
        let mut index = MetaIndex::new();
        let mut p1 = Uuid::new_v4();
        let mut p2 = Uuid::new_v4();
        if p2 < p1 {
            std::mem::swap(&mut p1, &mut p2);
        }
        index.insert(p1, flow_partition(0, "10.0.0.1", 22));
        index.insert(p2, flow_partition(1, "192.168.1.5", 80));
        (index, p1, p2)
    }

    fn lookup(index: &MetaIndex, text: &str) -> Vec<Uuid> {
        index.lookup(&normalize(parse(text, None).unwrap()))
    }

    #[test]
    fn prunes_by_field_synopsis() {
        let (index, p1, _) = two_partition_index();
        assert_eq!(lookup(&index, "src_ip == 10.0.0.1"), vec![p1]);
    }

    #[test]
    fn disjunction_unions_candidates() {
        let (index, p1, p2) = two_partition_index();
        let result = lookup(&index, "src_ip == 10.0.0.1 || dst_port == 80");
        assert_eq!(result, vec![p1, p2]);
    }

    #[test]
    fn conjunction_intersects_candidates() {
        let (index, _, _) = two_partition_index();
        let result = lookup(&index, "src_ip == 10.0.0.1 && dst_port == 80");
        assert!(result.is_empty());
        let (index, p1, _) = two_partition_index();
        let result = lookup(&index, "src_ip == 10.0.0.1 && dst_port == 22");
        assert_eq!(result, vec![p1]);
    }

    #[test]
    fn negation_returns_the_universe() {
        let (index, p1, p2) = two_partition_index();
        let expr = parse("!(src_ip == 10.0.0.1)", None).unwrap();
        // Unnormalized negation falls back to every partition.
        assert_eq!(index.lookup(&expr), vec![p1, p2]);
    }

    #[test]
    fn meta_type_matches_layout_names() {
        let (index, p1, p2) = two_partition_index();
        assert_eq!(lookup(&index, "#type == \"net.flow\""), vec![p1, p2]);
        assert!(lookup(&index, "#type == \"zeek.conn\"").is_empty());
    }

    #[test]
    fn meta_field_matches_suffixes_and_negation() {
        let (index, p1, p2) = two_partition_index();
        assert_eq!(lookup(&index, "#field == \"src_ip\""), vec![p1, p2]);
        assert!(lookup(&index, "#field == \"missing\"").is_empty());
        assert_eq!(lookup(&index, "#field != \"missing\""), vec![p1, p2]);
    }

    #[test]
    fn non_string_meta_field_returns_universe() {
        let (index, p1, p2) = two_partition_index();
        assert_eq!(lookup(&index, "#field == 42"), vec![p1, p2]);
    }

    #[test]
    fn type_extractor_consults_type_synopses() {
        let (index, p1, _) = two_partition_index();
        assert_eq!(lookup(&index, ":addr == 10.0.0.1"), vec![p1]);
        assert_eq!(lookup(&index, ":count == 22"), vec![p1]);
    }

    #[test]
    fn timestamp_attribute_quirk() {
        let layout = Type::record(vec![RecordField::new(
            "ts",
            Type::time().with_attribute("timestamp", None),
        )])
        .with_name("ev.log");
        let slice = TableSlice::new(
            layout,
            0,
            vec![vec![Value::Time("2020-06-01T00:00:00Z".parse().unwrap())]],
        )
        .unwrap();
        let mut builder = PartitionSynopsisBuilder::new(0.01);
        builder.add_slice(&slice);
        let mut index = MetaIndex::new();
        let partition = Uuid::new_v4();
        index.insert(partition, builder.seal());
        let result = lookup(&index, ":timestamp > 2020-01-01");
        assert_eq!(result, vec![partition]);
        assert!(lookup(&index, ":timestamp > 2021-01-01").is_empty());
    }

    #[test]
    fn empty_index_yields_empty_result() {
        let index = MetaIndex::new();
        assert!(lookup(&index, "src_ip == 10.0.0.1").is_empty());
    }

    #[test]
    fn set_helpers_respect_sortedness() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let c = Uuid::from_u128(3);
        let mut xs = vec![a, b];
        inplace_unify(&mut xs, &[b, c]);
        assert_eq!(xs, vec![a, b, c]);
        let mut xs = vec![a, b, c];
        inplace_intersect(&mut xs, &[b, c]);
        assert_eq!(xs, vec![b, c]);
    }

    #[test]
    fn persistence_round_trip_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let (index, p1, p2) = two_partition_index();
        index.persist_partition(dir.path(), &p1).unwrap();
        index.persist_partition(dir.path(), &p2).unwrap();
        // A corrupt synopsis is skipped, not fatal.
        let corrupt = Uuid::new_v4();
        std::fs::write(dir.path().join(corrupt.to_string()), b"garbage").unwrap();
        let loaded = MetaIndex::load(dir.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.lookup(&normalize(parse("src_ip == 10.0.0.1", None).unwrap())),
            vec![p1]
        );
    }
}
