use regex::Regex;
use std::cmp::Ordering;
use tracing::warn;

use crate::data::types::{qualified_fields, Type, TypeKind};
use crate::data::value::{compare, Value};
use crate::expr::ast::{Expression, MetaExtractor, Operand, Predicate, RelOp};

/// Evaluates a single relational operation between two values.
///
/// Comparing null to anything yields `false`, except equality, which tests
/// nullness itself. Ill-typed operations yield `false`.
pub fn evaluate_op(lhs: &Value, op: RelOp, rhs: &Value) -> bool {
    if lhs.is_null() || rhs.is_null() {
        return op == RelOp::Equal && lhs.is_null() && rhs.is_null();
    }
    match op {
        RelOp::Equal | RelOp::NotEqual => match values_equal(lhs, rhs) {
            Some(eq) => (op == RelOp::Equal) == eq,
            None => false,
        },
        RelOp::Less => compare(lhs, rhs) == Some(Ordering::Less),
        RelOp::LessEqual => matches!(
            compare(lhs, rhs),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ),
        RelOp::Greater => compare(lhs, rhs) == Some(Ordering::Greater),
        RelOp::GreaterEqual => matches!(
            compare(lhs, rhs),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ),
        RelOp::In | RelOp::NotIn => match membership(lhs, rhs) {
            Some(contained) => (op == RelOp::In) == contained,
            None => false,
        },
        RelOp::Match | RelOp::NotMatch => match pattern_match(lhs, rhs) {
            Some(matched) => (op == RelOp::Match) == matched,
            None => false,
        },
    }
}

/// Equality across compatible value families; `None` when the two sides are
/// incomparable.
fn values_equal(lhs: &Value, rhs: &Value) -> Option<bool> {
    if let Some(ordering) = compare(lhs, rhs) {
        return Some(ordering == Ordering::Equal);
    }
    match (lhs, rhs) {
        (Value::Subnet(_), Value::Subnet(_))
        | (Value::Pattern(_), Value::Pattern(_))
        | (Value::List(_), Value::List(_))
        | (Value::Map(_), Value::Map(_)) => Some(lhs == rhs),
        _ => None,
    }
}

/// `lhs in rhs`: list membership, CIDR containment, or substring search.
fn membership(lhs: &Value, rhs: &Value) -> Option<bool> {
    match rhs {
        Value::List(elements) => Some(
            elements
                .iter()
                .any(|e| values_equal(lhs, e).unwrap_or(false)),
        ),
        Value::Subnet(net) => match lhs {
            Value::Address(addr) => Some(net.contains(addr)),
            Value::Subnet(sub) => Some(net.contains_subnet(sub)),
            _ => None,
        },
        Value::String(haystack) => match lhs {
            Value::String(needle) | Value::Enum(needle) => Some(haystack.contains(needle)),
            _ => None,
        },
        _ => None,
    }
}

/// `lhs ~ rhs`: whole-string regex match of a string against a pattern.
fn pattern_match(lhs: &Value, rhs: &Value) -> Option<bool> {
    let subject = match lhs {
        Value::String(s) | Value::Enum(s) => s,
        _ => return None,
    };
    let pattern = match rhs {
        Value::Pattern(p) => p,
        _ => return None,
    };
    match Regex::new(&format!("^(?:{})$", pattern)) {
        Ok(re) => Some(re.is_match(subject)),
        Err(err) => {
            warn!(pattern = %pattern, %err, "failed to compile pattern");
            Some(false)
        }
    }
}

/// Evaluates an expression against one row of a slice. Used after candidate
/// materialization to drop the false positives the synopses let through.
pub fn evaluate(expr: &Expression, layout: &Type, row: &[Value]) -> bool {
    match expr {
        Expression::Pred(p) => evaluate_predicate(p, layout, row),
        Expression::And(xs) => xs.iter().all(|x| evaluate(x, layout, row)),
        Expression::Or(xs) => xs.iter().any(|x| evaluate(x, layout, row)),
        Expression::Not(x) => !evaluate(x, layout, row),
    }
}

fn evaluate_predicate(pred: &Predicate, layout: &Type, row: &[Value]) -> bool {
    match (&pred.lhs, &pred.rhs) {
        // Meta extractors compare event metadata against a literal.
        (Operand::Meta(meta), Operand::Data(value)) => {
            evaluate_meta(*meta, pred.op, value, layout)
        }
        (Operand::Data(value), Operand::Meta(meta)) => {
            evaluate_meta(*meta, pred.op.flip(), value, layout)
        }
        (Operand::Data(lhs), Operand::Data(rhs)) => evaluate_op(lhs, pred.op, rhs),
        // Extractor against a literal: true if any selected field matches.
        (lhs, Operand::Data(value)) => {
            select_fields(lhs, layout, row).any(|field| evaluate_op(field, pred.op, value))
        }
        (Operand::Data(value), rhs) => select_fields(rhs, layout, row)
            .any(|field| evaluate_op(value, pred.op.flip(), field)),
        // Extractor-to-extractor predicates are not evaluable on a row.
        _ => false,
    }
}

fn evaluate_meta(meta: MetaExtractor, op: RelOp, value: &Value, layout: &Type) -> bool {
    match meta {
        MetaExtractor::Type => {
            let name = Value::String(layout.name().unwrap_or_default().to_string());
            evaluate_op(&name, op, value)
        }
        MetaExtractor::Field => {
            let suffix = match value {
                Value::String(s) => s,
                _ => return false,
            };
            let present = qualified_fields(layout)
                .iter()
                .any(|f| fqn_ends_with(&f.fqn(), suffix));
            !op.is_negated() == present
        }
    }
}

/// Yields the row values selected by a field or type extractor.
fn select_fields<'a>(
    operand: &'a Operand,
    layout: &Type,
    row: &'a [Value],
) -> impl Iterator<Item = &'a Value> {
    let fields = qualified_fields(layout);
    let mut selected = Vec::new();
    match operand {
        Operand::Field(name) => {
            for (i, field) in fields.iter().enumerate() {
                if fqn_ends_with(&field.fqn(), name) {
                    selected.push(i);
                }
            }
        }
        Operand::Type(ty) => {
            for (i, field) in fields.iter().enumerate() {
                if type_matches(ty, &field.ty) {
                    selected.push(i);
                }
            }
        }
        _ => {}
    }
    selected.into_iter().filter_map(|i| row.get(i))
}

/// A type extractor with a `none` kind matches by name alone; otherwise the
/// structural types must be equal.
pub fn type_matches(extractor: &Type, field: &Type) -> bool {
    if matches!(extractor.kind(), TypeKind::None) {
        extractor.name().is_some() && extractor.name() == field.name()
    } else {
        extractor == field
    }
}

/// Suffix match on dot-separated boundaries: `orig_h` and `id.orig_h` both
/// select `zeek.conn.id.orig_h`, but `rig_h` selects nothing.
pub fn fqn_ends_with(fqn: &str, suffix: &str) -> bool {
    if fqn == suffix {
        return true;
    }
    fqn.len() > suffix.len()
        && fqn.ends_with(suffix)
        && fqn.as_bytes()[fqn.len() - suffix.len() - 1] == b'.'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::RecordField;
    use crate::data::value::Subnet;
    use crate::expr::parser::parse;

    fn flow_layout() -> Type {
        Type::record(vec![
            RecordField::new("src_ip", Type::address()),
            RecordField::new("dst_port", Type::count()),
            RecordField::new("proto", Type::string()),
        ])
        .with_name("net.flow")
    }

    fn flow_row(ip: &str, port: u64, proto: &str) -> Vec<Value> {
        vec![
            Value::Address(ip.parse().unwrap()),
            Value::Count(port),
            Value::String(proto.into()),
        ]
    }

    #[test]
    fn null_comparisons() {
        assert!(evaluate_op(&Value::Null, RelOp::Equal, &Value::Null));
        assert!(!evaluate_op(&Value::Count(1), RelOp::Equal, &Value::Null));
        assert!(!evaluate_op(&Value::Null, RelOp::NotEqual, &Value::Count(1)));
        assert!(!evaluate_op(&Value::Null, RelOp::Less, &Value::Count(1)));
    }

    #[test]
    fn ill_typed_operations_are_false() {
        let s = Value::String("foo".into());
        assert!(!evaluate_op(&s, RelOp::Less, &Value::Count(3)));
        assert!(!evaluate_op(&s, RelOp::NotEqual, &Value::Count(3)));
        assert!(!evaluate_op(&Value::Count(3), RelOp::NotMatch, &s));
    }

    #[test]
    fn membership_semantics() {
        let addr = Value::Address("10.1.2.3".parse().unwrap());
        let net = Value::Subnet(Subnet::new("10.0.0.0".parse().unwrap(), 8));
        assert!(evaluate_op(&addr, RelOp::In, &net));
        assert!(!evaluate_op(&addr, RelOp::NotIn, &net));
        let list = Value::List(vec![Value::Count(80), Value::Count(443)]);
        assert!(evaluate_op(&Value::Count(443), RelOp::In, &list));
        assert!(evaluate_op(
            &Value::String("oo".into()),
            RelOp::In,
            &Value::String("foo".into())
        ));
    }

    #[test]
    fn pattern_semantics() {
        let s = Value::String("conn_attempt".into());
        let p = Value::Pattern("conn.*".into());
        assert!(evaluate_op(&s, RelOp::Match, &p));
        assert!(!evaluate_op(&s, RelOp::NotMatch, &p));
        // Whole-string semantics: a partial hit is not a match.
        assert!(!evaluate_op(&s, RelOp::Match, &Value::Pattern("att".into())));
    }

    #[test]
    fn row_evaluation_with_field_extractors() {
        let layout = flow_layout();
        let row = flow_row("10.0.0.1", 80, "tcp");
        let hit = parse("src_ip == 10.0.0.1 && dst_port < 1024", None).unwrap();
        assert!(evaluate(&hit, &layout, &row));
        let miss = parse("src_ip == 10.0.0.2", None).unwrap();
        assert!(!evaluate(&miss, &layout, &row));
    }

    #[test]
    fn row_evaluation_with_meta_extractors() {
        let layout = flow_layout();
        let row = flow_row("10.0.0.1", 80, "tcp");
        assert!(evaluate(
            &parse("#type == \"net.flow\"", None).unwrap(),
            &layout,
            &row
        ));
        assert!(evaluate(
            &parse("#field == \"src_ip\"", None).unwrap(),
            &layout,
            &row
        ));
        assert!(evaluate(
            &parse("#field != \"missing\"", None).unwrap(),
            &layout,
            &row
        ));
    }

    #[test]
    fn type_extractor_selects_by_type() {
        let layout = flow_layout();
        let row = flow_row("192.168.1.5", 443, "tcp");
        assert!(evaluate(
            &parse(":addr == 192.168.1.5", None).unwrap(),
            &layout,
            &row
        ));
        assert!(!evaluate(
            &parse(":addr == 10.9.9.9", None).unwrap(),
            &layout,
            &row
        ));
    }

    #[test]
    fn fqn_suffix_respects_boundaries() {
        assert!(fqn_ends_with("zeek.conn.id.orig_h", "orig_h"));
        assert!(fqn_ends_with("zeek.conn.id.orig_h", "id.orig_h"));
        assert!(fqn_ends_with("zeek.conn.id.orig_h", "zeek.conn.id.orig_h"));
        assert!(!fqn_ends_with("zeek.conn.id.orig_h", "rig_h"));
    }
}
