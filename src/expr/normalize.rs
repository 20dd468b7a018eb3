use crate::core::error::Result;
use crate::expr::ast::{Expression, Operand, Predicate};
use crate::schema::taxonomy::Taxonomies;

/// Brings an expression into negation normal form: negations are pushed into
/// the predicates themselves, nested connectives of the same kind are
/// flattened, duplicate operands are dropped, and single-operand connectives
/// are folded. The result contains no `Not` node.
pub fn normalize(expr: Expression) -> Expression {
    flatten(push_negations(expr, false))
}

fn push_negations(expr: Expression, negate: bool) -> Expression {
    match expr {
        Expression::Not(inner) => push_negations(*inner, !negate),
        Expression::Pred(p) => Expression::Pred(if negate { p.negate() } else { p }),
        Expression::And(xs) => {
            let operands = xs.into_iter().map(|x| push_negations(x, negate)).collect();
            if negate {
                Expression::Or(operands)
            } else {
                Expression::And(operands)
            }
        }
        Expression::Or(xs) => {
            let operands = xs.into_iter().map(|x| push_negations(x, negate)).collect();
            if negate {
                Expression::And(operands)
            } else {
                Expression::Or(operands)
            }
        }
    }
}

fn flatten(expr: Expression) -> Expression {
    match expr {
        Expression::And(xs) => {
            let mut operands: Vec<Expression> = Vec::with_capacity(xs.len());
            for x in xs {
                match flatten(x) {
                    Expression::And(inner) => operands.extend(inner),
                    other => operands.push(other),
                }
            }
            dedupe(&mut operands);
            fold(operands, Expression::And)
        }
        Expression::Or(xs) => {
            let mut operands: Vec<Expression> = Vec::with_capacity(xs.len());
            for x in xs {
                match flatten(x) {
                    Expression::Or(inner) => operands.extend(inner),
                    other => operands.push(other),
                }
            }
            dedupe(&mut operands);
            fold(operands, Expression::Or)
        }
        other => other,
    }
}

fn dedupe(operands: &mut Vec<Expression>) {
    let mut kept: Vec<Expression> = Vec::with_capacity(operands.len());
    for x in operands.drain(..) {
        if !kept.contains(&x) {
            kept.push(x);
        }
    }
    *operands = kept;
}

fn fold(mut operands: Vec<Expression>, connective: fn(Vec<Expression>) -> Expression) -> Expression {
    if operands.len() == 1 {
        operands.pop().unwrap()
    } else {
        connective(operands)
    }
}

/// Expands taxonomic concepts: a predicate whose field extractor names a
/// concept becomes the disjunction of the same predicate over every member
/// field path.
pub fn resolve(taxonomies: &Taxonomies, expr: Expression) -> Result<Expression> {
    Ok(match expr {
        Expression::Pred(p) => resolve_predicate(taxonomies, p)?,
        Expression::And(xs) => Expression::And(
            xs.into_iter()
                .map(|x| resolve(taxonomies, x))
                .collect::<Result<_>>()?,
        ),
        Expression::Or(xs) => Expression::Or(
            xs.into_iter()
                .map(|x| resolve(taxonomies, x))
                .collect::<Result<_>>()?,
        ),
        Expression::Not(x) => Expression::Not(Box::new(resolve(taxonomies, *x)?)),
    })
}

fn resolve_predicate(taxonomies: &Taxonomies, pred: Predicate) -> Result<Expression> {
    let concept = match (&pred.lhs, &pred.rhs) {
        (Operand::Field(name), _) if taxonomies.contains(name) => name.clone(),
        _ => return Ok(Expression::Pred(pred)),
    };
    let members = taxonomies.expand(&concept)?;
    let operands: Vec<Expression> = members
        .into_iter()
        .map(|field| {
            Expression::Pred(Predicate::new(
                Operand::Field(field),
                pred.op,
                pred.rhs.clone(),
            ))
        })
        .collect();
    Ok(match operands.len() {
        0 => Expression::Pred(pred),
        1 => operands.into_iter().next().unwrap(),
        _ => Expression::Or(operands),
    })
}
