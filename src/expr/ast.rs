use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::types::Type;
use crate::data::value::Value;

/// A relational operator between two predicate operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    In,
    NotIn,
    Match,
    NotMatch,
}

impl RelOp {
    /// The operator testing the complementary relation.
    pub fn negate(self) -> RelOp {
        match self {
            RelOp::Equal => RelOp::NotEqual,
            RelOp::NotEqual => RelOp::Equal,
            RelOp::Less => RelOp::GreaterEqual,
            RelOp::LessEqual => RelOp::Greater,
            RelOp::Greater => RelOp::LessEqual,
            RelOp::GreaterEqual => RelOp::Less,
            RelOp::In => RelOp::NotIn,
            RelOp::NotIn => RelOp::In,
            RelOp::Match => RelOp::NotMatch,
            RelOp::NotMatch => RelOp::Match,
        }
    }

    /// Whether the operator expresses a negated relation.
    pub fn is_negated(self) -> bool {
        matches!(self, RelOp::NotEqual | RelOp::NotIn | RelOp::NotMatch)
    }

    /// Swaps the operand order: `a < b` iff `b > a`.
    pub fn flip(self) -> RelOp {
        match self {
            RelOp::Less => RelOp::Greater,
            RelOp::LessEqual => RelOp::GreaterEqual,
            RelOp::Greater => RelOp::Less,
            RelOp::GreaterEqual => RelOp::LessEqual,
            other => other,
        }
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RelOp::Equal => "==",
            RelOp::NotEqual => "!=",
            RelOp::Less => "<",
            RelOp::LessEqual => "<=",
            RelOp::Greater => ">",
            RelOp::GreaterEqual => ">=",
            RelOp::In => "in",
            RelOp::NotIn => "!in",
            RelOp::Match => "~",
            RelOp::NotMatch => "!~",
        };
        write!(f, "{}", s)
    }
}

/// The metadata an event carries besides its row values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaExtractor {
    /// The layout name, addressed as `#type`.
    Type,
    /// Field presence by fully qualified name, addressed as `#field`.
    Field,
}

/// One side of a predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// Tests event metadata rather than row values.
    Meta(MetaExtractor),
    /// Selects fields whose fully qualified name ends with this string.
    Field(String),
    /// Selects fields of a structural type; a `none` kind matches by name
    /// alone.
    Type(Type),
    /// A literal.
    Data(Value),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Meta(MetaExtractor::Type) => write!(f, "#type"),
            Operand::Meta(MetaExtractor::Field) => write!(f, "#field"),
            Operand::Field(name) => write!(f, "{}", name),
            Operand::Type(ty) => write!(f, ":{}", ty),
            Operand::Data(value) => write!(f, "{}", value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub lhs: Operand,
    pub op: RelOp,
    pub rhs: Operand,
}

impl Predicate {
    pub fn new(lhs: Operand, op: RelOp, rhs: Operand) -> Self {
        Predicate { lhs, op, rhs }
    }

    /// The predicate testing the complementary relation.
    pub fn negate(&self) -> Predicate {
        Predicate {
            lhs: self.lhs.clone(),
            op: self.op.negate(),
            rhs: self.rhs.clone(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

/// A predicate tree. Normalization removes every `Not` node by pushing
/// negations into the predicates themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Pred(Predicate),
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
}

impl Expression {
    /// Visits every predicate in the tree.
    pub fn for_each_predicate<'a>(&'a self, f: &mut impl FnMut(&'a Predicate)) {
        match self {
            Expression::Pred(p) => f(p),
            Expression::And(xs) | Expression::Or(xs) => {
                for x in xs {
                    x.for_each_predicate(f);
                }
            }
            Expression::Not(x) => x.for_each_predicate(f),
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Non-leaf operands are parenthesized to keep printing unambiguous.
        match self {
            Expression::Pred(_) => write!(f, "{}", self),
            _ => write!(f, "({})", self),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expression::Pred(p) => write!(f, "{}", p),
            Expression::And(xs) => {
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " && ")?;
                    }
                    x.fmt_operand(f)?;
                }
                Ok(())
            }
            Expression::Or(xs) => {
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " || ")?;
                    }
                    x.fmt_operand(f)?;
                }
                Ok(())
            }
            Expression::Not(x) => {
                write!(f, "! ")?;
                x.fmt_operand(f)
            }
        }
    }
}
