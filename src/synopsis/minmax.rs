use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::data::value::{compare, Value};
use crate::expr::ast::RelOp;

/// Tracks the smallest and largest value seen for an orderable field.
/// Answers every order operator; abstains when the probe is incomparable
/// with the stored bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxSynopsis {
    min: Option<Value>,
    max: Option<Value>,
}

impl MinMaxSynopsis {
    pub fn lookup(&self, op: RelOp, value: &Value) -> Option<bool> {
        let (min, max) = match (&self.min, &self.max) {
            (Some(min), Some(max)) => (min, max),
            // No value was ever recorded: nothing can match.
            _ => return Some(false),
        };
        let cmp_min = compare(value, min)?;
        let cmp_max = compare(value, max)?;
        match op {
            RelOp::Equal => Some(cmp_min != Ordering::Less && cmp_max != Ordering::Greater),
            RelOp::NotEqual => {
                // Only a constant field pinned to the probe can rule out inequality.
                Some(!(cmp_min == Ordering::Equal && cmp_max == Ordering::Equal))
            }
            RelOp::Less => Some(cmp_min == Ordering::Greater),
            RelOp::LessEqual => Some(cmp_min != Ordering::Less),
            RelOp::Greater => Some(cmp_max == Ordering::Less),
            RelOp::GreaterEqual => Some(cmp_max != Ordering::Greater),
            RelOp::In => match value {
                Value::List(elements) => {
                    let mut any = false;
                    for element in elements {
                        match self.lookup(RelOp::Equal, element) {
                            Some(true) | None => any = true,
                            Some(false) => {}
                        }
                    }
                    Some(any)
                }
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MinMaxBuilder {
    min: Option<Value>,
    max: Option<Value>,
}

impl MinMaxBuilder {
    pub fn new() -> Self {
        MinMaxBuilder::default()
    }

    pub fn add(&mut self, value: &Value) {
        match &self.min {
            None => self.min = Some(value.clone()),
            Some(min) => {
                if compare(value, min) == Some(Ordering::Less) {
                    self.min = Some(value.clone());
                }
            }
        }
        match &self.max {
            None => self.max = Some(value.clone()),
            Some(max) => {
                if compare(value, max) == Some(Ordering::Greater) {
                    self.max = Some(value.clone());
                }
            }
        }
    }

    pub fn seal(self) -> MinMaxSynopsis {
        MinMaxSynopsis {
            min: self.min,
            max: self.max,
        }
    }
}
