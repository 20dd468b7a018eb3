use serde::{Deserialize, Serialize};

use crate::data::value::Value;
use crate::expr::ast::RelOp;

/// Records which truth values a boolean field has taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoolSynopsis {
    has_true: bool,
    has_false: bool,
}

impl BoolSynopsis {
    pub fn lookup(&self, op: RelOp, value: &Value) -> Option<bool> {
        let probe = match value {
            Value::Bool(b) => *b,
            _ => return None,
        };
        match op {
            RelOp::Equal => Some(if probe { self.has_true } else { self.has_false }),
            RelOp::NotEqual => Some(if probe { self.has_false } else { self.has_true }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BoolBuilder {
    has_true: bool,
    has_false: bool,
}

impl BoolBuilder {
    pub fn new() -> Self {
        BoolBuilder::default()
    }

    pub fn add(&mut self, value: &Value) {
        match value {
            Value::Bool(true) => self.has_true = true,
            Value::Bool(false) => self.has_false = true,
            _ => {}
        }
    }

    pub fn seal(self) -> BoolSynopsis {
        BoolSynopsis {
            has_true: self.has_true,
            has_false: self.has_false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_observed_truth_values() {
        let mut builder = BoolBuilder::new();
        builder.add(&Value::Bool(true));
        let s = builder.seal();
        assert_eq!(s.lookup(RelOp::Equal, &Value::Bool(true)), Some(true));
        assert_eq!(s.lookup(RelOp::Equal, &Value::Bool(false)), Some(false));
        assert_eq!(s.lookup(RelOp::NotEqual, &Value::Bool(true)), Some(false));
        assert_eq!(s.lookup(RelOp::NotEqual, &Value::Bool(false)), Some(true));
    }

    #[test]
    fn non_boolean_probe_abstains() {
        let s = BoolBuilder::new().seal();
        assert_eq!(s.lookup(RelOp::Equal, &Value::Count(1)), None);
        assert_eq!(s.lookup(RelOp::Less, &Value::Bool(true)), None);
    }
}
