//! Backend boolean literal conventions.

use crate::sql::result::Value;

/// How a backend spells booleans in raw query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanConvention {
    /// `'true'` / `'false'`
    Standard,
    /// `'t'` / `'f'`, PostgreSQL text output.
    SingleLetter,
    /// `1` / `0`, SQLite.
    Numeric,
}

impl BooleanConvention {
    pub fn truthy_value(self) -> Value {
        match self {
            BooleanConvention::Standard => Value::from("true"),
            BooleanConvention::SingleLetter => Value::from("t"),
            BooleanConvention::Numeric => Value::Integer(1),
        }
    }

    pub fn falsey_value(self) -> Value {
        match self {
            BooleanConvention::Standard => Value::from("false"),
            BooleanConvention::SingleLetter => Value::from("f"),
            BooleanConvention::Numeric => Value::Integer(0),
        }
    }

    pub fn is_true(self, raw: &Value) -> bool {
        *raw == self.truthy_value()
    }

    pub fn is_false(self, raw: &Value) -> bool {
        *raw == self.falsey_value()
    }

    /// Like `is_true`, but a missing value counts as false.
    pub fn is_true_opt(self, raw: Option<&Value>) -> bool {
        raw.is_some_and(|v| self.is_true(v))
    }
}
