use std::fmt;

use crate::list::ListValue;
use crate::name::Name;
use crate::path::Path;

// ── Value enum ──────────────────────────────────────────────────

/// The unified runtime value type.
///
/// Everything on the evaluation stack, in a variable, or passed across
/// the external-function boundary is a `Value`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A first-class content address, produced by `^->` literals and
    /// consumed by variable-target diverts and read-count queries.
    DivertTarget(Path),
    /// A by-reference handle to another variable. `context_index` is 0
    /// for a global, a 1-based callstack frame index for a temporary,
    /// and -1 until the engine resolves it.
    VariablePointer { name: Name, context_index: i32 },
    List(ListValue),
    /// The result of a function that returned nothing.
    Void,
}

impl Value {
    /// Human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::DivertTarget(_) => "divert target",
            Value::VariablePointer { .. } => "variable pointer",
            Value::List(_) => "list",
            Value::Void => "void",
        }
    }

    /// Truthiness for conditional diverts and choice conditions.
    ///
    /// Divert targets and variable pointers are rejected rather than
    /// silently coerced: using them as conditions is always a content bug.
    pub fn is_truthy(&self) -> Result<bool, String> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Float(f) => Ok(*f != 0.0),
            Value::Str(s) => Ok(!s.is_empty()),
            Value::List(l) => Ok(!l.is_empty()),
            Value::DivertTarget(_) => {
                Err("shouldn't use a divert target as a conditional value".into())
            }
            Value::VariablePointer { .. } => {
                Err("shouldn't use a variable pointer as a conditional value".into())
            }
            Value::Void => Err("shouldn't use a void value as a conditional value".into()),
        }
    }

    /// The textual form used when a value lands in the output stream.
    pub fn to_output_string(&self) -> String {
        match self {
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => s.clone(),
            Value::DivertTarget(p) => p.to_string(),
            Value::VariablePointer { name, .. } => name.to_string(),
            Value::List(l) => l.to_output_string(),
            Value::Void => String::new(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Trim-trailing-zero float formatting: `2.0` prints as `2`, `2.5` as
/// `2.5`, matching the document format's expectations.
pub fn format_float(f: f64) -> String {
    if f == f.trunc() && f.is_finite() && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_output_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert_eq!(Value::Int(0).is_truthy(), Ok(false));
        assert_eq!(Value::Int(-3).is_truthy(), Ok(true));
        assert_eq!(Value::Bool(true).is_truthy(), Ok(true));
        assert_eq!(Value::Str(String::new()).is_truthy(), Ok(false));
        assert_eq!(Value::Str("x".into()).is_truthy(), Ok(true));
        assert!(Value::DivertTarget(Path::parse("a")).is_truthy().is_err());
        assert!(Value::Void.is_truthy().is_err());
    }

    #[test]
    fn output_strings() {
        assert_eq!(Value::Int(7).to_output_string(), "7");
        assert_eq!(Value::Float(2.0).to_output_string(), "2");
        assert_eq!(Value::Float(2.5).to_output_string(), "2.5");
        assert_eq!(Value::Bool(false).to_output_string(), "false");
        assert_eq!(Value::Void.to_output_string(), "");
    }
}
