// SPDX-License-Identifier: MIT OR Apache-2.0
//! Values flowing through properties, inputs and outputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of value a property or port accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// String value
    String,
    /// Ordered list of values
    List,
    /// String-keyed map of values
    Map,
    /// Any kind (for generic nodes)
    Any,
}

impl ValueKind {
    /// Check if values of this kind can flow into a slot of another kind
    pub fn can_connect_to(self, other: ValueKind) -> bool {
        if matches!(self, Self::Any) || matches!(other, Self::Any) {
            return true;
        }

        if self == other {
            return true;
        }

        // Integers widen to floats
        matches!((self, other), (Self::Int, Self::Float))
    }

    /// Check if a concrete value is acceptable for this kind.
    ///
    /// `Nil` is accepted everywhere; it is how an absent value is spelled.
    pub fn accepts(self, value: &Value) -> bool {
        match value.kind() {
            None => true,
            Some(kind) => kind.can_connect_to(self),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::List => "list",
            Self::Map => "map",
            Self::Any => "any",
        };
        f.write_str(name)
    }
}

/// A value stored in a property or produced by an output
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// Absent value
    #[default]
    Nil,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// String
    String(String),
    /// Ordered collection
    List(Vec<Value>),
    /// String-keyed record
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Get the kind of this value, `None` for `Nil`
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::Nil => None,
            Self::Bool(_) => Some(ValueKind::Bool),
            Self::Int(_) => Some(ValueKind::Int),
            Self::Float(_) => Some(ValueKind::Float),
            Self::String(_) => Some(ValueKind::String),
            Self::List(_) => Some(ValueKind::List),
            Self::Map(_) => Some(ValueKind::Map),
        }
    }

    /// Whether this is `Nil`
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Numeric view, widening integers
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean view
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// List view
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// Map view
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Short name of the value's kind for messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self::Map(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_compatibility() {
        assert!(ValueKind::Int.can_connect_to(ValueKind::Float));
        assert!(!ValueKind::Float.can_connect_to(ValueKind::Int));
        assert!(ValueKind::Map.can_connect_to(ValueKind::Any));
        assert!(ValueKind::Any.can_connect_to(ValueKind::String));
        assert!(!ValueKind::List.can_connect_to(ValueKind::Map));
    }

    #[test]
    fn test_accepts_nil_everywhere() {
        assert!(ValueKind::Float.accepts(&Value::Nil));
        assert!(ValueKind::Float.accepts(&Value::Int(3)));
        assert!(!ValueKind::Int.accepts(&Value::Float(3.0)));
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int(4).as_float(), Some(4.0));
        assert_eq!(Value::Float(1.5).as_int(), None);
        assert_eq!(Value::from("a").as_str(), Some("a"));
    }
}
