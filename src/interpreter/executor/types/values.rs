//! Runtime values
//!
//! `Val` is the closed set of value shapes a variable can hold. Behaviour that
//! depends on the shape dispatches on `Val::kind()` rather than on ad-hoc checks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::interpreter::executor::async_tasks::HandleMap;

/* ===================== Values ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Val {
    Nil,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    List(Vec<Val>),
    Map(HashMap<String, Val>),
    Record(Record),
    /// Async result handles; only meaningful inside the running process
    #[serde(skip)]
    Handles(HandleMap),
}

impl Default for Val {
    fn default() -> Self {
        Val::Nil
    }
}

impl Val {
    pub fn kind(&self) -> Kind {
        match self {
            Val::Nil => Kind::Nil,
            Val::Bool(_) => Kind::Bool,
            Val::Int(_) => Kind::Int,
            Val::Uint(_) => Kind::Uint,
            Val::Float(_) => Kind::Float,
            Val::Str(_) => Kind::Str,
            Val::List(_) => Kind::List,
            Val::Map(_) => Kind::Map,
            Val::Record(_) => Kind::Record,
            Val::Handles(_) => Kind::Handles,
        }
    }

    pub fn str(s: impl Into<String>) -> Self {
        Val::Str(s.into())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Val::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Val::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view used by loop bounds and indexing
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Val::Int(n) => Some(*n),
            Val::Uint(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Val::Int(n) => Some(*n as f64),
            Val::Uint(n) => Some(*n as f64),
            Val::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Val::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Val::Int(_) | Val::Uint(_) | Val::Float(_))
    }

    /// Equality that treats numbers of different kinds as comparable
    pub fn loose_eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Int(a), Val::Uint(b)) | (Val::Uint(b), Val::Int(a)) => {
                u64::try_from(*a).map(|a| a == *b).unwrap_or(false)
            }
            (a, b) if a.is_numeric() && b.is_numeric() && a.kind() != b.kind() => {
                a.as_float() == b.as_float()
            }
            (a, b) => a == b,
        }
    }

    /// Collapse a list of returned values into a single value:
    /// nothing becomes nil, one value is unwrapped, several stay a list
    pub fn from_returns(mut values: Vec<Val>) -> Val {
        match values.len() {
            0 => Val::Nil,
            1 => values.pop().unwrap_or_default(),
            _ => Val::List(values),
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Nil => write!(f, "nil"),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Int(n) => write!(f, "{}", n),
            Val::Uint(n) => write!(f, "{}", n),
            Val::Float(x) => write!(f, "{}", x),
            Val::Str(s) => write!(f, "{}", s),
            Val::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Val::Map(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                write!(f, "map[")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}:{}", key, map[key])?;
                }
                write!(f, "]")
            }
            Val::Record(record) => write!(f, "{}", record),
            Val::Handles(handles) => write!(f, "handles[{}]", handles.len()),
        }
    }
}

/* ===================== Kinds ===================== */

/// Kind discriminant for values and declared variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Kind {
    Nil,
    Bool,
    Int,
    Uint,
    Float,
    Str,
    List,
    Map,
    Record,
    Handles,
    #[default]
    Any,
}

impl Kind {
    /// Parse a kind name as written in VAR declarations
    pub fn from_name(name: &str) -> Option<Kind> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "nil" => Kind::Nil,
            "bool" => Kind::Bool,
            "int" => Kind::Int,
            "uint" => Kind::Uint,
            "float" => Kind::Float,
            "string" => Kind::Str,
            "list" | "array" => Kind::List,
            "map" => Kind::Map,
            "any" | "mixed" => Kind::Any,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Nil => "nil",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Uint => "uint",
            Kind::Float => "float",
            Kind::Str => "string",
            Kind::List => "list",
            Kind::Map => "map",
            Kind::Record => "struct",
            Kind::Handles => "handles",
            Kind::Any => "any",
        }
    }

    /// Value a freshly declared variable of this kind starts with
    pub fn zero(self) -> Val {
        match self {
            Kind::Bool => Val::Bool(false),
            Kind::Int => Val::Int(0),
            Kind::Uint => Val::Uint(0),
            Kind::Float => Val::Float(0.0),
            Kind::Str => Val::Str(String::new()),
            Kind::List => Val::List(Vec::new()),
            Kind::Map => Val::Map(HashMap::new()),
            Kind::Nil | Kind::Record | Kind::Handles | Kind::Any => Val::Nil,
        }
    }

    /// Whether a value of kind `other` may be stored under this kind
    pub fn accepts(self, other: Kind) -> bool {
        self == Kind::Any || self == other || other == Kind::Nil
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/* ===================== Records ===================== */

/// One field of a record type: name, kind and default value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: Kind,
    pub default: Val,
}

/// Ordered record: field definitions plus a parallel values array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub type_name: String,
    pub fields: Vec<FieldDef>,
    pub values: Vec<Val>,
}

impl Record {
    /// Instantiate a record with every field at its default
    pub fn new(type_name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        let values = fields.iter().map(|f| f.default.clone()).collect();
        Self {
            type_name: type_name.into(),
            fields,
            values,
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&Val> {
        self.field_index(name).and_then(|i| self.values.get(i))
    }

    /// Set a field, checking the value against the field's kind
    pub fn set(&mut self, name: &str, value: Val) -> Result<(), String> {
        let idx = self
            .field_index(name)
            .ok_or_else(|| format!("{} has no field '{}'", self.type_name, name))?;
        let field = &self.fields[idx];
        if !field.kind.accepts(value.kind()) {
            return Err(format!(
                "field '{}' of {} is {}, cannot store {}",
                name,
                self.type_name,
                field.kind,
                value.kind()
            ));
        }
        self.values[idx] = value;
        Ok(())
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.type_name)?;
        for (i, (field, value)) in self.fields.iter().zip(&self.values).enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}:{}", field.name, value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn test_display_matches_script_formatting() {
        let list = Val::List(vec![Val::Int(1), Val::str("a"), Val::Bool(true)]);
        assert_eq!(list.to_string(), "[1 a true]");

        let map = Val::Map(hashmap! {
            "b".to_string() => Val::Int(2),
            "a".to_string() => Val::Int(1),
        });
        assert_eq!(map.to_string(), "map[a:1 b:2]");
    }

    #[test]
    fn test_loose_eq_crosses_numeric_kinds() {
        assert!(Val::Int(3).loose_eq(&Val::Float(3.0)));
        assert!(Val::Uint(3).loose_eq(&Val::Int(3)));
        assert!(!Val::Int(-1).loose_eq(&Val::Uint(1)));
        assert!(!Val::str("3").loose_eq(&Val::Int(3)));
    }

    #[test]
    fn test_from_returns_shapes() {
        assert_eq!(Val::from_returns(vec![]), Val::Nil);
        assert_eq!(Val::from_returns(vec![Val::Int(1)]), Val::Int(1));
        assert_eq!(
            Val::from_returns(vec![Val::Int(1), Val::Int(2)]),
            Val::List(vec![Val::Int(1), Val::Int(2)])
        );
    }

    #[test]
    fn test_record_set_checks_field_kind() {
        let mut rec = Record::new(
            "point",
            vec![
                FieldDef {
                    name: "x".into(),
                    kind: Kind::Int,
                    default: Val::Int(0),
                },
                FieldDef {
                    name: "label".into(),
                    kind: Kind::Str,
                    default: Val::str(""),
                },
            ],
        );
        assert_eq!(rec.get("x"), Some(&Val::Int(0)));
        rec.set("x", Val::Int(4)).unwrap();
        assert_eq!(rec.get("x"), Some(&Val::Int(4)));
        assert!(rec.set("x", Val::str("no")).is_err());
        assert!(rec.set("y", Val::Int(1)).is_err());
    }
}
