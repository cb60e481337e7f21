//! Global variables and type definitions
//!
//! Variable arrays are never shared between threads, so anything visible
//! across frames goes through these tables, each with its own lock.

use parking_lot::RwLock;
use std::collections::HashMap;

use super::types::{FieldDef, Record, Val};

/* ===================== Globals ===================== */

#[derive(Debug, Default)]
pub struct Globals {
    vars: RwLock<HashMap<String, Val>>,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Val> {
        self.vars.read().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Val) {
        self.vars.write().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Val> {
        self.vars.write().remove(name)
    }

    /// Replace `{name}` with the global of that name; unknown names are left alone
    pub fn interpolate(&self, text: &str) -> String {
        if !text.contains('{') {
            return text.to_string();
        }
        let vars = self.vars.read();
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let key = &after[..close];
                    match vars.get(key) {
                        Some(v) => out.push_str(&v.to_string()),
                        None => {
                            out.push('{');
                            out.push_str(key);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/* ===================== Definitions ===================== */

/// Named record type built by STRUCT
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl RecordType {
    pub fn instantiate(&self) -> Record {
        Record::new(self.name.clone(), self.fields.clone())
    }
}

/// Enum and struct lookup tables
#[derive(Debug, Default)]
pub struct Definitions {
    enums: RwLock<HashMap<String, HashMap<String, Val>>>,
    records: RwLock<HashMap<String, RecordType>>,
}

impl Definitions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_enum(&self, name: impl Into<String>, members: HashMap<String, Val>) {
        self.enums.write().insert(name.into(), members);
    }

    pub fn enum_member(&self, name: &str, member: &str) -> Option<Val> {
        self.enums
            .read()
            .get(name)
            .and_then(|m| m.get(member))
            .cloned()
    }

    pub fn enum_members(&self, name: &str) -> Option<HashMap<String, Val>> {
        self.enums.read().get(name).cloned()
    }

    pub fn define_record(&self, ty: RecordType) {
        self.records.write().insert(ty.name.clone(), ty);
    }

    pub fn record(&self, name: &str) -> Option<RecordType> {
        self.records.read().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_known_and_unknown_names() {
        let g = Globals::new();
        g.set("user", Val::str("ada"));
        g.set("n", Val::Int(3));
        assert_eq!(g.interpolate("hi {user}, {n} new"), "hi ada, 3 new");
        assert_eq!(g.interpolate("keep {missing} and {"), "keep {missing} and {");
        assert_eq!(g.interpolate("plain"), "plain");
    }
}
