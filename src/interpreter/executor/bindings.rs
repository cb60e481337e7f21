//! Binding tables
//!
//! Each function space maps identifier text to a slot index in the variable
//! array of its invocations. Slot indices never change for the lifetime of a
//! table, so every concurrent invocation of the same space shares one layout.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use super::types::{Phrase, TokenKind};

#[derive(Debug, Default, Clone)]
pub struct BindingTable {
    slots: HashMap<String, usize>,
    names: Vec<String>,
}

impl BindingTable {
    fn bind(&mut self, name: &str) -> usize {
        if let Some(&slot) = self.slots.get(name) {
            return slot;
        }
        let slot = self.names.len();
        self.slots.insert(name.to_string(), slot);
        self.names.push(name.to_string());
        slot
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Binding service shared by every invocation
#[derive(Debug, Default)]
pub struct Bindings {
    tables: RwLock<HashMap<u32, BindingTable>>,
    prepared: RwLock<HashSet<u32>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `name` in `space`, binding it on first sight
    pub fn resolve(&self, space: u32, name: &str) -> usize {
        if let Some(slot) = self.lookup(space, name) {
            return slot;
        }
        self.tables.write().entry(space).or_default().bind(name)
    }

    pub fn lookup(&self, space: u32, name: &str) -> Option<usize> {
        self.tables
            .read()
            .get(&space)
            .and_then(|t| t.slots.get(name).copied())
    }

    /// Identifier held in `slot`
    pub fn name_of(&self, space: u32, slot: usize) -> Option<String> {
        self.tables
            .read()
            .get(&space)
            .and_then(|t| t.names.get(slot).cloned())
    }

    /// Number of slots an invocation of `space` needs
    pub fn len(&self, space: u32) -> usize {
        self.tables.read().get(&space).map_or(0, BindingTable::len)
    }

    pub fn is_prepared(&self, space: u32) -> bool {
        self.prepared.read().contains(&space)
    }

    /// Bind parameters (in declaration order) and every identifier in the body.
    /// Nested DEFINE bodies belong to their own space and are skipped.
    pub fn prepare(&self, space: u32, params: &[String], phrases: &[Phrase]) {
        let mut tables = self.tables.write();
        let table = tables.entry(space).or_default();
        for p in params {
            table.bind(p);
        }
        let mut in_define = false;
        for phrase in phrases {
            match phrase.leading() {
                Some(TokenKind::Define) => {
                    in_define = true;
                    continue;
                }
                Some(TokenKind::Enddef) => {
                    in_define = false;
                    continue;
                }
                _ if in_define => continue,
                _ => {}
            }
            for token in &phrase.tokens {
                if token.kind == TokenKind::Identifier {
                    table.bind(&token.text);
                }
            }
        }
        drop(tables);
        self.prepared.write().insert(space);
    }

    /// Drop every binding of `space`
    pub fn reset(&self, space: u32) {
        self.tables.write().remove(&space);
        self.prepared.write().remove(&space);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::lexer;

    #[test]
    fn test_resolve_is_stable() {
        let b = Bindings::new();
        let a = b.resolve(1, "a");
        let c = b.resolve(1, "c");
        assert_ne!(a, c);
        assert_eq!(b.resolve(1, "a"), a);
        assert_eq!(b.resolve(1, "c"), c);
        // Other spaces have their own layout
        assert_eq!(b.resolve(2, "c"), 0);
    }

    #[test]
    fn test_prepare_binds_params_first_and_skips_define_bodies() {
        let src = "x = a + 1\ndefine inner(q)\nz = q\nenddef\ny = x";
        let phrases = lexer::phrases(src).unwrap();
        let b = Bindings::new();
        b.prepare(7, &["a".to_string(), "b".to_string()], &phrases);

        assert_eq!(b.lookup(7, "a"), Some(0));
        assert_eq!(b.lookup(7, "b"), Some(1));
        assert!(b.lookup(7, "x").is_some());
        assert!(b.lookup(7, "y").is_some());
        assert_eq!(b.lookup(7, "z"), None);
        assert_eq!(b.lookup(7, "q"), None);
        assert!(b.is_prepared(7));

        b.reset(7);
        assert!(!b.is_prepared(7));
        assert_eq!(b.len(7), 0);
    }
}
