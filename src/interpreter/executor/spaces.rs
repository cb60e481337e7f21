//! Function space storage
//!
//! Bodies and argument lists are kept behind separate locks: bodies are read
//! on every invocation, argument lists only while binding a call.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::types::{Phrase, Val};

/// Parsed body of one function, module or synthesized block
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSpace {
    pub id: u32,
    pub name: String,
    pub phrases: Vec<Phrase>,
}

impl FunctionSpace {
    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

/// Declared parameter with an optional default evaluated at definition time
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub default: Option<Val>,
}

impl Parameter {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FunctionSpaces {
    bodies: RwLock<HashMap<u32, Arc<FunctionSpace>>>,
    args: RwLock<HashMap<u32, Vec<Parameter>>>,
}

impl FunctionSpaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) the body of space `id`
    pub fn insert(&self, id: u32, name: impl Into<String>, phrases: Vec<Phrase>) -> Arc<FunctionSpace> {
        let space = Arc::new(FunctionSpace {
            id,
            name: name.into(),
            phrases,
        });
        self.bodies.write().insert(id, Arc::clone(&space));
        space
    }

    pub fn get(&self, id: u32) -> Option<Arc<FunctionSpace>> {
        self.bodies.read().get(&id).cloned()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.bodies.read().contains_key(&id)
    }

    pub fn set_params(&self, id: u32, params: Vec<Parameter>) {
        self.args.write().insert(id, params);
    }

    pub fn params(&self, id: u32) -> Vec<Parameter> {
        self.args.read().get(&id).cloned().unwrap_or_default()
    }

    pub fn param_names(&self, id: u32) -> Vec<String> {
        self.args
            .read()
            .get(&id)
            .map(|ps| ps.iter().map(|p| p.name.clone()).collect())
            .unwrap_or_default()
    }
}
