//! Standard library registry
//!
//! Natives are looked up by name when a call does not resolve to a user
//! function. Embedders can register their own alongside the builtins.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::errors::ExecError;
use super::expressions::EvalContext;
use super::types::Val;

mod builtins;

/// Native function: (namespace, evaluation context, arguments) -> value
pub type NativeFunction =
    Arc<dyn Fn(&str, &mut EvalContext<'_>, Vec<Val>) -> Result<Val, ExecError> + Send + Sync>;

#[derive(Default)]
pub struct Stdlib {
    natives: RwLock<HashMap<String, NativeFunction>>,
}

impl Stdlib {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the builtin natives
    pub fn with_builtins() -> Self {
        let lib = Self::new();
        lib.register("len", Arc::new(builtins::len));
        lib.register("await", Arc::new(builtins::await_handles));
        lib.register("keys", Arc::new(builtins::keys));
        lib.register("append", Arc::new(builtins::append));
        lib.register("string", Arc::new(builtins::string));
        lib.register("int", Arc::new(builtins::int));
        lib.register("float", Arc::new(builtins::float));
        lib.register("kind", Arc::new(builtins::kind));
        lib
    }

    pub fn register(&self, name: impl Into<String>, f: NativeFunction) {
        self.natives.write().insert(name.into(), f);
    }

    pub fn get(&self, name: &str) -> Option<NativeFunction> {
        self.natives.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.natives.read().contains_key(name)
    }
}

/// Check the argument count of a native
pub(crate) fn arity(name: &str, args: &[Val], min: usize, max: usize) -> Result<(), ExecError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(ExecError::eval(format!(
            "{}() takes {} arguments, {} given",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}
