//! Interpreter services
//!
//! The `Interpreter` owns every shared table the engine needs: the call table,
//! function space bodies, binding tables, globals and type definitions. Each
//! sits behind its own lock. Variable arrays are not in here; every invocation
//! gets its own from the caller.

use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use super::bindings::Bindings;
use super::calltable::{CallTable, CallTableEntry};
use super::errors::{exit_codes, panic_message, ExecError};
use super::expressions::{Evaluator, ExprEvaluator};
use super::globals::{Definitions, Globals};
use super::spaces::FunctionSpaces;
use super::stdlib::{NativeFunction, Stdlib};
use super::types::{Phrase, Val, Variable};
use crate::config::EngineConfig;
use crate::interpreter::lexer;

/* ===================== Invocation ===================== */

/// Binding behaviour of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Ordinary call: fresh layout on first use, slot disposable on return
    #[default]
    New,
    /// Persistent frame: bindings kept across re-entry, no teardown
    Static,
}

/// Everything `execute` needs besides the variable array
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub mode: Mode,
    pub slot: u32,
    /// Slot that registered this call
    pub registrant: u32,
    /// Receiver for method calls; bound to `self`
    pub method: Option<Val>,
    /// Kind (or struct type) every returned value must have
    pub kind_override: Option<String>,
    /// Bind arguments by name instead of position
    pub arg_names: Option<Vec<String>>,
    pub args: Vec<Val>,
}

impl Invocation {
    pub fn new(slot: u32, registrant: u32, args: Vec<Val>) -> Self {
        Self {
            slot,
            registrant,
            args,
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_method(mut self, receiver: Val) -> Self {
        self.method = Some(receiver);
        self
    }

    pub fn with_kind_override(mut self, kind: impl Into<String>) -> Self {
        self.kind_override = Some(kind.into());
        self
    }

    pub fn with_arg_names(mut self, names: Vec<String>) -> Self {
        self.arg_names = Some(names);
        self
    }
}

/// Outcome of a completed invocation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallResult {
    pub return_count: usize,
    /// Stopped before falling off the end of the body
    pub ended_early: bool,
    /// Final value of `self` for method calls
    pub method_result: Option<Val>,
}

/// ASSERT outcomes inside selected TEST sections
#[derive(Debug, Default)]
pub struct TestTally {
    passed: AtomicUsize,
    failed: AtomicUsize,
}

impl TestTally {
    pub fn record(&self, passed: bool) {
        let counter = if passed { &self.passed } else { &self.failed };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn passed(&self) -> usize {
        self.passed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

/* ===================== Interpreter ===================== */

pub struct Interpreter {
    config: EngineConfig,
    pub calltable: CallTable,
    pub spaces: FunctionSpaces,
    pub bindings: Bindings,
    pub globals: Globals,
    pub definitions: Definitions,
    pub tests: TestTally,
    pub(crate) stdlib: Stdlib,
    evaluator: Box<dyn Evaluator>,
    output: Mutex<Box<dyn Write + Send>>,
    signal: AtomicBool,
}

impl Interpreter {
    pub fn builder() -> InterpreterBuilder {
        InterpreterBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &dyn Evaluator {
        self.evaluator.as_ref()
    }

    pub fn register_native(&self, name: impl Into<String>, f: NativeFunction) {
        self.stdlib.register(name, f);
    }

    /// Issue a call table slot (takes the table lock)
    pub fn allocate(
        &self,
        template: &str,
        prepared: Option<CallTableEntry>,
    ) -> Result<(u32, String), ExecError> {
        self.calltable.allocate(template, prepared)
    }

    /// Register a function space under `name`, reusing its id if it exists
    pub fn define_space(&self, name: &str, phrases: Vec<Phrase>) -> Result<u32, ExecError> {
        let limit = self.config.limits.max_function_len;
        if phrases.len() > limit {
            return Err(ExecError::BodyTooLong {
                name: name.to_string(),
                limit,
            });
        }
        let id = match self.find_function(name) {
            Some(id) => id,
            None => {
                let mut table = self.calltable.lock();
                let (id, _) = table.allocate(name, None)?;
                if let Some(entry) = table.entry_mut(id) {
                    entry.base = id;
                }
                id
            }
        };
        self.spaces.insert(id, name, phrases);
        self.bindings.reset(id);
        Ok(id)
    }

    /// Lex `source` and register it as function space `name`
    pub fn load_source(&self, name: &str, source: &str) -> Result<u32, ExecError> {
        let phrases =
            lexer::phrases(source).map_err(|e| ExecError::fatal(exit_codes::LEX, e.to_string()))?;
        self.define_space(name, phrases)
    }

    /// Function space id for a defined function name
    pub fn find_function(&self, name: &str) -> Option<u32> {
        self.calltable
            .find(name)
            .filter(|id| self.spaces.contains(*id))
    }

    /// Run a loaded space as the program entry point; `argv` is published as a global
    pub fn run_main(self: &Arc<Self>, space: u32, argv: Vec<String>) -> Result<Vec<Val>, ExecError> {
        self.globals
            .set("argv", Val::List(argv.into_iter().map(Val::Str).collect()));
        let name = self
            .spaces
            .get(space)
            .map(|s| s.name.clone())
            .ok_or_else(|| ExecError::UnknownFunction(format!("#{}", space)))?;
        let (slot, _) = self.allocate(
            &format!("{}@", name),
            Some(CallTableEntry::invocation(space, 0, 0).at_depth(1)),
        )?;
        let outcome = self.on_engine_stack(&name, || {
            let mut vars = Vec::new();
            self.execute(&mut vars, Invocation::new(slot, 0, Vec::new()))
        });
        let retvals = self.calltable.take_retvals(slot).unwrap_or_default();
        self.calltable.release(slot, self.config.calltable.call_shyness);
        outcome.map(|_| retvals)
    }

    /// Synchronous call of function space `target`
    ///
    /// Returns the collapsed return value and, for method calls, the final
    /// receiver.
    pub fn call(
        self: &Arc<Self>,
        caller: u32,
        target: u32,
        line: usize,
        args: Vec<Val>,
        method: Option<Val>,
    ) -> Result<(Val, Option<Val>), ExecError> {
        let name = self
            .spaces
            .get(target)
            .map(|s| s.name.clone())
            .ok_or_else(|| ExecError::UnknownFunction(format!("#{}", target)))?;
        let entry = self.nested_entry(target, caller, line)?;
        let (slot, _) = self.allocate(&format!("{}@", name), Some(entry))?;

        let mut invocation = Invocation::new(slot, caller, args);
        invocation.method = method;
        let mut vars = Vec::new();
        let outcome = self.execute(&mut vars, invocation);

        let retvals = self.calltable.take_retvals(slot).unwrap_or_default();
        self.calltable.release(slot, self.config.calltable.call_shyness);
        let result = outcome?;
        Ok((Val::from_returns(retvals), result.method_result))
    }

    /// Call a defined function by name from outside any frame
    pub fn call_by_name(self: &Arc<Self>, name: &str, args: Vec<Val>) -> Result<Val, ExecError> {
        let target = self
            .find_function(name)
            .ok_or_else(|| ExecError::UnknownFunction(name.to_string()))?;
        self.on_engine_stack(name, || self.call(0, target, 0, args, None))
            .map(|(v, _)| v)
    }

    /// Call table descriptor for a call of `target` from `caller`
    ///
    /// Fails once the chain of callers is `limits.max_call_depth` deep.
    pub(crate) fn nested_entry(
        &self,
        target: u32,
        caller: u32,
        line: usize,
    ) -> Result<CallTableEntry, ExecError> {
        let depth = self.calltable.depth_of(caller) + 1;
        let limit = self.config.limits.max_call_depth;
        if depth > limit {
            return Err(ExecError::CallDepthExceeded(limit));
        }
        Ok(CallTableEntry::invocation(target, caller, line).at_depth(depth))
    }

    /// Stack size for engine threads, in bytes
    pub(crate) fn engine_stack_size(&self) -> usize {
        self.config.limits.engine_stack_mb * 1024 * 1024
    }

    /// Run `f` to completion on a thread with the engine stack size
    ///
    /// Script calls nest on the native stack, so entry points never run
    /// directly on whatever stack the host happens to have.
    pub(crate) fn on_engine_stack<T, F>(&self, name: &str, f: F) -> Result<T, ExecError>
    where
        F: FnOnce() -> Result<T, ExecError> + Send,
        T: Send,
    {
        thread::scope(|scope| {
            let handle = thread::Builder::new()
                .name(name.to_string())
                .stack_size(self.engine_stack_size())
                .spawn_scoped(scope, f)
                .map_err(|e| {
                    ExecError::fatal(exit_codes::FATAL, format!("could not start engine thread: {}", e))
                })?;
            handle
                .join()
                .unwrap_or_else(|payload| Err(ExecError::Panic(panic_message(payload.as_ref()))))
        })
    }

    /* --------------------- Signals --------------------- */

    /// Ask every running frame to stop at its next statement
    pub fn interrupt(&self) {
        self.signal.store(true, Ordering::SeqCst);
    }

    pub fn clear_interrupt(&self) {
        self.signal.store(false, Ordering::SeqCst);
    }

    pub fn interrupted(&self) -> bool {
        self.signal.load(Ordering::SeqCst)
    }

    /* --------------------- Output --------------------- */

    pub fn write_output(&self, text: &str) -> Result<(), ExecError> {
        let mut out = self.output.lock();
        out.write_all(text.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| ExecError::eval(format!("output failed: {}", e)))
    }
}

/* ===================== Builder ===================== */

#[derive(Default)]
pub struct InterpreterBuilder {
    config: Option<EngineConfig>,
    evaluator: Option<Box<dyn Evaluator>>,
    output: Option<Box<dyn Write + Send>>,
    natives: Vec<(String, NativeFunction)>,
}

impl InterpreterBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the built-in expression evaluator
    pub fn evaluator(mut self, evaluator: Box<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Where PRINT and interactive echo go (stdout by default)
    pub fn output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn native(mut self, name: impl Into<String>, f: NativeFunction) -> Self {
        self.natives.push((name.into(), f));
        self
    }

    pub fn build(self) -> Arc<Interpreter> {
        let config = self.config.unwrap_or_default();
        let stdlib = Stdlib::with_builtins();
        for (name, f) in self.natives {
            stdlib.register(name, f);
        }
        Arc::new(Interpreter {
            calltable: CallTable::new(config.calltable.clone()),
            spaces: FunctionSpaces::new(),
            bindings: Bindings::new(),
            globals: Globals::new(),
            definitions: Definitions::new(),
            tests: TestTally::default(),
            stdlib,
            evaluator: self.evaluator.unwrap_or_else(|| Box::new(ExprEvaluator)),
            output: Mutex::new(self.output.unwrap_or_else(|| Box::new(std::io::stdout()))),
            signal: AtomicBool::new(false),
            config,
        })
    }
}

/* ===================== Sessions ===================== */

/// Persistent frame for line-at-a-time execution
///
/// Every chunk of source replaces the session's body and runs in static mode
/// against the same variable array, so locals survive between chunks.
pub struct Session {
    pub space: u32,
    pub slot: u32,
    vars: Vec<Variable>,
}

impl Session {
    pub fn open(interp: &Arc<Interpreter>, name: &str) -> Result<Self, ExecError> {
        let space = interp.define_space(name, Vec::new())?;
        let (slot, _) = interp.allocate(
            &format!("{}@", name),
            Some(CallTableEntry::invocation(space, 0, 0).at_depth(1)),
        )?;
        Ok(Self {
            space,
            slot,
            vars: Vec::new(),
        })
    }

    pub fn run(&mut self, interp: &Arc<Interpreter>, source: &str) -> Result<Vec<Val>, ExecError> {
        let phrases =
            lexer::phrases(source).map_err(|e| ExecError::eval(e.to_string()))?;
        let name = interp
            .spaces
            .get(self.space)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        interp.spaces.insert(self.space, name.as_str(), phrases);
        interp.clear_interrupt();
        let vars = &mut self.vars;
        let invocation = Invocation::new(self.slot, 0, Vec::new()).with_mode(Mode::Static);
        interp.on_engine_stack(&name, || interp.execute(vars, invocation))?;
        Ok(interp.calltable.take_retvals(self.slot).unwrap_or_default())
    }

    pub fn variables(&self) -> &[Variable] {
        &self.vars
    }
}
