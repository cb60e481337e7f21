//! Core execution loop
//!
//! `execute` runs one invocation inside the call table slot it was given.
//!
//! ## Function Organization
//! 1. execute() - Binding setup, panic recovery, error finishing
//! 2. run_frame() - Statement loop; the outer loop re-enters for tail calls
//! 3. bind_arguments() / complete() - Frame entry and teardown

use std::panic::{self, AssertUnwindSafe};
use std::process::Command;
use std::sync::Arc;
use tracing::{error, trace, warn};

use super::errors::{panic_message, ExecError};
use super::expressions::{coerce, EvalContext};
use super::spaces::FunctionSpace;
use super::statements::{dispatch, Frame};
use super::types::{ensure_slot, Kind, Val, Variable};
use super::vm::{CallResult, Interpreter, Invocation, Mode};

/* ===================== Step Result ===================== */

/// What a statement handler asks the loop to do next
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Carry on with the following statement
    Continue,
    /// Continue at this pc
    Jump(usize),
    /// Leave the function with these values
    Return(Vec<Val>),
    /// Re-enter the current function with these arguments
    TailCall(Vec<Val>),
    /// Stop the process with this status
    Exit(i32),
}

/// Position of the statement being dispatched, kept outside the panic boundary
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    pc: usize,
    line: usize,
}

/* ===================== Public API ===================== */

impl Interpreter {
    /// Execute the function space behind `inv.slot`
    ///
    /// On success the return values are stored in the call table entry. On
    /// failure the error is located, reported once, and handed to `finish`.
    pub fn execute(
        self: &Arc<Self>,
        vars: &mut Vec<Variable>,
        inv: Invocation,
    ) -> Result<CallResult, ExecError> {
        let entry = self
            .calltable
            .entry(inv.slot)
            .ok_or_else(|| ExecError::eval(format!("call table slot {} is not allocated", inv.slot)))?;
        let space = self
            .spaces
            .get(entry.base)
            .ok_or_else(|| ExecError::UnknownFunction(entry.name.clone()))?;

        let params = self.spaces.param_names(space.id);
        match inv.mode {
            Mode::New => {
                if !self.bindings.is_prepared(space.id) {
                    self.bindings.reset(space.id);
                    self.bindings.prepare(space.id, &params, &space.phrases);
                }
            }
            Mode::Static => self.bindings.prepare(space.id, &params, &space.phrases),
        }
        ensure_slot(vars, self.bindings.len(space.id).saturating_sub(1));

        let mut cursor = Cursor::default();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_frame(vars, &inv, &space, &mut cursor)
        }));
        let result = match outcome {
            Ok(r) => r,
            Err(payload) => Err(ExecError::Panic(panic_message(payload.as_ref()))),
        };

        match result {
            Ok(done) => Ok(done),
            Err(e) => self.fail(e, &space, cursor),
        }
    }

    /* --------------------- Frame Loop --------------------- */

    fn run_frame(
        self: &Arc<Self>,
        vars: &mut Vec<Variable>,
        inv: &Invocation,
        space: &FunctionSpace,
        cursor: &mut Cursor,
    ) -> Result<CallResult, ExecError> {
        let limits = &self.config().limits;
        let mut args = inv.args.clone();
        let mut receiver = inv.method.clone();

        'reentry: loop {
            self.bind_arguments(vars, space, inv, args, receiver.take())?;
            let mut frame = Frame::new(
                self,
                space,
                inv.slot,
                limits.max_loop_depth,
                limits.max_case_depth,
            );

            while frame.pc < space.phrases.len() {
                if self.interrupted() {
                    return Ok(CallResult {
                        ended_early: true,
                        ..Default::default()
                    });
                }

                let phrase = &space.phrases[frame.pc];
                cursor.pc = frame.pc;
                cursor.line = phrase.line;
                trace!(function = %space.name, pc = frame.pc, line = phrase.line, "dispatch");

                match dispatch(&mut frame, vars, phrase)? {
                    Step::Continue => frame.pc += 1,
                    Step::Jump(pc) => frame.pc = pc,
                    Step::Return(values) => {
                        return self.complete(vars, space, inv, values, true);
                    }
                    Step::TailCall(next) => {
                        trace!(function = %space.name, "tail call");
                        args = next;
                        if inv.method.is_some() {
                            receiver = self.self_value(vars, space);
                        }
                        continue 'reentry;
                    }
                    Step::Exit(code) => return Err(ExecError::Exit(code)),
                }
            }

            return self.complete(vars, space, inv, Vec::new(), false);
        }
    }

    /* --------------------- Entry --------------------- */

    fn bind_arguments(
        &self,
        vars: &mut Vec<Variable>,
        space: &FunctionSpace,
        inv: &Invocation,
        args: Vec<Val>,
        receiver: Option<Val>,
    ) -> Result<(), ExecError> {
        let params = self.spaces.params(space.id);
        if args.len() > params.len() {
            return Err(ExecError::eval(format!(
                "{} takes {} arguments, {} given",
                space.name,
                params.len(),
                args.len()
            )));
        }

        let mut supplied: Vec<Option<Val>> = vec![None; params.len()];
        match &inv.arg_names {
            Some(names) => {
                if names.len() != args.len() {
                    return Err(ExecError::eval("argument names do not match argument count"));
                }
                for (name, value) in names.iter().zip(args) {
                    let idx = params.iter().position(|p| &p.name == name).ok_or_else(|| {
                        ExecError::eval(format!("{} has no parameter '{}'", space.name, name))
                    })?;
                    supplied[idx] = Some(value);
                }
            }
            None => {
                for (idx, value) in args.into_iter().enumerate() {
                    supplied[idx] = Some(value);
                }
            }
        }

        for (param, value) in params.iter().zip(supplied) {
            let value = match value.or_else(|| param.default.clone()) {
                Some(v) => v,
                None => {
                    return Err(ExecError::MissingArgument {
                        function: space.name.clone(),
                        name: param.name.clone(),
                    })
                }
            };
            let value = match value {
                Val::Str(s) if self.config().interpolation => Val::Str(self.globals.interpolate(&s)),
                other => other,
            };
            let slot = self.bindings.resolve(space.id, &param.name);
            ensure_slot(vars, slot);
            vars[slot] = Variable::new(param.name.clone(), value);
        }

        if let Some(receiver) = receiver {
            let slot = self.bindings.resolve(space.id, "self");
            ensure_slot(vars, slot);
            vars[slot] = Variable::new("self", receiver);
        }
        Ok(())
    }

    fn self_value(&self, vars: &[Variable], space: &FunctionSpace) -> Option<Val> {
        self.bindings
            .lookup(space.id, "self")
            .and_then(|slot| vars.get(slot))
            .map(|v| v.value.clone())
    }

    /* --------------------- Teardown --------------------- */

    fn complete(
        &self,
        vars: &[Variable],
        space: &FunctionSpace,
        inv: &Invocation,
        values: Vec<Val>,
        ended_early: bool,
    ) -> Result<CallResult, ExecError> {
        let values = match &inv.kind_override {
            Some(kind) => self.check_return_kinds(values, kind)?,
            None => values,
        };
        let method_result = inv
            .method
            .as_ref()
            .and_then(|_| self.self_value(vars, space));

        let count = values.len();
        self.calltable
            .finish_invocation(inv.slot, values, inv.mode != Mode::Static);
        Ok(CallResult {
            return_count: count,
            ended_early,
            method_result,
        })
    }

    fn check_return_kinds(&self, values: Vec<Val>, kind: &str) -> Result<Vec<Val>, ExecError> {
        match Kind::from_name(kind) {
            Some(k) => values
                .into_iter()
                .map(|v| {
                    let v = coerce(v, k)?;
                    if k.accepts(v.kind()) {
                        Ok(v)
                    } else {
                        Err(ExecError::eval(format!("expected a {} return value, got {}", k, v.kind())))
                    }
                })
                .collect(),
            None => {
                for v in &values {
                    match v {
                        Val::Record(r) if r.type_name == kind => {}
                        other => {
                            return Err(ExecError::eval(format!(
                                "expected a {} return value, got {}",
                                kind,
                                other.kind()
                            )))
                        }
                    }
                }
                Ok(values)
            }
        }
    }

    /* --------------------- Failure --------------------- */

    fn fail(&self, err: ExecError, space: &FunctionSpace, cursor: Cursor) -> Result<CallResult, ExecError> {
        if let ExecError::Exit(code) = err.root() {
            if self.config().error_suppression {
                return Err(err);
            }
            std::process::exit(*code);
        }

        let origin = !err.is_located();

        if origin && self.shell_fallback_applies(&err) {
            if let Some(phrase) = space.phrases.get(cursor.pc) {
                warn!(line = cursor.line, command = %phrase.original, "retrying statement as shell command");
                return self.run_shell(&phrase.original);
            }
        }

        let err = err.located(&space.name, cursor.line);
        if origin {
            self.report(&err);
        }
        Err(self.finish(err))
    }

    fn shell_fallback_applies(&self, err: &ExecError) -> bool {
        let cfg = self.config();
        cfg.interactive
            && cfg.shell_fallback
            && !err.is_hard()
            && !matches!(err, ExecError::Assertion(_))
    }

    fn run_shell(&self, command: &str) -> Result<CallResult, ExecError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| ExecError::eval(format!("shell fallback failed: {}", e)))?;
        self.write_output(&String::from_utf8_lossy(&output.stdout))?;
        if !output.stderr.is_empty() {
            self.write_output(&String::from_utf8_lossy(&output.stderr))?;
        }
        Ok(CallResult {
            ended_early: true,
            ..Default::default()
        })
    }

    fn report(&self, err: &ExecError) {
        match err {
            ExecError::At { function, line, source } => {
                error!(function = %function, line, "{}", source)
            }
            other => error!("{}", other),
        }
    }

    /// Decide how an error ends: returned to the caller when errors are
    /// suppressed, process exit when hard or non-interactive, otherwise the
    /// interactive loop is interrupted.
    fn finish(&self, err: ExecError) -> ExecError {
        let cfg = self.config();
        if cfg.error_suppression {
            return err;
        }
        if err.is_hard() || !cfg.interactive {
            std::process::exit(err.exit_code());
        }
        self.interrupt();
        err
    }
}

/// Evaluation context for the running frame
pub(crate) fn context<'a>(
    interp: &'a Arc<Interpreter>,
    vars: &'a mut Vec<Variable>,
    slot: u32,
    base: u32,
    line: usize,
) -> EvalContext<'a> {
    let mut ctx = EvalContext::new(interp, vars, slot, base);
    ctx.line = line;
    ctx
}
