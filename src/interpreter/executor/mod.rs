//! Execution core
//!
//! Phrases produced by the lexer are stored as function spaces and run by the
//! frame loop in `exec_loop`. Every invocation, synchronous or async, takes a
//! slot in the shared call table for its lifetime.

pub mod async_tasks;
pub mod bindings;
pub mod calltable;
pub mod errors;
pub mod exec_loop;
pub mod expressions;
pub mod globals;
pub mod lookahead;
pub mod spaces;
pub mod statements;
pub mod stdlib;
pub mod types;
pub mod vm;

#[cfg(test)]
mod tests;

pub use async_tasks::{AsyncHandle, Envelope, HandleMap, Spawned};
pub use calltable::{CallTable, CallTableEntry, UNIQUE_MARKER};
pub use errors::{exit_codes, ExecError};
pub use exec_loop::Step;
pub use expressions::{EvalContext, Evaluation, Evaluator, ExprEvaluator};
pub use spaces::{FunctionSpace, Parameter};
pub use stdlib::NativeFunction;
pub use types::{Kind, Phrase, Token, TokenKind, Val, Variable};
pub use vm::{CallResult, Interpreter, InterpreterBuilder, Invocation, Mode, Session, TestTally};
