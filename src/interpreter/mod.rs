//! Za interpreter
//!
//! `lexer` turns source into phrases; `executor` stores them as function
//! spaces and runs them.

pub mod executor;
pub mod lexer;

pub use executor::{ExecError, Interpreter, InterpreterBuilder, Session, Val};
pub use lexer::{phrases, LexError};
