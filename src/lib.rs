pub mod cli;
pub mod config;
pub mod interpreter;

pub use config::EngineConfig;
pub use interpreter::executor::{exit_codes, ExecError, Interpreter, Session, Val};
