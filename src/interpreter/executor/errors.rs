//! Executor errors
//!
//! Every failure inside a running function space becomes an `ExecError`. The
//! engine attaches the source location once, reports it, then `finish` decides
//! whether the process exits, the interactive loop is interrupted, or the
//! error is handed back to the caller.

use thiserror::Error;

/// Process exit codes
pub mod exit_codes {
    pub const SYNTAX: i32 = 1;
    pub const FATAL: i32 = 2;
    pub const NARGS: i32 = 3;
    pub const EXISTS: i32 = 4;
    pub const EVAL: i32 = 5;
    pub const ASSERT: i32 = 12;
    pub const LEX: i32 = 127;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("evaluation error: {0}")]
    Eval(String),

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("missing argument '{name}' in call to {function}")]
    MissingArgument { function: String, name: String },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("call table exhausted at {0} slots")]
    CallTableExhausted(usize),

    #[error("call depth limit of {0} exceeded")]
    CallDepthExceeded(usize),

    #[error("function '{name}' is longer than {limit} statements")]
    BodyTooLong { name: String, limit: usize },

    /// Unconditionally fatal condition
    #[error("{message}")]
    Fatal { code: i32, message: String },

    #[error("panic: {0}")]
    Panic(String),

    #[error("exit requested with status {0}")]
    Exit(i32),

    #[error("[{function}] line {line}: {source}")]
    At {
        function: String,
        line: usize,
        #[source]
        source: Box<ExecError>,
    },
}

impl ExecError {
    pub fn fatal(code: i32, message: impl Into<String>) -> Self {
        ExecError::Fatal {
            code,
            message: message.into(),
        }
    }

    pub fn eval(message: impl Into<String>) -> Self {
        ExecError::Eval(message.into())
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        ExecError::Syntax(message.into())
    }

    /// Attach a source location unless one is already present
    pub fn located(self, function: &str, line: usize) -> Self {
        if self.is_located() {
            return self;
        }
        ExecError::At {
            function: function.to_string(),
            line,
            source: Box::new(self),
        }
    }

    pub fn is_located(&self) -> bool {
        matches!(self, ExecError::At { .. })
    }

    /// Innermost error with any location wrappers removed
    pub fn root(&self) -> &ExecError {
        match self {
            ExecError::At { source, .. } => source.root(),
            other => other,
        }
    }

    /// Hard errors always end the process (unless suppressed)
    pub fn is_hard(&self) -> bool {
        matches!(
            self.root(),
            ExecError::Fatal { .. }
                | ExecError::CallTableExhausted(_)
                | ExecError::CallDepthExceeded(_)
                | ExecError::BodyTooLong { .. }
                | ExecError::Exit(_)
        )
    }

    pub fn exit_code(&self) -> i32 {
        match self.root() {
            ExecError::Syntax(_) => exit_codes::SYNTAX,
            ExecError::Eval(_) | ExecError::UnknownFunction(_) => exit_codes::EVAL,
            ExecError::Assertion(_) => exit_codes::ASSERT,
            ExecError::MissingArgument { .. } => exit_codes::NARGS,
            ExecError::CallTableExhausted(_)
            | ExecError::CallDepthExceeded(_)
            | ExecError::BodyTooLong { .. } => exit_codes::FATAL,
            ExecError::Fatal { code, .. } => *code,
            ExecError::Panic(_) => exit_codes::FATAL,
            ExecError::Exit(code) => *code,
            ExecError::At { .. } => exit_codes::FATAL,
        }
    }
}

/// Turn a caught panic payload into a message
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_located_wraps_once() {
        let err = ExecError::syntax("bad")
            .located("main", 3)
            .located("caller", 9);
        match &err {
            ExecError::At { function, line, .. } => {
                assert_eq!(function, "main");
                assert_eq!(*line, 3);
            }
            other => panic!("expected located error, got {:?}", other),
        }
        assert_eq!(err.exit_code(), exit_codes::SYNTAX);
        assert!(!err.is_hard());
    }

    #[test]
    fn test_fatal_is_hard() {
        let err = ExecError::fatal(exit_codes::EVAL, "road to nowhere").located("f", 1);
        assert!(err.is_hard());
        assert_eq!(err.exit_code(), exit_codes::EVAL);
    }

    #[test]
    fn test_call_depth_is_hard_resource_error() {
        let err = ExecError::CallDepthExceeded(100).located("sum", 4);
        assert!(err.is_hard());
        assert_eq!(err.exit_code(), exit_codes::FATAL);
    }
}
