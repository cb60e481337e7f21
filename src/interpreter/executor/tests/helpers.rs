//! Test helpers for executor tests
//!
//! Build an interpreter whose output is captured and whose errors come back
//! as values instead of ending the test process.

use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::interpreter::executor::{ExecError, Interpreter, Val};

/// Output sink shared between the interpreter and the test
#[derive(Clone, Default)]
pub struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Errors are returned, ASSERT is active, no shell fallback
pub fn test_config() -> EngineConfig {
    EngineConfig {
        error_suppression: true,
        test_mode: true,
        shell_fallback: false,
        ..Default::default()
    }
}

pub fn build_interpreter(config: EngineConfig) -> (Arc<Interpreter>, SharedOutput) {
    let output = SharedOutput::default();
    let interp = Interpreter::builder()
        .config(config)
        .output(Box::new(output.clone()))
        .build();
    (interp, output)
}

/// Load `source` as the main program of `interp` and run it
pub fn run_on(interp: &Arc<Interpreter>, source: &str) -> Result<Vec<Val>, ExecError> {
    let space = interp.load_source("main", source)?;
    interp.run_main(space, Vec::new())
}

pub fn run(source: &str) -> Result<Vec<Val>, ExecError> {
    let (interp, _) = build_interpreter(test_config());
    run_on(&interp, source)
}

/// Run a program that must succeed and return its values
pub fn run_ok(source: &str) -> Vec<Val> {
    run(source).expect("program failed")
}

/// Run a program that must fail and return the underlying error
pub fn run_err(source: &str) -> ExecError {
    let err = run(source).expect_err("program should have failed");
    err.root().clone()
}

/// Everything a successful program printed
pub fn output_of(source: &str) -> String {
    let (interp, output) = build_interpreter(test_config());
    run_on(&interp, source).expect("program failed");
    output.contents()
}
