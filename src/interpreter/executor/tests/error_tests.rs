//! Tests for error location, panics, interrupts and exit codes

use std::sync::Arc;

use super::helpers::{build_interpreter, run, run_on, test_config, SharedOutput};
use crate::config::EngineConfig;
use crate::interpreter::executor::{exit_codes, EvalContext, ExecError, Interpreter, Session, Val};

#[test]
fn test_errors_carry_function_and_line() {
    let err = run("x = 1\ny = undefined_name\n").unwrap_err();

    match err {
        ExecError::At { function, line, source } => {
            assert_eq!(function, "main");
            assert_eq!(line, 2);
            assert!(matches!(*source, ExecError::Eval(_)));
        }
        other => panic!("expected a located error, got {:?}", other),
    }
}

#[test]
fn test_error_in_callee_is_located_once() {
    let source = r#"
        define inner()
            return 1 / nothing
        enddef
        return inner()
    "#;

    let err = run(source).unwrap_err();

    let ExecError::At { function, source, .. } = &err else {
        panic!("expected a located error, got {:?}", err);
    };
    assert_eq!(function, "inner");
    assert!(!source.is_located());
}

#[test]
fn test_panic_in_native_is_recovered() {
    let interp = Interpreter::builder()
        .config(test_config())
        .output(Box::new(SharedOutput::default()))
        .native("boom", Arc::new(
            |_: &str, _: &mut EvalContext<'_>, _: Vec<Val>| -> Result<Val, ExecError> {
                panic!("kaboom")
            },
        ))
        .build();

    let err = run_on(&interp, "boom()").unwrap_err();

    match err.root() {
        ExecError::Panic(msg) => assert!(msg.contains("kaboom")),
        other => panic!("expected a panic error, got {:?}", other),
    }
    assert_eq!(err.exit_code(), exit_codes::FATAL);
}

#[test]
fn test_registered_native_is_callable() {
    let interp = Interpreter::builder()
        .config(test_config())
        .output(Box::new(SharedOutput::default()))
        .native(
            "double",
            Arc::new(|_: &str, _: &mut EvalContext<'_>, args: Vec<Val>| match args.first() {
                Some(Val::Int(n)) => Ok(Val::Int(n * 2)),
                _ => Err(ExecError::eval("double() needs an int")),
            }),
        )
        .build();

    assert_eq!(run_on(&interp, "return double(4)").unwrap(), vec![Val::Int(8)]);
}

#[test]
fn test_interrupt_stops_before_next_statement() {
    let (interp, output) = super::helpers::build_interpreter(test_config());
    interp.interrupt();

    let values = run_on(&interp, "println \"never\"\nreturn 1").unwrap();

    assert!(values.is_empty());
    assert_eq!(output.contents(), "");
    interp.clear_interrupt();
    assert!(!interp.interrupted());
}

#[test]
fn test_lex_error_is_fatal() {
    let (interp, _) = super::helpers::build_interpreter(test_config());

    let err = interp.load_source("main", "x = \"unterminated").unwrap_err();

    assert!(matches!(err, ExecError::Fatal { code: exit_codes::LEX, .. }));
}

#[test]
fn test_exit_codes_by_error_kind() {
    assert_eq!(ExecError::syntax("x").exit_code(), exit_codes::SYNTAX);
    assert_eq!(ExecError::eval("x").exit_code(), exit_codes::EVAL);
    assert_eq!(ExecError::Assertion("x".into()).exit_code(), exit_codes::ASSERT);
    assert_eq!(
        ExecError::MissingArgument {
            function: "f".into(),
            name: "a".into()
        }
        .located("main", 3)
        .exit_code(),
        exit_codes::NARGS
    );
    assert_eq!(ExecError::Exit(9).exit_code(), 9);
}

fn interactive_config(shell_fallback: bool) -> EngineConfig {
    EngineConfig {
        interactive: true,
        shell_fallback,
        ..test_config()
    }
}

#[test]
fn test_interactive_failure_falls_back_to_shell() {
    let (interp, output) = build_interpreter(interactive_config(true));
    let mut session = Session::open(&interp, "repl").unwrap();

    assert_eq!(session.run(&interp, "echo fallback_ok").unwrap(), vec![]);
    assert_eq!(output.contents(), "fallback_ok\n");
}

#[test]
fn test_shell_fallback_disabled_returns_error() {
    let (interp, output) = build_interpreter(interactive_config(false));
    let mut session = Session::open(&interp, "repl").unwrap();

    let err = session.run(&interp, "echo fallback_ok").unwrap_err();
    assert!(!err.is_hard());
    assert_eq!(output.contents(), "");
}

#[test]
fn test_hard_error_never_reaches_shell() {
    let (interp, output) = build_interpreter(interactive_config(true));
    let mut session = Session::open(&interp, "repl").unwrap();

    let err = session.run(&interp, "for i = 1 to 3 step 0\nendfor").unwrap_err();
    assert!(err.is_hard());
    assert_eq!(err.exit_code(), exit_codes::EVAL);
    // sh would have complained about the FOR syntax on stderr
    assert_eq!(output.contents(), "");
}

#[test]
fn test_shell_fallback_needs_interactive_mode() {
    let config = EngineConfig {
        shell_fallback: true,
        ..test_config()
    };
    let (interp, output) = build_interpreter(config);

    assert!(run_on(&interp, "echo fallback_ok").is_err());
    assert_eq!(output.contents(), "");
}
