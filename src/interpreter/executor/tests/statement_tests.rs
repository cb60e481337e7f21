//! Tests for declarations, output and the smaller statements

use std::path::Path;
use std::sync::Arc;

use super::helpers::{build_interpreter, output_of, run_err, run_ok, run_on, test_config, SharedOutput};
use crate::config::AssertPolicy;
use crate::interpreter::executor::{EvalContext, ExecError, Interpreter, Session, Val};

#[test]
fn test_var_declares_typed_variable() {
    let source = r#"
        var n int = 4
        n += 1
        return n
    "#;

    assert_eq!(run_ok(source), vec![Val::Int(5)]);
}

#[test]
fn test_var_without_value_uses_zero() {
    let source = r#"
        var s string
        var l list
        return s, len(l)
    "#;

    assert_eq!(run_ok(source), vec![Val::str(""), Val::Int(0)]);
}

#[test]
fn test_var_rejects_assignment_of_other_kind() {
    let source = r#"
        var n int
        n = "text"
    "#;

    assert!(matches!(run_err(source), ExecError::Eval(_)));
}

#[test]
fn test_var_unknown_type() {
    assert!(matches!(run_err("var n widget"), ExecError::Syntax(_)));
}

#[test]
fn test_struct_definition_and_construction() {
    let source = r#"
        struct point
            x int
            y int = 5
        endstruct
        p = point(1)
        p.x = p.x + 10
        return p.x, p.y
    "#;

    assert_eq!(run_ok(source), vec![Val::Int(11), Val::Int(5)]);
}

#[test]
fn test_var_of_struct_type() {
    let source = r#"
        struct point
            x int
            y int
        endstruct
        var p point
        p.y = 3
        return p.y
    "#;

    assert_eq!(run_ok(source), vec![Val::Int(3)]);
}

#[test]
fn test_struct_typed_var_rejects_other_values() {
    let source = r#"
        struct point
            x int
        endstruct
        var p point
        p = 4
    "#;

    assert!(matches!(run_err(source), ExecError::Eval(_)));
}

#[test]
fn test_enum_members_auto_increment() {
    let source = r#"
        enum colour ( red, green = 5, blue )
        return colour.red, colour.green, colour.blue
    "#;

    assert_eq!(run_ok(source), vec![Val::Int(0), Val::Int(5), Val::Int(6)]);
}

#[test]
fn test_setglob_is_visible_in_functions() {
    let source = r#"
        define read()
            return g
        enddef
        setglob g = 7
        return read()
    "#;

    assert_eq!(run_ok(source), vec![Val::Int(7)]);
}

#[test]
fn test_unset_removes_local() {
    let source = r#"
        x = 1
        unset x
        return x
    "#;

    assert!(matches!(run_err(source), ExecError::Eval(_)));
}

#[test]
fn test_print_and_println() {
    let source = r#"
        println "a", 1
        print "b", true
        print [1, 2]
    "#;

    assert_eq!(output_of(source), "a1\nbtrue[1 2]");
}

#[test]
fn test_on_do_runs_statement_when_condition_holds() {
    let source = r#"
        x = 0
        on true do x = 5
        on false do x = 9
        return x
    "#;

    assert_eq!(run_ok(source), vec![Val::Int(5)]);
}

#[test]
fn test_on_do_can_break() {
    let source = r#"
        n = 0
        while true
            n += 1
            on n == 3 do break
        endwhile
        return n
    "#;

    assert_eq!(run_ok(source), vec![Val::Int(3)]);
}

#[test]
fn test_on_do_rejects_block_statements() {
    assert!(matches!(
        run_err("on true do if true"),
        ExecError::Syntax(_)
    ));
}

#[test]
fn test_assert_in_test_mode() {
    assert!(matches!(run_err("assert 1 == 2"), ExecError::Assertion(_)));
    assert_eq!(run_ok("assert 1 == 1\nreturn 1"), vec![Val::Int(1)]);
}

#[test]
fn test_assert_ignored_outside_test_mode() {
    let mut config = test_config();
    config.test_mode = false;
    let (interp, _) = build_interpreter(config);

    assert_eq!(
        run_on(&interp, "assert false\nreturn 2").unwrap(),
        vec![Val::Int(2)]
    );
}

#[test]
fn test_exit_with_message() {
    let (interp, output) = build_interpreter(test_config());

    let err = run_on(&interp, "exit 3, \"bye\"\nprintln \"unreachable\"").unwrap_err();

    assert_eq!(err, ExecError::Exit(3));
    assert_eq!(output.contents(), "bye\n");
}

#[test]
fn test_doc_and_nop_are_skipped() {
    let source = r#"
        doc "describes nothing"
        nop
        return 1
    "#;

    assert_eq!(run_ok(source), vec![Val::Int(1)]);
}

#[test]
fn test_stray_closers() {
    assert!(matches!(run_err("enddef"), ExecError::Syntax(_)));
    assert!(matches!(run_err("endstruct"), ExecError::Syntax(_)));
    assert!(matches!(run_err("to 3"), ExecError::Syntax(_)));
}

#[test]
fn test_interactive_mode_echoes_expression_values() {
    let mut config = test_config();
    config.interactive = true;
    let (interp, output) = build_interpreter(config);

    run_on(&interp, "x = 2\nx * 21\nnil").unwrap();

    assert_eq!(output.contents(), "42\n");
}

#[test]
fn test_session_keeps_locals_between_chunks() {
    let (interp, _) = build_interpreter(test_config());
    let mut session = Session::open(&interp, "repl").unwrap();

    session.run(&interp, "x = 41").unwrap();
    let values = session.run(&interp, "x += 1\nreturn x").unwrap();

    assert_eq!(values, vec![Val::Int(42)]);
    assert!(session.variables().iter().any(|v| v.name == "x"));
}

#[test]
fn test_test_section_continue_policy_counts_failures() {
    let (interp, _) = build_interpreter(test_config());
    let source = r#"
        test "sums" group "math" assert continue
            assert 1 + 1 == 3
            assert 2 + 2 == 4
        endtest
        return _test_group, _test_name
    "#;

    assert_eq!(
        run_on(&interp, source).unwrap(),
        vec![Val::str("math"), Val::str("sums")]
    );
    assert_eq!(interp.tests.passed(), 1);
    assert_eq!(interp.tests.failed(), 1);
}

#[test]
fn test_test_section_fails_by_default() {
    let (interp, _) = build_interpreter(test_config());
    let source = r#"
        test "strict" group "math"
            assert 1 == 2
        endtest
        return 1
    "#;

    let err = run_on(&interp, source).unwrap_err();
    assert!(matches!(err.root(), ExecError::Assertion(_)));
    assert_eq!(interp.tests.failed(), 1);
}

#[test]
fn test_assert_override_beats_section_policy() {
    let mut config = test_config();
    config.test_assert_override = Some(AssertPolicy::Fail);
    let (interp, _) = build_interpreter(config);
    let source = r#"
        test "lenient" group "math" assert continue
            assert false
        endtest
    "#;

    assert!(matches!(
        run_on(&interp, source).unwrap_err().root(),
        ExecError::Assertion(_)
    ));
}

#[test]
fn test_unselected_group_asserts_like_plain_assert() {
    let mut config = test_config();
    config.test_group_filter = "^net$".to_string();
    let (interp, _) = build_interpreter(config);
    let source = r#"
        test "lenient" group "math" assert continue
            assert false
        endtest
    "#;

    assert!(matches!(
        run_on(&interp, source).unwrap_err().root(),
        ExecError::Assertion(_)
    ));
    assert_eq!(interp.tests.failed(), 0);
}

#[test]
fn test_endtest_closes_the_section() {
    let source = r#"
        test "lenient" group "math" assert continue
        endtest
        assert false
    "#;

    assert!(matches!(run_err(source), ExecError::Assertion(_)));
}

#[test]
fn test_malformed_test_header() {
    assert!(matches!(run_err("test \"x\""), ExecError::Syntax(_)));
    assert!(matches!(
        run_err("test \"x\" group \"g\" assert maybe"),
        ExecError::Syntax(_)
    ));
}

fn with_reader() -> Arc<Interpreter> {
    Interpreter::builder()
        .config(test_config())
        .output(Box::new(SharedOutput::default()))
        .native(
            "slurp",
            Arc::new(|_: &str, _: &mut EvalContext<'_>, args: Vec<Val>| -> Result<Val, ExecError> {
                let path = args.first().map(|v| v.to_string()).unwrap_or_default();
                std::fs::read_to_string(path)
                    .map(Val::Str)
                    .map_err(|e| ExecError::eval(e.to_string()))
            }),
        )
        .build()
}

#[test]
fn test_with_exposes_variable_as_file() {
    let interp = with_reader();
    let source = r#"
        notes = "hello\nworld"
        with notes as fh
            text = slurp(fh)
            path = fh
        endwith
        return text, path
    "#;

    let values = run_on(&interp, source).unwrap();
    assert_eq!(values[0], Val::str("hello\nworld"));
    let path = values[1].to_string();
    assert!(path.contains("za_with_"));
    assert!(!Path::new(&path).exists());
}

#[test]
fn test_with_file_removed_when_function_returns() {
    let source = r#"
        define peek(s)
            with s as fh
            return fh
        enddef
        return peek("x")
    "#;

    let path = run_ok(source)[0].to_string();
    assert!(!Path::new(&path).exists());
}

#[test]
fn test_with_errors() {
    assert!(matches!(run_err("endwith"), ExecError::Syntax(_)));
    assert!(matches!(run_err("n = 3\nwith n as fh"), ExecError::Eval(_)));
    assert!(matches!(run_err("with missing as fh"), ExecError::Eval(_)));
    assert!(matches!(run_err("s = \"a\"\nwith s fh"), ExecError::Syntax(_)));
}

#[test]
fn test_log_does_not_touch_program_output() {
    assert_eq!(output_of("log \"count: \", 3\nprintln \"done\""), "done\n");
    assert!(matches!(run_err("log missing_name"), ExecError::Eval(_)));
}
