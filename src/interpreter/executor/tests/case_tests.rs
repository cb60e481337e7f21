//! Tests for CASE and its clauses

use super::helpers::{build_interpreter, run_err, run_ok, run_on, test_config};
use crate::interpreter::executor::{exit_codes, ExecError, Val};

#[test]
fn test_case_is_selects_matching_clause() {
    let source = r#"
        x = 2
        case x
        is 1
            r = "one"
        is 2
            r = "two"
        or
            r = "other"
        endcase
        return r
    "#;

    assert_eq!(run_ok(source), vec![Val::str("two")]);
}

#[test]
fn test_case_or_runs_when_nothing_matched() {
    let source = r#"
        case 7
        is 1
            r = "one"
        or
            r = "other"
        endcase
        return r
    "#;

    assert_eq!(run_ok(source), vec![Val::str("other")]);
}

#[test]
fn test_case_without_match_falls_through() {
    let source = r#"
        r = "untouched"
        case 5
        is 1
            r = "one"
        endcase
        return r
    "#;

    assert_eq!(run_ok(source), vec![Val::str("untouched")]);
}

#[test]
fn test_case_only_first_match_runs() {
    let source = r#"
        n = 0
        case 1
        is 1
            n += 1
        is 1
            n += 10
        endcase
        return n
    "#;

    assert_eq!(run_ok(source), vec![Val::Int(1)]);
}

#[test]
fn test_bare_case_with_has() {
    let source = r#"
        n = 15
        case
        has n > 10
            r = "big"
        has n > 5
            r = "medium"
        or
            r = "small"
        endcase
        return r
    "#;

    assert_eq!(run_ok(source), vec![Val::str("big")]);
}

#[test]
fn test_case_contains_matches_pattern() {
    let source = r#"
        case "hello world"
        contains "^bye"
            r = 1
        contains "wor"
            r = 2
        endcase
        return r
    "#;

    assert_eq!(run_ok(source), vec![Val::Int(2)]);
}

#[test]
fn test_case_is_compares_loosely() {
    let source = r#"
        case 3
        is 3.0
            r = true
        or
            r = false
        endcase
        return r
    "#;

    assert_eq!(run_ok(source), vec![Val::Bool(true)]);
}

#[test]
fn test_nested_case_clauses_stay_with_their_block() {
    let source = r#"
        r = ""
        case 1
        is 1
            case 2
            is 3
                r = "inner three"
            endcase
            r = r + "outer one"
        is 2
            r = "outer two"
        endcase
        return r
    "#;

    assert_eq!(run_ok(source), vec![Val::str("outer one")]);
}

#[test]
fn test_clause_outside_case() {
    assert!(matches!(run_err("is 1"), ExecError::Syntax(_)));
}

#[test]
fn test_endcase_outside_case() {
    assert!(matches!(run_err("endcase"), ExecError::Syntax(_)));
}

#[test]
fn test_case_depth_limit_is_fatal() {
    let mut config = test_config();
    config.limits.max_case_depth = 1;
    let (interp, _) = build_interpreter(config);
    let source = r#"
        case 1
        is 1
            case 2
            or
            endcase
        endcase
    "#;

    let err = run_on(&interp, source).unwrap_err();

    assert!(matches!(
        err.root(),
        ExecError::Fatal { code: exit_codes::SYNTAX, .. }
    ));
}
