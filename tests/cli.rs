//! End-to-end checks of the `za` binary's output and exit status

use std::path::PathBuf;
use std::process::{Command, Output};

fn za(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_za"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to launch za")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
fn test_eval_prints_and_exits_cleanly() {
    let out = za(&["eval", "println 1 + 2"]);

    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out), "3\n");
}

#[test]
fn test_step_zero_ends_process_with_eval_status() {
    let out = za(&["eval", "for i = 1 to 3 step 0\nendfor\nprintln \"after\""]);

    assert_eq!(out.status.code(), Some(5));
    assert_eq!(stdout(&out), "");
}

#[test]
fn test_runtime_error_exit_status() {
    let out = za(&["eval", "y = missing_name"]);

    assert_eq!(out.status.code(), Some(5));
}

#[test]
fn test_deep_recursion_runs_and_runaway_recursion_is_fatal() {
    let sum = "define sum(n)\nif n == 0\nreturn 0\nendif\nreturn n + sum(n - 1)\nenddef\n";

    let out = za(&["eval", &format!("{}println sum(3000)", sum)]);
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out), "4501500\n");

    let out = za(&["eval", "define down(n)\nreturn 1 + down(n + 1)\nenddef\nprintln down(0)"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_exit_statement_sets_status() {
    let out = za(&["eval", "println \"bye\"; exit 7"]);

    assert_eq!(out.status.code(), Some(7));
    assert_eq!(stdout(&out), "bye\n");
}

#[test]
fn test_run_script_with_arguments() {
    let path = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("greet.za");
    std::fs::write(&path, "define greet(who)\nreturn \"hi \" + who\nenddef\nprintln greet(argv[1])\n")
        .unwrap();

    let out = za(&["run", path.to_str().unwrap(), "there"]);

    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out), "hi there\n");
}

#[test]
fn test_missing_script_is_reported() {
    let out = za(&["run", "/nonexistent/script.za"]);

    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Failed to read script"));
}

#[test]
fn test_config_command_renders_toml() {
    let out = za(&["config"]);

    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("[calltable]"));
    assert!(stdout(&out).contains("max_capacity = 48000"));
}

#[test]
fn test_json_flag_prints_return_values() {
    let out = za(&["--json", "eval", "return 1, \"a\""]);

    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out).trim(), r#"[{"t":"Int","v":1},{"t":"Str","v":"a"}]"#);
}
