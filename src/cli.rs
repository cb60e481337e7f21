use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::debug;

use crate::config::EngineConfig;
use crate::interpreter::executor::{ExecError, Interpreter, Session, TokenKind};
use crate::interpreter::lexer;

#[derive(Parser)]
#[command(name = "za")]
#[command(about = "Za - a small interpreted scripting language", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Print the program's return values as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a script file
    Run {
        /// Script to execute
        file: String,

        /// Arguments published to the script as `argv`
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Execute source given on the command line
    Eval {
        /// Statements, separated by newlines or `;`
        source: String,
    },

    /// Start an interactive session
    Repl,

    /// Print the effective configuration
    Config,
}

/// Run the CLI by parsing process arguments; returns the process exit status
pub fn run_cli() -> Result<i32> {
    let cli = Cli::parse();
    run_cli_with_args(cli)
}

/// Run the CLI with provided arguments
pub fn run_cli_from_args(args: Vec<String>) -> Result<i32> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli)
}

fn run_cli_with_args(cli: Cli) -> Result<i32> {
    // Load before running anything so config errors surface first
    let config = EngineConfig::load_from(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { file, args } => {
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read script {}", file))?;
            let name = Path::new(&file)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("main")
                .to_string();
            let mut argv = vec![file];
            argv.extend(args);
            run_program(config, &name, &source, argv, cli.json)
        }

        Commands::Eval { source } => {
            run_program(config, "main", &source, vec!["za".into()], cli.json)
        }

        Commands::Repl => repl(EngineConfig {
            interactive: true,
            ..config
        }),

        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(0)
        }
    }
}

fn run_program(
    config: EngineConfig,
    name: &str,
    source: &str,
    argv: Vec<String>,
    json: bool,
) -> Result<i32> {
    let interp = Interpreter::builder().config(config).build();
    let outcome = interp
        .load_source(name, source)
        .and_then(|space| interp.run_main(space, argv));
    match outcome {
        Ok(values) => {
            if json {
                let rendered = serde_json::to_string(&values)
                    .context("Failed to render return values as JSON")?;
                println!("{}", rendered);
            }
            Ok(0)
        }
        Err(e) => Ok(status_of(&e)),
    }
}

fn status_of(err: &ExecError) -> i32 {
    match err.root() {
        ExecError::Exit(code) => *code,
        _ => err.exit_code(),
    }
}

/* ===================== Interactive Loop ===================== */

fn repl(config: EngineConfig) -> Result<i32> {
    let interp = Interpreter::builder().config(config).build();
    let mut session = Session::open(&interp, "repl")?;
    let stdin = io::stdin();
    let mut pending = String::new();

    loop {
        print!("{}", if pending.is_empty() { "> " } else { ". " });
        io::stdout().flush().context("Failed to write prompt")?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("Failed to read input")? == 0 {
            return Ok(0);
        }
        pending.push_str(&line);
        if open_blocks(&pending) > 0 {
            continue;
        }

        let chunk = std::mem::take(&mut pending);
        if let Err(e) = session.run(&interp, &chunk) {
            if let ExecError::Exit(code) = e.root() {
                return Ok(*code);
            }
            debug!(error = %e, "statement failed");
        }
    }
}

/// Number of blocks opened in `source` that are still waiting for their closer
fn open_blocks(source: &str) -> i64 {
    let Ok(phrases) = lexer::phrases(source) else {
        return 0;
    };
    phrases
        .iter()
        .filter_map(|p| p.leading())
        .map(|kind| match kind {
            TokenKind::If
            | TokenKind::While
            | TokenKind::For
            | TokenKind::Foreach
            | TokenKind::Case
            | TokenKind::Define
            | TokenKind::Struct
            | TokenKind::Test
            | TokenKind::With => 1,
            TokenKind::Endif
            | TokenKind::Endwhile
            | TokenKind::Endfor
            | TokenKind::Endcase
            | TokenKind::Enddef
            | TokenKind::Endstruct
            | TokenKind::Endtest
            | TokenKind::Endwith => -1,
            _ => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_blocks_counts_unclosed_constructs() {
        assert_eq!(open_blocks("x = 1"), 0);
        assert_eq!(open_blocks("for i = 1 to 3\nprintln i"), 1);
        assert_eq!(open_blocks("for i = 1 to 3\nif i > 1\nendif\nendfor"), 0);
    }

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::parse_from(["za", "run", "script.za", "a", "b"]);
        match cli.command {
            Commands::Run { file, args } => {
                assert_eq!(file, "script.za");
                assert_eq!(args, vec!["a", "b"]);
            }
            _ => panic!("expected run command"),
        }
    }
}
