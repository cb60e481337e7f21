//! Za command line
//!
//! ```bash
//! za run script.za arg1 arg2
//! za eval 'println "hello"'
//! za repl
//! ```

use tracing_subscriber::EnvFilter;
use za_core::cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli::run_cli() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
