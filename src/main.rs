//! `fastzip` binary: parses CLI flags, adds piped-in paths from stdin, and
//! hands off to [`fastzip::cli::run`].

use std::io::{BufRead, IsTerminal};
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut opts = match fastzip::cli::parse_args(&args) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("**Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        for line in stdin.lock().lines().map_while(Result::ok) {
            let line = line.trim();
            if !line.is_empty() {
                opts.paths.push(line.to_string());
            }
        }
    }

    match fastzip::cli::run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("**Error: {e}");
            ExitCode::FAILURE
        }
    }
}
