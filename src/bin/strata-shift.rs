//! Standalone batch window mover.
//!
//! Reads a JSON array of move/read requests from stdin (or a file given as
//! the first argument), applies them through the accessibility API with one
//! worker per application, and writes the frames of any `save`/`read_only`
//! requests back to stdout. Per-app timing goes to stderr. The only failure
//! that exits non-zero is unparsable input; individual windows that are
//! gone or time out are skipped with a warning.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use strata_wm::common::log;
use strata_wm::sys::transport::{WireOp, run_wire_batch};

#[derive(Parser)]
struct Cli {
    /// Read the request from this file instead of stdin.
    file: Option<PathBuf>,

    /// Per-application accessibility messaging timeout.
    #[arg(long, default_value_t = 100)]
    timeout_ms: u64,
}

fn main() {
    log::init_stderr_logging();
    let opt: Cli = Parser::parse();

    let input = match &opt.file {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).map(|_| buf)
        }
    };
    let input = match input {
        Ok(input) => input,
        Err(e) => {
            eprintln!("could not read request: {e}");
            std::process::exit(1);
        }
    };

    let ops: Vec<WireOp> = match serde_json::from_str(&input) {
        Ok(ops) => ops,
        Err(e) => {
            eprintln!("invalid request: {e}");
            std::process::exit(1);
        }
    };

    let (frames, lines) = run_wire_batch(ops, Duration::from_millis(opt.timeout_ms));
    for line in &lines {
        eprintln!("{line}");
    }
    if !frames.is_empty() {
        println!("{}", serde_json::to_string(&frames).expect("frames serialize"));
    }
}
