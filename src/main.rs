//! Binary entry point for the `parbz` command-line tool.
//!
//! Parses arguments, installs the process-wide signal mask, then runs the
//! per-file harness over each operand (or the stdin→stdout filter when
//! there are none). Exit status: 0 on success, 1 after any fatal error
//! (set inside the harness, which exits directly), 4 when one or more
//! files were skipped with a warning.

use clap::Parser;

use parbz::cli::Args;
use parbz::process::{self, Outcome};

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let args = Args::parse();
    process::set_program_name();

    if let Err(e) = process::init_signals() {
        eprintln!("{}: {:#}", process::program_name(), e);
        return 1;
    }

    let opts = args.to_options();
    let mut skipped = false;

    if args.files.is_empty() {
        match process::process_stdio(&opts) {
            Ok(Outcome::Done) => {}
            Ok(Outcome::Skipped) => skipped = true,
            Err(e) => {
                eprintln!("{}: {:#}", process::program_name(), e);
                return 1;
            }
        }
    } else {
        for file in &args.files {
            match process::process_file(&opts, file) {
                Ok(Outcome::Done) => {}
                Ok(Outcome::Skipped) => skipped = true,
                Err(e) => {
                    eprintln!("{}: {:#}", process::program_name(), e);
                    return 1;
                }
            }
        }
    }

    if skipped {
        4
    } else {
        0
    }
}
