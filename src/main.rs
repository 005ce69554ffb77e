use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::debug;

use declass::common::error::LocatedError;
use declass::emitting::cpp;

/// Translate a class-based C dialect into plain structs-and-function-
/// pointers code.
#[derive(Parser)]
#[command(name = "declass", version, about)]
struct Args {
    /// The input source file.
    input: PathBuf,

    /// Colorize the emitted output.
    #[arg(long)]
    color: bool,

    /// Post-process the output into compilable C++.
    #[arg(long)]
    cpp: bool,
}

fn report(error: &LocatedError, input: &PathBuf) {
    eprintln!(
        "[error] {} in \"{}\" at [{}:{}]",
        error.message,
        input.display(),
        error.location.line,
        error.location.column
    );
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let source = match fs::read_to_string(&args.input) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("[error] could not read \"{}\": {}", args.input.display(), error);
            return ExitCode::FAILURE;
        }
    };
    debug!("translating {}", args.input.display());

    match declass::transpile(&source, args.color) {
        Ok(output) => {
            if args.cpp {
                print!("{}", cpp::convert(&output));
            } else {
                print!("{}", output);
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            report(&error, &args.input);
            ExitCode::FAILURE
        }
    }
}
