//! Shark CLI: run scripts, inspect bytecode or start the REPL.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use tracing_subscriber::EnvFilter;

use shark::bytecode::serialize;
use shark::config::Config;
use shark::error::SharkError;
use shark::repl::{report_error, Repl};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI command to execute.
enum Command {
    /// Start the REPL
    Repl,
    /// Run a source or pre-built bytecode file
    Run { file: PathBuf },
    /// Print the disassembly of a source file
    Disasm { file: PathBuf },
    /// Compile a source file to bytecode
    Build { file: PathBuf, output: Option<PathBuf> },
}

/// CLI options parsed from arguments.
struct Options {
    command: Command,
    config: Option<PathBuf>,
}

fn print_usage() {
    eprintln!("Shark {}", VERSION);
    eprintln!();
    eprintln!("Usage: shark [options] [script.shark | program.sbc]");
    eprintln!("       shark disasm <script.shark>");
    eprintln!("       shark build <script.shark> [-o out.sbc]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config PATH   Read VM settings from PATH instead of shark.json");
    eprintln!("  --no-color      Disable colored error output");
    eprintln!("  --help, -h      Show this help message");
    eprintln!();
    eprintln!("Set SHARK_LOG (e.g. SHARK_LOG=shark::cache=trace) to enable logging.");
}

fn usage_error(message: &str) -> ! {
    eprintln!("{}", message);
    print_usage();
    process::exit(64);
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut options = Options {
        command: Command::Repl,
        config: None,
    };
    let mut positional = Vec::new();
    let mut output = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            "--no-color" => colored::control::set_override(false),
            "--config" => {
                i += 1;
                match args.get(i) {
                    Some(path) => options.config = Some(PathBuf::from(path)),
                    None => usage_error("--config requires a path"),
                }
            }
            "-o" | "--output" => {
                i += 1;
                match args.get(i) {
                    Some(path) => output = Some(PathBuf::from(path)),
                    None => usage_error("-o requires a path"),
                }
            }
            arg if arg.starts_with('-') => usage_error(&format!("Unknown option: {}", arg)),
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    options.command = match positional.as_slice() {
        [] => Command::Repl,
        [cmd, file] if cmd == "disasm" => Command::Disasm {
            file: PathBuf::from(file),
        },
        [cmd, file] if cmd == "build" => Command::Build {
            file: PathBuf::from(file),
            output,
        },
        [cmd] if cmd == "disasm" || cmd == "build" => {
            usage_error(&format!("{} requires a file", cmd))
        }
        [file] => Command::Run {
            file: PathBuf::from(file),
        },
        _ => usage_error("Too many arguments"),
    };
    options
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SHARK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();
    let options = parse_args();

    let result = match &options.command {
        Command::Repl => run_repl(&options),
        Command::Run { file } => run_file(file, &options),
        Command::Disasm { file } => run_disasm(file),
        Command::Build { file, output } => run_build(file, output.as_deref()),
    };

    if let Err(err) = result {
        report_error(&err);
        process::exit(1);
    }
}

fn load_config(options: &Options, script: Option<&Path>) -> Result<Config, SharkError> {
    Ok(Config::locate(options.config.as_deref(), script)?)
}

fn run_repl(options: &Options) -> Result<(), SharkError> {
    let config = load_config(options, None)?;
    Repl::new(config.vm).run()?;
    Ok(())
}

fn run_file(path: &Path, options: &Options) -> Result<(), SharkError> {
    let config = load_config(options, Some(path))?;
    let bytecode = if serialize::is_bytecode_file(path) {
        serialize::read_file(path)?
    } else {
        shark::compile(&fs::read_to_string(path)?)?
    };
    shark::run_bytecode(bytecode, &config.vm)?;
    Ok(())
}

fn run_disasm(path: &Path) -> Result<(), SharkError> {
    let bytecode = if serialize::is_bytecode_file(path) {
        serialize::read_file(path)?
    } else {
        shark::compile(&fs::read_to_string(path)?)?
    };
    shark::bytecode::print_disassembly(&bytecode);
    Ok(())
}

fn run_build(path: &Path, output: Option<&Path>) -> Result<(), SharkError> {
    let bytecode = shark::compile(&fs::read_to_string(path)?)?;
    let output = match output {
        Some(output) => output.to_path_buf(),
        None => path.with_extension(serialize::BYTECODE_EXTENSION),
    };
    serialize::write_file(&output, &bytecode)?;
    println!("Wrote {}", output.display());
    Ok(())
}
