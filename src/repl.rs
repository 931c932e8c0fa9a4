//! Interactive REPL. Each line is compiled and run on its own VM while the
//! symbol table, constant pool and globals carry over between lines.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use colored::Colorize;
use tracing::debug;

use crate::bytecode::{Compiler, Constant, SymbolTable, Value, Vm};
use crate::config::VmConfig;
use crate::error::SharkError;
use crate::lexer::Scanner;
use crate::parser::Parser;

const HISTORY_FILE: &str = ".shark_history";

/// Compiler and VM state threaded through successive evaluations.
pub struct Session {
    symbols: SymbolTable,
    constants: Vec<Constant>,
    globals: Vec<Value>,
    config: VmConfig,
}

impl Session {
    pub fn new(config: VmConfig) -> Self {
        Self {
            symbols: Compiler::new().symbol_table().clone(),
            constants: Vec::new(),
            globals: Vm::new_globals(&config),
            config,
        }
    }

    /// Compile and run `source` against the session state, returning the
    /// last value popped. A line that fails to compile leaves the state
    /// untouched; one that fails at runtime keeps whatever it defined.
    pub fn eval(&mut self, source: &str) -> Result<Value, SharkError> {
        let tokens = Scanner::new(source).scan_tokens()?;
        let program = Parser::new(tokens).parse()?;

        let mut compiler = Compiler::with_state(self.symbols.clone(), self.constants.clone());
        compiler.compile(&program)?;
        let (bytecode, symbols) = compiler.finish();
        self.symbols = symbols;
        self.constants = bytecode.constants.clone();

        let globals = std::mem::take(&mut self.globals);
        let mut vm = Vm::with_globals(bytecode, globals, &self.config);
        let result = vm.run();
        let value = vm.last_popped().clone();
        self.globals = vm.into_globals();

        result?;
        Ok(value)
    }

    /// Forget every definition.
    pub fn reset(&mut self) {
        *self = Session::new(self.config.clone());
    }
}

pub struct Repl {
    session: Session,
    history: Vec<String>,
    history_file: PathBuf,
    buffer: String,
    balance: i32,
}

impl Repl {
    pub fn new(config: VmConfig) -> Self {
        let mut repl = Self {
            session: Session::new(config),
            history: Vec::new(),
            history_file: Self::history_path(),
            buffer: String::new(),
            balance: 0,
        };
        repl.load_history();
        repl
    }

    fn history_path() -> PathBuf {
        match dirs::home_dir() {
            Some(home) => home.join(HISTORY_FILE),
            None => PathBuf::from(HISTORY_FILE),
        }
    }

    fn load_history(&mut self) {
        if let Ok(content) = std::fs::read_to_string(&self.history_file) {
            self.history = content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    fn save_history(&self) {
        if let Err(err) = std::fs::write(&self.history_file, self.history.join("\n")) {
            debug!(path = %self.history_file.display(), %err, "could not save history");
        }
    }

    pub fn run(&mut self) -> io::Result<()> {
        println!("Shark {} REPL", env!("CARGO_PKG_VERSION"));
        println!("Type .help for available commands.\n");

        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();

        loop {
            print!("{}", self.prompt());
            io::stdout().flush()?;

            let line = match lines.next() {
                Some(line) => line?,
                None => break,
            };
            let line = line.trim_end();

            if self.buffer.is_empty() {
                if line.trim().is_empty() {
                    continue;
                }
                if line.starts_with('.') {
                    if !self.command(line) {
                        break;
                    }
                    continue;
                }
            }

            self.history.push(line.to_string());
            if !self.buffer.is_empty() {
                self.buffer.push('\n');
            }
            self.buffer.push_str(line);
            self.balance += count_brackets(line);

            if self.balance <= 0 {
                let source = std::mem::take(&mut self.buffer);
                self.balance = 0;
                self.evaluate(&source);
            }
        }

        self.save_history();
        println!("Goodbye!");
        Ok(())
    }

    fn prompt(&self) -> &'static str {
        if self.buffer.is_empty() {
            ">>> "
        } else {
            "... "
        }
    }

    /// Handle a dot command. Returns false when the REPL should exit.
    fn command(&mut self, line: &str) -> bool {
        match line {
            ".exit" | ".quit" => return false,
            ".help" => {
                println!();
                println!(".help    - Show this help message");
                println!(".clear   - Reset all definitions");
                println!(".exit    - Exit the REPL (or Ctrl+D)");
                println!();
            }
            ".clear" => {
                self.session.reset();
                println!("Environment reset.");
            }
            _ => println!(
                "Unknown command: {}. Type .help for available commands.",
                line
            ),
        }
        true
    }

    fn evaluate(&mut self, source: &str) {
        match self.session.eval(source) {
            Ok(Value::Null) => {}
            Ok(value) => println!("{}", value.inspect()),
            Err(err) => report_error(&err),
        }
    }
}

/// Print an error with its code and hint, if any.
pub fn report_error(err: &SharkError) {
    eprintln!("{} {}", format!("error[{}]:", err.code()).red().bold(), err);
    if let Some(hint) = err.hint() {
        eprintln!("  {} {}", "hint:".cyan(), hint);
    }
}

/// Net count of opening over closing brackets outside string literals.
fn count_brackets(line: &str) -> i32 {
    let mut balance = 0;
    let mut in_string = false;
    let mut escaped = false;

    for c in line.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' | '(' => balance += 1,
            '}' | ']' | ')' => balance -= 1,
            _ => {}
        }
    }
    balance
}
