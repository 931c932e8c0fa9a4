//! Shark: a small dynamically-typed language compiled to bytecode and run on
//! a stack VM with call memoization.
//!
//! This is the library root that exports all modules.
//!
//! # Pipeline
//!
//! Source text is scanned by [`lexer`], parsed into an [`ast::Program`] by
//! [`parser`], compiled by [`bytecode::Compiler`] and executed by
//! [`bytecode::Vm`].

// Allow some clippy lints that are stylistic and not critical
#![allow(clippy::result_large_err)]
#![allow(clippy::new_without_default)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::collapsible_else_if)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::unnecessary_cast)]
#![allow(clippy::len_zero)]
#![allow(clippy::too_many_arguments)]

pub mod ast;
pub mod bytecode;
pub mod config;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod repl;
pub mod span;

use bytecode::{Bytecode, Compiler, Value, Vm};
use config::VmConfig;
use error::SharkError;

/// Parse source code into a program.
pub fn parse(source: &str) -> Result<ast::Program, SharkError> {
    let tokens = lexer::Scanner::new(source).scan_tokens()?;
    Ok(parser::Parser::new(tokens).parse()?)
}

/// Compile source code into bytecode.
pub fn compile(source: &str) -> Result<Bytecode, SharkError> {
    let program = parse(source)?;
    let mut compiler = Compiler::new();
    compiler.compile(&program)?;
    Ok(compiler.bytecode())
}

/// Run a Shark program with the default VM configuration and return the
/// last value popped off the stack.
pub fn run(source: &str) -> Result<Value, SharkError> {
    run_with_config(source, &VmConfig::default())
}

pub fn run_with_config(source: &str, config: &VmConfig) -> Result<Value, SharkError> {
    run_bytecode(compile(source)?, config)
}

/// Run pre-compiled bytecode.
pub fn run_bytecode(bytecode: Bytecode, config: &VmConfig) -> Result<Value, SharkError> {
    let mut vm = Vm::with_config(bytecode, config);
    vm.run()?;
    Ok(vm.last_popped().clone())
}

/// Compile source code and render its disassembly.
pub fn disassemble(source: &str) -> Result<String, SharkError> {
    Ok(bytecode::disassemble_bytecode(&compile(source)?))
}
