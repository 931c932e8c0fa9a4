//! Bytecode compiler and virtual machine for Shark.
//!
//! # Architecture
//!
//! - `instruction`: opcodes and the operand encoding
//! - `symbol_table`: lexical scopes and free-variable capture
//! - `compiler`: transforms the AST into bytecode
//! - `chunk`: compiled functions, constants and the bytecode bundle
//! - `vm`: stack-based virtual machine, with call dispatch in `vm_calls`
//!   and operators in `vm_ops`
//! - `cache`: LRU + TTL memoization of call results
//! - `disassembler`: debug output for bytecode inspection
//! - `serialize`: MessagePack marshalling of compiled programs

pub mod builtins;
pub mod cache;
pub mod chunk;
pub mod compiler;
mod compiler_exprs;
mod compiler_stmts;
pub mod disassembler;
pub mod instruction;
pub mod serialize;
pub mod symbol_table;
pub mod value;
pub mod vm;
mod vm_calls;
mod vm_ops;
mod vm_tests;

pub use cache::{CacheStats, CallCache};
pub use chunk::{Bytecode, CompiledFunction, Constant};
pub use compiler::Compiler;
pub use disassembler::{disassemble, disassemble_bytecode, print_disassembly};
pub use instruction::OpCode;
pub use symbol_table::{Symbol, SymbolScope, SymbolTable};
pub use value::Value;
pub use vm::Vm;
