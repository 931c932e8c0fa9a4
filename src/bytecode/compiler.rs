//! Bytecode compiler: walks the AST once and emits instructions.
//!
//! Expressions and statements are compiled in `compiler_exprs` and
//! `compiler_stmts`; this file holds the compiler state, instruction
//! emission and scope bookkeeping.

use std::rc::Rc;

use tracing::debug;

use crate::ast::Program;
use crate::bytecode::builtins::BUILTINS;
use crate::bytecode::chunk::{Bytecode, CompiledFunction, Constant};
use crate::bytecode::instruction::{make, Instructions, OpCode};
use crate::bytecode::symbol_table::{ClosedScope, Symbol, SymbolScope, SymbolTable};
use crate::error::{CompileError, CompileResult};
use crate::span::Span;

/// Operand written into a forward jump until its target is known.
pub(crate) const JUMP_PLACEHOLDER: usize = 9999;

pub(crate) const MAX_U8_OPERAND: usize = u8::MAX as usize;
pub(crate) const MAX_U16_OPERAND: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EmittedInstruction {
    pub opcode: OpCode,
    pub position: usize,
}

/// Instructions of one function body under construction.
#[derive(Debug, Default)]
pub(crate) struct CompilationScope {
    pub instructions: Instructions,
    pub last: Option<EmittedInstruction>,
    pub previous: Option<EmittedInstruction>,
    pub reads_mutable_globals: bool,
}

/// The bytecode compiler.
pub struct Compiler {
    /// Constant pool, shared by every function in the program.
    pub(crate) constants: Vec<Constant>,
    pub(crate) symbol_table: SymbolTable,
    /// Function body being compiled.
    pub(crate) current: CompilationScope,
    /// Enclosing function bodies, outermost first.
    pub(crate) enclosing: Vec<CompilationScope>,
}

impl Compiler {
    /// A compiler with every builtin registered in the global scope.
    pub fn new() -> Self {
        let symbol_table = SymbolTable::with_builtins(BUILTINS.iter().map(|b| b.name));
        Self::with_state(symbol_table, Vec::new())
    }

    /// A compiler that continues from an earlier session's symbols and
    /// constants, as the REPL does between lines.
    pub fn with_state(symbol_table: SymbolTable, constants: Vec<Constant>) -> Self {
        Self {
            constants,
            symbol_table,
            current: CompilationScope::default(),
            enclosing: Vec::new(),
        }
    }

    /// Compile a whole program into the main instruction stream.
    ///
    /// On error the compiler drops back to the global scope so it can be
    /// reused; global definitions made before the error are kept.
    pub fn compile(&mut self, program: &Program) -> CompileResult<()> {
        debug!(target: "shark::compiler", statements = program.statements.len(), "compiling program");

        for stmt in &program.statements {
            if let Err(err) = self.compile_statement(stmt) {
                self.recover();
                return Err(err);
            }
        }

        debug!(
            target: "shark::compiler",
            bytes = self.current.instructions.len(),
            constants = self.constants.len(),
            "compiled program"
        );
        Ok(())
    }

    /// Snapshot of the compiled program.
    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.current.instructions.clone(),
            constants: self.constants.clone(),
        }
    }

    /// Consume the compiler, keeping the symbol table for the next session.
    pub fn finish(self) -> (Bytecode, SymbolTable) {
        let bytecode = Bytecode {
            instructions: self.current.instructions,
            constants: self.constants,
        };
        (bytecode, self.symbol_table)
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    fn recover(&mut self) {
        self.symbol_table.reset_to_global();
        if !self.enclosing.is_empty() {
            let mut scopes = std::mem::take(&mut self.enclosing);
            self.current = scopes.swap_remove(0);
        }
    }

    // ===== Scopes =====

    pub(crate) fn enter_scope(&mut self) {
        let outer = std::mem::take(&mut self.current);
        self.enclosing.push(outer);
        self.symbol_table.enter_scope();
    }

    pub(crate) fn leave_scope(&mut self) -> (CompilationScope, ClosedScope) {
        let outer = self.enclosing.pop().unwrap_or_default();
        let scope = std::mem::replace(&mut self.current, outer);
        let closed = self.symbol_table.leave_scope().unwrap_or_default();
        (scope, closed)
    }

    /// Whether the body being compiled is the main program.
    pub(crate) fn in_main(&self) -> bool {
        self.enclosing.is_empty()
    }

    // ===== Bytecode emission =====

    pub(crate) fn emit(&mut self, op: OpCode, operands: &[usize]) -> usize {
        let instruction = make(op, operands);
        let position = self.current.instructions.len();
        self.current.instructions.extend_from_slice(&instruction);

        let emitted = EmittedInstruction {
            opcode: op,
            position,
        };
        self.current.previous = self.current.last.replace(emitted);
        position
    }

    pub(crate) fn emit_op(&mut self, op: OpCode) -> usize {
        self.emit(op, &[])
    }

    /// Emit a jump whose target is patched later.
    pub(crate) fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit(op, &[JUMP_PLACEHOLDER])
    }

    /// Point the jump at `position` to the current end of the stream.
    pub(crate) fn patch_jump(&mut self, position: usize, span: Span) -> CompileResult<()> {
        let target = self.check_operand("jump target", self.current_offset(), MAX_U16_OPERAND, span)?;
        let bytes = (target as u16).to_be_bytes();
        self.current.instructions[position + 1..position + 3].copy_from_slice(&bytes);
        Ok(())
    }

    pub(crate) fn current_offset(&self) -> usize {
        self.current.instructions.len()
    }

    pub(crate) fn last_instruction_is(&self, op: OpCode) -> bool {
        self.current.last.map_or(false, |last| last.opcode == op)
    }

    pub(crate) fn remove_last_pop(&mut self) {
        if let Some(last) = self.current.last {
            self.current.instructions.truncate(last.position);
            self.current.last = self.current.previous.take();
        }
    }

    pub(crate) fn replace_last_pop_with_return(&mut self) {
        if let Some(last) = self.current.last.as_mut() {
            self.current.instructions[last.position] = OpCode::ReturnValue as u8;
            last.opcode = OpCode::ReturnValue;
        }
    }

    /// Add a constant to the pool, reusing an equal literal when present.
    pub(crate) fn add_constant(&mut self, constant: Constant, span: Span) -> CompileResult<usize> {
        if let Some(index) = self
            .constants
            .iter()
            .position(|existing| existing.same_literal(&constant))
        {
            return Ok(index);
        }

        let index = self.constants.len();
        self.check_operand("constants", index, MAX_U16_OPERAND, span)?;
        self.constants.push(constant);
        Ok(index)
    }

    pub(crate) fn check_operand(
        &self,
        what: &'static str,
        value: usize,
        limit: usize,
        span: Span,
    ) -> CompileResult<usize> {
        if value > limit {
            return Err(CompileError::operand_overflow(what, value, limit, span));
        }
        Ok(value)
    }

    // ===== Symbols =====

    pub(crate) fn resolve(&mut self, name: &str, span: Span) -> CompileResult<Symbol> {
        self.symbol_table
            .resolve(name)
            .ok_or_else(|| CompileError::identifier_not_found(name, span))
    }

    /// Resolve a binding the caller is about to write.
    pub(crate) fn resolve_mutable(&mut self, name: &str, span: Span) -> CompileResult<Symbol> {
        let symbol = self.resolve(name, span)?;
        match symbol.scope {
            SymbolScope::Global | SymbolScope::Local if symbol.mutable => Ok(symbol),
            _ => Err(CompileError::immutable_value(name, span)),
        }
    }

    pub(crate) fn load_symbol(&mut self, symbol: &Symbol, span: Span) -> CompileResult<()> {
        match symbol.scope {
            SymbolScope::Global => {
                let index = self.check_operand("globals", symbol.index, MAX_U16_OPERAND, span)?;
                if symbol.mutable && !self.in_main() {
                    self.current.reads_mutable_globals = true;
                }
                self.emit(OpCode::GetGlobal, &[index]);
            }
            SymbolScope::Local => {
                let index = self.check_operand("locals", symbol.index, MAX_U8_OPERAND, span)?;
                self.emit(OpCode::GetLocal, &[index]);
            }
            SymbolScope::Builtin => {
                self.emit(OpCode::GetBuiltin, &[symbol.index]);
            }
            SymbolScope::Free => {
                let index = self.check_operand("free variables", symbol.index, MAX_U8_OPERAND, span)?;
                self.emit(OpCode::GetFree, &[index]);
            }
            SymbolScope::Function => {
                self.emit_op(OpCode::CurrentClosure);
            }
        }
        Ok(())
    }

    pub(crate) fn store_symbol(&mut self, symbol: &Symbol, span: Span) -> CompileResult<()> {
        match symbol.scope {
            SymbolScope::Global => {
                let index = self.check_operand("globals", symbol.index, MAX_U16_OPERAND, span)?;
                self.emit(OpCode::SetGlobal, &[index]);
            }
            SymbolScope::Local => {
                let index = self.check_operand("locals", symbol.index, MAX_U8_OPERAND, span)?;
                self.emit(OpCode::SetLocal, &[index]);
            }
            _ => return Err(CompileError::immutable_value(&symbol.name, span)),
        }
        Ok(())
    }

    pub(crate) fn function_constant(
        &mut self,
        function: CompiledFunction,
        span: Span,
    ) -> CompileResult<usize> {
        self.add_constant(Constant::Function(Rc::new(function)), span)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::lexer::Scanner;
    use crate::parser::Parser;

    fn parse(source: &str) -> Program {
        let tokens = Scanner::new(source).scan_tokens().unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn compile(source: &str) -> CompileResult<Bytecode> {
        let mut compiler = Compiler::new();
        compiler.compile(&parse(source))?;
        Ok(compiler.bytecode())
    }

    fn concat(parts: Vec<Instructions>) -> Instructions {
        parts.into_iter().flatten().collect()
    }

    fn function_at(bytecode: &Bytecode, index: usize) -> &CompiledFunction {
        match &bytecode.constants[index] {
            Constant::Function(function) => function,
            other => panic!("Expected function constant, got {}", other),
        }
    }

    #[test]
    fn test_integer_arithmetic() {
        let bytecode = compile("1 + 2; 1 - 2").unwrap();
        assert_eq!(
            bytecode.instructions,
            concat(vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Add, &[]),
                make(OpCode::Pop, &[]),
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Sub, &[]),
                make(OpCode::Pop, &[]),
            ])
        );
        assert_eq!(bytecode.constants, vec![Constant::Int(1), Constant::Int(2)]);
    }

    #[test]
    fn test_less_than_swaps_operands() {
        let bytecode = compile("1 < 2").unwrap();
        assert_eq!(
            bytecode.instructions,
            concat(vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::GreaterThan, &[]),
                make(OpCode::Pop, &[]),
            ])
        );
        assert_eq!(bytecode.constants, vec![Constant::Int(2), Constant::Int(1)]);

        let bytecode = compile("1 <= 2").unwrap();
        assert!(bytecode
            .instructions
            .contains(&(OpCode::GreaterThanEqual as u8)));
    }

    #[test]
    fn test_constants_are_deduplicated() {
        let bytecode = compile("\"a\"; 1; \"a\"; 1").unwrap();
        assert_eq!(
            bytecode.constants,
            vec![Constant::String(Rc::from("a")), Constant::Int(1)]
        );
    }

    #[test]
    fn test_conditionals() {
        let bytecode = compile("if (true) { 10 }; 3333;").unwrap();
        assert_eq!(
            bytecode.instructions,
            concat(vec![
                // 0000
                make(OpCode::True, &[]),
                // 0001
                make(OpCode::JumpNotTruthy, &[10]),
                // 0004
                make(OpCode::Constant, &[0]),
                // 0007
                make(OpCode::Jump, &[11]),
                // 0010
                make(OpCode::Null, &[]),
                // 0011
                make(OpCode::Pop, &[]),
                // 0012
                make(OpCode::Constant, &[1]),
                make(OpCode::Pop, &[]),
            ])
        );

        let bytecode = compile("if (true) { 10 } else { 20 }; 3333;").unwrap();
        assert_eq!(
            bytecode.instructions,
            concat(vec![
                make(OpCode::True, &[]),
                make(OpCode::JumpNotTruthy, &[10]),
                make(OpCode::Constant, &[0]),
                make(OpCode::Jump, &[13]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Pop, &[]),
                make(OpCode::Constant, &[2]),
                make(OpCode::Pop, &[]),
            ])
        );
    }

    #[test]
    fn test_conditional_with_let_or_empty_body_yields_null() {
        let bytecode = compile("if (true) { let a = 1; }").unwrap();
        assert_eq!(
            bytecode.instructions,
            concat(vec![
                make(OpCode::True, &[]),
                make(OpCode::JumpNotTruthy, &[14]),
                make(OpCode::Constant, &[0]),
                make(OpCode::SetGlobal, &[0]),
                make(OpCode::Null, &[]),
                make(OpCode::Jump, &[15]),
                make(OpCode::Null, &[]),
                make(OpCode::Pop, &[]),
            ])
        );

        let bytecode = compile("if (true) { } else { }").unwrap();
        assert_eq!(
            bytecode.instructions,
            concat(vec![
                make(OpCode::True, &[]),
                make(OpCode::JumpNotTruthy, &[8]),
                make(OpCode::Null, &[]),
                make(OpCode::Jump, &[9]),
                make(OpCode::Null, &[]),
                make(OpCode::Pop, &[]),
            ])
        );
    }

    #[test]
    fn test_while_loop() {
        let bytecode = compile("let mut i = 0; while (i > 0) { i-- }").unwrap();
        assert_eq!(
            bytecode.instructions,
            concat(vec![
                // 0000
                make(OpCode::Constant, &[0]),
                // 0003
                make(OpCode::SetGlobal, &[0]),
                // 0006
                make(OpCode::GetGlobal, &[0]),
                // 0009
                make(OpCode::Constant, &[0]),
                // 0012
                make(OpCode::GreaterThan, &[]),
                // 0013
                make(OpCode::JumpNotTruthy, &[26]),
                // 0016
                make(OpCode::GetGlobal, &[0]),
                // 0019
                make(OpCode::DecrementGlobal, &[0]),
                // 0022
                make(OpCode::Pop, &[]),
                // 0023
                make(OpCode::Jump, &[6]),
            ])
        );
    }

    #[test]
    fn test_global_let_and_assignment() {
        let bytecode = compile("let mut one = 1; one += 2;").unwrap();
        assert_eq!(
            bytecode.instructions,
            concat(vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::SetGlobal, &[0]),
                make(OpCode::GetGlobal, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Add, &[]),
                make(OpCode::SetGlobal, &[0]),
                make(OpCode::GetGlobal, &[0]),
                make(OpCode::Pop, &[]),
            ])
        );
    }

    #[test]
    fn test_assignment_errors() {
        assert!(matches!(
            compile("let x = 1; x = 2;"),
            Err(CompileError::ImmutableValue { .. })
        ));
        assert!(matches!(
            compile("let x = 1; x++;"),
            Err(CompileError::ImmutableValue { .. })
        ));
        assert!(matches!(
            compile("1 = 2;"),
            Err(CompileError::IdentifierExpected { .. })
        ));
        assert!(matches!(
            compile("y = 2;"),
            Err(CompileError::IdentifierNotFound { .. })
        ));
        assert!(matches!(
            compile("let x = [1]; x[0] = 2;"),
            Err(CompileError::ImmutableValue { .. })
        ));
    }

    #[test]
    fn test_let_duplicate() {
        let err = compile("let a = 1; let a = 2;").unwrap_err();
        assert!(matches!(err, CompileError::AlreadyDeclared { ref name, .. } if name == "a"));
        assert_eq!(
            err.hint().as_deref(),
            Some("Remove 'let' before the variable name")
        );

        // a function body may shadow outer bindings
        assert!(compile("let a = 1; let f = () => { let a = 2; a };").is_ok());
    }

    #[test]
    fn test_prefix_and_postfix_increment() {
        let bytecode = compile("let mut a = 1; ++a; a--;").unwrap();
        assert_eq!(
            bytecode.instructions,
            concat(vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::SetGlobal, &[0]),
                make(OpCode::IncrementGlobal, &[0]),
                make(OpCode::GetGlobal, &[0]),
                make(OpCode::Pop, &[]),
                make(OpCode::GetGlobal, &[0]),
                make(OpCode::DecrementGlobal, &[0]),
                make(OpCode::Pop, &[]),
            ])
        );
    }

    #[test]
    fn test_collections() {
        let bytecode = compile("[1, 2]; {2: 3, 1: 4}; (1, 2); [1][0]").unwrap();
        assert_eq!(
            bytecode.instructions,
            concat(vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Array, &[2]),
                make(OpCode::Pop, &[]),
                // keys are emitted in sorted order
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[2]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Constant, &[3]),
                make(OpCode::Hash, &[4]),
                make(OpCode::Pop, &[]),
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Tuple, &[2]),
                make(OpCode::Pop, &[]),
                make(OpCode::Constant, &[0]),
                make(OpCode::Array, &[1]),
                make(OpCode::Constant, &[4]),
                make(OpCode::Index, &[]),
                make(OpCode::Pop, &[]),
            ])
        );
    }

    #[test]
    fn test_sole_spread_element_is_not_wrapped() {
        let bytecode = compile("[...\"ab\"]").unwrap();
        assert_eq!(
            bytecode.instructions,
            concat(vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::Spread, &[]),
                make(OpCode::Pop, &[]),
            ])
        );
    }

    #[test]
    fn test_functions() {
        let bytecode = compile("() => { return 5 + 10 }").unwrap();
        let function = function_at(&bytecode, 2);
        assert_eq!(
            function.instructions,
            concat(vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Add, &[]),
                make(OpCode::ReturnValue, &[]),
            ])
        );
        assert_eq!(
            bytecode.instructions,
            concat(vec![make(OpCode::Closure, &[2, 0]), make(OpCode::Pop, &[])])
        );

        // implicit return of the last expression
        let bytecode = compile("() => { 1; 2 }").unwrap();
        assert_eq!(
            function_at(&bytecode, 2).instructions,
            concat(vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::Pop, &[]),
                make(OpCode::Constant, &[1]),
                make(OpCode::ReturnValue, &[]),
            ])
        );

        let bytecode = compile("() => { }").unwrap();
        assert_eq!(
            function_at(&bytecode, 0).instructions,
            make(OpCode::Return, &[])
        );
    }

    #[test]
    fn test_function_parameters_and_defaults() {
        let bytecode = compile("let f = (a, b = 2) => { a + b };").unwrap();
        let function = function_at(&bytecode, 1);
        assert_eq!(function.num_parameters, 2);
        assert_eq!(function.num_defaults, 1);
        assert_eq!(function.num_locals, 2);
        assert_eq!(function.name.as_deref(), Some("f"));
        assert_eq!(
            function.instructions,
            concat(vec![
                make(OpCode::Constant, &[0]),
                make(OpCode::SetLocalDefault, &[1]),
                make(OpCode::GetLocal, &[0]),
                make(OpCode::GetLocal, &[1]),
                make(OpCode::Add, &[]),
                make(OpCode::ReturnValue, &[]),
            ])
        );
    }

    #[test]
    fn test_closures_capture_free_variables() {
        let bytecode = compile("(a) => { (b) => { a + b } }").unwrap();
        let inner = function_at(&bytecode, 0);
        assert_eq!(
            inner.instructions,
            concat(vec![
                make(OpCode::GetFree, &[0]),
                make(OpCode::GetLocal, &[0]),
                make(OpCode::Add, &[]),
                make(OpCode::ReturnValue, &[]),
            ])
        );
        let outer = function_at(&bytecode, 1);
        assert_eq!(
            outer.instructions,
            concat(vec![
                make(OpCode::GetLocal, &[0]),
                make(OpCode::Closure, &[0, 1]),
                make(OpCode::ReturnValue, &[]),
            ])
        );
    }

    #[test]
    fn test_recursive_function_uses_current_closure() {
        let bytecode = compile("let countdown = (x) => { countdown(x - 1) };").unwrap();
        let function = function_at(&bytecode, 1);
        assert_eq!(
            function.instructions,
            concat(vec![
                make(OpCode::CurrentClosure, &[]),
                make(OpCode::GetLocal, &[0]),
                make(OpCode::Constant, &[0]),
                make(OpCode::Sub, &[]),
                make(OpCode::Call, &[1]),
                make(OpCode::ReturnValue, &[]),
            ])
        );
    }

    #[test]
    fn test_builtins() {
        let bytecode = compile("len([]); push([], 1);").unwrap();
        assert_eq!(
            bytecode.instructions,
            concat(vec![
                make(OpCode::GetBuiltin, &[2]),
                make(OpCode::Array, &[0]),
                make(OpCode::Call, &[1]),
                make(OpCode::Pop, &[]),
                make(OpCode::GetBuiltin, &[6]),
                make(OpCode::Array, &[0]),
                make(OpCode::Constant, &[0]),
                make(OpCode::Call, &[2]),
                make(OpCode::Pop, &[]),
            ])
        );
    }

    #[test]
    fn test_top_level_return() {
        let err = compile("return 1;").unwrap_err();
        assert!(matches!(err, CompileError::TopLevelReturn(_)));
        assert_eq!(err.hint().as_deref(), Some("Use 'exit(0);' instead"));
    }

    #[test]
    fn test_recovers_after_error_in_nested_scope() {
        let mut compiler = Compiler::new();
        let result = compiler.compile(&parse("let f = () => { missing };"));
        assert!(matches!(result, Err(CompileError::IdentifierNotFound { .. })));
        assert!(compiler.symbol_table().is_global());
        assert!(compiler.in_main());

        compiler.compile(&parse("1;")).unwrap();
    }

    #[test]
    fn test_state_carries_over_sessions() {
        let mut compiler = Compiler::new();
        compiler.compile(&parse("let a = 1;")).unwrap();
        let (bytecode, symbols) = compiler.finish();

        let mut compiler = Compiler::with_state(symbols, bytecode.constants);
        compiler.compile(&parse("a")).unwrap();
        assert_eq!(
            compiler.bytecode().instructions,
            concat(vec![make(OpCode::GetGlobal, &[0]), make(OpCode::Pop, &[])])
        );
    }

    #[test]
    fn test_functions_reading_mutable_globals_are_flagged() {
        let bytecode = compile(
            "let mut i = 0; let k = 1; \
             let a = () => { i }; let b = () => { k }; let c = () => { () => { i } };",
        )
        .unwrap();

        assert!(function_at(&bytecode, 2).reads_mutable_globals);
        assert!(!function_at(&bytecode, 3).reads_mutable_globals);
        // only the inner body reads `i`
        assert!(function_at(&bytecode, 4).reads_mutable_globals);
        assert!(!function_at(&bytecode, 5).reads_mutable_globals);
    }

}
