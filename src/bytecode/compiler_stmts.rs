//! Statement compilation.

use crate::ast::{Stmt, StmtKind};
use crate::bytecode::compiler::Compiler;
use crate::bytecode::instruction::OpCode;
use crate::bytecode::symbol_table::SymbolScope;
use crate::error::{CompileError, CompileResult};

impl Compiler {
    pub(crate) fn compile_statement(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.compile_expression(expr)?;
                self.emit_op(OpCode::Pop);
            }

            StmtKind::Let {
                name,
                mutable,
                value,
            } => {
                // Names from outer scopes and builtins may be shadowed.
                if let Some(existing) = self.symbol_table.lookup_own(name) {
                    if matches!(existing.scope, SymbolScope::Global | SymbolScope::Local) {
                        return Err(CompileError::already_declared(name, stmt.span));
                    }
                }

                // The value still sees any outer binding of the same name. A
                // named function reaches itself through its own scope.
                self.compile_expression(value)?;
                let symbol = self.symbol_table.define(name, *mutable);
                self.store_symbol(&symbol, stmt.span)?;
            }

            StmtKind::Return(value) => {
                if self.in_main() {
                    return Err(CompileError::TopLevelReturn(stmt.span));
                }
                match value {
                    Some(expr) => {
                        self.compile_expression(expr)?;
                        self.emit_op(OpCode::ReturnValue);
                    }
                    None => {
                        self.emit_op(OpCode::Return);
                    }
                }
            }

            StmtKind::While { condition, body } => {
                let loop_start = self.current_offset();
                self.compile_expression(condition)?;
                let exit_jump = self.emit_jump(OpCode::JumpNotTruthy);

                // Every body statement discards its own value, so nothing
                // accumulates across iterations.
                self.compile_block(body)?;

                self.emit(OpCode::Jump, &[loop_start]);
                self.patch_jump(exit_jump, stmt.span)?;
            }
        }
        Ok(())
    }

    pub(crate) fn compile_block(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    /// Compile a block that must leave exactly one value on the stack: the
    /// value of its trailing expression, or null.
    pub(crate) fn compile_block_value(&mut self, stmts: &[Stmt]) -> CompileResult<()> {
        self.compile_block(stmts)?;

        let ends_in_expression = matches!(
            stmts.last().map(|stmt| &stmt.kind),
            Some(StmtKind::Expression(_))
        );
        if ends_in_expression && self.last_instruction_is(OpCode::Pop) {
            self.remove_last_pop();
        } else {
            self.emit_op(OpCode::Null);
        }
        Ok(())
    }
}
