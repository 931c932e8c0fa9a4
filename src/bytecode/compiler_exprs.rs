//! Expression compilation.

use tracing::trace;

use crate::ast::{AssignOp, BinaryOp, Expr, ExprKind, FunctionLiteral, PostfixOp, PrefixOp, Stmt};
use crate::bytecode::chunk::{CompiledFunction, Constant};
use crate::bytecode::compiler::{Compiler, MAX_U16_OPERAND, MAX_U8_OPERAND};
use crate::bytecode::instruction::OpCode;
use crate::bytecode::symbol_table::SymbolScope;
use crate::error::{CompileError, CompileResult};
use crate::span::Span;

impl Compiler {
    pub(crate) fn compile_expression(&mut self, expr: &Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::IntLiteral(n) => {
                let index = self.add_constant(Constant::Int(*n), expr.span)?;
                self.emit(OpCode::Constant, &[index]);
            }

            ExprKind::StringLiteral(s) => {
                let index = self.add_constant(Constant::String(s.as_str().into()), expr.span)?;
                self.emit(OpCode::Constant, &[index]);
            }

            ExprKind::BoolLiteral(true) => {
                self.emit_op(OpCode::True);
            }

            ExprKind::BoolLiteral(false) => {
                self.emit_op(OpCode::False);
            }

            ExprKind::Null => {
                self.emit_op(OpCode::Null);
            }

            ExprKind::Identifier(name) => {
                let symbol = self.resolve(name, expr.span)?;
                self.load_symbol(&symbol, expr.span)?;
            }

            ExprKind::Prefix { operator, operand } => match operator {
                PrefixOp::Negate => {
                    self.compile_expression(operand)?;
                    self.emit_op(OpCode::Minus);
                }
                PrefixOp::Not => {
                    self.compile_expression(operand)?;
                    self.emit_op(OpCode::Bang);
                }
                PrefixOp::Spread => {
                    self.compile_expression(operand)?;
                    self.emit_op(OpCode::Spread);
                }
                PrefixOp::Increment => self.compile_step(operand, true, true)?,
                PrefixOp::Decrement => self.compile_step(operand, false, true)?,
            },

            ExprKind::Postfix { operator, operand } => {
                let increment = *operator == PostfixOp::Increment;
                self.compile_step(operand, increment, false)?;
            }

            ExprKind::Binary {
                left,
                operator,
                right,
            } => self.compile_binary(left, *operator, right)?,

            ExprKind::Assign {
                target,
                operator,
                value,
            } => self.compile_assign(target, *operator, value)?,

            ExprKind::IndexAssign {
                object,
                index,
                value,
            } => {
                if let ExprKind::Identifier(name) = &object.kind {
                    let symbol = self.resolve(name, object.span)?;
                    if !symbol.mutable {
                        return Err(CompileError::immutable_value(name, object.span));
                    }
                }
                self.compile_expression(value)?;
                self.compile_expression(object)?;
                self.compile_expression(index)?;
                self.emit_op(OpCode::IndexAssign);
            }

            ExprKind::Array(elements) => {
                // `[...x]` is the spread array itself.
                if let [only] = elements.as_slice() {
                    if let ExprKind::Prefix {
                        operator: PrefixOp::Spread,
                        ..
                    } = only.kind
                    {
                        return self.compile_expression(only);
                    }
                }

                for element in elements {
                    self.compile_expression(element)?;
                }
                let count = self.check_operand("array elements", elements.len(), MAX_U16_OPERAND, expr.span)?;
                self.emit(OpCode::Array, &[count]);
            }

            ExprKind::Hash(pairs) => {
                // Sorted so that output does not depend on source order.
                let mut sorted: Vec<_> = pairs.iter().collect();
                sorted.sort_by_cached_key(|(key, _)| key.to_string());

                for (key, value) in sorted {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                let count = self.check_operand("hash entries", pairs.len() * 2, MAX_U16_OPERAND, expr.span)?;
                self.emit(OpCode::Hash, &[count]);
            }

            ExprKind::Tuple(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                let count = self.check_operand("tuple elements", elements.len(), MAX_U16_OPERAND, expr.span)?;
                self.emit(OpCode::Tuple, &[count]);
            }

            ExprKind::Index { object, index } => {
                self.compile_expression(object)?;
                self.compile_expression(index)?;
                self.emit_op(OpCode::Index);
            }

            ExprKind::Call { callee, arguments } => {
                self.compile_expression(callee)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                let count = self.check_operand("arguments", arguments.len(), MAX_U8_OPERAND, expr.span)?;
                self.emit(OpCode::Call, &[count]);
            }

            ExprKind::If {
                condition,
                consequence,
                alternative,
            } => self.compile_if(condition, consequence, alternative.as_deref(), expr.span)?,

            ExprKind::Function(literal) => self.compile_function(literal, expr.span)?,
        }
        Ok(())
    }

    fn compile_binary(&mut self, left: &Expr, operator: BinaryOp, right: &Expr) -> CompileResult<()> {
        // `a < b` runs as `b > a`.
        let swapped = match operator {
            BinaryOp::Less => Some(OpCode::GreaterThan),
            BinaryOp::LessEqual => Some(OpCode::GreaterThanEqual),
            _ => None,
        };
        if let Some(op) = swapped {
            self.compile_expression(right)?;
            self.compile_expression(left)?;
            self.emit_op(op);
            return Ok(());
        }

        self.compile_expression(left)?;
        self.compile_expression(right)?;
        self.emit_op(binary_opcode(operator));
        Ok(())
    }

    fn compile_assign(&mut self, target: &Expr, operator: AssignOp, value: &Expr) -> CompileResult<()> {
        let ExprKind::Identifier(name) = &target.kind else {
            return Err(CompileError::identifier_expected(target.to_string(), target.span));
        };
        let symbol = self.resolve_mutable(name, target.span)?;

        match operator.binary_op() {
            None => self.compile_expression(value)?,
            Some(op) => {
                self.load_symbol(&symbol, target.span)?;
                self.compile_expression(value)?;
                self.emit_op(binary_opcode(op));
            }
        }

        // Assignment is an expression; its value is the new binding.
        self.store_symbol(&symbol, target.span)?;
        self.load_symbol(&symbol, target.span)
    }

    /// `++x`, `--x`, `x++` and `x--`.
    fn compile_step(&mut self, operand: &Expr, increment: bool, prefix: bool) -> CompileResult<()> {
        let ExprKind::Identifier(name) = &operand.kind else {
            return Err(CompileError::identifier_expected(operand.to_string(), operand.span));
        };
        let symbol = self.resolve_mutable(name, operand.span)?;

        let (op, limit) = match (symbol.scope, increment) {
            (SymbolScope::Global, true) => (OpCode::IncrementGlobal, MAX_U16_OPERAND),
            (SymbolScope::Global, false) => (OpCode::DecrementGlobal, MAX_U16_OPERAND),
            (SymbolScope::Local, true) => (OpCode::IncrementLocal, MAX_U8_OPERAND),
            (SymbolScope::Local, false) => (OpCode::DecrementLocal, MAX_U8_OPERAND),
            _ => return Err(CompileError::immutable_value(name, operand.span)),
        };
        let index = self.check_operand("variables", symbol.index, limit, operand.span)?;

        if prefix {
            self.emit(op, &[index]);
            self.load_symbol(&symbol, operand.span)?;
        } else {
            self.load_symbol(&symbol, operand.span)?;
            self.emit(op, &[index]);
        }
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expr,
        consequence: &[Stmt],
        alternative: Option<&[Stmt]>,
        span: Span,
    ) -> CompileResult<()> {
        self.compile_expression(condition)?;
        let else_jump = self.emit_jump(OpCode::JumpNotTruthy);

        self.compile_block_value(consequence)?;
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump, span)?;

        match alternative {
            Some(stmts) => self.compile_block_value(stmts)?,
            None => {
                self.emit_op(OpCode::Null);
            }
        }
        self.patch_jump(end_jump, span)
    }

    fn compile_function(&mut self, literal: &FunctionLiteral, span: Span) -> CompileResult<()> {
        let num_parameters = self.check_operand("parameters", literal.params.len(), MAX_U8_OPERAND, span)?;

        self.enter_scope();
        if let Some(name) = &literal.name {
            self.symbol_table.define_function_name(name);
        }

        let mut num_defaults = 0;
        for param in &literal.params {
            let symbol = self.symbol_table.define(&param.name, param.mutable);
            if let Some(default) = &param.default_value {
                self.compile_expression(default)?;
                self.emit(OpCode::SetLocalDefault, &[symbol.index]);
                num_defaults += 1;
            }
        }

        self.compile_block(&literal.body)?;
        if self.last_instruction_is(OpCode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(OpCode::ReturnValue) {
            self.emit_op(OpCode::Return);
        }

        let (scope, closed) = self.leave_scope();
        let num_free = self.check_operand("free variables", closed.free_symbols.len(), MAX_U8_OPERAND, span)?;
        for free in &closed.free_symbols {
            self.load_symbol(free, span)?;
        }

        let function = CompiledFunction {
            instructions: scope.instructions,
            num_locals: closed.num_definitions,
            num_parameters,
            num_defaults,
            name: literal.name.clone(),
            reads_mutable_globals: scope.reads_mutable_globals,
        };
        trace!(
            target: "shark::compiler",
            name = function.display_name(),
            locals = function.num_locals,
            free = num_free,
            bytes = function.instructions.len(),
            "compiled function"
        );

        let index = self.function_constant(function, span)?;
        self.emit(OpCode::Closure, &[index, num_free]);
        Ok(())
    }
}

fn binary_opcode(operator: BinaryOp) -> OpCode {
    match operator {
        BinaryOp::Add => OpCode::Add,
        BinaryOp::Subtract => OpCode::Sub,
        BinaryOp::Multiply => OpCode::Mul,
        BinaryOp::Divide => OpCode::Div,
        BinaryOp::Power => OpCode::Power,
        BinaryOp::Equal => OpCode::Equal,
        BinaryOp::NotEqual => OpCode::NotEqual,
        BinaryOp::Greater | BinaryOp::Less => OpCode::GreaterThan,
        BinaryOp::GreaterEqual | BinaryOp::LessEqual => OpCode::GreaterThanEqual,
        BinaryOp::And => OpCode::And,
        BinaryOp::Or => OpCode::Or,
        BinaryOp::Range => OpCode::Range,
    }
}
