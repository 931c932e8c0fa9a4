//! Expression parsing using Pratt precedence.

use crate::ast::*;
use crate::error::ParserError;
use crate::lexer::TokenKind;
use crate::span::Span;

use super::core::{ParseResult, Parser};
use super::precedence::{get_precedence, Precedence};

impl Parser {
    pub(crate) fn expression(&mut self) -> ParseResult<Expr> {
        self.parse_precedence(Precedence::Assignment)
    }

    pub(crate) fn parse_precedence(&mut self, min_precedence: Precedence) -> ParseResult<Expr> {
        let mut left = self.parse_prefix()?;

        while !self.is_at_end() {
            let precedence = get_precedence(&self.peek().kind);
            if precedence == Precedence::None || precedence < min_precedence {
                break;
            }

            left = self.parse_infix(left, precedence)?;
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> ParseResult<Expr> {
        if self.is_at_end() {
            return Err(ParserError::unexpected_eof(self.current_span()));
        }
        let token = self.advance();
        let start_span = token.span;

        match &token.kind {
            TokenKind::IntLiteral(n) => Ok(Expr::new(ExprKind::IntLiteral(*n), start_span)),
            TokenKind::StringLiteral(s) => {
                Ok(Expr::new(ExprKind::StringLiteral(s.clone()), start_span))
            }
            TokenKind::BoolLiteral(b) => Ok(Expr::new(ExprKind::BoolLiteral(*b), start_span)),
            TokenKind::Null => Ok(Expr::new(ExprKind::Null, start_span)),

            TokenKind::Identifier(name) => {
                Ok(Expr::new(ExprKind::Identifier(name.clone()), start_span))
            }

            TokenKind::LeftParen => {
                if self.looks_like_function_literal() {
                    self.parse_function_literal(start_span)
                } else {
                    self.parse_group_or_tuple(start_span)
                }
            }

            TokenKind::LeftBracket => self.parse_array(start_span),
            TokenKind::LeftBrace => self.parse_hash(start_span),
            TokenKind::If => self.parse_if(start_span),

            TokenKind::Minus => self.prefix_expr(PrefixOp::Negate, start_span),
            TokenKind::Bang => self.prefix_expr(PrefixOp::Not, start_span),
            TokenKind::Spread => self.prefix_expr(PrefixOp::Spread, start_span),
            TokenKind::PlusPlus => self.prefix_expr(PrefixOp::Increment, start_span),
            TokenKind::MinusMinus => self.prefix_expr(PrefixOp::Decrement, start_span),

            _ => Err(ParserError::expected_expression(
                format!("{}", token.kind),
                token.span,
            )),
        }
    }

    fn prefix_expr(&mut self, operator: PrefixOp, start_span: Span) -> ParseResult<Expr> {
        let operand = self.parse_precedence(Precedence::Unary)?;
        let span = start_span.merge(&operand.span);
        Ok(Expr::new(
            ExprKind::Prefix {
                operator,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    /// `(expr)` is a grouping; `(a, b)` and `(a,)` are tuples.
    fn parse_group_or_tuple(&mut self, start_span: Span) -> ParseResult<Expr> {
        let first = self.expression()?;

        if !self.match_token(&TokenKind::Comma) {
            self.expect(&TokenKind::RightParen)?;
            return Ok(first);
        }

        let mut elements = vec![first];
        while !self.check(&TokenKind::RightParen) {
            elements.push(self.expression()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RightParen)?;
        let span = start_span.merge(&self.previous_span());
        Ok(Expr::new(ExprKind::Tuple(elements), span))
    }

    fn parse_array(&mut self, start_span: Span) -> ParseResult<Expr> {
        let elements = self.parse_expression_list(&TokenKind::RightBracket)?;
        let span = start_span.merge(&self.previous_span());
        Ok(Expr::new(ExprKind::Array(elements), span))
    }

    fn parse_hash(&mut self, start_span: Span) -> ParseResult<Expr> {
        let mut pairs = Vec::new();

        while !self.check(&TokenKind::RightBrace) {
            let key = self.expression()?;
            self.expect(&TokenKind::Colon)?;
            let value = self.expression()?;
            pairs.push((key, value));

            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RightBrace)?;

        let span = start_span.merge(&self.previous_span());
        Ok(Expr::new(ExprKind::Hash(pairs), span))
    }

    /// Comma separated expressions up to `end`, which is consumed. A trailing
    /// comma is allowed.
    fn parse_expression_list(&mut self, end: &TokenKind) -> ParseResult<Vec<Expr>> {
        let mut items = Vec::new();

        while !self.check(end) {
            items.push(self.expression()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(end)?;

        Ok(items)
    }

    fn parse_if(&mut self, start_span: Span) -> ParseResult<Expr> {
        self.expect(&TokenKind::LeftParen)?;
        let condition = self.expression()?;
        self.expect(&TokenKind::RightParen)?;

        let consequence = self.block()?;

        let alternative = if self.match_token(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                // `else if` nests the next conditional as the only statement
                let if_span = self.advance().span;
                let nested = self.parse_if(if_span)?;
                let nested_span = nested.span;
                Some(vec![Stmt::new(StmtKind::Expression(nested), nested_span)])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };

        let span = start_span.merge(&self.previous_span());
        Ok(Expr::new(
            ExprKind::If {
                condition: Box::new(condition),
                consequence,
                alternative,
            },
            span,
        ))
    }

    /// Parses `params) => { body }`; the opening `(` is already consumed.
    fn parse_function_literal(&mut self, start_span: Span) -> ParseResult<Expr> {
        let params = self.parse_parameters()?;
        self.expect(&TokenKind::FatArrow)?;
        let body = self.block()?;

        let span = start_span.merge(&self.previous_span());
        Ok(Expr::new(
            ExprKind::Function(FunctionLiteral {
                name: None,
                params,
                body,
            }),
            span,
        ))
    }

    fn parse_parameters(&mut self) -> ParseResult<Vec<Parameter>> {
        let mut params: Vec<Parameter> = Vec::new();

        while !self.check(&TokenKind::RightParen) {
            let start_span = self.current_span();
            let mutable = self.match_token(&TokenKind::Mut);
            let name = self.expect_identifier()?;

            let default_value = if self.match_token(&TokenKind::Equal) {
                Some(self.expression()?)
            } else {
                None
            };

            let span = start_span.merge(&self.previous_span());
            if default_value.is_none() && params.iter().any(|p| p.default_value.is_some()) {
                return Err(ParserError::required_after_optional(name, span));
            }

            params.push(Parameter {
                name,
                mutable,
                default_value,
                span,
            });

            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RightParen)?;

        Ok(params)
    }

    fn parse_infix(&mut self, left: Expr, precedence: Precedence) -> ParseResult<Expr> {
        let token = self.advance();
        let start_span = left.span;

        match &token.kind {
            TokenKind::Plus => self.binary_expr(left, BinaryOp::Add, precedence),
            TokenKind::Minus => self.binary_expr(left, BinaryOp::Subtract, precedence),
            TokenKind::Star => self.binary_expr(left, BinaryOp::Multiply, precedence),
            TokenKind::Slash => self.binary_expr(left, BinaryOp::Divide, precedence),
            TokenKind::EqualEqual => self.binary_expr(left, BinaryOp::Equal, precedence),
            TokenKind::BangEqual => self.binary_expr(left, BinaryOp::NotEqual, precedence),
            TokenKind::Less => self.binary_expr(left, BinaryOp::Less, precedence),
            TokenKind::LessEqual => self.binary_expr(left, BinaryOp::LessEqual, precedence),
            TokenKind::Greater => self.binary_expr(left, BinaryOp::Greater, precedence),
            TokenKind::GreaterEqual => self.binary_expr(left, BinaryOp::GreaterEqual, precedence),
            TokenKind::And => self.binary_expr(left, BinaryOp::And, precedence),
            TokenKind::Or => self.binary_expr(left, BinaryOp::Or, precedence),
            TokenKind::Range => self.binary_expr(left, BinaryOp::Range, precedence),

            // Right-associative: 2 ** 3 ** 2 == 2 ** (3 ** 2)
            TokenKind::StarStar => {
                let right = self.parse_precedence(Precedence::Power)?;
                let span = start_span.merge(&right.span);
                Ok(Expr::new(
                    ExprKind::Binary {
                        left: Box::new(left),
                        operator: BinaryOp::Power,
                        right: Box::new(right),
                    },
                    span,
                ))
            }

            TokenKind::Equal => self.assign_expr(left, AssignOp::Assign),
            TokenKind::PlusEqual => self.assign_expr(left, AssignOp::Add),
            TokenKind::MinusEqual => self.assign_expr(left, AssignOp::Subtract),
            TokenKind::StarEqual => self.assign_expr(left, AssignOp::Multiply),
            TokenKind::SlashEqual => self.assign_expr(left, AssignOp::Divide),

            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let operator = if token.kind == TokenKind::PlusPlus {
                    PostfixOp::Increment
                } else {
                    PostfixOp::Decrement
                };
                let span = start_span.merge(&token.span);
                Ok(Expr::new(
                    ExprKind::Postfix {
                        operator,
                        operand: Box::new(left),
                    },
                    span,
                ))
            }

            TokenKind::LeftParen => {
                let arguments = self.parse_expression_list(&TokenKind::RightParen)?;
                let span = start_span.merge(&self.previous_span());
                Ok(Expr::new(
                    ExprKind::Call {
                        callee: Box::new(left),
                        arguments,
                    },
                    span,
                ))
            }

            TokenKind::LeftBracket => {
                let index = self.expression()?;
                self.expect(&TokenKind::RightBracket)?;

                if self.match_token(&TokenKind::Equal) {
                    let value = self.parse_precedence(Precedence::Assignment)?;
                    let span = start_span.merge(&value.span);
                    return Ok(Expr::new(
                        ExprKind::IndexAssign {
                            object: Box::new(left),
                            index: Box::new(index),
                            value: Box::new(value),
                        },
                        span,
                    ));
                }

                let span = start_span.merge(&self.previous_span());
                Ok(Expr::new(
                    ExprKind::Index {
                        object: Box::new(left),
                        index: Box::new(index),
                    },
                    span,
                ))
            }

            _ => Err(ParserError::unexpected_token(
                "operator",
                format!("{}", token.kind),
                token.span,
            )),
        }
    }

    fn binary_expr(
        &mut self,
        left: Expr,
        operator: BinaryOp,
        precedence: Precedence,
    ) -> ParseResult<Expr> {
        let right = self.parse_precedence(precedence.next())?;
        let span = left.span.merge(&right.span);
        Ok(Expr::new(
            ExprKind::Binary {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            },
            span,
        ))
    }

    /// Assignment is right-associative so `a = b = 3` assigns both.
    fn assign_expr(&mut self, target: Expr, operator: AssignOp) -> ParseResult<Expr> {
        let value = self.parse_precedence(Precedence::Assignment)?;
        let span = target.span.merge(&value.span);
        Ok(Expr::new(
            ExprKind::Assign {
                target: Box::new(target),
                operator,
                value: Box::new(value),
            },
            span,
        ))
    }
}
