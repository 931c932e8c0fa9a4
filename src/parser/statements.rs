//! Statement parsing: let, return, while, blocks.

use crate::ast::*;
use crate::lexer::TokenKind;

use super::core::{ParseResult, Parser};

impl Parser {
    pub(crate) fn statement(&mut self) -> ParseResult<Stmt> {
        if self.check(&TokenKind::Let) {
            self.let_statement()
        } else if self.check(&TokenKind::Return) {
            self.return_statement()
        } else if self.check(&TokenKind::While) {
            self.while_statement()
        } else {
            self.expression_statement()
        }
    }

    fn let_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Let)?;

        let mutable = self.match_token(&TokenKind::Mut);
        let name = self.expect_identifier()?;
        self.expect(&TokenKind::Equal)?;

        let mut value = self.expression()?;
        if let ExprKind::Function(function) = &mut value.kind {
            function.name = Some(name.clone());
        }
        self.match_token(&TokenKind::Semicolon);

        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(
            StmtKind::Let {
                name,
                mutable,
                value,
            },
            span,
        ))
    }

    fn return_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::Return)?;

        let value = if self.is_at_end()
            || self.check(&TokenKind::Semicolon)
            || self.check(&TokenKind::RightBrace)
        {
            None
        } else {
            Some(self.expression()?)
        };
        self.match_token(&TokenKind::Semicolon);

        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(StmtKind::Return(value), span))
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.current_span();
        self.expect(&TokenKind::While)?;

        self.expect(&TokenKind::LeftParen)?;
        let condition = self.expression()?;
        self.expect(&TokenKind::RightParen)?;
        let body = self.block()?;

        let span = start_span.merge(&self.previous_span());
        Ok(Stmt::new(StmtKind::While { condition, body }, span))
    }

    fn expression_statement(&mut self) -> ParseResult<Stmt> {
        let expr = self.expression()?;
        self.match_token(&TokenKind::Semicolon);

        let span = expr.span.merge(&self.previous_span());
        Ok(Stmt::new(StmtKind::Expression(expr), span))
    }

    /// `{ statement* }`
    pub(crate) fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(&TokenKind::LeftBrace)?;

        let mut statements = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            if self.match_token(&TokenKind::Semicolon) {
                continue;
            }
            statements.push(self.statement()?);
        }
        self.expect(&TokenKind::RightBrace)?;

        Ok(statements)
    }
}
