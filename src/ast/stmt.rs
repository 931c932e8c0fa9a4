//! Statement AST nodes.

use std::fmt;

use crate::ast::expr::Expr;
use crate::span::Span;

/// A statement in the AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Statement variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Expression statement: expr;
    Expression(Expr),

    /// Variable declaration: let [mut] x = expr;
    Let {
        name: String,
        mutable: bool,
        value: Expr,
    },

    /// Return statement: return expr;
    Return(Option<Expr>),

    /// While loop: while (cond) { ... }
    While { condition: Expr, body: Vec<Stmt> },
}

/// Function parameter: `[mut] name [= default]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub mutable: bool,
    pub default_value: Option<Expr>,
    pub span: Span,
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mutable {
            write!(f, "mut ")?;
        }
        write!(f, "{}", self.name)?;
        if let Some(default) = &self.default_value {
            write!(f, " = {}", default)?;
        }
        Ok(())
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StmtKind::Expression(expr) => write!(f, "{}", expr),
            StmtKind::Let {
                name,
                mutable,
                value,
            } => {
                let keyword = if *mutable { "let mut" } else { "let" };
                write!(f, "{} {} = {};", keyword, name, value)
            }
            StmtKind::Return(Some(value)) => write!(f, "return {};", value),
            StmtKind::Return(None) => write!(f, "return;"),
            StmtKind::While { condition, body } => {
                write!(f, "while ({}) ", condition)?;
                write_block(f, body)
            }
        }
    }
}

pub(crate) fn write_block(f: &mut fmt::Formatter<'_>, stmts: &[Stmt]) -> fmt::Result {
    write!(f, "{{")?;
    for stmt in stmts {
        write!(f, " {}", stmt)?;
    }
    write!(f, " }}")
}

/// A complete program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stmt) in self.statements.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", stmt)?;
        }
        Ok(())
    }
}
