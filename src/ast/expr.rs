//! Expression AST nodes.

use std::fmt;

use crate::ast::stmt::{write_block, Parameter, Stmt};
use crate::span::Span;

/// An expression in the AST.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// All expression variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal: 42
    IntLiteral(i64),
    /// String literal: "hello"
    StringLiteral(String),
    /// Boolean literal: true, false
    BoolLiteral(bool),
    /// Null literal
    Null,

    /// Variable reference: foo
    Identifier(String),

    /// Prefix operation: -x, !x, ...x, ++x, --x
    Prefix {
        operator: PrefixOp,
        operand: Box<Expr>,
    },

    /// Postfix operation: x++, x--
    Postfix {
        operator: PostfixOp,
        operand: Box<Expr>,
    },

    /// Binary operation: a + b
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
    },

    /// Assignment: x = 5, x += 1
    Assign {
        target: Box<Expr>,
        operator: AssignOp,
        value: Box<Expr>,
    },

    /// Index assignment: arr[i] = v
    IndexAssign {
        object: Box<Expr>,
        index: Box<Expr>,
        value: Box<Expr>,
    },

    /// Array literal: [1, 2, 3]
    Array(Vec<Expr>),

    /// Hash literal: {"key": value}
    Hash(Vec<(Expr, Expr)>),

    /// Tuple literal: (1, 2)
    Tuple(Vec<Expr>),

    /// Index: arr[index]
    Index { object: Box<Expr>, index: Box<Expr> },

    /// Function call: foo(a, b)
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },

    /// Conditional expression: if (cond) { ... } else { ... }
    If {
        condition: Box<Expr>,
        consequence: Vec<Stmt>,
        alternative: Option<Vec<Stmt>>,
    },

    /// Function literal: (a, mut b = 2) => { ... }
    Function(FunctionLiteral),
}

/// A function literal. `name` is set when the literal is bound by `let`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLiteral {
    pub name: Option<String>,
    pub params: Vec<Parameter>,
    pub body: Vec<Stmt>,
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Negate,
    Not,
    Spread,
    Increment,
    Decrement,
}

impl fmt::Display for PrefixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefixOp::Negate => write!(f, "-"),
            PrefixOp::Not => write!(f, "!"),
            PrefixOp::Spread => write!(f, "..."),
            PrefixOp::Increment => write!(f, "++"),
            PrefixOp::Decrement => write!(f, "--"),
        }
    }
}

/// Postfix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    Increment,
    Decrement,
}

impl fmt::Display for PostfixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostfixOp::Increment => write!(f, "++"),
            PostfixOp::Decrement => write!(f, "--"),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Range,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Subtract => write!(f, "-"),
            BinaryOp::Multiply => write!(f, "*"),
            BinaryOp::Divide => write!(f, "/"),
            BinaryOp::Power => write!(f, "**"),
            BinaryOp::Equal => write!(f, "=="),
            BinaryOp::NotEqual => write!(f, "!="),
            BinaryOp::Less => write!(f, "<"),
            BinaryOp::LessEqual => write!(f, "<="),
            BinaryOp::Greater => write!(f, ">"),
            BinaryOp::GreaterEqual => write!(f, ">="),
            BinaryOp::And => write!(f, "&&"),
            BinaryOp::Or => write!(f, "||"),
            BinaryOp::Range => write!(f, ".."),
        }
    }
}

/// Assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl AssignOp {
    /// The arithmetic operator a compound assignment applies, if any.
    pub fn binary_op(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Subtract => Some(BinaryOp::Subtract),
            AssignOp::Multiply => Some(BinaryOp::Multiply),
            AssignOp::Divide => Some(BinaryOp::Divide),
        }
    }
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignOp::Assign => write!(f, "="),
            AssignOp::Add => write!(f, "+="),
            AssignOp::Subtract => write!(f, "-="),
            AssignOp::Multiply => write!(f, "*="),
            AssignOp::Divide => write!(f, "/="),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// Renders canonical source text; hash literals sort their keys by it.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::IntLiteral(n) => write!(f, "{}", n),
            ExprKind::StringLiteral(s) => write!(f, "{:?}", s),
            ExprKind::BoolLiteral(b) => write!(f, "{}", b),
            ExprKind::Null => write!(f, "null"),
            ExprKind::Identifier(name) => write!(f, "{}", name),
            ExprKind::Prefix { operator, operand } => write!(f, "({}{})", operator, operand),
            ExprKind::Postfix { operator, operand } => write!(f, "({}{})", operand, operator),
            ExprKind::Binary {
                left,
                operator,
                right,
            } => write!(f, "({} {} {})", left, operator, right),
            ExprKind::Assign {
                target,
                operator,
                value,
            } => write!(f, "{} {} {}", target, operator, value),
            ExprKind::IndexAssign {
                object,
                index,
                value,
            } => write!(f, "{}[{}] = {}", object, index, value),
            ExprKind::Array(elements) => {
                write!(f, "[")?;
                write_list(f, elements)?;
                write!(f, "]")
            }
            ExprKind::Hash(pairs) => {
                write!(f, "{{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            ExprKind::Tuple(elements) => {
                write!(f, "(")?;
                write_list(f, elements)?;
                if elements.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            ExprKind::Index { object, index } => write!(f, "({}[{}])", object, index),
            ExprKind::Call { callee, arguments } => {
                write!(f, "{}(", callee)?;
                write_list(f, arguments)?;
                write!(f, ")")
            }
            ExprKind::If {
                condition,
                consequence,
                alternative,
            } => {
                write!(f, "if ({}) ", condition)?;
                write_block(f, consequence)?;
                if let Some(alternative) = alternative {
                    write!(f, " else ")?;
                    write_block(f, alternative)?;
                }
                Ok(())
            }
            ExprKind::Function(function) => {
                if let Some(name) = &function.name {
                    write!(f, "<{}>", name)?;
                }
                write!(f, "(")?;
                for (i, param) in function.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                write!(f, ") => ")?;
                write_block(f, &function.body)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(kind: ExprKind) -> Expr {
        Expr::new(kind, Span::default())
    }

    #[test]
    fn test_display_binary_nesting() {
        let sum = expr(ExprKind::Binary {
            left: Box::new(expr(ExprKind::IntLiteral(1))),
            operator: BinaryOp::Add,
            right: Box::new(expr(ExprKind::Binary {
                left: Box::new(expr(ExprKind::IntLiteral(2))),
                operator: BinaryOp::Multiply,
                right: Box::new(expr(ExprKind::Identifier("x".into()))),
            })),
        });
        assert_eq!(sum.to_string(), "(1 + (2 * x))");
    }

    #[test]
    fn test_display_collections() {
        let hash = expr(ExprKind::Hash(vec![(
            expr(ExprKind::StringLiteral("a".into())),
            expr(ExprKind::Tuple(vec![expr(ExprKind::IntLiteral(1))])),
        )]));
        assert_eq!(hash.to_string(), "{\"a\": (1,)}");
    }

    #[test]
    fn test_compound_assign_maps_to_binary() {
        assert_eq!(AssignOp::Multiply.binary_op(), Some(BinaryOp::Multiply));
        assert_eq!(AssignOp::Assign.binary_op(), None);
    }
}
