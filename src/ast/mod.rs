//! Abstract Syntax Tree for Shark.

pub mod expr;
pub mod stmt;

pub use expr::{AssignOp, BinaryOp, Expr, ExprKind, FunctionLiteral, PostfixOp, PrefixOp};
pub use stmt::{Parameter, Program, Stmt, StmtKind};
