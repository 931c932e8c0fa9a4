//! Compiled program artifacts: function templates, the constant pool and
//! the top-level bytecode bundle.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::bytecode::instruction::Instructions;

/// A compiled function template, shared by every closure built from it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompiledFunction {
    /// The function body.
    pub instructions: Instructions,
    /// Local slots to reserve, parameters included.
    pub num_locals: usize,
    /// Declared parameters, defaults included.
    pub num_parameters: usize,
    /// Trailing parameters that carry a default value.
    pub num_defaults: usize,
    /// Name from the binding `let`, if any.
    pub name: Option<String>,
    /// The body reads a `let mut` global, so its result depends on more
    /// than its arguments and captures.
    #[serde(default)]
    pub reads_mutable_globals: bool,
}

impl CompiledFunction {
    /// Fewest arguments a call may pass.
    pub fn min_arity(&self) -> usize {
        self.num_parameters.saturating_sub(self.num_defaults)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }
}

/// A constant value in the constant pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    String(Rc<str>),
    Function(Rc<CompiledFunction>),
}

impl Constant {
    pub fn kind(&self) -> &'static str {
        match self {
            Constant::Int(_) => "Int",
            Constant::String(_) => "String",
            Constant::Function(_) => "Function",
        }
    }

    /// Whether two constants are interchangeable in the pool. Function
    /// templates never are, even when structurally identical.
    pub fn same_literal(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::String(a), Constant::String(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Function(a), Constant::Function(b)) => a == b,
            _ => self.same_literal(other),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(n) => write!(f, "{}", n),
            Constant::String(s) => write!(f, "{:?}", s),
            Constant::Function(function) => write!(
                f,
                "<fn {} params={} defaults={} locals={}>",
                function.display_name(),
                function.num_parameters,
                function.num_defaults,
                function.num_locals
            ),
        }
    }
}

/// The output of compilation: top-level instructions plus the constant pool.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Constant>,
}
