//! Runtime values for the bytecode VM.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::bytecode::builtins::BUILTINS;
use crate::bytecode::chunk::{CompiledFunction, Constant};

/// Insertion-ordered hash storage.
pub type HashMap = IndexMap<HashKey, Value, ahash::RandomState>;

/// A closure: a function template plus the values it captured when built.
#[derive(Debug)]
pub struct Closure {
    pub function: Rc<CompiledFunction>,
    pub free: Vec<Value>,
}

impl Closure {
    pub fn new(function: Rc<CompiledFunction>, free: Vec<Value>) -> Self {
        Self { function, free }
    }
}

/// Runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Null,
    String(Rc<str>),
    /// Mutable and shared by reference.
    Array(Rc<RefCell<Vec<Value>>>),
    /// Immutable.
    Tuple(Rc<[Value]>),
    /// Mutable and shared by reference.
    Hash(Rc<RefCell<HashMap>>),
    Closure(Rc<Closure>),
    /// Index into the builtin table.
    Builtin(u8),
}

/// The hashable subset of values, used as hash keys and in cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Int(i64),
    Bool(bool),
    String(Rc<str>),
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKey::Int(n) => write!(f, "{}", n),
            HashKey::Bool(b) => write!(f, "{}", b),
            HashKey::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl Value {
    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn array(elements: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    pub fn tuple(elements: Vec<Value>) -> Value {
        Value::Tuple(Rc::from(elements))
    }

    pub fn hash(map: HashMap) -> Value {
        Value::Hash(Rc::new(RefCell::new(map)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Bool(_) => "Bool",
            Value::Null => "Null",
            Value::String(_) => "String",
            Value::Array(_) => "Array",
            Value::Tuple(_) => "Tuple",
            Value::Hash(_) => "Hash",
            Value::Closure(_) => "Function",
            Value::Builtin(_) => "Builtin",
        }
    }

    /// `false` and `null` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Null => false,
            _ => true,
        }
    }

    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Int(n) => Some(HashKey::Int(*n)),
            Value::Bool(b) => Some(HashKey::Bool(*b)),
            Value::String(s) => Some(HashKey::String(s.clone())),
            _ => None,
        }
    }

    /// Whether the value can reach an array or hash, which callers could
    /// mutate through a shared reference.
    pub fn reaches_mutable(&self) -> bool {
        match self {
            Value::Array(_) | Value::Hash(_) => true,
            Value::Tuple(elements) => elements.iter().any(Value::reaches_mutable),
            Value::Closure(closure) => closure.free.iter().any(Value::reaches_mutable),
            _ => false,
        }
    }

    /// Display form used inside containers, where strings are quoted.
    pub fn inspect(&self) -> String {
        match self {
            Value::String(s) => format!("{:?}", s),
            other => other.to_string(),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Int(n) => Value::Int(*n),
            Constant::String(s) => Value::String(s.clone()),
            Constant::Function(function) => {
                Value::Closure(Rc::new(Closure::new(function.clone(), Vec::new())))
            }
        }
    }
}

/// Structural equality for data, identity for functions.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Hash(a), Value::Hash(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            _ => false,
        }
    }
}

fn write_elements(f: &mut fmt::Formatter<'_>, elements: &[Value]) -> fmt::Result {
    for (i, value) in elements.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", value.inspect())?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(elements) => {
                write!(f, "[")?;
                write_elements(f, &elements.borrow())?;
                write!(f, "]")
            }
            Value::Tuple(elements) => {
                write!(f, "(")?;
                write_elements(f, elements)?;
                if elements.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::Hash(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value.inspect())?;
                }
                write!(f, "}}")
            }
            Value::Closure(closure) => write!(f, "<fn {}>", closure.function.display_name()),
            Value::Builtin(index) => match BUILTINS.get(*index as usize) {
                Some(builtin) => write!(f, "<builtin {}>", builtin.name),
                None => write!(f, "<builtin #{}>", index),
            },
        }
    }
}
