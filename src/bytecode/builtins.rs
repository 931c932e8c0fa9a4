//! Builtin functions, addressed by their position in [`BUILTINS`].

use std::io::Write;

use crate::bytecode::value::Value;
use crate::error::{RuntimeError, RuntimeResult};

pub type BuiltinFn = fn(&[Value], &mut dyn Write) -> RuntimeResult<Value>;

/// A builtin function.
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
    /// Pure builtins may have their results memoized.
    pub cacheable: bool,
}

/// The builtin table. Indices are baked into compiled bytecode, so entries
/// are only ever appended.
pub static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "exit",
        func: builtin_exit,
        cacheable: false,
    },
    Builtin {
        name: "puts",
        func: builtin_puts,
        cacheable: false,
    },
    Builtin {
        name: "len",
        func: builtin_len,
        cacheable: true,
    },
    Builtin {
        name: "first",
        func: builtin_first,
        cacheable: true,
    },
    Builtin {
        name: "last",
        func: builtin_last,
        cacheable: true,
    },
    Builtin {
        name: "rest",
        func: builtin_rest,
        cacheable: true,
    },
    Builtin {
        name: "push",
        func: builtin_push,
        cacheable: true,
    },
    Builtin {
        name: "type",
        func: builtin_type,
        cacheable: true,
    },
];

pub fn lookup(index: u8) -> Option<&'static Builtin> {
    BUILTINS.get(index as usize)
}

fn check_arity(name: &'static str, args: &[Value], want: usize) -> RuntimeResult<()> {
    if args.len() != want {
        return Err(RuntimeError::builtin(
            name,
            format!("wrong number of arguments. got={}, want={}", args.len(), want),
        ));
    }
    Ok(())
}

fn unsupported(name: &'static str, value: &Value) -> RuntimeError {
    RuntimeError::builtin(
        name,
        format!("argument not supported, got {}", value.type_name()),
    )
}

fn builtin_exit(args: &[Value], out: &mut dyn Write) -> RuntimeResult<Value> {
    let code = match args {
        [] => 0,
        [Value::Int(code)] => *code,
        [other] => return Err(unsupported("exit", other)),
        _ => return check_arity("exit", args, 1).map(|_| Value::Null),
    };
    let code = i32::try_from(code)
        .map_err(|_| RuntimeError::builtin("exit", format!("exit code {} is out of range", code)))?;
    let _ = out.flush();
    std::process::exit(code)
}

fn builtin_puts(args: &[Value], out: &mut dyn Write) -> RuntimeResult<Value> {
    let line: String = args.iter().map(|arg| arg.to_string()).collect();
    writeln!(out, "{}", line).map_err(|e| RuntimeError::builtin("puts", e.to_string()))?;
    Ok(Value::Null)
}

fn builtin_len(args: &[Value], _out: &mut dyn Write) -> RuntimeResult<Value> {
    check_arity("len", args, 1)?;
    let len = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(elements) => elements.borrow().len(),
        Value::Tuple(elements) => elements.len(),
        Value::Hash(map) => map.borrow().len(),
        other => return Err(unsupported("len", other)),
    };
    Ok(Value::Int(len as i64))
}

fn builtin_first(args: &[Value], _out: &mut dyn Write) -> RuntimeResult<Value> {
    check_arity("first", args, 1)?;
    match &args[0] {
        Value::Array(elements) => Ok(elements.borrow().first().cloned().unwrap_or(Value::Null)),
        other => Err(unsupported("first", other)),
    }
}

fn builtin_last(args: &[Value], _out: &mut dyn Write) -> RuntimeResult<Value> {
    check_arity("last", args, 1)?;
    match &args[0] {
        Value::Array(elements) => Ok(elements.borrow().last().cloned().unwrap_or(Value::Null)),
        other => Err(unsupported("last", other)),
    }
}

fn builtin_rest(args: &[Value], _out: &mut dyn Write) -> RuntimeResult<Value> {
    check_arity("rest", args, 1)?;
    match &args[0] {
        Value::Array(elements) => {
            let elements = elements.borrow();
            if elements.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::array(elements[1..].to_vec()))
            }
        }
        other => Err(unsupported("rest", other)),
    }
}

fn builtin_push(args: &[Value], _out: &mut dyn Write) -> RuntimeResult<Value> {
    check_arity("push", args, 2)?;
    match &args[0] {
        Value::Array(elements) => {
            let mut pushed = elements.borrow().clone();
            pushed.push(args[1].clone());
            Ok(Value::array(pushed))
        }
        other => Err(unsupported("push", other)),
    }
}

fn builtin_type(args: &[Value], _out: &mut dyn Write) -> RuntimeResult<Value> {
    check_arity("type", args, 1)?;
    Ok(Value::string(args[0].type_name()))
}
