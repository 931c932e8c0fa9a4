//! Operators, indexing and collection building for the VM.

use crate::bytecode::instruction::OpCode;
use crate::bytecode::value::{HashMap, Value};
use crate::bytecode::vm::Vm;
use crate::error::{RuntimeError, RuntimeResult};

/// Most elements a single range expression may produce.
pub(crate) const MAX_RANGE_LENGTH: u64 = 1 << 24;

impl Vm {
    pub(crate) fn execute_binary(&self, op: OpCode, left: Value, right: Value) -> RuntimeResult<Value> {
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => integer_operation(op, *a, *b),
            (Value::Bool(a), Value::Bool(b)) => boolean_operation(op, *a, *b),
            (Value::String(a), Value::String(b)) => match op {
                OpCode::Add => {
                    let mut joined = String::with_capacity(a.len() + b.len());
                    joined.push_str(a);
                    joined.push_str(b);
                    Ok(Value::string(&joined))
                }
                OpCode::Equal => Ok(Value::Bool(a == b)),
                OpCode::NotEqual => Ok(Value::Bool(a != b)),
                _ => Err(unknown_operator(op, &left, &right)),
            },
            _ => Err(RuntimeError::MismatchedTypes(left.type_name(), right.type_name())),
        }
    }

    pub(crate) fn build_hash(&self, entries: Vec<Value>) -> RuntimeResult<Value> {
        let mut map = HashMap::with_capacity_and_hasher(entries.len() / 2, Default::default());
        let mut entries = entries.into_iter();
        while let (Some(key), Some(value)) = (entries.next(), entries.next()) {
            let hash_key = key
                .hash_key()
                .ok_or(RuntimeError::NonHashable(key.type_name()))?;
            map.insert(hash_key, value);
        }
        Ok(Value::hash(map))
    }

    pub(crate) fn execute_index(&self, object: Value, index: Value) -> RuntimeResult<Value> {
        match (&object, &index) {
            (Value::Array(elements), Value::Int(i)) => {
                let elements = elements.borrow();
                Ok(position(*i, elements.len())
                    .map(|i| elements[i].clone())
                    .unwrap_or_default())
            }
            (Value::String(s), Value::Int(i)) => Ok(usize::try_from(*i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::string(c.encode_utf8(&mut [0; 4])))
                .unwrap_or_default()),
            (Value::Tuple(elements), Value::Int(i)) => position(*i, elements.len())
                .map(|i| elements[i].clone())
                .ok_or(RuntimeError::index_out_of_bounds(*i, elements.len())),
            (Value::Hash(map), key) => {
                let key = key
                    .hash_key()
                    .ok_or(RuntimeError::NonHashable(key.type_name()))?;
                Ok(map.borrow().get(&key).cloned().unwrap_or_default())
            }
            (Value::Array(_) | Value::String(_) | Value::Tuple(_), other) => {
                Err(RuntimeError::MismatchedTypes(other.type_name(), "Int"))
            }
            _ => Err(RuntimeError::NonIndexable(object.type_name())),
        }
    }

    pub(crate) fn execute_index_assign(&self, object: Value, index: Value, value: Value) -> RuntimeResult<()> {
        match (&object, &index) {
            (Value::Array(elements), Value::Int(i)) => {
                let mut elements = elements.borrow_mut();
                let length = elements.len();
                let slot = position(*i, length)
                    .ok_or(RuntimeError::index_out_of_bounds(*i, length))?;
                elements[slot] = value;
                Ok(())
            }
            (Value::Array(_), other) => Err(RuntimeError::MismatchedTypes(other.type_name(), "Int")),
            (Value::Hash(map), key) => {
                let key = key
                    .hash_key()
                    .ok_or(RuntimeError::NonHashable(key.type_name()))?;
                map.borrow_mut().insert(key, value);
                Ok(())
            }
            (Value::Tuple(_) | Value::String(_), _) => {
                Err(RuntimeError::ImmutableValue(object.type_name()))
            }
            _ => Err(RuntimeError::NonIndexable(object.type_name())),
        }
    }

    /// `start..end`, inclusive, counting down when `start > end`.
    pub(crate) fn execute_range(&self, start: Value, end: Value) -> RuntimeResult<Value> {
        let (start, end) = match (start, end) {
            (Value::Int(start), Value::Int(end)) => (start, end),
            (Value::Int(_), other) | (other, _) => {
                return Err(RuntimeError::MismatchedTypes(other.type_name(), "Int"))
            }
        };

        let length = start.abs_diff(end).saturating_add(1);
        if length > MAX_RANGE_LENGTH {
            return Err(RuntimeError::RangeTooLarge(length));
        }

        let elements: Vec<Value> = if start <= end {
            (start..=end).map(Value::Int).collect()
        } else {
            (end..=start).rev().map(Value::Int).collect()
        };
        Ok(Value::array(elements))
    }

    /// `...s` splits a string into one-character strings.
    pub(crate) fn execute_spread(&self, operand: Value) -> RuntimeResult<Value> {
        match operand {
            Value::String(s) => {
                let chars = s
                    .chars()
                    .map(|c| Value::string(c.encode_utf8(&mut [0; 4])))
                    .collect();
                Ok(Value::array(chars))
            }
            other => Err(RuntimeError::MismatchedTypes(other.type_name(), "String")),
        }
    }
}

/// Index into a sequence of `length`, if in range.
fn position(index: i64, length: usize) -> Option<usize> {
    usize::try_from(index).ok().filter(|&i| i < length)
}

fn integer_operation(op: OpCode, a: i64, b: i64) -> RuntimeResult<Value> {
    let result = match op {
        OpCode::Add => Value::Int(a.wrapping_add(b)),
        OpCode::Sub => Value::Int(a.wrapping_sub(b)),
        OpCode::Mul => Value::Int(a.wrapping_mul(b)),
        OpCode::Div => {
            if b == 0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Value::Int(a.wrapping_div(b))
        }
        OpCode::Power => Value::Int(power(a, b)?),
        OpCode::Equal => Value::Bool(a == b),
        OpCode::NotEqual => Value::Bool(a != b),
        OpCode::GreaterThan => Value::Bool(a > b),
        OpCode::GreaterThanEqual => Value::Bool(a >= b),
        _ => {
            return Err(RuntimeError::UnknownOperator {
                op: operator_symbol(op),
                left: "Int",
                right: "Int",
            })
        }
    };
    Ok(result)
}

fn boolean_operation(op: OpCode, a: bool, b: bool) -> RuntimeResult<Value> {
    let result = match op {
        OpCode::Equal => a == b,
        OpCode::NotEqual => a != b,
        OpCode::And => a && b,
        OpCode::Or => a || b,
        _ => {
            return Err(RuntimeError::UnknownOperator {
                op: operator_symbol(op),
                left: "Bool",
                right: "Bool",
            })
        }
    };
    Ok(Value::Bool(result))
}

/// Integer exponentiation by squaring, wrapping on overflow.
fn power(base: i64, exponent: i64) -> RuntimeResult<i64> {
    if exponent < 0 {
        return match base {
            1 => Ok(1),
            -1 if exponent % 2 == 0 => Ok(1),
            -1 => Ok(-1),
            0 => Err(RuntimeError::DivisionByZero),
            _ => Ok(0),
        };
    }

    let mut result: i64 = 1;
    let mut base = base;
    let mut exponent = exponent;
    while exponent > 0 {
        if exponent & 1 == 1 {
            result = result.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exponent >>= 1;
    }
    Ok(result)
}

fn unknown_operator(op: OpCode, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::UnknownOperator {
        op: operator_symbol(op),
        left: left.type_name(),
        right: right.type_name(),
    }
}

fn operator_symbol(op: OpCode) -> &'static str {
    match op {
        OpCode::Add => "+",
        OpCode::Sub => "-",
        OpCode::Mul => "*",
        OpCode::Div => "/",
        OpCode::Power => "**",
        OpCode::Equal => "==",
        OpCode::NotEqual => "!=",
        OpCode::GreaterThan => ">",
        OpCode::GreaterThanEqual => ">=",
        OpCode::And => "&&",
        OpCode::Or => "||",
        _ => op.name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power() {
        assert_eq!(power(2, 10), Ok(1024));
        assert_eq!(power(-3, 3), Ok(-27));
        assert_eq!(power(7, 0), Ok(1));
        assert_eq!(power(1, -5), Ok(1));
        assert_eq!(power(-1, -3), Ok(-1));
        assert_eq!(power(-1, -4), Ok(1));
        assert_eq!(power(2, -1), Ok(0));
        assert_eq!(power(0, -1), Err(RuntimeError::DivisionByZero));
        // wraps like the other integer operators
        assert_eq!(power(2, 64), Ok(0));
    }

    #[test]
    fn test_integer_operations() {
        assert_eq!(integer_operation(OpCode::Div, 7, 2), Ok(Value::Int(3)));
        assert_eq!(integer_operation(OpCode::Div, 1, 0), Err(RuntimeError::DivisionByZero));
        assert_eq!(
            integer_operation(OpCode::Add, i64::MAX, 1),
            Ok(Value::Int(i64::MIN))
        );
        assert_eq!(
            integer_operation(OpCode::And, 1, 1),
            Err(RuntimeError::UnknownOperator {
                op: "&&",
                left: "Int",
                right: "Int"
            })
        );
    }

    #[test]
    fn test_position() {
        assert_eq!(position(0, 1), Some(0));
        assert_eq!(position(1, 1), None);
        assert_eq!(position(-1, 3), None);
    }
}
