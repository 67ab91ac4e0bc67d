use super::Evaluator;
use crate::bytecode::opcode::Operation;
use crate::error::EvalError;
use crate::value::Value;
use std::rc::Rc;

/// Numeric kind an arithmetic result is promoted to.
enum Promotion {
    Double,
    Float,
    Int,
}

impl Evaluator<'_> {
    pub(super) fn apply(&mut self, operation: Operation) -> Result<(), EvalError> {
        let result = match operation.arity() {
            1 => {
                let a = self.pop_value()?;
                self.unary(operation, a)?
            }
            2 => {
                let b = self.pop_value()?;
                let a = self.pop_value()?;
                binary(operation, a, b)?
            }
            _ => {
                let when_false = self.pop_value()?;
                let when_true = self.pop_value()?;
                let condition = self.pop_value()?;
                if condition.to_bool() {
                    when_true
                } else {
                    when_false
                }
            }
        };
        self.stack.push(result)
    }

    fn unary(&self, operation: Operation, a: Value) -> Result<Value, EvalError> {
        match (operation, a) {
            (Operation::UnaryPlus, a) if a.is_number() => Ok(a),
            (Operation::UnaryMinus, Value::Int32(i)) => Ok(Value::Int32(i.wrapping_neg())),
            (Operation::UnaryMinus, Value::Float(f)) => Ok(Value::Float(-f)),
            (Operation::UnaryMinus, Value::Double(d)) => Ok(Value::Double(-d)),
            (Operation::BinaryOneComplement, Value::Int32(i)) => Ok(Value::Int32(!i)),
            (Operation::Not, a) => Ok(Value::Boolean(!a.to_bool())),
            (Operation::FlowIterator, a) => {
                let index = a.to_int32() as usize;
                self.iterators
                    .get(index)
                    .map(|value| Value::Int32(*value))
                    .ok_or(EvalError::IteratorOutOfRange(index))
            }
            (Operation::MathSin | Operation::MathCos | Operation::MathLog, a) => math(operation, a),
            (operation, a) => Err(unsupported(operation, &[&a])),
        }
    }
}

fn binary(operation: Operation, a: Value, b: Value) -> Result<Value, EvalError> {
    match operation {
        Operation::Add if a.is_string() || b.is_string() => {
            Ok(Value::string(format!("{}{}", a, b)))
        }
        Operation::Add | Operation::Sub | Operation::Mul | Operation::Div | Operation::Mod => {
            arithmetic(operation, &a, &b)
        }
        Operation::LeftShift
        | Operation::RightShift
        | Operation::BinaryAnd
        | Operation::BinaryOr
        | Operation::BinaryXor => bitwise(operation, &a, &b),
        Operation::Equal => Ok(Value::Boolean(values_equal(&a, &b))),
        Operation::NotEqual => Ok(Value::Boolean(!values_equal(&a, &b))),
        Operation::Less => Ok(Value::Boolean(a.to_double() < b.to_double())),
        Operation::Greater => Ok(Value::Boolean(a.to_double() > b.to_double())),
        Operation::LessOrEqual => Ok(Value::Boolean(a.to_double() <= b.to_double())),
        Operation::GreaterOrEqual => Ok(Value::Boolean(a.to_double() >= b.to_double())),
        Operation::LogicalAnd => Ok(Value::Boolean(a.to_bool() && b.to_bool())),
        Operation::LogicalOr => Ok(Value::Boolean(a.to_bool() || b.to_bool())),
        Operation::StringFind => match (&a, &b) {
            (Value::String(haystack), Value::String(needle)) => {
                let haystack: &str = haystack;
                Ok(Value::Int32(
                    haystack
                        .find(&**needle)
                        .map_or(-1, |byte| haystack[..byte].chars().count() as i32),
                ))
            }
            _ => Err(unsupported(operation, &[&a, &b])),
        },
        _ => Err(unsupported(operation, &[&a, &b])),
    }
}

/// Applies an arithmetic operation with double > float > int32 promotion.
pub(crate) fn arithmetic(operation: Operation, a: &Value, b: &Value) -> Result<Value, EvalError> {
    let promotion = promote(a, b).ok_or_else(|| unsupported(operation, &[a, b]))?;
    match promotion {
        Promotion::Double => {
            let (x, y) = (a.to_double(), b.to_double());
            Ok(Value::Double(match operation {
                Operation::Add => x + y,
                Operation::Sub => x - y,
                Operation::Mul => x * y,
                Operation::Div => x / y,
                _ => x % y,
            }))
        }
        Promotion::Float => {
            let (x, y) = (a.to_float(), b.to_float());
            Ok(Value::Float(match operation {
                Operation::Add => x + y,
                Operation::Sub => x - y,
                Operation::Mul => x * y,
                Operation::Div => x / y,
                _ => x % y,
            }))
        }
        Promotion::Int => {
            let (x, y) = (a.to_int32(), b.to_int32());
            let result = match operation {
                Operation::Add => Some(x.wrapping_add(y)),
                Operation::Sub => Some(x.wrapping_sub(y)),
                Operation::Mul => Some(x.wrapping_mul(y)),
                Operation::Div => x.checked_div(y),
                _ => x.checked_rem(y),
            };
            result.map(Value::Int32).ok_or(EvalError::Operation {
                operation: operation.name(),
                detail: "integer division by zero".to_string(),
            })
        }
    }
}

fn promote(a: &Value, b: &Value) -> Option<Promotion> {
    let numeric = |v: &Value| v.is_number() || matches!(v, Value::Boolean(_));
    if !numeric(a) || !numeric(b) {
        return None;
    }
    if matches!(a, Value::Double(_)) || matches!(b, Value::Double(_)) {
        Some(Promotion::Double)
    } else if matches!(a, Value::Float(_)) || matches!(b, Value::Float(_)) {
        Some(Promotion::Float)
    } else {
        Some(Promotion::Int)
    }
}

fn bitwise(operation: Operation, a: &Value, b: &Value) -> Result<Value, EvalError> {
    let (Value::Int32(x), Value::Int32(y)) = (a, b) else {
        return Err(unsupported(operation, &[a, b]));
    };
    Ok(Value::Int32(match operation {
        Operation::LeftShift => x.wrapping_shl(*y as u32),
        Operation::RightShift => x.wrapping_shr(*y as u32),
        Operation::BinaryAnd => x & y,
        Operation::BinaryOr => x | y,
        _ => x ^ y,
    }))
}

fn math(operation: Operation, a: Value) -> Result<Value, EvalError> {
    let apply = |x: f64| match operation {
        Operation::MathSin => x.sin(),
        Operation::MathCos => x.cos(),
        _ => x.ln(),
    };
    match a {
        Value::Float(f) => Ok(Value::Float(apply(f as f64) as f32)),
        Value::Int32(_) | Value::Double(_) => Ok(Value::Double(apply(a.to_double()))),
        other => Err(unsupported(operation, &[&other])),
    }
}

/// Equality as seen by expressions: numbers compare by value across kinds.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y) || *x.borrow() == *y.borrow(),
        (x, y) if x.is_number() && y.is_number() => x.to_double() == y.to_double(),
        _ => false,
    }
}

fn unsupported(operation: Operation, operands: &[&Value]) -> EvalError {
    let types: Vec<&str> = operands.iter().map(|v| v.type_name()).collect();
    EvalError::Operation {
        operation: operation.name(),
        detail: format!("unsupported operand types ({})", types.join(", ")),
    }
}
