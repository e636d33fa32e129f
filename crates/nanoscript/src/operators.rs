//! Binary operator semantics shared by the VM and the constant folder.
//!
//! Keeping the arithmetic and comparison rules in one place guarantees that
//! folding `2 + 3` at compile time and executing `ADD` at run time agree,
//! including the two deliberate special cases: `ADD` on two strings
//! concatenates, and ordered comparisons accept either two numbers or two
//! strings (lexicographic). Everything else is a `type_mismatch`.

use std::cmp::Ordering;

use crate::ast::BinaryOp;
use crate::bytecode::Opcode;
use crate::error::RuntimeError;
use crate::value::Value;

/// Map a source-level binary operator to the opcode that implements it.
///
/// `&&` and `||` have no opcode; the code generator lowers them to
/// short-circuit jump sequences, so they map to `None`.
pub fn opcode_for(op: BinaryOp) -> Option<Opcode> {
    let opcode = match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::Ne => Opcode::Ne,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Le => Opcode::Le,
        BinaryOp::Ge => Opcode::Ge,
        BinaryOp::And | BinaryOp::Or => return None,
    };
    Some(opcode)
}

/// Apply a binary opcode to two values.
///
/// `left` is the value pushed first (deeper on the stack). Only the
/// arithmetic and comparison opcodes are valid here; anything else is a
/// caller bug and reported as a `type_mismatch`.
pub fn apply_binary(op: Opcode, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match op {
        Opcode::Add => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            _ => numeric_binop(op, left, right, |a, b| a + b),
        },
        Opcode::Sub => numeric_binop(op, left, right, |a, b| a - b),
        Opcode::Mul => numeric_binop(op, left, right, |a, b| a * b),
        Opcode::Div => {
            let (a, b) = both_numbers(op, left, right)?;
            if b == 0.0 {
                Err(RuntimeError::division_by_zero("division by zero"))
            } else {
                Ok(Value::Number(a / b))
            }
        }
        Opcode::Mod => {
            let (a, b) = both_numbers(op, left, right)?;
            if b == 0.0 {
                Err(RuntimeError::division_by_zero("modulo by zero"))
            } else {
                Ok(Value::Number(a % b))
            }
        }
        Opcode::Eq => Ok(Value::Bool(left == right)),
        Opcode::Ne => Ok(Value::Bool(left != right)),
        Opcode::Lt => ordered(op, left, right, Ordering::is_lt),
        Opcode::Gt => ordered(op, left, right, Ordering::is_gt),
        Opcode::Le => ordered(op, left, right, Ordering::is_le),
        Opcode::Ge => ordered(op, left, right, Ordering::is_ge),
        other => Err(RuntimeError::type_mismatch(format!(
            "{other} is not a binary operator"
        ))),
    }
}

fn both_numbers(op: Opcode, left: &Value, right: &Value) -> Result<(f64, f64), RuntimeError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(RuntimeError::type_mismatch(format!(
            "{op} expects two numbers, got {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn numeric_binop<F>(op: Opcode, left: &Value, right: &Value, f: F) -> Result<Value, RuntimeError>
where
    F: Fn(f64, f64) -> f64,
{
    let (a, b) = both_numbers(op, left, right)?;
    Ok(Value::Number(f(a, b)))
}

/// Ordered comparisons: two numbers or two strings (lexicographic).
fn ordered<F>(op: Opcode, left: &Value, right: &Value, f: F) -> Result<Value, RuntimeError>
where
    F: Fn(Ordering) -> bool,
{
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        _ => {
            return Err(RuntimeError::type_mismatch(format!(
                "{op} expects two numbers or two strings, got {} and {}",
                left.type_name(),
                right.type_name()
            )));
        }
    };
    Ok(Value::Bool(f(ordering)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn arithmetic_on_numbers() {
        assert_eq!(apply_binary(Opcode::Add, &num(5.0), &num(3.0)).unwrap(), num(8.0));
        assert_eq!(apply_binary(Opcode::Sub, &num(5.0), &num(3.0)).unwrap(), num(2.0));
        assert_eq!(apply_binary(Opcode::Mul, &num(4.0), &num(2.5)).unwrap(), num(10.0));
        assert_eq!(apply_binary(Opcode::Div, &num(7.0), &num(2.0)).unwrap(), num(3.5));
        assert_eq!(apply_binary(Opcode::Mod, &num(7.0), &num(4.0)).unwrap(), num(3.0));
    }

    #[test]
    fn add_concatenates_two_strings() {
        let got = apply_binary(Opcode::Add, &Value::from("foo"), &Value::from("bar")).unwrap();
        assert_eq!(got, Value::from("foobar"));
    }

    #[test]
    fn add_rejects_mixed_string_and_number() {
        let err = apply_binary(Opcode::Add, &Value::from("hello"), &num(5.0)).unwrap_err();
        assert_eq!(err.kind, crate::error::RuntimeErrorKind::TypeMismatch);
    }

    #[test]
    fn division_and_modulo_by_zero() {
        let err = apply_binary(Opcode::Div, &num(1.0), &num(0.0)).unwrap_err();
        assert_eq!(err.kind, crate::error::RuntimeErrorKind::DivisionByZero);
        let err = apply_binary(Opcode::Mod, &num(1.0), &num(0.0)).unwrap_err();
        assert_eq!(err.kind, crate::error::RuntimeErrorKind::DivisionByZero);
    }

    #[test]
    fn equality_is_strict() {
        assert_eq!(
            apply_binary(Opcode::Eq, &num(1.0), &Value::Bool(true)).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            apply_binary(Opcode::Ne, &Value::from("a"), &num(1.0)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            apply_binary(Opcode::Eq, &Value::Undefined, &Value::Undefined).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn ordered_comparison_on_strings_is_lexicographic() {
        assert_eq!(
            apply_binary(Opcode::Lt, &Value::from("apple"), &Value::from("banana")).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            apply_binary(Opcode::Ge, &Value::from("b"), &Value::from("b")).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn ordered_comparison_rejects_mixed_types() {
        let err = apply_binary(Opcode::Lt, &Value::from("1"), &num(2.0)).unwrap_err();
        assert_eq!(err.kind, crate::error::RuntimeErrorKind::TypeMismatch);
    }
}
