//! Built-in intrinsic functions.
//!
//! Intrinsics are host-provided functions invoked through `CALL name` (and,
//! for `print`, the dedicated `PRINT` opcode). They are dispatched by name
//! before any user-defined function is considered. Arguments are strictly
//! typed: a wrong argument type is a `type_mismatch`, never a silent
//! coercion; the only conversions are the three explicit `to*` intrinsics.

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::Sink;

/// Result of attempting to dispatch a call to an intrinsic.
pub enum IntrinsicResult {
    /// The name is an intrinsic; `Ok(Some(v))` pushes `v`, `Ok(None)`
    /// pushes nothing (`print`).
    Handled(Result<Option<Value>, RuntimeError>),
    /// Not an intrinsic; the caller should try user-defined functions.
    NotIntrinsic,
}

/// Declared arity of an intrinsic, or `None` for unknown names.
///
/// The code generator uses this for compile-time argument checking and the
/// disassembler for its stack-depth estimate.
pub fn intrinsic_arity(name: &str) -> Option<usize> {
    let arity = match name {
        "print" | "abs" | "sqrt" | "length" | "toString" | "toNumber" | "toBoolean" => 1,
        "pow" | "concat" => 2,
        "substring" => 3,
        _ => return None,
    };
    Some(arity)
}

/// Dispatch a call to an intrinsic with already-popped arguments.
pub fn call_intrinsic(name: &str, args: Vec<Value>, sink: &mut Sink) -> IntrinsicResult {
    let handled = match name {
        "print" => intrinsic_print(args, sink),
        "abs" => intrinsic_abs(args),
        "sqrt" => intrinsic_sqrt(args),
        "pow" => intrinsic_pow(args),
        "length" => intrinsic_length(args),
        "substring" => intrinsic_substring(args),
        "concat" => intrinsic_concat(args),
        "toString" => intrinsic_to_string(args),
        "toNumber" => intrinsic_to_number(args),
        "toBoolean" => intrinsic_to_boolean(args),
        _ => return IntrinsicResult::NotIntrinsic,
    };
    IntrinsicResult::Handled(handled)
}

fn check_args(name: &str, args: &[Value], expected: usize) -> Result<(), RuntimeError> {
    if args.len() != expected {
        return Err(RuntimeError::type_mismatch(format!(
            "{name} expects {expected} argument{}, got {}",
            if expected == 1 { "" } else { "s" },
            args.len()
        )));
    }
    Ok(())
}

fn number_arg(name: &str, args: &[Value], index: usize) -> Result<f64, RuntimeError> {
    match &args[index] {
        Value::Number(n) => Ok(*n),
        other => Err(RuntimeError::type_mismatch(format!(
            "{name} expects a number, got {}",
            other.type_name()
        ))),
    }
}

fn string_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a str, RuntimeError> {
    match &args[index] {
        Value::Str(s) => Ok(s),
        other => Err(RuntimeError::type_mismatch(format!(
            "{name} expects a string, got {}",
            other.type_name()
        ))),
    }
}

fn intrinsic_print(args: Vec<Value>, sink: &mut Sink) -> Result<Option<Value>, RuntimeError> {
    check_args("print", &args, 1)?;
    sink.write_line(&args[0].to_display_string());
    Ok(None)
}

fn intrinsic_abs(args: Vec<Value>) -> Result<Option<Value>, RuntimeError> {
    check_args("abs", &args, 1)?;
    let x = number_arg("abs", &args, 0)?;
    Ok(Some(Value::Number(x.abs())))
}

fn intrinsic_sqrt(args: Vec<Value>) -> Result<Option<Value>, RuntimeError> {
    check_args("sqrt", &args, 1)?;
    let x = number_arg("sqrt", &args, 0)?;
    Ok(Some(Value::Number(x.sqrt())))
}

fn intrinsic_pow(args: Vec<Value>) -> Result<Option<Value>, RuntimeError> {
    check_args("pow", &args, 2)?;
    let x = number_arg("pow", &args, 0)?;
    let y = number_arg("pow", &args, 1)?;
    Ok(Some(Value::Number(x.powf(y))))
}

fn intrinsic_length(args: Vec<Value>) -> Result<Option<Value>, RuntimeError> {
    check_args("length", &args, 1)?;
    let s = string_arg("length", &args, 0)?;
    Ok(Some(Value::Number(s.chars().count() as f64)))
}

/// `substring(s, start, end)`: end-exclusive, indices in characters,
/// clamped to the string's bounds. An inverted range yields `""`.
fn intrinsic_substring(args: Vec<Value>) -> Result<Option<Value>, RuntimeError> {
    check_args("substring", &args, 3)?;
    let s = string_arg("substring", &args, 0)?;
    let start = number_arg("substring", &args, 1)?;
    let end = number_arg("substring", &args, 2)?;
    let len = s.chars().count();
    let start = (start.max(0.0) as usize).min(len);
    let end = (end.max(0.0) as usize).min(len);
    let slice: String = if start < end {
        s.chars().skip(start).take(end - start).collect()
    } else {
        String::new()
    };
    Ok(Some(Value::Str(slice)))
}

fn intrinsic_concat(args: Vec<Value>) -> Result<Option<Value>, RuntimeError> {
    check_args("concat", &args, 2)?;
    let a = string_arg("concat", &args, 0)?;
    let b = string_arg("concat", &args, 1)?;
    Ok(Some(Value::Str(format!("{a}{b}"))))
}

fn intrinsic_to_string(args: Vec<Value>) -> Result<Option<Value>, RuntimeError> {
    check_args("toString", &args, 1)?;
    Ok(Some(Value::Str(args[0].to_display_string())))
}

fn intrinsic_to_number(args: Vec<Value>) -> Result<Option<Value>, RuntimeError> {
    check_args("toNumber", &args, 1)?;
    Ok(Some(Value::Number(args[0].to_number()?)))
}

fn intrinsic_to_boolean(args: Vec<Value>) -> Result<Option<Value>, RuntimeError> {
    check_args("toBoolean", &args, 1)?;
    Ok(Some(Value::Bool(args[0].is_truthy())))
}
