//! Error types for the NanoScript toolchain.
//!
//! Two families of structured errors flow through the pipeline:
//!
//! - [`CompileError`]: produced by the lexer, parser, optimizer, and code
//!   generator. Tagged `syntax`, `semantic`, or `type`, and always carries a
//!   source [`Location`].
//! - [`RuntimeError`]: produced by the virtual machine. Tagged
//!   `stack_overflow`, `undefined_variable`, `type_mismatch`, or
//!   `division_by_zero`, and carries the function-name call stack
//!   (outermost first).
//!
//! Everything else (assembly problems, malformed bytecode, resource limits,
//! I/O, JSON) is collected under the top-level [`Error`] enum so that callers
//! deal with a single failure type per pipeline stage.

use std::fmt;

use thiserror::Error;

/// A position in the source text. Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
    /// Length of the lexeme this location refers to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

impl Location {
    pub fn new(line: usize, column: usize) -> Self {
        Self {
            line,
            column,
            length: None,
        }
    }

    pub fn with_length(line: usize, column: usize, length: usize) -> Self {
        Self {
            line,
            column,
            length: Some(length),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}, Column {}", self.line, self.column)
    }
}

/// Classification of a compile-time error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    Syntax,
    Semantic,
    Type,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompileErrorKind::Syntax => "Syntax",
            CompileErrorKind::Semantic => "Semantic",
            CompileErrorKind::Type => "Type",
        };
        f.write_str(name)
    }
}

/// An error detected before execution, with its source location.
///
/// Renders as `<Stage> Error at Line L, Column C: <message>`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} Error at {location}: {message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub location: Location,
}

impl CompileError {
    pub fn syntax(message: impl Into<String>, location: Location) -> Self {
        Self {
            kind: CompileErrorKind::Syntax,
            message: message.into(),
            location,
        }
    }

    pub fn semantic(message: impl Into<String>, location: Location) -> Self {
        Self {
            kind: CompileErrorKind::Semantic,
            message: message.into(),
            location,
        }
    }

    pub fn type_error(message: impl Into<String>, location: Location) -> Self {
        Self {
            kind: CompileErrorKind::Type,
            message: message.into(),
            location,
        }
    }
}

/// Classification of a runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    StackOverflow,
    UndefinedVariable,
    TypeMismatch,
    DivisionByZero,
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            RuntimeErrorKind::StackOverflow => "stack_overflow",
            RuntimeErrorKind::UndefinedVariable => "undefined_variable",
            RuntimeErrorKind::TypeMismatch => "type_mismatch",
            RuntimeErrorKind::DivisionByZero => "division_by_zero",
        };
        f.write_str(tag)
    }
}

/// An error raised while the virtual machine is executing bytecode.
///
/// The call stack lists function names outermost first; the VM fills it in
/// when the error surfaces (helpers construct errors with an empty stack).
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    pub call_stack: Vec<String>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            call_stack: Vec::new(),
        }
    }

    pub fn stack_overflow(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::StackOverflow, message)
    }

    pub fn undefined_variable(name: &str) -> Self {
        Self::new(
            RuntimeErrorKind::UndefinedVariable,
            format!("'{name}' is not defined"),
        )
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::TypeMismatch, message)
    }

    pub fn division_by_zero(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::DivisionByZero, message)
    }

    /// Attach the current call stack (outermost first).
    pub fn with_call_stack(mut self, call_stack: Vec<String>) -> Self {
        self.call_stack = call_stack;
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Runtime Error ({}): {}", self.kind, self.message)?;
        if !self.call_stack.is_empty() {
            write!(f, "\nStack trace: {}", self.call_stack.join(" -> "))?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// Top-level error type for the toolchain.
#[derive(Debug, Error)]
pub enum Error {
    /// A compile-time error from the lexer, parser, or code generator.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// A runtime error from the virtual machine.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// An error from the assembler, with the 1-based source line.
    #[error("Assembly Error at line {line}: {message}")]
    Assembly { line: usize, message: String },

    /// Malformed textual or binary bytecode.
    #[error("Bytecode Error: {0}")]
    Bytecode(String),

    /// The host-configured instruction budget was exhausted.
    ///
    /// This is a resource limit, not one of the four runtime error kinds;
    /// it cannot be observed from inside a program.
    #[error("Instruction limit exceeded ({0} instructions)")]
    InstructionLimitExceeded(u64),

    /// JSON (de)serialization failure for `.bc` or `.ast.json` payloads.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure at the toolchain boundary.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn assembly(line: usize, message: impl Into<String>) -> Self {
        Error::Assembly {
            line,
            message: message.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_display_format() {
        let err = CompileError::syntax("unexpected token ';'", Location::new(3, 9));
        assert_eq!(
            err.to_string(),
            "Syntax Error at Line 3, Column 9: unexpected token ';'"
        );
    }

    #[test]
    fn runtime_error_display_includes_stack_trace() {
        let err = RuntimeError::division_by_zero("10 / 0")
            .with_call_stack(vec!["main".to_string(), "div".to_string()]);
        let text = err.to_string();
        assert!(text.starts_with("Runtime Error (division_by_zero): 10 / 0"));
        assert!(text.contains("Stack trace: main -> div"));
    }

    #[test]
    fn runtime_error_without_stack_omits_trace_line() {
        let err = RuntimeError::undefined_variable("x");
        assert_eq!(
            err.to_string(),
            "Runtime Error (undefined_variable): 'x' is not defined"
        );
    }
}
