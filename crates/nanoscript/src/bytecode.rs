//! Bytecode instruction set and compiled program representation.
//!
//! This module defines the instructions that the code generator and the
//! assembler produce and the VM executes. The same in-memory model backs all
//! three serialized forms (textual, binary, JSON; see [`crate::serialize`]),
//! so it is the contract between every tool in the chain.
//!
//! Instructions are `(opcode, optional operand)` records. Operands are plain
//! data (a number, a string, or a boolean), never heap references; `LOAD`,
//! `STORE`, and `CALL` refer to variables and functions by name.

use std::collections::HashMap;
use std::fmt;

use crate::error::Error;
use crate::value::{FunctionRef, format_number};

/// The NanoScript opcode set.
///
/// The discriminant doubles as the binary encoding of the opcode, so the
/// numbering is part of the on-disk format and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Push the operand onto the operand stack.
    Push = 0,
    /// Discard the top of the stack.
    Pop = 1,
    /// Duplicate the top of the stack.
    Dup = 2,

    // Arithmetic: pop right then left, push the result. `Add` on two
    // strings concatenates.
    Add = 3,
    Sub = 4,
    Mul = 5,
    Div = 6,
    Mod = 7,

    // Comparison: pop right then left, push a boolean.
    Eq = 8,
    Ne = 9,
    Lt = 10,
    Gt = 11,
    Le = 12,
    Ge = 13,

    /// Unconditional jump to the operand address.
    Jump = 14,
    /// Pop a value; jump to the operand address when it is falsy.
    JumpIfFalse = 15,
    /// Call the named intrinsic or user function.
    Call = 16,
    /// Return from the current call frame.
    Return = 17,

    /// Push the value bound to the operand name (frame locals, then globals).
    Load = 18,
    /// Pop a value and bind it to the operand name.
    Store = 19,

    /// Pop a value and emit its string form on the host output sink.
    Print = 20,
    /// Stop execution.
    Halt = 21,
}

/// All opcodes in encoding order.
pub const OPCODES: [Opcode; 22] = [
    Opcode::Push,
    Opcode::Pop,
    Opcode::Dup,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Mod,
    Opcode::Eq,
    Opcode::Ne,
    Opcode::Lt,
    Opcode::Gt,
    Opcode::Le,
    Opcode::Ge,
    Opcode::Jump,
    Opcode::JumpIfFalse,
    Opcode::Call,
    Opcode::Return,
    Opcode::Load,
    Opcode::Store,
    Opcode::Print,
    Opcode::Halt,
];

impl Opcode {
    /// Canonical (uppercase) mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Dup => "DUP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Eq => "EQ",
            Opcode::Ne => "NE",
            Opcode::Lt => "LT",
            Opcode::Gt => "GT",
            Opcode::Le => "LE",
            Opcode::Ge => "GE",
            Opcode::Jump => "JUMP",
            Opcode::JumpIfFalse => "JUMP_IF_FALSE",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Print => "PRINT",
            Opcode::Halt => "HALT",
        }
    }

    /// Look up an opcode by its canonical mnemonic (exact, uppercase).
    pub fn from_mnemonic(name: &str) -> Option<Opcode> {
        OPCODES.iter().copied().find(|op| op.mnemonic() == name)
    }

    /// Look up an opcode by mnemonic, ignoring case.
    pub fn from_mnemonic_ignore_case(name: &str) -> Option<Opcode> {
        Self::from_mnemonic(&name.to_ascii_uppercase())
    }

    /// Binary encoding of the opcode.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a binary opcode byte.
    pub fn from_code(code: u8) -> Option<Opcode> {
        OPCODES.get(code as usize).copied()
    }

    /// Whether the opcode carries an operand.
    pub fn requires_operand(self) -> bool {
        matches!(
            self,
            Opcode::Push
                | Opcode::Jump
                | Opcode::JumpIfFalse
                | Opcode::Call
                | Opcode::Load
                | Opcode::Store
        )
    }

    /// Whether the opcode is a jump whose operand is an instruction address.
    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfFalse)
    }

    /// One-line explanation, used by the disassembler's comment column.
    pub fn describe(self) -> &'static str {
        match self {
            Opcode::Push => "Push a value onto the stack",
            Opcode::Pop => "Discard the top of the stack",
            Opcode::Dup => "Duplicate the top of the stack",
            Opcode::Add => "Pop two values, push their sum (or concatenation)",
            Opcode::Sub => "Pop two values, push their difference",
            Opcode::Mul => "Pop two values, push their product",
            Opcode::Div => "Pop two values, push their quotient",
            Opcode::Mod => "Pop two values, push the remainder",
            Opcode::Eq => "Pop two values, push whether they are equal",
            Opcode::Ne => "Pop two values, push whether they differ",
            Opcode::Lt => "Pop two values, push whether left < right",
            Opcode::Gt => "Pop two values, push whether left > right",
            Opcode::Le => "Pop two values, push whether left <= right",
            Opcode::Ge => "Pop two values, push whether left >= right",
            Opcode::Jump => "Jump to the target address",
            Opcode::JumpIfFalse => "Pop a value, jump to the target when falsy",
            Opcode::Call => "Call the named function",
            Opcode::Return => "Pop the return value and leave the current frame",
            Opcode::Load => "Push the value of the named variable",
            Opcode::Store => "Pop a value into the named variable",
            Opcode::Print => "Pop a value and print it",
            Opcode::Halt => "Stop execution",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// An instruction operand: plain number, string, or boolean data.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Str(String),
    Bool(bool),
}

impl Operand {
    /// Short type tag, used by the disassembler's type annotations and by
    /// the binary encoding.
    pub fn type_name(&self) -> &'static str {
        match self {
            Operand::Number(_) => "number",
            Operand::Str(_) => "string",
            Operand::Bool(_) => "boolean",
        }
    }

    /// The operand as a jump-target address, when it is one.
    pub fn as_address(&self) -> Option<usize> {
        match self {
            Operand::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
            _ => None,
        }
    }

    /// Render the operand in the textual bytecode form.
    ///
    /// Strings are quoted only when leaving them bare would be ambiguous:
    /// empty, containing whitespace, a quote, or a comment character, or
    /// readable back as a number or boolean.
    pub fn to_text(&self) -> String {
        match self {
            Operand::Number(n) => format_number(*n),
            Operand::Bool(b) => b.to_string(),
            Operand::Str(s) => {
                if needs_quoting(s) {
                    let escaped = s
                        .replace('\\', "\\\\")
                        .replace('"', "\\\"")
                        .replace('\n', "\\n")
                        .replace('\t', "\\t");
                    format!("\"{escaped}\"")
                } else {
                    s.clone()
                }
            }
        }
    }
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || s.chars().any(|c| c.is_whitespace() || c == '"' || c == ';' || c == ':')
        || s.parse::<f64>().is_ok()
        || s == "true"
        || s == "false"
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<f64> for Operand {
    fn from(n: f64) -> Self {
        Operand::Number(n)
    }
}

impl From<usize> for Operand {
    fn from(n: usize) -> Self {
        Operand::Number(n as f64)
    }
}

impl From<bool> for Operand {
    fn from(b: bool) -> Self {
        Operand::Bool(b)
    }
}

impl From<&str> for Operand {
    fn from(s: &str) -> Self {
        Operand::Str(s.to_string())
    }
}

impl From<String> for Operand {
    fn from(s: String) -> Self {
        Operand::Str(s)
    }
}

/// A single bytecode instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Option<Operand>,
}

impl Instruction {
    /// An instruction without an operand.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            operand: None,
        }
    }

    /// An instruction carrying an operand.
    pub fn with_operand(opcode: Opcode, operand: impl Into<Operand>) -> Self {
        Self {
            opcode,
            operand: Some(operand.into()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operand {
            Some(operand) => write!(f, "{} {}", self.opcode, operand.to_text()),
            None => write!(f, "{}", self.opcode),
        }
    }
}

/// A compiled program: the linear instruction stream plus the function table
/// the code generator built alongside it.
///
/// The serialized bytecode formats carry only the instruction stream; the
/// function table exists in memory and is re-derived by recompiling source.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub functions: HashMap<String, FunctionRef>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>, functions: HashMap<String, FunctionRef>) -> Self {
        Self {
            instructions,
            functions,
        }
    }

    /// A program with no user functions (assembled or deserialized code).
    pub fn from_instructions(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            functions: HashMap::new(),
        }
    }

    /// Check the structural bytecode invariants before execution:
    /// operand presence matches each opcode's arity, and every jump target
    /// is a whole number inside `[0, len)`.
    pub fn validate(&self) -> Result<(), Error> {
        let len = self.instructions.len();
        for (index, instr) in self.instructions.iter().enumerate() {
            match (&instr.operand, instr.opcode.requires_operand()) {
                (None, true) => {
                    return Err(Error::Bytecode(format!(
                        "{} at address {index} is missing its operand",
                        instr.opcode
                    )));
                }
                (Some(_), false) => {
                    return Err(Error::Bytecode(format!(
                        "{} at address {index} does not take an operand",
                        instr.opcode
                    )));
                }
                _ => {}
            }
            if instr.opcode.is_jump() {
                let target = instr
                    .operand
                    .as_ref()
                    .and_then(Operand::as_address)
                    .ok_or_else(|| {
                        Error::Bytecode(format!(
                            "{} at address {index} has a non-address operand",
                            instr.opcode
                        ))
                    })?;
                if target >= len {
                    return Err(Error::Bytecode(format!(
                        "{} at address {index} targets {target}, beyond the last instruction",
                        instr.opcode
                    )));
                }
            }
        }
        for func in self.functions.values() {
            if func.address >= len {
                return Err(Error::Bytecode(format!(
                    "function '{}' starts at {}, beyond the last instruction",
                    func.name, func.address
                )));
            }
        }
        Ok(())
    }
}
