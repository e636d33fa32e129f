//! Bytecode serialization: textual, binary, and JSON forms.
//!
//! All three forms encode the same in-memory [`Instruction`] stream and
//! round-trip through it:
//!
//! - **Textual** (`.asm` payload): one `OPCODE[ operand]` per line. On
//!   input, `true`/`false` read as booleans, anything that parses as a
//!   number reads as a number, and everything else is a string; quoted
//!   strings preserve spaces and escape `\"` and `\\`.
//! - **Binary**: per instruction, an opcode byte and a tag byte
//!   (0 = none, 1 = number, 2 = string, 3 = boolean) followed by the
//!   payload. Numbers are 4-byte big-endian two's complement, so only
//!   integral operands in the `i32` range are representable; strings carry
//!   a one-byte length.
//! - **JSON** (`.bc`): an array of `{"opcode": <name>, "operand"?: v}`
//!   objects. Input accepts the opcode as a mnemonic or its numeric code.

use serde::{Deserialize, Serialize};

use crate::bytecode::{Instruction, Opcode, Operand};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Textual form
// ---------------------------------------------------------------------------

/// Render instructions as one `OPCODE[ operand]` line each.
pub fn to_text(instructions: &[Instruction]) -> String {
    let mut out = String::new();
    for instr in instructions {
        out.push_str(&instr.to_string());
        out.push('\n');
    }
    out
}

/// Parse the textual form. Blank lines are ignored; mnemonics are matched
/// case-insensitively. Errors name the offending 1-based line.
pub fn parse_text(text: &str) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, rest.trim()),
            None => (line, ""),
        };
        let opcode = Opcode::from_mnemonic_ignore_case(mnemonic).ok_or_else(|| {
            Error::Bytecode(format!("unknown opcode '{mnemonic}' on line {line_no}"))
        })?;
        let operand = if rest.is_empty() {
            None
        } else {
            Some(parse_operand(rest).map_err(|msg| {
                Error::Bytecode(format!("{msg} on line {line_no}"))
            })?)
        };
        match (&operand, opcode.requires_operand()) {
            (None, true) => {
                return Err(Error::Bytecode(format!(
                    "{opcode} requires an operand on line {line_no}"
                )));
            }
            (Some(_), false) => {
                return Err(Error::Bytecode(format!(
                    "{opcode} does not take an operand on line {line_no}"
                )));
            }
            _ => {}
        }
        instructions.push(Instruction { opcode, operand });
    }
    Ok(instructions)
}

/// Classify a bare operand: boolean keywords, then numbers, then strings.
/// A leading `"` starts a quoted string that may contain spaces.
pub(crate) fn parse_operand(text: &str) -> std::result::Result<Operand, String> {
    if let Some(rest) = text.strip_prefix('"') {
        return parse_quoted(rest);
    }
    if text == "true" {
        return Ok(Operand::Bool(true));
    }
    if text == "false" {
        return Ok(Operand::Bool(false));
    }
    if let Ok(n) = text.parse::<f64>() {
        return Ok(Operand::Number(n));
    }
    Ok(Operand::Str(text.to_string()))
}

fn parse_quoted(rest: &str) -> std::result::Result<Operand, String> {
    let mut value = String::new();
    let mut chars = rest.chars();
    loop {
        match chars.next() {
            Some('"') => {
                let trailing: String = chars.collect();
                if trailing.trim().is_empty() {
                    return Ok(Operand::Str(value));
                }
                return Err(format!("unexpected text after closing quote: '{trailing}'"));
            }
            Some('\\') => match chars.next() {
                Some('"') => value.push('"'),
                Some('\\') => value.push('\\'),
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some(other) => return Err(format!("unknown escape '\\{other}'")),
                None => return Err("unterminated string operand".to_string()),
            },
            Some(c) => value.push(c),
            None => return Err("unterminated string operand".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Binary form
// ---------------------------------------------------------------------------

const TAG_NONE: u8 = 0;
const TAG_NUMBER: u8 = 1;
const TAG_STRING: u8 = 2;
const TAG_BOOLEAN: u8 = 3;

/// Encode instructions into the binary byte stream.
///
/// Numeric operands must be integral and fit in `i32`; string operands must
/// be at most 255 UTF-8 bytes. Anything else is unrepresentable and
/// reported as a bytecode error rather than silently truncated.
pub fn to_binary(instructions: &[Instruction]) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(instructions.len() * 2);
    for (index, instr) in instructions.iter().enumerate() {
        bytes.push(instr.opcode.code());
        match &instr.operand {
            None => bytes.push(TAG_NONE),
            Some(Operand::Number(n)) => {
                if n.fract() != 0.0 || *n < i32::MIN as f64 || *n > i32::MAX as f64 {
                    return Err(Error::Bytecode(format!(
                        "numeric operand {n} at address {index} does not fit the 32-bit binary encoding"
                    )));
                }
                bytes.push(TAG_NUMBER);
                bytes.extend_from_slice(&(*n as i32).to_be_bytes());
            }
            Some(Operand::Str(s)) => {
                let utf8 = s.as_bytes();
                if utf8.len() > u8::MAX as usize {
                    return Err(Error::Bytecode(format!(
                        "string operand at address {index} exceeds 255 bytes"
                    )));
                }
                bytes.push(TAG_STRING);
                bytes.push(utf8.len() as u8);
                bytes.extend_from_slice(utf8);
            }
            Some(Operand::Bool(b)) => {
                bytes.push(TAG_BOOLEAN);
                bytes.push(u8::from(*b));
            }
        }
    }
    Ok(bytes)
}

/// Decode the binary byte stream back into instructions.
pub fn from_binary(bytes: &[u8]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let opcode = Opcode::from_code(bytes[pos]).ok_or_else(|| {
            Error::Bytecode(format!("unknown opcode byte 0x{:02x} at offset {pos}", bytes[pos]))
        })?;
        pos += 1;
        let tag = *bytes
            .get(pos)
            .ok_or_else(|| Error::Bytecode("truncated instruction: missing tag byte".to_string()))?;
        pos += 1;
        let operand = match tag {
            TAG_NONE => None,
            TAG_NUMBER => {
                let raw: [u8; 4] = bytes
                    .get(pos..pos + 4)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| {
                        Error::Bytecode("truncated numeric operand".to_string())
                    })?;
                pos += 4;
                Some(Operand::Number(i32::from_be_bytes(raw) as f64))
            }
            TAG_STRING => {
                let len = *bytes.get(pos).ok_or_else(|| {
                    Error::Bytecode("truncated string operand: missing length".to_string())
                })? as usize;
                pos += 1;
                let raw = bytes.get(pos..pos + len).ok_or_else(|| {
                    Error::Bytecode("truncated string operand".to_string())
                })?;
                pos += len;
                let s = std::str::from_utf8(raw).map_err(|_| {
                    Error::Bytecode("string operand is not valid UTF-8".to_string())
                })?;
                Some(Operand::Str(s.to_string()))
            }
            TAG_BOOLEAN => {
                let b = *bytes.get(pos).ok_or_else(|| {
                    Error::Bytecode("truncated boolean operand".to_string())
                })?;
                pos += 1;
                Some(Operand::Bool(b != 0))
            }
            other => {
                return Err(Error::Bytecode(format!("unknown operand tag {other}")));
            }
        };
        instructions.push(Instruction { opcode, operand });
    }
    Ok(instructions)
}

// ---------------------------------------------------------------------------
// JSON form (.bc)
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct JsonInstruction {
    opcode: JsonOpcode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    operand: Option<JsonOperand>,
}

/// The opcode field accepts either a mnemonic or the numeric code.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum JsonOpcode {
    Code(u8),
    Name(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum JsonOperand {
    Bool(bool),
    Number(f64),
    Str(String),
}

/// Serialize instructions as the `.bc` JSON array. Opcodes are written as
/// their canonical mnemonics.
pub fn to_json(instructions: &[Instruction]) -> Result<String> {
    let entries: Vec<JsonInstruction> = instructions
        .iter()
        .map(|instr| JsonInstruction {
            opcode: JsonOpcode::Name(instr.opcode.mnemonic().to_string()),
            operand: instr.operand.as_ref().map(|operand| match operand {
                Operand::Number(n) => JsonOperand::Number(*n),
                Operand::Str(s) => JsonOperand::Str(s.clone()),
                Operand::Bool(b) => JsonOperand::Bool(*b),
            }),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&entries)?)
}

/// Parse the `.bc` JSON array.
pub fn from_json(json: &str) -> Result<Vec<Instruction>> {
    let entries: Vec<JsonInstruction> = serde_json::from_str(json)?;
    let mut instructions = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let opcode = match &entry.opcode {
            JsonOpcode::Code(code) => Opcode::from_code(*code).ok_or_else(|| {
                Error::Bytecode(format!("unknown opcode code {code} at index {index}"))
            })?,
            JsonOpcode::Name(name) => {
                Opcode::from_mnemonic_ignore_case(name).ok_or_else(|| {
                    Error::Bytecode(format!("unknown opcode '{name}' at index {index}"))
                })?
            }
        };
        let operand = entry.operand.map(|operand| match operand {
            JsonOperand::Number(n) => Operand::Number(n),
            JsonOperand::Str(s) => Operand::Str(s),
            JsonOperand::Bool(b) => Operand::Bool(b),
        });
        instructions.push(Instruction { opcode, operand });
    }
    Ok(instructions)
}
