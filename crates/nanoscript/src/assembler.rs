//! Two-pass assembler: textual assembly with labels → instructions.
//!
//! Line grammar: `[label:] [OPCODE [operand]] [; comment]`. The first pass
//! records label addresses and parses instructions, leaving jump operands
//! that name a label as unresolved references; the second pass rewrites
//! them to numeric addresses. Forward references are therefore fine, while
//! undefined or duplicate labels are hard errors.
//!
//! Numeric operands accept `0x` hex, `0b` binary, `0o` octal, and plain
//! decimal (including floats). Quoted string operands preserve spaces.
//! Disassembler listings feed straight back in: a leading `NNNN:` address
//! prefix is recognized and skipped, so `disassemble → assemble` round-trips.

use std::collections::HashMap;

use crate::bytecode::{Instruction, Opcode, Operand};
use crate::error::{Error, Result};
use crate::serialize;

/// Assembler behavior switches.
#[derive(Debug, Clone)]
pub struct AssemblerOptions {
    /// Strip `; comment` tails. On by default.
    pub allow_comments: bool,
    /// Require mnemonics in their canonical uppercase form. Off by default.
    pub case_sensitive: bool,
    /// Reject operands on opcodes that do not take one. On by default;
    /// when off, extraneous operands are ignored.
    pub strict_mode: bool,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            allow_comments: true,
            case_sensitive: false,
            strict_mode: true,
        }
    }
}

/// The assembler. Construct with options, then call [`Assembler::assemble`].
#[derive(Debug, Default)]
pub struct Assembler {
    options: AssemblerOptions,
}

/// A parsed line awaiting label resolution.
struct PendingInstruction {
    opcode: Opcode,
    /// Either a final operand or a label reference to resolve.
    operand: PendingOperand,
    line: usize,
}

enum PendingOperand {
    None,
    Ready(Operand),
    LabelRef(String),
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: AssemblerOptions) -> Self {
        Self { options }
    }

    /// Assemble source text into an instruction stream.
    pub fn assemble(&self, source: &str) -> Result<Vec<Instruction>> {
        let (labels, pending) = self.first_pass(source)?;
        self.second_pass(labels, pending)
    }

    /// Pass 1: collect label addresses, parse instructions, defer label
    /// operands.
    fn first_pass(
        &self,
        source: &str,
    ) -> Result<(HashMap<String, usize>, Vec<PendingInstruction>)> {
        let mut labels: HashMap<String, usize> = HashMap::new();
        let mut pending: Vec<PendingInstruction> = Vec::new();

        for (index, raw) in source.lines().enumerate() {
            let line_no = index + 1;
            let mut line = if self.options.allow_comments {
                strip_comment(raw)
            } else {
                raw.trim().to_string()
            };

            // A disassembler listing prefixes each line with its decimal
            // address; recognize and drop it (a label can never be all
            // digits).
            if let Some((prefix, rest)) = line.split_once(':')
                && !prefix.trim().is_empty()
                && prefix.trim().chars().all(|c| c.is_ascii_digit())
            {
                line = rest.trim().to_string();
            }

            // Leading `label:` definitions (possibly sharing the line with
            // an instruction).
            while let Some((head, rest)) = line.split_once(':') {
                let label = head.trim();
                if !is_label(label) {
                    break;
                }
                if Opcode::from_mnemonic_ignore_case(label).is_some() {
                    return Err(Error::assembly(
                        line_no,
                        format!("label '{label}' shadows an opcode mnemonic"),
                    ));
                }
                if labels.insert(label.to_string(), pending.len()).is_some() {
                    return Err(Error::assembly(
                        line_no,
                        format!("duplicate label '{label}'"),
                    ));
                }
                line = rest.trim().to_string();
            }

            if line.is_empty() {
                continue;
            }

            pending.push(self.parse_instruction(&line, line_no)?);
        }

        Ok((labels, pending))
    }

    /// Pass 2: resolve label references into absolute addresses.
    fn second_pass(
        &self,
        labels: HashMap<String, usize>,
        pending: Vec<PendingInstruction>,
    ) -> Result<Vec<Instruction>> {
        let mut instructions = Vec::with_capacity(pending.len());
        for item in pending {
            let operand = match item.operand {
                PendingOperand::None => None,
                PendingOperand::Ready(operand) => Some(operand),
                PendingOperand::LabelRef(label) => {
                    let address = labels.get(&label).ok_or_else(|| {
                        Error::assembly(item.line, format!("undefined label '{label}'"))
                    })?;
                    Some(Operand::Number(*address as f64))
                }
            };
            instructions.push(Instruction {
                opcode: item.opcode,
                operand,
            });
        }
        tracing::debug!(
            instructions = instructions.len(),
            labels = labels.len(),
            "assembly finished"
        );
        Ok(instructions)
    }

    fn parse_instruction(&self, line: &str, line_no: usize) -> Result<PendingInstruction> {
        let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, rest.trim()),
            None => (line, ""),
        };

        let opcode = if self.options.case_sensitive {
            Opcode::from_mnemonic(mnemonic)
        } else {
            Opcode::from_mnemonic_ignore_case(mnemonic)
        }
        .ok_or_else(|| Error::assembly(line_no, format!("unknown opcode '{mnemonic}'")))?;

        if rest.is_empty() {
            if opcode.requires_operand() {
                return Err(Error::assembly(
                    line_no,
                    format!("{opcode} requires an operand"),
                ));
            }
            return Ok(PendingInstruction {
                opcode,
                operand: PendingOperand::None,
                line: line_no,
            });
        }

        if !opcode.requires_operand() {
            if self.options.strict_mode {
                return Err(Error::assembly(
                    line_no,
                    format!("{opcode} does not take an operand"),
                ));
            }
            // Lenient mode: ignore the extra operand.
            return Ok(PendingInstruction {
                opcode,
                operand: PendingOperand::None,
                line: line_no,
            });
        }

        let operand = self.parse_operand(opcode, rest, line_no)?;
        Ok(PendingInstruction {
            opcode,
            operand,
            line: line_no,
        })
    }

    fn parse_operand(&self, opcode: Opcode, text: &str, line_no: usize) -> Result<PendingOperand> {
        // Jump operands that are identifiers are label references.
        if opcode.is_jump() && is_label(text) {
            return Ok(PendingOperand::LabelRef(text.to_string()));
        }
        if let Some(number) = parse_number(text) {
            return Ok(PendingOperand::Ready(Operand::Number(number)));
        }
        let operand = serialize::parse_operand(text)
            .map_err(|message| Error::assembly(line_no, message))?;
        Ok(PendingOperand::Ready(operand))
    }
}

/// Remove a `; comment` tail, respecting quoted string operands.
fn strip_comment(line: &str) -> String {
    let mut in_string = false;
    let mut escaped = false;
    for (index, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ';' if !in_string => return line[..index].trim().to_string(),
            _ => {}
        }
    }
    line.trim().to_string()
}

/// Identifier-shaped text: `[A-Za-z_][A-Za-z0-9_]*`.
fn is_label(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse decimal, hex (`0x`), binary (`0b`), or octal (`0o`) numbers, with
/// an optional leading sign.
fn parse_number(text: &str) -> Option<f64> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()? as f64
    } else if let Some(bin) = body.strip_prefix("0b").or_else(|| body.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()? as f64
    } else if let Some(oct) = body.strip_prefix("0o").or_else(|| body.strip_prefix("0O")) {
        i64::from_str_radix(oct, 8).ok()? as f64
    } else {
        body.parse::<f64>().ok()?
    };
    Some(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assemble(source: &str) -> Vec<Instruction> {
        Assembler::new().assemble(source).unwrap()
    }

    fn assemble_err(source: &str) -> String {
        Assembler::new().assemble(source).unwrap_err().to_string()
    }

    #[test]
    fn assembles_simple_program() {
        let program = assemble("PUSH 5\nPUSH 3\nADD\nPRINT\nHALT");
        assert_eq!(program.len(), 5);
        assert_eq!(program[0], Instruction::with_operand(Opcode::Push, 5.0));
        assert_eq!(program[2], Instruction::new(Opcode::Add));
    }

    #[test]
    fn resolves_forward_and_backward_labels() {
        let program = assemble(
            "start:\n\
             PUSH 1\n\
             JUMP_IF_FALSE end\n\
             PUSH 2\n\
             JUMP start\n\
             end:\n\
             HALT",
        );
        assert_eq!(
            program[1],
            Instruction::with_operand(Opcode::JumpIfFalse, 4.0)
        );
        assert_eq!(program[3], Instruction::with_operand(Opcode::Jump, 0.0));
    }

    #[test]
    fn label_may_share_a_line_with_an_instruction() {
        let program = assemble("loop: PUSH 1\nJUMP loop");
        assert_eq!(program[1], Instruction::with_operand(Opcode::Jump, 0.0));
    }

    #[test]
    fn comments_are_stripped() {
        let program = assemble("; whole-line comment\nPUSH 5 ; trailing\nHALT");
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn semicolons_inside_string_operands_survive() {
        let program = assemble("PUSH \"a;b\" ; real comment\nHALT");
        assert_eq!(
            program[0],
            Instruction::with_operand(Opcode::Push, "a;b")
        );
    }

    #[test]
    fn numeric_literal_radixes() {
        let program = assemble("PUSH 0x10\nPUSH 0b101\nPUSH 0o17\nPUSH -2\nPUSH 1.5");
        let numbers: Vec<f64> = program
            .iter()
            .map(|i| match i.operand {
                Some(Operand::Number(n)) => n,
                _ => panic!("expected number"),
            })
            .collect();
        assert_eq!(numbers, vec![16.0, 5.0, 15.0, -2.0, 1.5]);
    }

    #[test]
    fn mnemonics_are_case_insensitive_by_default() {
        let program = assemble("push 1\nhalt");
        assert_eq!(program[0].opcode, Opcode::Push);
    }

    #[test]
    fn case_sensitive_mode_requires_canonical_mnemonics() {
        let assembler = Assembler::with_options(AssemblerOptions {
            case_sensitive: true,
            ..AssemblerOptions::default()
        });
        assert!(assembler.assemble("push 1").is_err());
        assert!(assembler.assemble("PUSH 1").is_ok());
    }

    #[test]
    fn duplicate_label_is_an_error() {
        let message = assemble_err("x:\nPUSH 1\nx:\nHALT");
        assert!(message.contains("duplicate label 'x'"));
        assert!(message.contains("line 3"));
    }

    #[test]
    fn undefined_label_is_an_error() {
        let message = assemble_err("JUMP nowhere");
        assert!(message.contains("undefined label 'nowhere'"));
    }

    #[test]
    fn label_shadowing_an_opcode_is_an_error() {
        let message = assemble_err("halt:\nHALT");
        assert!(message.contains("shadows an opcode"));
    }

    #[test]
    fn strict_mode_rejects_extraneous_operands() {
        assert!(assemble_err("HALT 1").contains("does not take an operand"));
        let lenient = Assembler::with_options(AssemblerOptions {
            strict_mode: false,
            ..AssemblerOptions::default()
        });
        let program = lenient.assemble("HALT 1").unwrap();
        assert_eq!(program[0], Instruction::new(Opcode::Halt));
    }

    #[test]
    fn missing_required_operand_is_always_an_error() {
        assert!(assemble_err("PUSH").contains("requires an operand"));
    }

    #[test]
    fn quoted_operands_preserve_spaces() {
        let program = assemble("PUSH \"hello world\"\nSTORE msg");
        assert_eq!(
            program[0],
            Instruction::with_operand(Opcode::Push, "hello world")
        );
        assert_eq!(program[1], Instruction::with_operand(Opcode::Store, "msg"));
    }

    #[test]
    fn address_prefixed_listing_lines_assemble() {
        let program = assemble("0000: PUSH 5\n0001: PRINT\n0002: HALT");
        assert_eq!(program.len(), 3);
        assert_eq!(program[0], Instruction::with_operand(Opcode::Push, 5.0));
    }
}
