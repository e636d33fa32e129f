//! Disassembler: instructions → annotated listing and static statistics.
//!
//! The default rendering is a listing the assembler accepts back verbatim:
//! a decimal address prefix, the instruction text, and a `; comment`
//! explaining the opcode. Optional modes add hex opcodes or operand type
//! annotations, and label mode replaces numeric jump targets with `L1`-style
//! labels and emits matching `L1:` header lines.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use crate::builtins;
use crate::bytecode::{Instruction, Opcode, Operand};

/// Rendering switches for the disassembler.
#[derive(Debug, Clone)]
pub struct DisassemblerOptions {
    /// Prefix each line with its decimal instruction address. On by default.
    pub show_addresses: bool,
    /// Show the raw opcode byte as `[0x00]`. Off by default.
    pub show_hex_opcodes: bool,
    /// Annotate operands with their type, e.g. `(string)`. Off by default.
    pub show_operand_types: bool,
    /// Emit `L1:` headers at jump targets and use label names as jump
    /// operands. Off by default.
    pub use_labels: bool,
    /// Append the per-opcode explanation comment. On by default.
    pub show_comments: bool,
}

impl Default for DisassemblerOptions {
    fn default() -> Self {
        Self {
            show_addresses: true,
            show_hex_opcodes: false,
            show_operand_types: false,
            use_labels: false,
            show_comments: true,
        }
    }
}

/// One rendered instruction, in structured form for host tooling.
#[derive(Debug, Clone, PartialEq)]
pub struct DisasmLine {
    pub address: usize,
    /// Label defined at this address in label mode.
    pub label: Option<String>,
    pub instruction: Instruction,
    /// The rendered listing line (without the label header).
    pub text: String,
}

/// Static statistics over an instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisasmStats {
    pub total_instructions: usize,
    /// Executions per mnemonic cannot be known statically; this counts
    /// occurrences in the stream.
    pub opcode_frequency: BTreeMap<&'static str, usize>,
    pub jump_target_count: usize,
    /// Upper bound on operand stack depth from a linear scan with
    /// per-opcode deltas; not a guarantee.
    pub estimated_max_stack_depth: usize,
}

/// The disassembler. Construct with options, then render.
#[derive(Debug, Default)]
pub struct Disassembler {
    options: DisassemblerOptions,
}

impl Disassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: DisassemblerOptions) -> Self {
        Self { options }
    }

    /// Render the full listing.
    pub fn disassemble(&self, instructions: &[Instruction]) -> String {
        let mut out = String::new();
        for line in self.lines(instructions) {
            if let Some(label) = &line.label {
                let _ = writeln!(out, "{label}:");
            }
            let _ = writeln!(out, "{}", line.text);
        }
        out
    }

    /// Render to structured records.
    pub fn lines(&self, instructions: &[Instruction]) -> Vec<DisasmLine> {
        let labels = if self.options.use_labels {
            label_table(instructions)
        } else {
            BTreeMap::new()
        };

        instructions
            .iter()
            .enumerate()
            .map(|(address, instruction)| {
                let text = self.render(address, instruction, &labels);
                DisasmLine {
                    address,
                    label: labels.get(&address).cloned(),
                    instruction: instruction.clone(),
                    text,
                }
            })
            .collect()
    }

    fn render(
        &self,
        address: usize,
        instruction: &Instruction,
        labels: &BTreeMap<usize, String>,
    ) -> String {
        let mut text = String::new();
        if self.options.show_addresses {
            let _ = write!(text, "{address:04}: ");
        }
        if self.options.show_hex_opcodes {
            let _ = write!(text, "[0x{:02x}] ", instruction.opcode.code());
        }
        let _ = write!(text, "{}", instruction.opcode);

        if let Some(operand) = &instruction.operand {
            let rendered = match (instruction.opcode.is_jump(), operand.as_address()) {
                (true, Some(target)) => labels
                    .get(&target)
                    .cloned()
                    .unwrap_or_else(|| operand.to_text()),
                _ => operand.to_text(),
            };
            let _ = write!(text, " {rendered}");
            if self.options.show_operand_types {
                let _ = write!(text, " ({})", operand.type_name());
            }
        }

        if self.options.show_comments {
            let _ = write!(text, " ; {}", instruction.opcode.describe());
        }
        text
    }
}

/// Compute the per-stream statistics described in the module docs.
pub fn statistics(instructions: &[Instruction]) -> DisasmStats {
    let mut frequency: BTreeMap<&'static str, usize> = BTreeMap::new();
    for instruction in instructions {
        *frequency.entry(instruction.opcode.mnemonic()).or_insert(0) += 1;
    }

    let mut depth: i64 = 0;
    let mut max_depth: i64 = 0;
    for instruction in instructions {
        depth += stack_delta(instruction);
        if depth < 0 {
            depth = 0;
        }
        max_depth = max_depth.max(depth);
    }

    DisasmStats {
        total_instructions: instructions.len(),
        opcode_frequency: frequency,
        jump_target_count: jump_targets(instructions).len(),
        estimated_max_stack_depth: max_depth as usize,
    }
}

/// Net operand stack movement of one instruction.
fn stack_delta(instruction: &Instruction) -> i64 {
    match instruction.opcode {
        Opcode::Push | Opcode::Load | Opcode::Dup => 1,
        Opcode::Pop | Opcode::Store | Opcode::Print | Opcode::JumpIfFalse => -1,
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Mod
        | Opcode::Eq
        | Opcode::Ne
        | Opcode::Lt
        | Opcode::Gt
        | Opcode::Le
        | Opcode::Ge => -1,
        Opcode::Call => match &instruction.operand {
            Some(Operand::Str(name)) => match builtins::intrinsic_arity(name) {
                Some(arity) => 1 - arity as i64,
                None => 0,
            },
            _ => 0,
        },
        Opcode::Return | Opcode::Jump | Opcode::Halt => 0,
    }
}

/// The set of addresses any jump in the stream targets.
fn jump_targets(instructions: &[Instruction]) -> BTreeSet<usize> {
    instructions
        .iter()
        .filter(|i| i.opcode.is_jump())
        .filter_map(|i| i.operand.as_ref().and_then(Operand::as_address))
        .collect()
}

/// Assign `L1`, `L2`, … to jump targets in address order.
fn label_table(instructions: &[Instruction]) -> BTreeMap<usize, String> {
    jump_targets(instructions)
        .into_iter()
        .enumerate()
        .map(|(index, address)| (address, format!("L{}", index + 1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Assembler;
    use pretty_assertions::assert_eq;

    fn sample() -> Vec<Instruction> {
        vec![
            Instruction::with_operand(Opcode::Push, 5.0),
            Instruction::with_operand(Opcode::JumpIfFalse, 4.0),
            Instruction::with_operand(Opcode::Push, "done"),
            Instruction::new(Opcode::Print),
            Instruction::new(Opcode::Halt),
        ]
    }

    #[test]
    fn default_listing_has_addresses_and_comments() {
        let listing = Disassembler::new().disassemble(&sample());
        let first = listing.lines().next().unwrap();
        assert_eq!(first, "0000: PUSH 5 ; Push a value onto the stack");
    }

    #[test]
    fn hex_opcode_mode() {
        let disasm = Disassembler::with_options(DisassemblerOptions {
            show_hex_opcodes: true,
            show_comments: false,
            ..DisassemblerOptions::default()
        });
        let listing = disasm.disassemble(&sample());
        assert!(listing.starts_with("0000: [0x00] PUSH 5"));
    }

    #[test]
    fn operand_type_annotations() {
        let disasm = Disassembler::with_options(DisassemblerOptions {
            show_operand_types: true,
            show_comments: false,
            show_addresses: false,
            ..DisassemblerOptions::default()
        });
        let listing = disasm.disassemble(&sample());
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines[0], "PUSH 5 (number)");
        assert_eq!(lines[2], "PUSH done (string)");
    }

    #[test]
    fn label_mode_emits_headers_and_label_operands() {
        let disasm = Disassembler::with_options(DisassemblerOptions {
            use_labels: true,
            show_addresses: false,
            show_comments: false,
            ..DisassemblerOptions::default()
        });
        let listing = disasm.disassemble(&sample());
        assert!(listing.contains("JUMP_IF_FALSE L1"));
        assert!(listing.contains("L1:\nHALT"));
    }

    #[test]
    fn structured_lines_carry_labels_and_instructions() {
        let disasm = Disassembler::with_options(DisassemblerOptions {
            use_labels: true,
            ..DisassemblerOptions::default()
        });
        let lines = disasm.lines(&sample());
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[4].label.as_deref(), Some("L1"));
        assert_eq!(lines[1].instruction.opcode, Opcode::JumpIfFalse);
    }

    #[test]
    fn default_listing_reassembles_to_the_same_stream() {
        let instructions = sample();
        let listing = Disassembler::new().disassemble(&instructions);
        let reassembled = Assembler::new().assemble(&listing).unwrap();
        assert_eq!(reassembled, instructions);
    }

    #[test]
    fn label_mode_listing_reassembles_to_the_same_stream() {
        let instructions = sample();
        let disasm = Disassembler::with_options(DisassemblerOptions {
            use_labels: true,
            ..DisassemblerOptions::default()
        });
        let listing = disasm.disassemble(&instructions);
        let reassembled = Assembler::new().assemble(&listing).unwrap();
        assert_eq!(reassembled, instructions);
    }

    #[test]
    fn statistics_count_opcodes_and_targets() {
        let stats = statistics(&sample());
        assert_eq!(stats.total_instructions, 5);
        assert_eq!(stats.opcode_frequency["PUSH"], 2);
        assert_eq!(stats.opcode_frequency["HALT"], 1);
        assert_eq!(stats.jump_target_count, 1);
    }

    #[test]
    fn stack_depth_estimate_is_an_upper_bound() {
        // PUSH PUSH ADD PRINT: depth peaks at 2.
        let instructions = vec![
            Instruction::with_operand(Opcode::Push, 1.0),
            Instruction::with_operand(Opcode::Push, 2.0),
            Instruction::new(Opcode::Add),
            Instruction::new(Opcode::Print),
            Instruction::new(Opcode::Halt),
        ];
        assert_eq!(statistics(&instructions).estimated_max_stack_depth, 2);
    }

    #[test]
    fn call_delta_uses_known_intrinsic_arity() {
        // PUSH a, PUSH b, CALL pow → 2 - (1 - 2) ... net: 2 + (1-2) = 1.
        let instructions = vec![
            Instruction::with_operand(Opcode::Push, 2.0),
            Instruction::with_operand(Opcode::Push, 8.0),
            Instruction::with_operand(Opcode::Call, "pow"),
        ];
        assert_eq!(statistics(&instructions).estimated_max_stack_depth, 2);

        // Unknown callee contributes 0.
        let instructions = vec![
            Instruction::with_operand(Opcode::Push, 1.0),
            Instruction::with_operand(Opcode::Call, "mystery"),
        ];
        assert_eq!(statistics(&instructions).estimated_max_stack_depth, 1);
    }
}
