//! Stack-based bytecode virtual machine.
//!
//! Executes a loaded [`Program`] with a simple fetch-decode-execute loop.
//! All runtime state lives here: the operand stack, the call stack, global
//! variables, the program counter, and the memory accounting. The VM is a
//! plain value: callers instantiate one per program (or reuse one between
//! runs after [`Vm::reset`]); nothing is global.
//!
//! Name resolution is dynamic and name-keyed: `LOAD`/`STORE` consult the
//! current call frame's locals first and fall back to globals, matching the
//! compile-time scoping the code generator enforced. `CALL` dispatches to
//! the intrinsic table first, then to the program's function table.
//!
//! Runtime errors halt the machine, carry the function-name call stack
//! (outermost first), and clear the operand stack; the program counter and
//! call frames are left in place for diagnostics until the next `reset`.

use std::collections::HashMap;
use std::io::Write;
use std::time::Instant;

use crate::builtins::{self, IntrinsicResult};
use crate::bytecode::{Instruction, Opcode, Operand, Program};
use crate::error::{Error, Result, RuntimeError};
use crate::memory::{self, MemoryManager, MemoryStats};
use crate::operators::apply_binary;
use crate::value::{FunctionRef, Value};

/// Maximum user-function call depth before a `stack_overflow` error.
pub const MAX_CALL_DEPTH: usize = 1024;

/// Where `print` output goes.
///
/// The default sink streams lines to stdout; the capture sink buffers them
/// for the host (used by the engine facade, the REPL, and tests).
#[derive(Debug)]
pub enum Sink {
    Stdout,
    Capture(Vec<String>),
}

impl Sink {
    pub fn stdout() -> Self {
        Sink::Stdout
    }

    pub fn capture() -> Self {
        Sink::Capture(Vec::new())
    }

    /// Emit one line of program output.
    pub fn write_line(&mut self, line: &str) {
        match self {
            Sink::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = writeln!(out, "{line}");
            }
            Sink::Capture(lines) => lines.push(line.to_string()),
        }
    }

    /// Take all captured lines. Empty for the stdout sink.
    pub fn take_lines(&mut self) -> Vec<String> {
        match self {
            Sink::Stdout => Vec::new(),
            Sink::Capture(lines) => std::mem::take(lines),
        }
    }
}

/// One activation record for an in-progress user-function call.
#[derive(Debug)]
pub struct CallFrame {
    /// Instruction index to resume at after `RETURN`.
    pub return_address: usize,
    /// Parameter bindings and locals created inside the function.
    pub locals: HashMap<String, Value>,
    /// Function name, for stack traces.
    pub function_name: String,
}

/// What the dispatched instruction asks the loop to do next.
enum Control {
    Next,
    JumpTo(usize),
    Halt,
}

/// The virtual machine.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: HashMap<String, Value>,
    pc: usize,
    instructions: Vec<Instruction>,
    functions: HashMap<String, FunctionRef>,
    memory: MemoryManager,
    sink: Sink,
    /// Optional host-imposed ceiling on executed instructions per run.
    instruction_limit: Option<u64>,
    instruction_count: u64,
}

impl Vm {
    /// A VM with default memory settings, printing to stdout.
    pub fn new() -> Self {
        Self::with_memory(memory::DEFAULT_MEMORY_SIZE, memory::DEFAULT_GC_THRESHOLD)
    }

    pub fn with_memory(total: usize, gc_threshold: usize) -> Self {
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: HashMap::new(),
            pc: 0,
            instructions: Vec::new(),
            functions: HashMap::new(),
            memory: MemoryManager::new(total, gc_threshold),
            sink: Sink::stdout(),
            instruction_limit: None,
            instruction_count: 0,
        }
    }

    /// Replace the output sink, returning the previous one.
    pub fn set_sink(&mut self, sink: Sink) -> Sink {
        std::mem::replace(&mut self.sink, sink)
    }

    /// Bound the number of instructions a single `run` may execute.
    pub fn set_instruction_limit(&mut self, limit: Option<u64>) {
        self.instruction_limit = limit;
    }

    /// Take captured print output (capture sink only).
    pub fn take_output(&mut self) -> Vec<String> {
        self.sink.take_lines()
    }

    /// Load a program after checking its structural invariants. Resets the
    /// program counter; previously loaded instructions are replaced.
    pub fn load(&mut self, program: Program) -> Result<()> {
        program.validate()?;
        self.instructions = program.instructions;
        self.functions = program.functions;
        self.pc = 0;
        Ok(())
    }

    /// Load and run in one step.
    pub fn execute(&mut self, program: Program) -> Result<()> {
        self.load(program)?;
        self.run()
    }

    /// Clear all runtime state (stack, frames, globals, counters) while
    /// keeping the loaded instructions and function table.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.globals.clear();
        self.pc = 0;
        self.instruction_count = 0;
        self.memory.reset_usage();
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Function-name call stack, outermost first. The synthetic outermost
    /// entry is `main`.
    pub fn call_stack(&self) -> Vec<String> {
        std::iter::once("main".to_string())
            .chain(self.frames.iter().map(|f| f.function_name.clone()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Main execution loop
    // -----------------------------------------------------------------------

    /// Run the loaded program from the current program counter until `HALT`,
    /// the end of the instruction stream, or an error.
    ///
    /// On a runtime error the operand stack is cleared and the error is
    /// returned with the call stack attached; `pc` still points at the
    /// faulting instruction.
    pub fn run(&mut self) -> Result<()> {
        self.instruction_count = 0;
        while self.pc < self.instructions.len() {
            self.instruction_count += 1;
            if let Some(limit) = self.instruction_limit
                && self.instruction_count > limit
            {
                return Err(Error::InstructionLimitExceeded(limit));
            }

            let instruction = self.instructions[self.pc].clone();
            match self.step(&instruction) {
                Ok(Control::Next) => self.pc += 1,
                Ok(Control::JumpTo(address)) => self.pc = address,
                Ok(Control::Halt) => break,
                Err(err) => {
                    let err = err.with_call_stack(self.call_stack());
                    self.stack.clear();
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    fn step(&mut self, instruction: &Instruction) -> std::result::Result<Control, RuntimeError> {
        match instruction.opcode {
            Opcode::Push => {
                let value = operand_value(instruction)?;
                self.push(value);
            }
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => {
                let top = self
                    .stack
                    .last()
                    .cloned()
                    .ok_or_else(|| RuntimeError::type_mismatch("operand stack underflow"))?;
                self.push(top);
            }

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
            | Opcode::Ge => {
                let right = self.pop()?;
                let left = self.pop()?;
                let result = apply_binary(instruction.opcode, &left, &right)?;
                self.push(result);
            }

            Opcode::Jump => {
                return Ok(Control::JumpTo(jump_target(instruction)?));
            }
            Opcode::JumpIfFalse => {
                let condition = self.pop()?;
                if !condition.is_truthy() {
                    return Ok(Control::JumpTo(jump_target(instruction)?));
                }
            }

            Opcode::Load => {
                let name = name_operand(instruction)?;
                let value = self.lookup(name)?;
                self.push(value);
            }
            Opcode::Store => {
                let name = name_operand(instruction)?.to_string();
                let value = self.pop()?;
                self.store(name, value);
            }

            Opcode::Call => {
                let name = name_operand(instruction)?.to_string();
                return self.call(&name);
            }
            Opcode::Return => {
                let value = self.pop()?;
                let frame = self.frames.pop().ok_or_else(|| {
                    RuntimeError::type_mismatch("RETURN outside of a function call")
                })?;
                self.push(value);
                return Ok(Control::JumpTo(frame.return_address));
            }

            Opcode::Print => {
                let value = self.pop()?;
                self.sink.write_line(&value.to_display_string());
            }
            Opcode::Halt => return Ok(Control::Halt),
        }
        Ok(Control::Next)
    }

    // -----------------------------------------------------------------------
    // Stack, variables, calls
    // -----------------------------------------------------------------------

    fn push(&mut self, value: Value) {
        self.memory.charge(&value);
        self.stack.push(value);
        if self.memory.should_collect() {
            self.run_gc();
        }
    }

    fn pop(&mut self) -> std::result::Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::type_mismatch("operand stack underflow"))
    }

    fn lookup(&self, name: &str) -> std::result::Result<Value, RuntimeError> {
        if let Some(frame) = self.frames.last()
            && let Some(value) = frame.locals.get(name)
        {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(func) = self.functions.get(name) {
            return Ok(Value::Function(func.clone()));
        }
        Err(RuntimeError::undefined_variable(name))
    }

    /// Store precedence: with no frame active, globals. With a frame, an
    /// existing local wins, then an existing global, and otherwise the name
    /// becomes a new local of the current frame.
    fn store(&mut self, name: String, value: Value) {
        match self.frames.last_mut() {
            None => {
                self.globals.insert(name, value);
            }
            Some(frame) => {
                if frame.locals.contains_key(&name) {
                    frame.locals.insert(name, value);
                } else if self.globals.contains_key(&name) {
                    self.globals.insert(name, value);
                } else {
                    frame.locals.insert(name, value);
                }
            }
        }
    }

    fn call(&mut self, name: &str) -> std::result::Result<Control, RuntimeError> {
        // Intrinsics shadow user functions and are dispatched first.
        if let Some(arity) = builtins::intrinsic_arity(name) {
            let args = self.pop_arguments(arity)?;
            return match builtins::call_intrinsic(name, args, &mut self.sink) {
                IntrinsicResult::Handled(result) => {
                    if let Some(value) = result? {
                        self.push(value);
                    }
                    Ok(Control::Next)
                }
                // The arity table and the dispatch table cover the same
                // names, so this arm is unreachable in practice.
                IntrinsicResult::NotIntrinsic => {
                    Err(RuntimeError::undefined_variable(name))
                }
            };
        }

        let func = match self.functions.get(name) {
            Some(func) => func.clone(),
            None => match self.lookup(name)? {
                Value::Function(func) => func,
                other => {
                    return Err(RuntimeError::type_mismatch(format!(
                        "'{name}' is not callable (it is a {})",
                        other.type_name()
                    )));
                }
            },
        };

        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(RuntimeError::stack_overflow(format!(
                "maximum call depth of {MAX_CALL_DEPTH} exceeded"
            )));
        }

        let args = self.pop_arguments(func.arity())?;
        let locals: HashMap<String, Value> =
            func.params.iter().cloned().zip(args).collect();
        self.frames.push(CallFrame {
            return_address: self.pc + 1,
            locals,
            function_name: func.name.clone(),
        });
        Ok(Control::JumpTo(func.address))
    }

    /// Pop `arity` arguments, restoring left-to-right order.
    fn pop_arguments(&mut self, arity: usize) -> std::result::Result<Vec<Value>, RuntimeError> {
        let mut args = Vec::with_capacity(arity);
        for _ in 0..arity {
            args.push(self.pop()?);
        }
        args.reverse();
        Ok(args)
    }

    /// The GC hook: recompute usage from every value reachable from the
    /// operand stack, call frames, globals, and the function table. Values
    /// referenced from any root are never reclaimed; they are exactly what
    /// the new usage figure counts.
    fn run_gc(&mut self) {
        let started = Instant::now();
        let mut live = 0usize;
        for value in &self.stack {
            live += memory::value_size(value);
        }
        for (name, value) in &self.globals {
            live += name.len() + memory::value_size(value);
        }
        for frame in &self.frames {
            for (name, value) in &frame.locals {
                live += name.len() + memory::value_size(value);
            }
        }
        for func in self.functions.values() {
            live += memory::value_size(&Value::Function(func.clone()));
        }
        self.memory.collect(live, started.elapsed());
        tracing::debug!(live_bytes = live, "gc run");
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn operand_value(instruction: &Instruction) -> std::result::Result<Value, RuntimeError> {
    match &instruction.operand {
        Some(Operand::Number(n)) => Ok(Value::Number(*n)),
        Some(Operand::Str(s)) => Ok(Value::Str(s.clone())),
        Some(Operand::Bool(b)) => Ok(Value::Bool(*b)),
        None => Err(RuntimeError::type_mismatch("PUSH without an operand")),
    }
}

fn jump_target(instruction: &Instruction) -> std::result::Result<usize, RuntimeError> {
    instruction
        .operand
        .as_ref()
        .and_then(Operand::as_address)
        .ok_or_else(|| {
            RuntimeError::type_mismatch(format!(
                "{} without a valid target address",
                instruction.opcode
            ))
        })
}

fn name_operand(instruction: &Instruction) -> std::result::Result<&str, RuntimeError> {
    match &instruction.operand {
        Some(Operand::Str(name)) => Ok(name),
        _ => Err(RuntimeError::type_mismatch(format!(
            "{} without a name operand",
            instruction.opcode
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen;
    use crate::error::RuntimeErrorKind;
    use crate::lexer::tokenize;
    use crate::parser;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> Program {
        let (ast, errors) = parser::parse(tokenize(source).unwrap());
        assert!(errors.is_empty(), "parse errors: {errors:?}");
        codegen::generate(&ast).unwrap()
    }

    fn run_source(source: &str) -> Vec<String> {
        let mut vm = Vm::new();
        vm.set_sink(Sink::capture());
        vm.execute(compile(source)).unwrap();
        vm.take_output()
    }

    fn run_source_err(source: &str) -> RuntimeError {
        let mut vm = Vm::new();
        vm.set_sink(Sink::capture());
        match vm.execute(compile(source)) {
            Err(Error::Runtime(err)) => err,
            other => panic!("expected a runtime error, got {other:?}"),
        }
    }

    #[test]
    fn arithmetic_and_print() {
        assert_eq!(run_source("let result = 5 + 3; print(result);"), vec!["8"]);
    }

    #[test]
    fn string_concatenation_via_add() {
        assert_eq!(
            run_source("print(\"foo\" + \"bar\");"),
            vec!["foobar"]
        );
    }

    #[test]
    fn function_call_and_return() {
        assert_eq!(
            run_source("function add(a, b) { return a + b; } print(add(10, 20));"),
            vec!["30"]
        );
    }

    #[test]
    fn if_else_takes_the_right_branch() {
        assert_eq!(
            run_source(
                "let x = 5; if (x > 0) { print(\"positive\"); } else { print(\"negative\"); }"
            ),
            vec!["positive"]
        );
    }

    #[test]
    fn while_loop_accumulates() {
        assert_eq!(
            run_source("let sum = 0; let i = 1; while (i <= 3) { sum = sum + i; i = i + 1; } print(sum);"),
            vec!["6"]
        );
    }

    #[test]
    fn for_loop_runs_update_each_iteration() {
        assert_eq!(
            run_source("for (let i = 0; i < 3; i = i + 1) { print(i); }"),
            vec!["0", "1", "2"]
        );
    }

    #[test]
    fn recursion() {
        assert_eq!(
            run_source(
                "function fib(n) { if (n <= 1) { return n; } return fib(n - 1) + fib(n - 2); } \
                 print(fib(10));"
            ),
            vec!["55"]
        );
    }

    #[test]
    fn logical_operators_short_circuit_to_operand_values() {
        assert_eq!(
            run_source("let a = 0; print(a && 5); print(a || 7); print(2 && 3);"),
            vec!["0", "7", "3"]
        );
    }

    #[test]
    fn locals_are_per_frame() {
        assert_eq!(
            run_source(
                "let x = 1;\
                 function f(x) { return x * 10; }\
                 print(f(5)); print(x);"
            ),
            vec!["50", "1"]
        );
    }

    #[test]
    fn functions_can_write_globals() {
        assert_eq!(
            run_source(
                "let counter = 0;\
                 function bump() { counter = counter + 1; return counter; }\
                 bump(); bump(); print(counter);"
            ),
            vec!["2"]
        );
    }

    #[test]
    fn functions_are_first_class_values() {
        assert_eq!(
            run_source("function greet(name) { return name; } print(greet);"),
            vec!["function greet(name)"]
        );
    }

    #[test]
    fn division_by_zero_halts_with_kind() {
        let err = run_source_err("let a = 10; let b = 0; print(a / b);");
        assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
        assert_eq!(err.call_stack, vec!["main"]);
    }

    #[test]
    fn type_mismatch_on_mixed_add() {
        let err = run_source_err("let x = \"hello\"; let y = x + 5; print(y);");
        assert_eq!(err.kind, RuntimeErrorKind::TypeMismatch);
    }

    #[test]
    fn infinite_recursion_overflows() {
        let err = run_source_err("function f() { return f(); } f();");
        assert_eq!(err.kind, RuntimeErrorKind::StackOverflow);
        assert!(err.call_stack.len() > MAX_CALL_DEPTH);
        assert_eq!(err.call_stack[0], "main");
        assert_eq!(err.call_stack[1], "f");
    }

    #[test]
    fn error_clears_stack_but_preserves_pc_and_frames() {
        let mut vm = Vm::new();
        vm.set_sink(Sink::capture());
        let program = compile("function f() { return 1 / 0; } print(f());");
        let err = vm.execute(program).unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
        assert_eq!(vm.call_depth(), 1);
        assert!(vm.pc() > 0);

        vm.reset();
        assert_eq!(vm.call_depth(), 0);
        assert_eq!(vm.pc(), 0);
    }

    #[test]
    fn reset_keeps_instructions_loaded() {
        let mut vm = Vm::new();
        vm.set_sink(Sink::capture());
        vm.execute(compile("print(1);")).unwrap();
        assert_eq!(vm.take_output(), vec!["1"]);

        vm.reset();
        vm.run().unwrap();
        assert_eq!(vm.take_output(), vec!["1"]);
    }

    #[test]
    fn undefined_variable_error_from_hand_written_bytecode() {
        let mut vm = Vm::new();
        vm.set_sink(Sink::capture());
        let program = Program::from_instructions(vec![
            Instruction::with_operand(Opcode::Load, "ghost"),
            Instruction::new(Opcode::Halt),
        ]);
        let err = vm.execute(program).unwrap_err();
        let Error::Runtime(err) = err else {
            panic!("expected runtime error");
        };
        assert_eq!(err.kind, RuntimeErrorKind::UndefinedVariable);
    }

    #[test]
    fn call_print_is_an_intrinsic_alias() {
        // Hand-written assembly may use CALL print instead of PRINT.
        let mut vm = Vm::new();
        vm.set_sink(Sink::capture());
        let program = Program::from_instructions(vec![
            Instruction::with_operand(Opcode::Push, 8.0),
            Instruction::with_operand(Opcode::Call, "print"),
            Instruction::new(Opcode::Halt),
        ]);
        vm.execute(program).unwrap();
        assert_eq!(vm.take_output(), vec!["8"]);
    }

    #[test]
    fn pop_on_empty_stack_is_a_runtime_error() {
        let mut vm = Vm::new();
        let program = Program::from_instructions(vec![Instruction::new(Opcode::Pop)]);
        assert!(vm.execute(program).is_err());
    }

    #[test]
    fn instruction_limit_is_enforced() {
        let mut vm = Vm::new();
        vm.set_sink(Sink::capture());
        vm.set_instruction_limit(Some(100));
        let err = vm
            .execute(compile("while (true) { let x = 1; }"))
            .unwrap_err();
        assert!(matches!(err, Error::InstructionLimitExceeded(100)));
    }

    #[test]
    fn memory_counters_stay_consistent_across_runs() {
        let mut vm = Vm::with_memory(64 * 1024, 512);
        vm.set_sink(Sink::capture());
        vm.execute(compile(
            "let s = \"\"; let i = 0; while (i < 200) { s = s + \"xy\"; i = i + 1; } print(length(s));",
        ))
        .unwrap();
        assert_eq!(vm.take_output(), vec!["400"]);

        let stats = vm.memory_stats();
        assert!(stats.gc_runs > 0, "threshold of 512 bytes should trigger gc");
        assert!(stats.used_memory + stats.free_memory <= stats.total_memory);

        vm.reset();
        let after = vm.memory_stats();
        assert_eq!(after.used_memory, 0);
        assert!(after.gc_runs >= stats.gc_runs);
    }

    #[test]
    fn halt_stops_before_later_instructions() {
        let mut vm = Vm::new();
        vm.set_sink(Sink::capture());
        let program = Program::from_instructions(vec![
            Instruction::with_operand(Opcode::Push, 1.0),
            Instruction::new(Opcode::Print),
            Instruction::new(Opcode::Halt),
            Instruction::with_operand(Opcode::Push, 2.0),
            Instruction::new(Opcode::Print),
        ]);
        vm.execute(program).unwrap();
        assert_eq!(vm.take_output(), vec!["1"]);
    }
}
