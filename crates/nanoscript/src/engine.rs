//! High-level facade wiring the whole pipeline together.
//!
//! [`Engine`] is the one-stop entry point most hosts want: it owns a VM and
//! runs source text through lexer → parser → optimizer → code generator →
//! VM in a single call. The CLI, the REPL, and the integration tests all
//! sit on top of it.
//!
//! # Example
//!
//! ```
//! use nanoscript::Engine;
//!
//! let mut engine = Engine::new();
//! let output = engine.capture("let x = 5 + 3; print(x);").unwrap();
//! assert_eq!(output.printed, vec!["8"]);
//! ```

use crate::bytecode::Program;
use crate::codegen;
use crate::error::{CompileError, Error, Result};
use crate::lexer;
use crate::memory::{self, MemoryStats};
use crate::optimizer;
use crate::parser;
use crate::vm::{Sink, Vm};

/// Pipeline and VM configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Run the AST optimizer between parsing and code generation.
    pub optimize: bool,
    /// Total VM heap budget in bytes.
    pub memory_size: usize,
    /// Soft GC threshold in bytes.
    pub gc_threshold: usize,
    /// Optional ceiling on executed instructions per run.
    pub max_instructions: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            memory_size: memory::DEFAULT_MEMORY_SIZE,
            gc_threshold: memory::DEFAULT_GC_THRESHOLD,
            max_instructions: None,
        }
    }
}

/// Result of a captured run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Lines produced by `print`, in execution order.
    pub printed: Vec<String>,
}

/// The end-to-end toolchain facade.
pub struct Engine {
    options: EngineOptions,
    vm: Vm,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let mut vm = Vm::with_memory(options.memory_size, options.gc_threshold);
        vm.set_instruction_limit(options.max_instructions);
        Self { options, vm }
    }

    /// Parse `source` and report every diagnostic the parser recovered.
    /// An empty vector means the source is syntactically clean.
    pub fn diagnostics(&self, source: &str) -> Vec<CompileError> {
        match lexer::tokenize(source) {
            Ok(tokens) => parser::parse(tokens).1,
            Err(err) => vec![err],
        }
    }

    /// Compile `source` to bytecode without executing it.
    ///
    /// Parse recovery still collects as many errors as possible, but a
    /// single structured failure (the first) is what the stage returns, and
    /// code generation is skipped entirely when any error was recorded.
    pub fn compile(&self, source: &str) -> Result<Program> {
        let tokens = lexer::tokenize(source)?;
        let (ast, errors) = parser::parse(tokens);
        if let Some(first) = errors.first() {
            for err in &errors[1..] {
                tracing::debug!(error = %err, "additional parse error");
            }
            return Err(first.clone().into());
        }
        let ast = if self.options.optimize {
            optimizer::optimize(ast).0
        } else {
            ast
        };
        Ok(codegen::generate(&ast)?)
    }

    /// Serialize the AST of `source` as pretty-printed JSON (the
    /// `.ast.json` format). The unoptimized tree is dumped, so the output
    /// mirrors the source.
    pub fn ast_json(&self, source: &str) -> Result<String> {
        let tokens = lexer::tokenize(source)?;
        let (ast, errors) = parser::parse(tokens);
        if let Some(first) = errors.first() {
            return Err(first.clone().into());
        }
        Ok(serde_json::to_string_pretty(&ast)?)
    }

    /// Compile and run `source`, streaming `print` output to stdout.
    /// The VM starts from a clean state on every call.
    pub fn run(&mut self, source: &str) -> Result<()> {
        let program = self.compile(source)?;
        self.vm.reset();
        self.vm.set_sink(Sink::stdout());
        self.vm.execute(program)
    }

    /// Compile and run `source`, capturing `print` output.
    pub fn capture(&mut self, source: &str) -> Result<Output> {
        let program = self.compile(source)?;
        self.vm.reset();
        self.vm.set_sink(Sink::capture());
        let result = self.vm.execute(program);
        let printed = self.vm.take_output();
        match result {
            Ok(()) => Ok(Output { printed }),
            Err(err) => Err(err),
        }
    }

    /// Run an already compiled program, capturing `print` output.
    pub fn capture_program(&mut self, program: Program) -> Result<Output> {
        self.vm.reset();
        self.vm.set_sink(Sink::capture());
        let result = self.vm.execute(program);
        let printed = self.vm.take_output();
        result.map(|()| Output { printed })
    }

    /// Memory counters of the underlying VM.
    pub fn memory_stats(&self) -> MemoryStats {
        self.vm.memory_stats()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
