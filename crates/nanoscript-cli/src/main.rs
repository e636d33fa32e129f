//! NanoScript command-line front-end.
//!
//! Thin shell over the `nanoscript` library: it parses flags, reads and
//! writes files, and picks a pipeline mode. All language behavior lives in
//! the library.
//!
//! Modes: run (default), compile (`-c`), disassemble (`-d`), assemble
//! (`-a`), plus `--debug` and `--benchmark` decorations on run. With no
//! input file, an interactive REPL starts. Exit code is 0 on success and 1
//! on any failure.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use clap::Parser as ClapParser;
use nanoscript::disassembler::{self, Disassembler};
use nanoscript::{Assembler, Engine, EngineOptions, Program, Sink, Vm, serialize};
use tracing_subscriber::EnvFilter;

mod repl;

#[derive(ClapParser)]
#[command(name = "nsc")]
#[command(version = env!("CARGO_PKG_VERSION"), disable_version_flag = true)]
#[command(about = "NanoScript toolchain: run, compile, assemble, and disassemble", long_about = None)]
struct Cli {
    /// Input file: .ns source, .bc bytecode, or .asm assembly.
    /// Starts the REPL when omitted.
    input: Option<PathBuf>,

    /// Print version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Compile to .bc bytecode instead of running
    #[arg(short = 'c', long = "compile")]
    compile: bool,

    /// Disassemble a .bc file to an annotated listing
    #[arg(short = 'd', long = "disassemble")]
    disassemble: bool,

    /// Assemble a .asm file to .bc bytecode
    #[arg(short = 'a', long = "assemble")]
    assemble: bool,

    /// After running, print the disassembly, statistics, and memory report
    #[arg(long)]
    debug: bool,

    /// Time the compile and execute phases
    #[arg(long)]
    benchmark: bool,

    /// Output file (defaults depend on the mode)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Enable debug-level logging for the toolchain
    #[arg(long)]
    verbose: bool,

    /// Skip the AST optimizer
    #[arg(long = "no-optimize")]
    no_optimize: bool,

    /// Also write the compiled bytecode next to the input when running
    #[arg(long = "output-bytecode")]
    output_bytecode: bool,

    /// Also write the AST as JSON next to the input when running
    #[arg(long = "output-ast")]
    output_ast: bool,

    /// VM heap budget in bytes
    #[arg(long = "memory-size", value_name = "BYTES")]
    memory_size: Option<usize>,

    /// Soft GC threshold in bytes
    #[arg(long = "gc-threshold", value_name = "N")]
    gc_threshold: Option<usize>,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("nanoscript=debug,nsc=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = dispatch(&cli) {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn engine_options(cli: &Cli) -> EngineOptions {
    let defaults = EngineOptions::default();
    EngineOptions {
        optimize: !cli.no_optimize,
        memory_size: cli.memory_size.unwrap_or(defaults.memory_size),
        gc_threshold: cli.gc_threshold.unwrap_or(defaults.gc_threshold),
        max_instructions: None,
    }
}

fn dispatch(cli: &Cli) -> nanoscript::Result<()> {
    let Some(input) = &cli.input else {
        return repl::run(engine_options(cli));
    };

    if cli.assemble {
        return assemble_file(input, cli.output.as_deref());
    }
    if cli.disassemble {
        return disassemble_file(input, cli.output.as_deref());
    }
    if cli.compile {
        return compile_file(cli, input);
    }
    run_file(cli, input)
}

/// Default output path: the input with a different extension.
fn derived_output(input: &Path, extension: &str) -> PathBuf {
    input.with_extension(extension)
}

fn assemble_file(input: &Path, output: Option<&Path>) -> nanoscript::Result<()> {
    let source = fs::read_to_string(input)?;
    let instructions = Assembler::new().assemble(&source)?;
    let json = serialize::to_json(&instructions)?;
    let target = output.map_or_else(|| derived_output(input, "bc"), Path::to_path_buf);
    fs::write(&target, json)?;
    tracing::debug!(target = %target.display(), count = instructions.len(), "assembled");
    Ok(())
}

fn disassemble_file(input: &Path, output: Option<&Path>) -> nanoscript::Result<()> {
    let instructions = load_bytecode(input)?;
    let listing = Disassembler::new().disassemble(&instructions);
    let stats = disassembler::statistics(&instructions);
    let rendered = format!("{listing}\n{}", render_stats(&stats));
    match output {
        Some(target) => fs::write(target, rendered)?,
        None => print!("{rendered}"),
    }
    Ok(())
}

fn compile_file(cli: &Cli, input: &Path) -> nanoscript::Result<()> {
    let source = fs::read_to_string(input)?;
    let engine = Engine::with_options(engine_options(cli));
    let started = Instant::now();
    let program = engine.compile(&source)?;
    tracing::debug!(elapsed = ?started.elapsed(), "compiled");

    let target = cli
        .output
        .clone()
        .unwrap_or_else(|| derived_output(input, "bc"));
    fs::write(&target, serialize::to_json(&program.instructions)?)?;
    if cli.output_ast {
        fs::write(
            derived_output(input, "ast.json"),
            engine.ast_json(&source)?,
        )?;
    }
    Ok(())
}

fn run_file(cli: &Cli, input: &Path) -> nanoscript::Result<()> {
    // Precompiled or assembled inputs run directly on a VM; everything
    // else goes through the full source pipeline.
    match input.extension().and_then(|e| e.to_str()) {
        Some("bc") | Some("asm") => {
            let instructions = load_bytecode(input)?;
            let program = Program::from_instructions(instructions);
            if cli.debug {
                print!("{}", Disassembler::new().disassemble(&program.instructions));
            }
            let mut vm = match (cli.memory_size, cli.gc_threshold) {
                (None, None) => Vm::new(),
                (total, threshold) => {
                    let defaults = EngineOptions::default();
                    Vm::with_memory(
                        total.unwrap_or(defaults.memory_size),
                        threshold.unwrap_or(defaults.gc_threshold),
                    )
                }
            };
            let started = Instant::now();
            vm.execute(program)?;
            if cli.benchmark {
                println!("execute: {:?}", started.elapsed());
            }
            if cli.debug {
                report_memory(&vm.memory_stats());
            }
            Ok(())
        }
        _ => run_source(cli, input),
    }
}

fn run_source(cli: &Cli, input: &Path) -> nanoscript::Result<()> {
    let source = fs::read_to_string(input)?;
    let engine = Engine::with_options(engine_options(cli));

    let compile_started = Instant::now();
    let program = engine.compile(&source)?;
    let compile_elapsed = compile_started.elapsed();

    if cli.output_bytecode {
        let target = cli
            .output
            .clone()
            .unwrap_or_else(|| derived_output(input, "bc"));
        fs::write(target, serialize::to_json(&program.instructions)?)?;
    }
    if cli.output_ast {
        fs::write(
            derived_output(input, "ast.json"),
            engine.ast_json(&source)?,
        )?;
    }
    if cli.debug {
        print!("{}", Disassembler::new().disassemble(&program.instructions));
        let stats = disassembler::statistics(&program.instructions);
        print!("{}", render_stats(&stats));
    }

    let defaults = EngineOptions::default();
    let mut vm = Vm::with_memory(
        cli.memory_size.unwrap_or(defaults.memory_size),
        cli.gc_threshold.unwrap_or(defaults.gc_threshold),
    );
    vm.set_sink(Sink::stdout());
    let run_started = Instant::now();
    vm.execute(program)?;
    let run_elapsed = run_started.elapsed();

    if cli.benchmark {
        println!("compile: {compile_elapsed:?}");
        println!("execute: {run_elapsed:?}");
    }
    if cli.debug {
        report_memory(&vm.memory_stats());
    }
    Ok(())
}

/// Load instructions from a `.bc` JSON file or a `.asm` textual file.
fn load_bytecode(input: &Path) -> nanoscript::Result<Vec<nanoscript::Instruction>> {
    let text = fs::read_to_string(input)?;
    match input.extension().and_then(|e| e.to_str()) {
        Some("asm") => Assembler::new().assemble(&text),
        _ => serialize::from_json(&text),
    }
}

fn render_stats(stats: &disassembler::DisasmStats) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "; instructions: {}\n; distinct jump targets: {}\n; estimated max stack depth: {}\n",
        stats.total_instructions, stats.jump_target_count, stats.estimated_max_stack_depth
    ));
    for (mnemonic, count) in &stats.opcode_frequency {
        out.push_str(&format!("; {mnemonic}: {count}\n"));
    }
    out
}

fn report_memory(stats: &nanoscript::MemoryStats) {
    println!(
        "memory: {} used / {} free / {} total; gc runs: {}, gc time: {:?}",
        stats.used_memory, stats.free_memory, stats.total_memory, stats.gc_runs, stats.gc_time
    );
}
