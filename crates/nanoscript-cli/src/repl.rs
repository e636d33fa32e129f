//! Interactive read-eval-print loop.
//!
//! Lines accumulate until braces balance, so multi-line functions and
//! blocks can be typed naturally. Each submitted block is appended to the
//! session history and the whole history is re-run through a fresh engine
//! pass; only output beyond what the previous run produced is shown. That
//! keeps earlier bindings and functions visible without persisting any VM
//! state between compilations.
//!
//! Meta-commands: `:quit` leaves, `:reset` clears the session, `:dis`
//! prints the disassembly of the accumulated program.

use nanoscript::{Disassembler, Engine, EngineOptions};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

pub fn run(options: EngineOptions) -> nanoscript::Result<()> {
    println!("NanoScript REPL (:quit to exit, :reset to clear, :dis to disassemble)");

    let mut editor = DefaultEditor::new().map_err(|err| {
        nanoscript::Error::Io(std::io::Error::other(err.to_string()))
    })?;
    let mut engine = Engine::with_options(options);

    // Source of every successfully executed block so far.
    let mut history = String::new();
    // Lines the last successful run printed; used to show only new output.
    let mut shown_lines = 0usize;
    // Pending multi-line block and its brace depth.
    let mut buffer = String::new();
    let mut depth: i32 = 0;

    loop {
        let prompt = if buffer.is_empty() { ">>> " } else { "... " };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                depth = 0;
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("input error: {err}");
                break;
            }
        };

        let trimmed = line.trim();
        if buffer.is_empty() {
            match trimmed {
                ":quit" | ":exit" => break,
                ":reset" => {
                    history.clear();
                    shown_lines = 0;
                    println!("session cleared");
                    continue;
                }
                ":dis" => {
                    match engine.compile(&history) {
                        Ok(program) => {
                            print!("{}", Disassembler::new().disassemble(&program.instructions));
                        }
                        Err(err) => eprintln!("{err}"),
                    }
                    continue;
                }
                "" => continue,
                _ => {}
            }
        }

        let _ = editor.add_history_entry(&line);
        depth += brace_delta(&line);
        buffer.push_str(&line);
        buffer.push('\n');
        if depth > 0 {
            continue;
        }

        let candidate = format!("{history}{buffer}");
        match engine.capture(&candidate) {
            Ok(output) => {
                for printed in output.printed.iter().skip(shown_lines) {
                    println!("{printed}");
                }
                shown_lines = output.printed.len();
                history = candidate;
            }
            Err(err) => eprintln!("{err}"),
        }
        buffer.clear();
        depth = 0;
    }

    Ok(())
}

/// Net `{`/`}` balance of a line, ignoring braces inside string literals.
fn brace_delta(line: &str) -> i32 {
    let mut delta = 0;
    let mut string_char: Option<char> = None;
    let mut escaped = false;
    for c in line.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' | '\'' => match string_char {
                Some(open) if open == c => string_char = None,
                None => string_char = Some(c),
                _ => {}
            },
            '{' if string_char.is_none() => delta += 1,
            '}' if string_char.is_none() => delta -= 1,
            _ => {}
        }
    }
    delta
}
