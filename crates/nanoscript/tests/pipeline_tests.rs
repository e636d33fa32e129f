//! End-to-end pipeline tests: source in, host output (or failure) out.

use nanoscript::error::{CompileErrorKind, RuntimeErrorKind};
use nanoscript::{Engine, EngineOptions, Error};
use pretty_assertions::assert_eq;

fn run(source: &str) -> Vec<String> {
    Engine::new().capture(source).unwrap().printed
}

fn run_err(source: &str) -> Error {
    Engine::new().capture(source).unwrap_err()
}

// ---------------------------------------------------------------------------
// Happy-path scenarios
// ---------------------------------------------------------------------------

#[test]
fn scenario_addition() {
    assert_eq!(run("let result = 5 + 3; print(result);"), vec!["8"]);
}

#[test]
fn scenario_function_call() {
    assert_eq!(
        run("function add(a,b){return a+b;} print(add(10,20));"),
        vec!["30"]
    );
}

#[test]
fn scenario_if_else() {
    assert_eq!(
        run("let x=5; if (x>0){print(\"positive\");} else {print(\"negative\");}"),
        vec!["positive"]
    );
}

#[test]
fn scenario_while_sum() {
    assert_eq!(
        run("let sum=0; let i=1; while (i<=3){sum=sum+i; i=i+1;} print(sum);"),
        vec!["6"]
    );
}

#[test]
fn scenario_recursive_fib() {
    assert_eq!(
        run("function fib(n){ if (n<=1){return n;} return fib(n-1)+fib(n-2); } print(fib(10));"),
        vec!["55"]
    );
}

#[test]
fn scenario_division_by_zero_fails_with_no_output() {
    let mut engine = Engine::new();
    let err = engine.capture("let a=10; let b=0; print(a/b);").unwrap_err();
    let Error::Runtime(err) = err else {
        panic!("expected runtime error, got {err:?}");
    };
    assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
}

// ---------------------------------------------------------------------------
// Targeted negative tests
// ---------------------------------------------------------------------------

#[test]
fn unterminated_string_is_a_syntax_error_at_the_opening_quote() {
    let Error::Compile(err) = run_err("let s = \"oops;") else {
        panic!("expected compile error");
    };
    assert_eq!(err.kind, CompileErrorKind::Syntax);
    assert_eq!(err.location.line, 1);
    assert_eq!(err.location.column, 9);
}

#[test]
fn missing_initializer_expression_is_a_syntax_error_at_the_semicolon() {
    let Error::Compile(err) = run_err("let x = ;") else {
        panic!("expected compile error");
    };
    assert_eq!(err.kind, CompileErrorKind::Syntax);
    assert_eq!(err.location.column, 9);
}

#[test]
fn undefined_variable_fails_at_compile_time() {
    let Error::Compile(err) = run_err("print(undefinedVariable);") else {
        panic!("expected compile error");
    };
    assert_eq!(err.kind, CompileErrorKind::Semantic);
}

#[test]
fn mixed_type_addition_is_a_runtime_type_mismatch() {
    let Error::Runtime(err) = run_err("let x = \"hello\"; let y = x + 5; print(y);") else {
        panic!("expected runtime error");
    };
    assert_eq!(err.kind, RuntimeErrorKind::TypeMismatch);
}

#[test]
fn unbounded_recursion_is_a_stack_overflow() {
    let Error::Runtime(err) = run_err("function f(){return f();} f();") else {
        panic!("expected runtime error");
    };
    assert_eq!(err.kind, RuntimeErrorKind::StackOverflow);
    assert_eq!(err.call_stack.first().map(String::as_str), Some("main"));
    assert!(err.call_stack.iter().filter(|f| *f == "f").count() > 1000);
}

// ---------------------------------------------------------------------------
// Error message formats
// ---------------------------------------------------------------------------

#[test]
fn compile_error_message_format() {
    let err = run_err("let x = ;");
    assert_eq!(
        err.to_string(),
        "Syntax Error at Line 1, Column 9: expected an expression, found ';'"
    );
}

#[test]
fn runtime_error_message_format() {
    let err = run_err("function div(a, b) { return a / b; } print(div(1, 0));");
    let text = err.to_string();
    assert!(text.starts_with("Runtime Error (division_by_zero):"));
    assert!(text.contains("Stack trace: main -> div"));
}

// ---------------------------------------------------------------------------
// Optimization safety
// ---------------------------------------------------------------------------

fn run_both_ways(source: &str) -> (Result<Vec<String>, Error>, Result<Vec<String>, Error>) {
    let optimized = Engine::new().capture(source).map(|o| o.printed);
    let plain = Engine::with_options(EngineOptions {
        optimize: false,
        ..EngineOptions::default()
    })
    .capture(source)
    .map(|o| o.printed);
    (optimized, plain)
}

#[test]
fn optimization_preserves_output() {
    let sources = [
        "print(1 + 2 * 3);",
        "let unused = 5; print(\"kept\");",
        "if (true) { print(\"a\"); } else { print(\"b\"); }",
        "if (1 > 2) { print(\"never\"); } print(\"after\");",
        "while (false) { print(\"never\"); } print(\"done\");",
        "function f(n) { return n * 2; if (n) { print(n); } } print(f(21));",
        "let sum = 0; for (let i = 0; i < 5; i = i + 1) { sum = sum + i; } print(sum);",
        "print(\"con\" + \"cat\"); print(2 <= 2); print(3 != 4);",
    ];
    for source in sources {
        let (optimized, plain) = run_both_ways(source);
        assert_eq!(
            optimized.unwrap(),
            plain.unwrap(),
            "output diverged for: {source}"
        );
    }
}

#[test]
fn optimization_preserves_failures() {
    let sources = [
        "print(1 / 0);",
        "print(\"a\" + 1);",
        "let a = 10; let b = 0; print(a % b);",
    ];
    for source in sources {
        let (optimized, plain) = run_both_ways(source);
        let optimized = optimized.expect_err("optimized build should fail");
        let plain = plain.expect_err("unoptimized build should fail");
        let (Error::Runtime(optimized), Error::Runtime(plain)) = (optimized, plain) else {
            panic!("both failures should be runtime errors for: {source}");
        };
        assert_eq!(optimized.kind, plain.kind, "error kind diverged for: {source}");
    }
}

// ---------------------------------------------------------------------------
// Intrinsics end to end
// ---------------------------------------------------------------------------

#[test]
fn intrinsics_work_through_the_pipeline() {
    assert_eq!(
        run(r#"
            print(abs(-7));
            print(sqrt(81));
            print(pow(2, 8));
            print(length("nano"));
            print(substring("nanoscript", 0, 4));
            print(concat("nano", "script"));
            print(toString(3.5));
            print(toNumber("42") + 1);
            print(toBoolean(""));
            print(toBoolean(5));
        "#),
        vec!["7", "9", "256", "4", "nano", "nanoscript", "3.5", "43", "false", "true"]
    );
}

#[test]
fn to_number_of_a_word_is_a_type_mismatch() {
    let Error::Runtime(err) = run_err("print(toNumber(\"abc\"));") else {
        panic!("expected runtime error");
    };
    assert_eq!(err.kind, RuntimeErrorKind::TypeMismatch);
}

#[test]
fn print_output_order_matches_execution_order() {
    assert_eq!(
        run("let i = 0; while (i < 4) { print(i); i = i + 1; }"),
        vec!["0", "1", "2", "3"]
    );
}

#[test]
fn declaration_without_initializer_defaults_to_zero() {
    assert_eq!(run("let x; print(x);"), vec!["0"]);
}
