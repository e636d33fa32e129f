//! AST optimization passes: constant folding and dead-code elimination.
//!
//! Both passes are optional and idempotent, and neither may change what a
//! program observably does: folding evaluates operators with the exact
//! routine the VM uses ([`crate::operators::apply_binary`]), and any
//! evaluation that would fail at run time (division by zero, a type
//! mismatch) is left unfolded so the failure still happens. Dead-code
//! elimination only removes statements that cannot execute or bind a name
//! nothing reads.

use std::collections::HashSet;

use crate::ast::{Expr, LiteralValue, Program, Stmt};
use crate::operators::{apply_binary, opcode_for};
use crate::value::Value;

/// Counters describing what a run of the optimizer did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OptimizerStats {
    /// Binary expressions replaced by their literal result.
    pub constants_folded: usize,
    /// Statements removed outright.
    pub statements_removed: usize,
    /// Unused declarations demoted to bare expression statements.
    pub declarations_demoted: usize,
}

/// Run both passes: fold constants, then eliminate dead code.
pub fn optimize(program: Program) -> (Program, OptimizerStats) {
    let mut stats = OptimizerStats::default();
    let program = fold_constants(program, &mut stats);
    let program = eliminate_dead_code(program, &mut stats);
    tracing::debug!(
        folded = stats.constants_folded,
        removed = stats.statements_removed,
        demoted = stats.declarations_demoted,
        "optimization finished"
    );
    (program, stats)
}

// ---------------------------------------------------------------------------
// Constant folding
// ---------------------------------------------------------------------------

/// Fold `Literal op Literal` binary expressions into their results.
pub fn fold_constants(program: Program, stats: &mut OptimizerStats) -> Program {
    let body = program
        .body
        .into_iter()
        .map(|stmt| fold_stmt(stmt, stats))
        .collect();
    Program { body }
}

fn fold_stmt(stmt: Stmt, stats: &mut OptimizerStats) -> Stmt {
    match stmt {
        Stmt::VariableDeclaration { id, init, location } => Stmt::VariableDeclaration {
            id,
            init: init.map(|e| fold_expr(e, stats)),
            location,
        },
        Stmt::FunctionDeclaration {
            name,
            params,
            body,
            location,
        } => Stmt::FunctionDeclaration {
            name,
            params,
            body: body.into_iter().map(|s| fold_stmt(s, stats)).collect(),
            location,
        },
        Stmt::IfStatement {
            condition,
            consequent,
            alternate,
            location,
        } => Stmt::IfStatement {
            condition: fold_expr(condition, stats),
            consequent: Box::new(fold_stmt(*consequent, stats)),
            alternate: alternate.map(|s| Box::new(fold_stmt(*s, stats))),
            location,
        },
        Stmt::WhileStatement {
            condition,
            body,
            location,
        } => Stmt::WhileStatement {
            condition: fold_expr(condition, stats),
            body: Box::new(fold_stmt(*body, stats)),
            location,
        },
        Stmt::ForStatement {
            init,
            test,
            update,
            body,
            location,
        } => Stmt::ForStatement {
            init: init.map(|s| Box::new(fold_stmt(*s, stats))),
            test: test.map(|e| fold_expr(e, stats)),
            update: update.map(|e| fold_expr(e, stats)),
            body: Box::new(fold_stmt(*body, stats)),
            location,
        },
        Stmt::ReturnStatement { argument, location } => Stmt::ReturnStatement {
            argument: argument.map(|e| fold_expr(e, stats)),
            location,
        },
        Stmt::BlockStatement { body, location } => Stmt::BlockStatement {
            body: body.into_iter().map(|s| fold_stmt(s, stats)).collect(),
            location,
        },
        Stmt::ExpressionStatement {
            expression,
            location,
        } => Stmt::ExpressionStatement {
            expression: fold_expr(expression, stats),
            location,
        },
    }
}

fn fold_expr(expr: Expr, stats: &mut OptimizerStats) -> Expr {
    match expr {
        Expr::Binary {
            left,
            operator,
            right,
            location,
        } => {
            let left = fold_expr(*left, stats);
            let right = fold_expr(*right, stats);
            if let (Some(l), Some(r), Some(opcode)) = (
                left.literal_value(),
                right.literal_value(),
                opcode_for(operator),
            ) {
                // Evaluate with the VM's own operator routine. An error here
                // (division by zero, type mismatch) must stay observable at
                // run time, so the expression is kept as-is.
                if let Ok(value) = apply_binary(opcode, &l.to_value(), &r.to_value()) {
                    if let Some(literal) = literal_from_value(value) {
                        stats.constants_folded += 1;
                        return Expr::Literal {
                            value: literal,
                            location,
                        };
                    }
                }
            }
            Expr::Binary {
                left: Box::new(left),
                operator,
                right: Box::new(right),
                location,
            }
        }
        Expr::Call {
            callee,
            arguments,
            location,
        } => Expr::Call {
            callee,
            arguments: arguments
                .into_iter()
                .map(|a| fold_expr(a, stats))
                .collect(),
            location,
        },
        Expr::Assignment {
            target,
            value,
            location,
        } => Expr::Assignment {
            target,
            value: Box::new(fold_expr(*value, stats)),
            location,
        },
        other @ (Expr::Identifier { .. } | Expr::Literal { .. }) => other,
    }
}

fn literal_from_value(value: Value) -> Option<LiteralValue> {
    match value {
        Value::Number(n) => Some(LiteralValue::Number(n)),
        Value::Str(s) => Some(LiteralValue::Str(s)),
        Value::Bool(b) => Some(LiteralValue::Bool(b)),
        Value::Function(_) | Value::Undefined => None,
    }
}

// ---------------------------------------------------------------------------
// Dead-code elimination
// ---------------------------------------------------------------------------

/// Remove code that cannot run or bind anything observable:
/// statements after a `return`, branches with literal conditions, loops
/// with literal-false tests, and declarations of never-referenced names.
pub fn eliminate_dead_code(program: Program, stats: &mut OptimizerStats) -> Program {
    let mut referenced = HashSet::new();
    for stmt in &program.body {
        collect_references(stmt, &mut referenced);
    }
    let body = eliminate_in_body(program.body, &referenced, stats);
    Program { body }
}

/// Visit a statement list: drop eliminated statements and truncate
/// everything after an unconditional `return`.
fn eliminate_in_body(
    body: Vec<Stmt>,
    referenced: &HashSet<String>,
    stats: &mut OptimizerStats,
) -> Vec<Stmt> {
    let mut result = Vec::new();
    let mut returned = false;
    for stmt in body {
        if returned {
            stats.statements_removed += 1;
            continue;
        }
        match eliminate_stmt(stmt, referenced, stats) {
            Some(stmt) => {
                returned = matches!(stmt, Stmt::ReturnStatement { .. });
                result.push(stmt);
            }
            None => stats.statements_removed += 1,
        }
    }
    result
}

fn eliminate_stmt(
    stmt: Stmt,
    referenced: &HashSet<String>,
    stats: &mut OptimizerStats,
) -> Option<Stmt> {
    match stmt {
        Stmt::IfStatement {
            condition,
            consequent,
            alternate,
            location,
        } => match condition.literal_value() {
            Some(literal) if literal.is_truthy() => eliminate_stmt(*consequent, referenced, stats),
            Some(_) => match alternate {
                Some(alt) => eliminate_stmt(*alt, referenced, stats),
                None => None,
            },
            None => Some(Stmt::IfStatement {
                condition,
                consequent: Box::new(
                    eliminate_stmt(*consequent, referenced, stats)
                        .unwrap_or_else(|| empty_block(location)),
                ),
                alternate: alternate
                    .map(|alt| eliminate_stmt(*alt, referenced, stats))
                    .map(|alt| Box::new(alt.unwrap_or_else(|| empty_block(location)))),
                location,
            }),
        },
        Stmt::WhileStatement {
            condition,
            body,
            location,
        } => match condition.literal_value() {
            Some(literal) if !literal.is_truthy() => None,
            _ => Some(Stmt::WhileStatement {
                condition,
                body: Box::new(
                    eliminate_stmt(*body, referenced, stats)
                        .unwrap_or_else(|| empty_block(location)),
                ),
                location,
            }),
        },
        Stmt::ForStatement {
            init,
            test,
            update,
            body,
            location,
        } => match test.as_ref().and_then(Expr::literal_value) {
            Some(literal) if !literal.is_truthy() => None,
            _ => Some(Stmt::ForStatement {
                init,
                test,
                update,
                body: Box::new(
                    eliminate_stmt(*body, referenced, stats)
                        .unwrap_or_else(|| empty_block(location)),
                ),
                location,
            }),
        },
        Stmt::VariableDeclaration { id, init, location } => {
            if referenced.contains(&id.name) {
                return Some(Stmt::VariableDeclaration { id, init, location });
            }
            match init {
                Some(expression) if has_side_effects(&expression) => {
                    stats.declarations_demoted += 1;
                    Some(Stmt::ExpressionStatement {
                        expression,
                        location,
                    })
                }
                _ => None,
            }
        }
        Stmt::FunctionDeclaration {
            name,
            params,
            body,
            location,
        } => Some(Stmt::FunctionDeclaration {
            name,
            params,
            body: eliminate_in_body(body, referenced, stats),
            location,
        }),
        Stmt::BlockStatement { body, location } => Some(Stmt::BlockStatement {
            body: eliminate_in_body(body, referenced, stats),
            location,
        }),
        other @ (Stmt::ReturnStatement { .. } | Stmt::ExpressionStatement { .. }) => Some(other),
    }
}

fn empty_block(location: crate::error::Location) -> Stmt {
    Stmt::BlockStatement {
        body: Vec::new(),
        location,
    }
}

/// Whether evaluating the expression could do anything observable.
/// Calls and assignments count; pure arithmetic over names does not.
fn has_side_effects(expr: &Expr) -> bool {
    match expr {
        Expr::Call { .. } | Expr::Assignment { .. } => true,
        Expr::Binary { left, right, .. } => has_side_effects(left) || has_side_effects(right),
        Expr::Identifier { .. } | Expr::Literal { .. } => false,
    }
}

/// Record every name an expression or statement mentions: reads, assignment
/// targets, and call callees all count as references, so a declaration is
/// only dropped when nothing in the whole program touches its name.
fn collect_references(stmt: &Stmt, out: &mut HashSet<String>) {
    match stmt {
        Stmt::VariableDeclaration { init, .. } => {
            if let Some(expr) = init {
                collect_expr_references(expr, out);
            }
        }
        Stmt::FunctionDeclaration { body, .. } => {
            for stmt in body {
                collect_references(stmt, out);
            }
        }
        Stmt::IfStatement {
            condition,
            consequent,
            alternate,
            ..
        } => {
            collect_expr_references(condition, out);
            collect_references(consequent, out);
            if let Some(alt) = alternate {
                collect_references(alt, out);
            }
        }
        Stmt::WhileStatement {
            condition, body, ..
        } => {
            collect_expr_references(condition, out);
            collect_references(body, out);
        }
        Stmt::ForStatement {
            init,
            test,
            update,
            body,
            ..
        } => {
            if let Some(init) = init {
                collect_references(init, out);
            }
            if let Some(test) = test {
                collect_expr_references(test, out);
            }
            if let Some(update) = update {
                collect_expr_references(update, out);
            }
            collect_references(body, out);
        }
        Stmt::ReturnStatement { argument, .. } => {
            if let Some(expr) = argument {
                collect_expr_references(expr, out);
            }
        }
        Stmt::BlockStatement { body, .. } => {
            for stmt in body {
                collect_references(stmt, out);
            }
        }
        Stmt::ExpressionStatement { expression, .. } => {
            collect_expr_references(expression, out);
        }
    }
}

fn collect_expr_references(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Identifier { name, .. } => {
            out.insert(name.clone());
        }
        Expr::Binary { left, right, .. } => {
            collect_expr_references(left, out);
            collect_expr_references(right, out);
        }
        Expr::Call {
            callee, arguments, ..
        } => {
            out.insert(callee.name.clone());
            for arg in arguments {
                collect_expr_references(arg, out);
            }
        }
        Expr::Assignment { target, value, .. } => {
            out.insert(target.name.clone());
            collect_expr_references(value, out);
        }
        Expr::Literal { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;
    use crate::lexer::tokenize;
    use crate::parser;

    fn parse(source: &str) -> Program {
        let (program, errors) = parser::parse(tokenize(source).unwrap());
        assert!(errors.is_empty(), "parse errors: {errors:?}");
        program
    }

    fn optimized(source: &str) -> (Program, OptimizerStats) {
        optimize(parse(source))
    }

    #[test]
    fn folds_arithmetic_over_literals() {
        let (program, stats) = optimized("let x = 5 + 3 * 2;");
        let Stmt::VariableDeclaration { init, .. } = &program.body[0] else {
            panic!("expected declaration");
        };
        assert_eq!(
            init.as_ref().unwrap().literal_value(),
            Some(&LiteralValue::Number(11.0))
        );
        assert_eq!(stats.constants_folded, 2);
    }

    #[test]
    fn folds_comparisons_and_string_concat() {
        let (program, _) = optimized("let a = 2 < 3; let b = \"foo\" + \"bar\"; print(a); print(b);");
        let Stmt::VariableDeclaration { init, .. } = &program.body[0] else {
            panic!();
        };
        assert_eq!(
            init.as_ref().unwrap().literal_value(),
            Some(&LiteralValue::Bool(true))
        );
        let Stmt::VariableDeclaration { init, .. } = &program.body[1] else {
            panic!();
        };
        assert_eq!(
            init.as_ref().unwrap().literal_value(),
            Some(&LiteralValue::Str("foobar".to_string()))
        );
    }

    #[test]
    fn does_not_fold_division_by_zero() {
        let (program, stats) = optimized("print(1 / 0);");
        let Stmt::ExpressionStatement { expression, .. } = &program.body[0] else {
            panic!();
        };
        let Expr::Call { arguments, .. } = expression else {
            panic!();
        };
        assert!(matches!(
            arguments[0],
            Expr::Binary {
                operator: BinaryOp::Div,
                ..
            }
        ));
        assert_eq!(stats.constants_folded, 0);
    }

    #[test]
    fn does_not_fold_type_mismatches() {
        let (program, _) = optimized("print(\"a\" + 1);");
        let Stmt::ExpressionStatement { expression, .. } = &program.body[0] else {
            panic!();
        };
        let Expr::Call { arguments, .. } = expression else {
            panic!();
        };
        assert!(matches!(arguments[0], Expr::Binary { .. }));
    }

    #[test]
    fn does_not_fold_when_an_operand_is_a_name() {
        let (program, stats) = optimized("let x = 1; print(x + 2);");
        let Stmt::ExpressionStatement { expression, .. } = &program.body[1] else {
            panic!();
        };
        let Expr::Call { arguments, .. } = expression else {
            panic!();
        };
        assert!(matches!(arguments[0], Expr::Binary { .. }));
        assert_eq!(stats.constants_folded, 0);
    }

    #[test]
    fn drops_statements_after_return() {
        let (program, stats) =
            optimized("function f() { return 1; print(2); print(3); } print(f());");
        let Stmt::FunctionDeclaration { body, .. } = &program.body[0] else {
            panic!();
        };
        assert_eq!(body.len(), 1);
        assert_eq!(stats.statements_removed, 2);
    }

    #[test]
    fn reduces_literal_if_to_taken_branch() {
        let (program, _) = optimized("if (true) { print(1); } else { print(2); }");
        assert!(matches!(program.body[0], Stmt::BlockStatement { .. }));

        let (program, _) = optimized("if (false) { print(1); } else { print(2); }");
        assert!(matches!(program.body[0], Stmt::BlockStatement { .. }));

        let (program, _) = optimized("if (false) { print(1); }");
        assert!(program.body.is_empty());
    }

    #[test]
    fn folded_condition_feeds_branch_elimination() {
        // `1 > 2` folds to `false`, then the branch drops.
        let (program, _) = optimized("if (1 > 2) { print(1); }");
        assert!(program.body.is_empty());
    }

    #[test]
    fn drops_loops_with_literal_false_tests() {
        let (program, _) = optimized("while (false) { print(1); }");
        assert!(program.body.is_empty());

        let (program, _) = optimized("for (; false ;) { print(1); }");
        assert!(program.body.is_empty());
    }

    #[test]
    fn drops_unused_pure_declaration() {
        let (program, _) = optimized("let unused = 1 + 2; print(3);");
        assert_eq!(program.body.len(), 1);
        assert!(matches!(program.body[0], Stmt::ExpressionStatement { .. }));
    }

    #[test]
    fn demotes_unused_declaration_with_call_initializer() {
        let (program, stats) = optimized("function f() { return 1; } let unused = f();");
        let Stmt::ExpressionStatement { expression, .. } = &program.body[1] else {
            panic!("expected demoted expression statement, got {:?}", program.body[1]);
        };
        assert!(matches!(expression, Expr::Call { .. }));
        assert_eq!(stats.declarations_demoted, 1);
    }

    #[test]
    fn keeps_declarations_that_are_referenced() {
        let (program, _) = optimized("let x = 1; print(x);");
        assert!(matches!(program.body[0], Stmt::VariableDeclaration { .. }));
    }

    #[test]
    fn optimization_is_idempotent() {
        let (once, _) = optimized("let x = 1 + 2; if (true) { print(x); } print(4 * 2);");
        let (twice, stats) = optimize(once.clone());
        assert_eq!(once, twice);
        assert_eq!(stats.constants_folded, 0);
        assert_eq!(stats.statements_removed, 0);
    }
}
