//! Bytecode code generator.
//!
//! Walks the AST exactly once and emits a flat instruction stream plus the
//! function table. Control flow uses a small label resolver: jumps are
//! emitted with a placeholder target and a `(jump index, label)` record;
//! once a label's address is known every recorded site is patched in place.
//!
//! Scoping is checked here, at compile time: the symbol table tracks
//! declarations per lexical scope, and referencing or assigning an
//! undeclared name is a semantic error. `print(x)` is special: it compiles
//! to the dedicated `PRINT` opcode; every other call becomes `CALL name`.

use std::collections::HashMap;

use crate::ast::{BinaryOp, Expr, Identifier, LiteralValue, Program, Stmt};
use crate::builtins;
use crate::bytecode::{self, Instruction, Opcode, Operand};
use crate::error::{CompileError, Location};
use crate::operators::opcode_for;
use crate::symtab::{SymbolTable, SymbolType};
use crate::value::FunctionRef;

/// Lower a parsed (and possibly optimized) AST to bytecode.
pub fn generate(program: &Program) -> Result<bytecode::Program, CompileError> {
    let mut generator = CodeGenerator::new();
    for stmt in &program.body {
        generator.gen_stmt(stmt)?;
    }
    generator.emit(Instruction::new(Opcode::Halt));
    let program = generator.finish();
    tracing::debug!(
        instructions = program.instructions.len(),
        functions = program.functions.len(),
        "code generation finished"
    );
    Ok(program)
}

/// A label handle from [`CodeGenerator::create_label`].
#[derive(Debug, Clone, Copy)]
struct Label(usize);

struct CodeGenerator {
    instructions: Vec<Instruction>,
    symbols: SymbolTable,
    functions: HashMap<String, FunctionRef>,
    /// Resolved address per label, indexed by label id.
    labels: Vec<Option<usize>>,
    /// Jump sites awaiting resolution: (instruction index, label).
    patches: Vec<(usize, Label)>,
    /// Nesting depth of function bodies (0 = top level).
    function_depth: usize,
}

impl CodeGenerator {
    fn new() -> Self {
        Self {
            instructions: Vec::new(),
            symbols: SymbolTable::new(),
            functions: HashMap::new(),
            labels: Vec::new(),
            patches: Vec::new(),
            function_depth: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Emission and labels
    // -----------------------------------------------------------------------

    fn emit(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    fn emit_op(&mut self, opcode: Opcode) {
        self.emit(Instruction::new(opcode));
    }

    fn next_address(&self) -> usize {
        self.instructions.len()
    }

    fn create_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Emit a jump to a not-yet-bound label with a placeholder operand.
    fn emit_jump(&mut self, opcode: Opcode, label: Label) {
        let site = self.instructions.len();
        self.emit(Instruction::with_operand(opcode, 0usize));
        self.patches.push((site, label));
    }

    /// Bind `label` to the address of the next instruction.
    fn bind_label(&mut self, label: Label) {
        self.labels[label.0] = Some(self.next_address());
    }

    /// Back-patch every recorded jump site and hand over the program.
    fn finish(mut self) -> bytecode::Program {
        for (site, label) in &self.patches {
            let address = self.labels[label.0]
                .unwrap_or_else(|| panic!("label {} was never bound", label.0));
            self.instructions[*site].operand = Some(Operand::Number(address as f64));
        }
        bytecode::Program::new(self.instructions, self.functions)
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn gen_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::VariableDeclaration { id, init, .. } => {
                let inferred = match init {
                    Some(expr) => {
                        self.gen_expr(expr)?;
                        self.infer_type(expr)
                    }
                    None => {
                        self.emit(Instruction::with_operand(Opcode::Push, 0.0));
                        SymbolType::Number
                    }
                };
                self.emit(Instruction::with_operand(Opcode::Store, id.name.as_str()));
                self.symbols.declare(&id.name, inferred);
                Ok(())
            }

            Stmt::FunctionDeclaration {
                name, params, body, ..
            } => self.gen_function(name, params, body),

            Stmt::IfStatement {
                condition,
                consequent,
                alternate,
                ..
            } => {
                self.gen_expr(condition)?;
                match alternate {
                    None => {
                        let end = self.create_label();
                        self.emit_jump(Opcode::JumpIfFalse, end);
                        self.gen_stmt(consequent)?;
                        self.bind_label(end);
                    }
                    Some(alternate) => {
                        let else_branch = self.create_label();
                        let end = self.create_label();
                        self.emit_jump(Opcode::JumpIfFalse, else_branch);
                        self.gen_stmt(consequent)?;
                        self.emit_jump(Opcode::Jump, end);
                        self.bind_label(else_branch);
                        self.gen_stmt(alternate)?;
                        self.bind_label(end);
                    }
                }
                Ok(())
            }

            Stmt::WhileStatement {
                condition, body, ..
            } => {
                let start = self.next_address();
                let end = self.create_label();
                self.gen_expr(condition)?;
                self.emit_jump(Opcode::JumpIfFalse, end);
                self.gen_stmt(body)?;
                self.emit(Instruction::with_operand(Opcode::Jump, start));
                self.bind_label(end);
                Ok(())
            }

            Stmt::ForStatement {
                init,
                test,
                update,
                body,
                ..
            } => {
                self.symbols.enter_scope();
                if let Some(init) = init {
                    self.gen_stmt(init)?;
                }
                let start = self.next_address();
                let end = self.create_label();
                match test {
                    Some(test) => self.gen_expr(test)?,
                    None => self.emit(Instruction::with_operand(Opcode::Push, true)),
                }
                self.emit_jump(Opcode::JumpIfFalse, end);
                self.gen_stmt(body)?;
                if let Some(update) = update {
                    self.gen_expr_for_effect(update)?;
                }
                self.emit(Instruction::with_operand(Opcode::Jump, start));
                self.bind_label(end);
                self.symbols.exit_scope();
                Ok(())
            }

            Stmt::ReturnStatement { argument, location } => {
                if self.function_depth == 0 {
                    return Err(CompileError::semantic(
                        "'return' outside of a function",
                        *location,
                    ));
                }
                match argument {
                    Some(expr) => self.gen_expr(expr)?,
                    None => self.emit(Instruction::with_operand(Opcode::Push, 0.0)),
                }
                self.emit_op(Opcode::Return);
                Ok(())
            }

            Stmt::BlockStatement { body, .. } => {
                self.symbols.enter_scope();
                for stmt in body {
                    self.gen_stmt(stmt)?;
                }
                self.symbols.exit_scope();
                Ok(())
            }

            Stmt::ExpressionStatement { expression, .. } => {
                self.gen_expr_for_effect(expression)
            }
        }
    }

    /// Lower a function declaration: a skip jump over the body, the body
    /// itself, and a synthesized `PUSH 0; RETURN` when the body does not
    /// already end in a return.
    fn gen_function(
        &mut self,
        name: &Identifier,
        params: &[Identifier],
        body: &[Stmt],
    ) -> Result<(), CompileError> {
        let after = self.create_label();
        self.emit_jump(Opcode::Jump, after);

        let start = self.next_address();
        let param_names: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
        // Register before the body is generated so recursive calls resolve.
        self.functions.insert(
            name.name.clone(),
            FunctionRef::new(name.name.clone(), param_names, start),
        );
        self.symbols.declare(&name.name, SymbolType::Function);

        self.symbols.enter_scope();
        self.function_depth += 1;
        for param in params {
            self.symbols.declare(&param.name, SymbolType::Unknown);
        }
        for stmt in body {
            self.gen_stmt(stmt)?;
        }
        if !matches!(
            self.instructions.last(),
            Some(Instruction {
                opcode: Opcode::Return,
                ..
            })
        ) {
            self.emit(Instruction::with_operand(Opcode::Push, 0.0));
            self.emit_op(Opcode::Return);
        }
        self.function_depth -= 1;
        self.symbols.exit_scope();

        self.bind_label(after);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// Emit an expression evaluated for its side effects only; nothing is
    /// left on the operand stack afterwards.
    fn gen_expr_for_effect(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            // `x = v` as a statement: value, then a plain store.
            Expr::Assignment {
                target,
                value,
                location,
            } => {
                self.check_declared(&target.name, *location)?;
                self.gen_expr(value)?;
                self.emit(Instruction::with_operand(Opcode::Store, target.name.as_str()));
                Ok(())
            }
            // `print(v);` compiles to the PRINT opcode.
            Expr::Call {
                callee,
                arguments,
                location,
            } if callee.name == "print" => {
                if arguments.len() != 1 {
                    return Err(CompileError::type_error(
                        format!("print expects 1 argument, got {}", arguments.len()),
                        *location,
                    ));
                }
                self.gen_expr(&arguments[0])?;
                self.emit_op(Opcode::Print);
                Ok(())
            }
            // Any other expression leaves a value; discard it.
            other => {
                self.gen_expr(other)?;
                self.emit_op(Opcode::Pop);
                Ok(())
            }
        }
    }

    /// Emit an expression that leaves exactly one value on the stack.
    fn gen_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Literal { value, .. } => {
                let operand = match value {
                    LiteralValue::Number(n) => Operand::Number(*n),
                    LiteralValue::Str(s) => Operand::Str(s.clone()),
                    LiteralValue::Bool(b) => Operand::Bool(*b),
                };
                self.emit(Instruction::with_operand(Opcode::Push, operand));
                Ok(())
            }

            Expr::Identifier { name, location } => {
                self.check_declared(name, *location)?;
                self.emit(Instruction::with_operand(Opcode::Load, name.as_str()));
                Ok(())
            }

            Expr::Assignment {
                target,
                value,
                location,
            } => {
                // In value position the assigned value is also the result,
                // so keep a copy ahead of the store.
                self.check_declared(&target.name, *location)?;
                self.gen_expr(value)?;
                self.emit_op(Opcode::Dup);
                self.emit(Instruction::with_operand(Opcode::Store, target.name.as_str()));
                Ok(())
            }

            Expr::Binary {
                left,
                operator,
                right,
                location,
            } => match operator {
                BinaryOp::And => self.gen_logical_and(left, right),
                BinaryOp::Or => self.gen_logical_or(left, right),
                _ => {
                    self.gen_expr(left)?;
                    self.gen_expr(right)?;
                    let opcode = opcode_for(*operator).ok_or_else(|| {
                        CompileError::semantic(
                            format!("unsupported operator '{operator}'"),
                            *location,
                        )
                    })?;
                    self.emit_op(opcode);
                    Ok(())
                }
            },

            Expr::Call {
                callee,
                arguments,
                location,
            } => {
                if callee.name == "print" {
                    return Err(CompileError::type_error(
                        "print has no value and cannot be used in an expression",
                        *location,
                    ));
                }
                self.gen_call(callee, arguments, *location)
            }
        }
    }

    /// `a && b`: keep `a` as the result when it is falsy, otherwise
    /// evaluate to `b`.
    fn gen_logical_and(&mut self, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        let end = self.create_label();
        self.gen_expr(left)?;
        self.emit_op(Opcode::Dup);
        self.emit_jump(Opcode::JumpIfFalse, end);
        self.emit_op(Opcode::Pop);
        self.gen_expr(right)?;
        self.bind_label(end);
        Ok(())
    }

    /// `a || b`: keep `a` as the result when it is truthy, otherwise
    /// evaluate to `b`.
    fn gen_logical_or(&mut self, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        let rhs = self.create_label();
        let end = self.create_label();
        self.gen_expr(left)?;
        self.emit_op(Opcode::Dup);
        self.emit_jump(Opcode::JumpIfFalse, rhs);
        self.emit_jump(Opcode::Jump, end);
        self.bind_label(rhs);
        self.emit_op(Opcode::Pop);
        self.gen_expr(right)?;
        self.bind_label(end);
        Ok(())
    }

    fn gen_call(
        &mut self,
        callee: &Identifier,
        arguments: &[Expr],
        location: Location,
    ) -> Result<(), CompileError> {
        // Compile-time argument count checks where the arity is known.
        if let Some(arity) = builtins::intrinsic_arity(&callee.name) {
            if arguments.len() != arity {
                return Err(CompileError::type_error(
                    format!(
                        "{} expects {arity} argument{}, got {}",
                        callee.name,
                        if arity == 1 { "" } else { "s" },
                        arguments.len()
                    ),
                    location,
                ));
            }
        } else if let Some(func) = self.functions.get(&callee.name) {
            if arguments.len() != func.arity() {
                return Err(CompileError::type_error(
                    format!(
                        "{} expects {} argument{}, got {}",
                        callee.name,
                        func.arity(),
                        if func.arity() == 1 { "" } else { "s" },
                        arguments.len()
                    ),
                    location,
                ));
            }
        } else if self.symbols.lookup(&callee.name).is_none() {
            return Err(CompileError::semantic(
                format!("call to undeclared function '{}'", callee.name),
                location,
            ));
        }

        for argument in arguments {
            self.gen_expr(argument)?;
        }
        self.emit(Instruction::with_operand(Opcode::Call, callee.name.as_str()));
        Ok(())
    }

    fn check_declared(&self, name: &str, location: Location) -> Result<(), CompileError> {
        if self.symbols.lookup(name).is_none() {
            return Err(CompileError::semantic(
                format!("'{name}' is not declared"),
                location,
            ));
        }
        Ok(())
    }

    /// Best-effort static type for the symbol table.
    fn infer_type(&self, expr: &Expr) -> SymbolType {
        match expr {
            Expr::Literal { value, .. } => match value {
                LiteralValue::Number(_) => SymbolType::Number,
                LiteralValue::Str(_) => SymbolType::Str,
                LiteralValue::Bool(_) => SymbolType::Bool,
            },
            Expr::Binary { operator, .. } => match operator {
                BinaryOp::Add => SymbolType::Unknown,
                BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                    SymbolType::Number
                }
                BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Gt
                | BinaryOp::Le
                | BinaryOp::Ge => SymbolType::Bool,
                BinaryOp::And | BinaryOp::Or => SymbolType::Unknown,
            },
            Expr::Identifier { name, .. } => self
                .symbols
                .lookup(name)
                .map_or(SymbolType::Unknown, |s| s.value_type),
            Expr::Assignment { value, .. } => self.infer_type(value),
            Expr::Call { .. } => SymbolType::Unknown,
        }
    }
}
