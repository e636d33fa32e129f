//! Recursive-descent parser with precedence climbing.
//!
//! Expressions are parsed Pratt-style: each binary operator has a binding
//! power, and `parse_binary` loops while the next operator binds at least as
//! tightly as the current level. Assignment sits below everything and is
//! right-associative; unary minus desugars to `0 - x` so the code generator
//! only ever sees binary arithmetic.
//!
//! The parser never gives up on the first error. Unexpected tokens are
//! recorded and the parser synchronizes to the next `;` or
//! statement-starting keyword (panic-mode recovery), so one pass reports as
//! many independent errors as possible. An AST is always returned; callers
//! must skip code generation when any error was recorded.

use crate::ast::{BinaryOp, Expr, Identifier, LiteralValue, Program, Stmt};
use crate::error::{CompileError, Location};
use crate::lexer::{Token, TokenKind};

/// Parse a token stream into a [`Program`] plus any recovered errors.
pub fn parse(tokens: Vec<Token>) -> (Program, Vec<CompileError>) {
    let mut parser = Parser::new(tokens);
    let program = parser.parse_program();
    tracing::debug!(
        statements = program.body.len(),
        errors = parser.errors.len(),
        "parsing finished"
    );
    (program, parser.errors)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<CompileError>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Token cursor
    // -----------------------------------------------------------------------

    fn peek(&self) -> &Token {
        // The stream always ends with Eof, so the last token is a safe floor.
        self.tokens
            .get(self.pos)
            .unwrap_or_else(|| self.tokens.last().expect("token stream is never empty"))
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, CompileError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let token = self.peek();
            Err(CompileError::syntax(
                format!("expected {what}, found '{}'", describe_token(token)),
                token.location,
            ))
        }
    }

    /// Skip tokens until just past a `;` or to a token that can begin a
    /// statement. Always makes progress unless already at end of input.
    fn synchronize(&mut self) {
        while !self.check(TokenKind::Eof) {
            if self.matches(TokenKind::Semicolon) {
                return;
            }
            if self.peek_kind().starts_statement() {
                return;
            }
            self.advance();
        }
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn parse_program(&mut self) -> Program {
        let mut body = Vec::new();
        while !self.check(TokenKind::Eof) {
            match self.parse_statement() {
                Ok(stmt) => body.push(stmt),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
        }
        Program { body }
    }

    fn parse_statement(&mut self) -> Result<Stmt, CompileError> {
        match self.peek_kind() {
            TokenKind::Let => self.parse_variable_declaration(),
            TokenKind::Function => self.parse_function_declaration(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Return => self.parse_return(),
            TokenKind::LeftBrace => self.parse_block(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_variable_declaration(&mut self) -> Result<Stmt, CompileError> {
        let location = self.expect(TokenKind::Let, "'let'")?.location;
        let id = self.parse_identifier("variable name")?;
        let init = if self.matches(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(TokenKind::Semicolon, "';' after variable declaration")?;
        Ok(Stmt::VariableDeclaration { id, init, location })
    }

    fn parse_function_declaration(&mut self) -> Result<Stmt, CompileError> {
        let location = self.expect(TokenKind::Function, "'function'")?.location;
        let name = self.parse_identifier("function name")?;
        self.expect(TokenKind::LeftParen, "'(' after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                params.push(self.parse_identifier("parameter name")?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "')' after parameters")?;
        self.expect(TokenKind::LeftBrace, "'{' before function body")?;
        let body = self.parse_block_body()?;
        Ok(Stmt::FunctionDeclaration {
            name,
            params,
            body,
            location,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, CompileError> {
        let location = self.expect(TokenKind::If, "'if'")?.location;
        self.expect(TokenKind::LeftParen, "'(' after 'if'")?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RightParen, "')' after condition")?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.matches(TokenKind::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::IfStatement {
            condition,
            consequent,
            alternate,
            location,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, CompileError> {
        let location = self.expect(TokenKind::While, "'while'")?.location;
        self.expect(TokenKind::LeftParen, "'(' after 'while'")?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RightParen, "')' after condition")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::WhileStatement {
            condition,
            body,
            location,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, CompileError> {
        let location = self.expect(TokenKind::For, "'for'")?.location;
        self.expect(TokenKind::LeftParen, "'(' after 'for'")?;

        // Initializer: a `let` declaration, an expression, or empty. The
        // declaration form consumes its own terminating semicolon.
        let init = if self.matches(TokenKind::Semicolon) {
            None
        } else if self.check(TokenKind::Let) {
            Some(Box::new(self.parse_variable_declaration()?))
        } else {
            let expression = self.parse_expression()?;
            let stmt_location = expression.location();
            self.expect(TokenKind::Semicolon, "';' after loop initializer")?;
            Some(Box::new(Stmt::ExpressionStatement {
                expression,
                location: stmt_location,
            }))
        };

        let test = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon, "';' after loop condition")?;

        let update = if self.check(TokenKind::RightParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::RightParen, "')' after loop clauses")?;

        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::ForStatement {
            init,
            test,
            update,
            body,
            location,
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, CompileError> {
        let location = self.expect(TokenKind::Return, "'return'")?.location;
        let argument = if self.check(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(TokenKind::Semicolon, "';' after return value")?;
        Ok(Stmt::ReturnStatement { argument, location })
    }

    fn parse_block(&mut self) -> Result<Stmt, CompileError> {
        let location = self.expect(TokenKind::LeftBrace, "'{'")?.location;
        let body = self.parse_block_body()?;
        Ok(Stmt::BlockStatement { body, location })
    }

    /// Parse statements until the closing brace. Statement errors inside the
    /// block are recorded and recovered from so the rest of the block (and
    /// the rest of the file) still parses.
    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, CompileError> {
        let mut body = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            match self.parse_statement() {
                Ok(stmt) => body.push(stmt),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
        }
        self.expect(TokenKind::RightBrace, "'}' to close block")?;
        Ok(body)
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, CompileError> {
        let expression = self.parse_expression()?;
        let location = expression.location();
        self.expect(TokenKind::Semicolon, "';' after expression")?;
        Ok(Stmt::ExpressionStatement {
            expression,
            location,
        })
    }

    fn parse_identifier(&mut self, what: &str) -> Result<Identifier, CompileError> {
        let token = self.expect(TokenKind::Identifier, what)?;
        Ok(Identifier::new(token.lexeme, token.location))
    }

    // -----------------------------------------------------------------------
    // Expressions (precedence climbing)
    // -----------------------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expr, CompileError> {
        self.parse_assignment()
    }

    /// Assignment binds loosest and associates to the right:
    /// `a = b = c` is `a = (b = c)`. Only identifiers may be assigned.
    fn parse_assignment(&mut self) -> Result<Expr, CompileError> {
        let left = self.parse_binary(0)?;
        if self.check(TokenKind::Assign) {
            self.advance();
            let value = Box::new(self.parse_assignment()?);
            return match left {
                Expr::Identifier { name, location } => Ok(Expr::Assignment {
                    target: Identifier::new(name, location),
                    value,
                    location,
                }),
                other => Err(CompileError::syntax(
                    "invalid assignment target",
                    other.location(),
                )),
            };
        }
        Ok(left)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;
        while let Some((precedence, operator)) = binary_operator(self.peek_kind()) {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_binary(precedence + 1)?;
            let location = left.location();
            left = Expr::Binary {
                left: Box::new(left),
                operator,
                right: Box::new(right),
                location,
            };
        }
        Ok(left)
    }

    /// Unary minus desugars to `0 - x`; there are no other prefix operators.
    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if self.check(TokenKind::Minus) {
            let location = self.advance().location;
            let operand = self.parse_unary()?;
            return Ok(Expr::Binary {
                left: Box::new(Expr::number(0.0, location)),
                operator: BinaryOp::Sub,
                right: Box::new(operand),
                location,
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number => {
                self.advance();
                let value = token.lexeme.parse::<f64>().map_err(|_| {
                    CompileError::syntax(
                        format!("invalid number literal '{}'", token.lexeme),
                        token.location,
                    )
                })?;
                Ok(Expr::Literal {
                    value: LiteralValue::Number(value),
                    location: token.location,
                })
            }
            TokenKind::Str => {
                self.advance();
                Ok(Expr::Literal {
                    value: LiteralValue::Str(token.lexeme),
                    location: token.location,
                })
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                Ok(Expr::Literal {
                    value: LiteralValue::Bool(token.kind == TokenKind::True),
                    location: token.location,
                })
            }
            TokenKind::Identifier => {
                self.advance();
                if self.check(TokenKind::LeftParen) {
                    self.parse_call(Identifier::new(token.lexeme, token.location))
                } else {
                    Ok(Expr::Identifier {
                        name: token.lexeme,
                        location: token.location,
                    })
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RightParen, "')' to close grouping")?;
                Ok(inner)
            }
            _ => Err(CompileError::syntax(
                format!("expected an expression, found '{}'", describe_token(&token)),
                token.location,
            )),
        }
    }

    fn parse_call(&mut self, callee: Identifier) -> Result<Expr, CompileError> {
        let location = callee.location;
        self.expect(TokenKind::LeftParen, "'(' to open argument list")?;
        let mut arguments = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                arguments.push(self.parse_expression()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen, "')' after arguments")?;
        Ok(Expr::Call {
            callee,
            arguments,
            location,
        })
    }
}

/// Binding power and AST operator for a binary operator token.
fn binary_operator(kind: TokenKind) -> Option<(u8, BinaryOp)> {
    let entry = match kind {
        TokenKind::OrOr => (1, BinaryOp::Or),
        TokenKind::AndAnd => (2, BinaryOp::And),
        TokenKind::EqEq => (3, BinaryOp::Eq),
        TokenKind::NotEq => (3, BinaryOp::Ne),
        TokenKind::Less => (4, BinaryOp::Lt),
        TokenKind::Greater => (4, BinaryOp::Gt),
        TokenKind::LessEq => (4, BinaryOp::Le),
        TokenKind::GreaterEq => (4, BinaryOp::Ge),
        TokenKind::Plus => (5, BinaryOp::Add),
        TokenKind::Minus => (5, BinaryOp::Sub),
        TokenKind::Star => (6, BinaryOp::Mul),
        TokenKind::Slash => (6, BinaryOp::Div),
        TokenKind::Percent => (6, BinaryOp::Mod),
        _ => return None,
    };
    Some(entry)
}

fn describe_token(token: &Token) -> String {
    if token.kind == TokenKind::Eof {
        "end of input".to_string()
    } else {
        token.lexeme.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_ok(source: &str) -> Program {
        let (program, errors) = parse(tokenize(source).unwrap());
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        program
    }

    fn first_expr(program: &Program) -> &Expr {
        match &program.body[0] {
            Stmt::ExpressionStatement { expression, .. } => expression,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn multiplicative_binds_tighter_than_additive() {
        let program = parse_ok("1 + 2 * 3;");
        let Expr::Binary {
            operator, right, ..
        } = first_expr(&program)
        else {
            panic!("expected binary expression");
        };
        assert_eq!(*operator, BinaryOp::Add);
        assert!(matches!(
            right.as_ref(),
            Expr::Binary {
                operator: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn comparison_binds_tighter_than_logical() {
        let program = parse_ok("a < b && c > d;");
        let Expr::Binary { operator, .. } = first_expr(&program) else {
            panic!("expected binary expression");
        };
        assert_eq!(*operator, BinaryOp::And);
    }

    #[test]
    fn assignment_is_right_associative() {
        let program = parse_ok("a = b = 1;");
        let Expr::Assignment { target, value, .. } = first_expr(&program) else {
            panic!("expected assignment");
        };
        assert_eq!(target.name, "a");
        assert!(matches!(value.as_ref(), Expr::Assignment { .. }));
    }

    #[test]
    fn unary_minus_desugars_to_zero_minus() {
        let program = parse_ok("-x;");
        let Expr::Binary { left, operator, .. } = first_expr(&program) else {
            panic!("expected binary expression");
        };
        assert_eq!(*operator, BinaryOp::Sub);
        assert_eq!(
            left.literal_value(),
            Some(&LiteralValue::Number(0.0))
        );
    }

    #[test]
    fn parses_function_declaration() {
        let program = parse_ok("function add(a, b) { return a + b; }");
        let Stmt::FunctionDeclaration { name, params, body, .. } = &program.body[0] else {
            panic!("expected function declaration");
        };
        assert_eq!(name.name, "add");
        assert_eq!(params.len(), 2);
        assert!(matches!(body[0], Stmt::ReturnStatement { .. }));
    }

    #[test]
    fn parses_if_else_and_loops() {
        let program = parse_ok(
            "if (x > 0) { print(1); } else { print(2); } \
             while (x < 10) { x = x + 1; } \
             for (let i = 0; i < 3; i = i + 1) { print(i); }",
        );
        assert!(matches!(program.body[0], Stmt::IfStatement { alternate: Some(_), .. }));
        assert!(matches!(program.body[1], Stmt::WhileStatement { .. }));
        let Stmt::ForStatement { init, test, update, .. } = &program.body[2] else {
            panic!("expected for statement");
        };
        assert!(init.is_some());
        assert!(test.is_some());
        assert!(update.is_some());
    }

    #[test]
    fn for_clauses_are_all_optional() {
        let program = parse_ok("for (;;) { x = 1; }");
        let Stmt::ForStatement { init, test, update, .. } = &program.body[0] else {
            panic!("expected for statement");
        };
        assert!(init.is_none() && test.is_none() && update.is_none());
    }

    #[test]
    fn missing_initializer_reports_error_at_semicolon() {
        let (_, errors) = parse(tokenize("let x = ;").unwrap());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].location.column, 9);
        assert!(errors[0].message.contains("expression"));
    }

    #[test]
    fn recovery_reports_multiple_errors() {
        let (program, errors) = parse(tokenize("let = 1;\nlet y = 2;\nlet z = ;\n").unwrap());
        assert_eq!(errors.len(), 2);
        // The well-formed middle statement still parsed.
        assert!(program
            .body
            .iter()
            .any(|s| matches!(s, Stmt::VariableDeclaration { id, .. } if id.name == "y")));
    }

    #[test]
    fn node_locations_point_into_source() {
        let program = parse_ok("let x = 1;\nprint(x);");
        assert_eq!(program.body[0].location().line, 1);
        assert_eq!(program.body[1].location().line, 2);
    }

    #[test]
    fn invalid_assignment_target_is_rejected() {
        let (_, errors) = parse(tokenize("1 = 2;").unwrap());
        assert!(!errors.is_empty());
        assert!(errors[0].message.contains("assignment"));
    }
}
