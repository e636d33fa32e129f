//! Tokenizer for NanoScript source text.
//!
//! Scans a source string into a flat token stream with 1-based line/column
//! locations, ending in a single [`TokenKind::Eof`]. Whitespace and both
//! comment forms (`// line`, `/* block */`) are consumed and discarded.
//! Multi-character operators use longest match, so `==` wins over `=` and
//! `<=` over `<`.

use crate::error::{CompileError, Location};

/// The kind of a lexed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Literals and names
    Number,
    Str,
    Identifier,

    // Keywords
    Let,
    Function,
    If,
    Else,
    While,
    For,
    Return,
    True,
    False,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    EqEq,
    NotEq,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    AndAnd,
    OrOr,

    // Punctuation
    Semicolon,
    Comma,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,

    Eof,
}

impl TokenKind {
    /// Whether this token can begin a statement. Used by the parser's
    /// panic-mode recovery to find a resynchronization point.
    pub fn starts_statement(self) -> bool {
        matches!(
            self,
            TokenKind::Let
                | TokenKind::Function
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return
                | TokenKind::LeftBrace
        )
    }
}

/// A single token: its kind, the raw lexeme, and where it starts.
///
/// For string literals the lexeme holds the *decoded* contents (escapes
/// resolved, quotes stripped); for everything else it is the source slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub location: Location,
}

impl Token {
    fn new(kind: TokenKind, lexeme: impl Into<String>, location: Location) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            location,
        }
    }
}

/// Tokenize a complete source string.
///
/// Returns the token stream (terminated by `Eof`) or the first lexical
/// error: an unterminated string or block comment, or an unexpected
/// character.
pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            break;
        }
    }
    tracing::debug!(tokens = tokens.len(), "lexing finished");
    Ok(tokens)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn location(&self) -> Location {
        Location::new(self.line, self.column)
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_whitespace_and_comments()?;

        let location = self.location();
        let Some(c) = self.peek() else {
            return Ok(Token::new(TokenKind::Eof, "", location));
        };

        if c.is_ascii_digit() {
            return Ok(self.number(location));
        }
        if c == '"' || c == '\'' {
            return self.string(location);
        }
        if c.is_ascii_alphabetic() || c == '_' {
            return Ok(self.identifier_or_keyword(location));
        }
        self.operator_or_punctuation(location)
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), CompileError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_next() == Some('*') => {
                    let start = self.location();
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            Some('*') if self.peek_next() == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                            None => {
                                return Err(CompileError::syntax(
                                    "unterminated block comment",
                                    start,
                                ));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn number(&mut self, location: Location) -> Token {
        let mut lexeme = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                lexeme.push(c);
                self.advance();
            } else {
                break;
            }
        }
        // Fractional part only when a digit follows the dot, so `1.foo`
        // still lexes as `1` `.` (and the `.` is then an unexpected char).
        if self.peek() == Some('.')
            && self.peek_next().is_some_and(|c| c.is_ascii_digit())
        {
            lexeme.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    lexeme.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let location = Location::with_length(location.line, location.column, lexeme.len());
        Token::new(TokenKind::Number, lexeme, location)
    }

    fn string(&mut self, location: Location) -> Result<Token, CompileError> {
        let quote = self.advance().unwrap_or('"');
        let mut value = String::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some('\'') => value.push('\''),
                    Some(other) => {
                        return Err(CompileError::syntax(
                            format!("unknown escape sequence '\\{other}'"),
                            location,
                        ));
                    }
                    None => {
                        return Err(CompileError::syntax("unterminated string literal", location));
                    }
                },
                Some('\n') | None => {
                    return Err(CompileError::syntax("unterminated string literal", location));
                }
                Some(c) => value.push(c),
            }
        }
        let location = Location::with_length(location.line, location.column, value.len() + 2);
        Ok(Token::new(TokenKind::Str, value, location))
    }

    fn identifier_or_keyword(&mut self, location: Location) -> Token {
        let mut lexeme = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                lexeme.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = match lexeme.as_str() {
            "let" => TokenKind::Let,
            "function" => TokenKind::Function,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Identifier,
        };
        let location = Location::with_length(location.line, location.column, lexeme.len());
        Token::new(kind, lexeme, location)
    }

    fn operator_or_punctuation(&mut self, location: Location) -> Result<Token, CompileError> {
        let c = self.advance().unwrap_or('\0');
        let two = |lexer: &mut Lexer, kind, lexeme: &str| {
            lexer.advance();
            Ok(Token::new(
                kind,
                lexeme,
                Location::with_length(location.line, location.column, 2),
            ))
        };
        let one = |kind, lexeme: &str| {
            Ok(Token::new(
                kind,
                lexeme,
                Location::with_length(location.line, location.column, 1),
            ))
        };
        match c {
            '+' => one(TokenKind::Plus, "+"),
            '-' => one(TokenKind::Minus, "-"),
            '*' => one(TokenKind::Star, "*"),
            '/' => one(TokenKind::Slash, "/"),
            '%' => one(TokenKind::Percent, "%"),
            '=' if self.peek() == Some('=') => two(self, TokenKind::EqEq, "=="),
            '=' => one(TokenKind::Assign, "="),
            '!' if self.peek() == Some('=') => two(self, TokenKind::NotEq, "!="),
            '<' if self.peek() == Some('=') => two(self, TokenKind::LessEq, "<="),
            '<' => one(TokenKind::Less, "<"),
            '>' if self.peek() == Some('=') => two(self, TokenKind::GreaterEq, ">="),
            '>' => one(TokenKind::Greater, ">"),
            '&' if self.peek() == Some('&') => two(self, TokenKind::AndAnd, "&&"),
            '|' if self.peek() == Some('|') => two(self, TokenKind::OrOr, "||"),
            ';' => one(TokenKind::Semicolon, ";"),
            ',' => one(TokenKind::Comma, ","),
            '(' => one(TokenKind::LeftParen, "("),
            ')' => one(TokenKind::RightParen, ")"),
            '{' => one(TokenKind::LeftBrace, "{"),
            '}' => one(TokenKind::RightBrace, "}"),
            other => Err(CompileError::syntax(
                format!("unexpected character '{other}'"),
                location,
            )),
        }
    }
}
