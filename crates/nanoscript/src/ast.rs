//! Abstract syntax tree for NanoScript.
//!
//! The node set is closed: every construct the parser can produce is one of
//! the variants below, and every consumer (optimizer, code generator, JSON
//! dump) dispatches with a single match arm per variant. Nodes carry their
//! source [`Location`] so that later stages can report errors against the
//! original text after the tokens are gone.
//!
//! The `serde` derives produce the `.ast.json` form: each node is an object
//! with a `type` discriminator matching the variant name.

use std::fmt;

use serde::Serialize;

use crate::error::Location;
use crate::value::Value;

/// A whole source file: a sequence of top-level statements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
    pub body: Vec<Stmt>,
}

/// A name together with where it appeared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identifier {
    pub name: String,
    pub location: Location,
}

impl Identifier {
    pub fn new(name: impl Into<String>, location: Location) -> Self {
        Self {
            name: name.into(),
            location,
        }
    }
}

/// A literal constant in source text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LiteralValue {
    Number(f64),
    Str(String),
    Bool(bool),
}

impl LiteralValue {
    /// Truthiness of the literal, matching runtime [`Value`] truthiness.
    pub fn is_truthy(&self) -> bool {
        self.to_value().is_truthy()
    }

    /// The runtime value this literal denotes.
    pub fn to_value(&self) -> Value {
        match self {
            LiteralValue::Number(n) => Value::Number(*n),
            LiteralValue::Str(s) => Value::Str(s.clone()),
            LiteralValue::Bool(b) => Value::Bool(*b),
        }
    }
}

/// Binary operators, in source notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Mod,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "&&")]
    And,
    #[serde(rename = "||")]
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        f.write_str(symbol)
    }
}

/// Expression nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Expr {
    #[serde(rename = "BinaryExpression")]
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
        location: Location,
    },
    #[serde(rename = "CallExpression")]
    Call {
        callee: Identifier,
        arguments: Vec<Expr>,
        location: Location,
    },
    #[serde(rename = "AssignmentExpression")]
    Assignment {
        target: Identifier,
        value: Box<Expr>,
        location: Location,
    },
    #[serde(rename = "Identifier")]
    Identifier { name: String, location: Location },
    #[serde(rename = "Literal")]
    Literal {
        value: LiteralValue,
        location: Location,
    },
}

impl Expr {
    pub fn location(&self) -> Location {
        match self {
            Expr::Binary { location, .. }
            | Expr::Call { location, .. }
            | Expr::Assignment { location, .. }
            | Expr::Identifier { location, .. }
            | Expr::Literal { location, .. } => *location,
        }
    }

    /// The literal this expression is, if it is one.
    pub fn literal_value(&self) -> Option<&LiteralValue> {
        match self {
            Expr::Literal { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn number(n: f64, location: Location) -> Expr {
        Expr::Literal {
            value: LiteralValue::Number(n),
            location,
        }
    }
}

/// Statement nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Stmt {
    VariableDeclaration {
        id: Identifier,
        init: Option<Expr>,
        location: Location,
    },
    FunctionDeclaration {
        name: Identifier,
        params: Vec<Identifier>,
        body: Vec<Stmt>,
        location: Location,
    },
    IfStatement {
        condition: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
        location: Location,
    },
    WhileStatement {
        condition: Expr,
        body: Box<Stmt>,
        location: Location,
    },
    ForStatement {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
        location: Location,
    },
    ReturnStatement {
        argument: Option<Expr>,
        location: Location,
    },
    BlockStatement {
        body: Vec<Stmt>,
        location: Location,
    },
    ExpressionStatement {
        expression: Expr,
        location: Location,
    },
}

impl Stmt {
    pub fn location(&self) -> Location {
        match self {
            Stmt::VariableDeclaration { location, .. }
            | Stmt::FunctionDeclaration { location, .. }
            | Stmt::IfStatement { location, .. }
            | Stmt::WhileStatement { location, .. }
            | Stmt::ForStatement { location, .. }
            | Stmt::ReturnStatement { location, .. }
            | Stmt::BlockStatement { location, .. }
            | Stmt::ExpressionStatement { location, .. } => *location,
        }
    }
}
