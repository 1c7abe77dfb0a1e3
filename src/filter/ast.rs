//! Typed expression tree for filter predicates.
//!
//! The tree is deliberately small: literals, field references, `not`,
//! n-ary `and`/`or`, and a single comparison node. Evaluation targets are
//! decoupled from the tree through [`ExprVisitor`], so an in-memory
//! evaluator and an index-pushdown backend can share the same front end.

use std::fmt;

/// A message attribute addressable from filter text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Class,
    Instance,
    Recipient,
    Sender,
    Opcode,
    Signature,
    Body,
}

impl Field {
    /// Resolve an identifier through the field map. Each canonical field
    /// has a long name and a three-letter abbreviation.
    pub fn from_ident(ident: &str) -> Option<Field> {
        match ident {
            "class_" | "cla" => Some(Field::Class),
            "instance" | "ins" => Some(Field::Instance),
            "recipient" | "rec" => Some(Field::Recipient),
            "sender" | "sen" => Some(Field::Sender),
            "opcode" | "opc" => Some(Field::Opcode),
            "signature" | "sig" => Some(Field::Signature),
            "body" | "bod" => Some(Field::Body),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Class => "class",
            Field::Instance => "instance",
            Field::Recipient => "recipient",
            Field::Sender => "sender",
            Field::Opcode => "opcode",
            Field::Signature => "signature",
            Field::Body => "body",
        };
        write!(f, "{}", name)
    }
}

/// Boolean connective for n-ary chains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

/// Comparison operator. `Glob`/`NotGlob` perform case-insensitive
/// glob-style matching; everything else compares stored values directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Glob,
    NotGlob,
}

/// Literal operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Literal {
    Int(i64),
    Str(String),
}

/// A filter expression node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Literal(Literal),
    Field(Field),
    Not(Box<Expr>),
    Bool { op: BoolOp, operands: Vec<Expr> },
    Compare { op: CmpOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

impl Expr {
    pub fn str_lit(s: impl Into<String>) -> Expr {
        Expr::Literal(Literal::Str(s.into()))
    }

    pub fn compare(op: CmpOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn and(operands: Vec<Expr>) -> Expr {
        Expr::Bool { op: BoolOp::And, operands }
    }

    pub fn or(operands: Vec<Expr>) -> Expr {
        Expr::Bool { op: BoolOp::Or, operands }
    }

    /// Dispatch to a visitor.
    pub fn accept<V: ExprVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Expr::Literal(lit) => visitor.visit_literal(lit),
            Expr::Field(field) => visitor.visit_field(*field),
            Expr::Not(inner) => visitor.visit_not(inner),
            Expr::Bool { op, operands } => visitor.visit_bool(*op, operands),
            Expr::Compare { op, lhs, rhs } => visitor.visit_compare(*op, lhs, rhs),
        }
    }
}

/// Compilation target for expression trees.
pub trait ExprVisitor {
    type Output;

    fn visit_literal(&mut self, literal: &Literal) -> Self::Output;
    fn visit_field(&mut self, field: Field) -> Self::Output;
    fn visit_not(&mut self, inner: &Expr) -> Self::Output;
    fn visit_bool(&mut self, op: BoolOp, operands: &[Expr]) -> Self::Output;
    fn visit_compare(&mut self, op: CmpOp, lhs: &Expr, rhs: &Expr) -> Self::Output;
}
