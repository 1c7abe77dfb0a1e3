//! In-memory evaluation backend for filter expressions.
//!
//! One [`ExprVisitor`] implementation that folds an expression tree into a
//! [`Value`] against a concrete message. A query-pushdown backend would be
//! another visitor over the same tree.

use super::ast::{BoolOp, CmpOp, Expr, ExprVisitor, Field, Literal};
use super::glob::glob_match_ci;
use crate::types::Zephyrgram;
use std::borrow::Cow;

/// Runtime value of a subexpression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) enum Value<'a> {
    Bool(bool),
    Int(i64),
    Text(Cow<'a, str>),
    /// An optional attribute with no stored value (absent sender/recipient),
    /// and the unknown result of any comparison involving one. Unknown
    /// follows NULL rules: it never satisfies a clause, and negating it
    /// stays unknown rather than flipping to true.
    Absent,
}

impl Value<'_> {
    /// Three-valued truthiness; `None` is unknown. Text follows the
    /// stored-value convention of the original backend: true only when it
    /// parses as a nonzero integer.
    fn truth(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(v) => Some(*v != 0),
            Value::Text(t) => Some(t.parse::<i64>().map(|v| v != 0).unwrap_or(false)),
            Value::Absent => None,
        }
    }

    /// Truthiness when a value stands alone as a clause.
    fn is_truthy(&self) -> bool {
        self.truth() == Some(true)
    }

    fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::Text(t) => Some(Cow::Borrowed(t.as_ref())),
            Value::Int(v) => Some(Cow::Owned(v.to_string())),
            Value::Bool(_) | Value::Absent => None,
        }
    }
}

pub(super) struct Evaluator<'a> {
    gram: &'a Zephyrgram,
}

impl<'a> Evaluator<'a> {
    pub(super) fn new(gram: &'a Zephyrgram) -> Self {
        Self { gram }
    }

    pub(super) fn matches(gram: &Zephyrgram, expr: &Expr) -> bool {
        expr.accept(&mut Evaluator::new(gram)).is_truthy()
    }

    fn field_value(&self, field: Field) -> Value<'a> {
        match field {
            Field::Class => Value::Text(Cow::Borrowed(&self.gram.class)),
            Field::Instance => Value::Text(Cow::Borrowed(&self.gram.instance)),
            Field::Opcode => Value::Text(Cow::Borrowed(&self.gram.opcode)),
            Field::Signature => Value::Text(Cow::Borrowed(self.gram.signature())),
            Field::Body => Value::Text(Cow::Borrowed(self.gram.body())),
            Field::Sender => match &self.gram.sender {
                Some(s) => Value::Text(Cow::Borrowed(s.as_str())),
                None => Value::Absent,
            },
            Field::Recipient => match &self.gram.recipient {
                Some(r) => Value::Text(Cow::Borrowed(r.as_str())),
                None => Value::Absent,
            },
        }
    }
}

/// Ordered comparison of two present values. `None` means the comparison
/// is undefined (an int compared against non-numeric text) and the clause
/// is false. Absent operands are handled before this point.
fn compare_ordering(lhs: &Value<'_>, rhs: &Value<'_>) -> Option<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::Absent, _) | (_, Value::Absent) => None,
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Text(b)) => b.parse::<i64>().ok().map(|b| a.cmp(&b)),
        (Value::Text(a), Value::Int(b)) => a.parse::<i64>().ok().map(|a| a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Some(a.as_ref().cmp(b.as_ref())),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Bool(_), _) | (_, Value::Bool(_)) => None,
    }
}

fn glob_values(lhs: &Value<'_>, rhs: &Value<'_>) -> Option<bool> {
    let text = lhs.as_text()?;
    let pattern = rhs.as_text()?;
    Some(glob_match_ci(&pattern, &text))
}

impl<'a> ExprVisitor for Evaluator<'a> {
    type Output = Value<'a>;

    fn visit_literal(&mut self, literal: &Literal) -> Value<'a> {
        match literal {
            Literal::Int(v) => Value::Int(*v),
            Literal::Str(s) => Value::Text(Cow::Owned(s.clone())),
        }
    }

    fn visit_field(&mut self, field: Field) -> Value<'a> {
        self.field_value(field)
    }

    fn visit_not(&mut self, inner: &Expr) -> Value<'a> {
        match inner.accept(self).truth() {
            None => Value::Absent,
            Some(b) => Value::Bool(!b),
        }
    }

    fn visit_bool(&mut self, op: BoolOp, operands: &[Expr]) -> Value<'a> {
        // Kleene connectives: a definite operand can decide the chain, an
        // unknown one taints whatever is left undecided.
        let mut unknown = false;
        for operand in operands {
            match (op, operand.accept(self).truth()) {
                (BoolOp::And, Some(false)) => return Value::Bool(false),
                (BoolOp::Or, Some(true)) => return Value::Bool(true),
                (_, None) => unknown = true,
                _ => {}
            }
        }
        if unknown {
            Value::Absent
        } else {
            Value::Bool(matches!(op, BoolOp::And))
        }
    }

    fn visit_compare(&mut self, op: CmpOp, lhs: &Expr, rhs: &Expr) -> Value<'a> {
        let lhs = lhs.accept(self);
        let rhs = rhs.accept(self);

        // An absent operand makes the whole comparison unknown, not false.
        if matches!(lhs, Value::Absent) || matches!(rhs, Value::Absent) {
            return Value::Absent;
        }

        let result = match op {
            CmpOp::Glob => glob_values(&lhs, &rhs).unwrap_or(false),
            CmpOp::NotGlob => glob_values(&lhs, &rhs).map(|m| !m).unwrap_or(false),
            ordered => match compare_ordering(&lhs, &rhs) {
                None => false,
                Some(ord) => match ordered {
                    CmpOp::Eq => ord.is_eq(),
                    CmpOp::Ne => ord.is_ne(),
                    CmpOp::Lt => ord.is_lt(),
                    CmpOp::Le => ord.is_le(),
                    CmpOp::Gt => ord.is_gt(),
                    CmpOp::Ge => ord.is_ge(),
                    CmpOp::Glob | CmpOp::NotGlob => unreachable!(),
                },
            },
        };

        Value::Bool(result)
    }
}
