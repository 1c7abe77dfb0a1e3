//! Filter compilation and derived filters.
//!
//! A [`Filter`] is a named, immutable predicate over message attributes.
//! Parsed filters come from user-supplied expression text; related filters
//! are derived from a concrete reference message; negation wraps any
//! filter. The anonymous nop filter matches everything.

pub mod ast;
mod eval;
mod glob;
mod parser;

use crate::types::{Zephyrgram, PERSONAL_CLASS};
use ast::{CmpOp, Expr, Field};
use eval::Evaluator;
use thiserror::Error;

pub use glob::glob_match_ci;

/// Filter compilation failure, surfaced to the caller as a user-facing
/// message. Both variants carry the offending fragment.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("unsupported syntax: {0}")]
    UnsupportedSyntax(String),
}

#[derive(Clone, Debug)]
enum Compiled {
    /// Matches every message.
    Nop,
    /// Compiled expression tree.
    Expr(Expr),
    /// Inverts the wrapped predicate.
    Negation(Box<Compiled>),
}

impl Compiled {
    fn matches(&self, gram: &Zephyrgram) -> bool {
        match self {
            Compiled::Nop => true,
            Compiled::Expr(expr) => Evaluator::matches(gram, expr),
            Compiled::Negation(inner) => !inner.matches(gram),
        }
    }
}

/// A named, immutable predicate over message attributes.
///
/// Compiling the same source or reference always yields an equivalent
/// predicate; a filter holds no mutable state.
#[derive(Clone, Debug)]
pub struct Filter {
    name: Option<String>,
    compiled: Compiled,
}

impl Filter {
    /// The anonymous filter that matches every message.
    pub fn nop() -> Filter {
        Filter {
            name: None,
            compiled: Compiled::Nop,
        }
    }

    /// Compile user-supplied expression text. The filter's name is the
    /// original source text.
    pub fn compile(text: &str) -> Result<Filter, CompileError> {
        let expr = parser::Parser::parse(text)?;
        Ok(Filter {
            name: Some(text.to_string()),
            compiled: Compiled::Expr(expr),
        })
    }

    /// Derive a filter matching messages related to `reference`.
    ///
    /// For a personal reference this matches the same conversation: class
    /// `"message"` and the conversation counterpart on either end. The
    /// counterpart is the reference's recipient when the reference was sent
    /// by `principal` (or has no sender), otherwise its sender.
    ///
    /// For a broadcast reference this matches the same class, narrowed to
    /// messages whose instance contains the reference's instance unless
    /// `class_only` is set.
    pub fn related(reference: &Zephyrgram, class_only: bool, principal: &str) -> Filter {
        if reference.is_personal() {
            let counterpart = match &reference.sender {
                Some(sender) if !sender.eq_ignore_ascii_case(principal) => sender.clone(),
                _ => reference.recipient.clone().unwrap_or_default(),
            };

            let expr = Expr::and(vec![
                Expr::compare(
                    CmpOp::Glob,
                    Expr::Field(Field::Class),
                    Expr::str_lit(PERSONAL_CLASS),
                ),
                Expr::or(vec![
                    Expr::compare(
                        CmpOp::Glob,
                        Expr::Field(Field::Sender),
                        Expr::str_lit(counterpart.clone()),
                    ),
                    Expr::compare(
                        CmpOp::Glob,
                        Expr::Field(Field::Recipient),
                        Expr::str_lit(counterpart.clone()),
                    ),
                ]),
            ]);

            Filter {
                name: Some(format!("conversation with {}", counterpart)),
                compiled: Compiled::Expr(expr),
            }
        } else if class_only {
            let expr = Expr::compare(
                CmpOp::Glob,
                Expr::Field(Field::Class),
                Expr::str_lit(reference.class.clone()),
            );
            Filter {
                name: Some(format!("class {}", reference.class)),
                compiled: Compiled::Expr(expr),
            }
        } else {
            let expr = Expr::and(vec![
                Expr::compare(
                    CmpOp::Glob,
                    Expr::Field(Field::Class),
                    Expr::str_lit(reference.class.clone()),
                ),
                Expr::compare(
                    CmpOp::Glob,
                    Expr::Field(Field::Instance),
                    Expr::str_lit(format!("*{}*", reference.instance)),
                ),
            ]);
            Filter {
                name: Some(format!(
                    "class {}, instance {}",
                    reference.class, reference.instance
                )),
                compiled: Compiled::Expr(expr),
            }
        }
    }

    /// Wrap this filter in a negation.
    pub fn negate(self) -> Filter {
        let inner_name = self.name.unwrap_or_default();
        Filter {
            name: Some(format!("NOT ({})", inner_name)),
            compiled: Compiled::Negation(Box::new(self.compiled)),
        }
    }

    /// The filter's name: source text for parsed filters, a description
    /// for derived ones, absent for the nop filter.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Evaluate the predicate against a message.
    pub fn matches(&self, gram: &Zephyrgram) -> bool {
        self.compiled.matches(gram)
    }
}
