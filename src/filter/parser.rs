//! Lexer and recursive-descent parser for filter expression text.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! expr    := and_expr ( "or" and_expr )*
//! and_expr:= not_expr ( "and" not_expr )*
//! not_expr:= "not" not_expr | cmp_expr
//! cmp_expr:= primary [ cmp_op primary ]
//! primary := INT | STRING | FIELD | "(" expr ")"
//! cmp_op  := "=" | "==" | "!=" | "<" | "<=" | ">" | ">=" | "is" | "is-not"
//! ```
//!
//! Chained comparisons (`a < b < c`) are rejected.

use super::ast::{CmpOp, Expr, Field, Literal};
use super::CompileError;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Int(i64),
    Str(String),
    Word(String),
    Cmp(CmpOp),
    LParen,
    RParen,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    source: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            source,
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '(' => {
                    self.chars.next();
                    tokens.push(Token::LParen);
                }
                ')' => {
                    self.chars.next();
                    tokens.push(Token::RParen);
                }
                '"' | '\'' => tokens.push(self.string_literal()?),
                '0'..='9' => tokens.push(self.int_literal(false)?),
                '-' => {
                    self.chars.next();
                    match self.chars.peek() {
                        Some('0'..='9') => tokens.push(self.int_literal(true)?),
                        _ => {
                            return Err(CompileError::UnsupportedSyntax(
                                "bare '-' outside a signed integer".into(),
                            ))
                        }
                    }
                }
                '=' => {
                    self.chars.next();
                    // Accept both "=" and "==" for equality.
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                    }
                    tokens.push(Token::Cmp(CmpOp::Eq));
                }
                '!' => {
                    self.chars.next();
                    if self.chars.next() != Some('=') {
                        return Err(CompileError::UnsupportedSyntax("'!'".into()));
                    }
                    tokens.push(Token::Cmp(CmpOp::Ne));
                }
                '<' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::Cmp(CmpOp::Le));
                    } else {
                        tokens.push(Token::Cmp(CmpOp::Lt));
                    }
                }
                '>' => {
                    self.chars.next();
                    if self.chars.peek() == Some(&'=') {
                        self.chars.next();
                        tokens.push(Token::Cmp(CmpOp::Ge));
                    } else {
                        tokens.push(Token::Cmp(CmpOp::Gt));
                    }
                }
                c if c.is_ascii_alphabetic() || c == '_' => tokens.push(self.word()),
                other => {
                    return Err(CompileError::UnsupportedSyntax(format!(
                        "unexpected character {:?}",
                        other
                    )))
                }
            }
        }
        Ok(tokens)
    }

    fn string_literal(&mut self) -> Result<Token, CompileError> {
        let quote = self.chars.next().unwrap();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                None => {
                    return Err(CompileError::UnsupportedSyntax(format!(
                        "unterminated string in {:?}",
                        self.source
                    )))
                }
                Some(c) if c == quote => break,
                Some('\\') => match self.chars.next() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c @ ('\\' | '\'' | '"')) => value.push(c),
                    other => {
                        return Err(CompileError::UnsupportedSyntax(format!(
                            "unknown escape {:?}",
                            other
                        )))
                    }
                },
                Some(c) => value.push(c),
            }
        }
        Ok(Token::Str(value))
    }

    fn int_literal(&mut self, negative: bool) -> Result<Token, CompileError> {
        let mut digits = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        let value: i64 = digits
            .parse()
            .map_err(|_| CompileError::UnsupportedSyntax(format!("integer literal {}", digits)))?;
        Ok(Token::Int(if negative { -value } else { value }))
    }

    fn word(&mut self) -> Token {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            // '-' is allowed inside words so "is-not" lexes as one token.
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        Token::Word(word)
    }
}

pub(super) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub(super) fn parse(source: &str) -> Result<Expr, CompileError> {
        let tokens = Lexer::new(source).tokenize()?;
        if tokens.is_empty() {
            return Err(CompileError::UnsupportedSyntax("empty expression".into()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or_expr()?;
        if let Some(trailing) = parser.peek() {
            return Err(CompileError::UnsupportedSyntax(format!(
                "trailing input at {:?}",
                trailing
            )));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Word(w)) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Expr, CompileError> {
        let mut operands = vec![self.and_expr()?];
        while self.eat_word("or") {
            operands.push(self.and_expr()?);
        }
        if operands.len() == 1 {
            Ok(operands.pop().unwrap())
        } else {
            Ok(Expr::or(operands))
        }
    }

    fn and_expr(&mut self) -> Result<Expr, CompileError> {
        let mut operands = vec![self.not_expr()?];
        while self.eat_word("and") {
            operands.push(self.not_expr()?);
        }
        if operands.len() == 1 {
            Ok(operands.pop().unwrap())
        } else {
            Ok(Expr::and(operands))
        }
    }

    fn not_expr(&mut self) -> Result<Expr, CompileError> {
        if self.eat_word("not") {
            Ok(Expr::Not(Box::new(self.not_expr()?)))
        } else {
            self.cmp_expr()
        }
    }

    fn cmp_expr(&mut self) -> Result<Expr, CompileError> {
        let lhs = self.primary()?;

        let op = match self.peek() {
            Some(Token::Cmp(op)) => {
                let op = *op;
                self.pos += 1;
                op
            }
            Some(Token::Word(w)) if w == "is" => {
                self.pos += 1;
                CmpOp::Glob
            }
            Some(Token::Word(w)) if w == "is-not" => {
                self.pos += 1;
                CmpOp::NotGlob
            }
            _ => return Ok(lhs),
        };

        let rhs = self.primary()?;

        // Exactly one comparison per clause.
        let chained = match self.peek() {
            Some(Token::Cmp(_)) => true,
            Some(Token::Word(w)) => w == "is" || w == "is-not",
            _ => false,
        };
        if chained {
            return Err(CompileError::UnsupportedSyntax(
                "chained comparisons are not supported".into(),
            ));
        }

        Ok(Expr::compare(op, lhs, rhs))
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        match self.advance() {
            Some(Token::Int(v)) => Ok(Expr::Literal(Literal::Int(v))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Literal::Str(s))),
            Some(Token::Word(w)) => match Field::from_ident(&w) {
                Some(field) => Ok(Expr::Field(field)),
                None => Err(CompileError::UnknownField(w)),
            },
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(CompileError::UnsupportedSyntax(
                        "unbalanced parenthesis".into(),
                    )),
                }
            }
            other => Err(CompileError::UnsupportedSyntax(format!(
                "expected operand, found {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ast::BoolOp;

    #[test]
    fn test_simple_comparison() {
        let expr = Parser::parse("cla is \"help\"").unwrap();
        assert_eq!(
            expr,
            Expr::compare(CmpOp::Glob, Expr::Field(Field::Class), Expr::str_lit("help"))
        );
    }

    #[test]
    fn test_equality_spellings() {
        let single = Parser::parse("opc = 'auto'").unwrap();
        let double = Parser::parse("opc == 'auto'").unwrap();
        assert_eq!(single, double);
    }

    #[test]
    fn test_is_not_is_one_token() {
        let expr = Parser::parse("sen is-not 'bot-*'").unwrap();
        assert_eq!(
            expr,
            Expr::compare(
                CmpOp::NotGlob,
                Expr::Field(Field::Sender),
                Expr::str_lit("bot-*")
            )
        );
    }

    #[test]
    fn test_nary_bool_chain() {
        let expr = Parser::parse("cla is 'a' or cla is 'b' or cla is 'c'").unwrap();
        match expr {
            Expr::Bool { op: BoolOp::Or, operands } => assert_eq!(operands.len(), 3),
            other => panic!("expected or-chain, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_not_binds_tighter_than_and() {
        let expr = Parser::parse("not cla is 'x' and ins is 'y'").unwrap();
        match expr {
            Expr::Bool { op: BoolOp::And, operands } => {
                assert!(matches!(operands[0], Expr::Not(_)));
            }
            other => panic!("expected and, got {:?}", other),
        }
    }

    #[test]
    fn test_parenthesized_grouping() {
        let expr = Parser::parse("not (cla is 'x' or cla is 'y')").unwrap();
        assert!(matches!(expr, Expr::Not(_)));
    }

    #[test]
    fn test_negative_int_literal() {
        let expr = Parser::parse("bod > -12").unwrap();
        assert_eq!(
            expr,
            Expr::compare(
                CmpOp::Gt,
                Expr::Field(Field::Body),
                Expr::Literal(Literal::Int(-12))
            )
        );
    }

    #[test]
    fn test_unknown_field() {
        match Parser::parse("zsig is 'x'") {
            Err(CompileError::UnknownField(name)) => assert_eq!(name, "zsig"),
            other => panic!("expected UnknownField, got {:?}", other),
        }
    }

    #[test]
    fn test_chained_comparison_rejected() {
        assert!(matches!(
            Parser::parse("1 < bod < 3"),
            Err(CompileError::UnsupportedSyntax(_))
        ));
    }

    #[test]
    fn test_empty_and_trailing_input() {
        assert!(matches!(
            Parser::parse(""),
            Err(CompileError::UnsupportedSyntax(_))
        ));
        assert!(matches!(
            Parser::parse("cla is 'x' ins"),
            Err(CompileError::UnsupportedSyntax(_))
        ));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            Parser::parse("cla is 'oops"),
            Err(CompileError::UnsupportedSyntax(_))
        ));
    }
}
