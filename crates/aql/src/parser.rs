//! AQL parser
//!
//! Recursive descent over the token stream:
//!
//! ```text
//! Query    := IDENT Filter? Nested?
//! Filter   := '(' ( Sep* IDENT ( Op Value ('$' Value)? )? )* Sep* ')'
//! Nested   := '{' Query* '}'          # other tokens inside braces are skipped
//! Sep      := ',' | '&' | '&&'
//! Op       := '=' | '<' | '>' | '^'
//! Value    := IDENT | STRING | '?'
//! ```
//!
//! Parameters are bound in two passes: the first pass parses without values
//! and counts `?` placeholders, the second substitutes values positionally.
//! Extra values are ignored.

use std::str::FromStr;

use apogy_core::Value;

use crate::error::ParseError;
use crate::lexer::Lexer;
use crate::query::{Condition, Predicate, Query};
use crate::token::{Token, TokenType};

type Result<T> = std::result::Result<T, ParseError>;

/// Coerce a bare literal: `true`/`false`, then a number, else a string
pub fn coerce_literal(literal: &str) -> Value {
    match literal {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => match literal.parse::<f64>() {
            Ok(n) => Value::Float(n),
            Err(_) => Value::String(literal.to_string()),
        },
    }
}

/// Single-pass parser; use [`parse`] for parameter binding
pub struct Parser<'a, 'p> {
    lexer: Lexer<'a>,
    cur: Token,
    /// `None` while only counting placeholders
    params: Option<&'p [Value]>,
    param_index: usize,
}

impl<'a, 'p> Parser<'a, 'p> {
    /// Create a parser; `params = None` counts placeholders without binding
    pub fn new(input: &'a str, params: Option<&'p [Value]>) -> Self {
        let mut lexer = Lexer::new(input);
        let cur = lexer.next_token();
        Self {
            lexer,
            cur,
            params,
            param_index: 0,
        }
    }

    /// Number of placeholders consumed so far
    pub fn param_count(&self) -> usize {
        self.param_index
    }

    fn next_token(&mut self) {
        self.cur = self.lexer.next_token();
    }

    fn take_literal(&mut self) -> String {
        let literal = std::mem::take(&mut self.cur.literal);
        self.next_token();
        literal
    }

    /// Parse one query starting at the current token
    ///
    /// # Errors
    ///
    /// Returns the first syntax error encountered.
    pub fn parse_query(&mut self) -> Result<Query> {
        if self.cur.kind != TokenType::Ident {
            return Err(ParseError::ExpectedIdent(self.cur.kind));
        }
        let mut query = Query::new(self.take_literal());

        if self.cur.kind == TokenType::LParen {
            query.filter = self.parse_filter()?;
        }
        if self.cur.kind == TokenType::LBrace {
            query.links = self.parse_nested()?;
        }
        Ok(query)
    }

    fn parse_filter(&mut self) -> Result<Vec<Condition>> {
        self.next_token(); // (
        let mut conditions = Vec::new();

        while self.cur.kind != TokenType::RParen && self.cur.kind != TokenType::Eof {
            while self.cur.kind.is_separator() {
                self.next_token();
            }
            if self.cur.kind == TokenType::RParen {
                break;
            }
            if self.cur.kind != TokenType::Ident {
                return Err(ParseError::ExpectedFilterKey(self.cur.kind));
            }
            let key = self.take_literal();

            if matches!(self.cur.kind, TokenType::RParen | TokenType::Ident)
                || self.cur.kind.is_separator()
            {
                conditions.push(Condition::new(key, Predicate::Present));
                continue;
            }

            let op = self.cur.kind;
            if !op.is_operator() {
                return Err(ParseError::ExpectedOperator(op));
            }
            self.next_token();
            let value = self.parse_value()?;

            let predicate = match op {
                TokenType::Less => Predicate::Less(value),
                TokenType::Greater => Predicate::Greater(value),
                TokenType::Prefix => Predicate::Prefix { value, skip: None },
                _ => Predicate::Equal(value),
            };
            let predicate = if self.cur.kind == TokenType::Skip {
                let Predicate::Prefix { value, .. } = predicate else {
                    return Err(ParseError::SkipWithoutPrefix);
                };
                self.next_token();
                Predicate::Prefix {
                    value,
                    skip: Some(self.parse_value()?),
                }
            } else {
                predicate
            };
            conditions.push(Condition::new(key, predicate));
        }

        if self.cur.kind != TokenType::RParen {
            return Err(ParseError::UnclosedFilter);
        }
        self.next_token();
        Ok(conditions)
    }

    fn parse_value(&mut self) -> Result<Value> {
        let value = match self.cur.kind {
            TokenType::Param => {
                let index = self.param_index;
                self.param_index += 1;
                match self.params {
                    None => Value::Null,
                    Some(params) => {
                        params
                            .get(index)
                            .cloned()
                            .ok_or(ParseError::NotEnoughParameters {
                                expected: index + 1,
                                provided: params.len(),
                            })?
                    }
                }
            }
            TokenType::Ident => coerce_literal(&self.cur.literal),
            TokenType::String => Value::String(self.cur.literal.clone()),
            other => return Err(ParseError::ExpectedValue(other)),
        };
        self.next_token();
        Ok(value)
    }

    fn parse_nested(&mut self) -> Result<Vec<Query>> {
        self.next_token(); // {
        let mut links = Vec::new();

        while self.cur.kind != TokenType::RBrace && self.cur.kind != TokenType::Eof {
            if self.cur.kind != TokenType::Ident {
                self.next_token();
                continue;
            }
            links.push(self.parse_query()?);
        }

        if self.cur.kind != TokenType::RBrace {
            return Err(ParseError::UnclosedNested);
        }
        self.next_token();
        Ok(links)
    }
}

/// Parse `input`, binding `?` placeholders to `params` in order
///
/// # Errors
///
/// Any syntax error, or [`ParseError::NotEnoughParameters`] when `input` has
/// more placeholders than `params` has values.
pub fn parse(input: &str, params: &[Value]) -> Result<Query> {
    let mut counting = Parser::new(input, None);
    counting.parse_query()?;

    let expected = counting.param_count();
    if expected > params.len() {
        return Err(ParseError::NotEnoughParameters {
            expected,
            provided: params.len(),
        });
    }

    Parser::new(input, Some(params)).parse_query()
}

impl FromStr for Query {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self> {
        parse(s, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_literal_order() {
        assert_eq!(coerce_literal("true"), Value::Bool(true));
        assert_eq!(coerce_literal("false"), Value::Bool(false));
        assert_eq!(coerce_literal("42"), Value::Float(42.0));
        assert_eq!(coerce_literal("-2.5"), Value::Float(-2.5));
        assert_eq!(coerce_literal("Dune"), Value::from("Dune"));
        assert_eq!(coerce_literal("True"), Value::from("True"));
    }

    #[test]
    fn test_counting_pass_does_not_bind() {
        let mut p = Parser::new("B(a=? b=? c=1)", None);
        let q = p.parse_query().unwrap();
        assert_eq!(p.param_count(), 2);
        assert_eq!(q.filter[0].predicate, Predicate::Equal(Value::Null));
    }

    #[test]
    fn test_skip_after_non_prefix_is_rejected() {
        assert_eq!(
            parse("B(a=\"x\"$\"y\")", &[]),
            Err(ParseError::SkipWithoutPrefix)
        );
    }

    #[test]
    fn test_trailing_separators_allowed() {
        let q = parse("B(a=1,, b &&)", &[]).unwrap();
        assert_eq!(q.filter.len(), 2);
        assert_eq!(q.filter[1].predicate, Predicate::Present);
    }

    #[test]
    fn test_from_str() {
        let q: Query = "B(a)".parse().unwrap();
        assert_eq!(q.model, "B");
    }
}
