//! AQL parse errors

use thiserror::Error;

use crate::token::TokenType;

/// Errors produced while parsing a query
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A query must start with a model identifier
    #[error("expected identifier, got {0}")]
    ExpectedIdent(TokenType),

    /// Filter entries start with a key
    #[error("expected identifier in filter, got {0}")]
    ExpectedFilterKey(TokenType),

    /// A key was followed by something other than an operator
    #[error("expected =, <, >, or ^ in filter, got {0}")]
    ExpectedOperator(TokenType),

    /// An operator was followed by something other than a value
    #[error("expected identifier, string, or parameter placeholder as value, got {0}")]
    ExpectedValue(TokenType),

    /// `$` used after an operator other than `^`
    #[error("skip ($) is only allowed after a prefix (^) filter")]
    SkipWithoutPrefix,

    /// Filter list not closed
    #[error("expected )")]
    UnclosedFilter,

    /// Nested query list not closed
    #[error("expected }}")]
    UnclosedNested,

    /// Fewer values than placeholders
    #[error("query contains {expected} parameter placeholders but only {provided} values were provided")]
    NotEnoughParameters {
        /// Placeholders in the query
        expected: usize,
        /// Values supplied
        provided: usize,
    },
}

impl From<ParseError> for apogy_core::Error {
    fn from(e: ParseError) -> Self {
        apogy_core::Error::Validation(format!("invalid query: {}", e))
    }
}
