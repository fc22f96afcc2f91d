//! AQL: the Apogy query language
//!
//! A compact textual form of search requests:
//!
//! ```text
//! com.example.Book(val.author="Herbert" val.year>1960 val.title^"Du") { com.example.Author }
//! ```
//!
//! - [`Lexer`] / [`tokenize`]: text to [`Token`]s
//! - [`parse`]: tokens to a [`Query`], binding `?` placeholders
//! - `Display for Query`: back to canonical AQL
//! - [`Query::to_search_request`]: a `SearchRequest` for the search evaluator

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod convert;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod query;
pub mod token;

pub use error::ParseError;
pub use lexer::{tokenize, Lexer};
pub use parser::{coerce_literal, parse, Parser};
pub use query::{Condition, Predicate, Query};
pub use token::{Token, TokenType};
