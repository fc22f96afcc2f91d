//! AQL tokens

use std::fmt;

/// Token kinds produced by the [`Lexer`](crate::Lexer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    /// Unrecognized character or unterminated string
    Illegal,
    /// End of input
    Eof,
    /// Identifier or bare literal (`Book`, `val.title`, `42`, `true`)
    Ident,
    /// `=`
    Equals,
    /// `<`
    Less,
    /// `>`
    Greater,
    /// `^`
    Prefix,
    /// `$`
    Skip,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// Double-quoted string; the literal excludes the quotes
    String,
    /// `,`
    Comma,
    /// `?`
    Param,
    /// `&` or `&&`
    And,
}

impl TokenType {
    /// Upper-case token name used in error messages
    pub fn name(self) -> &'static str {
        match self {
            TokenType::Illegal => "ILLEGAL",
            TokenType::Eof => "EOF",
            TokenType::Ident => "IDENT",
            TokenType::Equals => "EQUALS",
            TokenType::Less => "LESS",
            TokenType::Greater => "GREATER",
            TokenType::Prefix => "PREFIX",
            TokenType::Skip => "SKIP",
            TokenType::LParen => "LPAREN",
            TokenType::RParen => "RPAREN",
            TokenType::LBrace => "LBRACE",
            TokenType::RBrace => "RBRACE",
            TokenType::String => "STRING",
            TokenType::Comma => "COMMA",
            TokenType::Param => "PARAM",
            TokenType::And => "AND",
        }
    }

    /// True for `=`, `<`, `>` and `^`
    pub fn is_operator(self) -> bool {
        matches!(
            self,
            TokenType::Equals | TokenType::Less | TokenType::Greater | TokenType::Prefix
        )
    }

    /// True for filter separators (`,`, `&`, `&&`)
    pub fn is_separator(self) -> bool {
        matches!(self, TokenType::Comma | TokenType::And)
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A token with its source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Kind
    pub kind: TokenType,
    /// Source text (string contents without quotes)
    pub literal: String,
}

impl Token {
    /// Create a token
    pub fn new(kind: TokenType, literal: impl Into<String>) -> Self {
        Self {
            kind,
            literal: literal.into(),
        }
    }
}
