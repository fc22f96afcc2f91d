//! AQL lexer
//!
//! Whitespace separates tokens and is otherwise ignored. Identifiers start
//! with a letter or `_` and continue with letters, digits, `.`, `_` and `-`.
//! A digit, or `-` directly followed by a digit, starts a numeric literal
//! that continues with identifier characters; it is reported as `Ident` and
//! coerced by the parser. Strings are double-quoted with no escapes.

use std::iter::Peekable;
use std::str::CharIndices;

use crate::token::{Token, TokenType};

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || c == '-'
}

/// Streaming tokenizer over a query string
pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    /// Create a lexer positioned at the start of `input`
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some((_, ' ' | '\t' | '\n' | '\r'))) {
            self.chars.next();
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    /// Consume identifier characters after the one at `start`
    fn read_identifier(&mut self, start: usize, first: char) -> &'a str {
        let mut end = start + first.len_utf8();
        while let Some(&(idx, c)) = self.chars.peek() {
            if !is_ident_continue(c) {
                break;
            }
            self.chars.next();
            end = idx + c.len_utf8();
        }
        &self.input[start..end]
    }

    fn read_string(&mut self, quote: usize) -> Token {
        for (idx, c) in self.chars.by_ref() {
            if c == '"' {
                return Token::new(TokenType::String, &self.input[quote + 1..idx]);
            }
        }
        Token::new(TokenType::Illegal, "")
    }

    /// Produce the next token; `Eof` forever once input is exhausted
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let Some((pos, ch)) = self.chars.next() else {
            return Token::new(TokenType::Eof, "");
        };

        let single = |kind| Token::new(kind, ch.to_string());
        match ch {
            '=' => single(TokenType::Equals),
            '<' => single(TokenType::Less),
            '>' => single(TokenType::Greater),
            '^' => single(TokenType::Prefix),
            '$' => single(TokenType::Skip),
            '(' => single(TokenType::LParen),
            ')' => single(TokenType::RParen),
            '{' => single(TokenType::LBrace),
            '}' => single(TokenType::RBrace),
            ',' => single(TokenType::Comma),
            '?' => single(TokenType::Param),
            '&' => {
                if self.peek_char() == Some('&') {
                    self.chars.next();
                    Token::new(TokenType::And, "&&")
                } else {
                    single(TokenType::And)
                }
            }
            '"' => self.read_string(pos),
            c if is_ident_start(c) || c.is_ascii_digit() => {
                Token::new(TokenType::Ident, self.read_identifier(pos, c))
            }
            '-' if self.peek_char().is_some_and(|c| c.is_ascii_digit()) => {
                Token::new(TokenType::Ident, self.read_identifier(pos, ch))
            }
            other => Token::new(TokenType::Illegal, other.to_string()),
        }
    }
}

/// Tokenize the whole input, including the trailing `Eof`
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token();
        let done = tok.kind == TokenType::Eof;
        tokens.push(tok);
        if done {
            return tokens;
        }
    }
}
