//! Lexer for the kernel language using logos
//!
//! Supports tokens like:
//! - Identifiers: A, B, matrix_name
//! - Numbers: 1, 2.5, 1e-3 (unsigned; `-` is always an operator)
//! - Operators: @, +, -, *, /, >
//! - Punctuation: (, ), [, ], ,, =, ., ;
//! - Comments: `#` to end of line

use std::ops::Range;

use logos::Logos;

use crate::error::{CompileError, CompileResult};

/// Token types for the kernel language
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"([ \t\n\r]+|#[^\n]*)")]
pub enum Token {
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[token("@")]
    MatMul,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token(">")]
    Greater,

    #[token("=")]
    Equals,

    #[token(".")]
    Dot,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token(",")]
    Comma,

    #[token(";")]
    Semicolon,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Ident(s) => write!(f, "{}", s),
            Token::MatMul => write!(f, "@"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Greater => write!(f, ">"),
            Token::Equals => write!(f, "="),
            Token::Dot => write!(f, "."),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
        }
    }
}

/// Stream of tokens with their source spans
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }

    /// Lex the whole input, failing on the first unrecognised character
    pub fn tokenize(source: &'source str) -> CompileResult<Vec<(Token, Range<usize>)>> {
        Self::new(source).collect()
    }
}

impl<'source> Iterator for Lexer<'source> {
    type Item = CompileResult<(Token, Range<usize>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.inner.next()?;
        let span = self.inner.span();
        Some(match token {
            Ok(token) => Ok((token, span)),
            Err(()) => Err(CompileError::LexerError {
                position: span.start,
                message: format!("unexpected input '{}'", self.inner.slice()),
            }),
        })
    }
}
