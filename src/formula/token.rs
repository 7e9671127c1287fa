// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Tokens produced by the formula lexer.

#[derive(Debug, PartialEq, Clone)]
pub(crate) enum Token {
    // Literals
    Number(f64),
    String(String),
    Boolean(bool),
    Identifier(String),

    // Operators
    Plus,
    Minus,
    Asterisk,
    Slash,
    Caret,
    Equals,
    NotEqual,
    LessThan,
    GreaterThan,
    LessEqual,
    GreaterEqual,

    // Delimiters
    LParen,
    RParen,
    Comma,

    Eof,
    Illegal(char),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "\"{}\"", s),
            Token::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Token::Identifier(s) => write!(f, "{}", s),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Asterisk => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Caret => write!(f, "^"),
            Token::Equals => write!(f, "="),
            Token::NotEqual => write!(f, "<>"),
            Token::LessThan => write!(f, "<"),
            Token::GreaterThan => write!(f, ">"),
            Token::LessEqual => write!(f, "<="),
            Token::GreaterEqual => write!(f, ">="),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Eof => write!(f, "end of formula"),
            Token::Illegal(c) => write!(f, "illegal character `{}`", c),
        }
    }
}
