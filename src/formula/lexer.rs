// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Scans formula text and produces a stream of [`Token`]s.
//!
//! Identifiers keep their case, because formula names are matched exactly.
//! Names containing spaces can be written in single quotes: `'Net load'`.

use std::iter::Peekable;
use std::str::Chars;

use super::token::Token;

pub(crate) struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Lexer {
            input: input.chars().peekable(),
        }
    }

    /// Advances the lexer and returns the next token.
    pub(crate) fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        match self.input.next() {
            Some('+') => Token::Plus,
            Some('-') => Token::Minus,
            Some('*') => Token::Asterisk,
            Some('/') => Token::Slash,
            Some('^') => Token::Caret,
            Some('(') => Token::LParen,
            Some(')') => Token::RParen,
            Some(',') | Some(';') => Token::Comma,
            Some('=') => {
                // `==` is accepted as an alias of `=`.
                self.consume_if('=');
                Token::Equals
            }
            Some('!') => {
                if self.consume_if('=') {
                    Token::NotEqual
                } else {
                    Token::Illegal('!')
                }
            }
            Some('<') => self.read_less_than_operator(),
            Some('>') => {
                if self.consume_if('=') {
                    Token::GreaterEqual
                } else {
                    Token::GreaterThan
                }
            }
            Some('"') => self.read_string(),
            Some('\'') => self.read_quoted_identifier(),
            Some(ch) if ch.is_ascii_digit() || ch == '.' => self.read_number(ch),
            Some(ch) if is_letter(ch) => self.read_identifier(ch),
            None => Token::Eof,
            Some(ch) => Token::Illegal(ch),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.input.next_if(|ch| ch.is_whitespace()).is_some() {}
    }

    fn consume_if(&mut self, expected: char) -> bool {
        self.input.next_if_eq(&expected).is_some()
    }

    /// Handles operators starting with '<': <, <=, <>
    fn read_less_than_operator(&mut self) -> Token {
        if self.consume_if('=') {
            Token::LessEqual
        } else if self.consume_if('>') {
            Token::NotEqual
        } else {
            Token::LessThan
        }
    }

    fn read_string(&mut self) -> Token {
        let mut result = String::new();
        for ch in self.input.by_ref() {
            if ch == '"' {
                return Token::String(result);
            }
            result.push(ch);
        }
        Token::Illegal('"')
    }

    fn read_quoted_identifier(&mut self) -> Token {
        let mut result = String::new();
        while let Some(ch) = self.input.next() {
            if ch == '\'' {
                // '' inside a quoted name is an escaped quote.
                if self.consume_if('\'') {
                    result.push('\'');
                } else {
                    return Token::Identifier(result);
                }
            } else {
                result.push(ch);
            }
        }
        Token::Illegal('\'')
    }

    fn read_number(&mut self, first_char: char) -> Token {
        let mut number_str = String::from(first_char);
        let mut has_dot = first_char == '.';

        while let Some(&ch) = self.input.peek() {
            if ch.is_ascii_digit() {
                number_str.push(ch);
            } else if ch == '.' && !has_dot {
                has_dot = true;
                number_str.push(ch);
            } else {
                break;
            }
            self.input.next();
        }

        number_str
            .parse::<f64>()
            .map(Token::Number)
            .unwrap_or(Token::Illegal(first_char))
    }

    fn read_identifier(&mut self, first_char: char) -> Token {
        let mut ident = String::from(first_char);
        while let Some(ch) = self
            .input
            .next_if(|&ch| is_letter(ch) || ch.is_ascii_digit() || ch == '.')
        {
            ident.push(ch);
        }

        if ident.eq_ignore_ascii_case("TRUE") {
            Token::Boolean(true)
        } else if ident.eq_ignore_ascii_case("FALSE") {
            Token::Boolean(false)
        } else {
            Token::Identifier(ident)
        }
    }
}

/// Returns true if `ch` can start an identifier.
fn is_letter(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}
