// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Recursive descent parser that converts formula text into an [`Expr`].
//!
//! GRAMMAR:
//!   expression     --> comparison
//!   comparison     --> additive ( ("=" | "<>" | "<" | ">" | "<=" | ">=") additive )*
//!   additive       --> multiplicative ( ("+" | "-") multiplicative )*
//!   multiplicative --> unary ( ("*" | "/") unary )*
//!   unary          --> ("-" | "+") unary | power
//!   power          --> primary ( "^" unary )?
//!   primary        --> NUMBER | STRING | BOOLEAN | IDENTIFIER | call | "(" expression ")"
//!   call           --> IDENTIFIER "(" ( expression ( "," expression )* )? ")"

use crate::Error;

use super::expr::{BinaryOp, Expr};
use super::functions::Function;
use super::lexer::Lexer;
use super::token::Token;

/// The deepest expression a formula may nest to.
const MAX_DEPTH: usize = 256;

/// An expression and the depth of its tree.
type Parsed = (Expr, usize);

struct Parser<'a> {
    lexer: Lexer<'a>,
    current_token: Token,
    nesting: usize,
}

/// Parses formula text.  A leading `=` is accepted and ignored.
pub(crate) fn parse(input: &str) -> Result<Expr, Error> {
    let mut parser = Parser::new(input);
    parser.parse()
}

fn too_deep() -> Error {
    Error::invalid_formula("Formula is nested too deeply.")
}

/// Checks the depth of a newly built node.
fn node(expr: Expr, depth: usize) -> Result<Parsed, Error> {
    if depth > MAX_DEPTH {
        return Err(too_deep());
    }
    Ok((expr, depth))
}

fn binary(op: BinaryOp, (lhs, lhs_depth): Parsed, (rhs, rhs_depth): Parsed) -> Result<Parsed, Error> {
    node(Expr::binary(op, lhs, rhs), lhs_depth.max(rhs_depth) + 1)
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token();
        Parser {
            lexer,
            current_token,
            nesting: 0,
        }
    }

    fn parse(&mut self) -> Result<Expr, Error> {
        if self.current_token == Token::Equals {
            self.advance();
        }
        if self.current_token == Token::Eof {
            return Err(Error::invalid_formula("Formula is empty."));
        }

        let (expr, _) = self.parse_expression()?;
        if self.current_token != Token::Eof {
            return Err(Error::invalid_formula(format!(
                "Unexpected {} after the end of the expression.",
                self.current_token
            )));
        }
        Ok(expr)
    }

    fn advance(&mut self) {
        self.current_token = self.lexer.next_token();
    }

    fn expect(&mut self, expected: Token) -> Result<(), Error> {
        if self.current_token == expected {
            self.advance();
            Ok(())
        } else {
            Err(Error::invalid_formula(format!(
                "Expected {}, found {}.",
                expected, self.current_token
            )))
        }
    }

    fn parse_expression(&mut self) -> Result<Parsed, Error> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Parsed, Error> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match &self.current_token {
                Token::Equals => BinaryOp::Equal,
                Token::NotEqual => BinaryOp::NotEqual,
                Token::LessThan => BinaryOp::LessThan,
                Token::GreaterThan => BinaryOp::GreaterThan,
                Token::LessEqual => BinaryOp::LessEqual,
                Token::GreaterEqual => BinaryOp::GreaterEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = binary(op, left, right)?;
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Parsed, Error> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match &self.current_token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right)?;
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Parsed, Error> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match &self.current_token {
                Token::Asterisk => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right)?;
        }
        Ok(left)
    }

    /// Every nested construct passes through here, so this is where the
    /// nesting depth is limited.
    fn parse_unary(&mut self) -> Result<Parsed, Error> {
        if self.nesting >= MAX_DEPTH {
            return Err(too_deep());
        }
        self.nesting += 1;
        let result = match self.current_token {
            Token::Minus => {
                self.advance();
                self.parse_unary()
                    .and_then(|(expr, depth)| node(-expr, depth + 1))
            }
            Token::Plus => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_power(),
        };
        self.nesting -= 1;
        result
    }

    fn parse_power(&mut self) -> Result<Parsed, Error> {
        let left = self.parse_primary()?;
        if self.current_token == Token::Caret {
            self.advance();
            let right = self.parse_unary()?;
            return binary(BinaryOp::Pow, left, right);
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Parsed, Error> {
        match self.current_token.clone() {
            Token::Number(n) => {
                self.advance();
                Ok((Expr::number(n), 1))
            }
            Token::String(s) => {
                self.advance();
                Ok((Expr::text(s), 1))
            }
            Token::Boolean(b) => {
                self.advance();
                Ok((Expr::number(if b { 1.0 } else { 0.0 }), 1))
            }
            Token::Identifier(name) => {
                self.advance();
                if self.current_token == Token::LParen {
                    return self.parse_call(name);
                }
                Ok((Expr::reference(name), 1))
            }
            Token::LParen => {
                self.advance();
                let parsed = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(parsed)
            }
            Token::Eof => Err(Error::invalid_formula("Unexpected end of formula.")),
            token => Err(Error::invalid_formula(format!("Unexpected {}.", token))),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Parsed, Error> {
        let function = Function::from_name(&name)
            .ok_or_else(|| Error::invalid_formula(format!("Unknown function `{name}`.")))?;

        // Consume the '('
        self.advance();

        let mut params = Vec::new();
        let mut depth = 0;
        if self.current_token != Token::RParen {
            loop {
                let (param, param_depth) = self.parse_expression()?;
                params.push(param);
                depth = depth.max(param_depth);
                if self.current_token != Token::Comma {
                    break;
                }
                self.advance();
            }
        }
        self.expect(Token::RParen)?;

        let (min, max) = function.arity();
        if params.len() < min || max.is_some_and(|max| params.len() > max) {
            let expected = match max {
                Some(max) if max == min => format!("{min}"),
                Some(max) => format!("{min} to {max}"),
                None => format!("at least {min}"),
            };
            return Err(Error::invalid_formula(format!(
                "{} expects {expected} arguments, got {}.",
                function.name(),
                params.len()
            )));
        }

        node(Expr::call(function, params), depth + 1)
    }
}
