// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

use crate::records::HourField;

use super::functions::Function;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessEqual,
    GreaterEqual,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Equal
            | BinaryOp::NotEqual
            | BinaryOp::LessThan
            | BinaryOp::GreaterThan
            | BinaryOp::LessEqual
            | BinaryOp::GreaterEqual => 1,
            BinaryOp::Add | BinaryOp::Sub => 2,
            BinaryOp::Mul | BinaryOp::Div => 3,
            BinaryOp::Pow => 5,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "<>",
            BinaryOp::LessThan => "<",
            BinaryOp::GreaterThan => ">",
            BinaryOp::LessEqual => "<=",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        }
    }
}

/// A parsed formula expression.
///
/// The parser produces `Reference`s for free identifiers.  They are replaced
/// by `Field`s and `Formula`s when the expression is added to a
/// [`FormulaBook`][crate::FormulaBook].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Number { value: f64 },
    Text { value: String },
    Reference { name: String },
    Field { field: HourField },
    Formula { index: usize, name: String },
    Neg { param: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Call { function: Function, params: Vec<Expr> },
}

/// What a free identifier refers to.
pub(crate) enum Resolved {
    Field(HourField),
    Formula(usize),
}

/// Constructors for `Expr`.
impl Expr {
    pub(crate) fn number(value: f64) -> Self {
        Self::Number { value }
    }

    pub(crate) fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }

    pub(crate) fn reference(name: impl Into<String>) -> Self {
        Self::Reference { name: name.into() }
    }

    pub(crate) fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub(crate) fn call(function: Function, params: Vec<Expr>) -> Self {
        Self::Call { function, params }
    }
}

impl std::ops::Neg for Expr {
    type Output = Self;

    fn neg(self) -> Self {
        match self {
            // -(-a) = a
            Expr::Neg { param } => *param,
            _ => Expr::Neg {
                param: Box::new(self),
            },
        }
    }
}

/// Name resolution.
impl Expr {
    /// Replaces every `Reference` with what `lookup` resolves it to.
    ///
    /// Returns the first name that can't be resolved as an error.
    pub(crate) fn resolve(self, lookup: &impl Fn(&str) -> Option<Resolved>) -> Result<Expr, String> {
        Ok(match self {
            Expr::Reference { name } => match lookup(&name) {
                Some(Resolved::Field(field)) => Expr::Field { field },
                Some(Resolved::Formula(index)) => Expr::Formula { index, name },
                None => return Err(name),
            },
            Expr::Neg { param } => Expr::Neg {
                param: Box::new(param.resolve(lookup)?),
            },
            Expr::Binary { op, lhs, rhs } => Expr::Binary {
                op,
                lhs: Box::new(lhs.resolve(lookup)?),
                rhs: Box::new(rhs.resolve(lookup)?),
            },
            Expr::Call { function, params } => Expr::Call {
                function,
                params: params
                    .into_iter()
                    .map(|param| param.resolve(lookup))
                    .collect::<Result<_, _>>()?,
            },
            other => other,
        })
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.generate_string())
    }
}

/// Display helpers for `Expr`.
impl Expr {
    fn generate_string(&self) -> String {
        match self {
            Self::Number { value } => format!("{}", value),
            Self::Text { value } => format!("\"{}\"", value),
            Self::Reference { name } | Self::Formula { name, .. } => name.clone(),
            Self::Field { field } => field.name().to_string(),
            Self::Neg { param } => match param.as_ref() {
                Self::Binary { .. } => format!("-({})", param.generate_string()),
                _ => format!("-{}", param.generate_string()),
            },
            Self::Binary { op, lhs, rhs } => {
                // Powers are right associative, everything else is left
                // associative.
                let (lhs_min, rhs_min) = if *op == BinaryOp::Pow {
                    (op.precedence() + 1, op.precedence())
                } else {
                    (op.precedence(), op.precedence() + 1)
                };
                format!(
                    "{} {} {}",
                    lhs.bracketed_below(lhs_min),
                    op.symbol(),
                    rhs.bracketed_below(rhs_min)
                )
            }
            Self::Call { function, params } => format!(
                "{}({})",
                function.name(),
                params
                    .iter()
                    .map(|p| p.generate_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    fn bracketed_below(&self, precedence: u8) -> String {
        match self {
            Self::Binary { op, .. } if op.precedence() < precedence => {
                format!("({})", self.generate_string())
            }
            _ => self.generate_string(),
        }
    }
}
