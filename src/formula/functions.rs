// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! The built-in functions that formulas can call.

/// A built-in formula function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Function {
    Sum,
    Average,
    Max,
    Min,
    Count,
    If,
    Abs,
    Round,
    RoundUp,
    RoundDown,
    Pow,
    Sqrt,
    And,
    Or,
    /// `WHERE(value, condition)`: the sum of `value` over the hours of the
    /// evaluation scope for which `condition` holds.
    Where,
    /// `GLOB(value)`: the sum of `value` over all hours of the evaluation
    /// scope.
    Glob,
}

impl Function {
    /// Looks up a function by name, ignoring ASCII case.
    pub(crate) fn from_name(name: &str) -> Option<Function> {
        let function = match name.to_ascii_uppercase().as_str() {
            "SUM" => Function::Sum,
            "AVERAGE" | "AVG" => Function::Average,
            "MAX" => Function::Max,
            "MIN" => Function::Min,
            "COUNT" => Function::Count,
            "IF" => Function::If,
            "ABS" => Function::Abs,
            "ROUND" => Function::Round,
            "ROUNDUP" => Function::RoundUp,
            "ROUNDDOWN" => Function::RoundDown,
            "POW" => Function::Pow,
            "SQRT" => Function::Sqrt,
            "AND" => Function::And,
            "OR" => Function::Or,
            "WHERE" => Function::Where,
            "GLOB" => Function::Glob,
            _ => return None,
        };
        Some(function)
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Function::Sum => "SUM",
            Function::Average => "AVERAGE",
            Function::Max => "MAX",
            Function::Min => "MIN",
            Function::Count => "COUNT",
            Function::If => "IF",
            Function::Abs => "ABS",
            Function::Round => "ROUND",
            Function::RoundUp => "ROUNDUP",
            Function::RoundDown => "ROUNDDOWN",
            Function::Pow => "POW",
            Function::Sqrt => "SQRT",
            Function::And => "AND",
            Function::Or => "OR",
            Function::Where => "WHERE",
            Function::Glob => "GLOB",
        }
    }

    /// Returns the minimum and the optional maximum number of arguments.
    pub(crate) fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Function::Sum
            | Function::Average
            | Function::Max
            | Function::Min
            | Function::And
            | Function::Or => (1, None),
            Function::Count => (0, None),
            Function::If => (2, Some(3)),
            Function::Round | Function::RoundUp | Function::RoundDown => (1, Some(2)),
            Function::Pow | Function::Where => (2, Some(2)),
            Function::Abs | Function::Sqrt | Function::Glob => (1, Some(1)),
        }
    }
}

/// Rounds `value` to `digits` decimal places with the given rounding
/// function applied to the scaled value.
pub(crate) fn round_with(value: f64, digits: f64, round: impl Fn(f64) -> f64) -> f64 {
    let factor = 10f64.powi(digits.trunc() as i32);
    round(value * factor) / factor
}

/// Rounds away from zero.
pub(crate) fn round_up(value: f64) -> f64 {
    if value >= 0.0 {
        value.ceil()
    } else {
        value.floor()
    }
}
