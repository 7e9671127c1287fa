// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Evaluation of compiled formulas over hour records.

use std::collections::HashMap;

use crate::{records::HourRecord, Error};

use super::expr::{BinaryOp, Expr};
use super::functions::{round_up, round_with, Function};
use super::FormulaBook;

/// How deep evaluation may recurse, through nested expressions and formula
/// references together.
const MAX_DEPTH: usize = 512;

/// Evaluates formulas over one scope of hour records.
///
/// Formula values are memoised per `(formula, hour)`, and the values of
/// `WHERE` and `GLOB` calls once per call, so evaluating a formula at every
/// hour of the scope computes each scope aggregate only once.  Referenced
/// formulas are evaluated when their value is needed, so a branch that isn't
/// taken never fails.
pub(crate) struct Evaluation<'a> {
    book: &'a FormulaBook,
    records: &'a [HourRecord],
    budget: usize,
    remaining: usize,
    depth: usize,
    memo: HashMap<(usize, usize), f64>,
    aggregates: HashMap<*const Expr, f64>,
}

impl<'a> Evaluation<'a> {
    pub(super) fn new(book: &'a FormulaBook, records: &'a [HourRecord], budget: usize) -> Self {
        Self {
            book,
            records,
            budget,
            remaining: budget,
            depth: 0,
            memo: HashMap::new(),
            aggregates: HashMap::new(),
        }
    }

    /// Evaluates the named formula for the record at `position`.
    ///
    /// Every call may visit up to `budget` expression nodes.  Values that
    /// earlier calls already computed are reused and cost nothing.
    pub(crate) fn evaluate(&mut self, name: &str, position: usize) -> Result<f64, Error> {
        let index = self.book.index(name)?;
        if position >= self.records.len() {
            return Err(Error::internal(format!("No record at position {position}.")));
        }
        self.remaining = self.budget;
        self.depth = 0;
        self.formula_value(index, position)
    }

    fn formula_value(&mut self, index: usize, hour: usize) -> Result<f64, Error> {
        if let Some(value) = self.memo.get(&(index, hour)) {
            return Ok(*value);
        }
        let book = self.book;
        let value = book
            .expr(index)
            .and_then(|expr| self.eval(expr, hour))
            .map_err(|e| e.with_context(format!("Formula `{}`", book.name_of(index))))?;
        self.memo.insert((index, hour), value);
        Ok(value)
    }

    fn charge(&mut self) -> Result<(), Error> {
        if self.remaining == 0 {
            return Err(Error::evaluation(format!(
                "Evaluation budget of {} steps exhausted.",
                self.budget
            )));
        }
        self.remaining -= 1;
        Ok(())
    }

    fn eval(&mut self, expr: &Expr, hour: usize) -> Result<f64, Error> {
        self.charge()?;
        if self.depth >= MAX_DEPTH {
            return Err(Error::evaluation("Formulas reference each other too deeply."));
        }
        self.depth += 1;
        let result = self.eval_node(expr, hour);
        self.depth -= 1;
        result
    }

    fn eval_node(&mut self, expr: &Expr, hour: usize) -> Result<f64, Error> {
        let value = match expr {
            Expr::Number { value } => *value,
            Expr::Text { value } => {
                return Err(Error::evaluation(format!(
                    "Non-numeric operand \"{value}\"."
                )))
            }
            Expr::Reference { name } => {
                return Err(Error::unknown_identifier(format!(
                    "Unknown identifier `{name}`."
                )))
            }
            Expr::Field { field } => self
                .records
                .get(hour)
                .map(|record| record.get(*field))
                .ok_or_else(|| Error::internal(format!("No record at position {hour}.")))?,
            Expr::Formula { index, .. } => self.formula_value(*index, hour)?,
            Expr::Neg { param } => -self.eval(param, hour)?,
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, hour)?;
                let rhs = self.eval(rhs, hour)?;
                apply(*op, lhs, rhs).ok_or_else(|| {
                    Error::evaluation(format!("Division by zero in `{expr}`."))
                })?
            }
            Expr::Call {
                function: function @ (Function::Where | Function::Glob),
                params,
            } => self.scope_aggregate(expr, *function, params)?,
            Expr::Call { function, params } => self.call(*function, params, hour)?,
        };
        if !value.is_finite() {
            return Err(Error::evaluation(format!(
                "`{expr}` produced a non-finite result."
            )));
        }
        Ok(value)
    }

    /// Sums `params[0]` over every hour of the scope, or with `WHERE`, over
    /// the hours where `params[1]` is non-zero.
    ///
    /// The value doesn't depend on the current hour, so it is computed once.
    /// Each hour of the scope is evaluated with a fresh budget.
    fn scope_aggregate(
        &mut self,
        expr: &Expr,
        function: Function,
        params: &[Expr],
    ) -> Result<f64, Error> {
        let key: *const Expr = expr;
        if let Some(value) = self.aggregates.get(&key) {
            return Ok(*value);
        }
        let remaining = self.remaining;
        let mut sum = 0.0;
        for other in 0..self.records.len() {
            self.remaining = self.budget;
            let included = match (function, params.get(1)) {
                (Function::Where, Some(condition)) => self.eval(condition, other)? != 0.0,
                _ => true,
            };
            if included {
                sum += self.eval(&params[0], other)?;
            }
        }
        self.remaining = remaining;
        self.aggregates.insert(key, sum);
        Ok(sum)
    }

    fn eval_all(&mut self, params: &[Expr], hour: usize) -> Result<Vec<f64>, Error> {
        params.iter().map(|p| self.eval(p, hour)).collect()
    }

    fn call(&mut self, function: Function, params: &[Expr], hour: usize) -> Result<f64, Error> {
        let value = match function {
            Function::Sum => self.eval_all(params, hour)?.into_iter().sum(),
            Function::Average => {
                let values = self.eval_all(params, hour)?;
                values.iter().sum::<f64>() / values.len() as f64
            }
            Function::Max => self
                .eval_all(params, hour)?
                .into_iter()
                .fold(f64::NEG_INFINITY, f64::max),
            Function::Min => self
                .eval_all(params, hour)?
                .into_iter()
                .fold(f64::INFINITY, f64::min),
            // Text literals are not numbers and aren't counted.
            Function::Count => params
                .iter()
                .filter(|p| !matches!(p, Expr::Text { .. }))
                .count() as f64,
            Function::If => {
                if self.eval(&params[0], hour)? != 0.0 {
                    self.eval(&params[1], hour)?
                } else {
                    match params.get(2) {
                        Some(otherwise) => self.eval(otherwise, hour)?,
                        None => 0.0,
                    }
                }
            }
            Function::Abs => self.eval(&params[0], hour)?.abs(),
            Function::Round | Function::RoundUp | Function::RoundDown => {
                let value = self.eval(&params[0], hour)?;
                let digits = match params.get(1) {
                    Some(digits) => self.eval(digits, hour)?,
                    None => 0.0,
                };
                match function {
                    Function::Round => round_with(value, digits, f64::round),
                    Function::RoundUp => round_with(value, digits, round_up),
                    _ => round_with(value, digits, f64::trunc),
                }
            }
            Function::Pow => {
                let base = self.eval(&params[0], hour)?;
                let exponent = self.eval(&params[1], hour)?;
                base.powf(exponent)
            }
            Function::Sqrt => {
                let value = self.eval(&params[0], hour)?;
                if value < 0.0 {
                    return Err(Error::evaluation(format!(
                        "SQRT of negative value {value}."
                    )));
                }
                value.sqrt()
            }
            Function::And => {
                let mut result = 1.0;
                for param in params {
                    if self.eval(param, hour)? == 0.0 {
                        result = 0.0;
                        break;
                    }
                }
                result
            }
            Function::Or => {
                let mut result = 0.0;
                for param in params {
                    if self.eval(param, hour)? != 0.0 {
                        result = 1.0;
                        break;
                    }
                }
                result
            }
            Function::Where | Function::Glob => {
                return Err(Error::internal(format!(
                    "{} can only be evaluated as a scope aggregate.",
                    function.name()
                )))
            }
        };
        Ok(value)
    }
}

/// Applies a binary operator.  Returns `None` on division by zero.
fn apply(op: BinaryOp, lhs: f64, rhs: f64) -> Option<f64> {
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    Some(match op {
        BinaryOp::Add => lhs + rhs,
        BinaryOp::Sub => lhs - rhs,
        BinaryOp::Mul => lhs * rhs,
        BinaryOp::Div => {
            if rhs == 0.0 {
                return None;
            }
            lhs / rhs
        }
        BinaryOp::Pow => lhs.powf(rhs),
        BinaryOp::Equal => flag(lhs == rhs),
        BinaryOp::NotEqual => flag(lhs != rhs),
        BinaryOp::LessThan => flag(lhs < rhs),
        BinaryOp::GreaterThan => flag(lhs > rhs),
        BinaryOp::LessEqual => flag(lhs <= rhs),
        BinaryOp::GreaterEqual => flag(lhs >= rhs),
    })
}
