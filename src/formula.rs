// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Named formulas over hour fields, and their evaluation.
//!
//! A formula is an arithmetic expression over the fields of an hour record,
//! the built-in functions, and other formulas referenced by name.  Free
//! identifiers are first matched against the hour fields, ignoring case, and
//! then against the names of the other formulas.
//!
//! All formulas of a report are compiled together into a [`FormulaBook`].
//! The book resolves every identifier and builds the dependency graph between
//! formulas up front, so that unknown identifiers and reference cycles are
//! reported before any hour is evaluated.  A broken formula doesn't break the
//! book: only the formulas that are broken, or that depend on a broken
//! formula, fail to evaluate.

mod dependencies;
mod eval;
mod expr;
mod functions;
mod lexer;
mod parser;
mod token;

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::{records::HourField, records::HourRecord, Error};

use dependencies::DependencyGraph;
pub(crate) use eval::Evaluation;
use expr::{Expr, Resolved};

/// A user-defined formula.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormulaDefinition {
    pub name: String,
    pub expression: String,
}

impl FormulaDefinition {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

/// The hours a formula is evaluated over.
///
/// `records` is the evaluation scope that `WHERE` and `GLOB` aggregate over,
/// and `current` is the position of the hour being evaluated.
#[derive(Clone, Copy, Debug)]
pub struct HourScope<'a> {
    records: &'a [HourRecord],
    current: usize,
}

impl<'a> HourScope<'a> {
    /// Creates a scope positioned at `records[current]`, or `None` if there
    /// is no such record.
    pub fn new(records: &'a [HourRecord], current: usize) -> Option<Self> {
        (current < records.len()).then_some(Self { records, current })
    }

    pub fn current(&self) -> &'a HourRecord {
        &self.records[self.current]
    }
}

/// An immutable snapshot of compiled formulas.
pub struct FormulaBook {
    names: Vec<String>,
    indices: HashMap<String, usize>,
    entries: Vec<Result<Expr, Error>>,
    graph: DependencyGraph,
}

impl FormulaBook {
    /// Compiles the given formulas.
    ///
    /// When a name appears more than once, the last definition wins.  Errors
    /// in individual formulas are stored and returned when those formulas
    /// are evaluated.
    pub fn new(definitions: impl IntoIterator<Item = FormulaDefinition>) -> Self {
        let mut names: Vec<String> = vec![];
        let mut expressions: Vec<String> = vec![];
        let mut indices = HashMap::new();
        for FormulaDefinition { name, expression } in definitions {
            let name = name.trim().to_string();
            if name.is_empty() {
                tracing::warn!("Ignoring formula without a name: {expression}");
                continue;
            }
            if let Some(&index) = indices.get(&name) {
                tracing::warn!("Duplicate formula `{name}`, keeping the last definition.");
                expressions[index] = expression;
            } else {
                indices.insert(name.clone(), names.len());
                names.push(name);
                expressions.push(expression);
            }
        }

        let lookup = |name: &str| {
            HourField::from_name(name)
                .map(Resolved::Field)
                .or_else(|| indices.get(name).map(|&i| Resolved::Formula(i)))
        };
        let resolved: Vec<Result<Expr, Error>> = names
            .iter()
            .zip(&expressions)
            .map(|(name, expression)| {
                parser::parse(expression)
                    .map_err(|e| e.with_context(format!("Formula `{name}`")))?
                    .resolve(&lookup)
                    .map_err(|unknown| {
                        Error::unknown_identifier(format!(
                            "Formula `{name}` references unknown identifier `{unknown}`."
                        ))
                    })
            })
            .collect();

        let references: Vec<Vec<usize>> = resolved
            .iter()
            .map(|expr| match expr {
                Ok(expr) => formula_references(expr),
                Err(_) => vec![],
            })
            .collect();
        let graph = DependencyGraph::new(&references);

        let mut broken: Vec<Option<Error>> = resolved
            .iter()
            .map(|expr| expr.as_ref().err().cloned())
            .collect();
        for (index, path) in graph.cycles() {
            broken[index] = Some(Error::cyclic_formula(format!(
                "Cycle detected: {}",
                path.iter()
                    .map(|i| names[*i].as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            )));
        }
        Self::propagate_errors(&names, &graph, &mut broken);

        // Referenced formulas are evaluated on demand, which terminates only
        // if the formulas that are left form no cycle.
        let excluded: BTreeSet<usize> = (0..names.len()).filter(|i| broken[*i].is_some()).collect();
        match graph.evaluation_order(&excluded) {
            Ok(order) => tracing::debug!(
                "Compiled {} formulas, {} of them can be evaluated.",
                names.len(),
                order.len()
            ),
            Err(err) => {
                tracing::error!("Can't order formulas for evaluation: {err}");
                broken = vec![Some(err); names.len()];
            }
        }

        let entries = resolved
            .into_iter()
            .zip(broken)
            .map(|(expr, broken)| match broken {
                Some(err) => Err(err),
                None => expr,
            })
            .collect();

        Self {
            names,
            indices,
            entries,
            graph,
        }
    }

    /// Marks every formula that depends on a broken formula as broken too.
    fn propagate_errors(names: &[String], graph: &DependencyGraph, broken: &mut [Option<Error>]) {
        let mut changed = true;
        while changed {
            changed = false;
            for index in 0..names.len() {
                if broken[index].is_some() {
                    continue;
                }
                let failed_dependency = graph
                    .dependencies(index)
                    .into_iter()
                    .find_map(|dep| broken[dep].as_ref().map(|err| (dep, err.clone())));
                if let Some((dep, err)) = failed_dependency {
                    broken[index] = Some(err.with_context(format!(
                        "Formula `{}` depends on `{}`",
                        names[index], names[dep]
                    )));
                    changed = true;
                }
            }
        }
    }

    /// Returns the names of all formulas, in definition order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Returns `Ok` if the formula can be evaluated, or the reason it can't.
    pub fn check(&self, name: &str) -> Result<(), Error> {
        self.index(name).and_then(|i| self.expr(i)).map(|_| ())
    }

    /// Returns the names of the formulas that `name` references directly.
    pub fn dependencies(&self, name: &str) -> Result<Vec<&str>, Error> {
        let index = self.index(name)?;
        Ok(self
            .graph
            .dependencies(index)
            .into_iter()
            .map(|i| self.names[i].as_str())
            .collect())
    }

    /// Evaluates the named formula for the current hour of `scope`.
    ///
    /// `budget` is the maximum number of expression nodes the evaluation may
    /// visit.  `WHERE` and `GLOB` evaluate their arguments with a fresh
    /// budget for every hour of the scope.
    pub fn evaluate(&self, name: &str, scope: &HourScope, budget: usize) -> Result<f64, Error> {
        self.evaluation(scope.records, budget)
            .evaluate(name, scope.current)
    }

    /// Starts an evaluation over `records` that can be reused for every hour
    /// of them, sharing the values it has already computed.
    pub(crate) fn evaluation<'a>(&'a self, records: &'a [HourRecord], budget: usize) -> Evaluation<'a> {
        Evaluation::new(self, records, budget)
    }

    fn index(&self, name: &str) -> Result<usize, Error> {
        self.indices
            .get(name)
            .copied()
            .ok_or_else(|| Error::unknown_identifier(format!("Unknown formula `{name}`.")))
    }

    fn expr(&self, index: usize) -> Result<&Expr, Error> {
        self.entries
            .get(index)
            .ok_or_else(|| Error::internal(format!("Formula index {index} out of bounds.")))?
            .as_ref()
            .map_err(Clone::clone)
    }

    fn name_of(&self, index: usize) -> &str {
        self.names.get(index).map(String::as_str).unwrap_or("?")
    }
}

/// Returns the formulas referenced by a resolved expression.
fn formula_references(expr: &Expr) -> Vec<usize> {
    let mut found = vec![];
    let mut stack = vec![expr];
    while let Some(expr) = stack.pop() {
        match expr {
            Expr::Formula { index, .. } => found.push(*index),
            Expr::Neg { param } => stack.push(param),
            Expr::Binary { lhs, rhs, .. } => {
                stack.push(lhs);
                stack.push(rhs);
            }
            Expr::Call { params, .. } => stack.extend(params.iter()),
            Expr::Number { .. } | Expr::Text { .. } | Expr::Reference { .. } | Expr::Field { .. } => {}
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{date, record};
    use crate::{entity::EntityRef, ErrorKind};

    const BUDGET: usize = 10_000;

    fn book(definitions: &[(&str, &str)]) -> FormulaBook {
        FormulaBook::new(
            definitions
                .iter()
                .map(|(name, expr)| FormulaDefinition::new(*name, *expr)),
        )
    }

    fn records() -> Vec<HourRecord> {
        let s1 = EntityRef::Subject(1);
        let day = date(2024, 1, 1);
        vec![
            record(s1, day, 1, &[(HourField::P1, 10.0), (HourField::P1Gen, 3.0)]),
            record(s1, day, 2, &[(HourField::P1, 5.0), (HourField::P1Gen, 8.0)]),
            record(s1, day, 3, &[(HourField::Direction, -1.0)]),
        ]
    }

    fn eval_at(book: &FormulaBook, name: &str, hour: usize) -> Result<f64, Error> {
        let records = records();
        let scope = HourScope::new(&records, hour)
            .ok_or_else(|| Error::internal("no such hour"))?;
        book.evaluate(name, &scope, BUDGET)
    }

    #[test]
    fn test_field_and_formula_references() -> Result<(), Error> {
        let book = book(&[
            ("Net", "p1 - P1_Gen"),
            ("Disbalance", "MAX(Net, 0)"),
            ("Doubled", "Disbalance * 2 + Net"),
        ]);
        assert_eq!(eval_at(&book, "Net", 0)?, 7.0);
        assert_eq!(eval_at(&book, "Disbalance", 1)?, 0.0);
        assert_eq!(eval_at(&book, "Doubled", 0)?, 21.0);
        assert_eq!(book.dependencies("Doubled")?, vec!["Net", "Disbalance"]);
        assert_eq!(book.names().collect::<Vec<_>>(), vec!["Net", "Disbalance", "Doubled"]);
        Ok(())
    }

    #[test]
    fn test_fields_shadow_formulas() -> Result<(), Error> {
        let book = book(&[("P1", "1000"), ("Uses", "P1 + 1")]);
        assert_eq!(eval_at(&book, "Uses", 0)?, 11.0);
        Ok(())
    }

    #[test]
    fn test_cycle_detection() {
        let book = book(&[("A", "B + 1"), ("B", "A + 1"), ("C", "A * 2"), ("D", "P1")]);

        assert!(eval_at(&book, "A", 0).is_err_and(|e| e
            == Error::cyclic_formula("Cycle detected: A -> B -> A")));
        assert!(eval_at(&book, "B", 0).is_err_and(|e| e
            == Error::cyclic_formula("Cycle detected: B -> A -> B")));
        assert!(eval_at(&book, "C", 0).is_err_and(|e| e
            == Error::cyclic_formula(
                "Formula `C` depends on `A`: Cycle detected: A -> B -> A"
            )));
        assert!(eval_at(&book, "D", 0).is_ok_and(|v| v == 10.0));

        let book = self::book(&[("Self", "Self + P1")]);
        assert!(book
            .check("Self")
            .is_err_and(|e| e == Error::cyclic_formula("Cycle detected: Self -> Self")));
    }

    #[test]
    fn test_unknown_identifiers() {
        let book = book(&[("C", "A*2"), ("E", "C + 1")]);

        assert!(eval_at(&book, "C", 0).is_err_and(|e| e
            == Error::unknown_identifier("Formula `C` references unknown identifier `A`.")));
        assert!(eval_at(&book, "E", 0).is_err_and(|e| e.kind() == ErrorKind::UnknownIdentifier
            && e.description().starts_with("Formula `E` depends on `C`")));
        assert!(eval_at(&book, "Missing", 0)
            .is_err_and(|e| e == Error::unknown_identifier("Unknown formula `Missing`.")));
    }

    #[test]
    fn test_invalid_formulas() {
        let book = book(&[("Bad", "1 +"), ("Good", "2"), ("", "3")]);
        assert_eq!(book.len(), 2);
        assert!(book.check("Bad").is_err_and(|e| e
            == Error::invalid_formula("Formula `Bad`: Unexpected end of formula.")));
        assert!(book.check("Good").is_ok());
    }

    #[test]
    fn test_duplicate_names() -> Result<(), Error> {
        let book = book(&[("A", "1"), ("A", "2")]);
        assert_eq!(book.len(), 1);
        assert_eq!(eval_at(&book, "A", 0)?, 2.0);
        Ok(())
    }

    #[test]
    fn test_scope_aggregates() -> Result<(), Error> {
        let book = book(&[
            ("Total", "GLOB(P1)"),
            ("Share", "P1 / GLOB(P1)"),
            ("Down", "WHERE(P1 + 1, Direction < 0)"),
            ("Surplus", "WHERE(P1 - P1_Gen, P1 > P1_Gen)"),
            ("Net", "P1 - P1_Gen"),
            ("NetTotal", "GLOB(Net)"),
        ]);
        assert_eq!(eval_at(&book, "Total", 2)?, 15.0);
        assert_eq!(eval_at(&book, "Share", 1)?, 5.0 / 15.0);
        assert_eq!(eval_at(&book, "Down", 0)?, 1.0);
        assert_eq!(eval_at(&book, "Surplus", 1)?, 7.0);
        assert_eq!(eval_at(&book, "NetTotal", 0)?, 4.0);
        Ok(())
    }

    #[test]
    fn test_references_are_evaluated_on_demand() -> Result<(), Error> {
        let book = book(&[
            ("Inverse", "1 / Direction"),
            ("Guarded", "IF(Direction = 0, 0, Inverse)"),
            ("Inline", "IF(Direction = 0, 0, 1 / Direction)"),
            ("Down", "WHERE(Inverse, Direction < 0)"),
        ]);
        // Direction is zero in the first hour.
        assert!(eval_at(&book, "Inverse", 0).is_err_and(|e| e
            == Error::evaluation("Formula `Inverse`: Division by zero in `1 / Direction`.")));
        assert_eq!(eval_at(&book, "Inline", 0)?, 0.0);
        assert_eq!(eval_at(&book, "Guarded", 0)?, 0.0);
        assert_eq!(eval_at(&book, "Guarded", 2)?, -1.0);
        assert_eq!(eval_at(&book, "Down", 0)?, -1.0);
        Ok(())
    }

    #[test]
    fn test_deep_reference_chains() {
        let definitions = (0..2000).map(|i| match i {
            0 => FormulaDefinition::new("F0", "1"),
            _ => FormulaDefinition::new(format!("F{i}"), format!("F{} + 1", i - 1)),
        });
        let book = FormulaBook::new(definitions);
        assert!(eval_at(&book, "F100", 0).is_ok_and(|v| v == 101.0));
        assert!(eval_at(&book, "F1999", 0).is_err_and(|e| e.kind() == ErrorKind::Evaluation
            && e.description().ends_with("Formulas reference each other too deeply.")));

        let deep = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        let book = self::book(&[("Deep", deep.as_str())]);
        assert!(book.check("Deep").is_err_and(|e| e
            == Error::invalid_formula("Formula `Deep`: Formula is nested too deeply.")));
    }

    #[test]
    fn test_snapshot_independence() -> Result<(), Error> {
        let mut definitions = vec![FormulaDefinition::new("A", "P1 * 2")];
        let book = FormulaBook::new(definitions.clone());
        definitions[0].expression = "P1 * 3".to_string();

        assert_eq!(eval_at(&book, "A", 0)?, 20.0);
        assert_eq!(eval_at(&FormulaBook::new(definitions), "A", 0)?, 30.0);
        Ok(())
    }

    #[test]
    fn test_scope_bounds() {
        let records = records();
        assert!(HourScope::new(&records, 2).is_some());
        assert!(HourScope::new(&records, 3).is_none());
        assert!(HourScope::new(&[], 0).is_none());
    }
}
