// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Computes the value of one column over a set of hour records.

use chrono::NaiveDate;

use crate::{
    formula::FormulaBook,
    records::HourRecord,
    Error, ReportConfig,
};

use super::{CellValue, Column, Operation, StatKind};

/// A formula evaluation that failed for one hour.
#[derive(Clone, Debug, PartialEq)]
pub struct HourFailure {
    pub date: NaiveDate,
    pub hour: u8,
    pub error: Error,
}

/// The value of a column, and the hours whose evaluation failed.
///
/// If any hour failed, `value` is [`CellValue::NoData`].
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnOutcome {
    pub value: CellValue,
    pub failures: Vec<HourFailure>,
}

impl ColumnOutcome {
    fn value(value: CellValue) -> Self {
        Self {
            value,
            failures: vec![],
        }
    }
}

/// Evaluates `column` over all of `records`.
///
/// The records are ordered by date and hour first, so the result doesn't
/// depend on the order they are passed in.  The records are also the scope
/// that `WHERE` and `GLOB` aggregate over.
pub fn evaluate_column(
    column: &Column,
    records: &[HourRecord],
    book: &FormulaBook,
    config: &ReportConfig,
) -> ColumnOutcome {
    let mut scope = records.to_vec();
    scope.sort_by_key(HourRecord::key);
    let members = (0..scope.len()).collect::<Vec<_>>();
    ColumnEvaluator::new(book, config).evaluate(column, &scope, &members)
}

pub(crate) struct ColumnEvaluator<'a> {
    book: &'a FormulaBook,
    config: &'a ReportConfig,
}

impl<'a> ColumnEvaluator<'a> {
    pub(crate) fn new(book: &'a FormulaBook, config: &'a ReportConfig) -> Self {
        Self { book, config }
    }

    /// Evaluates `column` over the records of `scope` at the positions in
    /// `members`.  `scope` must be sorted by date and hour.
    pub(crate) fn evaluate(
        &self,
        column: &Column,
        scope: &[HourRecord],
        members: &[usize],
    ) -> ColumnOutcome {
        let records = members.iter().filter_map(|&i| scope.get(i));
        match &column.operation {
            Operation::Statistical { field, kind } => {
                let values = records.map(|r| r.get(*field)).collect::<Vec<_>>();
                ColumnOutcome::value(reduce(*kind, &values).into())
            }
            Operation::Passthrough { field, .. } => {
                let values = records.map(|r| r.get(*field)).collect::<Vec<_>>();
                if values.is_empty() {
                    ColumnOutcome::value(CellValue::NoData)
                } else {
                    ColumnOutcome::value(CellValue::Raw(values))
                }
            }
            Operation::Formula { formula } => self.evaluate_formula(formula, scope, members),
        }
    }

    fn evaluate_formula(&self, name: &str, scope: &[HourRecord], members: &[usize]) -> ColumnOutcome {
        let Some(first) = members.first().and_then(|&i| scope.get(i)) else {
            return ColumnOutcome::value(CellValue::NoData);
        };
        // A formula that can't be compiled fails the same way for every hour.
        if let Err(error) = self.book.check(name) {
            return ColumnOutcome {
                value: CellValue::NoData,
                failures: vec![HourFailure {
                    date: first.date(),
                    hour: first.hour(),
                    error,
                }],
            };
        }

        // One evaluation for the whole cell, so that scope aggregates are
        // computed once and not once per hour.
        let mut evaluation = self.book.evaluation(scope, self.config.evaluation_budget);
        let mut sum = 0.0;
        let mut failures = vec![];
        for &position in members {
            let Some(record) = scope.get(position) else {
                continue;
            };
            match evaluation.evaluate(name, position) {
                Ok(value) => sum += value,
                Err(error) => failures.push(HourFailure {
                    date: record.date(),
                    hour: record.hour(),
                    error,
                }),
            }
        }
        if failures.is_empty() {
            ColumnOutcome::value(CellValue::Number(sum))
        } else {
            ColumnOutcome {
                value: CellValue::NoData,
                failures,
            }
        }
    }
}

/// Reduces `values`.  Returns `None` if there are no values.
fn reduce(kind: StatKind, values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum = || values.iter().sum::<f64>();
    Some(match kind {
        StatKind::Sum => sum(),
        StatKind::Avg => sum() / values.len() as f64,
        StatKind::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        StatKind::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::FormulaDefinition;
    use crate::test_utils::{date, full_day, record};
    use crate::{entity::EntityRef, records::HourField, ErrorKind};

    fn records() -> Vec<HourRecord> {
        let s1 = EntityRef::Subject(1);
        // Deliberately out of order.
        vec![
            record(s1, date(2024, 1, 2), 1, &[(HourField::P1, 1.0)]),
            record(s1, date(2024, 1, 1), 2, &[(HourField::P1, 4.0)]),
            record(s1, date(2024, 1, 1), 1, &[(HourField::P1, 0.0)]),
        ]
    }

    fn book() -> FormulaBook {
        FormulaBook::new([
            FormulaDefinition::new("Double", "P1 * 2"),
            FormulaDefinition::new("Inverse", "1 / P1"),
            FormulaDefinition::new("C", "A * 2"),
        ])
    }

    fn evaluate(column: &Column, records: &[HourRecord]) -> ColumnOutcome {
        evaluate_column(column, records, &book(), &ReportConfig::default())
    }

    #[test]
    fn test_statistical_columns() {
        let column = |kind| Column::statistical("x", HourField::P1, kind);

        assert_eq!(evaluate(&column(StatKind::Sum), &records()).value, CellValue::Number(5.0));
        assert_eq!(evaluate(&column(StatKind::Avg), &records()).value, CellValue::Number(5.0 / 3.0));
        assert_eq!(evaluate(&column(StatKind::Min), &records()).value, CellValue::Number(0.0));
        assert_eq!(evaluate(&column(StatKind::Max), &records()).value, CellValue::Number(4.0));
    }

    #[test]
    fn test_no_data_is_not_zero() {
        let columns = [
            Column::statistical("sum", HourField::P1, StatKind::Sum),
            Column::statistical("avg", HourField::P1, StatKind::Avg),
            Column::statistical("min", HourField::P1, StatKind::Min),
            Column::statistical("max", HourField::P1, StatKind::Max),
            Column::passthrough("raw", HourField::P1, "raw"),
            Column::formula("double", "Double"),
        ];
        for column in &columns {
            let outcome = evaluate(column, &[]);
            assert_eq!(outcome.value, CellValue::NoData, "{}", column.name);
            assert!(outcome.failures.is_empty());
        }

        // Records whose values are all zero are data.
        let zeros = vec![record(EntityRef::Subject(1), date(2024, 1, 1), 1, &[])];
        assert_eq!(evaluate(&columns[0], &zeros).value, CellValue::Number(0.0));
    }

    #[test]
    fn test_passthrough_keeps_hour_order() {
        let column = Column::passthrough("raw", HourField::P1, "as measured");
        assert_eq!(
            evaluate(&column, &records()).value,
            CellValue::Raw(vec![0.0, 4.0, 1.0])
        );
    }

    #[test]
    fn test_formula_columns() {
        let outcome = evaluate(&Column::formula("d", "Double"), &records());
        assert_eq!(outcome.value, CellValue::Number(10.0));
        assert!(outcome.failures.is_empty());

        // One failing hour degrades the whole cell, and is tallied.
        let outcome = evaluate(&Column::formula("i", "Inverse"), &records());
        assert_eq!(outcome.value, CellValue::NoData);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].date, date(2024, 1, 1));
        assert_eq!(outcome.failures[0].hour, 1);
        assert_eq!(outcome.failures[0].error.kind(), ErrorKind::Evaluation);
    }

    #[test]
    fn test_unknown_identifier_in_formula_column() {
        let outcome = evaluate(&Column::formula("c", "C"), &records());
        assert_eq!(outcome.value, CellValue::NoData);
        assert_eq!(
            outcome.failures,
            vec![HourFailure {
                date: date(2024, 1, 1),
                hour: 1,
                error: Error::unknown_identifier(
                    "Formula `C` references unknown identifier `A`."
                ),
            }]
        );

        let outcome = evaluate(&Column::formula("m", "Missing"), &records());
        assert!(outcome.failures[0].error.kind() == ErrorKind::UnknownIdentifier);
    }

    #[test]
    fn test_guarded_references_to_failing_formulas() {
        let book = FormulaBook::new([
            FormulaDefinition::new("Inverse", "1 / P1"),
            FormulaDefinition::new("Guarded", "IF(P1 = 0, 0, Inverse)"),
            FormulaDefinition::new("Positive", "WHERE(Inverse, P1 > 0)"),
        ]);
        let config = ReportConfig::default();

        // P1 is zero in the first hour, where `Inverse` can't be evaluated.
        let outcome = evaluate_column(&Column::formula("g", "Guarded"), &records(), &book, &config);
        assert_eq!(outcome.value, CellValue::Number(1.25));
        assert!(outcome.failures.is_empty());

        let outcome = evaluate_column(&Column::formula("p", "Positive"), &records(), &book, &config);
        assert_eq!(outcome.value, CellValue::Number(3.75));
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn test_scope_aggregates_over_long_ranges() {
        let book = FormulaBook::new([
            FormulaDefinition::new("Net", "P1 - P1_Gen"),
            FormulaDefinition::new("Share", "Net / GLOB(P1 - P1_Gen)"),
        ]);
        let s1 = EntityRef::Subject(1);
        let start = date(2024, 1, 1);
        let records = (0..200)
            .filter_map(|offset| start.checked_add_days(chrono::Days::new(offset)))
            .flat_map(|day| full_day(s1, day, HourField::P1, |_| 2.0))
            .collect::<Vec<_>>();
        assert_eq!(records.len(), 4800);

        // Each hour's share is 1/4800.  Summing the scope costs more steps
        // than the budget allows for a single hour.
        let outcome = evaluate_column(
            &Column::formula("s", "Share"),
            &records,
            &book,
            &ReportConfig::default(),
        );
        assert!(outcome.failures.is_empty(), "{:?}", outcome.failures.first());
        let CellValue::Number(total) = outcome.value else {
            panic!("expected a number, got {:?}", outcome.value);
        };
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_budget_from_config() {
        let config = ReportConfig {
            evaluation_budget: 2,
            ..Default::default()
        };
        let outcome = evaluate_column(&Column::formula("d", "Double"), &records(), &book(), &config);
        assert_eq!(outcome.value, CellValue::NoData);
        assert_eq!(outcome.failures.len(), 3);
    }
}
