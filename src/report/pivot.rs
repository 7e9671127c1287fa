// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Arranges the column values of every row according to the table's grouping.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::{
    entity::{EntityDirectory, EntityRef},
    formula::FormulaBook,
    records::{HourRecord, HOURS_PER_DAY},
    Error, ReportConfig,
};

use super::operation::{ColumnEvaluator, ColumnOutcome};
use super::{CellValue, Column, Grouping, Operation, ReportCell, TableDefinition};

/// A built pivot table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableConfig {
    pub name: String,
    pub grouping: Grouping,
    /// The column names, in definition order.
    pub columns: Vec<String>,
    pub rows: Vec<PivotRow>,
    /// The cells whose formula failed to evaluate, and now show no data.
    pub failures: Vec<CellFailure>,
}

impl TableConfig {
    /// Returns the number of cells that failed to evaluate.
    pub fn failed_cells(&self) -> usize {
        self.failures.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&ReportCell> {
        self.rows.get(row)?.cells.get(column)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PivotRow {
    pub entity: EntityRef,
    pub objects: Vec<u64>,
    pub label: String,
    /// One cell per column.
    pub cells: Vec<ReportCell>,
}

/// A cell that shows no data because its evaluation failed.
///
/// `date` and `hour` are those of the first failing hour record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CellFailure {
    pub row: usize,
    pub column: usize,
    pub date: NaiveDate,
    pub hour: u8,
    #[serde(serialize_with = "serialize_error")]
    pub error: Error,
}

fn serialize_error<S: serde::Serializer>(error: &Error, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Builds the pivot table of `definition`, where `row_records[i]` are the
/// hour records of row `i`.
///
/// Returns a `MalformedTableDefinition` error naming the offending row or
/// column if the definition or the records are inconsistent.  Formulas that
/// fail to evaluate don't fail the build: their cells show no data and are
/// listed in [`TableConfig::failures`].
pub fn build_pivot(
    definition: &TableDefinition,
    row_records: &[Vec<HourRecord>],
    directory: &EntityDirectory,
    book: &FormulaBook,
    config: &ReportConfig,
) -> Result<TableConfig, Error> {
    validate_columns(definition)?;
    if row_records.len() != definition.rows.len() {
        return Err(Error::malformed_table_definition(format!(
            "Table `{}` has {} rows, but {} record sets were given.",
            definition.name,
            definition.rows.len(),
            row_records.len()
        )));
    }

    let evaluator = ColumnEvaluator::new(book, config);
    let mut rows = Vec::with_capacity(definition.rows.len());
    let mut failures = vec![];
    for (index, (row, records)) in definition.rows.iter().zip(row_records).enumerate() {
        let label = directory.row_label(row);
        let records = prepare_records(definition, index, &label, row.entity, records)?;
        let hide_generation =
            config.hide_generation_for_consumers && !directory.is_generation_capable(row.entity);

        let mut cells = Vec::with_capacity(definition.columns.len());
        for (column_index, column) in definition.columns.iter().enumerate() {
            let mut builder = CellBuilder {
                evaluator: &evaluator,
                column,
                hidden: hide_generation && column.operation.generation_field().is_some(),
                failure: None,
            };
            cells.push(builder.build(definition, &records));
            if let Some(mut failure) = builder.failure {
                failure.row = index;
                failure.column = column_index;
                tracing::warn!(
                    "Cell `{}` of row `{label}` shows no data: {}",
                    column.name,
                    failure.error
                );
                failures.push(failure);
            }
        }
        rows.push(PivotRow {
            entity: row.entity,
            objects: row.objects.clone(),
            label,
            cells,
        });
    }

    tracing::debug!(
        "Built table `{}` with {} rows and {} failed cells.",
        definition.name,
        rows.len(),
        failures.len()
    );
    Ok(TableConfig {
        name: definition.name.clone(),
        grouping: definition.grouping,
        columns: definition.columns.iter().map(|c| c.name.clone()).collect(),
        rows,
        failures,
    })
}

fn validate_columns(definition: &TableDefinition) -> Result<(), Error> {
    definition.range.validate()?;
    if definition.columns.is_empty() {
        return Err(Error::malformed_table_definition(format!(
            "Table `{}` has no columns.",
            definition.name
        )));
    }
    let mut names = HashMap::new();
    for (index, column) in definition.columns.iter().enumerate() {
        if column.name.trim().is_empty() {
            return Err(Error::malformed_table_definition(format!(
                "Column {index} of table `{}` has no name.",
                definition.name
            )));
        }
        if let Some(previous) = names.insert(column.name.as_str(), index) {
            return Err(Error::malformed_table_definition(format!(
                "Column {index} of table `{}` has the same name as column {previous}: `{}`.",
                definition.name, column.name
            )));
        }
        if let Operation::Formula { formula } = &column.operation {
            if formula.trim().is_empty() {
                return Err(Error::malformed_table_definition(format!(
                    "Column {index} (`{}`) of table `{}` doesn't name a formula.",
                    column.name, definition.name
                )));
            }
        }
    }
    Ok(())
}

/// Checks the records of one row, and returns those inside the table's date
/// range, ordered by date and hour.
fn prepare_records(
    definition: &TableDefinition,
    row: usize,
    label: &str,
    entity: EntityRef,
    records: &[HourRecord],
) -> Result<Vec<HourRecord>, Error> {
    let mut seen = HashSet::new();
    let mut prepared = Vec::with_capacity(records.len());
    for record in records {
        if record.entity() != entity {
            return Err(Error::malformed_table_definition(format!(
                "Row {row} (`{label}`) of table `{}` contains a record of {}.",
                definition.name,
                record.entity()
            )));
        }
        if !(1..=HOURS_PER_DAY).contains(&record.hour()) {
            return Err(Error::malformed_table_definition(format!(
                "Row {row} (`{label}`) of table `{}` has a record for hour {} on {}.",
                definition.name,
                record.hour(),
                record.date()
            )));
        }
        if !seen.insert(record.key()) {
            return Err(Error::malformed_table_definition(format!(
                "Row {row} (`{label}`) of table `{}` has more than one record for hour {} on {}.",
                definition.name,
                record.hour(),
                record.date()
            )));
        }
        if definition.range.contains(record.date()) {
            prepared.push(record.clone());
        }
    }
    if prepared.len() < records.len() {
        tracing::debug!(
            "Ignoring {} records of row {row} outside the range of table `{}`.",
            records.len() - prepared.len(),
            definition.name
        );
    }
    prepared.sort_by_key(HourRecord::key);
    Ok(prepared)
}

/// Builds the cell of one column for one row, keeping the first failure.
struct CellBuilder<'a> {
    evaluator: &'a ColumnEvaluator<'a>,
    column: &'a Column,
    /// Generation columns of entities that don't generate show no data.
    hidden: bool,
    failure: Option<CellFailure>,
}

impl CellBuilder<'_> {
    fn build(&mut self, definition: &TableDefinition, records: &[HourRecord]) -> ReportCell {
        let Grouping { by_date, by_hour } = definition.grouping;
        let days = day_slices(records);
        let all = (0..records.len()).collect::<Vec<_>>();

        match (by_date, by_hour) {
            (false, false) => ReportCell::Single(self.value(records, &all)),
            (true, false) => ReportCell::ByDate(
                definition
                    .range
                    .days()
                    .map(|date| {
                        let day = days.get(&date).copied().unwrap_or_default();
                        let members = (0..day.len()).collect::<Vec<_>>();
                        (date, self.value(day, &members))
                    })
                    .collect(),
            ),
            (false, true) => ReportCell::ByHour(
                (1..=HOURS_PER_DAY)
                    .map(|hour| {
                        let members = all
                            .iter()
                            .copied()
                            .filter(|&i| records[i].hour() == hour)
                            .collect::<Vec<_>>();
                        (hour, self.value(records, &members))
                    })
                    .collect(),
            ),
            (true, true) => ReportCell::ByDateHour(
                definition
                    .range
                    .days()
                    .map(|date| {
                        let day = days.get(&date).copied().unwrap_or_default();
                        let hours = (1..=HOURS_PER_DAY)
                            .map(|hour| {
                                let members = day
                                    .iter()
                                    .position(|r| r.hour() == hour)
                                    .into_iter()
                                    .collect::<Vec<_>>();
                                (hour, self.value(day, &members))
                            })
                            .collect();
                        (date, hours)
                    })
                    .collect(),
            ),
        }
    }

    fn value(&mut self, scope: &[HourRecord], members: &[usize]) -> CellValue {
        if self.hidden {
            return CellValue::NoData;
        }
        let ColumnOutcome { value, failures } = self.evaluator.evaluate(self.column, scope, members);
        if self.failure.is_none() {
            self.failure = failures.into_iter().next().map(|f| CellFailure {
                row: 0,
                column: 0,
                date: f.date,
                hour: f.hour,
                error: f.error,
            });
        }
        value
    }
}

/// Splits records sorted by date into one slice per date.
fn day_slices(records: &[HourRecord]) -> BTreeMap<NaiveDate, &[HourRecord]> {
    let mut days = BTreeMap::new();
    let mut start = 0;
    while start < records.len() {
        let date = records[start].date();
        let len = records[start..]
            .iter()
            .take_while(|r| r.date() == date)
            .count();
        days.insert(date, &records[start..start + len]);
        start += len;
    }
    days
}
