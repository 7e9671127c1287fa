// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

/*!
# Report Table Engine

This is a library for turning the hourly plan, fact and tariff records of
electricity market participants ("subjects") and their metering points
("objects") into report tables.

A report table is described by a [`TableDefinition`]: a date range, a list of
rows, each bound to a subject or an object, and a list of columns that are
computed for every row.  A column is either a statistical reduction of one
hour field, a passthrough of raw values, or a named formula.

## Building reports

The entry point is [`build_report`], which takes a table definition, the
[`EntityDirectory`] of known subjects and objects, an [`HourStore`] with the
fetched records, and the user's formulas.  Depending on the table's
[`Layout`], the result is either a pivot [`TableConfig`], with cells split by
date and/or hour according to the table's [`Grouping`], or a
[`CombinedTable`], which joins subject rows and object rows on
`(date, hour, subject, object)`.

Cells without records show [`CellValue::NoData`], which is displayed as `-`
and is distinct from a value of zero.  Cells whose formula fails to evaluate
also show no data, and are listed in [`TableConfig::failures`], so that one
bad hour doesn't break the whole table.  Inconsistent definitions fail the
whole build with an [`Error`] of kind
[`MalformedTableDefinition`][ErrorKind::MalformedTableDefinition].

## Formulas

Formulas are expressions over the hour fields, the built-in functions, and
other formulas:

- arithmetic (`+ - * / ^`) and comparisons (`= <> < > <= >=`),
- `SUM`, `AVERAGE`/`AVG`, `MAX`, `MIN`, `COUNT`, `IF`, `ABS`, `ROUND`,
  `ROUNDUP`, `ROUNDDOWN`, `POW`, `SQRT`, `AND`, `OR`,
- `WHERE(value, condition)` and `GLOB(value)`, which sum over all hours of
  the cell instead of the current one.

All formulas of a build are compiled into a [`FormulaBook`], which resolves
names and detects reference cycles before anything is evaluated.

## Fetching

Hour records come from an external service.  [`aggregate()`] and
[`gather_store`] fetch the records of many entities concurrently, through an
injected fetch function, and replace the records of failed fetches with
zeros instead of failing.  [`RoundTracker`] lets callers discard the results
of fetch rounds that were superseded while in flight.
*/

mod config;
pub use config::ReportConfig;

mod entity_type;
pub use entity_type::{ObjectType, SubjectType};

mod entity;
pub use entity::{resolve_name, EntityDirectory, EntityRef, Object, Subject, UNKNOWN_ENTITY};

mod records;
pub use records::{DateRange, Direction, HourField, HourRecord, HOURS_PER_DAY};

mod formula;
pub use formula::{FormulaBook, FormulaDefinition, HourScope};

mod report;
pub use report::{
    build_pivot, build_report, evaluate_column, CellFailure, CellValue, Column, ColumnOutcome,
    ExportMatrix, Grouping, HourFailure, HourStore, Layout, Operation, PivotRow, Report,
    ReportCell, Row, StatKind, TableConfig, TableDefinition, NO_DATA,
};

mod aggregate;
pub use aggregate::{
    aggregate, combine, gather_store, zero_fill, Aggregate, AggregatedHour, Gathered,
    RoundToken, RoundTracker, Stamped,
};

mod combined;
pub use combined::{
    flat_records, flatten, merge, CombinedKey, CombinedRow, CombinedTable, CombinedValue,
    FlatRecord,
};

mod error;
pub use error::{Error, ErrorKind, FetchError};

#[cfg(test)]
mod test_utils;
