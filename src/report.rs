// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Building report tables from table definitions and hour records.

mod definition;
mod export;
mod operation;
mod pivot;
mod store;
mod value;

pub use definition::{Column, Grouping, Layout, Operation, Row, StatKind, TableDefinition};
pub use export::ExportMatrix;
pub use operation::{evaluate_column, ColumnOutcome, HourFailure};
pub use pivot::{build_pivot, CellFailure, PivotRow, TableConfig};
pub use store::HourStore;
pub use value::{CellValue, ReportCell, NO_DATA};

use crate::{
    combined::{self, CombinedTable},
    entity::EntityDirectory,
    formula::{FormulaBook, FormulaDefinition},
    Error, ReportConfig,
};

/// A built report.
#[derive(Clone, Debug, PartialEq)]
pub enum Report {
    Pivot(TableConfig),
    Combined(CombinedTable),
}

impl Report {
    /// Returns the report as a header row and data rows of strings.
    pub fn export(&self, config: &ReportConfig) -> ExportMatrix {
        match self {
            Report::Pivot(table) => ExportMatrix::from_table(table, config),
            Report::Combined(table) => ExportMatrix::from_combined(table, config),
        }
    }
}

/// Builds the report described by `definition`.
///
/// The formulas are compiled once, into a snapshot that the whole build uses.
/// Combined reports are always grouped by date and hour.
pub fn build_report(
    definition: &TableDefinition,
    directory: &EntityDirectory,
    store: &HourStore,
    formulas: &[FormulaDefinition],
    config: &ReportConfig,
) -> Result<Report, Error> {
    let book = FormulaBook::new(formulas.iter().cloned());
    let row_records = definition
        .rows
        .iter()
        .map(|row| store.row_records(row, &definition.range))
        .collect::<Vec<_>>();

    match definition.layout {
        Layout::Pivot => {
            build_pivot(definition, &row_records, directory, &book, config).map(Report::Pivot)
        }
        Layout::Combined => {
            let definition = TableDefinition {
                grouping: Grouping::BY_DATE_HOUR,
                ..definition.clone()
            };
            let table = build_pivot(&definition, &row_records, directory, &book, config)?;
            if table.failed_cells() > 0 {
                tracing::warn!(
                    "{} cells of combined table `{}` failed to evaluate.",
                    table.failed_cells(),
                    table.name
                );
            }
            Ok(Report::Combined(combined::merge(combined::flat_records(
                &table, directory,
            ))))
        }
    }
}
