// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Flattens built reports into a header row and data rows of strings, for an
//! external export sink.

use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::{combined::CombinedTable, ReportConfig};

use super::{CellValue, TableConfig, NO_DATA};

/// A row-major matrix of formatted values with a fixed header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportMatrix {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ExportMatrix {
    /// Exports a pivot table with one row per table row, and one column per
    /// table column and position in time.
    pub fn from_table(table: &TableConfig, config: &ReportConfig) -> Self {
        let positions = (0..table.columns.len())
            .map(|column| {
                table
                    .rows
                    .iter()
                    .filter_map(|row| row.cells.get(column))
                    .flat_map(|cell| cell.entries().into_iter().map(|(d, h, _)| (d, h)))
                    .collect::<BTreeSet<_>>()
            })
            .collect::<Vec<_>>();

        let mut header = vec!["Entity".to_string()];
        for (name, positions) in table.columns.iter().zip(&positions) {
            header.extend(positions.iter().map(|(date, hour)| heading(name, *date, *hour)));
        }

        let rows = table
            .rows
            .iter()
            .map(|row| {
                let mut values = vec![row.label.clone()];
                for (column, positions) in positions.iter().enumerate() {
                    let cell = row.cells.get(column);
                    values.extend(positions.iter().map(|(date, hour)| {
                        cell.and_then(|c| c.get(*date, *hour))
                            .unwrap_or(&CellValue::NoData)
                            .format(config.decimal_places)
                    }));
                }
                values
            })
            .collect();

        Self { header, rows }
    }

    /// Exports a combined table with one row per key, and a subject and an
    /// object column per operation.
    pub fn from_combined(table: &CombinedTable, config: &ReportConfig) -> Self {
        let mut header = ["Date", "Hour", "Subject", "Object"].map(String::from).to_vec();
        for operation in &table.operations {
            header.push(format!("{operation} (subject)"));
            header.push(format!("{operation} (object)"));
        }

        let rows = table
            .rows
            .iter()
            .map(|row| {
                let mut values = vec![
                    row.key.date.to_string(),
                    row.key.hour.to_string(),
                    row.key.subject.clone(),
                    row.key.object.clone(),
                ];
                for operation in &table.operations {
                    match row.values.get(operation) {
                        Some(value) => {
                            values.push(value.subject.format(config.decimal_places));
                            values.push(value.object.format(config.decimal_places));
                        }
                        None => values.extend([NO_DATA.to_string(), NO_DATA.to_string()]),
                    }
                }
                values
            })
            .collect();

        Self { header, rows }
    }
}

fn heading(name: &str, date: Option<NaiveDate>, hour: Option<u8>) -> String {
    match (date, hour) {
        (None, None) => name.to_string(),
        (Some(date), None) => format!("{name} {date}"),
        (None, Some(hour)) => format!("{name} H{hour}"),
        (Some(date), Some(hour)) => format!("{name} {date} H{hour}"),
    }
}
