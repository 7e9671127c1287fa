// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Cell values, and the cells of a pivot table.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// How "no data" is displayed.
pub const NO_DATA: &str = "-";

/// The value of a cell at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Number(f64),
    /// Unreduced values, in hour order.
    Raw(Vec<f64>),
    /// There were no records to compute a value from, or the computation
    /// failed.  Distinct from a value of zero.
    NoData,
}

impl CellValue {
    pub fn is_no_data(&self) -> bool {
        matches!(self, CellValue::NoData)
    }

    /// Returns the numeric value of the cell.  Raw values are summed.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(value) => Some(*value),
            CellValue::Raw(values) if !values.is_empty() => Some(values.iter().sum()),
            CellValue::Raw(_) | CellValue::NoData => None,
        }
    }

    /// Formats the value for export, with a fixed number of decimal places
    /// if given.
    pub fn format(&self, decimal_places: Option<usize>) -> String {
        let number = |value: &f64| match decimal_places {
            Some(places) => format!("{value:.places$}"),
            None => value.to_string(),
        };
        match self {
            CellValue::Number(value) => number(value),
            CellValue::Raw(values) if !values.is_empty() => {
                values.iter().map(number).collect::<Vec<_>>().join("; ")
            }
            CellValue::Raw(_) | CellValue::NoData => NO_DATA.to_string(),
        }
    }
}

impl From<Option<f64>> for CellValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(CellValue::NoData, CellValue::Number)
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format(None))
    }
}

/// The value of one column for one row, split according to the table's
/// grouping.
///
/// Dates and hours are map keys, so they are always in chronological order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReportCell {
    Single(CellValue),
    ByDate(BTreeMap<NaiveDate, CellValue>),
    ByHour(BTreeMap<u8, CellValue>),
    ByDateHour(BTreeMap<NaiveDate, BTreeMap<u8, CellValue>>),
}

impl ReportCell {
    /// Returns the value at the given position.  `date` and `hour` are
    /// ignored for the dimensions the cell isn't split by.
    pub fn get(&self, date: Option<NaiveDate>, hour: Option<u8>) -> Option<&CellValue> {
        match self {
            ReportCell::Single(value) => Some(value),
            ReportCell::ByDate(values) => values.get(&date?),
            ReportCell::ByHour(values) => values.get(&hour?),
            ReportCell::ByDateHour(values) => values.get(&date?)?.get(&hour?),
        }
    }

    /// Returns every value of the cell with its position, in order.
    pub fn entries(&self) -> Vec<(Option<NaiveDate>, Option<u8>, &CellValue)> {
        match self {
            ReportCell::Single(value) => vec![(None, None, value)],
            ReportCell::ByDate(values) => values
                .iter()
                .map(|(date, value)| (Some(*date), None, value))
                .collect(),
            ReportCell::ByHour(values) => values
                .iter()
                .map(|(hour, value)| (None, Some(*hour), value))
                .collect(),
            ReportCell::ByDateHour(values) => values
                .iter()
                .flat_map(|(date, hours)| {
                    hours
                        .iter()
                        .map(move |(hour, value)| (Some(*date), Some(*hour), value))
                })
                .collect(),
        }
    }
}
