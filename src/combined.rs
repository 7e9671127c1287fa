// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Joins subject-level and object-level values into one table, keyed by
//! date, hour, subject and object.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    entity::{EntityDirectory, EntityRef, UNKNOWN_ENTITY},
    report::{CellValue, TableConfig},
};

/// The subject and object values of one operation at one key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub date: NaiveDate,
    pub hour: u8,
    pub subject: String,
    pub object: String,
    pub operation: String,
    pub subject_value: Option<f64>,
    pub object_value: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CombinedKey {
    pub date: NaiveDate,
    pub hour: u8,
    pub subject: String,
    pub object: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombinedValue {
    pub subject: CellValue,
    pub object: CellValue,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombinedRow {
    pub key: CombinedKey,
    /// One value for every operation of the table.
    pub values: BTreeMap<String, CombinedValue>,
}

/// Rows ordered by key, all exposing the same operations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinedTable {
    /// The operation names, in the order they were first seen.
    pub operations: Vec<String>,
    pub rows: Vec<CombinedRow>,
}

type Slots = BTreeMap<CombinedKey, HashMap<String, (Option<f64>, Option<f64>)>>;

/// Folds flat records into one row per key.
///
/// When a key has more than one value for the same operation, the first
/// value wins and later ones only fill its gaps.  Values that are missing
/// after all records are folded show no data.
pub fn merge(records: impl IntoIterator<Item = FlatRecord>) -> CombinedTable {
    let (operations, _, slots) = records.into_iter().fold(
        (Vec::new(), HashSet::new(), Slots::new()),
        |(mut operations, mut seen, mut slots), record| {
            if seen.insert(record.operation.clone()) {
                operations.push(record.operation.clone());
            }
            let key = CombinedKey {
                date: record.date,
                hour: record.hour,
                subject: record.subject,
                object: record.object,
            };
            let slot = slots
                .entry(key)
                .or_default()
                .entry(record.operation)
                .or_default();
            slot.0 = slot.0.or(record.subject_value);
            slot.1 = slot.1.or(record.object_value);
            (operations, seen, slots)
        },
    );

    let rows = slots
        .into_iter()
        .map(|(key, mut values)| CombinedRow {
            key,
            values: operations
                .iter()
                .map(|operation| {
                    let (subject, object) = values.remove(operation).unwrap_or_default();
                    (
                        operation.clone(),
                        CombinedValue {
                            subject: subject.into(),
                            object: object.into(),
                        },
                    )
                })
                .collect(),
        })
        .collect();

    CombinedTable { operations, rows }
}

/// Turns a combined table back into flat records, one per row and operation.
pub fn flatten(table: &CombinedTable) -> Vec<FlatRecord> {
    table
        .rows
        .iter()
        .flat_map(|row| {
            table.operations.iter().map(move |operation| {
                let value = row.values.get(operation);
                FlatRecord {
                    date: row.key.date,
                    hour: row.key.hour,
                    subject: row.key.subject.clone(),
                    object: row.key.object.clone(),
                    operation: operation.clone(),
                    subject_value: value.and_then(|v| v.subject.as_number()),
                    object_value: value.and_then(|v| v.object.as_number()),
                }
            })
        })
        .collect()
}

/// Pairs every object row of a date and hour grouped table with the row of
/// the subject that owns the object.
///
/// Subject rows that no object row pairs with produce records with an empty
/// object name.  Cells that aren't split by date and hour are skipped.
///
/// Records are keyed by display names, so two rows with the same names at the
/// same hour collide, and [`merge`] keeps the first of them.  Collisions are
/// logged.
pub fn flat_records(table: &TableConfig, directory: &EntityDirectory) -> Vec<FlatRecord> {
    let mut subject_rows = HashMap::new();
    for (index, row) in table.rows.iter().enumerate() {
        if let EntityRef::Subject(id) = row.entity {
            subject_rows.entry(id).or_insert(index);
        }
    }

    let mut paired = HashSet::new();
    let mut records = vec![];
    for row in &table.rows {
        let EntityRef::Object(object_id) = row.entity else {
            continue;
        };
        let owner = directory.owner_of(object_id);
        let subject_row = owner.and_then(|id| subject_rows.get(&id)).copied();
        paired.extend(subject_row);
        let subject = owner
            .map(|id| directory.name(EntityRef::Subject(id)))
            .unwrap_or(UNKNOWN_ENTITY);

        for (column, operation) in table.columns.iter().enumerate() {
            let Some(cell) = row.cells.get(column) else {
                continue;
            };
            let subject_cell = subject_row.and_then(|r| table.cell(r, column));
            for (date, hour, value) in cell.entries() {
                let (Some(date), Some(hour)) = (date, hour) else {
                    continue;
                };
                records.push(FlatRecord {
                    date,
                    hour,
                    subject: subject.to_string(),
                    object: row.label.clone(),
                    operation: operation.clone(),
                    subject_value: subject_cell
                        .and_then(|c| c.get(Some(date), Some(hour)))
                        .and_then(CellValue::as_number),
                    object_value: value.as_number(),
                });
            }
        }
    }

    let mut unpaired = subject_rows.into_values().filter(|r| !paired.contains(r)).collect::<Vec<_>>();
    unpaired.sort_unstable();
    for index in unpaired {
        let row = &table.rows[index];
        let subject = directory.name(row.entity);
        for (column, operation) in table.columns.iter().enumerate() {
            let Some(cell) = row.cells.get(column) else {
                continue;
            };
            for (date, hour, value) in cell.entries() {
                let (Some(date), Some(hour)) = (date, hour) else {
                    continue;
                };
                records.push(FlatRecord {
                    date,
                    hour,
                    subject: subject.to_string(),
                    object: String::new(),
                    operation: operation.clone(),
                    subject_value: value.as_number(),
                    object_value: None,
                });
            }
        }
    }
    warn_about_collisions(&records);
    records
}

fn warn_about_collisions(records: &[FlatRecord]) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for record in records {
        let key = (
            record.date,
            record.hour,
            &record.subject,
            &record.object,
            &record.operation,
        );
        if !seen.insert(key) && reported.insert((&record.subject, &record.object)) {
            tracing::warn!(
                "More than one row is labelled `{}` / `{}`, only the first one's values are kept.",
                record.subject,
                record.object
            );
        }
    }
}
