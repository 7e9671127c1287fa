// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! The user-authored description of a report table.

use serde::{Deserialize, Serialize};

use crate::{
    entity::EntityRef,
    records::{DateRange, HourField},
};

/// A report table: which entities are shown as rows, which columns are
/// computed for every row, over which dates, and how the values are grouped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub range: DateRange,
    #[serde(default)]
    pub grouping: Grouping,
    #[serde(default)]
    pub layout: Layout,
    pub rows: Vec<Row>,
    pub columns: Vec<Column>,
}

/// How the values of a cell are split over time.
///
/// Without any flag a cell holds a single value for the whole date range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    #[serde(default)]
    pub by_date: bool,
    #[serde(default)]
    pub by_hour: bool,
}

impl Grouping {
    pub const NONE: Grouping = Grouping {
        by_date: false,
        by_hour: false,
    };
    pub const BY_DATE: Grouping = Grouping {
        by_date: true,
        by_hour: false,
    };
    pub const BY_HOUR: Grouping = Grouping {
        by_date: false,
        by_hour: true,
    };
    pub const BY_DATE_HOUR: Grouping = Grouping {
        by_date: true,
        by_hour: true,
    };
}

/// The shape of the report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One row per table row, one cell per column.
    #[default]
    Pivot,
    /// Subject rows and object rows joined on `(date, hour)`.
    Combined,
}

/// A row of a report table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub entity: EntityRef,
    /// For subject rows, an optional selection of the subject's objects.
    /// When set, the row shows the summed values of those objects instead of
    /// the subject's own records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<u64>,
}

impl Row {
    pub fn subject(id: u64) -> Self {
        Self {
            entity: EntityRef::Subject(id),
            objects: vec![],
        }
    }

    pub fn object(id: u64) -> Self {
        Self {
            entity: EntityRef::Object(id),
            objects: vec![],
        }
    }

    /// Returns the row with its drill-down selection set to `objects`.
    pub fn with_objects(mut self, objects: impl IntoIterator<Item = u64>) -> Self {
        self.objects = objects.into_iter().collect();
        self
    }

    /// Returns `true` if the row sums a selection of objects.
    pub fn is_drill_down(&self) -> bool {
        self.entity.is_subject() && !self.objects.is_empty()
    }
}

/// A column of a report table, shared by all rows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub operation: Operation,
}

impl Column {
    pub fn statistical(name: impl Into<String>, field: HourField, kind: StatKind) -> Self {
        Self {
            name: name.into(),
            operation: Operation::Statistical { field, kind },
        }
    }

    pub fn formula(name: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operation: Operation::Formula {
                formula: formula.into(),
            },
        }
    }

    pub fn passthrough(name: impl Into<String>, field: HourField, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operation: Operation::Passthrough {
                field,
                label: label.into(),
            },
        }
    }
}

/// What a column computes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    /// A numeric reduction of one field over the hours of the cell.
    Statistical { field: HourField, kind: StatKind },
    /// The sum of a named formula over the hours of the cell.
    Formula { formula: String },
    /// The unreduced values of one field, tagged with a free-text label.
    Passthrough { field: HourField, label: String },
}

impl Operation {
    /// Returns the field the operation reads, if it is a generation field.
    pub fn generation_field(&self) -> Option<HourField> {
        match self {
            Operation::Statistical { field, .. } | Operation::Passthrough { field, .. } => {
                Some(*field).filter(HourField::is_generation)
            }
            Operation::Formula { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    Sum,
    Avg,
    Min,
    Max,
}

impl std::fmt::Display for StatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatKind::Sum => "sum",
            StatKind::Avg => "avg",
            StatKind::Min => "min",
            StatKind::Max => "max",
        };
        write!(f, "{name}")
    }
}
