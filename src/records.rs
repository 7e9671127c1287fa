// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Hour records and the fields they carry.
//!
//! An [`HourRecord`] holds the plan, fact and tariff values of one entity for
//! one hour of one day.  Records are produced by an external data service and
//! are immutable once built.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{entity::EntityRef, Error};

/// The number of hours in a report day.  Hours are numbered `1..=24`.
pub const HOURS_PER_DAY: u8 = 24;

/// The numeric fields of an hour record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HourField {
    P1,
    P2,
    P3,
    F1,
    F2,
    #[serde(rename = "P1_Gen")]
    P1Gen,
    #[serde(rename = "P2_Gen")]
    P2Gen,
    #[serde(rename = "P3_Gen")]
    P3Gen,
    #[serde(rename = "F1_Gen")]
    F1Gen,
    #[serde(rename = "F2_Gen")]
    F2Gen,
    #[serde(rename = "Tariff_Energy")]
    TariffEnergy,
    #[serde(rename = "Tariff_Capacity")]
    TariffCapacity,
    #[serde(rename = "Tariff_Transfer")]
    TariffTransfer,
    /// Numeric view of the direction flag: `UP` = 1, `DOWN` = -1, `NONE` = 0.
    Direction,
}

const STORED_FIELDS: usize = 13;

impl HourField {
    /// All fields, in display order.
    pub const ALL: [HourField; 14] = [
        HourField::P1,
        HourField::P2,
        HourField::P3,
        HourField::F1,
        HourField::F2,
        HourField::P1Gen,
        HourField::P2Gen,
        HourField::P3Gen,
        HourField::F1Gen,
        HourField::F2Gen,
        HourField::TariffEnergy,
        HourField::TariffCapacity,
        HourField::TariffTransfer,
        HourField::Direction,
    ];

    /// The plan and fact fields that have a generation counterpart.
    pub const DISBALANCE: [HourField; 5] = [
        HourField::P1,
        HourField::P2,
        HourField::P3,
        HourField::F1,
        HourField::F2,
    ];

    /// Returns the name used for the field in formulas and exports.
    pub fn name(&self) -> &'static str {
        match self {
            HourField::P1 => "P1",
            HourField::P2 => "P2",
            HourField::P3 => "P3",
            HourField::F1 => "F1",
            HourField::F2 => "F2",
            HourField::P1Gen => "P1_Gen",
            HourField::P2Gen => "P2_Gen",
            HourField::P3Gen => "P3_Gen",
            HourField::F1Gen => "F1_Gen",
            HourField::F2Gen => "F2_Gen",
            HourField::TariffEnergy => "Tariff_Energy",
            HourField::TariffCapacity => "Tariff_Capacity",
            HourField::TariffTransfer => "Tariff_Transfer",
            HourField::Direction => "Direction",
        }
    }

    /// Looks up a field by name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<HourField> {
        Self::ALL
            .into_iter()
            .find(|field| field.name().eq_ignore_ascii_case(name))
    }

    /// Returns the generation counterpart of a plan or fact field.
    pub fn generation_counterpart(&self) -> Option<HourField> {
        match self {
            HourField::P1 => Some(HourField::P1Gen),
            HourField::P2 => Some(HourField::P2Gen),
            HourField::P3 => Some(HourField::P3Gen),
            HourField::F1 => Some(HourField::F1Gen),
            HourField::F2 => Some(HourField::F2Gen),
            _ => None,
        }
    }

    /// Returns `true` for the generation counterparts.
    pub fn is_generation(&self) -> bool {
        matches!(
            self,
            HourField::P1Gen
                | HourField::P2Gen
                | HourField::P3Gen
                | HourField::F1Gen
                | HourField::F2Gen
        )
    }

    fn slot(&self) -> Option<usize> {
        match self {
            HourField::Direction => None,
            field => Some(*field as usize),
        }
    }
}

impl std::fmt::Display for HourField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The direction flag of an hour record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    #[default]
    None,
}

impl Direction {
    /// Returns the numeric view of the flag used in formulas.
    pub fn as_number(&self) -> f64 {
        match self {
            Direction::Up => 1.0,
            Direction::Down => -1.0,
            Direction::None => 0.0,
        }
    }

    fn from_number(value: f64) -> Self {
        if value > 0.0 {
            Direction::Up
        } else if value < 0.0 {
            Direction::Down
        } else {
            Direction::None
        }
    }
}

/// The values of one entity for one hour of one day.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HourRecordRepr", into = "HourRecordRepr")]
pub struct HourRecord {
    entity: EntityRef,
    date: NaiveDate,
    hour: u8,
    values: [f64; STORED_FIELDS],
    direction: Direction,
}

impl HourRecord {
    /// Creates a record with all fields set to zero.
    ///
    /// Returns an error if `hour` is not in `1..=24`.
    pub fn new(entity: EntityRef, date: NaiveDate, hour: u8) -> Result<Self, Error> {
        if !(1..=HOURS_PER_DAY).contains(&hour) {
            return Err(Error::malformed_table_definition(format!(
                "Hour {hour} of {entity} on {date} is outside 1..={HOURS_PER_DAY}."
            )));
        }
        Ok(Self::zeroed(entity, date, hour))
    }

    /// Creates the all-zero default record used when no data is available.
    pub(crate) fn zeroed(entity: EntityRef, date: NaiveDate, hour: u8) -> Self {
        Self {
            entity,
            date,
            hour,
            values: [0.0; STORED_FIELDS],
            direction: Direction::None,
        }
    }

    /// Returns the record with `field` set to `value`.
    ///
    /// Setting [`HourField::Direction`] sets the direction flag from the sign
    /// of `value`.
    pub fn with(mut self, field: HourField, value: f64) -> Self {
        match field.slot() {
            Some(slot) => self.values[slot] = value,
            None => self.direction = Direction::from_number(value),
        }
        self
    }

    /// Returns the record with the given direction flag.
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn entity(&self) -> EntityRef {
        self.entity
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns the `(date, hour)` position of the record.
    pub fn key(&self) -> (NaiveDate, u8) {
        (self.date, self.hour)
    }

    /// Returns the value of `field`.
    pub fn get(&self, field: HourField) -> f64 {
        match field.slot() {
            Some(slot) => self.values[slot],
            None => self.direction.as_number(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct HourRecordRepr {
    entity: EntityRef,
    date: NaiveDate,
    hour: u8,
    #[serde(default)]
    direction: Direction,
    #[serde(default)]
    values: BTreeMap<HourField, f64>,
}

impl TryFrom<HourRecordRepr> for HourRecord {
    type Error = Error;

    fn try_from(repr: HourRecordRepr) -> Result<Self, Self::Error> {
        let record = HourRecord::new(repr.entity, repr.date, repr.hour)?;
        Ok(repr
            .values
            .into_iter()
            .filter(|(field, _)| *field != HourField::Direction)
            .fold(record, |record, (field, value)| record.with(field, value))
            .with_direction(repr.direction))
    }
}

impl From<HourRecord> for HourRecordRepr {
    fn from(record: HourRecord) -> Self {
        Self {
            entity: record.entity,
            date: record.date,
            hour: record.hour,
            direction: record.direction,
            values: HourField::ALL
                .into_iter()
                .filter(|field| *field != HourField::Direction)
                .map(|field| (field, record.get(field)))
                .collect(),
        }
    }
}

/// An inclusive range of report dates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Creates a new range.
    ///
    /// Returns an error if `start` is after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, Error> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.start > self.end {
            return Err(Error::malformed_table_definition(format!(
                "Date range starts on {} after it ends on {}.",
                self.start, self.end
            )));
        }
        Ok(())
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Returns `true` if `date` is inside the range.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Returns the number of days in the range.
    pub fn len_days(&self) -> usize {
        ((self.end - self.start).num_days() + 1).max(0) as usize
    }

    /// Returns an iterator over the dates of the range, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        std::iter::successors(Some(self.start), |date| date.checked_add_days(Days::new(1)))
            .take_while(move |date| *date <= end)
    }

    /// Returns an iterator over every `(date, hour)` position of the range.
    pub fn hours(&self) -> impl Iterator<Item = (NaiveDate, u8)> {
        self.days()
            .flat_map(|date| (1..=HOURS_PER_DAY).map(move |hour| (date, hour)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::date;

    #[test]
    fn test_field_names() {
        assert_eq!(HourField::from_name("p1_gen"), Some(HourField::P1Gen));
        assert_eq!(HourField::from_name("TARIFF_energy"), Some(HourField::TariffEnergy));
        assert_eq!(HourField::from_name("P4"), None);
        assert_eq!(HourField::P2.generation_counterpart(), Some(HourField::P2Gen));
        assert_eq!(HourField::TariffCapacity.generation_counterpart(), None);
        assert!(HourField::F2Gen.is_generation());
        for field in HourField::ALL {
            assert_eq!(HourField::from_name(field.name()), Some(field));
        }
    }

    #[test]
    fn test_record_values() -> Result<(), Error> {
        let record = HourRecord::new(EntityRef::Subject(1), date(2024, 1, 1), 3)?
            .with(HourField::P1, 10.0)
            .with(HourField::P1Gen, 3.5)
            .with(HourField::Direction, -2.0);

        assert_eq!(record.get(HourField::P1), 10.0);
        assert_eq!(record.get(HourField::P1Gen), 3.5);
        assert_eq!(record.get(HourField::F1), 0.0);
        assert_eq!(record.direction(), Direction::Down);
        assert_eq!(record.get(HourField::Direction), -1.0);

        assert!(HourRecord::new(EntityRef::Subject(1), date(2024, 1, 1), 0).is_err_and(|e| e
            == Error::malformed_table_definition(
                "Hour 0 of subject #1 on 2024-01-01 is outside 1..=24."
            )));
        assert!(HourRecord::new(EntityRef::Subject(1), date(2024, 1, 1), 25).is_err());
        Ok(())
    }

    #[test]
    fn test_record_json() -> Result<(), Box<dyn std::error::Error>> {
        let record: HourRecord = serde_json::from_str(
            r#"{
                "entity": {"Object": 4},
                "date": "2024-03-31",
                "hour": 24,
                "direction": "UP",
                "values": {"P1": 1.5, "P1_Gen": 0.5}
            }"#,
        )?;
        assert_eq!(record.entity(), EntityRef::Object(4));
        assert_eq!(record.key(), (date(2024, 3, 31), 24));
        assert_eq!(record.get(HourField::P1), 1.5);
        assert_eq!(record.get(HourField::P1Gen), 0.5);
        assert_eq!(record.direction(), Direction::Up);

        let json = serde_json::to_string(&record)?;
        assert_eq!(serde_json::from_str::<HourRecord>(&json)?, record);

        assert!(serde_json::from_str::<HourRecord>(
            r#"{"entity": {"Object": 4}, "date": "2024-03-31", "hour": 25}"#
        )
        .is_err());
        Ok(())
    }

    #[test]
    fn test_date_range() -> Result<(), Error> {
        let range = DateRange::new(date(2024, 2, 28), date(2024, 3, 1))?;
        assert_eq!(range.len_days(), 3);
        assert_eq!(
            range.days().collect::<Vec<_>>(),
            vec![date(2024, 2, 28), date(2024, 2, 29), date(2024, 3, 1)]
        );
        assert_eq!(range.hours().count(), 72);
        assert_eq!(range.hours().last(), Some((date(2024, 3, 1), 24)));
        assert!(range.contains(date(2024, 2, 29)));
        assert!(!range.contains(date(2024, 3, 2)));

        assert!(DateRange::new(date(2024, 1, 2), date(2024, 1, 1)).is_err_and(|e| e
            == Error::malformed_table_definition(
                "Date range starts on 2024-01-02 after it ends on 2024-01-01."
            )));
        Ok(())
    }
}
