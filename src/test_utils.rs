// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! This module is only compiled when running unit tests and contains fixtures
//! that are shared by the tests of all modules.
//!
//! - small constructors for dates, hour records, subjects and objects.
//! - the `directory()` fixture: a consumer `S1` owning the objects `O1` and
//!   `O2`, and a generator `S2` owning the object `G1`.
//! - `full_day()`, which builds the 24 records of one entity for one day.

use chrono::NaiveDate;

use crate::{
    entity::{EntityDirectory, EntityRef, Object, Subject},
    entity_type::{ObjectType, SubjectType},
    records::{HourField, HourRecord, HOURS_PER_DAY},
};

pub(crate) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap_or_else(|| panic!("invalid test date {year}-{month}-{day}"))
}

/// Builds a record with the given field values and zeros everywhere else.
pub(crate) fn record(
    entity: EntityRef,
    date: NaiveDate,
    hour: u8,
    values: &[(HourField, f64)],
) -> HourRecord {
    let record = HourRecord::new(entity, date, hour)
        .unwrap_or_else(|err| panic!("invalid test record: {err}"));
    values
        .iter()
        .fold(record, |record, (field, value)| record.with(*field, *value))
}

/// Builds the 24 records of one day, with `field` set to `value(hour)`.
pub(crate) fn full_day(
    entity: EntityRef,
    date: NaiveDate,
    field: HourField,
    value: impl Fn(u8) -> f64,
) -> Vec<HourRecord> {
    (1..=HOURS_PER_DAY)
        .map(|hour| record(entity, date, hour, &[(field, value(hour))]))
        .collect()
}

pub(crate) fn subject(id: u64, name: &str, subject_type: SubjectType, object_ids: &[u64]) -> Subject {
    Subject {
        id,
        name: name.to_string(),
        subject_type,
        object_ids: object_ids.to_vec(),
    }
}

pub(crate) fn object(id: u64, name: &str, object_type: ObjectType, subject_id: u64) -> Object {
    Object {
        id,
        name: name.to_string(),
        object_type,
        subject_id,
        related_ids: vec![],
    }
}

pub(crate) fn directory() -> EntityDirectory {
    EntityDirectory::new(
        [
            subject(1, "S1", SubjectType::Consumer, &[10]),
            subject(2, "S2", SubjectType::Generator, &[]),
        ],
        [
            object(10, "O1", ObjectType::Consumption, 1),
            object(11, "O2", ObjectType::Consumption, 1),
            object(20, "G1", ObjectType::Generation, 2),
        ],
    )
}
