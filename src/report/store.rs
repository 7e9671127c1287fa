// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

use std::collections::HashMap;

use crate::{
    aggregate::combine,
    entity::EntityRef,
    records::{DateRange, HourRecord},
};

use super::Row;

/// The fetched hour records of a report, indexed by entity.
#[derive(Clone, Debug, Default)]
pub struct HourStore {
    records: HashMap<EntityRef, Vec<HourRecord>>,
}

impl HourStore {
    pub fn from_records(records: impl IntoIterator<Item = HourRecord>) -> Self {
        let mut store = Self::default();
        for record in records {
            store.records.entry(record.entity()).or_default().push(record);
        }
        store
    }

    /// Returns the records of `entity`, in the order they were added.
    pub fn records(&self, entity: EntityRef) -> &[HourRecord] {
        self.records.get(&entity).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the records shown in `row` for the dates in `range`.
    ///
    /// Drill-down rows get the per-hour sums of their selected objects,
    /// attributed to the row's subject.
    pub fn row_records(&self, row: &Row, range: &DateRange) -> Vec<HourRecord> {
        let in_range = |record: &&HourRecord| range.contains(record.date());
        if !row.is_drill_down() {
            return self
                .records(row.entity)
                .iter()
                .filter(in_range)
                .cloned()
                .collect();
        }
        let selected = row
            .objects
            .iter()
            .flat_map(|id| self.records(EntityRef::Object(*id)))
            .filter(in_range);
        combine(selected)
            .iter()
            .map(|hour| hour.to_record(row.entity))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::HourField;
    use crate::test_utils::{date, record};
    use crate::Error;

    #[test]
    fn test_row_records() -> Result<(), Error> {
        let day = date(2024, 1, 1);
        let (s1, o1, o2) = (
            EntityRef::Subject(1),
            EntityRef::Object(10),
            EntityRef::Object(11),
        );
        let store = HourStore::from_records([
            record(s1, day, 1, &[(HourField::P1, 100.0)]),
            record(o1, day, 1, &[(HourField::P1, 1.0)]),
            record(o1, date(2024, 1, 5), 1, &[(HourField::P1, 50.0)]),
            record(o2, day, 1, &[(HourField::P1, 2.0)]),
            record(o2, day, 2, &[(HourField::P1, 4.0)]),
        ]);
        let range = DateRange::new(day, date(2024, 1, 2))?;

        let plain = store.row_records(&Row::subject(1), &range);
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].get(HourField::P1), 100.0);

        let drill_down = store.row_records(&Row::subject(1).with_objects([10, 11]), &range);
        assert_eq!(
            drill_down
                .iter()
                .map(|r| (r.entity(), r.hour(), r.get(HourField::P1)))
                .collect::<Vec<_>>(),
            vec![(s1, 1, 3.0), (s1, 2, 4.0)]
        );

        assert_eq!(store.row_records(&Row::object(10), &range).len(), 1);
        assert!(store.row_records(&Row::object(99), &range).is_empty());
        assert!(store
            .row_records(&Row::subject(1).with_objects([99]), &range)
            .is_empty());
        Ok(())
    }
}
