// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Fetching and summing the hour records of many entities.
//!
//! Records are fetched through an injected function, one call per entity,
//! with all calls outstanding at the same time.  A failed fetch never fails
//! the aggregate: the entity's records are replaced with zeros by
//! [`zero_fill`], and the failure is reported next to the result.  Hours that
//! a successful fetch has no record for are only zero-filled for summing;
//! [`gather_store`] keeps them missing, so that reports show no data there.
//!
//! When the inputs of a report change while a round of fetches is still in
//! flight, the caller starts a new round with [`RoundTracker::begin`] and
//! only applies results whose [`RoundToken`] is still current.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use chrono::NaiveDate;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::{
    entity::EntityRef,
    error::FetchError,
    records::{DateRange, Direction, HourField, HourRecord},
    report::{HourStore, TableDefinition},
};

/// The summed values of many entities for one hour.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatedHour {
    pub date: NaiveDate,
    pub hour: u8,
    /// The sum of every numeric field.
    pub totals: BTreeMap<HourField, f64>,
    /// `max(Σ(plan − generation), 0)` for every plan and fact field.
    pub disbalance: BTreeMap<HourField, f64>,
    /// The direction of the entities, if they all agree, and
    /// [`Direction::None`] otherwise.
    pub direction: Direction,
}

impl AggregatedHour {
    /// Returns the total of `field`, or zero if it wasn't summed.
    pub fn total(&self, field: HourField) -> f64 {
        self.totals.get(&field).copied().unwrap_or_default()
    }

    /// Converts the totals into a record of `entity`.
    pub fn to_record(&self, entity: EntityRef) -> HourRecord {
        self.totals
            .iter()
            .fold(
                HourRecord::zeroed(entity, self.date, self.hour),
                |record, (field, value)| record.with(*field, *value),
            )
            .with_direction(self.direction)
    }
}

/// The result of aggregating the records of a set of objects.
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregate {
    /// One entry for every hour of the date range, in order.
    pub hours: Vec<AggregatedHour>,
    /// The fetches that failed and were replaced with zeros.
    pub failed: Vec<FetchError>,
}

/// Fetches the records of every object and sums them per hour.
pub async fn aggregate<F, Fut>(object_ids: &[u64], range: DateRange, fetch: F) -> Aggregate
where
    F: Fn(EntityRef, DateRange) -> Fut,
    Fut: Future<Output = Result<Vec<HourRecord>, FetchError>>,
{
    let fetched = fetch_all(
        object_ids.iter().map(|id| EntityRef::Object(*id)),
        range,
        &fetch,
    )
    .await;
    let records = fetched
        .results
        .into_iter()
        .flat_map(|(entity, result)| zero_fill(entity, &range, result))
        .collect::<Vec<_>>();
    Aggregate {
        hours: combine(&records),
        failed: fetched.failed,
    }
}

/// The records of every entity a table needs, fetched with the same zero-fill
/// policy as [`aggregate`].
#[derive(Debug)]
pub struct Gathered {
    pub store: HourStore,
    pub failed: Vec<FetchError>,
}

/// Fetches the records of every entity that `definition` shows: the entities
/// of plain rows, and the selected objects of drill-down rows.
///
/// Failed fetches are replaced with zeros for the whole range.  The records
/// of successful fetches are stored as they are, without padding.
pub async fn gather_store<F, Fut>(definition: &TableDefinition, fetch: F) -> Gathered
where
    F: Fn(EntityRef, DateRange) -> Fut,
    Fut: Future<Output = Result<Vec<HourRecord>, FetchError>>,
{
    let mut entities = BTreeSet::new();
    for row in &definition.rows {
        if row.is_drill_down() {
            entities.extend(row.objects.iter().map(|id| EntityRef::Object(*id)));
        } else {
            entities.insert(row.entity);
        }
    }
    tracing::debug!(
        "Fetching hours of {} entities for table `{}`.",
        entities.len(),
        definition.name
    );

    let range = definition.range;
    let fetched = fetch_all(entities, range, &fetch).await;
    let records = fetched
        .results
        .into_iter()
        .flat_map(|(entity, result)| match result {
            Ok(records) => accepted(entity, &range, records)
                .into_values()
                .collect::<Vec<_>>(),
            Err(err) => zero_fill(entity, &range, Err(err)),
        })
        .collect::<Vec<_>>();
    Gathered {
        store: HourStore::from_records(records),
        failed: fetched.failed,
    }
}

struct Fetched {
    results: BTreeMap<EntityRef, Result<Vec<HourRecord>, FetchError>>,
    failed: Vec<FetchError>,
}

async fn fetch_all<F, Fut>(
    entities: impl IntoIterator<Item = EntityRef>,
    range: DateRange,
    fetch: &F,
) -> Fetched
where
    F: Fn(EntityRef, DateRange) -> Fut,
    Fut: Future<Output = Result<Vec<HourRecord>, FetchError>>,
{
    let mut pending = entities
        .into_iter()
        .map(|entity| {
            let request = fetch(entity, range);
            async move { (entity, request.await) }
        })
        .collect::<FuturesUnordered<_>>();

    let mut results = BTreeMap::new();
    let mut failed = vec![];
    while let Some((entity, result)) = pending.next().await {
        if let Err(err) = &result {
            failed.push(err.clone());
        }
        results.insert(entity, result);
    }
    failed.sort_by_key(FetchError::entity);
    Fetched { results, failed }
}

/// Returns exactly one record of `entity` for every hour of `range`.
///
/// Hours missing from a successful fetch are filled with zeros, and so is the
/// whole range when the fetch failed.  Records outside the range, records of
/// other entities, and repeated hours are dropped.
pub fn zero_fill(
    entity: EntityRef,
    range: &DateRange,
    result: Result<Vec<HourRecord>, FetchError>,
) -> Vec<HourRecord> {
    let mut fetched = match result {
        Ok(records) => accepted(entity, range, records),
        Err(err) => {
            tracing::warn!("{err}.  Using zeros for {} days.", range.len_days());
            BTreeMap::new()
        }
    };

    range
        .hours()
        .map(|(date, hour)| {
            fetched
                .remove(&(date, hour))
                .unwrap_or_else(|| HourRecord::zeroed(entity, date, hour))
        })
        .collect()
}

/// Keys the fetched records of `entity` by date and hour.  Records outside
/// the range, records of other entities, and repeated hours are dropped.
fn accepted(
    entity: EntityRef,
    range: &DateRange,
    records: Vec<HourRecord>,
) -> BTreeMap<(NaiveDate, u8), HourRecord> {
    let mut accepted = BTreeMap::new();
    for record in records {
        if record.entity() != entity {
            tracing::warn!(
                "Dropping a record of {} returned for {entity}.",
                record.entity()
            );
        } else if !range.contains(record.date()) {
            tracing::debug!(
                "Dropping a record of {entity} on {}, outside the range.",
                record.date()
            );
        } else if accepted.contains_key(&record.key()) {
            tracing::warn!(
                "Dropping a repeated record of {entity} on {} hour {}.",
                record.date(),
                record.hour()
            );
        } else {
            accepted.insert(record.key(), record);
        }
    }
    accepted
}

#[derive(Default)]
struct Accumulator {
    totals: BTreeMap<HourField, f64>,
    net: BTreeMap<HourField, f64>,
    direction: Option<Direction>,
}

/// Sums records per `(date, hour)`.
///
/// The result is ordered by date and hour, whatever the order of `records`,
/// and has an entry for every hour that at least one record covers.  Every
/// entry totals all numeric fields, the direction excluded.
pub fn combine<'a>(records: impl IntoIterator<Item = &'a HourRecord>) -> Vec<AggregatedHour> {
    let hours = records
        .into_iter()
        .fold(BTreeMap::new(), |mut hours, record| {
            let acc: &mut Accumulator = hours.entry(record.key()).or_default();
            for field in HourField::ALL {
                if field == HourField::Direction {
                    continue;
                }
                *acc.totals.entry(field).or_default() += record.get(field);
            }
            for field in HourField::DISBALANCE {
                let generation = field
                    .generation_counterpart()
                    .map_or(0.0, |counterpart| record.get(counterpart));
                *acc.net.entry(field).or_default() += record.get(field) - generation;
            }
            acc.direction = match acc.direction {
                None => Some(record.direction()),
                Some(direction) if direction == record.direction() => Some(direction),
                Some(_) => Some(Direction::None),
            };
            hours
        });

    hours
        .into_iter()
        .map(|((date, hour), acc)| AggregatedHour {
            date,
            hour,
            totals: acc.totals,
            disbalance: acc
                .net
                .into_iter()
                .map(|(field, net)| (field, net.max(0.0)))
                .collect(),
            direction: acc.direction.unwrap_or_default(),
        })
        .collect()
}

/// Identifies one round of fetches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoundToken(u64);

impl RoundToken {
    /// Tags a result with the round it belongs to.
    pub fn stamp<T>(self, value: T) -> Stamped<T> {
        Stamped { token: self, value }
    }
}

/// A result tagged with the round that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Stamped<T> {
    token: RoundToken,
    value: T,
}

impl<T> Stamped<T> {
    pub fn token(&self) -> RoundToken {
        self.token
    }
}

/// Hands out round tokens, and rejects results of superseded rounds.
#[derive(Debug, Default)]
pub struct RoundTracker {
    latest: u64,
}

impl RoundTracker {
    /// Starts a new round.  Results of all earlier rounds become stale.
    pub fn begin(&mut self) -> RoundToken {
        self.latest += 1;
        RoundToken(self.latest)
    }

    pub fn is_current(&self, token: RoundToken) -> bool {
        token.0 == self.latest
    }

    /// Returns the value of a result from the current round, or `None` if
    /// the result is stale.
    pub fn accept<T>(&self, stamped: Stamped<T>) -> Option<T> {
        if self.is_current(stamped.token) {
            Some(stamped.value)
        } else {
            tracing::debug!(
                "Discarding the result of round {}, the current round is {}.",
                stamped.token.0,
                self.latest
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{FormulaBook, FormulaDefinition, HourScope};
    use crate::report::{
        build_report, CellValue, Column, Grouping, Layout, Report, Row, StatKind,
    };
    use crate::test_utils::{date, directory, record};
    use crate::{Error, ReportConfig};

    type Fetch = Result<Vec<HourRecord>, FetchError>;

    fn one_day() -> Result<DateRange, Error> {
        DateRange::new(date(2024, 1, 1), date(2024, 1, 1))
    }

    /// O1 has data for hour 1, the fetch of O2 fails, and O3 has data for
    /// hour 2 but answers last.
    fn fetch(entity: EntityRef, _range: DateRange) -> impl Future<Output = Fetch> {
        let day = date(2024, 1, 1);
        let result = match entity {
            EntityRef::Object(10) => Ok(vec![record(
                entity,
                day,
                1,
                &[(HourField::P1, 10.0), (HourField::P1Gen, 3.0)],
            )]),
            EntityRef::Object(11) => Err(FetchError::new(entity, "connection refused")),
            EntityRef::Object(12) => Ok(vec![record(
                entity,
                day,
                2,
                &[(HourField::P1, 1.0), (HourField::P1Gen, 5.0), (HourField::F1, 2.0)],
            )]),
            _ => Ok(vec![]),
        };
        async move {
            if entity == EntityRef::Object(12) {
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
            }
            result
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_is_zero_filled() -> Result<(), Error> {
        let aggregate = aggregate(&[10, 11], one_day()?, fetch).await;

        assert_eq!(aggregate.hours.len(), 24);
        assert_eq!(
            aggregate.failed,
            vec![FetchError::new(EntityRef::Object(11), "connection refused")]
        );
        let first = &aggregate.hours[0];
        assert_eq!(first.total(HourField::P1), 10.0);
        assert_eq!(first.total(HourField::P1Gen), 3.0);
        assert_eq!(first.disbalance[&HourField::P1], 7.0);

        // The same value through a formula over the summed record.
        let book = FormulaBook::new([FormulaDefinition::new(
            "Disbalance",
            "max(sum(P1-P1_Gen), 0)",
        )]);
        let records = vec![first.to_record(EntityRef::Subject(1))];
        let scope = HourScope::new(&records, 0).ok_or_else(|| Error::internal("no record"))?;
        assert_eq!(book.evaluate("Disbalance", &scope, 100)?, 7.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_disbalance_is_never_negative() -> Result<(), Error> {
        let aggregate = aggregate(&[10, 11, 12], one_day()?, fetch).await;

        for hour in &aggregate.hours {
            for field in HourField::DISBALANCE {
                assert!(hour.disbalance[&field] >= 0.0, "{field} at hour {}", hour.hour);
            }
        }
        // 1 - 5 is negative and floored.
        assert_eq!(aggregate.hours[1].disbalance[&HourField::P1], 0.0);
        assert_eq!(aggregate.hours[1].disbalance[&HourField::F1], 2.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_canonical_order() -> Result<(), Error> {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 2))?;
        let aggregate = aggregate(&[12, 10], range, fetch).await;

        let keys = aggregate
            .hours
            .iter()
            .map(|h| (h.date, h.hour))
            .collect::<Vec<_>>();
        assert_eq!(keys, range.hours().collect::<Vec<_>>());
        assert_eq!(aggregate.hours[0].total(HourField::P1), 10.0);
        assert_eq!(aggregate.hours[1].total(HourField::P1), 1.0);
        Ok(())
    }

    #[test]
    fn test_zero_fill() -> Result<(), Error> {
        let range = one_day()?;
        let o1 = EntityRef::Object(1);
        let day = date(2024, 1, 1);

        let filled = zero_fill(
            o1,
            &range,
            Ok(vec![
                record(o1, day, 3, &[(HourField::F1, 1.0)]),
                record(o1, day, 3, &[(HourField::F1, 9.0)]),
                record(o1, date(2024, 1, 2), 1, &[(HourField::F1, 9.0)]),
                record(EntityRef::Object(2), day, 4, &[(HourField::F1, 9.0)]),
            ]),
        );
        assert_eq!(filled.len(), 24);
        assert_eq!(filled[2].get(HourField::F1), 1.0);
        assert_eq!(filled.iter().map(|r| r.get(HourField::F1)).sum::<f64>(), 1.0);
        assert!(filled.iter().all(|r| r.entity() == o1));

        let filled = zero_fill(o1, &range, Err(FetchError::new(o1, "timeout")));
        assert_eq!(filled.len(), 24);
        assert!(filled
            .iter()
            .all(|r| HourField::ALL.iter().all(|f| r.get(*f) == 0.0)));
        Ok(())
    }

    #[test]
    fn test_combine_directions() {
        let day = date(2024, 1, 1);
        let up = |id, hour| record(EntityRef::Object(id), day, hour, &[(HourField::Direction, 1.0)]);
        let down = |id, hour| record(EntityRef::Object(id), day, hour, &[(HourField::Direction, -1.0)]);

        let records = [up(1, 2), up(2, 2), up(1, 1), down(2, 1)];
        let hours = combine(&records);
        assert_eq!(hours.len(), 2);
        assert_eq!((hours[0].hour, hours[0].direction), (1, Direction::None));
        assert_eq!((hours[1].hour, hours[1].direction), (2, Direction::Up));
        assert!(combine(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_round_tokens() {
        let mut tracker = RoundTracker::default();
        let first = tracker.begin();
        let second = tracker.begin();
        assert!(!tracker.is_current(first));

        // The first round answers after the second one.
        let fresh = second.stamp("fresh");
        let stale = first.stamp("stale");
        assert_eq!(stale.token(), first);
        assert_eq!(tracker.accept(stale), None);
        assert_eq!(tracker.accept(fresh), Some("fresh"));
    }

    #[tokio::test]
    async fn test_gather_store() -> Result<(), Error> {
        let definition = TableDefinition {
            name: "t".to_string(),
            range: one_day()?,
            grouping: Default::default(),
            layout: Default::default(),
            rows: vec![Row::subject(1).with_objects([10, 11]), Row::object(12)],
            columns: vec![Column::statistical("p", HourField::P1, StatKind::Sum)],
        };
        let gathered = gather_store(&definition, fetch).await;

        assert_eq!(gathered.failed.len(), 1);
        // Successful fetches are kept as they are, failed ones are zero-filled.
        assert_eq!(gathered.store.records(EntityRef::Object(10)).len(), 1);
        assert_eq!(gathered.store.records(EntityRef::Object(11)).len(), 24);
        assert_eq!(gathered.store.records(EntityRef::Object(12)).len(), 1);
        assert!(gathered.store.records(EntityRef::Subject(1)).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_gathered_reports_keep_missing_hours() -> Result<(), Error> {
        let definition = TableDefinition {
            name: "t".to_string(),
            range: one_day()?,
            grouping: Grouping::BY_DATE_HOUR,
            layout: Layout::Pivot,
            rows: vec![Row::subject(1), Row::object(10), Row::object(11)],
            columns: vec![Column::statistical("p", HourField::P1, StatKind::Sum)],
        };
        let gathered = gather_store(&definition, fetch).await;
        let report = build_report(
            &definition,
            &directory(),
            &gathered.store,
            &[],
            &ReportConfig::default(),
        )?;
        let Report::Pivot(table) = report else {
            panic!("expected a pivot table");
        };

        let day = date(2024, 1, 1);
        let value = |row: usize, hour: u8| {
            table
                .cell(row, 0)
                .and_then(|cell| cell.get(Some(day), Some(hour)))
                .cloned()
        };
        // S1 fetched no records at all.
        assert_eq!(value(0, 1), Some(CellValue::NoData));
        assert_eq!(value(0, 5), Some(CellValue::NoData));
        // O1 has a record for hour 1 only.
        assert_eq!(value(1, 1), Some(CellValue::Number(10.0)));
        assert_eq!(value(1, 5), Some(CellValue::NoData));
        // The fetch of O2 failed and was replaced with zeros.
        assert_eq!(value(2, 5), Some(CellValue::Number(0.0)));
        Ok(())
    }
}
