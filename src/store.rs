//! Hierarchical roll-up time series store.
//!
//! Four fixed tables (1-minute, 10-minute, 1-hour, 1-day) each hold a mapping from
//! [`MetricKey`] to an ascending-by-timestamp sequence of [`DataPoint`]. A single
//! reader/writer lock protects all four tables and the watermark map: writers
//! (`insert`, `populate`, `roll_up`, `cleanup`, `commit_marks`) take the exclusive
//! lock, readers (`for_each`, `for_each_unmarked`) take the shared lock.

use crate::model::{aggregate, DataPoint, DataPointGroup, MetricKey};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableName {
    OneMinute,
    TenMinutes,
    OneHour,
    OneDay,
}

pub const ALL_TABLES: [TableName; 4] = [
    TableName::OneMinute,
    TableName::TenMinutes,
    TableName::OneHour,
    TableName::OneDay,
];

impl TableName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::OneMinute => "1m",
            TableName::TenMinutes => "10m",
            TableName::OneHour => "1h",
            TableName::OneDay => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(TableName::OneMinute),
            "10m" => Some(TableName::TenMinutes),
            "1h" => Some(TableName::OneHour),
            "1d" => Some(TableName::OneDay),
            _ => None,
        }
    }

    /// Minimum number of trailing points cleanup must retain.
    pub fn min_count(&self) -> usize {
        match self {
            TableName::OneMinute => 10,
            TableName::TenMinutes => 6,
            TableName::OneHour => 24,
            TableName::OneDay => 30,
        }
    }

    /// The table this one rolls up into, and the bucket granularity (seconds)
    /// points are grouped by before promotion. `None` for the coarsest table.
    pub fn rollup_target(&self) -> Option<(TableName, i64)> {
        match self {
            TableName::OneMinute => Some((TableName::TenMinutes, 600)),
            TableName::TenMinutes => Some((TableName::OneHour, 3600)),
            TableName::OneHour => Some((TableName::OneDay, 86_400)),
            TableName::OneDay => None,
        }
    }
}

type Series = HashMap<MetricKey, Vec<DataPoint>>;
type WaterMarks = HashMap<MetricKey, usize>;

#[derive(Default)]
struct Inner {
    tables: HashMap<TableName, Series>,
    marks: HashMap<TableName, WaterMarks>,
}

impl Inner {
    fn series(&self, table: TableName) -> Option<&Series> {
        self.tables.get(&table)
    }

    fn series_mut(&mut self, table: TableName) -> &mut Series {
        self.tables.entry(table).or_default()
    }

    fn marks_mut(&mut self, table: TableName) -> &mut WaterMarks {
        self.marks.entry(table).or_default()
    }
}

/// The multi-resolution time series store.
pub struct Store {
    inner: RwLock<Inner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Seeds a table at startup from remote history. Each group is sorted
    /// ascending and its watermark set to the group length, so existing history
    /// is not re-shipped.
    pub fn populate(&self, table: TableName, groups: Vec<DataPointGroup>) {
        let mut inner = self.inner.write();
        for mut group in groups {
            group.points.sort_by_key(|p| p.timestamp);
            let key = MetricKey::new(group.ingress, group.service);
            let len = group.points.len();
            inner.series_mut(table).insert(key.clone(), group.points);
            inner.marks_mut(table).insert(key, len);
        }
    }

    /// Inserts one point per key into the "1m" table, in caller-observed order.
    pub fn insert(&self, points: HashMap<MetricKey, DataPoint>) {
        let mut inner = self.inner.write();
        let series = inner.series_mut(TableName::OneMinute);
        for (key, point) in points {
            series.entry(key).or_default().push(point);
        }
    }

    /// Calls `visitor(ingress, service, points)` for every key in `table`.
    pub fn for_each(&self, table: TableName, mut visitor: impl FnMut(&str, &str, &[DataPoint])) {
        let inner = self.inner.read();
        if let Some(series) = inner.series(table) {
            for (key, points) in series {
                visitor(&key.ingress, &key.service, points);
            }
        }
    }

    /// Calls `visitor(ingress, service, unshipped_tail)` for each key whose tail
    /// past its watermark is non-empty, and returns the watermark map the caller
    /// should commit after a successful ship (every key mapped to `len(points)`).
    pub fn for_each_unmarked(
        &self,
        table: TableName,
        mut visitor: impl FnMut(&str, &str, &[DataPoint]),
    ) -> WaterMarks {
        let inner = self.inner.read();
        let mut new_marks = WaterMarks::new();
        let Some(series) = inner.series(table) else {
            return new_marks;
        };
        let marks = inner.marks.get(&table);
        for (key, points) in series {
            let mark = marks.and_then(|m| m.get(key)).copied().unwrap_or(0);
            let tail = &points[mark.min(points.len())..];
            if !tail.is_empty() {
                visitor(&key.ingress, &key.service, tail);
            }
            new_marks.insert(key.clone(), points.len());
        }
        new_marks
    }

    /// Installs (merges) a new watermark map for `table`.
    pub fn commit_marks(&self, table: TableName, marks: WaterMarks) {
        let mut inner = self.inner.write();
        let existing = inner.marks_mut(table);
        for (key, mark) in marks {
            existing.insert(key, mark);
        }
    }

    /// Promotes every source point whose bucket has fully elapsed into its
    /// successor table. A destination bucket that already has a point is left
    /// untouched; existing destination points are never modified.
    pub fn roll_up(&self, now_unix: i64) {
        let mut inner = self.inner.write();
        for table in [TableName::OneMinute, TableName::TenMinutes, TableName::OneHour] {
            let Some((next, granularity)) = table.rollup_target() else {
                continue;
            };
            let now_bucket = now_unix - now_unix.rem_euclid(granularity);

            let Some(source) = inner.tables.get(&table) else {
                continue;
            };
            let existing = inner.tables.get(&next).cloned().unwrap_or_default();

            let mut promotions: HashMap<MetricKey, Vec<DataPoint>> = HashMap::new();
            for (key, points) in source {
                let mut buckets: HashMap<i64, Vec<DataPoint>> = HashMap::new();
                for point in points {
                    if point.timestamp >= now_bucket {
                        continue;
                    }
                    let bucket = point.timestamp - point.timestamp.rem_euclid(granularity);
                    let has_dest = existing
                        .get(key)
                        .map(|dp| dp.iter().any(|d| d.timestamp == bucket))
                        .unwrap_or(false);
                    if has_dest {
                        continue;
                    }
                    buckets.entry(bucket).or_default().push(*point);
                }
                for (bucket, bucket_points) in buckets {
                    let mut merged = aggregate(&bucket_points);
                    merged.timestamp = bucket;
                    promotions.entry(key.clone()).or_default().push(merged);
                }
            }

            if promotions.is_empty() {
                continue;
            }
            let dest = inner.series_mut(next);
            for (key, mut new_points) in promotions {
                let entry = dest.entry(key).or_default();
                entry.append(&mut new_points);
                entry.sort_by_key(|p| p.timestamp);
            }
        }
    }

    /// Drops points no longer needed: at most `len - min_count` leading points
    /// per key, never crossing the watermark.
    pub fn cleanup(&self) {
        let mut inner = self.inner.write();
        for table in ALL_TABLES {
            let min_count = table.min_count();
            let Inner { tables, marks } = &mut *inner;
            let Some(series) = tables.get_mut(&table) else {
                continue;
            };
            let marks = marks.entry(table).or_default();
            for (key, points) in series.iter_mut() {
                let watermark = marks.get(key).copied().unwrap_or(0);
                let over = points.len().saturating_sub(min_count);
                let drop_count = over.min(watermark);
                if drop_count == 0 {
                    continue;
                }
                points.drain(0..drop_count);
                marks.insert(key.clone(), watermark - drop_count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricSet;

    fn point(ts: i64, requests: u64) -> DataPoint {
        MetricSet {
            requests,
            ..Default::default()
        }
        .to_data_point(ts, 60)
    }

    #[test]
    fn populate_sorts_and_sets_watermark() {
        let store = Store::new();
        let group = DataPointGroup {
            ingress: "bar".to_string(),
            service: "baz".to_string(),
            points: vec![point(42, 1), point(41, 1)],
        };
        store.populate(TableName::OneMinute, vec![group]);

        let mut seen = Vec::new();
        store.for_each(TableName::OneMinute, |ingress, service, points| {
            seen.push((ingress.to_string(), service.to_string(), points.to_vec()));
        });
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].2.iter().map(|p| p.timestamp).collect::<Vec<_>>(), vec![41, 42]);

        let key = MetricKey::new("bar", "baz");
        let unmarked = store.for_each_unmarked(TableName::OneMinute, |_, _, _| {
            panic!("populated points should already be marked");
        });
        assert_eq!(unmarked[&key], 2);
    }

    #[test]
    fn insert_appends_to_one_minute_table_only() {
        let store = Store::new();
        let mut points = HashMap::new();
        points.insert(MetricKey::new("i", "s"), point(0, 10));
        store.insert(points);

        let mut count = 0;
        store.for_each(TableName::OneMinute, |_, _, _| count += 1);
        assert_eq!(count, 1);

        let mut other_count = 0;
        store.for_each(TableName::TenMinutes, |_, _, _| other_count += 1);
        assert_eq!(other_count, 0);
    }

    #[test]
    fn for_each_unmarked_yields_only_tail_and_returns_full_length() {
        let store = Store::new();
        let key = MetricKey::new("i", "s");
        let mut points = HashMap::new();
        points.insert(key.clone(), point(0, 1));
        store.insert(points.clone());
        points.insert(key.clone(), point(60, 1));
        store.insert(points);

        let marks = store.for_each_unmarked(TableName::OneMinute, |_, _, tail| {
            assert_eq!(tail.len(), 2);
        });
        store.commit_marks(TableName::OneMinute, marks);

        let marks_again = store.for_each_unmarked(TableName::OneMinute, |_, _, _| {
            panic!("nothing should be unmarked after commit");
        });
        assert_eq!(marks_again[&key], 2);
    }

    #[test]
    fn roll_up_is_idempotent() {
        let store = Store::new();
        let mut points = HashMap::new();
        for i in 0..10 {
            points.insert(MetricKey::new("i", "s"), point(i * 60, 10));
            store.insert(points.clone());
        }

        store.roll_up(700);
        let mut first_pass = Vec::new();
        store.for_each(TableName::TenMinutes, |_, _, pts| first_pass = pts.to_vec());

        store.roll_up(700);
        let mut second_pass = Vec::new();
        store.for_each(TableName::TenMinutes, |_, _, pts| second_pass = pts.to_vec());

        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn roll_up_deterministic_bucketing() {
        // now = 00:10:00; "1m" has nine points at 60s..540s (00:01..00:09).
        let store = Store::new();
        for i in 1..=9 {
            let mut points = HashMap::new();
            points.insert(MetricKey::new("i", "s"), point(i * 60, 10));
            store.insert(points);
        }

        store.roll_up(600);

        let mut result = Vec::new();
        store.for_each(TableName::TenMinutes, |_, _, pts| result = pts.to_vec());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].timestamp, 0);
        assert_eq!(result[0].requests, 90);
        assert_eq!(result[0].seconds, 540);
    }

    #[test]
    fn roll_up_skips_points_in_the_still_open_bucket() {
        let store = Store::new();
        let mut points = HashMap::new();
        points.insert(MetricKey::new("i", "s"), point(550, 10));
        store.insert(points);

        store.roll_up(600);

        let mut count = 0;
        store.for_each(TableName::TenMinutes, |_, _, pts| count = pts.len());
        assert_eq!(count, 0);
    }

    #[test]
    fn cleanup_never_drops_past_watermark() {
        let store = Store::new();
        let key = MetricKey::new("i", "s");
        for i in 0..20 {
            let mut points = HashMap::new();
            points.insert(key.clone(), point(i * 60, 1));
            store.insert(points);
        }
        // Nothing committed, watermark stays at 0: cleanup must not drop anything.
        store.cleanup();
        let mut len = 0;
        store.for_each(TableName::OneMinute, |_, _, pts| len = pts.len());
        assert_eq!(len, 20);
    }

    #[test]
    fn cleanup_drops_shipped_points_beyond_min_count() {
        let store = Store::new();
        let key = MetricKey::new("i", "s");
        for i in 0..20 {
            let mut points = HashMap::new();
            points.insert(key.clone(), point(i * 60, 1));
            store.insert(points);
        }
        let marks = store.for_each_unmarked(TableName::OneMinute, |_, _, _| {});
        store.commit_marks(TableName::OneMinute, marks);

        store.cleanup();
        let mut points = Vec::new();
        store.for_each(TableName::OneMinute, |_, _, pts| points = pts.to_vec());
        assert_eq!(points.len(), TableName::OneMinute.min_count());
        assert_eq!(points[0].timestamp, (20 - TableName::OneMinute.min_count() as i64) * 60);
    }
}
