//! Common metric model shared by the parsers, the store and the threshold processor.
//!
//! Everything the scrape pipeline produces and everything the store holds is expressed
//! in terms of the types in this module: a scrape yields [`Metric`] values, metrics for
//! the same [`MetricKey`] accumulate into a [`MetricSet`], and a [`MetricSet`] diffed
//! against the previous scrape's totals produces a single [`DataPoint`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The closed set of metric families the agent understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricName {
    Requests,
    RequestErrors,
    RequestClientErrors,
    RequestDuration,
}

/// One observation produced by a parser for a single (ingress, service) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Counter {
        name: MetricName,
        ingress: String,
        service: String,
        value: u64,
    },
    Histogram {
        name: MetricName,
        ingress: String,
        service: String,
        /// `true` when `sum` is already a time-averaged rate (the HAProxy case) and
        /// must not be differenced across scrapes.
        relative: bool,
        sum: f64,
        count: u64,
    },
}

impl Metric {
    pub fn name(&self) -> MetricName {
        match self {
            Metric::Counter { name, .. } => *name,
            Metric::Histogram { name, .. } => *name,
        }
    }

    pub fn ingress(&self) -> &str {
        match self {
            Metric::Counter { ingress, .. } => ingress,
            Metric::Histogram { ingress, .. } => ingress,
        }
    }

    pub fn service(&self) -> &str {
        match self {
            Metric::Counter { service, .. } => service,
            Metric::Histogram { service, .. } => service,
        }
    }

    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.ingress(), self.service())
    }
}

/// Identifies a time series by the ingress and service it was observed for.
/// Either field may be empty, meaning "aggregate over all".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    pub ingress: String,
    pub service: String,
}

impl MetricKey {
    pub fn new(ingress: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            ingress: ingress.into(),
            service: service.into(),
        }
    }
}

/// Running totals for the request-duration histogram within a single scrape interval.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResponseTimeTotals {
    pub sum: f64,
    pub count: u64,
    pub relative: bool,
}

/// Totals accumulated for one [`MetricKey`] over one scrape interval.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricSet {
    pub requests: u64,
    pub request_errors: u64,
    pub request_client_errors: u64,
    pub request_duration: ResponseTimeTotals,
}

impl MetricSet {
    pub fn accumulate(&mut self, metric: &Metric) {
        match metric {
            Metric::Counter { name, value, .. } => match name {
                MetricName::Requests => self.requests += value,
                MetricName::RequestErrors => self.request_errors += value,
                MetricName::RequestClientErrors => self.request_client_errors += value,
                MetricName::RequestDuration => {}
            },
            Metric::Histogram {
                name,
                relative,
                sum,
                count,
                ..
            } => {
                if *name == MetricName::RequestDuration {
                    self.request_duration.sum += sum;
                    self.request_duration.count += count;
                    self.request_duration.relative = *relative;
                }
            }
        }
    }

    /// Returns the delta between this scrape and the previous one.
    ///
    /// If `prev.requests > self.requests` the request counter is assumed to have
    /// reset (process restart) and `self` is returned unchanged.
    pub fn relative_to(&self, prev: &MetricSet) -> MetricSet {
        if prev.requests > self.requests {
            return *self;
        }

        let request_duration = if self.request_duration.relative {
            self.request_duration
        } else {
            ResponseTimeTotals {
                sum: self.request_duration.sum - prev.request_duration.sum,
                count: self.request_duration.count.saturating_sub(prev.request_duration.count),
                relative: false,
            }
        };

        MetricSet {
            requests: self.requests - prev.requests,
            request_errors: self.request_errors.saturating_sub(prev.request_errors),
            request_client_errors: self
                .request_client_errors
                .saturating_sub(prev.request_client_errors),
            request_duration,
        }
    }

    /// Derives a [`DataPoint`] covering `seconds` seconds, with rates and percentages
    /// computed from the integer totals.
    pub fn to_data_point(&self, timestamp: i64, seconds: u64) -> DataPoint {
        let secs = seconds as f64;
        let req_per_s = if seconds == 0 { 0.0 } else { self.requests as f64 / secs };
        let request_err_per_s = if seconds == 0 {
            0.0
        } else {
            self.request_errors as f64 / secs
        };
        let request_client_err_per_s = if seconds == 0 {
            0.0
        } else {
            self.request_client_errors as f64 / secs
        };
        let request_err_percent = percent(self.request_errors, self.requests);
        let request_client_err_percent = percent(self.request_client_errors, self.requests);
        let avg_response_time = if self.request_duration.count == 0 {
            0.0
        } else {
            self.request_duration.sum / self.request_duration.count as f64
        };

        DataPoint {
            timestamp,
            seconds,
            requests: self.requests,
            request_errs: self.request_errors,
            request_client_errs: self.request_client_errors,
            response_time_sum: self.request_duration.sum,
            response_time_count: self.request_duration.count,
            req_per_s,
            request_err_per_s,
            request_err_percent,
            request_client_err_per_s,
            request_client_err_percent,
            avg_response_time,
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) * 100.0
    }
}

/// A derived, timestamped observation produced from a [`MetricSet`] over `seconds` seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: i64,
    pub seconds: u64,
    pub requests: u64,
    pub request_errs: u64,
    pub request_client_errs: u64,
    pub response_time_sum: f64,
    pub response_time_count: u64,
    pub req_per_s: f64,
    pub request_err_per_s: f64,
    pub request_err_percent: f64,
    pub request_client_err_per_s: f64,
    pub request_client_err_percent: f64,
    pub avg_response_time: f64,
}

impl DataPoint {
    pub fn zero(timestamp: i64, seconds: u64) -> Self {
        DataPoint {
            timestamp,
            seconds,
            ..Default::default()
        }
    }

    /// Extracts the scalar named by a threshold rule's `metric` field.
    pub fn scalar(&self, metric: &str) -> Option<f64> {
        match metric {
            "requestsPerSecond" => Some(self.req_per_s),
            "requestErrorsPerSecond" => Some(self.request_err_per_s),
            "requestClientErrorsPerSecond" => Some(self.request_client_err_per_s),
            "averageResponseTime" => Some(self.avg_response_time),
            _ => None,
        }
    }
}

/// Looks up the point at `ts` in an ascending-by-timestamp slice.
pub fn find_at(points: &[DataPoint], ts: i64) -> (i64, DataPoint) {
    match points.iter().position(|p| p.timestamp == ts) {
        Some(idx) => (idx as i64, points[idx]),
        None => (-1, DataPoint::default()),
    }
}

/// Sums the integer counters and `seconds` across `points` and recomputes every
/// derived rate/percentage from the sums. Never averages a rate directly.
///
/// The timestamp of the result is taken from the first point; callers that fold
/// points from several source buckets into one destination bucket (roll-up) are
/// expected to overwrite `timestamp` with the bucket boundary afterwards.
pub fn aggregate(points: &[DataPoint]) -> DataPoint {
    if points.is_empty() {
        return DataPoint::default();
    }

    let mut acc = MetricSet::default();
    let mut seconds = 0u64;
    for p in points {
        acc.requests += p.requests;
        acc.request_errors += p.request_errs;
        acc.request_client_errors += p.request_client_errs;
        acc.request_duration.sum += p.response_time_sum;
        acc.request_duration.count += p.response_time_count;
        seconds += p.seconds;
    }

    let mut result = acc.to_data_point(points[0].timestamp, seconds);
    result.timestamp = points[0].timestamp;
    result
}

/// Merges points from several groups, keyed by shared timestamp: sums the six
/// integer counters and `response_time_sum`, divides `seconds` by the number of
/// contributing groups, and recomputes every derived field from the sums.
pub fn merge_by_timestamp(groups: &[Vec<DataPoint>]) -> Vec<DataPoint> {
    let mut by_ts: HashMap<i64, (MetricSet, u64, u64)> = HashMap::new();

    for group in groups {
        for p in group {
            let entry = by_ts.entry(p.timestamp).or_insert((MetricSet::default(), 0, 0));
            entry.0.requests += p.requests;
            entry.0.request_errors += p.request_errs;
            entry.0.request_client_errors += p.request_client_errs;
            entry.0.request_duration.sum += p.response_time_sum;
            entry.0.request_duration.count += p.response_time_count;
            entry.1 += p.seconds;
            entry.2 += 1;
        }
    }

    let mut merged: Vec<DataPoint> = by_ts
        .into_iter()
        .map(|(ts, (totals, seconds_sum, contributors))| {
            let seconds = if contributors == 0 {
                0
            } else {
                seconds_sum / contributors
            };
            totals.to_data_point(ts, seconds)
        })
        .collect();

    merged.sort_by_key(|p| p.timestamp);
    merged
}

/// (ingress, service, ordered-by-timestamp sequence of points).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPointGroup {
    pub ingress: String,
    pub service: String,
    pub points: Vec<DataPoint>,
}
