//! Read-only query surface over the [`Store`], used by the threshold processor.

use crate::error::AgentError;
use crate::model::{merge_by_timestamp, DataPoint};
use crate::store::{Store, TableName};

/// Returns the ascending-by-timestamp points for the single group matching both
/// `ingress` and `service` exactly, restricted to `[from, to]` inclusive.
///
/// Errors if more than one distinct key in the table matches both selectors —
/// that can only happen if the store was populated inconsistently.
pub fn find_by_ingress_and_service(
    store: &Store,
    table: TableName,
    ingress: &str,
    service: &str,
    from: i64,
    to: i64,
) -> Result<Vec<DataPoint>, AgentError> {
    let mut matches: Vec<Vec<DataPoint>> = Vec::new();
    store.for_each(table, |key_ingress, key_service, points| {
        if key_ingress == ingress && key_service == service {
            matches.push(in_range(points, from, to));
        }
    });

    match matches.len() {
        0 => Ok(Vec::new()),
        1 => Ok(matches.remove(0)),
        _ => Err(AgentError::AmbiguousLookup {
            ingress: ingress.to_string(),
            service: service.to_string(),
        }),
    }
}

/// Fans in every key whose service matches, merging by shared timestamp.
pub fn find_by_service(store: &Store, table: TableName, service: &str, from: i64, to: i64) -> Vec<DataPoint> {
    let mut groups = Vec::new();
    store.for_each(table, |_, key_service, points| {
        if key_service == service {
            groups.push(in_range(points, from, to));
        }
    });
    merge_by_timestamp(&groups)
}

/// Fans in every key whose ingress matches, merging by shared timestamp.
pub fn find_by_ingress(store: &Store, table: TableName, ingress: &str, from: i64, to: i64) -> Vec<DataPoint> {
    let mut groups = Vec::new();
    store.for_each(table, |key_ingress, _, points| {
        if key_ingress == ingress {
            groups.push(in_range(points, from, to));
        }
    });
    merge_by_timestamp(&groups)
}

fn in_range(points: &[DataPoint], from: i64, to: i64) -> Vec<DataPoint> {
    if to <= from {
        return Vec::new();
    }
    points
        .iter()
        .copied()
        .filter(|p| p.timestamp >= from && p.timestamp <= to)
        .collect()
}
