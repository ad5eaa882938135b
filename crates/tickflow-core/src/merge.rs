//! Decides which fetched points are new relative to persisted state.

use std::collections::HashSet;

use crate::{TimeSeriesPoint, Timestamp};

/// Points of `fetched` whose timestamp is not in `persisted`, ascending.
///
/// Duplicate timestamps within `fetched` collapse to their first occurrence.
pub fn new_points(
    persisted: &HashSet<Timestamp>,
    fetched: Vec<TimeSeriesPoint>,
) -> Vec<TimeSeriesPoint> {
    let mut seen = HashSet::with_capacity(fetched.len());
    let mut fresh: Vec<TimeSeriesPoint> = fetched
        .into_iter()
        .filter(|point| !persisted.contains(&point.timestamp) && seen.insert(point.timestamp))
        .collect();
    fresh.sort_by_key(|point| point.timestamp);
    fresh
}
