//! Splitting a run's entry range into per-worker ranges.

use std::ops::Range;

/// Split `range` into at most `workers` contiguous, disjoint, non-empty
/// ranges covering it exactly.
///
/// With `whole_partitions` set and at least `workers` source partitions
/// overlapping the range, boundaries fall on partition edges (`offsets` as
/// returned by `RecordSource::partition_offsets`). Otherwise entries are
/// divided evenly.
pub fn plan_ranges(
    offsets: &[u64],
    range: Range<u64>,
    workers: usize,
    whole_partitions: bool,
) -> Vec<Range<u64>> {
    if range.is_empty() {
        return Vec::new();
    }
    let workers = workers.max(1);
    if workers == 1 {
        return vec![range];
    }
    if whole_partitions {
        let bounds = partition_bounds(offsets, &range);
        let n_parts = bounds.len().saturating_sub(1);
        if n_parts >= workers {
            return (0..workers)
                .map(|g| bounds[g * n_parts / workers]..bounds[(g + 1) * n_parts / workers])
                .collect();
        }
    }
    let len = range.end - range.start;
    let k = (workers as u64).min(len);
    (0..k)
        .map(|i| range.start + i * len / k..range.start + (i + 1) * len / k)
        .collect()
}

/// Boundaries of the non-empty partitions overlapping `range`, clipped to it.
fn partition_bounds(offsets: &[u64], range: &Range<u64>) -> Vec<u64> {
    let mut bounds = vec![range.start];
    for &o in offsets {
        if o > range.start && o < range.end && bounds.last() != Some(&o) {
            bounds.push(o);
        }
    }
    bounds.push(range.end);
    bounds
}
