use super::features::Segment;

/// Index of the segment active at `at_sec`: the largest `i` with
/// `segments[i].start_sec <= at_sec`, or 0 when `at_sec` precedes the first
/// segment. `segments` must be non-empty and sorted by start.
pub fn locate(segments: &[Segment], at_sec: f64) -> usize {
    debug_assert!(!segments.is_empty(), "locate on empty segment list");
    let idx = segments.partition_point(|s| s.start_sec <= at_sec);
    idx.saturating_sub(1)
}
