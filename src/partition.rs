//! Work partitioning: split a contiguous source range into `chunks`
//! contiguous sub-slices.
//!
//! Boundaries use truncating integer division, matching the original
//! round-down chunk split — see the Open Question resolution in
//! `DESIGN.md`.

use std::ops::Range;

/// Partition `[range.start, range.end)` into `chunks` contiguous
/// sub-ranges whose boundaries are `start + (i * width) / chunks`
/// (integer division, truncated toward zero).
///
/// Always returns exactly `chunks` entries, some of which may be empty
/// (`start == end`); the indexing scheme must stay stable regardless of
/// which entries end up empty, so callers that want to skip empty
/// chunks should filter the result rather than call this with a
/// different `chunks` value.
pub fn partition_range(range: Range<usize>, chunks: usize) -> Vec<Range<usize>> {
    assert!(chunks > 0, "chunk count must be positive");

    let start = range.start;
    let width = (range.end - range.start) as u128;

    let boundary =
        |i: usize| -> usize { start + ((i as u128 * width) / chunks as u128) as usize };

    (0..chunks)
        .map(|i| boundary(i)..boundary(i + 1))
        .collect()
}

/// Like [`partition_range`] but drops empty sub-ranges, which is what
/// the scheduler actually dispatches.
pub fn non_empty_chunks(range: Range<usize>, chunks: usize) -> Vec<Range<usize>> {
    partition_range(range, chunks)
        .into_iter()
        .filter(|r| !r.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_the_range_exactly_with_no_overlap() {
        let chunks = partition_range(0..10, 4);
        assert_eq!(chunks.first().unwrap().start, 0);
        assert_eq!(chunks.last().unwrap().end, 10);
        for w in chunks.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
    }

    /// A ten-source range split into four chunks lands on
    /// `[0,2),[2,5),[5,7),[7,10)` under truncating division, not the
    /// evenly-spaced `[0,3),[3,5),[5,8),[8,10)` that rounding would give.
    #[test]
    fn ten_sources_into_four_chunks_matches_truncating_boundaries() {
        let chunks = partition_range(0..10, 4);
        assert_eq!(chunks, vec![0..2, 2..5, 5..7, 7..10]);
    }

    /// A single-source range split into six chunks yields five empty
    /// chunks and one non-empty chunk, with a stable index for each.
    #[test]
    fn one_source_into_six_chunks_leaves_five_empty() {
        let chunks = partition_range(0..1, 6);
        assert_eq!(chunks.len(), 6);
        let non_empty: Vec<_> = chunks.iter().filter(|r| !r.is_empty()).collect();
        assert_eq!(non_empty.len(), 1);
        assert_eq!(*non_empty[0], 0..1);

        assert_eq!(non_empty_chunks(0..1, 6), vec![0..1]);
    }

    #[test]
    fn zero_width_range_yields_all_empty_chunks() {
        let chunks = partition_range(5..5, 3);
        assert!(chunks.iter().all(|r| r.is_empty()));
    }
}
