//! Row ownership.
//!
//! Mutation rights on a pixel plane are handed out as half-open row ranges.
//! Ranges given to concurrent writers never overlap; that partition is the
//! only concurrency control the shared planes have.

use std::ops::Range;

/// A half-open range of plane rows, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RowRange {
    /// First row.
    pub start: usize,
    /// One past the last row.
    pub end: usize,
}

impl RowRange {
    /// Create a range. `end` is clamped to be at least `start`.
    pub const fn new(start: usize, end: usize) -> Self {
        let end = if end < start { start } else { end };
        Self { start, end }
    }

    /// All rows of a plane with `height` rows.
    pub const fn full(height: usize) -> Self {
        Self::new(0, height)
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if the range holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `row` falls inside the range.
    #[inline]
    pub fn contains(&self, row: usize) -> bool {
        row >= self.start && row < self.end
    }

    /// Whether two ranges share any row.
    pub fn overlaps(&self, other: &RowRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }

    /// Split at `row` (clamped into the range).
    pub fn split_at(&self, row: usize) -> (RowRange, RowRange) {
        let mid = row.clamp(self.start, self.end);
        (RowRange::new(self.start, mid), RowRange::new(mid, self.end))
    }

    /// Divide this range among `units` execution units.
    ///
    /// See [`partition`]; the returned ranges are offset by `self.start`.
    pub fn partition(&self, units: usize) -> Vec<RowRange> {
        partition(self.len(), units)
            .into_iter()
            .map(|r| RowRange::new(r.start + self.start, r.end + self.start))
            .collect()
    }

    /// As a standard range.
    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }
}

impl From<Range<usize>> for RowRange {
    fn from(range: Range<usize>) -> Self {
        RowRange::new(range.start, range.end)
    }
}

impl std::fmt::Display for RowRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Split `rows` rows among `units` execution units.
///
/// Unit `i` receives `[i * (rows / units), (i + 1) * (rows / units))`; the
/// last unit extends to `rows` and absorbs the remainder. `units` of zero is
/// treated as one. When `units > rows` the leading units receive empty
/// ranges and the last one takes everything.
pub fn partition(rows: usize, units: usize) -> Vec<RowRange> {
    let units = units.max(1);
    let chunk = rows / units;

    (0..units)
        .map(|i| {
            let start = i * chunk;
            let end = if i + 1 == units { rows } else { (i + 1) * chunk };
            RowRange::new(start, end)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exact_cover(ranges: &[RowRange], rows: usize) {
        let mut seen = vec![0u32; rows];
        for range in ranges {
            for row in range.as_range() {
                seen[row] += 1;
            }
        }
        assert!(
            seen.iter().all(|&n| n == 1),
            "rows={} ranges={:?} coverage={:?}",
            rows,
            ranges,
            seen
        );
    }

    #[test]
    fn test_partition_covers_exactly_once() {
        for rows in 1..=64 {
            for units in 1..=12 {
                let ranges = partition(rows, units);
                assert_eq!(ranges.len(), units);
                assert_exact_cover(&ranges, rows);

                // Contiguous and ordered
                assert_eq!(ranges[0].start, 0);
                assert_eq!(ranges[units - 1].end, rows);
                for pair in ranges.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                    assert!(!pair[0].overlaps(&pair[1]));
                }
            }
        }
    }

    #[test]
    fn test_partition_last_unit_absorbs_remainder() {
        let ranges = partition(10, 3);
        assert_eq!(
            ranges,
            vec![RowRange::new(0, 3), RowRange::new(3, 6), RowRange::new(6, 10)]
        );

        let ranges = partition(1080, 4);
        assert_eq!(ranges[3], RowRange::new(810, 1080));
    }

    #[test]
    fn test_partition_more_units_than_rows() {
        let ranges = partition(2, 5);
        assert_eq!(ranges.len(), 5);
        assert!(ranges[..4].iter().all(RowRange::is_empty));
        assert_eq!(ranges[4], RowRange::new(0, 2));
    }

    #[test]
    fn test_partition_zero_units() {
        assert_eq!(partition(7, 0), vec![RowRange::new(0, 7)]);
    }

    #[test]
    fn test_partition_is_deterministic() {
        assert_eq!(partition(1079, 7), partition(1079, 7));
    }

    #[test]
    fn test_subrange_partition_offsets() {
        let half = RowRange::new(540, 1080);
        let ranges = half.partition(4);
        assert_eq!(ranges[0], RowRange::new(540, 675));
        assert_eq!(ranges[3], RowRange::new(945, 1080));
    }

    #[test]
    fn test_split_and_overlap() {
        let range = RowRange::new(2, 8);
        let (a, b) = range.split_at(5);
        assert_eq!(a, RowRange::new(2, 5));
        assert_eq!(b, RowRange::new(5, 8));
        assert!(!a.overlaps(&b));
        assert!(range.overlaps(&a));

        let (a, b) = range.split_at(100);
        assert_eq!(a, range);
        assert!(b.is_empty());
    }
}
