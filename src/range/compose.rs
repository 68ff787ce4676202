use super::ByteRange;

/// Single-pass coalescer for tile ranges in submission order.
///
/// Only ranges that start on the byte right after the current accumulator
/// are merged into it. Anything else, overlapping ranges included, closes the
/// accumulator and opens a new one. Emitted ranges are never reopened, so
/// callers that want overlaps folded should submit in ascending offset order.
#[derive(Clone, Debug, Default)]
pub struct RangeComposer {
    current: Option<ByteRange>,
    composed: Vec<ByteRange>,
}

impl RangeComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, range: ByteRange) {
        self.current = Some(match self.current {
            Some(current) if current.is_followed_by(&range) => ByteRange {
                start: current.start,
                end: range.end,
            },
            Some(current) => {
                self.composed.push(current);
                range
            }
            None => range,
        });
    }

    /// Ranges emitted so far, not counting the open accumulator
    pub fn emitted(&self) -> &[ByteRange] {
        &self.composed
    }

    pub fn finish(mut self) -> Vec<ByteRange> {
        if let Some(current) = self.current.take() {
            self.composed.push(current);
        }
        self.composed
    }
}

impl Extend<ByteRange> for RangeComposer {
    fn extend<I: IntoIterator<Item = ByteRange>>(&mut self, iter: I) {
        for range in iter {
            self.push(range);
        }
    }
}

pub fn compose<I: IntoIterator<Item = ByteRange>>(ranges: I) -> Vec<ByteRange> {
    let mut composer = RangeComposer::new();
    composer.extend(ranges);
    composer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: u64, end: u64) -> ByteRange {
        ByteRange { start, end }
    }

    #[test]
    fn nothing_pushed_composes_to_nothing() {
        assert!(RangeComposer::new().finish().is_empty());
        assert!(compose(vec![]).is_empty());
    }

    #[test]
    fn single_range_passes_through() {
        assert_eq!(compose(vec![r(40, 80)]), vec![r(40, 80)]);
    }

    #[test]
    fn contiguous_ranges_merge() {
        assert_eq!(compose(vec![r(0, 99), r(100, 199)]), vec![r(0, 199)]);
        assert_eq!(
            compose(vec![r(0, 99), r(100, 199), r(200, 200), r(201, 450)]),
            vec![r(0, 450)]
        );
    }

    #[test]
    fn gaps_split_output() {
        assert_eq!(
            compose(vec![r(0, 99), r(200, 299)]),
            vec![r(0, 99), r(200, 299)]
        );
    }

    #[test]
    fn overlaps_are_not_folded() {
        assert_eq!(
            compose(vec![r(0, 99), r(50, 149)]),
            vec![r(0, 99), r(50, 149)]
        );
    }

    #[test]
    fn emitted_ranges_are_never_reopened() {
        // [200,299] would be contiguous with [100,199] but arrives after it was closed
        assert_eq!(
            compose(vec![r(100, 199), r(0, 99), r(200, 299)]),
            vec![r(100, 199), r(0, 99), r(200, 299)]
        );
    }

    #[test]
    fn emitted_excludes_open_accumulator() {
        let mut composer = RangeComposer::new();
        composer.push(r(0, 9));
        assert!(composer.emitted().is_empty());
        composer.push(r(20, 29));
        assert_eq!(composer.emitted(), &[r(0, 9)]);
        assert_eq!(composer.finish(), vec![r(0, 9), r(20, 29)]);
    }
}
