//! Breaks comparison windows into aligned buckets.

use crate::error::{Error, Result};
use crate::model::{ComparisonRequest, TimeGranularity, TimeInterval};
use crate::timestamp::Timestamp;

/// Splits `[start, end)` into contiguous buckets of one granularity each.
///
/// Buckets are aligned on `start`; the final bucket is clamped to `end` so
/// the union covers the range exactly. Without a granularity the whole
/// range is a single bucket.
pub fn decompose(
    granularity: Option<&TimeGranularity>,
    start: Timestamp,
    end: Timestamp,
) -> Result<Vec<TimeInterval>> {
    let whole = TimeInterval::new(start, end)?;
    let Some(granularity) = granularity else {
        return Ok(vec![whole]);
    };

    let step = granularity.to_millis();
    if step <= 0 {
        return Err(Error::InvalidRequest(format!(
            "granularity {} has no width",
            granularity
        )));
    }

    let mut buckets = Vec::new();
    let mut bucket_start = start;
    while bucket_start < end {
        let bucket_end = bucket_start.saturating_add_millis(step).min(end);
        buckets.push(TimeInterval::new(bucket_start, bucket_end)?);
        bucket_start = bucket_end;
    }
    Ok(buckets)
}

/// Baseline and current buckets, index-aligned.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketedWindows {
    pub baseline: Vec<TimeInterval>,
    pub current: Vec<TimeInterval>,
}

impl BucketedWindows {
    pub fn len(&self) -> usize {
        self.baseline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baseline.is_empty()
    }

    /// The `(baseline, current)` pair for one bucket index.
    pub fn pair(&self, bucket: usize) -> Option<(TimeInterval, TimeInterval)> {
        Some((*self.baseline.get(bucket)?, *self.current.get(bucket)?))
    }
}

/// Decomposes both windows of `request` with its granularity.
///
/// Fails when the two windows do not produce the same number of buckets;
/// the join pairs baseline and current buckets by index, so unequal
/// sequences would silently misalign the comparison.
pub fn decompose_windows(request: &ComparisonRequest) -> Result<BucketedWindows> {
    let granularity = request.granularity();
    let baseline = request.baseline();
    let current = request.current();

    let baseline = decompose(granularity, baseline.start(), baseline.end())?;
    let current = decompose(granularity, current.start(), current.end())?;

    if baseline.len() != current.len() {
        return Err(Error::InvalidRequest(format!(
            "baseline window has {} buckets but current window has {}",
            baseline.len(),
            current.len()
        )));
    }

    Ok(BucketedWindows { baseline, current })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeUnit;
    use rstest::rstest;

    const DAY: i64 = 86_400_000;

    fn ts(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis)
    }

    #[rstest]
    #[case::single_bucket_without_granularity(None, 0, 3 * DAY, vec![(0, 3 * DAY)])]
    #[case::exact_days(Some(TimeGranularity::days(1)), 0, 2 * DAY, vec![(0, DAY), (DAY, 2 * DAY)])]
    #[case::clamped_tail(
        Some(TimeGranularity::new(40, TimeUnit::Milliseconds)),
        0,
        100,
        vec![(0, 40), (40, 80), (80, 100)]
    )]
    #[case::granularity_wider_than_range(Some(TimeGranularity::hours(1)), 10, 20, vec![(10, 20)])]
    #[case::negative_start(
        Some(TimeGranularity::new(5, TimeUnit::Seconds)),
        -10_000,
        0,
        vec![(-10_000, -5_000), (-5_000, 0)]
    )]
    fn should_decompose_range(
        #[case] granularity: Option<TimeGranularity>,
        #[case] start: i64,
        #[case] end: i64,
        #[case] expected: Vec<(i64, i64)>,
    ) {
        // when
        let buckets = decompose(granularity.as_ref(), ts(start), ts(end)).unwrap();

        // then
        let actual: Vec<(i64, i64)> = buckets
            .iter()
            .map(|b| (b.start().as_millis(), b.end().as_millis()))
            .collect();
        assert_eq!(actual, expected);
    }

    #[rstest]
    #[case(100, 100)]
    #[case(100, 50)]
    fn should_reject_empty_or_inverted_range(#[case] start: i64, #[case] end: i64) {
        let result = decompose(Some(&TimeGranularity::days(1)), ts(start), ts(end));
        assert_eq!(
            result,
            Err(Error::InvalidRange {
                start: ts(start),
                end: ts(end)
            })
        );
    }

    #[test]
    fn should_reject_zero_width_granularity() {
        let result = decompose(Some(&TimeGranularity::days(0)), ts(0), ts(DAY));
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn should_align_baseline_and_current_buckets_by_index() {
        // given: a two day current window and the same span one week earlier
        let current_start = 30 * DAY;
        let request = ComparisonRequest::builder("ads")
            .raw_metric("clicks")
            .baseline(ts(current_start - 7 * DAY), ts(current_start - 5 * DAY))
            .current(ts(current_start), ts(current_start + 2 * DAY))
            .granularity(TimeGranularity::days(1))
            .build()
            .unwrap();

        // when
        let windows = decompose_windows(&request).unwrap();

        // then
        assert_eq!(windows.len(), 2);
        for bucket in 0..windows.len() {
            let (baseline, current) = windows.pair(bucket).unwrap();
            assert_eq!(baseline.duration_millis(), current.duration_millis());
            assert_eq!(current.start() - baseline.start(), 7 * DAY);
        }
        assert_eq!(windows.pair(2), None);
    }

    #[test]
    fn should_reject_windows_with_different_bucket_counts() {
        // given
        let request = ComparisonRequest::builder("ads")
            .raw_metric("clicks")
            .baseline(ts(0), ts(DAY))
            .current(ts(DAY), ts(3 * DAY))
            .granularity(TimeGranularity::days(1))
            .build()
            .unwrap();

        // when
        let result = decompose_windows(&request);

        // then
        assert!(matches!(result, Err(Error::InvalidRequest(msg)) if msg.contains("1 buckets")));
    }
}
