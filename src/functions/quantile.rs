//! Quantile estimation
//!
//! Three estimators live here: plain order statistics over a list of floats,
//! classic histograms reconstructed from cumulative `le` buckets, and native
//! histograms walked through their bucket iterator.

use std::cmp::Ordering;

use crate::model::FloatHistogram;

/// Relative tolerance below which neighbouring cumulative bucket counts are
/// considered equal
const SMALL_DELTA_TOLERANCE: f64 = 1e-12;

/// Ascending float order with NaN after every number
pub fn nan_last(a: &f64, b: &f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
    }
}

/// φ-quantile of `values`, interpolating linearly between closest ranks
///
/// `values` is sorted in place. Returns NaN for an empty input or NaN `q`,
/// `-Inf` for `q < 0` and `+Inf` for `q > 1`.
pub fn quantile(q: f64, values: &mut [f64]) -> f64 {
    if values.is_empty() || q.is_nan() {
        return f64::NAN;
    }
    if q < 0.0 {
        return f64::NEG_INFINITY;
    }
    if q > 1.0 {
        return f64::INFINITY;
    }
    values.sort_by(nan_last);

    let n = values.len() as f64;
    let rank = q * (n - 1.0);
    let lower = rank.floor().max(0.0);
    let upper = (lower + 1.0).min(n - 1.0);
    let weight = rank - rank.floor();
    values[lower as usize] * (1.0 - weight) + values[upper as usize] * weight
}

/// One cumulative bucket of a classic histogram
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassicBucket {
    /// Value of the `le` label
    pub upper_bound: f64,
    /// Cumulative count of observations at or below `upper_bound`
    pub count: f64,
}

impl ClassicBucket {
    /// Create a bucket
    pub fn new(upper_bound: f64, count: f64) -> Self {
        Self { upper_bound, count }
    }
}

/// Result of [`bucket_quantile`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketQuantile {
    /// Estimated quantile
    pub value: f64,
    /// A bucket count decreased and was raised to its predecessor's
    pub forced_monotonicity: bool,
    /// Tiny count differences from float rounding were smoothed out
    pub fixed_precision: bool,
}

impl BucketQuantile {
    fn plain(value: f64) -> Self {
        Self {
            value,
            forced_monotonicity: false,
            fixed_precision: false,
        }
    }
}

/// Estimate the φ-quantile from classic cumulative buckets
///
/// The buckets are sorted, duplicate bounds coalesced and counts forced to
/// be monotonic before the bucket holding the target rank is located. Inside
/// that bucket the value is interpolated linearly, assuming the lower bound
/// of the first bucket is 0 when its upper bound is positive. A quantile in
/// the `+Inf` bucket yields the upper bound of the second highest bucket.
///
/// Without a `+Inf` bucket the answer is NaN.
pub fn bucket_quantile(q: f64, buckets: &mut Vec<ClassicBucket>) -> BucketQuantile {
    if q.is_nan() {
        return BucketQuantile::plain(f64::NAN);
    }
    if q < 0.0 {
        return BucketQuantile::plain(f64::NEG_INFINITY);
    }
    if q > 1.0 {
        return BucketQuantile::plain(f64::INFINITY);
    }
    buckets.sort_by(|a, b| nan_last(&a.upper_bound, &b.upper_bound));
    match buckets.last() {
        Some(b) if b.upper_bound == f64::INFINITY => {}
        _ => return BucketQuantile::plain(f64::NAN),
    }
    coalesce_buckets(buckets);
    let (forced_monotonicity, fixed_precision) = ensure_monotonic(buckets);
    let result = |value| BucketQuantile {
        value,
        forced_monotonicity,
        fixed_precision,
    };

    if buckets.len() < 2 {
        return result(f64::NAN);
    }
    let observations = buckets[buckets.len() - 1].count;
    if observations == 0.0 {
        return result(f64::NAN);
    }
    let mut rank = q * observations;
    let last = buckets.len() - 1;
    let b = buckets[..last]
        .iter()
        .position(|bucket| bucket.count >= rank)
        .unwrap_or(last);

    if b == last {
        return result(buckets[last - 1].upper_bound);
    }
    if b == 0 && buckets[0].upper_bound <= 0.0 {
        return result(buckets[0].upper_bound);
    }
    let mut start = 0.0;
    let end = buckets[b].upper_bound;
    let mut count = buckets[b].count;
    if b > 0 {
        start = buckets[b - 1].upper_bound;
        count -= buckets[b - 1].count;
        rank -= buckets[b - 1].count;
    }
    result(start + (end - start) * (rank / count))
}

/// Merge buckets sharing an upper bound; input must be sorted
fn coalesce_buckets(buckets: &mut Vec<ClassicBucket>) {
    buckets.dedup_by(|cur, prev| {
        if cur.upper_bound == prev.upper_bound {
            prev.count += cur.count;
            true
        } else {
            false
        }
    });
}

/// Make cumulative counts non-decreasing
///
/// Returns `(forced_monotonicity, fixed_precision)`.
fn ensure_monotonic(buckets: &mut [ClassicBucket]) -> (bool, bool) {
    let (mut forced, mut fixed) = (false, false);
    let Some(first) = buckets.first() else {
        return (false, false);
    };
    let mut prev = first.count;
    for bucket in buckets.iter_mut().skip(1) {
        let cur = bucket.count;
        if cur == prev {
            continue;
        }
        if almost_equal(prev, cur, SMALL_DELTA_TOLERANCE) {
            bucket.count = prev;
            fixed = true;
            continue;
        }
        if cur < prev {
            bucket.count = prev;
            forced = true;
            continue;
        }
        prev = cur;
    }
    (forced, fixed)
}

/// Relative float comparison, NaN equals NaN
pub fn almost_equal(a: f64, b: f64, epsilon: f64) -> bool {
    const MIN_NORMAL: f64 = f64::MIN_POSITIVE;

    if a.is_nan() && b.is_nan() {
        return true;
    }
    if a == b {
        return true;
    }
    let abs_sum = a.abs() + b.abs();
    let diff = (a - b).abs();
    if a == 0.0 || b == 0.0 || abs_sum < MIN_NORMAL {
        return diff < epsilon * MIN_NORMAL;
    }
    diff / abs_sum.min(f64::MAX) < epsilon
}

/// Estimate the φ-quantile of a native histogram
///
/// Buckets are walked from the lowest upwards until the cumulative count
/// reaches `q * count`. Within the bucket the value is interpolated
/// exponentially for exponential schemas and linearly for custom buckets and
/// the zero bucket, matching how observations are assumed to spread.
pub fn histogram_quantile(q: f64, h: &FloatHistogram) -> f64 {
    if q < 0.0 {
        return f64::NEG_INFINITY;
    }
    if q > 1.0 {
        return f64::INFINITY;
    }
    if h.count == 0.0 || q.is_nan() {
        return f64::NAN;
    }

    let rank = q * h.count;
    let mut count = 0.0;
    let mut found = None;
    for bucket in h.all_buckets() {
        if bucket.count == 0.0 {
            continue;
        }
        count += bucket.count;
        found = Some(bucket);
        if count >= rank {
            break;
        }
    }
    let Some(mut bucket) = found else {
        return f64::NAN;
    };

    if h.uses_custom_buckets() {
        if bucket.lower == f64::NEG_INFINITY {
            if bucket.upper <= 0.0 {
                return bucket.upper;
            }
            bucket.lower = 0.0;
        } else if bucket.upper == f64::INFINITY {
            return bucket.lower;
        }
    } else if bucket.lower < 0.0 && bucket.upper > 0.0 {
        if h.negative_buckets.is_empty() && !h.positive_buckets.is_empty() {
            bucket.lower = 0.0;
        } else if h.positive_buckets.is_empty() && !h.negative_buckets.is_empty() {
            bucket.upper = 0.0;
        }
    }

    if count > h.count {
        count = h.count;
    }
    // only possible with NaN observations, which are counted but bucketless
    if count < rank {
        return bucket.upper;
    }

    let fraction = (rank - (count - bucket.count)) / bucket.count;
    if h.uses_custom_buckets() || (bucket.lower <= 0.0 && bucket.upper >= 0.0) {
        return bucket.lower + (bucket.upper - bucket.lower) * fraction;
    }

    let log_lower = bucket.lower.abs().log2();
    let log_upper = bucket.upper.abs().log2();
    if bucket.lower > 0.0 {
        (log_lower + (log_upper - log_lower) * fraction).exp2()
    } else {
        -(log_upper + (log_lower - log_upper) * (1.0 - fraction)).exp2()
    }
}

/// Estimated fraction of observations of `h` between `lower` and `upper`
///
/// Returns NaN for an empty histogram or NaN bounds and 0 when
/// `lower >= upper`.
pub fn histogram_fraction(lower: f64, upper: f64, h: &FloatHistogram) -> f64 {
    if h.count == 0.0 || lower.is_nan() || upper.is_nan() {
        return f64::NAN;
    }
    if lower >= upper {
        return 0.0;
    }

    let custom = h.uses_custom_buckets();
    let mut rank = 0.0;
    let (mut lower_rank, mut upper_rank) = (None, None);
    for mut b in h.all_buckets() {
        let mut zero_bucket = false;
        if !custom && b.lower <= 0.0 && b.upper >= 0.0 {
            zero_bucket = true;
            if h.negative_buckets.is_empty() && !h.positive_buckets.is_empty() {
                b.lower = 0.0;
            } else if h.positive_buckets.is_empty() && !h.negative_buckets.is_empty() {
                b.upper = 0.0;
            }
        }
        if custom && b.lower == f64::NEG_INFINITY && b.upper > 0.0 {
            b.lower = 0.0;
        }

        let interpolate = |v: f64| -> f64 {
            if b.lower.is_infinite() || b.upper.is_infinite() {
                return rank;
            }
            if custom || zero_bucket {
                return rank + b.count * (v - b.lower) / (b.upper - b.lower);
            }
            let log_lower = b.lower.abs().log2();
            let log_upper = b.upper.abs().log2();
            let log_v = v.abs().log2();
            let fraction = if v > 0.0 {
                (log_v - log_lower) / (log_upper - log_lower)
            } else {
                1.0 - (log_v - log_upper) / (log_lower - log_upper)
            };
            rank + b.count * fraction
        };

        if lower_rank.is_none() && b.lower >= lower {
            lower_rank = Some(rank);
        }
        if upper_rank.is_none() && b.lower >= upper {
            upper_rank = Some(rank);
        }
        if lower_rank.is_some() && upper_rank.is_some() {
            break;
        }
        if lower_rank.is_none() && b.lower < lower && b.upper > lower {
            lower_rank = Some(interpolate(lower));
        }
        if upper_rank.is_none() && b.lower < upper && b.upper > upper {
            upper_rank = Some(interpolate(upper));
        }
        if lower_rank.is_some() && upper_rank.is_some() {
            break;
        }
        rank += b.count;
    }

    let lower_rank = lower_rank.map_or(h.count, |r| r.min(h.count));
    let upper_rank = upper_rank.map_or(h.count, |r| r.min(h.count));
    (upper_rank - lower_rank) / h.count
}
