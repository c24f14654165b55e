//! Native float histograms
//!
//! A [`FloatHistogram`] stores sparse bucket counts keyed by bucket index.
//! Two layouts exist:
//!
//! - **Exponential** schemas (-4..=8): bucket `i` on the positive side covers
//!   `(base^(i-1), base^i]` with `base = 2^(2^-schema)`. Negative buckets
//!   mirror this around zero. Observations with an absolute value at or below
//!   `zero_threshold` land in the zero bucket.
//! - **Custom** buckets (schema [`CUSTOM_BUCKETS_SCHEMA`]): explicit upper
//!   bounds in `custom_values`, bucket `i` covers
//!   `(custom_values[i-1], custom_values[i]]`, with `-Inf` below the first
//!   bound and `+Inf` above the last. Only positive bucket indices are used.
//!
//! Arithmetic between two exponential histograms first reconciles their zero
//! buckets and then reduces both to the coarser of the two schemas.

use std::collections::BTreeMap;

use crate::error::HistogramError;

/// Schema value marking a histogram with custom bucket bounds
pub const CUSTOM_BUCKETS_SCHEMA: i32 = -53;

/// Smallest supported exponential schema
pub const EXPONENTIAL_SCHEMA_MIN: i32 = -4;

/// Largest supported exponential schema
pub const EXPONENTIAL_SCHEMA_MAX: i32 = 8;

/// What the producer of a histogram knows about counter resets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CounterResetHint {
    /// Nothing is known, reset detection has to compare buckets
    #[default]
    Unknown,
    /// A counter reset happened right before this histogram
    CounterReset,
    /// No counter reset happened right before this histogram
    NotCounterReset,
    /// The histogram is a gauge, its counts may go up and down
    Gauge,
}

/// One bucket as seen by the bucket iterators
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    /// Lower bound
    pub lower: f64,
    /// Upper bound
    pub upper: f64,
    /// Whether the lower bound belongs to the bucket
    pub lower_inclusive: bool,
    /// Whether the upper bound belongs to the bucket
    pub upper_inclusive: bool,
    /// Observations in the bucket
    pub count: f64,
    /// Bucket index, zero for the zero bucket
    pub index: i32,
}

/// A native histogram with float counts
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FloatHistogram {
    /// Counter reset hint set by the producer
    pub counter_reset_hint: CounterResetHint,
    /// Bucket schema, see the module docs
    pub schema: i32,
    /// Width of the zero bucket, both directions
    pub zero_threshold: f64,
    /// Observations in the zero bucket
    pub zero_count: f64,
    /// Total number of observations
    pub count: f64,
    /// Sum of all observations
    pub sum: f64,
    /// Positive bucket counts by index
    pub positive_buckets: BTreeMap<i32, f64>,
    /// Negative bucket counts by index
    pub negative_buckets: BTreeMap<i32, f64>,
    /// Upper bounds for custom bucket histograms
    pub custom_values: Vec<f64>,
}

impl FloatHistogram {
    /// Empty exponential histogram with the given schema
    pub fn new(schema: i32) -> Self {
        Self {
            schema,
            ..Default::default()
        }
    }

    /// Histogram with custom bucket bounds and per-bucket counts
    ///
    /// `counts` has one entry per bucket, that is `bounds.len() + 1` entries
    /// when the implicit `+Inf` bucket is populated. Count and sum must be
    /// supplied separately since the buckets do not carry the sum.
    pub fn with_custom_buckets(bounds: Vec<f64>, counts: &[f64], sum: f64) -> Self {
        let positive_buckets = counts
            .iter()
            .enumerate()
            .map(|(i, c)| (i as i32, *c))
            .collect();
        Self {
            schema: CUSTOM_BUCKETS_SCHEMA,
            count: counts.iter().sum(),
            sum,
            positive_buckets,
            custom_values: bounds,
            ..Default::default()
        }
    }

    /// Whether this histogram uses custom bucket bounds
    pub fn uses_custom_buckets(&self) -> bool {
        self.schema == CUSTOM_BUCKETS_SCHEMA
    }

    /// Upper bound of positive bucket `index`
    pub fn bucket_upper(&self, index: i32) -> f64 {
        if self.uses_custom_buckets() {
            custom_upper(&self.custom_values, index)
        } else {
            exponential_bound(index, self.schema)
        }
    }

    /// Lower bound of positive bucket `index`
    pub fn bucket_lower(&self, index: i32) -> f64 {
        if self.uses_custom_buckets() {
            custom_lower(&self.custom_values, index)
        } else {
            exponential_bound(index - 1, self.schema)
        }
    }

    /// Positive buckets in ascending order
    pub fn positive_bucket_iter(&self) -> impl Iterator<Item = Bucket> + '_ {
        self.positive_buckets.iter().map(move |(&index, &count)| Bucket {
            lower: self.bucket_lower(index),
            upper: self.bucket_upper(index),
            lower_inclusive: false,
            upper_inclusive: true,
            count,
            index,
        })
    }

    /// Negative buckets, from the one closest to zero outwards
    pub fn negative_bucket_iter(&self) -> impl Iterator<Item = Bucket> + '_ {
        self.negative_buckets.iter().map(move |(&index, &count)| Bucket {
            lower: -self.bucket_upper(index),
            upper: -self.bucket_lower(index),
            lower_inclusive: true,
            upper_inclusive: false,
            count,
            index,
        })
    }

    /// All buckets in ascending order of their bounds
    ///
    /// Negative buckets come first (most negative first), then the zero
    /// bucket when it holds observations, then the positive buckets.
    pub fn all_buckets(&self) -> Vec<Bucket> {
        let mut buckets: Vec<Bucket> = self.negative_bucket_iter().collect();
        buckets.reverse();
        if self.zero_count > 0.0 {
            buckets.push(Bucket {
                lower: -self.zero_threshold,
                upper: self.zero_threshold,
                lower_inclusive: true,
                upper_inclusive: true,
                count: self.zero_count,
                index: 0,
            });
        }
        buckets.extend(self.positive_bucket_iter());
        buckets
    }

    /// Multiply every count and the sum by `factor`
    pub fn mul(&mut self, factor: f64) -> &mut Self {
        self.zero_count *= factor;
        self.count *= factor;
        self.sum *= factor;
        for v in self.positive_buckets.values_mut() {
            *v *= factor;
        }
        for v in self.negative_buckets.values_mut() {
            *v *= factor;
        }
        self
    }

    /// Divide every count and the sum by `divisor`
    ///
    /// Dividing by zero keeps the infinite/NaN totals but removes all
    /// buckets.
    pub fn div(&mut self, divisor: f64) -> &mut Self {
        self.zero_count /= divisor;
        self.count /= divisor;
        self.sum /= divisor;
        if divisor == 0.0 {
            self.positive_buckets.clear();
            self.negative_buckets.clear();
            return self;
        }
        for v in self.positive_buckets.values_mut() {
            *v /= divisor;
        }
        for v in self.negative_buckets.values_mut() {
            *v /= divisor;
        }
        self
    }

    /// Add `other` to this histogram
    pub fn add(&mut self, other: &FloatHistogram) -> Result<&mut Self, HistogramError> {
        self.combine(other, 1.0)?;
        Ok(self)
    }

    /// Subtract `other` from this histogram
    pub fn sub(&mut self, other: &FloatHistogram) -> Result<&mut Self, HistogramError> {
        self.combine(other, -1.0)?;
        Ok(self)
    }

    fn combine(&mut self, other: &FloatHistogram, sign: f64) -> Result<(), HistogramError> {
        self.check_compatible(other)?;

        self.counter_reset_hint = match (self.counter_reset_hint, other.counter_reset_hint) {
            (a, b) if a == b => a,
            (CounterResetHint::Gauge, _) | (_, CounterResetHint::Gauge) => CounterResetHint::Gauge,
            _ => CounterResetHint::Unknown,
        };

        if self.uses_custom_buckets() {
            self.count += sign * other.count;
            self.sum += sign * other.sum;
            for (&idx, &c) in &other.positive_buckets {
                *self.positive_buckets.entry(idx).or_insert(0.0) += sign * c;
            }
            return Ok(());
        }

        let other_zero_count = self.reconcile_zero_buckets(other);
        self.zero_count += sign * other_zero_count;
        self.count += sign * other.count;
        self.sum += sign * other.sum;

        let target = self.schema.min(other.schema);
        if self.schema > target {
            self.reduce_resolution(target);
        }
        let threshold = self.zero_threshold;
        merge_buckets(
            &mut self.positive_buckets,
            &other.positive_buckets,
            other.schema,
            target,
            threshold,
            sign,
        );
        merge_buckets(
            &mut self.negative_buckets,
            &other.negative_buckets,
            other.schema,
            target,
            threshold,
            sign,
        );
        Ok(())
    }

    fn check_compatible(&self, other: &FloatHistogram) -> Result<(), HistogramError> {
        match (self.uses_custom_buckets(), other.uses_custom_buckets()) {
            (true, true) if !floats_equal(&self.custom_values, &other.custom_values) => {
                Err(HistogramError::IncompatibleBounds)
            }
            (a, b) if a != b => Err(HistogramError::IncompatibleSchema),
            _ => Ok(()),
        }
    }

    /// Merge all buckets into coarser buckets of schema `target`
    ///
    /// Each step down halves the resolution: bucket `i` at the old schema
    /// ends up in bucket `((i - 1) >> delta) + 1` at the new one.
    pub fn reduce_resolution(&mut self, target: i32) -> &mut Self {
        if self.uses_custom_buckets() || target >= self.schema {
            return self;
        }
        let from = self.schema;
        self.positive_buckets = reduce_buckets(&self.positive_buckets, from, target);
        self.negative_buckets = reduce_buckets(&self.negative_buckets, from, target);
        self.schema = target;
        self
    }

    /// Zero count and threshold if the zero bucket is widened to `larger`
    ///
    /// When the new threshold cuts through a populated bucket, the threshold
    /// is moved up to that bucket's upper bound and the bucket is absorbed.
    fn zero_count_for_larger_threshold(&self, larger: f64) -> (f64, f64) {
        if larger == self.zero_threshold {
            return (self.zero_count, larger);
        }
        let mut threshold = larger;
        loop {
            let mut count = self.zero_count;
            let mut moved = false;
            for b in self.positive_bucket_iter() {
                if b.lower >= threshold {
                    break;
                }
                count += b.count;
                if b.upper > threshold && b.count != 0.0 {
                    threshold = b.upper;
                    moved = true;
                    break;
                }
            }
            if !moved {
                for b in self.negative_bucket_iter() {
                    // bounds are negated, distance from zero grows with index
                    let (lower, upper) = (-b.upper, -b.lower);
                    if lower >= threshold {
                        break;
                    }
                    count += b.count;
                    if upper > threshold && b.count != 0.0 {
                        threshold = upper;
                        moved = true;
                        break;
                    }
                }
            }
            if !moved {
                return (count, threshold);
            }
        }
    }

    fn trim_buckets_in_zero_bucket(&mut self) {
        let threshold = self.zero_threshold;
        let schema = self.schema;
        self.positive_buckets
            .retain(|&idx, _| exponential_bound(idx - 1, schema) >= threshold);
        self.negative_buckets
            .retain(|&idx, _| exponential_bound(idx - 1, schema) >= threshold);
    }

    /// Widen the zero bucket of whichever side is narrower
    ///
    /// Returns the zero count of `other` at the common threshold. This
    /// histogram is updated in place.
    fn reconcile_zero_buckets(&mut self, other: &FloatHistogram) -> f64 {
        let mut other_count = other.zero_count;
        let mut other_threshold = other.zero_threshold;
        while other_threshold != self.zero_threshold {
            if self.zero_threshold > other_threshold {
                (other_count, other_threshold) =
                    other.zero_count_for_larger_threshold(self.zero_threshold);
            }
            if other_threshold > self.zero_threshold {
                (self.zero_count, self.zero_threshold) =
                    self.zero_count_for_larger_threshold(other_threshold);
                self.trim_buckets_in_zero_bucket();
            }
        }
        other_count
    }

    /// Whether a counter reset happened between `previous` and `self`
    ///
    /// The explicit hints win. Without one, a reset is assumed when any
    /// count went down, the layout changed in a way a counter never does
    /// (schema went up, zero bucket shrank, custom bounds changed), or a
    /// populated bucket disappeared.
    pub fn detect_reset(&self, previous: &FloatHistogram) -> bool {
        match self.counter_reset_hint {
            CounterResetHint::CounterReset => return true,
            CounterResetHint::NotCounterReset => return false,
            CounterResetHint::Unknown | CounterResetHint::Gauge => {}
        }
        if self.count < previous.count {
            return true;
        }
        if self.uses_custom_buckets() != previous.uses_custom_buckets() {
            return true;
        }
        if self.uses_custom_buckets() {
            if !floats_equal(&self.custom_values, &previous.custom_values) {
                return true;
            }
            return bucket_decreased(&previous.positive_buckets, &self.positive_buckets);
        }
        if self.schema > previous.schema {
            return true;
        }
        if self.zero_threshold < previous.zero_threshold {
            return true;
        }
        let (prev_zero_count, threshold) =
            previous.zero_count_for_larger_threshold(self.zero_threshold);
        if threshold != self.zero_threshold {
            // the new zero bucket would cut through a populated old bucket
            return true;
        }
        if self.zero_count < prev_zero_count {
            return true;
        }

        let mut reduced = previous.clone();
        reduced
            .positive_buckets
            .retain(|&idx, _| exponential_bound(idx, previous.schema) > threshold);
        reduced
            .negative_buckets
            .retain(|&idx, _| exponential_bound(idx, previous.schema) > threshold);
        reduced.reduce_resolution(self.schema);

        bucket_decreased(&reduced.positive_buckets, &self.positive_buckets)
            || bucket_decreased(&reduced.negative_buckets, &self.negative_buckets)
    }

    /// Exact, bitwise equality ignoring the counter reset hint
    ///
    /// Unlike `==`, NaN sums compare equal to themselves. Empty buckets are
    /// treated like absent ones.
    pub fn equals(&self, other: &FloatHistogram) -> bool {
        self.schema == other.schema
            && self.zero_threshold.to_bits() == other.zero_threshold.to_bits()
            && self.zero_count.to_bits() == other.zero_count.to_bits()
            && self.count.to_bits() == other.count.to_bits()
            && self.sum.to_bits() == other.sum.to_bits()
            && floats_equal(&self.custom_values, &other.custom_values)
            && buckets_equal(&self.positive_buckets, &other.positive_buckets)
            && buckets_equal(&self.negative_buckets, &other.negative_buckets)
    }
}

/// Upper bound of exponential bucket `index` at `schema`
pub fn exponential_bound(index: i32, schema: i32) -> f64 {
    if schema <= 0 {
        let exp = i64::from(index) << (-schema);
        return (2f64).powi(exp.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32);
    }
    let per_octave = 1i32 << schema;
    let octave = index.div_euclid(per_octave);
    let frac = index.rem_euclid(per_octave);
    (2f64).powf(f64::from(frac) / f64::from(per_octave)) * (2f64).powi(octave)
}

fn custom_upper(bounds: &[f64], index: i32) -> f64 {
    match usize::try_from(index) {
        Ok(i) if i < bounds.len() => bounds[i],
        _ => f64::INFINITY,
    }
}

fn custom_lower(bounds: &[f64], index: i32) -> f64 {
    match usize::try_from(index) {
        Ok(0) | Err(_) => f64::NEG_INFINITY,
        Ok(i) => bounds.get(i - 1).copied().unwrap_or(f64::INFINITY),
    }
}

fn target_index(index: i32, from: i32, to: i32) -> i32 {
    ((index - 1) >> (from - to)) + 1
}

fn reduce_buckets(buckets: &BTreeMap<i32, f64>, from: i32, to: i32) -> BTreeMap<i32, f64> {
    let mut out = BTreeMap::new();
    for (&idx, &count) in buckets {
        *out.entry(target_index(idx, from, to)).or_insert(0.0) += count;
    }
    out
}

fn merge_buckets(
    into: &mut BTreeMap<i32, f64>,
    from: &BTreeMap<i32, f64>,
    from_schema: i32,
    target: i32,
    threshold: f64,
    sign: f64,
) {
    for (&idx, &count) in from {
        // already folded into the zero bucket
        if exponential_bound(idx, from_schema) <= threshold {
            continue;
        }
        let idx = if from_schema > target {
            target_index(idx, from_schema, target)
        } else {
            idx
        };
        *into.entry(idx).or_insert(0.0) += sign * count;
    }
}

fn bucket_decreased(previous: &BTreeMap<i32, f64>, current: &BTreeMap<i32, f64>) -> bool {
    previous
        .iter()
        .filter(|(_, &c)| c != 0.0)
        .any(|(idx, &c)| current.get(idx).copied().unwrap_or(0.0) < c)
}

fn buckets_equal(a: &BTreeMap<i32, f64>, b: &BTreeMap<i32, f64>) -> bool {
    let a = a.iter().filter(|(_, c)| **c != 0.0);
    let b = b.iter().filter(|(_, c)| **c != 0.0);
    a.map(|(i, c)| (*i, c.to_bits()))
        .eq(b.map(|(i, c)| (*i, c.to_bits())))
}

fn floats_equal(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}
