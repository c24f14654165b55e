//! Histogram functions
//!
//! `histogram_quantile` accepts both classic histograms, one float sample
//! per `le` bucket, and native histogram samples. The remaining functions
//! only read native histograms and silently skip float samples.

use std::collections::HashMap;

use super::kahan::KahanSum;
use super::quantile::{self, ClassicBucket};
use super::FunctionArgs;
use crate::annotations::{Annotation, Annotations};
use crate::error::EvalResult;
use crate::eval::EvalContext;
use crate::model::{FloatHistogram, Labels, Sample, BUCKET_LABEL, METRIC_NAME};

/// Variance of the observations in `h`
///
/// Each bucket is represented by a single value: zero for buckets spanning
/// zero, otherwise the geometric mean of its bounds.
pub fn histogram_variance(h: &FloatHistogram) -> f64 {
    let mean = h.sum / h.count;
    let mut acc = KahanSum::new();
    for bucket in h.all_buckets() {
        if bucket.count == 0.0 {
            continue;
        }
        let value = if bucket.lower <= 0.0 && 0.0 <= bucket.upper {
            0.0
        } else {
            let v = (bucket.upper * bucket.lower).sqrt();
            if bucket.upper < 0.0 {
                -v
            } else {
                v
            }
        };
        let delta = value - mean;
        acc.add(bucket.count * delta * delta);
    }
    acc.value() / h.count
}

/// Emit `read(h)` for every native histogram sample of argument `index`
fn read_histograms(
    mut args: FunctionArgs<'_>,
    ctx: &mut EvalContext,
    index: usize,
    read: impl Fn(&FloatHistogram) -> f64,
) -> EvalResult<Annotations> {
    for sample in args.take_vector(index)? {
        if let Some(h) = sample.h() {
            ctx.push_float_dropping_name(&sample.metric, read(h));
        }
    }
    Ok(Annotations::new())
}

pub(crate) fn histogram_count(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    read_histograms(args, ctx, 0, |h| h.count)
}

pub(crate) fn histogram_sum(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    read_histograms(args, ctx, 0, |h| h.sum)
}

pub(crate) fn histogram_avg(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    read_histograms(args, ctx, 0, |h| h.sum / h.count)
}

pub(crate) fn histogram_stddev(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    read_histograms(args, ctx, 0, |h| histogram_variance(h).sqrt())
}

pub(crate) fn histogram_stdvar(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    read_histograms(args, ctx, 0, histogram_variance)
}

pub(crate) fn histogram_fraction(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let lower = args.scalar(0)?;
    let upper = args.scalar(1)?;
    read_histograms(args, ctx, 2, |h| quantile::histogram_fraction(lower, upper, h))
}

/// Buckets of one classic histogram, keyed by its labels without `le`
#[derive(Debug)]
struct ClassicGroup {
    metric: Labels,
    buckets: Vec<ClassicBucket>,
    conflicting: bool,
}

pub(crate) fn histogram_quantile(mut args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let q = args.scalar(0)?;
    let q_position = args.position(0);
    let position = args.position(1);
    let input = args.take_vector(1)?;

    let mut annos = Annotations::new();
    if q.is_nan() || !(0.0..=1.0).contains(&q) {
        annos.add(Annotation::InvalidQuantile {
            q,
            position: q_position,
        });
    }

    let mut groups: Vec<ClassicGroup> = Vec::new();
    let mut by_signature: HashMap<Labels, usize> = HashMap::new();
    let mut natives: Vec<Sample> = Vec::new();

    for sample in input {
        let Some(count) = sample.f() else {
            natives.push(sample);
            continue;
        };
        let le = sample.metric.get(BUCKET_LABEL);
        let Ok(upper_bound) = le.parse::<f64>() else {
            annos.add(Annotation::BadBucketLabel {
                metric_name: sample.metric.get(METRIC_NAME).to_string(),
                label_value: le.to_string(),
                position,
            });
            continue;
        };
        let signature = sample.metric.without(&[BUCKET_LABEL]);
        let idx = *by_signature.entry(signature.clone()).or_insert_with(|| {
            groups.push(ClassicGroup {
                metric: signature,
                buckets: Vec::new(),
                conflicting: false,
            });
            groups.len() - 1
        });
        groups[idx].buckets.push(ClassicBucket::new(upper_bound, count));
    }

    for sample in &natives {
        if let Some(&idx) = by_signature.get(&sample.metric) {
            let group = &mut groups[idx];
            if !group.buckets.is_empty() {
                annos.add(Annotation::MixedClassicNativeHistograms {
                    metric_name: sample.metric.get(METRIC_NAME).to_string(),
                    position,
                });
                group.conflicting = true;
                continue;
            }
        }
        if let Some(h) = sample.h() {
            ctx.push_float_dropping_name(&sample.metric, quantile::histogram_quantile(q, h));
        }
    }

    for mut group in groups.into_iter().filter(|g| !g.conflicting && !g.buckets.is_empty()) {
        let result = quantile::bucket_quantile(q, &mut group.buckets);
        if result.forced_monotonicity {
            annos.add(Annotation::HistogramQuantileForcedMonotonicity {
                metric_name: group.metric.get(METRIC_NAME).to_string(),
                position,
            });
        }
        ctx.push_float_dropping_name(&group.metric, result.value);
    }
    Ok(annos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArgExpr, PositionRange, Value};

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    fn bucket(le: &str, count: f64) -> Sample {
        Sample::float(
            Labels::from_pairs([(METRIC_NAME, "latency_bucket"), ("job", "api"), (BUCKET_LABEL, le)]),
            0,
            count,
        )
    }

    fn exponential() -> FloatHistogram {
        // schema 0: (1, 2] holds 2, (2, 4] holds 2
        let mut h = FloatHistogram::new(0);
        h.positive_buckets.insert(1, 2.0);
        h.positive_buckets.insert(2, 2.0);
        h.count = 4.0;
        h.sum = 10.0;
        h
    }

    fn run(
        f: fn(FunctionArgs<'_>, &mut EvalContext) -> EvalResult<Annotations>,
        values: Vec<Value>,
    ) -> (Vec<Sample>, Annotations) {
        let mut ctx = EvalContext::at(0);
        let exprs = [
            ArgExpr::Other {
                position: PositionRange::new(19, 22),
            },
            ArgExpr::Other {
                position: PositionRange::new(24, 40),
            },
        ];
        let annos = f(FunctionArgs::new("test", values, &exprs), &mut ctx).unwrap();
        (ctx.take_output(), annos)
    }

    #[test]
    fn test_classic_quantile() {
        let input = vec![bucket("10", 5.0), bucket("20", 10.0), bucket("+Inf", 10.0)];
        let (out, annos) = run(
            histogram_quantile,
            vec![Value::Scalar(0.5), Value::Vector(input.clone())],
        );
        assert!(annos.is_empty());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].f(), Some(10.0));
        assert_eq!(out[0].metric, Labels::from_pairs([("job", "api")]));

        let (out, _) = run(histogram_quantile, vec![Value::Scalar(0.75), Value::Vector(input)]);
        assert!(approx_eq(out[0].f().unwrap(), 15.0));
    }

    #[test]
    fn test_classic_groups_by_labels_without_le() {
        let mut input = vec![bucket("10", 5.0), bucket("+Inf", 10.0)];
        for (le, count) in [("1", 1.0), ("+Inf", 2.0)] {
            input.push(Sample::float(
                Labels::from_pairs([(METRIC_NAME, "latency_bucket"), ("job", "db"), (BUCKET_LABEL, le)]),
                0,
                count,
            ));
        }
        let (out, _) = run(histogram_quantile, vec![Value::Scalar(0.5), Value::Vector(input)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].metric.get("job"), "api");
        assert_eq!(out[1].metric.get("job"), "db");
        assert_eq!(out[1].f(), Some(1.0));
    }

    #[test]
    fn test_invalid_quantile_and_bad_le() {
        let input = vec![bucket("ten", 5.0), bucket("+Inf", 10.0)];
        let (out, annos) = run(histogram_quantile, vec![Value::Scalar(2.0), Value::Vector(input)]);
        assert_eq!(out[0].f(), Some(f64::INFINITY));
        let kinds: Vec<_> = annos.iter().collect();
        assert!(matches!(kinds[0], Annotation::InvalidQuantile { position, .. } if position.start == 19));
        assert!(matches!(
            kinds[1],
            Annotation::BadBucketLabel { label_value, position, .. } if label_value == "ten" && position.start == 24
        ));
    }

    #[test]
    fn test_forced_monotonicity_is_reported() {
        let input = vec![bucket("10", 5.0), bucket("20", 4.0), bucket("+Inf", 10.0)];
        let (out, annos) = run(histogram_quantile, vec![Value::Scalar(0.5), Value::Vector(input)]);
        assert_eq!(annos.infos().count(), 1);
        assert!(matches!(
            annos.iter().next(),
            Some(Annotation::HistogramQuantileForcedMonotonicity { metric_name, .. })
                if metric_name == "latency_bucket"
        ));
        assert!(!out[0].metric.has(METRIC_NAME));
    }

    #[test]
    fn test_mixed_classic_and_native_is_skipped() {
        let native = Sample::histogram(
            Labels::from_pairs([(METRIC_NAME, "latency_bucket"), ("job", "api")]),
            0,
            exponential(),
        );
        let input = vec![bucket("10", 5.0), bucket("+Inf", 10.0), native];
        let (out, annos) = run(histogram_quantile, vec![Value::Scalar(0.5), Value::Vector(input)]);
        assert!(out.is_empty());
        assert!(matches!(
            annos.iter().next(),
            Some(Annotation::MixedClassicNativeHistograms { .. })
        ));
    }

    #[test]
    fn test_native_quantile() {
        let native = Sample::histogram(Labels::from_pairs([(METRIC_NAME, "latency")]), 0, exponential());
        let (out, annos) = run(histogram_quantile, vec![Value::Scalar(0.5), Value::Vector(vec![native])]);
        assert!(annos.is_empty());
        assert!(approx_eq(out[0].f().unwrap(), 2.0));
        assert!(out[0].metric.is_empty());
    }

    #[test]
    fn test_field_readers_skip_floats() {
        let input = vec![
            Sample::histogram(Labels::from_pairs([(METRIC_NAME, "latency")]), 0, exponential()),
            Sample::float(Labels::empty(), 0, 3.0),
        ];
        let (out, _) = run(histogram_count, vec![Value::Vector(input.clone())]);
        assert_eq!(out.iter().filter_map(Sample::f).collect::<Vec<_>>(), vec![4.0]);
        let (out, _) = run(histogram_sum, vec![Value::Vector(input.clone())]);
        assert_eq!(out[0].f(), Some(10.0));
        let (out, _) = run(histogram_avg, vec![Value::Vector(input)]);
        assert_eq!(out[0].f(), Some(2.5));
        assert!(!out[0].metric.has(METRIC_NAME));
    }

    #[test]
    fn test_variance() {
        // representatives sqrt(2) and sqrt(8), two observations each
        let h = exponential();
        let mean = 2.5;
        let expected = (2.0 * (2f64.sqrt() - mean).powi(2) + 2.0 * (8f64.sqrt() - mean).powi(2)) / 4.0;
        assert!(approx_eq(histogram_variance(&h), expected));

        let (out, _) = run(
            histogram_stddev,
            vec![Value::Vector(vec![Sample::histogram(Labels::empty(), 0, h)])],
        );
        assert!(approx_eq(out[0].f().unwrap(), expected.sqrt()));
    }

    #[test]
    fn test_variance_zero_bucket() {
        let mut h = FloatHistogram::new(0);
        h.zero_threshold = 0.5;
        h.zero_count = 3.0;
        h.count = 3.0;
        h.sum = 0.0;
        assert_eq!(histogram_variance(&h), 0.0);
    }

    #[test]
    fn test_fraction() {
        let native = Sample::histogram(Labels::empty(), 0, exponential());
        let (out, _) = run(
            histogram_fraction,
            vec![Value::Scalar(0.0), Value::Scalar(2.0), Value::Vector(vec![native])],
        );
        assert!(approx_eq(out[0].f().unwrap(), 0.5));
    }
}
