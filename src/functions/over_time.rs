//! Aggregation over time
//!
//! Every function here reduces each series of its range vector argument to
//! at most one sample. Float-only reducers skip histogram points and say so
//! with an info annotation; `sum_over_time` and `avg_over_time` have a
//! parallel histogram path but refuse ranges mixing both kinds.

use super::kahan::{kahan_inc, KahanSum};
use super::quantile::quantile;
use super::FunctionArgs;
use crate::annotations::{Annotation, Annotations};
use crate::error::{EvalResult, HistogramError};
use crate::eval::EvalContext;
use crate::model::{FPoint, FloatHistogram, PointRef, Sample, Series, METRIC_NAME};

/// Reducers that only look at float points
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FloatReducer {
    /// Smallest value, NaN only if every value is NaN
    Min,
    /// Largest value, NaN only if every value is NaN
    Max,
    /// Population standard deviation
    Stddev,
    /// Population variance
    Stdvar,
    /// φ-quantile with linear interpolation between closest ranks
    Quantile(f64),
    /// Median absolute deviation from the median
    Mad,
}

impl FloatReducer {
    /// Reduce a non-empty slice of points
    pub fn apply(self, points: &[FPoint]) -> f64 {
        match self {
            FloatReducer::Min => extreme(points, |v, cur| v < cur),
            FloatReducer::Max => extreme(points, |v, cur| v > cur),
            FloatReducer::Stdvar => variance(points),
            FloatReducer::Stddev => variance(points).sqrt(),
            FloatReducer::Quantile(q) => {
                let mut values: Vec<f64> = points.iter().map(|p| p.f).collect();
                quantile(q, &mut values)
            }
            FloatReducer::Mad => {
                let mut values: Vec<f64> = points.iter().map(|p| p.f).collect();
                let median = quantile(0.5, &mut values);
                let mut deviations: Vec<f64> = values.iter().map(|v| (v - median).abs()).collect();
                quantile(0.5, &mut deviations)
            }
        }
    }
}

fn extreme(points: &[FPoint], better: fn(f64, f64) -> bool) -> f64 {
    let mut current = points[0].f;
    for p in points {
        if better(p.f, current) || current.is_nan() {
            current = p.f;
        }
    }
    current
}

/// Welford's online variance with compensated mean and sum of squares
fn variance(points: &[FPoint]) -> f64 {
    let (mut count, mut mean, mut c_mean, mut aux, mut c_aux) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for p in points {
        count += 1.0;
        let delta = p.f - (mean + c_mean);
        (mean, c_mean) = kahan_inc(delta / count, mean, c_mean);
        (aux, c_aux) = kahan_inc(delta * (p.f - (mean + c_mean)), aux, c_aux);
    }
    (aux + c_aux) / count
}

/// Compensated sum of float points
pub fn sum_floats(points: &[FPoint]) -> f64 {
    points.iter().map(|p| p.f).collect::<KahanSum>().value()
}

/// Mean of float points
///
/// Uses a compensated sum while it stays finite and switches to an
/// incremental mean once the sum overflows, so a series of huge but finite
/// values still has a finite mean. Once the mean itself is infinite, further
/// finite values and infinities of the same sign leave it untouched.
pub fn mean_floats(points: &[FPoint]) -> f64 {
    let (mut sum, mut mean, mut count, mut c) = (0.0, 0.0, 0.0, 0.0);
    let mut incremental = false;
    for p in points {
        let f = p.f;
        count += 1.0;
        if !incremental {
            let (new_sum, new_c) = kahan_inc(f, sum, c);
            if count == 1.0 || !new_sum.is_infinite() {
                (sum, c) = (new_sum, new_c);
                continue;
            }
            incremental = true;
            mean = sum / (count - 1.0);
            c /= count - 1.0;
        }
        if mean.is_infinite() {
            if f.is_infinite() && (mean > 0.0) == (f > 0.0) {
                continue;
            }
            if !f.is_infinite() && !f.is_nan() {
                continue;
            }
        }
        let corrected = mean + c;
        (mean, c) = kahan_inc(f / count - corrected / count, mean, c);
    }
    if incremental {
        mean + c
    } else {
        (sum + c) / count
    }
}

fn sum_histograms(series: &Series) -> Result<FloatHistogram, HistogramError> {
    let mut sum = series.histograms[0].h.clone();
    for p in &series.histograms[1..] {
        sum.add(&p.h)?;
    }
    Ok(sum)
}

fn mean_histograms(series: &Series) -> Result<FloatHistogram, HistogramError> {
    let mut mean = series.histograms[0].h.clone();
    for (i, p) in series.histograms[1..].iter().enumerate() {
        let count = (i + 2) as f64;
        let mut to_add = p.h.clone();
        to_add.div(count);
        let mut right = mean.clone();
        right.div(count);
        to_add.sub(&right)?;
        mean.add(&to_add)?;
    }
    Ok(mean)
}

fn metric_name(series: &Series) -> &str {
    series.metric.get(METRIC_NAME)
}

fn float_reducer(
    mut args: FunctionArgs<'_>,
    ctx: &mut EvalContext,
    matrix_index: usize,
    reducer: FloatReducer,
) -> EvalResult<Annotations> {
    let matrix = args.take_matrix(matrix_index)?;
    let position = args.position(0);
    let mut annos = Annotations::new();
    for series in &matrix {
        if series.floats.is_empty() {
            continue;
        }
        if !series.histograms.is_empty() {
            annos.add(Annotation::HistogramIgnoredInMixedRange {
                metric_name: metric_name(series).to_string(),
                position,
            });
        }
        ctx.push_float_dropping_name(&series.metric, reducer.apply(&series.floats));
    }
    Ok(annos)
}

/// Shared body of sum_over_time and avg_over_time
fn float_or_histogram(
    mut args: FunctionArgs<'_>,
    ctx: &mut EvalContext,
    floats: fn(&[FPoint]) -> f64,
    histograms: fn(&Series) -> Result<FloatHistogram, HistogramError>,
) -> EvalResult<Annotations> {
    let matrix = args.take_matrix(0)?;
    let position = args.position(0);
    let mut annos = Annotations::new();
    for series in &matrix {
        if series.is_empty() {
            continue;
        }
        if !series.floats.is_empty() && !series.histograms.is_empty() {
            annos.add(Annotation::MixedFloatsHistograms {
                metric_name: metric_name(series).to_string(),
                position,
            });
            continue;
        }
        if !series.floats.is_empty() {
            ctx.push_float_dropping_name(&series.metric, floats(&series.floats));
            continue;
        }
        match histograms(series) {
            Ok(h) => ctx.push_histogram_dropping_name(&series.metric, h),
            Err(err) => {
                annos.add(Annotation::from_histogram_error(
                    err,
                    metric_name(series),
                    position,
                ));
            }
        }
    }
    Ok(annos)
}

pub(crate) fn sum_over_time(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    float_or_histogram(args, ctx, sum_floats, sum_histograms)
}

pub(crate) fn avg_over_time(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    float_or_histogram(args, ctx, mean_floats, mean_histograms)
}

pub(crate) fn min_over_time(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    float_reducer(args, ctx, 0, FloatReducer::Min)
}

pub(crate) fn max_over_time(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    float_reducer(args, ctx, 0, FloatReducer::Max)
}

pub(crate) fn stddev_over_time(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    float_reducer(args, ctx, 0, FloatReducer::Stddev)
}

pub(crate) fn stdvar_over_time(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    float_reducer(args, ctx, 0, FloatReducer::Stdvar)
}

pub(crate) fn mad_over_time(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    float_reducer(args, ctx, 0, FloatReducer::Mad)
}

pub(crate) fn quantile_over_time(
    args: FunctionArgs<'_>,
    ctx: &mut EvalContext,
) -> EvalResult<Annotations> {
    let q = args.scalar(0)?;
    let position = args.position(0);
    let has_floats = args
        .matrix_ref(1)?
        .iter()
        .any(|series| !series.floats.is_empty());
    let mut annos = Annotations::new();
    if has_floats && (q.is_nan() || !(0.0..=1.0).contains(&q)) {
        annos.add(Annotation::InvalidQuantile { q, position });
    }
    annos.merge(float_reducer(args, ctx, 1, FloatReducer::Quantile(q))?);
    Ok(annos)
}

pub(crate) fn count_over_time(mut args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    for series in args.take_matrix(0)?.iter().filter(|s| !s.is_empty()) {
        ctx.push_float_dropping_name(&series.metric, series.len() as f64);
    }
    Ok(Annotations::new())
}

pub(crate) fn present_over_time(mut args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    for series in args.take_matrix(0)?.iter().filter(|s| !s.is_empty()) {
        ctx.push_float_dropping_name(&series.metric, 1.0);
    }
    Ok(Annotations::new())
}

pub(crate) fn absent_over_time(mut args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let matrix = args.take_matrix(0)?;
    if matrix.iter().all(Series::is_empty) {
        let labels = super::math::labels_for_absent(args.expr(0));
        ctx.push_float(labels, 1.0);
    }
    Ok(Annotations::new())
}

/// The chronologically last point of `series`
///
/// On a timestamp tie between the last float and the last histogram the
/// float wins.
pub fn last_point(series: &Series) -> Option<PointRef<'_>> {
    match (series.floats.last(), series.histograms.last()) {
        (None, None) => None,
        (Some(f), None) => Some(PointRef::Float(f)),
        (None, Some(h)) => Some(PointRef::Histogram(h)),
        (Some(f), Some(h)) if h.t <= f.t => Some(PointRef::Float(f)),
        (Some(_), Some(h)) => Some(PointRef::Histogram(h)),
    }
}

pub(crate) fn last_over_time(mut args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let ts = ctx.ts();
    for series in args.take_matrix(0)? {
        let sample = match last_point(&series) {
            Some(PointRef::Float(p)) => Sample::float(series.metric.clone(), ts, p.f),
            Some(PointRef::Histogram(p)) => Sample::histogram(series.metric.clone(), ts, p.h.clone()),
            None => continue,
        };
        ctx.push(Sample {
            drop_name: series.drop_name,
            ..sample
        });
    }
    Ok(Annotations::new())
}

/// Transitions counted by `changes` or `resets`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Change,
    Reset,
}

/// Count transitions between consecutive points in timestamp order
///
/// Switching between a float and a histogram point always counts.
fn count_transitions(series: &Series, kind: Transition) -> usize {
    let mut count = 0;
    let mut prev: Option<PointRef<'_>> = None;
    for cur in series.points() {
        if let Some(p) = prev {
            let counts = match (p, cur) {
                (PointRef::Float(a), PointRef::Float(b)) => match kind {
                    Transition::Change => a.f != b.f && !(a.f.is_nan() && b.f.is_nan()),
                    Transition::Reset => b.f < a.f,
                },
                (PointRef::Histogram(a), PointRef::Histogram(b)) => match kind {
                    Transition::Change => !b.h.equals(&a.h),
                    Transition::Reset => b.h.detect_reset(&a.h),
                },
                _ => true,
            };
            if counts {
                count += 1;
            }
        }
        prev = Some(cur);
    }
    count
}

fn transitions(
    mut args: FunctionArgs<'_>,
    ctx: &mut EvalContext,
    kind: Transition,
) -> EvalResult<Annotations> {
    for series in args.take_matrix(0)?.iter().filter(|s| !s.is_empty()) {
        let n = count_transitions(series, kind);
        ctx.push_float_dropping_name(&series.metric, n as f64);
    }
    Ok(Annotations::new())
}

pub(crate) fn changes(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    transitions(args, ctx, Transition::Change)
}

pub(crate) fn resets(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    transitions(args, ctx, Transition::Reset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArgExpr, HPoint, Labels, Value};
    use rstest::rstest;

    fn floats(values: &[f64]) -> Vec<FPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| FPoint::new(i as i64 * 1000, *v))
            .collect()
    }

    fn series(values: &[f64]) -> Series {
        Series::from_floats(
            Labels::from_pairs([(METRIC_NAME, "m"), ("job", "a")]),
            floats(values),
        )
    }

    fn run(
        f: fn(FunctionArgs<'_>, &mut EvalContext) -> EvalResult<Annotations>,
        values: Vec<Value>,
    ) -> (Vec<Sample>, Annotations) {
        let mut ctx = EvalContext::at(10_000);
        let exprs = [ArgExpr::range(10_000, 0)];
        let annos = f(FunctionArgs::new("test", values, &exprs), &mut ctx).unwrap();
        (ctx.take_output(), annos)
    }

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    fn hist(count: f64) -> FloatHistogram {
        let mut h = FloatHistogram::new(0);
        h.count = count;
        h.sum = count * 2.0;
        h.positive_buckets.insert(1, count);
        h
    }

    #[rstest]
    #[case(FloatReducer::Min, &[3.0, 1.0, 2.0], 1.0)]
    #[case(FloatReducer::Max, &[3.0, 1.0, 2.0], 3.0)]
    #[case(FloatReducer::Min, &[f64::NAN, 4.0, 2.0], 2.0)]
    #[case(FloatReducer::Max, &[f64::NAN, 4.0, 2.0], 4.0)]
    #[case(FloatReducer::Stdvar, &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 4.0)]
    #[case(FloatReducer::Stddev, &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 2.0)]
    #[case(FloatReducer::Quantile(0.5), &[1.0, 2.0, 3.0, 4.0], 2.5)]
    #[case(FloatReducer::Quantile(0.0), &[4.0, 2.0, 3.0], 2.0)]
    #[case(FloatReducer::Mad, &[1.0, 1.0, 2.0, 2.0, 4.0, 6.0, 9.0], 1.0)]
    fn test_float_reducers(#[case] reducer: FloatReducer, #[case] values: &[f64], #[case] expected: f64) {
        assert!(approx_eq(reducer.apply(&floats(values)), expected));
    }

    #[test]
    fn test_min_max_all_nan() {
        assert!(FloatReducer::Min.apply(&floats(&[f64::NAN, f64::NAN])).is_nan());
    }

    #[test]
    fn test_sum_over_time_compensated() {
        let (out, annos) = run(
            sum_over_time,
            vec![Value::Matrix(vec![series(&[1.0, 1e100, 1.0, -1e100])])],
        );
        assert!(annos.is_empty());
        assert_eq!(out[0].f(), Some(2.0));
        assert!(!out[0].metric.has(METRIC_NAME));
        assert_eq!(out[0].metric.get("job"), "a");
        assert_eq!(out[0].t(), 10_000);
    }

    #[test]
    fn test_avg_over_time_overflow_falls_back_to_incremental_mean() {
        let m = f64::MAX;
        assert!(approx_eq(mean_floats(&floats(&[m, m, m])), m));
        assert!(approx_eq(mean_floats(&floats(&[m, -m])), 0.0));
        assert_eq!(mean_floats(&floats(&[f64::INFINITY, f64::INFINITY])), f64::INFINITY);
        assert_eq!(mean_floats(&floats(&[m, m, f64::INFINITY, 1.0])), f64::INFINITY);
        assert!(mean_floats(&floats(&[f64::INFINITY, f64::NEG_INFINITY])).is_nan());
        assert_eq!(mean_floats(&floats(&[1.0, 2.0, 3.0, 4.0])), 2.5);
    }

    #[test]
    fn test_mixed_range_sum_is_skipped_with_warning() {
        let mut s = series(&[1.0, 2.0]);
        s.histograms.push(HPoint::new(5_000, hist(1.0)));
        let (out, annos) = run(sum_over_time, vec![Value::Matrix(vec![s])]);
        assert!(out.is_empty());
        assert!(matches!(
            annos.iter().next(),
            Some(Annotation::MixedFloatsHistograms { .. })
        ));
    }

    #[test]
    fn test_histogram_sum_and_avg() {
        let s = Series::from_histograms(
            Labels::from_pairs([(METRIC_NAME, "h")]),
            vec![HPoint::new(0, hist(2.0)), HPoint::new(1000, hist(4.0))],
        );
        let (out, _) = run(sum_over_time, vec![Value::Matrix(vec![s.clone()])]);
        assert_eq!(out[0].h().map(|h| h.count), Some(6.0));

        let (out, _) = run(avg_over_time, vec![Value::Matrix(vec![s])]);
        let h = out[0].h().unwrap();
        assert!(approx_eq(h.count, 3.0));
        assert!(approx_eq(h.sum, 6.0));
    }

    #[test]
    fn test_histogram_sum_incompatible_is_annotated() {
        let custom = FloatHistogram::with_custom_buckets(vec![1.0], &[1.0, 1.0], 1.0);
        let s = Series::from_histograms(
            Labels::from_pairs([(METRIC_NAME, "h")]),
            vec![HPoint::new(0, hist(2.0)), HPoint::new(1000, custom)],
        );
        let (out, annos) = run(sum_over_time, vec![Value::Matrix(vec![s])]);
        assert!(out.is_empty());
        assert!(matches!(
            annos.iter().next(),
            Some(Annotation::MixedExponentialCustomHistograms { .. })
        ));
    }

    #[test]
    fn test_float_only_reducer_ignores_histograms_with_info() {
        let mut s = series(&[5.0, 7.0]);
        s.histograms.push(HPoint::new(500, hist(1.0)));
        let (out, annos) = run(max_over_time, vec![Value::Matrix(vec![s])]);
        assert_eq!(out[0].f(), Some(7.0));
        assert_eq!(annos.infos().count(), 1);

        let only_hist = Series::from_histograms(Labels::empty(), vec![HPoint::new(0, hist(1.0))]);
        let (out, annos) = run(min_over_time, vec![Value::Matrix(vec![only_hist])]);
        assert!(out.is_empty());
        assert!(annos.is_empty());
    }

    #[test]
    fn test_quantile_over_time_invalid_quantile() {
        let (out, annos) = run(
            quantile_over_time,
            vec![Value::Scalar(1.5), Value::Matrix(vec![series(&[1.0, 2.0])])],
        );
        assert_eq!(out[0].f(), Some(f64::INFINITY));
        assert!(matches!(
            annos.iter().next(),
            Some(Annotation::InvalidQuantile { .. })
        ));
    }

    #[test]
    fn test_count_and_present() {
        let mut s = series(&[1.0, 2.0]);
        s.histograms.push(HPoint::new(500, hist(1.0)));
        let (out, _) = run(count_over_time, vec![Value::Matrix(vec![s.clone()])]);
        assert_eq!(out[0].f(), Some(3.0));
        let (out, _) = run(present_over_time, vec![Value::Matrix(vec![s])]);
        assert_eq!(out[0].f(), Some(1.0));
    }

    #[test]
    fn test_last_over_time_tie_prefers_float() {
        let mut s = series(&[1.0, 2.0]);
        s.histograms.push(HPoint::new(1000, hist(1.0)));
        assert!(matches!(last_point(&s), Some(PointRef::Float(p)) if p.f == 2.0));

        s.histograms.push(HPoint::new(2000, hist(3.0)));
        assert!(matches!(last_point(&s), Some(PointRef::Histogram(_))));

        let (out, _) = run(last_over_time, vec![Value::Matrix(vec![s])]);
        assert_eq!(out[0].metric.get(METRIC_NAME), "m");
        assert_eq!(out[0].h().map(|h| h.count), Some(3.0));
    }

    #[test]
    fn test_changes_and_resets() {
        let s = series(&[1.0, 1.0, 2.0, 1.0, f64::NAN, f64::NAN, 3.0]);
        let (out, _) = run(changes, vec![Value::Matrix(vec![s.clone()])]);
        assert_eq!(out[0].f(), Some(4.0));
        let (out, _) = run(resets, vec![Value::Matrix(vec![s])]);
        assert_eq!(out[0].f(), Some(1.0));
    }

    #[test]
    fn test_kind_switch_counts_as_change_and_reset() {
        let mut s = series(&[1.0]);
        s.histograms.push(HPoint::new(1000, hist(1.0)));
        s.histograms.push(HPoint::new(2000, hist(2.0)));
        s.histograms.push(HPoint::new(3000, hist(1.0)));
        assert_eq!(count_transitions(&s, Transition::Change), 3);
        assert_eq!(count_transitions(&s, Transition::Reset), 2);
    }

    #[test]
    fn test_absent_over_time() {
        let (out, _) = run(absent_over_time, vec![Value::Matrix(vec![])]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].f(), Some(1.0));

        let (out, _) = run(absent_over_time, vec![Value::Matrix(vec![series(&[1.0])])]);
        assert!(out.is_empty());
    }
}
