//! Trend functions over range vectors
//!
//! All of them need at least two float points per series. Histogram points
//! are ignored; when a series mixes both kinds an info annotation says so.

use super::kahan::KahanSum;
use super::FunctionArgs;
use crate::annotations::{Annotation, Annotations};
use crate::error::{EvalError, EvalResult};
use crate::eval::EvalContext;
use crate::model::{FPoint, METRIC_NAME};

/// Least squares fit over `points`
///
/// Returns the slope per second and the value of the fitted line at
/// `intercept_time` (milliseconds). A constant series has slope zero,
/// unless the constant is infinite, in which case both are NaN.
pub fn linear_regression(points: &[FPoint], intercept_time: i64) -> (f64, f64) {
    let Some(first) = points.first() else {
        return (f64::NAN, f64::NAN);
    };
    let init_y = first.f;
    let mut const_y = true;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_x2) =
        (KahanSum::new(), KahanSum::new(), KahanSum::new(), KahanSum::new());
    for p in points {
        if const_y && p.f != init_y {
            const_y = false;
        }
        let x = (p.t - intercept_time) as f64 / 1e3;
        sum_x.add(x);
        sum_y.add(p.f);
        sum_xy.add(x * p.f);
        sum_x2.add(x * x);
    }
    if const_y {
        if init_y.is_infinite() {
            return (f64::NAN, f64::NAN);
        }
        return (0.0, init_y);
    }

    let n = points.len() as f64;
    let (sum_x, sum_y) = (sum_x.value(), sum_y.value());
    let cov_xy = sum_xy.value() - sum_x * sum_y / n;
    let var_x = sum_x2.value() - sum_x * sum_x / n;
    let slope = cov_xy / var_x;
    (slope, sum_y / n - slope * sum_x / n)
}

/// Holt's linear smoothing, returning the last smoothed value
///
/// Callers guarantee at least two points.
pub fn smooth(points: &[FPoint], sf: f64, tf: f64) -> f64 {
    let mut s0 = 0.0;
    let mut s1 = points[0].f;
    let mut trend = points[1].f - points[0].f;
    for (i, p) in points.iter().enumerate().skip(1) {
        if i > 1 {
            trend = tf * (s1 - s0) + (1.0 - tf) * trend;
        }
        let next = sf * p.f + (1.0 - sf) * (s1 + trend);
        s0 = s1;
        s1 = next;
    }
    s1
}

/// Run `compute` over the float points of every series with two or more
fn per_series(
    mut args: FunctionArgs<'_>,
    ctx: &mut EvalContext,
    compute: impl Fn(&[FPoint]) -> f64,
) -> EvalResult<Annotations> {
    let position = args.position(0);
    let mut annos = Annotations::new();
    for series in &args.take_matrix(0)? {
        let mixed = !series.histograms.is_empty();
        let produced = series.floats.len() >= 2;
        if mixed && (produced || series.floats.len() == 1) {
            annos.add(Annotation::HistogramIgnoredInMixedRange {
                metric_name: series.metric.get(METRIC_NAME).to_string(),
                position,
            });
        }
        if produced {
            ctx.push_float_dropping_name(&series.metric, compute(&series.floats));
        }
    }
    Ok(annos)
}

pub(crate) fn deriv(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    // intercept near the data keeps the x values small
    per_series(args, ctx, |points| linear_regression(points, points[0].t).0)
}

pub(crate) fn predict_linear(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let duration = args.scalar(1)?;
    let ts = ctx.ts();
    per_series(args, ctx, |points| {
        let (slope, intercept) = linear_regression(points, ts);
        slope * duration + intercept
    })
}

pub(crate) fn double_exponential_smoothing(
    args: FunctionArgs<'_>,
    ctx: &mut EvalContext,
) -> EvalResult<Annotations> {
    let sf = args.scalar(1)?;
    let tf = args.scalar(2)?;
    if !(sf > 0.0 && sf < 1.0) {
        return Err(EvalError::InvalidSmoothingFactor(sf));
    }
    if !(tf > 0.0 && tf < 1.0) {
        return Err(EvalError::InvalidTrendFactor(tf));
    }
    per_series(args, ctx, |points| smooth(points, sf, tf))
}
