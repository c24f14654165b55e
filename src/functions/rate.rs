//! Counter and gauge rates
//!
//! `rate`, `increase` and `delta` compare the first and last point of the
//! window and extrapolate the difference towards the window edges. `irate`
//! and `idelta` only look at the last two points and never extrapolate.
//!
//! For counters every decrease is taken as a reset: the value before the
//! drop is added back to the total. Native histograms follow the same rules
//! using bucket-wise subtraction and [`FloatHistogram::detect_reset`].

use super::FunctionArgs;
use crate::annotations::{Annotation, Annotations};
use crate::error::EvalResult;
use crate::eval::EvalContext;
use crate::model::{
    ArgExpr, CounterResetHint, FloatHistogram, HPoint, PointRef, PositionRange, Series,
    METRIC_NAME,
};

/// Selected window of a range vector, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    /// Exclusive start of the window
    pub start: i64,
    /// Inclusive end of the window
    pub end: i64,
}

impl Window {
    /// Window of a selector with `range_ms` and `offset_ms` evaluated at `ts`
    pub fn new(ts: i64, range_ms: i64, offset_ms: i64) -> Self {
        Self {
            start: ts - range_ms - offset_ms,
            end: ts - offset_ms,
        }
    }

    /// Length in seconds
    pub fn seconds(&self) -> f64 {
        (self.end - self.start) as f64 / 1000.0
    }
}

/// Result of [`extrapolated_delta`] for one series
#[derive(Debug, Clone, PartialEq)]
pub enum RateValue {
    /// Float series
    Float(f64),
    /// Native histogram series
    Histogram(FloatHistogram),
}

/// Extrapolated difference between the first and the last point
///
/// Returns `None` when the series holds fewer than two points of one kind,
/// mixes floats and histograms, or holds histograms that cannot be
/// subtracted; the annotations explain the latter two. `window` is `None`
/// when the caller has no selector range, in which case the sampled
/// interval is taken as the window and nothing is extrapolated.
pub fn extrapolated_delta(
    series: &Series,
    window: Option<Window>,
    threshold_factor: f64,
    is_counter: bool,
    is_rate: bool,
    position: PositionRange,
) -> (Option<RateValue>, Annotations) {
    let metric_name = series.metric.get(METRIC_NAME);
    let mut annos = Annotations::new();
    if !series.floats.is_empty() && !series.histograms.is_empty() {
        annos.add(Annotation::MixedFloatsHistograms {
            metric_name: metric_name.to_string(),
            position,
        });
        return (None, annos);
    }

    let (mut result, first_t, last_t, samples_minus_one) = if series.histograms.len() > 1 {
        let points = &series.histograms;
        let (h, rate_annos) = histogram_rate(points, is_counter, metric_name, position);
        annos.merge(rate_annos);
        let Some(h) = h else {
            return (None, annos);
        };
        let n = points.len() - 1;
        (RateValue::Histogram(h), points[0].t, points[n].t, n)
    } else if series.floats.len() > 1 {
        let points = &series.floats;
        let n = points.len() - 1;
        let mut delta = points[n].f - points[0].f;
        if is_counter {
            for pair in points.windows(2) {
                if pair[1].f < pair[0].f {
                    delta += pair[0].f;
                }
            }
        }
        (RateValue::Float(delta), points[0].t, points[n].t, n)
    } else {
        return (None, annos);
    };

    let sampled = (last_t - first_t) as f64 / 1000.0;
    let window = window.unwrap_or(Window {
        start: first_t,
        end: last_t,
    });
    let mut to_start = (first_t - window.start) as f64 / 1000.0;
    let mut to_end = (window.end - last_t) as f64 / 1000.0;
    let average = sampled / samples_minus_one as f64;
    let threshold = average * threshold_factor;

    if to_start >= threshold {
        to_start = average / 2.0;
    }
    if let RateValue::Float(delta) = result {
        let first = series.floats[0].f;
        if is_counter && delta > 0.0 && first >= 0.0 {
            // counters cannot go negative, stop at the implied zero crossing
            let to_zero = sampled * (first / delta);
            if to_zero < to_start {
                to_start = to_zero;
            }
        }
    }
    if to_end >= threshold {
        to_end = average / 2.0;
    }

    let mut factor = (sampled + to_start + to_end) / sampled;
    if is_rate {
        factor /= window.seconds();
    }
    match &mut result {
        RateValue::Float(f) => *f *= factor,
        RateValue::Histogram(h) => {
            h.mul(factor);
        }
    }
    (Some(result), annos)
}

fn warn(annos: &mut Annotations, make: fn(String, PositionRange) -> Annotation, name: &str, pos: PositionRange) {
    annos.add(make(name.to_string(), pos));
}

fn not_counter(metric_name: String, position: PositionRange) -> Annotation {
    Annotation::NativeHistogramNotCounter {
        metric_name,
        position,
    }
}

fn not_gauge(metric_name: String, position: PositionRange) -> Annotation {
    Annotation::NativeHistogramNotGauge {
        metric_name,
        position,
    }
}

fn mixed_schemas(metric_name: String, position: PositionRange) -> Annotation {
    Annotation::MixedExponentialCustomHistograms {
        metric_name,
        position,
    }
}

/// Difference between the last and first histogram of `points`
///
/// Needs at least two points. For counters, histograms before every
/// detected reset are added back. The result carries the gauge hint.
pub fn histogram_rate(
    points: &[HPoint],
    is_counter: bool,
    metric_name: &str,
    position: PositionRange,
) -> (Option<FloatHistogram>, Annotations) {
    let mut annos = Annotations::new();
    if points.len() < 2 {
        return (None, annos);
    }
    let (first, last) = (&points[0].h, &points[points.len() - 1].h);

    if is_counter
        && (first.counter_reset_hint == CounterResetHint::Gauge
            || last.counter_reset_hint == CounterResetHint::Gauge)
    {
        warn(&mut annos, not_counter, metric_name, position);
    }

    // A reset right after the first point makes its layout irrelevant.
    let mut start = first.clone();
    if is_counter {
        let second = &points[1].h;
        if second.detect_reset(first) {
            start = FloatHistogram {
                schema: second.schema,
                custom_values: second.custom_values.clone(),
                ..Default::default()
            };
        }
    }
    let custom = start.uses_custom_buckets();
    if last.uses_custom_buckets() != custom {
        warn(&mut annos, mixed_schemas, metric_name, position);
        return (None, annos);
    }

    let mut min_schema = start.schema.min(last.schema);
    for p in &points[1..points.len() - 1] {
        if !is_counter {
            continue;
        }
        if p.h.counter_reset_hint == CounterResetHint::Gauge {
            warn(&mut annos, not_counter, metric_name, position);
        }
        min_schema = min_schema.min(p.h.schema);
        if p.h.uses_custom_buckets() != custom {
            // only the layout conflict is reported for this series
            return (None, mixed_schemas(metric_name.to_string(), position).into());
        }
    }

    let mut h = last.clone();
    h.reduce_resolution(min_schema);
    if let Err(err) = h.sub(&start) {
        return (None, Annotation::from_histogram_error(err, metric_name, position).into());
    }

    if is_counter {
        let mut prev = &start;
        for p in &points[1..] {
            if p.h.detect_reset(prev) {
                if let Err(err) = h.add(prev) {
                    return (None, Annotation::from_histogram_error(err, metric_name, position).into());
                }
            }
            prev = &p.h;
        }
    } else if first.counter_reset_hint != CounterResetHint::Gauge
        || last.counter_reset_hint != CounterResetHint::Gauge
    {
        warn(&mut annos, not_gauge, metric_name, position);
    }

    h.counter_reset_hint = CounterResetHint::Gauge;
    (Some(h), annos)
}

fn extrapolated_rate(
    mut args: FunctionArgs<'_>,
    ctx: &mut EvalContext,
    is_counter: bool,
    is_rate: bool,
) -> EvalResult<Annotations> {
    let matrix = args.take_matrix(0)?;
    let position = args.position(0);
    let window = args
        .expr(0)
        .and_then(ArgExpr::range_and_offset)
        .map(|(range, offset)| Window::new(ctx.ts(), range, offset));
    let factor = ctx.extrapolation_threshold_factor();

    let mut annos = Annotations::new();
    for series in &matrix {
        let (value, series_annos) =
            extrapolated_delta(series, window, factor, is_counter, is_rate, position);
        annos.merge(series_annos);
        match value {
            Some(RateValue::Float(f)) => ctx.push_float_dropping_name(&series.metric, f),
            Some(RateValue::Histogram(h)) => ctx.push_histogram_dropping_name(&series.metric, h),
            None => {}
        }
    }
    Ok(annos)
}

pub(crate) fn rate(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    extrapolated_rate(args, ctx, true, true)
}

pub(crate) fn increase(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    extrapolated_rate(args, ctx, true, false)
}

pub(crate) fn delta(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    extrapolated_rate(args, ctx, false, false)
}

/// The two chronologically last points of a series across both kinds
///
/// On equal timestamps the histogram point takes the float's place.
fn last_two(series: &Series) -> Option<(PointRef<'_>, PointRef<'_>)> {
    let mut out: Vec<PointRef<'_>> = series.floats[series.floats.len().saturating_sub(2)..]
        .iter()
        .map(PointRef::Float)
        .collect();
    for p in &series.histograms[series.histograms.len().saturating_sub(2)..] {
        let s = PointRef::Histogram(p);
        match out.len() {
            0 => out.push(s),
            1 if s.t() < out[0].t() => out.insert(0, s),
            1 => out.push(s),
            _ if s.t() < out[0].t() => {}
            _ if s.t() > out[1].t() => {
                out[0] = out[1];
                out[1] = s;
            }
            _ => out[0] = s,
        }
    }
    match out.as_slice() {
        [a, b] => Some((*a, *b)),
        _ => None,
    }
}

/// Difference between the last two points, per second when `is_rate`
pub fn instant_delta(
    series: &Series,
    is_rate: bool,
    position: PositionRange,
) -> (Option<RateValue>, Annotations) {
    let metric_name = series.metric.get(METRIC_NAME);
    let mut annos = Annotations::new();
    let Some((older, newer)) = last_two(series) else {
        return (None, annos);
    };
    let interval = newer.t() - older.t();
    if interval == 0 {
        return (None, annos);
    }

    let mut result = match (older, newer) {
        (PointRef::Float(a), PointRef::Float(b)) => {
            if is_rate && b.f < a.f {
                // reset: the new value is the increase since the reset
                RateValue::Float(b.f)
            } else {
                RateValue::Float(b.f - a.f)
            }
        }
        (PointRef::Histogram(a), PointRef::Histogram(b)) => {
            let gauge = |h: &FloatHistogram| h.counter_reset_hint == CounterResetHint::Gauge;
            if is_rate && (gauge(&a.h) || gauge(&b.h)) {
                warn(&mut annos, not_counter, metric_name, position);
            }
            if !is_rate && (!gauge(&a.h) || !gauge(&b.h)) {
                warn(&mut annos, not_gauge, metric_name, position);
            }
            let mut h = b.h.clone();
            if !is_rate || !b.h.detect_reset(&a.h) {
                if let Err(err) = h.sub(&a.h) {
                    annos.add(Annotation::from_histogram_error(err, metric_name, position));
                    return (None, annos);
                }
            }
            h.counter_reset_hint = CounterResetHint::Gauge;
            RateValue::Histogram(h)
        }
        _ => {
            annos.add(Annotation::MixedFloatsHistograms {
                metric_name: metric_name.to_string(),
                position,
            });
            return (None, annos);
        }
    };

    if is_rate {
        let seconds = interval as f64 / 1000.0;
        match &mut result {
            RateValue::Float(f) => *f /= seconds,
            RateValue::Histogram(h) => {
                h.div(seconds);
            }
        }
    }
    (Some(result), annos)
}

fn instant_value(mut args: FunctionArgs<'_>, ctx: &mut EvalContext, is_rate: bool) -> EvalResult<Annotations> {
    let matrix = args.take_matrix(0)?;
    let position = args.position(0);
    let mut annos = Annotations::new();
    for series in &matrix {
        let (value, series_annos) = instant_delta(series, is_rate, position);
        annos.merge(series_annos);
        match value {
            Some(RateValue::Float(f)) => ctx.push_float_dropping_name(&series.metric, f),
            Some(RateValue::Histogram(h)) => ctx.push_histogram_dropping_name(&series.metric, h),
            None => {}
        }
    }
    Ok(annos)
}

pub(crate) fn irate(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    instant_value(args, ctx, true)
}

pub(crate) fn idelta(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    instant_value(args, ctx, false)
}
