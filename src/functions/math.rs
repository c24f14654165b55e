//! Elementwise math
//!
//! Functions in this module map every float sample of an instant vector
//! through a pure function and drop the metric name. Histogram samples are
//! skipped without an annotation. The constant-ish helpers (`pi`, `time`,
//! `vector`, `scalar`) and `absent` live here too since they share the
//! same single-vector shape.

use std::f64::consts::PI;

use super::FunctionArgs;
use crate::annotations::Annotations;
use crate::error::EvalResult;
use crate::eval::EvalContext;
use crate::model::{ArgExpr, Builder, Labels, MatchType, Sample, METRIC_NAME};

/// Apply `f` to every float sample of the first argument
fn map_floats(
    mut args: FunctionArgs<'_>,
    ctx: &mut EvalContext,
    f: impl Fn(f64) -> f64,
) -> EvalResult<Annotations> {
    for sample in args.take_vector(0)? {
        if let Some(v) = sample.f() {
            ctx.push_float_dropping_name(&sample.metric, f(v));
        }
    }
    Ok(Annotations::new())
}

macro_rules! unary {
    ($($name:ident => $f:expr),* $(,)?) => {
        $(
            pub(crate) fn $name(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
                map_floats(args, ctx, $f)
            }
        )*
    };
}

unary! {
    abs => f64::abs,
    ceil => f64::ceil,
    floor => f64::floor,
    exp => f64::exp,
    sqrt => f64::sqrt,
    ln => f64::ln,
    log2 => f64::log2,
    log10 => f64::log10,
    sin => f64::sin,
    cos => f64::cos,
    tan => f64::tan,
    asin => f64::asin,
    acos => f64::acos,
    atan => f64::atan,
    sinh => f64::sinh,
    cosh => f64::cosh,
    tanh => f64::tanh,
    asinh => f64::asinh,
    acosh => f64::acosh,
    atanh => f64::atanh,
    deg => |v: f64| v * 180.0 / PI,
    rad => |v: f64| v * PI / 180.0,
    sgn => signum,
}

/// -1, 1, or the input itself for zero and NaN
pub fn signum(v: f64) -> f64 {
    if v < 0.0 {
        -1.0
    } else if v > 0.0 {
        1.0
    } else {
        v
    }
}

/// Minimum that propagates NaN from either side
fn min_nan(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

/// Maximum that propagates NaN from either side
fn max_nan(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

/// Clamp `v` into `[min, max]`; a NaN bound or value yields NaN
pub fn clamp_value(v: f64, min: f64, max: f64) -> f64 {
    max_nan(min, min_nan(max, v))
}

pub(crate) fn clamp(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let min = args.scalar(1)?;
    let max = args.scalar(2)?;
    if max < min {
        return Ok(Annotations::new());
    }
    map_floats(args, ctx, |v| clamp_value(v, min, max))
}

pub(crate) fn clamp_min(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let min = args.scalar(1)?;
    map_floats(args, ctx, |v| clamp_value(v, min, f64::INFINITY))
}

pub(crate) fn clamp_max(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let max = args.scalar(1)?;
    map_floats(args, ctx, |v| clamp_value(v, f64::NEG_INFINITY, max))
}

/// Round `v` to the nearest multiple of `to_nearest`, ties upwards
pub fn round_to(v: f64, to_nearest: f64) -> f64 {
    let inverse = 1.0 / to_nearest;
    (v * inverse + 0.5).floor() / inverse
}

pub(crate) fn round(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let to_nearest = if args.len() > 1 { args.scalar(1)? } else { 1.0 };
    map_floats(args, ctx, |v| round_to(v, to_nearest))
}

pub(crate) fn pi(_args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    ctx.push_float(Labels::empty(), PI);
    Ok(Annotations::new())
}

pub(crate) fn time(_args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let seconds = ctx.ts() as f64 / 1000.0;
    ctx.push_float(Labels::empty(), seconds);
    Ok(Annotations::new())
}

pub(crate) fn vector(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    ctx.push_float(Labels::empty(), args.scalar(0)?);
    Ok(Annotations::new())
}

/// The single float sample's value, NaN when there are zero or several
pub(crate) fn scalar(mut args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let mut floats = args.take_vector(0)?.into_iter().filter_map(|s| s.f());
    let value = match (floats.next(), floats.next()) {
        (Some(v), None) => v,
        _ => f64::NAN,
    };
    ctx.push_float(Labels::empty(), value);
    Ok(Annotations::new())
}

pub(crate) fn timestamp(mut args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let ts = ctx.ts();
    for sample in args.take_vector(0)? {
        let metric = ctx.strip_name(&sample.metric);
        ctx.push(Sample {
            drop_name: true,
            ..Sample::float(metric, ts, sample.t() as f64 / 1000.0)
        });
    }
    Ok(Annotations::new())
}

pub(crate) fn absent(mut args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    if args.take_vector(0)?.is_empty() {
        ctx.push_float(labels_for_absent(args.expr(0)), 1.0);
    }
    Ok(Annotations::new())
}

/// Labels for the sample `absent` and `absent_over_time` synthesize
///
/// Only equality matchers of a plain selector contribute. A label matched
/// more than once, or also matched by a non-equality matcher after its
/// equality matcher, is left out.
pub(crate) fn labels_for_absent(expr: Option<&ArgExpr>) -> Labels {
    let Some(matchers) = expr.and_then(ArgExpr::matchers) else {
        return Labels::empty();
    };
    let mut builder = Builder::new(&Labels::empty());
    let mut seen = Vec::with_capacity(matchers.len());
    for m in matchers {
        if m.name == METRIC_NAME {
            continue;
        }
        if m.match_type == MatchType::Equal && !seen.contains(&m.name.as_str()) {
            builder.set(&m.name, &m.value);
            seen.push(m.name.as_str());
        } else {
            builder.del(&m.name);
        }
    }
    builder.labels()
}
