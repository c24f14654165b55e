//! Calendar extraction
//!
//! Sample values are read as Unix timestamps in seconds and broken down in
//! UTC. Without an argument the evaluation timestamp is used.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use super::FunctionArgs;
use crate::annotations::Annotations;
use crate::error::EvalResult;
use crate::eval::EvalContext;
use crate::model::Labels;

type Extract = fn(&DateTime<Utc>) -> f64;

/// UTC time for `secs`, `None` for NaN or values chrono cannot represent
fn utc(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp(secs as i64, 0)
}

fn apply(mut args: FunctionArgs<'_>, ctx: &mut EvalContext, extract: Extract) -> EvalResult<Annotations> {
    if args.is_empty() {
        let value = DateTime::from_timestamp_millis(ctx.ts())
            .map_or(f64::NAN, |t| extract(&t));
        ctx.push_float(Labels::empty(), value);
        return Ok(Annotations::new());
    }
    for sample in args.take_vector(0)? {
        let Some(secs) = sample.f() else {
            continue;
        };
        let value = utc(secs).map_or(f64::NAN, |t| extract(&t));
        ctx.push_float_dropping_name(&sample.metric, value);
    }
    Ok(Annotations::new())
}

fn month_length(t: &DateTime<Utc>) -> f64 {
    let (year, month) = match t.month() {
        12 => (t.year() + 1, 1),
        m => (t.year(), m + 1),
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(f64::NAN, |last| f64::from(last.day()))
}

pub(crate) fn days_in_month(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    apply(args, ctx, month_length)
}

pub(crate) fn day_of_month(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    apply(args, ctx, |t| f64::from(t.day()))
}

pub(crate) fn day_of_week(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    apply(args, ctx, |t| f64::from(t.weekday().num_days_from_sunday()))
}

pub(crate) fn day_of_year(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    apply(args, ctx, |t| f64::from(t.ordinal()))
}

pub(crate) fn hour(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    apply(args, ctx, |t| f64::from(t.hour()))
}

pub(crate) fn minute(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    apply(args, ctx, |t| f64::from(t.minute()))
}

pub(crate) fn month(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    apply(args, ctx, |t| f64::from(t.month()))
}

pub(crate) fn year(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    apply(args, ctx, |t| f64::from(t.year()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FloatHistogram, Sample, Value, METRIC_NAME};
    use rstest::rstest;

    type Func = fn(FunctionArgs<'_>, &mut EvalContext) -> EvalResult<Annotations>;

    // 2024-02-29T13:45:30Z, a Thursday
    const LEAP_DAY: f64 = 1_709_214_330.0;

    fn eval(f: Func, secs: f64) -> f64 {
        let mut ctx = EvalContext::at(0);
        let v = vec![Sample::float(Labels::from_pairs([(METRIC_NAME, "t")]), 0, secs)];
        f(FunctionArgs::new("test", vec![Value::Vector(v)], &[]), &mut ctx).unwrap();
        let out = ctx.take_output();
        assert!(!out[0].metric.has(METRIC_NAME));
        out[0].f().unwrap()
    }

    #[rstest]
    #[case(year as Func, 2024.0)]
    #[case(month as Func, 2.0)]
    #[case(day_of_month as Func, 29.0)]
    #[case(day_of_week as Func, 4.0)]
    #[case(day_of_year as Func, 60.0)]
    #[case(days_in_month as Func, 29.0)]
    #[case(hour as Func, 13.0)]
    #[case(minute as Func, 45.0)]
    fn test_calendar_fields(#[case] f: Func, #[case] expected: f64) {
        assert_eq!(eval(f, LEAP_DAY), expected);
    }

    #[test]
    fn test_december_and_epoch() {
        // 2023-12-31T23:59:59Z
        assert_eq!(eval(days_in_month, 1_704_067_199.0), 31.0);
        assert_eq!(eval(day_of_week, 0.0), 4.0);
        assert_eq!(eval(year, -1.0), 1969.0);
    }

    #[test]
    fn test_unrepresentable_is_nan() {
        assert!(eval(year, f64::NAN).is_nan());
        assert!(eval(hour, f64::INFINITY).is_nan());
        assert!(eval(month, 1e300).is_nan());
    }

    #[test]
    fn test_without_argument_uses_eval_time() {
        let mut ctx = EvalContext::at(LEAP_DAY as i64 * 1000);
        hour(FunctionArgs::new("hour", vec![], &[]), &mut ctx).unwrap();
        let out = ctx.take_output();
        assert!(out[0].metric.is_empty());
        assert_eq!(out[0].f(), Some(13.0));
    }

    #[test]
    fn test_histograms_are_skipped() {
        let mut ctx = EvalContext::at(0);
        let v = vec![Sample::histogram(Labels::empty(), 0, FloatHistogram::new(0))];
        year(FunctionArgs::new("year", vec![Value::Vector(v)], &[]), &mut ctx).unwrap();
        assert!(ctx.take_output().is_empty());
    }
}
