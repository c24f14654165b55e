//! Ordering functions
//!
//! `sort` and `sort_desc` order float samples by value and always put NaN
//! last. `sort_by_label` orders by label values compared the way a human
//! reads them, so `host10` follows `host9`.

use std::cmp::Ordering;

use super::quantile::nan_last;
use super::FunctionArgs;
use crate::annotations::Annotations;
use crate::error::EvalResult;
use crate::eval::EvalContext;
use crate::model::Sample;

/// Split `s` into maximal runs of ASCII digits and of everything else
fn chunks(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != digits)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        rest = tail;
        Some(chunk)
    })
}

/// Compare two digit runs by numeric value without parsing
fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
        .then_with(|| a.len().cmp(&b.len()))
}

/// Natural string order: digit runs compare as numbers, the rest bytewise
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a);
    let mut right = chunks(b);
    loop {
        let ord = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let x_digits = x.as_bytes()[0].is_ascii_digit();
                let y_digits = y.as_bytes()[0].is_ascii_digit();
                if x_digits && y_digits {
                    cmp_digits(x, y)
                } else {
                    x.cmp(y)
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
}

fn by_value(mut args: FunctionArgs<'_>, ctx: &mut EvalContext, descending: bool) -> EvalResult<Annotations> {
    let mut floats: Vec<Sample> = args
        .take_vector(0)?
        .into_iter()
        .filter(|s| s.f().is_some())
        .collect();
    floats.sort_by(|a, b| {
        let (x, y) = (a.f().unwrap_or(f64::NAN), b.f().unwrap_or(f64::NAN));
        if descending && !x.is_nan() && !y.is_nan() {
            y.total_cmp(&x)
        } else {
            nan_last(&x, &y)
        }
    });
    ctx.output_mut().extend(floats);
    Ok(Annotations::new())
}

fn by_labels(mut args: FunctionArgs<'_>, ctx: &mut EvalContext, descending: bool) -> EvalResult<Annotations> {
    let names = args.strings_from(1)?;
    let mut vector = args.take_vector(0)?;
    vector.sort_by(|a, b| {
        let ord = names
            .iter()
            .map(|name| natural_cmp(a.metric.get(name), b.metric.get(name)))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| a.metric.compare(&b.metric));
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
    ctx.output_mut().extend(vector);
    Ok(Annotations::new())
}

pub(crate) fn sort(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    by_value(args, ctx, false)
}

pub(crate) fn sort_desc(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    by_value(args, ctx, true)
}

pub(crate) fn sort_by_label(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    by_labels(args, ctx, false)
}

pub(crate) fn sort_by_label_desc(args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    by_labels(args, ctx, true)
}
