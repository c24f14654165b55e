//! Label rewriting
//!
//! `label_replace` and `label_join` pass every input sample through with
//! its value and timestamp untouched; only the label set changes. Two
//! outputs ending up with identical label sets is an error.

use super::FunctionArgs;
use crate::annotations::Annotations;
use crate::error::{EvalError, EvalResult};
use crate::eval::EvalContext;
use crate::model::{contains_same_labelset, is_valid_label_name, Builder, Labels, Sample, METRIC_NAME};

/// Emit `sample` with `metric`, keeping the name when it was the target
fn emit(ctx: &mut EvalContext, mut sample: Sample, metric: Labels, dst: &str) {
    if dst == METRIC_NAME {
        sample.drop_name = false;
    }
    sample.metric = metric;
    ctx.push(sample);
}

fn check_unique(ctx: &mut EvalContext) -> EvalResult<()> {
    if contains_same_labelset(ctx.output_mut()) {
        return Err(EvalError::DuplicateLabelSet);
    }
    Ok(())
}

pub(crate) fn label_replace(mut args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let function = args.function();
    let dst = args.string(1)?.to_string();
    let replacement = args.string(2)?.to_string();
    let src = args.string(3)?.to_string();
    let pattern = args.string(4)?.to_string();

    let regex = ctx
        .anchored_regex(&pattern)
        .map_err(|_| EvalError::InvalidRegex { function, pattern })?;
    if !is_valid_label_name(&dst) {
        return Err(EvalError::InvalidDestinationLabel { function, name: dst });
    }

    ctx.clear_label_memo();
    let mut builder = Builder::default();
    for sample in args.take_vector(0)? {
        if let Some(metric) = ctx.memoized_labels(&sample.metric) {
            emit(ctx, sample, metric, &dst);
            continue;
        }
        let rewritten = regex.captures(sample.metric.get(&src)).map(|captures| {
            let mut value = String::new();
            captures.expand(&replacement, &mut value);
            builder.reset(&sample.metric);
            builder.set(&dst, &value);
            builder.labels()
        });
        let Some(metric) = rewritten else {
            // untouched samples keep their name marker as is
            ctx.memoize_labels(&sample.metric, sample.metric.clone());
            ctx.push(sample);
            continue;
        };
        ctx.memoize_labels(&sample.metric, metric.clone());
        emit(ctx, sample, metric, &dst);
    }
    check_unique(ctx)?;
    Ok(Annotations::new())
}

pub(crate) fn label_join(mut args: FunctionArgs<'_>, ctx: &mut EvalContext) -> EvalResult<Annotations> {
    let function = args.function();
    let dst = args.string(1)?.to_string();
    let separator = args.string(2)?.to_string();
    let sources = args.strings_from(3)?;

    if let Some(bad) = sources.iter().find(|s| !is_valid_label_name(s)) {
        return Err(EvalError::InvalidSourceLabel {
            function,
            name: bad.clone(),
        });
    }
    if !is_valid_label_name(&dst) {
        return Err(EvalError::InvalidDestinationLabel { function, name: dst });
    }

    ctx.clear_label_memo();
    let mut builder = Builder::default();
    for sample in args.take_vector(0)? {
        if let Some(metric) = ctx.memoized_labels(&sample.metric) {
            emit(ctx, sample, metric, &dst);
            continue;
        }
        let joined = sources
            .iter()
            .map(|name| sample.metric.get(name))
            .collect::<Vec<_>>()
            .join(&separator);
        builder.reset(&sample.metric);
        builder.set(&dst, &joined);
        let metric = builder.labels();
        ctx.memoize_labels(&sample.metric, metric.clone());
        emit(ctx, sample, metric, &dst);
    }
    check_unique(ctx)?;
    Ok(Annotations::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use rstest::rstest;

    fn input() -> Vec<Sample> {
        vec![
            Sample::float(
                Labels::from_pairs([(METRIC_NAME, "up"), ("src", "a"), ("other", "b")]),
                5,
                1.0,
            ),
            Sample::float(Labels::from_pairs([(METRIC_NAME, "up"), ("src", "c")]), 5, 2.0),
        ]
    }

    fn strings<'a>(values: &'a [&'a str]) -> impl Iterator<Item = Value> + 'a {
        values.iter().map(|s| Value::String(s.to_string()))
    }

    fn replace(vector: Vec<Sample>, rest: &[&str]) -> EvalResult<Vec<Sample>> {
        let mut ctx = EvalContext::at(0);
        let values = std::iter::once(Value::Vector(vector)).chain(strings(rest)).collect();
        label_replace(FunctionArgs::new("label_replace", values, &[]), &mut ctx)?;
        Ok(ctx.take_output())
    }

    fn join(vector: Vec<Sample>, rest: &[&str]) -> EvalResult<Vec<Sample>> {
        let mut ctx = EvalContext::at(0);
        let values = std::iter::once(Value::Vector(vector)).chain(strings(rest)).collect();
        label_join(FunctionArgs::new("label_join", values, &[]), &mut ctx)?;
        Ok(ctx.take_output())
    }

    #[test]
    fn test_label_join() {
        let out = join(input(), &["dst", "-", "src", "other"]).unwrap();
        assert_eq!(out[0].metric.get("dst"), "a-b");
        // empty values still take part in the join
        assert_eq!(out[1].metric.get("dst"), "c-");
        assert_eq!(out[1].t(), 5);
        assert_eq!(out[1].f(), Some(2.0));
    }

    #[test]
    fn test_label_join_without_sources_deletes_dst() {
        let metric = Labels::from_pairs([("dst", "old")]);
        let out = join(vec![Sample::float(metric, 0, 1.0)], &["dst", ","]).unwrap();
        assert!(!out[0].metric.has("dst"));
    }

    #[test]
    fn test_label_replace_identity() {
        let out = replace(input(), &["src", "$1", "src", "(.*)"]).unwrap();
        let expected: Vec<_> = input().into_iter().map(|s| s.metric).collect();
        let got: Vec<_> = out.into_iter().map(|s| s.metric).collect();
        assert_eq!(got, expected);
    }

    #[rstest]
    #[case("$1-x", "(a)", "a-x")]
    #[case("${1}x", "(a)", "ax")]
    #[case("$name", "(?P<name>a)", "a")]
    #[case("fixed", "a", "fixed")]
    fn test_label_replace_expansion(#[case] replacement: &str, #[case] pattern: &str, #[case] expected: &str) {
        let out = replace(input(), &["dst", replacement, "src", pattern]).unwrap();
        assert_eq!(out[0].metric.get("dst"), expected);
        assert!(!out[1].metric.has("dst"));
    }

    #[test]
    fn test_label_replace_is_anchored() {
        let out = replace(input(), &["dst", "hit", "src", "b|a."]).unwrap();
        assert!(out.iter().all(|s| !s.metric.has("dst")));
    }

    #[test]
    fn test_label_replace_name_keeps_marker_off() {
        let mut vector = input();
        vector[0].drop_name = true;
        vector[1].drop_name = true;
        let out = replace(vector, &[METRIC_NAME, "renamed_$1", "src", "(.*)"]).unwrap();
        assert_eq!(out[0].metric.get(METRIC_NAME), "renamed_a");
        assert!(!out[0].drop_name);
        assert!(!out[1].drop_name);
    }

    #[test]
    fn test_label_replace_errors() {
        assert!(matches!(
            replace(input(), &["dst", "", "src", "("]),
            Err(EvalError::InvalidRegex { pattern, .. }) if pattern == "("
        ));
        assert!(matches!(
            replace(input(), &["0dst", "", "src", ".*"]),
            Err(EvalError::InvalidDestinationLabel { .. })
        ));
        let colliding = vec![
            Sample::float(Labels::from_pairs([("src", "a")]), 0, 1.0),
            Sample::float(Labels::from_pairs([("src", "c")]), 0, 2.0),
        ];
        assert_eq!(
            replace(colliding, &["src", "same", "src", ".*"]).unwrap_err(),
            EvalError::DuplicateLabelSet
        );
    }

    #[test]
    fn test_label_join_errors() {
        assert!(matches!(
            join(input(), &["dst", "-", "bad-name"]),
            Err(EvalError::InvalidSourceLabel { name, .. }) if name == "bad-name"
        ));
        assert!(matches!(
            join(input(), &["", "-", "src"]),
            Err(EvalError::InvalidDestinationLabel { .. })
        ));
    }

    #[test]
    fn test_memo_reuses_rewrites() {
        let mut ctx = EvalContext::at(0);
        let vector = vec![
            Sample::float(Labels::from_pairs([("src", "a")]), 0, 1.0),
            Sample::float(Labels::from_pairs([("src", "a")]), 1000, 2.0),
        ];
        let values = std::iter::once(Value::Vector(vector))
            .chain(strings(&["dst", "$1", "src", "(.*)"]))
            .collect();
        let err = label_replace(FunctionArgs::new("label_replace", values, &[]), &mut ctx).unwrap_err();
        assert_eq!(err, EvalError::DuplicateLabelSet);
        let rewritten = Labels::from_pairs([("src", "a"), ("dst", "a")]);
        assert_eq!(
            ctx.memoized_labels(&Labels::from_pairs([("src", "a")])),
            Some(rewritten)
        );
    }

    #[test]
    fn test_label_replace_memoizes_misses() {
        let mut ctx = EvalContext::at(0);
        let values = std::iter::once(Value::Vector(input()))
            .chain(strings(&["dst", "hit", "src", "a"]))
            .collect();
        label_replace(FunctionArgs::new("label_replace", values, &[]), &mut ctx).unwrap();
        let untouched = input()[1].metric.clone();
        assert_eq!(ctx.memoized_labels(&untouched), Some(untouched.clone()));
        assert_eq!(ctx.take_output()[1].metric, untouched);
    }

    #[test]
    fn test_label_join_memoizes_rewrites() {
        let mut ctx = EvalContext::at(0);
        let metric = Labels::from_pairs([("a", "x"), ("b", "y")]);
        let values = std::iter::once(Value::Vector(vec![Sample::float(metric.clone(), 0, 1.0)]))
            .chain(strings(&["dst", "-", "a", "b"]))
            .collect();
        label_join(FunctionArgs::new("label_join", values, &[]), &mut ctx).unwrap();
        let joined = Labels::from_pairs([("a", "x"), ("b", "y"), ("dst", "x-y")]);
        assert_eq!(ctx.memoized_labels(&metric), Some(joined.clone()));
        assert_eq!(ctx.take_output()[0].metric, joined);

        // a second call starts from an empty memo
        let values = std::iter::once(Value::Vector(vec![Sample::float(metric.clone(), 0, 1.0)]))
            .chain(strings(&["dst", "+", "a", "b"]))
            .collect();
        label_join(FunctionArgs::new("label_join", values, &[]), &mut ctx).unwrap();
        assert_eq!(ctx.take_output()[0].metric.get("dst"), "x+y");
    }
}
