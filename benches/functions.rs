use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kuba_promql::functions::kahan::KahanSum;
use kuba_promql::functions::quantile::{bucket_quantile, histogram_quantile, ClassicBucket};
use kuba_promql::functions::rate::{extrapolated_delta, Window};
use kuba_promql::model::PositionRange;
use kuba_promql::{
    ArgExpr, EngineConfig, EvalContext, FPoint, FloatHistogram, FunctionRegistry, Labels, Series,
    Value,
};

fn create_counter_points(count: usize) -> Vec<FPoint> {
    (0..count)
        .map(|i| {
            // a reset every 500 samples
            let v = (i % 500) as f64 * 3.5;
            FPoint::new(i as i64 * 15_000, v)
        })
        .collect()
}

fn create_mixed_magnitudes(count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| match i % 3 {
            0 => 1e16,
            1 => 1.0,
            _ => -1e16,
        })
        .collect()
}

fn create_exponential_histogram(buckets: i32) -> FloatHistogram {
    let mut h = FloatHistogram::new(3);
    let mut count = 0.0;
    for i in -buckets..buckets {
        let c = (buckets - i.abs()) as f64;
        h.positive_buckets.insert(i, c);
        count += c;
    }
    h.count = count;
    h.sum = count * 1.7;
    h
}

fn bench_kahan_sum(c: &mut Criterion) {
    let mut group = c.benchmark_group("kahan_sum");

    for size in [100, 1000, 10000].iter() {
        let values = create_mixed_magnitudes(*size);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(values.iter().copied().collect::<KahanSum>().value()));
        });
    }

    group.finish();
}

fn bench_rate(c: &mut Criterion) {
    let mut group = c.benchmark_group("rate");

    for size in [100, 1000, 10000].iter() {
        let points = create_counter_points(*size);
        let end = points[points.len() - 1].t;
        let series = Series::from_floats(Labels::from_pairs([("__name__", "requests_total")]), points);
        let window = Window::new(end, end, 0);

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                black_box(extrapolated_delta(
                    &series,
                    Some(window),
                    1.1,
                    true,
                    true,
                    PositionRange::default(),
                ))
            });
        });
    }

    group.finish();
}

fn bench_histogram_quantile(c: &mut Criterion) {
    let mut group = c.benchmark_group("histogram_quantile");

    for size in [10, 40, 160].iter() {
        let classic: Vec<ClassicBucket> = (0..*size)
            .map(|i| ClassicBucket::new((i + 1) as f64 * 0.05, (i * i) as f64))
            .chain(std::iter::once(ClassicBucket::new(f64::INFINITY, (size * size) as f64)))
            .collect();
        group.bench_with_input(BenchmarkId::new("classic", size), size, |b, _| {
            b.iter(|| {
                let mut buckets = classic.clone();
                black_box(bucket_quantile(0.99, &mut buckets))
            });
        });

        let native = create_exponential_histogram(*size as i32);
        group.bench_with_input(BenchmarkId::new("native", size), size, |b, _| {
            b.iter(|| black_box(histogram_quantile(0.99, &native)));
        });
    }

    group.finish();
}

fn bench_registry_dispatch(c: &mut Criterion) {
    // RUST_LOG=trace shows the dispatch events emitted per call
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let mut config = EngineConfig::default();
    config.monitoring.metrics_enabled = false;
    let registry = FunctionRegistry::new(&config);
    let mut ctx = EvalContext::new(3_600_000, &config);
    let matrix: Vec<Series> = (0..100)
        .map(|i| {
            let pod = format!("pod-{}", i);
            Series::from_floats(
                Labels::from_pairs([("__name__", "requests_total"), ("pod", pod.as_str())]),
                create_counter_points(240),
            )
        })
        .collect();
    let exprs = [ArgExpr::range(3_600_000, 0)];

    c.bench_function("registry_rate_100_series", |b| {
        b.iter(|| {
            let (out, _) = registry
                .call("rate", vec![Value::Matrix(matrix.clone())], &exprs, &mut ctx)
                .unwrap();
            black_box(out.len());
            ctx.recycle(out);
        });
    });
}

criterion_group!(
    benches,
    bench_kahan_sum,
    bench_rate,
    bench_histogram_quantile,
    bench_registry_dispatch
);
criterion_main!(benches);
