//! Function call telemetry
//!
//! Process-wide Prometheus metrics counting function invocations, their
//! outcome, emitted annotations and latency. Recording is passive: nothing
//! here performs I/O, hosts expose [`gather_metrics`] however they like.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

use crate::annotations::Annotations;

lazy_static! {
    /// Function invocations by name and outcome
    pub static ref FUNCTION_CALLS_TOTAL: CounterVec = register_counter_vec!(
        "promql_function_calls_total",
        "Total PromQL function invocations",
        &["function", "outcome"]
    ).expect("promql_function_calls_total registers once");

    /// Annotations emitted by name and severity
    pub static ref FUNCTION_ANNOTATIONS_TOTAL: CounterVec = register_counter_vec!(
        "promql_function_annotations_total",
        "Total annotations emitted by PromQL functions",
        &["function", "severity"]
    ).expect("promql_function_annotations_total registers once");

    /// Function latency
    pub static ref FUNCTION_DURATION: HistogramVec = register_histogram_vec!(
        "promql_function_duration_seconds",
        "PromQL function evaluation latency in seconds",
        &["function"],
        vec![0.000_01, 0.000_1, 0.001, 0.01, 0.1, 1.0]
    ).expect("promql_function_duration_seconds registers once");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record one function invocation
#[inline]
pub fn record_call(function: &str, duration_secs: f64, success: bool) {
    let outcome = if success { "ok" } else { "error" };
    FUNCTION_CALLS_TOTAL
        .with_label_values(&[function, outcome])
        .inc();
    FUNCTION_DURATION
        .with_label_values(&[function])
        .observe(duration_secs);
}

/// Record the annotations a function emitted
#[inline]
pub fn record_annotations(function: &str, annotations: &Annotations) {
    for annotation in annotations.iter() {
        FUNCTION_ANNOTATIONS_TOTAL
            .with_label_values(&[function, annotation.severity().as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_call_is_exported() {
        record_call("metrics_test_fn", 0.001, true);
        record_call("metrics_test_fn", 0.002, false);
        let text = gather_metrics().unwrap();
        assert!(text.contains("promql_function_calls_total"));
        assert!(text.contains("metrics_test_fn"));
    }
}
