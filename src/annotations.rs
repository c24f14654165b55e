//! Non-fatal diagnostics attached to function results
//!
//! An [`Annotation`] never aborts evaluation. Functions return them next to a
//! possibly partial result and the caller merges them into the user facing
//! warnings list. Identical annotations (same rendered message) are kept once.

use thiserror::Error;

use crate::error::HistogramError;
use crate::model::PositionRange;

/// How serious an annotation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The result is likely not what the user wanted
    Warning,
    /// The result is fine but the input needed special treatment
    Info,
}

impl Severity {
    /// Lower case name, used as a metric label
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// A single diagnostic
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Annotation {
    /// Floats and histograms met in an operation that needs one kind
    #[error("PromQL warning: encountered a mix of histograms and floats for metric name {metric_name:?}")]
    MixedFloatsHistograms {
        /// Metric name of the offending series
        metric_name: String,
        /// Source position of the argument
        position: PositionRange,
    },

    /// Histogram points were skipped by a float-only reducer
    #[error("PromQL info: ignored histograms in a range containing both floats and histograms for metric name {metric_name:?}")]
    HistogramIgnoredInMixedRange {
        /// Metric name of the offending series
        metric_name: String,
        /// Source position of the argument
        position: PositionRange,
    },

    /// Quantile argument is NaN or outside of [0, 1]
    #[error("PromQL warning: quantile value should be between 0 and 1, got {q}")]
    InvalidQuantile {
        /// The supplied quantile
        q: f64,
        /// Source position of the argument
        position: PositionRange,
    },

    /// Classic bucket sample without a parsable `le` label
    #[error("PromQL warning: bucket label \"le\" is missing or has a malformed value of {label_value:?} for metric name {metric_name:?}")]
    BadBucketLabel {
        /// Metric name of the offending series
        metric_name: String,
        /// The raw `le` value
        label_value: String,
        /// Source position of the argument
        position: PositionRange,
    },

    /// Classic and native histograms share one label set
    #[error("PromQL warning: vector contains a mix of classic and native histograms for metric name {metric_name:?}")]
    MixedClassicNativeHistograms {
        /// Metric name of the offending series
        metric_name: String,
        /// Source position of the argument
        position: PositionRange,
    },

    /// Classic bucket counts had to be made monotonic
    #[error("PromQL info: input to histogram_quantile needed to be fixed for monotonicity for metric name {metric_name:?}")]
    HistogramQuantileForcedMonotonicity {
        /// Metric name of the offending series
        metric_name: String,
        /// Source position of the argument
        position: PositionRange,
    },

    /// Exponential and custom bucket histograms cannot be combined
    #[error("PromQL warning: vector contains a mix of histograms with exponential and custom buckets schemas for metric name {metric_name:?}")]
    MixedExponentialCustomHistograms {
        /// Metric name of the offending series
        metric_name: String,
        /// Source position of the argument
        position: PositionRange,
    },

    /// Custom bucket histograms with different bounds cannot be combined
    #[error("PromQL warning: vector contains histograms with incompatible custom buckets for metric name {metric_name:?}")]
    IncompatibleCustomBucketsHistograms {
        /// Metric name of the offending series
        metric_name: String,
        /// Source position of the argument
        position: PositionRange,
    },

    /// Counter function applied to a gauge histogram
    #[error("PromQL warning: this native histogram metric is not a counter: {metric_name:?}")]
    NativeHistogramNotCounter {
        /// Metric name of the offending series
        metric_name: String,
        /// Source position of the argument
        position: PositionRange,
    },

    /// Gauge function applied to a counter histogram
    #[error("PromQL warning: this native histogram metric is not a gauge: {metric_name:?}")]
    NativeHistogramNotGauge {
        /// Metric name of the offending series
        metric_name: String,
        /// Source position of the argument
        position: PositionRange,
    },
}

impl Annotation {
    /// Annotation for a failed histogram combination
    pub fn from_histogram_error(
        err: HistogramError,
        metric_name: &str,
        position: PositionRange,
    ) -> Self {
        let metric_name = metric_name.to_string();
        match err {
            HistogramError::IncompatibleSchema => Annotation::MixedExponentialCustomHistograms {
                metric_name,
                position,
            },
            HistogramError::IncompatibleBounds => {
                Annotation::IncompatibleCustomBucketsHistograms {
                    metric_name,
                    position,
                }
            }
        }
    }

    /// Severity of this annotation
    pub fn severity(&self) -> Severity {
        match self {
            Annotation::HistogramIgnoredInMixedRange { .. }
            | Annotation::HistogramQuantileForcedMonotonicity { .. } => Severity::Info,
            _ => Severity::Warning,
        }
    }

    /// Source position the annotation refers to
    pub fn position(&self) -> PositionRange {
        match self {
            Annotation::MixedFloatsHistograms { position, .. }
            | Annotation::HistogramIgnoredInMixedRange { position, .. }
            | Annotation::InvalidQuantile { position, .. }
            | Annotation::BadBucketLabel { position, .. }
            | Annotation::MixedClassicNativeHistograms { position, .. }
            | Annotation::HistogramQuantileForcedMonotonicity { position, .. }
            | Annotation::MixedExponentialCustomHistograms { position, .. }
            | Annotation::IncompatibleCustomBucketsHistograms { position, .. }
            | Annotation::NativeHistogramNotCounter { position, .. }
            | Annotation::NativeHistogramNotGauge { position, .. } => *position,
        }
    }
}

/// Append-only, de-duplicated collection of annotations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations(Vec<Annotation>);

impl Annotations {
    /// Empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an annotation unless an identical one is present
    pub fn add(&mut self, annotation: Annotation) -> &mut Self {
        let message = annotation.to_string();
        if !self.0.iter().any(|a| a.to_string() == message) {
            self.0.push(annotation);
        }
        self
    }

    /// Add every annotation of `other`
    pub fn merge(&mut self, other: Annotations) -> &mut Self {
        for annotation in other.0 {
            self.add(annotation);
        }
        self
    }

    /// Number of annotations
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing was annotated
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.0.iter()
    }

    /// Warnings only
    pub fn warnings(&self) -> impl Iterator<Item = &Annotation> {
        self.0.iter().filter(|a| a.severity() == Severity::Warning)
    }

    /// Infos only
    pub fn infos(&self) -> impl Iterator<Item = &Annotation> {
        self.0.iter().filter(|a| a.severity() == Severity::Info)
    }
}

impl IntoIterator for Annotations {
    type Item = Annotation;
    type IntoIter = std::vec::IntoIter<Annotation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Annotation> for Annotations {
    fn from(annotation: Annotation) -> Self {
        Self(vec![annotation])
    }
}
