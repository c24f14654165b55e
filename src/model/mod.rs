//! Value model: labels, histograms, points, samples and argument values

pub mod expr;
pub mod histogram;
pub mod labels;
pub mod value;

pub use expr::{ArgExpr, LabelMatcher, MatchType, PositionRange};
pub use histogram::{Bucket, CounterResetHint, FloatHistogram, CUSTOM_BUCKETS_SCHEMA};
pub use labels::{is_valid_label_name, Builder, Label, Labels, BUCKET_LABEL, METRIC_NAME};
pub use value::{
    contains_same_labelset, FPoint, HPoint, Matrix, Point, PointRef, Sample, Series, Value,
    ValueType, Vector,
};
