//! Points, samples, series and the argument value enum

use std::collections::HashSet;

use super::histogram::FloatHistogram;
use super::labels::Labels;

/// A float value at a timestamp (milliseconds since epoch)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FPoint {
    /// Timestamp in milliseconds
    pub t: i64,
    /// Value
    pub f: f64,
}

impl FPoint {
    /// Create a float point
    pub fn new(t: i64, f: f64) -> Self {
        Self { t, f }
    }
}

/// A histogram value at a timestamp (milliseconds since epoch)
#[derive(Debug, Clone, PartialEq)]
pub struct HPoint {
    /// Timestamp in milliseconds
    pub t: i64,
    /// Owned histogram
    pub h: FloatHistogram,
}

impl HPoint {
    /// Create a histogram point
    pub fn new(t: i64, h: FloatHistogram) -> Self {
        Self { t, h }
    }
}

/// Either kind of point
#[derive(Debug, Clone, PartialEq)]
pub enum Point {
    /// Float point
    Float(FPoint),
    /// Histogram point
    Histogram(HPoint),
}

impl Point {
    /// Timestamp of the point
    pub fn t(&self) -> i64 {
        match self {
            Point::Float(p) => p.t,
            Point::Histogram(p) => p.t,
        }
    }
}

/// Borrowed view of a point, produced by [`Series::points`]
#[derive(Debug, Clone, Copy)]
pub enum PointRef<'a> {
    /// Float point
    Float(&'a FPoint),
    /// Histogram point
    Histogram(&'a HPoint),
}

impl PointRef<'_> {
    /// Timestamp of the point
    pub fn t(&self) -> i64 {
        match self {
            PointRef::Float(p) => p.t,
            PointRef::Histogram(p) => p.t,
        }
    }
}

/// One labelled point of an instant vector
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Label set identifying the series
    pub metric: Labels,
    /// The value
    pub point: Point,
    /// Set when `__name__` is to be removed later (delayed name removal) or
    /// was removed already, so downstream code does not strip it twice
    pub drop_name: bool,
}

impl Sample {
    /// Float sample
    pub fn float(metric: Labels, t: i64, f: f64) -> Self {
        Self {
            metric,
            point: Point::Float(FPoint { t, f }),
            drop_name: false,
        }
    }

    /// Histogram sample
    pub fn histogram(metric: Labels, t: i64, h: FloatHistogram) -> Self {
        Self {
            metric,
            point: Point::Histogram(HPoint { t, h }),
            drop_name: false,
        }
    }

    /// Timestamp of the sample
    pub fn t(&self) -> i64 {
        self.point.t()
    }

    /// Float value, `None` for histogram samples
    pub fn f(&self) -> Option<f64> {
        match &self.point {
            Point::Float(p) => Some(p.f),
            Point::Histogram(_) => None,
        }
    }

    /// Histogram value, `None` for float samples
    pub fn h(&self) -> Option<&FloatHistogram> {
        match &self.point {
            Point::Float(_) => None,
            Point::Histogram(p) => Some(&p.h),
        }
    }
}

/// A labelled series of points over a time range
///
/// Float and histogram points are stored separately, each sorted by
/// timestamp. A series may hold both kinds within one window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    /// Label set identifying the series
    pub metric: Labels,
    /// Float points in timestamp order
    pub floats: Vec<FPoint>,
    /// Histogram points in timestamp order
    pub histograms: Vec<HPoint>,
    /// See [`Sample::drop_name`]
    pub drop_name: bool,
}

impl Series {
    /// Series with float points only
    pub fn from_floats(metric: Labels, floats: Vec<FPoint>) -> Self {
        Self {
            metric,
            floats,
            ..Default::default()
        }
    }

    /// Series with histogram points only
    pub fn from_histograms(metric: Labels, histograms: Vec<HPoint>) -> Self {
        Self {
            metric,
            histograms,
            ..Default::default()
        }
    }

    /// True when the series has no points of either kind
    pub fn is_empty(&self) -> bool {
        self.floats.is_empty() && self.histograms.is_empty()
    }

    /// Total number of points
    pub fn len(&self) -> usize {
        self.floats.len() + self.histograms.len()
    }

    /// All points merged in timestamp order
    ///
    /// On equal timestamps the float point is yielded first.
    pub fn points(&self) -> MergedPoints<'_> {
        MergedPoints {
            floats: &self.floats,
            histograms: &self.histograms,
        }
    }
}

/// Iterator over a series' float and histogram points in timestamp order
#[derive(Debug, Clone)]
pub struct MergedPoints<'a> {
    floats: &'a [FPoint],
    histograms: &'a [HPoint],
}

impl<'a> Iterator for MergedPoints<'a> {
    type Item = PointRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let take_float = match (self.floats.first(), self.histograms.first()) {
            (None, None) => return None,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(f), Some(h)) => f.t <= h.t,
        };
        if take_float {
            let (first, rest) = self.floats.split_first()?;
            self.floats = rest;
            Some(PointRef::Float(first))
        } else {
            let (first, rest) = self.histograms.split_first()?;
            self.histograms = rest;
            Some(PointRef::Histogram(first))
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.floats.len() + self.histograms.len();
        (n, Some(n))
    }
}

/// Samples sharing one evaluation timestamp, each from a distinct label set
pub type Vector = Vec<Sample>;

/// Series covering a time range
pub type Matrix = Vec<Series>;

/// Whether two samples in `samples` carry the same label set
pub fn contains_same_labelset(samples: &[Sample]) -> bool {
    let mut seen = HashSet::with_capacity(samples.len());
    samples.iter().any(|s| !seen.insert(&s.metric))
}

/// Kind of an argument value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// A single float
    Scalar,
    /// Instant vector
    Vector,
    /// Range vector
    Matrix,
    /// String literal
    String,
}

impl ValueType {
    /// Name as used in error messages
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Scalar => "scalar",
            ValueType::Vector => "instant vector",
            ValueType::Matrix => "range vector",
            ValueType::String => "string",
        }
    }
}

/// An evaluated function argument
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A single float
    Scalar(f64),
    /// Instant vector
    Vector(Vector),
    /// Range vector
    Matrix(Matrix),
    /// String literal
    String(String),
}

impl Value {
    /// Kind of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Scalar(_) => ValueType::Scalar,
            Value::Vector(_) => ValueType::Vector,
            Value::Matrix(_) => ValueType::Matrix,
            Value::String(_) => ValueType::String,
        }
    }

    /// Whether this value can be used where `expected` is declared
    ///
    /// A vector holding exactly one float sample stands in for a scalar.
    pub fn conforms_to(&self, expected: ValueType) -> bool {
        match (self, expected) {
            (Value::Vector(v), ValueType::Scalar) => v.len() == 1 && v[0].f().is_some(),
            _ => self.value_type() == expected,
        }
    }

    /// Scalar content, reading through a one-sample vector
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(f) => Some(*f),
            Value::Vector(v) if v.len() == 1 => v[0].f(),
            _ => None,
        }
    }
}
