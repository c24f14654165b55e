//! Kuba PromQL - function evaluation engine for PromQL style queries
//!
//! This library evaluates the built-in functions of the Prometheus query
//! language over already selected data:
//! - Instant vectors and range matrices of float and native histogram points
//! - Counter aware rate, increase and delta with boundary extrapolation
//! - Classic and native histogram quantiles and fractions
//! - Kahan compensated reducers, linear regression and smoothing
//! - Label rewriting, sorting and calendar extraction
//!
//! Parsing and query planning live elsewhere. A host evaluator resolves the
//! arguments, then hands them to [`FunctionRegistry::call`] together with a
//! per-step [`EvalContext`]. Fatal problems come back as [`EvalError`];
//! questionable input yields a result plus [`Annotations`].
//!
//! ```
//! use kuba_promql::{EngineConfig, EvalContext, FunctionRegistry, Labels, Sample, Value};
//!
//! let config = EngineConfig::default();
//! let registry = FunctionRegistry::new(&config);
//! let mut ctx = EvalContext::new(60_000, &config);
//!
//! let input = vec![Sample::float(Labels::from_pairs([("__name__", "temp")]), 60_000, -2.5)];
//! let (out, annotations) = registry
//!     .call("abs", vec![Value::Vector(input)], &[], &mut ctx)
//!     .unwrap();
//! assert_eq!(out[0].f(), Some(2.5));
//! assert!(out[0].metric.is_empty());
//! assert!(annotations.is_empty());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod annotations;
pub mod error;
pub mod model;

/// Configuration management with TOML support
pub mod config;

/// Per-step evaluation state: timestamp, output buffer and caches
pub mod eval;

/// The function library and its registry
pub mod functions;

/// Prometheus metrics and telemetry
pub mod metrics;

// Re-export main types
pub use annotations::{Annotation, Annotations, Severity};
pub use config::EngineConfig;
pub use error::{EvalError, EvalResult, Error, Result};
pub use eval::EvalContext;
pub use functions::{FunctionArgs, FunctionDef, FunctionRegistry};
pub use model::{
    ArgExpr, FPoint, FloatHistogram, HPoint, Labels, Matrix, PositionRange, Sample, Series, Value,
    ValueType, Vector,
};
