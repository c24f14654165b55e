//! PromQL function library and registry
//!
//! Every function shares one calling convention: it receives its evaluated
//! arguments together with the raw argument expressions, appends its result
//! to the [`EvalContext`] output buffer and returns the annotations it
//! raised. [`FunctionRegistry`] resolves names, validates arity and argument
//! kinds, and records call metrics around the invocation.
//!
//! # Families
//!
//! - [`math`]: elementwise math, clamp/round and the literal-ish helpers
//!   (`pi`, `time`, `vector`, `scalar`, `absent`, `timestamp`)
//! - [`date`]: calendar extraction in UTC
//! - [`over_time`]: reducers over range vectors
//! - [`rate`]: counter-aware rate, increase and delta, irate and idelta
//! - [`histogram`]: histogram_quantile, histogram_fraction and field readers
//! - [`regression`]: deriv, predict_linear, double exponential smoothing
//! - [`labels`]: label_replace and label_join
//! - [`sort`]: value and label based ordering

pub mod date;
pub mod histogram;
pub mod kahan;
pub mod labels;
pub mod math;
pub mod over_time;
pub mod quantile;
pub mod rate;
pub mod regression;
pub mod sort;

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use tracing::{debug, trace};

use crate::annotations::Annotations;
use crate::config::EngineConfig;
use crate::error::{EvalError, EvalResult};
use crate::eval::EvalContext;
use crate::metrics;
use crate::model::expr::position_of;
use crate::model::{ArgExpr, Matrix, PositionRange, Value, ValueType, Vector};

/// Signature shared by every function implementation
pub type FunctionCall = fn(FunctionArgs<'_>, &mut EvalContext) -> EvalResult<Annotations>;

/// Static description of one function
#[derive(Clone, Copy)]
pub struct FunctionDef {
    /// Name as written in queries
    pub name: &'static str,
    /// Declared argument kinds
    pub arg_types: &'static [ValueType],
    /// 0: exact arity, n > 0: up to n optional trailing arguments,
    /// -1: the last kind repeats without bound
    pub variadic: i32,
    /// Kind of the result
    pub return_type: ValueType,
    /// Hidden unless experimental functions are enabled
    pub experimental: bool,
    /// Result depends on the evaluation time rather than only on the
    /// arguments
    pub at_modifier_unsafe: bool,
    /// Implementation
    pub call: FunctionCall,
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("arg_types", &self.arg_types)
            .field("variadic", &self.variadic)
            .field("return_type", &self.return_type)
            .field("experimental", &self.experimental)
            .field("at_modifier_unsafe", &self.at_modifier_unsafe)
            .finish_non_exhaustive()
    }
}

impl FunctionDef {
    /// Smallest accepted argument count
    pub fn min_args(&self) -> usize {
        if self.variadic == 0 {
            self.arg_types.len()
        } else {
            self.arg_types.len().saturating_sub(1)
        }
    }

    /// Largest accepted argument count, `None` when unbounded
    pub fn max_args(&self) -> Option<usize> {
        match self.variadic {
            v if v < 0 => None,
            0 => Some(self.arg_types.len()),
            v => Some(self.arg_types.len() - 1 + v as usize),
        }
    }

    fn expected_arity(&self) -> String {
        match (self.min_args(), self.max_args()) {
            (min, Some(max)) if min == max => min.to_string(),
            (min, Some(max)) => format!("{} to {}", min, max),
            (min, None) => format!("at least {}", min),
        }
    }

    fn check_args(&self, values: &[Value]) -> EvalResult<()> {
        let got = values.len();
        let too_many = self.max_args().is_some_and(|max| got > max);
        if got < self.min_args() || too_many {
            return Err(EvalError::ArgumentCount {
                function: self.name,
                expected: self.expected_arity(),
                got,
            });
        }
        for (index, value) in values.iter().enumerate() {
            let expected = self.arg_types[index.min(self.arg_types.len() - 1)];
            if !value.conforms_to(expected) {
                return Err(EvalError::ArgumentType {
                    function: self.name,
                    index,
                    expected: expected.name(),
                    got: value.value_type().name(),
                });
            }
        }
        Ok(())
    }
}

/// Evaluated arguments of one call
///
/// Accessors move values out where the function consumes them, so a
/// function owns its input vectors and may reuse their samples.
#[derive(Debug)]
pub struct FunctionArgs<'a> {
    function: &'static str,
    values: Vec<Value>,
    exprs: &'a [ArgExpr],
}

impl<'a> FunctionArgs<'a> {
    /// Bundle evaluated values with their expression nodes
    ///
    /// `exprs` may be shorter than `values`; missing nodes have no position
    /// and no selector information.
    pub fn new(function: &'static str, values: Vec<Value>, exprs: &'a [ArgExpr]) -> Self {
        Self {
            function,
            values,
            exprs,
        }
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True for zero-argument calls
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Name of the called function
    pub fn function(&self) -> &'static str {
        self.function
    }

    /// Source position of argument `i`
    pub fn position(&self, i: usize) -> PositionRange {
        position_of(self.exprs, i)
    }

    /// Expression node of argument `i`
    pub fn expr(&self, i: usize) -> Option<&'a ArgExpr> {
        self.exprs.get(i)
    }

    fn missing(&self, i: usize) -> EvalError {
        EvalError::ArgumentCount {
            function: self.function,
            expected: format!("at least {}", i + 1),
            got: self.values.len(),
        }
    }

    fn wrong_type(&self, i: usize, expected: ValueType) -> EvalError {
        EvalError::ArgumentType {
            function: self.function,
            index: i,
            expected: expected.name(),
            got: self.values[i].value_type().name(),
        }
    }

    fn check_kind(&self, i: usize, expected: ValueType) -> EvalResult<()> {
        match self.values.get(i) {
            Some(v) if v.value_type() == expected => Ok(()),
            Some(_) => Err(self.wrong_type(i, expected)),
            None => Err(self.missing(i)),
        }
    }

    /// Take instant vector argument `i`
    pub fn take_vector(&mut self, i: usize) -> EvalResult<Vector> {
        self.check_kind(i, ValueType::Vector)?;
        match &mut self.values[i] {
            Value::Vector(v) => Ok(std::mem::take(v)),
            _ => Ok(Vector::new()),
        }
    }

    /// Take range vector argument `i`
    pub fn take_matrix(&mut self, i: usize) -> EvalResult<Matrix> {
        self.check_kind(i, ValueType::Matrix)?;
        match &mut self.values[i] {
            Value::Matrix(m) => Ok(std::mem::take(m)),
            _ => Ok(Matrix::new()),
        }
    }

    /// Borrow range vector argument `i`
    pub fn matrix_ref(&self, i: usize) -> EvalResult<&Matrix> {
        match self.values.get(i) {
            Some(Value::Matrix(m)) => Ok(m),
            Some(_) => Err(self.wrong_type(i, ValueType::Matrix)),
            None => Err(self.missing(i)),
        }
    }

    /// Scalar argument `i`
    pub fn scalar(&self, i: usize) -> EvalResult<f64> {
        match self.values.get(i) {
            Some(v) => v
                .as_scalar()
                .ok_or_else(|| self.wrong_type(i, ValueType::Scalar)),
            None => Err(self.missing(i)),
        }
    }

    /// String literal argument `i`
    pub fn string(&self, i: usize) -> EvalResult<&str> {
        match self.values.get(i) {
            Some(Value::String(s)) => Ok(s),
            _ => Err(EvalError::MissingStringArgument {
                function: self.function,
                index: i,
            }),
        }
    }

    /// String literal arguments from `start` to the end
    pub fn strings_from(&self, start: usize) -> EvalResult<Vec<String>> {
        (start..self.values.len())
            .map(|i| self.string(i).map(str::to_string))
            .collect()
    }
}

use crate::model::ValueType::{Matrix as M, Scalar as S, String as Str, Vector as V};

macro_rules! def {
    ($name:literal, [$($arg:expr),*], $variadic:expr, $ret:expr, $call:path) => {
        FunctionDef {
            name: $name,
            arg_types: &[$($arg),*],
            variadic: $variadic,
            return_type: $ret,
            experimental: false,
            at_modifier_unsafe: false,
            call: $call,
        }
    };
}

const fn experimental(def: FunctionDef) -> FunctionDef {
    FunctionDef {
        experimental: true,
        ..def
    }
}

const fn at_unsafe(def: FunctionDef) -> FunctionDef {
    FunctionDef {
        at_modifier_unsafe: true,
        ..def
    }
}

static FUNCTIONS: &[FunctionDef] = &[
    // elementwise
    def!("abs", [V], 0, V, math::abs),
    def!("ceil", [V], 0, V, math::ceil),
    def!("floor", [V], 0, V, math::floor),
    def!("exp", [V], 0, V, math::exp),
    def!("sqrt", [V], 0, V, math::sqrt),
    def!("ln", [V], 0, V, math::ln),
    def!("log2", [V], 0, V, math::log2),
    def!("log10", [V], 0, V, math::log10),
    def!("sin", [V], 0, V, math::sin),
    def!("cos", [V], 0, V, math::cos),
    def!("tan", [V], 0, V, math::tan),
    def!("asin", [V], 0, V, math::asin),
    def!("acos", [V], 0, V, math::acos),
    def!("atan", [V], 0, V, math::atan),
    def!("sinh", [V], 0, V, math::sinh),
    def!("cosh", [V], 0, V, math::cosh),
    def!("tanh", [V], 0, V, math::tanh),
    def!("asinh", [V], 0, V, math::asinh),
    def!("acosh", [V], 0, V, math::acosh),
    def!("atanh", [V], 0, V, math::atanh),
    def!("deg", [V], 0, V, math::deg),
    def!("rad", [V], 0, V, math::rad),
    def!("sgn", [V], 0, V, math::sgn),
    def!("clamp", [V, S, S], 0, V, math::clamp),
    def!("clamp_min", [V, S], 0, V, math::clamp_min),
    def!("clamp_max", [V, S], 0, V, math::clamp_max),
    def!("round", [V, S], 1, V, math::round),
    def!("pi", [], 0, S, math::pi),
    at_unsafe(def!("time", [], 0, S, math::time)),
    def!("vector", [S], 0, V, math::vector),
    def!("scalar", [V], 0, S, math::scalar),
    at_unsafe(def!("timestamp", [V], 0, V, math::timestamp)),
    def!("absent", [V], 0, V, math::absent),
    // calendar
    at_unsafe(def!("days_in_month", [V], 1, V, date::days_in_month)),
    at_unsafe(def!("day_of_month", [V], 1, V, date::day_of_month)),
    at_unsafe(def!("day_of_week", [V], 1, V, date::day_of_week)),
    at_unsafe(def!("day_of_year", [V], 1, V, date::day_of_year)),
    at_unsafe(def!("hour", [V], 1, V, date::hour)),
    at_unsafe(def!("minute", [V], 1, V, date::minute)),
    at_unsafe(def!("month", [V], 1, V, date::month)),
    at_unsafe(def!("year", [V], 1, V, date::year)),
    // over time
    def!("sum_over_time", [M], 0, V, over_time::sum_over_time),
    def!("avg_over_time", [M], 0, V, over_time::avg_over_time),
    def!("min_over_time", [M], 0, V, over_time::min_over_time),
    def!("max_over_time", [M], 0, V, over_time::max_over_time),
    def!("count_over_time", [M], 0, V, over_time::count_over_time),
    def!("stddev_over_time", [M], 0, V, over_time::stddev_over_time),
    def!("stdvar_over_time", [M], 0, V, over_time::stdvar_over_time),
    def!("quantile_over_time", [S, M], 0, V, over_time::quantile_over_time),
    experimental(def!("mad_over_time", [M], 0, V, over_time::mad_over_time)),
    def!("present_over_time", [M], 0, V, over_time::present_over_time),
    def!("absent_over_time", [M], 0, V, over_time::absent_over_time),
    def!("last_over_time", [M], 0, V, over_time::last_over_time),
    def!("changes", [M], 0, V, over_time::changes),
    def!("resets", [M], 0, V, over_time::resets),
    // rates
    def!("rate", [M], 0, V, rate::rate),
    def!("increase", [M], 0, V, rate::increase),
    def!("delta", [M], 0, V, rate::delta),
    def!("irate", [M], 0, V, rate::irate),
    def!("idelta", [M], 0, V, rate::idelta),
    // histograms
    def!("histogram_quantile", [S, V], 0, V, histogram::histogram_quantile),
    def!("histogram_fraction", [S, S, V], 0, V, histogram::histogram_fraction),
    def!("histogram_avg", [V], 0, V, histogram::histogram_avg),
    def!("histogram_count", [V], 0, V, histogram::histogram_count),
    def!("histogram_sum", [V], 0, V, histogram::histogram_sum),
    def!("histogram_stddev", [V], 0, V, histogram::histogram_stddev),
    def!("histogram_stdvar", [V], 0, V, histogram::histogram_stdvar),
    // regression
    def!("deriv", [M], 0, V, regression::deriv),
    at_unsafe(def!("predict_linear", [M, S], 0, V, regression::predict_linear)),
    experimental(def!("double_exponential_smoothing", [M, S, S], 0, V, regression::double_exponential_smoothing)),
    experimental(def!("holt_winters", [M, S, S], 0, V, regression::double_exponential_smoothing)),
    // labels
    def!("label_replace", [V, Str, Str, Str, Str], 0, V, labels::label_replace),
    def!("label_join", [V, Str, Str, Str], -1, V, labels::label_join),
    // sorting
    def!("sort", [V], 0, V, sort::sort),
    def!("sort_desc", [V], 0, V, sort::sort_desc),
    experimental(def!("sort_by_label", [V, Str], -1, V, sort::sort_by_label)),
    experimental(def!("sort_by_label_desc", [V, Str], -1, V, sort::sort_by_label_desc)),
];

/// Name to implementation mapping
///
/// Built once from an [`EngineConfig`] and shared read-only afterwards;
/// all per-step state lives in the [`EvalContext`] handed to [`call`].
///
/// [`call`]: FunctionRegistry::call
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<&'static str, FunctionDef>,
    metrics_enabled: bool,
}

impl FunctionRegistry {
    /// Registry of every function allowed by `config`
    pub fn new(config: &EngineConfig) -> Self {
        let functions = FUNCTIONS
            .iter()
            .filter(|def| config.functions.enable_experimental_functions || !def.experimental)
            .map(|def| (def.name, *def))
            .collect();
        Self {
            functions,
            metrics_enabled: config.monitoring.metrics_enabled,
        }
    }

    /// Look up a function definition
    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names in alphabetical order
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Invoke `name` with evaluated arguments
    ///
    /// The output buffer of `ctx` is cleared first; on success its contents
    /// are returned with the annotations. `exprs` carries the argument
    /// expression nodes in argument order and may be empty when the caller
    /// has no source positions.
    pub fn call(
        &self,
        name: &str,
        values: Vec<Value>,
        exprs: &[ArgExpr],
        ctx: &mut EvalContext,
    ) -> EvalResult<(Vector, Annotations)> {
        let def = self
            .functions
            .get(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
        def.check_args(&values)?;

        ctx.begin_call();
        trace!(function = def.name, args = values.len(), ts = ctx.ts(), "Dispatching function");
        let start = Instant::now();
        let result = (def.call)(FunctionArgs::new(def.name, values, exprs), ctx);
        let elapsed = start.elapsed().as_secs_f64();

        if self.metrics_enabled {
            metrics::record_call(def.name, elapsed, result.is_ok());
        }
        match result {
            Ok(annos) => {
                if self.metrics_enabled {
                    metrics::record_annotations(def.name, &annos);
                }
                Ok((ctx.take_output(), annos))
            }
            Err(err) => {
                debug!(function = def.name, error = %err, "Function evaluation failed");
                ctx.begin_call();
                Err(err)
            }
        }
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Labels, Sample};

    fn vector(values: &[f64]) -> Value {
        Value::Vector(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| Sample::float(Labels::from_pairs([("i", i.to_string())]), 0, *v))
                .collect(),
        )
    }

    #[test]
    fn test_registry_names_are_unique() {
        let mut names: Vec<_> = FUNCTIONS.iter().map(|d| d.name).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_experimental_functions_are_gated() {
        let on = FunctionRegistry::default();
        assert!(on.contains("mad_over_time"));
        assert!(on.contains("holt_winters"));

        let off = FunctionRegistry::new(&EngineConfig::default().with_experimental_functions(false));
        assert!(!off.contains("mad_over_time"));
        assert!(!off.contains("double_exponential_smoothing"));
        assert!(!off.contains("sort_by_label"));
        assert!(off.contains("rate"));
        assert_eq!(on.len() - off.len(), 5);
    }

    #[test]
    fn test_arity() {
        let registry = FunctionRegistry::default();
        let round = registry.get("round").unwrap();
        assert_eq!((round.min_args(), round.max_args()), (1, Some(2)));
        let join = registry.get("label_join").unwrap();
        assert_eq!((join.min_args(), join.max_args()), (3, None));
        let pi = registry.get("pi").unwrap();
        assert_eq!((pi.min_args(), pi.max_args()), (0, Some(0)));
    }

    #[test]
    fn test_call_validates_arguments() {
        let registry = FunctionRegistry::default();
        let mut ctx = EvalContext::at(0);

        let err = registry.call("nope", vec![], &[], &mut ctx).unwrap_err();
        assert_eq!(err, EvalError::UnknownFunction("nope".into()));

        let err = registry.call("abs", vec![], &[], &mut ctx).unwrap_err();
        assert!(matches!(err, EvalError::ArgumentCount { got: 0, .. }));

        let err = registry
            .call("abs", vec![Value::Scalar(1.0)], &[], &mut ctx)
            .unwrap_err();
        assert!(matches!(err, EvalError::ArgumentType { index: 0, .. }));

        let err = registry
            .call("label_join", vec![vector(&[1.0]), Value::String("d".into()), Value::String("-".into()), Value::Scalar(1.0)], &[], &mut ctx)
            .unwrap_err();
        assert!(matches!(err, EvalError::ArgumentType { index: 3, .. }));
    }

    #[test]
    fn test_one_sample_vector_stands_in_for_scalar() {
        let registry = FunctionRegistry::default();
        let mut ctx = EvalContext::at(0);
        let (out, _) = registry
            .call("clamp_max", vec![vector(&[5.0, 1.0]), vector(&[2.0])], &[], &mut ctx)
            .unwrap();
        let values: Vec<_> = out.iter().filter_map(Sample::f).collect();
        assert_eq!(values, vec![2.0, 1.0]);
    }

    #[test]
    fn test_call_clears_previous_output() {
        let registry = FunctionRegistry::default();
        let mut ctx = EvalContext::at(0);
        ctx.push_float(Labels::empty(), 42.0);
        let (out, annos) = registry.call("pi", vec![], &[], &mut ctx).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].f(), Some(std::f64::consts::PI));
        assert!(annos.is_empty());
    }

    #[test]
    fn test_function_args_accessors() {
        let exprs = [ArgExpr::Other {
            position: PositionRange::new(4, 7),
        }];
        let mut args = FunctionArgs::new(
            "test",
            vec![vector(&[1.0]), Value::String("a".into()), Value::String("b".into())],
            &exprs,
        );
        assert_eq!(args.position(0), PositionRange::new(4, 7));
        assert_eq!(args.position(2), PositionRange::default());
        assert!(args.expr(1).is_none());
        assert_eq!(args.strings_from(1).unwrap(), vec!["a", "b"]);
        assert!(matches!(
            args.string(0),
            Err(EvalError::MissingStringArgument { index: 0, .. })
        ));
        assert_eq!(args.take_vector(0).unwrap().len(), 1);
        assert!(args.take_matrix(0).is_err());
        assert!(args.scalar(5).is_err());
    }
}
