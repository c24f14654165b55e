//! Error types for the function engine
//!
//! Errors come in two tiers. Everything in this module is fatal: an
//! [`EvalError`] aborts the query that triggered it and its message is shown
//! to the user verbatim. Conditions that still have a well defined best
//! effort answer are reported as [`crate::annotations::Annotation`]s instead
//! and never surface here.

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Function evaluation failed
    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    /// Histogram arithmetic failed
    #[error("Histogram error: {0}")]
    Histogram(#[from] HistogramError),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Fatal conditions raised while evaluating a function call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Regular expression argument does not compile
    #[error("invalid regular expression in {function}(): {pattern}")]
    InvalidRegex {
        /// Function that received the pattern
        function: &'static str,
        /// The pattern as written by the user
        pattern: String,
    },

    /// Destination label is not a legal label name
    #[error("invalid destination label name in {function}(): {name}")]
    InvalidDestinationLabel {
        /// Function that received the name
        function: &'static str,
        /// Offending label name
        name: String,
    },

    /// Source label is not a legal label name
    #[error("invalid source label name in {function}(): {name}")]
    InvalidSourceLabel {
        /// Function that received the name
        function: &'static str,
        /// Offending label name
        name: String,
    },

    /// Smoothing factor outside of (0, 1)
    #[error("invalid smoothing factor. Expected: 0 < sf < 1, got: {0}")]
    InvalidSmoothingFactor(f64),

    /// Trend factor outside of (0, 1)
    #[error("invalid trend factor. Expected: 0 < tf < 1, got: {0}")]
    InvalidTrendFactor(f64),

    /// A label rewrite produced two samples with the same label set
    #[error("vector cannot contain metrics with the same labelset")]
    DuplicateLabelSet,

    /// No function is registered under this name
    #[error("unknown function with name {0:?}")]
    UnknownFunction(String),

    /// Wrong number of arguments for the function
    #[error("wrong number of arguments for {function}(): expected {expected}, got {got}")]
    ArgumentCount {
        /// Called function
        function: &'static str,
        /// Human readable description of the accepted arity
        expected: String,
        /// Number of arguments supplied
        got: usize,
    },

    /// Argument value has the wrong kind
    #[error("expected type {expected} in call to {function}() argument {index}, got {got}")]
    ArgumentType {
        /// Called function
        function: &'static str,
        /// Zero based argument position
        index: usize,
        /// Expected value kind
        expected: &'static str,
        /// Supplied value kind
        got: &'static str,
    },

    /// A string argument was expected in the raw expression nodes
    #[error("missing string literal for {function}() argument {index}")]
    MissingStringArgument {
        /// Called function
        function: &'static str,
        /// Zero based argument position
        index: usize,
    },
}

/// Errors from combining two native histograms
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramError {
    /// One histogram uses custom buckets, the other exponential buckets
    #[error("cannot apply this operation on histograms with a mix of exponential and custom bucket schemas")]
    IncompatibleSchema,

    /// Both use custom buckets but their bounds differ
    #[error("cannot apply this operation on custom buckets histograms with different custom bounds")]
    IncompatibleBounds,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for [`crate::config::EngineConfig`]
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for function evaluation
pub type EvalResult<T> = std::result::Result<T, EvalError>;
