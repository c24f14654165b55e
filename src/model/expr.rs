//! Raw argument expressions
//!
//! The evaluator hands every function the already evaluated argument values
//! plus a lightweight description of the expressions they came from. Functions
//! use it for three things only: source positions for annotations, the range
//! and offset of a range selector (rate family), and the label matchers of a
//! selector (`absent`, `absent_over_time`).

/// Byte offsets of an expression in the query text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionRange {
    /// Start offset, inclusive
    pub start: usize,
    /// End offset, exclusive
    pub end: usize,
}

impl PositionRange {
    /// Create a position range
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Label matcher operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `=~`
    Regexp,
    /// `!~`
    NotRegexp,
}

/// A label matcher from a selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    /// Operator
    pub match_type: MatchType,
    /// Label name
    pub name: String,
    /// Value or pattern
    pub value: String,
}

impl LabelMatcher {
    /// Create a matcher
    pub fn new(match_type: MatchType, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            match_type,
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Shape of one argument expression
#[derive(Debug, Clone, PartialEq)]
pub enum ArgExpr {
    /// Instant vector selector, e.g. `up{job="api"}`
    VectorSelector {
        /// Label matchers, including the one on `__name__`
        matchers: Vec<LabelMatcher>,
        /// Source position
        position: PositionRange,
    },
    /// Range vector selector, e.g. `up[5m] offset 1m`
    MatrixSelector {
        /// Label matchers of the inner selector
        matchers: Vec<LabelMatcher>,
        /// Selected range in milliseconds
        range_ms: i64,
        /// Offset in milliseconds
        offset_ms: i64,
        /// Source position
        position: PositionRange,
    },
    /// Subquery producing a range vector
    Subquery {
        /// Selected range in milliseconds
        range_ms: i64,
        /// Offset in milliseconds
        offset_ms: i64,
        /// Source position
        position: PositionRange,
    },
    /// Any other expression (literals, calls, binary operations)
    Other {
        /// Source position
        position: PositionRange,
    },
}

impl ArgExpr {
    /// A range selector without matchers, handy for callers that only know
    /// the window
    pub fn range(range_ms: i64, offset_ms: i64) -> Self {
        ArgExpr::MatrixSelector {
            matchers: Vec::new(),
            range_ms,
            offset_ms,
            position: PositionRange::default(),
        }
    }

    /// Source position of the expression
    pub fn position(&self) -> PositionRange {
        match self {
            ArgExpr::VectorSelector { position, .. }
            | ArgExpr::MatrixSelector { position, .. }
            | ArgExpr::Subquery { position, .. }
            | ArgExpr::Other { position } => *position,
        }
    }

    /// Range and offset when the expression selects a range
    pub fn range_and_offset(&self) -> Option<(i64, i64)> {
        match self {
            ArgExpr::MatrixSelector {
                range_ms,
                offset_ms,
                ..
            }
            | ArgExpr::Subquery {
                range_ms,
                offset_ms,
                ..
            } => Some((*range_ms, *offset_ms)),
            _ => None,
        }
    }

    /// Label matchers when the expression is a plain selector
    pub fn matchers(&self) -> Option<&[LabelMatcher]> {
        match self {
            ArgExpr::VectorSelector { matchers, .. } | ArgExpr::MatrixSelector { matchers, .. } => {
                Some(matchers)
            }
            _ => None,
        }
    }
}

/// Position of argument `index`, or the default when the caller supplied
/// fewer expression nodes
pub fn position_of(exprs: &[ArgExpr], index: usize) -> PositionRange {
    exprs
        .get(index)
        .map(ArgExpr::position)
        .unwrap_or_default()
}
