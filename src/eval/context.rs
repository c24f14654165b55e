//! Per-step evaluation context
//!
//! An [`EvalContext`] is created once per evaluation step and handed to
//! every function invoked at that step by exclusive reference. It holds the
//! step timestamp, the output buffer functions append to, a bounded cache of
//! compiled label_replace patterns and the label rewrite memo. Nothing in it
//! survives the step, and it must not be shared between two in-flight calls.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use regex::Regex;

use crate::config::EngineConfig;
use crate::model::{FloatHistogram, Labels, Sample, Vector};

/// Mutable scratch state for one evaluation step
#[derive(Debug)]
pub struct EvalContext {
    ts: i64,
    out: Vector,
    regex_cache: LruCache<String, Regex>,
    label_memo: HashMap<u64, (Labels, Labels)>,
    enable_delayed_name_removal: bool,
    extrapolation_threshold_factor: f64,
}

impl EvalContext {
    /// Context for the step at `ts` (milliseconds since epoch)
    pub fn new(ts: i64, config: &EngineConfig) -> Self {
        let capacity = NonZeroUsize::new(config.functions.regex_cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            ts,
            out: Vector::new(),
            regex_cache: LruCache::new(capacity),
            label_memo: HashMap::new(),
            enable_delayed_name_removal: config.functions.enable_delayed_name_removal,
            extrapolation_threshold_factor: config.functions.extrapolation_threshold_factor,
        }
    }

    /// Context with default configuration
    pub fn at(ts: i64) -> Self {
        Self::new(ts, &EngineConfig::default())
    }

    /// Evaluation timestamp in milliseconds
    pub fn ts(&self) -> i64 {
        self.ts
    }

    /// Whether `__name__` removal is deferred to the caller
    pub fn delayed_name_removal(&self) -> bool {
        self.enable_delayed_name_removal
    }

    /// Multiplier applied to the average sample interval by rate
    /// extrapolation
    pub fn extrapolation_threshold_factor(&self) -> f64 {
        self.extrapolation_threshold_factor
    }

    /// Append a sample to the output buffer
    pub fn push(&mut self, sample: Sample) {
        self.out.push(sample);
    }

    /// Append a float sample at the evaluation timestamp
    pub fn push_float(&mut self, metric: Labels, f: f64) {
        let ts = self.ts;
        self.out.push(Sample::float(metric, ts, f));
    }

    /// Append a float sample whose metric name is being dropped
    ///
    /// With delayed removal the name stays and only the marker is set.
    pub fn push_float_dropping_name(&mut self, metric: &Labels, f: f64) {
        let metric = self.strip_name(metric);
        let ts = self.ts;
        self.out.push(Sample {
            drop_name: true,
            ..Sample::float(metric, ts, f)
        });
    }

    /// Append a histogram sample whose metric name is being dropped
    pub fn push_histogram_dropping_name(&mut self, metric: &Labels, h: FloatHistogram) {
        let metric = self.strip_name(metric);
        let ts = self.ts;
        self.out.push(Sample {
            drop_name: true,
            ..Sample::histogram(metric, ts, h)
        });
    }

    /// `metric` without `__name__`, unless removal is delayed
    pub fn strip_name(&self, metric: &Labels) -> Labels {
        if self.enable_delayed_name_removal {
            metric.clone()
        } else {
            metric.drop_metric_name()
        }
    }

    /// Output buffer, for functions that rewrite it in place
    pub fn output_mut(&mut self) -> &mut Vector {
        &mut self.out
    }

    /// Take the accumulated output, leaving an empty buffer
    pub fn take_output(&mut self) -> Vector {
        std::mem::take(&mut self.out)
    }

    /// Hand a consumed result back so its allocation is reused
    pub fn recycle(&mut self, mut vector: Vector) {
        vector.clear();
        if vector.capacity() > self.out.capacity() {
            self.out = vector;
        }
    }

    /// Clear the output buffer before a new call
    pub(crate) fn begin_call(&mut self) {
        self.out.clear();
    }

    /// Compiled, fully anchored regex for a label_replace pattern
    ///
    /// The pattern is wrapped as `^(?s:PATTERN)$` so it must match the whole
    /// value and `.` matches newlines.
    pub fn anchored_regex(&mut self, pattern: &str) -> Result<Regex, regex::Error> {
        if let Some(re) = self.regex_cache.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(&format!("^(?s:{})$", pattern))?;
        self.regex_cache.put(pattern.to_string(), re.clone());
        Ok(re)
    }

    /// Rewritten label set memoized for `input`
    pub fn memoized_labels(&self, input: &Labels) -> Option<Labels> {
        self.label_memo
            .get(&input.hash_value())
            .filter(|(key, _)| key == input)
            .map(|(_, out)| out.clone())
    }

    /// Remember the rewrite result for `input`
    pub fn memoize_labels(&mut self, input: &Labels, output: Labels) {
        self.label_memo
            .insert(input.hash_value(), (input.clone(), output));
    }

    /// Forget all memoized rewrites; each rewrite call starts fresh
    pub fn clear_label_memo(&mut self) {
        self.label_memo.clear();
    }
}
