//! Label sets
//!
//! A [`Labels`] value is an immutable, canonically sorted set of
//! name/value pairs. Changes go through a [`Builder`], which accumulates
//! deletions and assignments and materializes a new set once, so label sets
//! shared between samples are never mutated behind each other's back.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Label carrying the metric name
pub const METRIC_NAME: &str = "__name__";

/// Label carrying the upper bound of a classic histogram bucket
pub const BUCKET_LABEL: &str = "le";

/// A single name/value pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    /// Label name
    pub name: String,
    /// Label value
    pub value: String,
}

impl Label {
    /// Create a label from anything string-like
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Sorted set of labels with unique names
///
/// Equality, ordering and hashing all work on the sorted sequence, so two
/// sets built from the same pairs in a different order are identical.
/// Ordering compares pair by pair (name first, then value) and a set that
/// is a strict prefix of another sorts first.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// The empty label set
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build a label set from arbitrary labels
    ///
    /// Labels with an empty value are dropped. When a name appears more than
    /// once the last value wins.
    pub fn new(labels: impl IntoIterator<Item = Label>) -> Self {
        let mut map = BTreeMap::new();
        for label in labels {
            if label.value.is_empty() {
                map.remove(&label.name);
            } else {
                map.insert(label.name, label.value);
            }
        }
        Self(
            map.into_iter()
                .map(|(name, value)| Label { name, value })
                .collect(),
        )
    }

    /// Convenience constructor from `(name, value)` pairs
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self::new(pairs.into_iter().map(|(n, v)| Label::new(n, v)))
    }

    /// Value of `name`, or the empty string when absent
    pub fn get(&self, name: &str) -> &str {
        self.position(name)
            .map(|i| self.0[i].value.as_str())
            .unwrap_or("")
    }

    /// Whether a label called `name` is present
    pub fn has(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the set has no labels
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate labels in canonical order
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Copy of this set without the metric name
    pub fn drop_metric_name(&self) -> Self {
        match self.position(METRIC_NAME) {
            Some(i) => {
                let mut labels = self.0.clone();
                labels.remove(i);
                Self(labels)
            }
            None => self.clone(),
        }
    }

    /// Copy of this set without any of `names`
    pub fn without(&self, names: &[&str]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|l| !names.contains(&l.name.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// Stable 64-bit hash of the canonical sequence
    ///
    /// Used as an identity key in per-call memoization maps.
    pub fn hash_value(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Three-way comparison of two label sets
    pub fn compare(&self, other: &Labels) -> Ordering {
        self.cmp(other)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.get(METRIC_NAME);
        f.write_str(name)?;
        f.write_str("{")?;
        let mut first = true;
        for label in self.0.iter().filter(|l| l.name != METRIC_NAME) {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        f.write_str("}")
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a Label;
    type IntoIter = std::slice::Iter<'a, Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Copy-on-write label set builder
///
/// `set` with an empty value behaves like `del`, mirroring how an empty
/// label value is indistinguishable from an absent label.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    base: Labels,
    del: Vec<String>,
    add: Vec<Label>,
}

impl Builder {
    /// Start from `base`
    pub fn new(base: &Labels) -> Self {
        Self {
            base: base.clone(),
            del: Vec::new(),
            add: Vec::new(),
        }
    }

    /// Discard pending changes and start over from `base`
    pub fn reset(&mut self, base: &Labels) {
        self.base = base.clone();
        self.del.clear();
        self.add.clear();
    }

    /// Remove `name` from the result
    pub fn del(&mut self, name: &str) -> &mut Self {
        self.add.retain(|l| l.name != name);
        if !self.del.iter().any(|n| n == name) {
            self.del.push(name.to_string());
        }
        self
    }

    /// Set `name` to `value`, deleting it when `value` is empty
    pub fn set(&mut self, name: &str, value: &str) -> &mut Self {
        if value.is_empty() {
            return self.del(name);
        }
        self.del.retain(|n| n != name);
        match self.add.iter_mut().find(|l| l.name == name) {
            Some(existing) => existing.value = value.to_string(),
            None => self.add.push(Label::new(name, value)),
        }
        self
    }

    /// Materialize the resulting label set
    pub fn labels(&self) -> Labels {
        if self.del.is_empty() && self.add.is_empty() {
            return self.base.clone();
        }
        let kept = self
            .base
            .iter()
            .filter(|l| !self.del.contains(&l.name))
            .filter(|l| !self.add.iter().any(|a| a.name == l.name))
            .cloned();
        Labels::new(kept.chain(self.add.iter().cloned()))
    }
}

/// Whether `name` is a syntactically legal label name
///
/// Legal names match `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_canonicalized() {
        let a = Labels::from_pairs([("job", "api"), ("instance", "a:1")]);
        let b = Labels::from_pairs([("instance", "a:1"), ("job", "api")]);
        assert_eq!(a, b);
        assert_eq!(a.hash_value(), b.hash_value());
        assert_eq!(a.iter().next().map(|l| l.name.as_str()), Some("instance"));
    }

    #[test]
    fn test_get_missing_is_empty() {
        let labels = Labels::from_pairs([("job", "api")]);
        assert_eq!(labels.get("job"), "api");
        assert_eq!(labels.get("nope"), "");
        assert!(!labels.has("nope"));
    }

    #[test]
    fn test_empty_values_are_dropped() {
        let labels = Labels::from_pairs([("job", ""), ("env", "prod")]);
        assert_eq!(labels.len(), 1);
        assert!(!labels.has("job"));
    }

    #[test]
    fn test_drop_metric_name() {
        let labels = Labels::from_pairs([(METRIC_NAME, "up"), ("job", "api")]);
        let dropped = labels.drop_metric_name();
        assert!(!dropped.has(METRIC_NAME));
        assert_eq!(dropped.get("job"), "api");
        // original untouched
        assert_eq!(labels.get(METRIC_NAME), "up");
    }

    #[test]
    fn test_builder_set_and_del() {
        let base = Labels::from_pairs([("a", "1"), ("b", "2")]);
        let mut builder = Builder::new(&base);
        builder.set("c", "3").del("a").set("b", "20");
        let out = builder.labels();
        assert_eq!(out, Labels::from_pairs([("b", "20"), ("c", "3")]));

        builder.reset(&base);
        builder.set("a", "");
        assert_eq!(builder.labels(), Labels::from_pairs([("b", "2")]));
    }

    #[test]
    fn test_compare_prefix_sorts_first() {
        let short = Labels::from_pairs([("a", "1")]);
        let long = Labels::from_pairs([("a", "1"), ("b", "1")]);
        assert_eq!(short.compare(&long), Ordering::Less);
        assert_eq!(long.compare(&short), Ordering::Greater);
    }

    #[test]
    fn test_label_name_validity() {
        assert!(is_valid_label_name("foo_bar1"));
        assert!(is_valid_label_name("_x"));
        assert!(!is_valid_label_name("1abc"));
        assert!(!is_valid_label_name("a-b"));
        assert!(!is_valid_label_name(""));
    }

    #[test]
    fn test_display() {
        let labels = Labels::from_pairs([(METRIC_NAME, "up"), ("job", "api")]);
        assert_eq!(labels.to_string(), "up{job=\"api\"}");
    }
}
