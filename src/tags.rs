//! Tag model and the global tags property parser.
//!
//! Tags are key/value pairs attached to a metric identity. Keys must match
//! `[a-zA-Z_][a-zA-Z0-9_]*`. A [`Tags`] set is ordered by key, so two sets with
//! the same pairs compare equal no matter how they were built, and inserting a
//! key twice keeps the last value.
//!
//! # Global tags
//!
//! Global tags are configured as a single string, `key=value` pairs separated
//! by commas. A literal comma or equals sign inside a value is escaped with a
//! backslash:
//!
//! ```
//! use strata_metrics::tags::parse_global_tags;
//!
//! let tags = parse_global_tags(r"region=us\,east,env=prod").unwrap();
//! assert_eq!(tags.get("region"), Some("us,east"));
//! assert_eq!(tags.get("env"), Some("prod"));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{MetricsError, Result};

/// Reserved tag key carrying the owning scope of a meter.
pub const SCOPE_TAG: &str = "scope";

/// Reserved tag key carrying the configured application name.
pub const APP_TAG: &str = "_app";

/// A single validated tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    /// Create a tag, validating the key.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if !is_valid_tag_name(&key) {
            return Err(MetricsError::InvalidTagName(key));
        }
        Ok(Self {
            key,
            value: value.into(),
        })
    }

    /// Parse a `key=value` string. The value may itself contain `=`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| MetricsError::MalformedTag(raw.to_string()))?;
        Self::new(key.trim(), value.trim())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// An ordered, key-deduplicated set of tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tag. A tag with the same key is replaced.
    pub fn insert(&mut self, tag: Tag) {
        self.0.insert(tag.key, tag.value);
    }

    /// Insert a pair whose key is known to be valid (reserved keys).
    pub(crate) fn insert_raw(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Return a copy of `self` with every tag of `other` inserted on top.
    pub fn merged(&self, other: &Tags) -> Tags {
        let mut merged = self.clone();
        for (k, v) in other.iter() {
            merged.insert_raw(k, v);
        }
        merged
    }
}

impl From<Vec<Tag>> for Tags {
    fn from(tags: Vec<Tag>) -> Self {
        tags.into_iter().collect()
    }
}

impl From<&[Tag]> for Tags {
    fn from(tags: &[Tag]) -> Self {
        tags.iter().cloned().collect()
    }
}

impl FromIterator<Tag> for Tags {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut tags = Tags::new();
        for tag in iter {
            tags.insert(tag);
        }
        tags
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

/// Check a tag key against `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_tag_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse the global tags property.
///
/// Pairs are split on unescaped commas and each pair on its single unescaped
/// `=`. `\,` and `\=` are then unescaped in keys and values. An empty input
/// yields an empty set.
pub fn parse_global_tags(input: &str) -> Result<Tags> {
    let mut tags = Tags::new();
    if input.trim().is_empty() {
        return Ok(tags);
    }

    let malformed = |reason: String| MetricsError::MalformedGlobalTags {
        input: input.to_string(),
        reason,
    };

    for pair in split_unescaped(input, ',') {
        if pair.is_empty() {
            return Err(malformed("empty tag pair".to_string()));
        }
        let parts = split_unescaped(pair, '=');
        if parts.len() != 2 {
            return Err(malformed(format!("`{pair}` is not a single key=value pair")));
        }
        let key = unescape(parts[0]);
        let value = unescape(parts[1]);
        if key.is_empty() || value.is_empty() {
            return Err(malformed(format!("`{pair}` has an empty key or value")));
        }
        if !is_valid_tag_name(&key) {
            return Err(malformed(format!(
                "invalid tag name `{key}`, expected [a-zA-Z_][a-zA-Z0-9_]*"
            )));
        }
        tags.insert_raw(&key, &value);
    }
    Ok(tags)
}

/// Split on `sep` wherever it is not preceded by a backslash. Escapes are kept.
fn split_unescaped(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(&input[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&input[start..]);
    parts
}

fn unescape(raw: &str) -> String {
    raw.replace("\\,", ",").replace("\\=", "=")
}
