//! Deterministic cache keys.
//!
//! A key is `namespace + hex(sha256(canonical fields))`. The canonical form
//! is compact JSON with object keys sorted, built by hand so the result does
//! not depend on how `serde_json` maps happen to be ordered in this build.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque cache key, stable across processes and restarts.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Named, validated request fields that contribute to a cache key.
///
/// Fields are kept sorted by name, so insertion order never matters.
/// Absent optional fields are stored as `null` to keep "missing" distinct
/// from an empty string.
#[derive(Clone, Debug, Default)]
pub struct KeyFields {
    fields: BTreeMap<&'static str, Value>,
}

impl KeyFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &'static str, value: impl Into<Value>) -> Self {
        self.fields.insert(name, value.into());
        self
    }

    pub fn optional(self, name: &'static str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self.field(name, Value::Null),
        }
    }

    /// Add a collection whose submission order carries no meaning.
    ///
    /// Elements are sorted by their canonical text. Duplicates are kept:
    /// two identical cart lines are not the same cart as one line.
    pub fn unordered(self, name: &'static str, values: impl IntoIterator<Item = Value>) -> Self {
        self.field(name, Value::Array(sorted_canonically(values)))
    }

    /// Canonical text of the whole field set.
    pub fn canonical(&self) -> String {
        let mut out = String::with_capacity(128);
        out.push('{');
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_string(name, &mut out);
            out.push(':');
            write_canonical(value, &mut out);
        }
        out.push('}');
        out
    }
}

/// Compute the cache key for a namespace and its field set.
pub fn compute_key(namespace: &str, fields: &KeyFields) -> CacheKey {
    let digest = Sha256::digest(fields.canonical().as_bytes());
    CacheKey(format!("{namespace}{}", hex::encode(digest)))
}

/// Sort values by their canonical text.
pub fn sorted_canonically(values: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut items: Vec<(String, Value)> = values
        .into_iter()
        .map(|v| (canonical_json(&v), v))
        .collect();
    items.sort_by(|a, b| a.0.cmp(&b.0));
    items.into_iter().map(|(_, v)| v).collect()
}

/// Compact JSON with object keys sorted, recursively.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(k, out);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        // Scalars have a single compact rendering
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push_str(&Value::from(s).to_string());
}
