// SPDX-License-Identifier: MPL-2.0
//! Collects the text stored in nested JSON documents.
//!
//! The document tool stores rich text as trees of nodes, each of which may carry a `text` string. Some keys
//! (by default `serializedObject`) hold fully serialized sub-documents which must not be text-mined; their
//! subtrees are skipped entirely.

use rustc_hash::FxHashSet;
use serde_json::Value;

/// The key under which text leaves are stored.
pub const TEXT_KEY: &str = "text";

/// Keys whose subtrees are opaque blobs and are never descended into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueKeys(FxHashSet<String>);

impl OpaqueKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    /// An empty exclusion set, every subtree is traversed.
    pub fn none() -> Self {
        Self(FxHashSet::default())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for OpaqueKeys {
    fn default() -> Self {
        Self::new(["serializedObject"])
    }
}

/// Collect all text leaves reachable from `value`.
///
/// A mapping with a string under [`TEXT_KEY`] contributes that string and is not descended further.
/// Any other mapping has its values visited in insertion order, skipping the values of opaque keys.
/// Sequences are visited in order. Scalars contribute nothing.
pub fn extract_text_leaves<'a>(value: &'a Value, opaque: &OpaqueKeys) -> Vec<&'a str> {
    let mut leaves = Vec::new();
    collect_leaves(value, opaque, &mut leaves);
    leaves
}

fn collect_leaves<'a>(value: &'a Value, opaque: &OpaqueKeys, leaves: &mut Vec<&'a str>) {
    // serde_json caps nesting at 128 levels while parsing, so recursion depth is bounded
    match value {
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get(TEXT_KEY) {
                leaves.push(text);
                return;
            }
            for (key, child) in map {
                if opaque.contains(key) {
                    continue;
                }
                collect_leaves(child, opaque, leaves);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_leaves(item, opaque, leaves);
            }
        }
        _ => {}
    }
}

/// Join leaves with single spaces and trim the result.
pub fn flatten_leaves<S: AsRef<str>>(leaves: &[S]) -> String {
    let mut joined = String::new();
    for (i, leaf) in leaves.iter().enumerate() {
        if i > 0 {
            joined.push(' ');
        }
        joined.push_str(leaf.as_ref());
    }
    joined.trim().to_string()
}

/// Flatten an already parsed JSON value into plain text.
pub fn flatten_value(value: &Value, opaque: &OpaqueKeys) -> String {
    flatten_leaves(&extract_text_leaves(value, opaque))
}

/// Flatten a text payload taken from a log event.
///
/// Payloads that look like a JSON document (an object or an array) are parsed and flattened; if parsing
/// fails the payload is malformed and yields an empty string. Anything else is already plain text and is
/// returned trimmed.
pub fn flatten_payload(payload: &str, opaque: &OpaqueKeys) -> String {
    if !looks_like_document(payload) {
        return payload.trim().to_string();
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => flatten_value(&value, opaque),
        Err(err) => {
            tracing::debug!(
                message = "Ignoring malformed text payload",
                error = %err,
                len = payload.len()
            );
            String::new()
        }
    }
}

fn looks_like_document(payload: &str) -> bool {
    matches!(payload.trim_start().as_bytes().first(), Some(b'{' | b'['))
}
