//! Type-checked accessors over untyped JSON documents.
//!
//! All lookups return `None` on a missing key or a type mismatch instead of panicking.

use serde_json::{Map, Value};

/// Walk `path` through nested objects.
pub fn value_at<'a>(v: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(v, |cur, key| cur.as_object()?.get(*key))
}

pub fn str_at<'a>(v: &'a Value, path: &[&str]) -> Option<&'a str> {
    value_at(v, path)?.as_str()
}

pub fn object_at<'a>(v: &'a Value, path: &[&str]) -> Option<&'a Map<String, Value>> {
    value_at(v, path)?.as_object()
}
