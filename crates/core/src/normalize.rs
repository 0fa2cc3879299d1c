use std::collections::BTreeMap;

use crate::{doc, CanonicalEvent, EventKind, ResourceSnapshot};

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

/// Project a snapshot into a canonical event.
///
/// Returns `None` when namespace or name is missing or empty. Annotation values
/// that are not strings are coerced to `""`.
pub fn normalize(snapshot: &ResourceSnapshot, kind: EventKind) -> Option<CanonicalEvent> {
    let namespace = non_empty(snapshot.namespace.as_deref())
        .or_else(|| non_empty(doc::str_at(&snapshot.raw, &["metadata", "namespace"])))?;
    let name = non_empty(snapshot.name.as_deref())
        .or_else(|| non_empty(doc::str_at(&snapshot.raw, &["metadata", "name"])))?;

    let annotations: BTreeMap<String, String> = doc::object_at(&snapshot.raw, &["metadata", "annotations"])
        .map(|m| {
            m.iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect()
        })
        .unwrap_or_default();

    Some(CanonicalEvent { namespace: namespace.to_string(), name: name.to_string(), annotations, kind })
}
