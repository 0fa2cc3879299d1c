//! hookwatch core types: resource snapshots, canonical events and destinations.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::Serialize;

pub mod destination;
pub mod doc;
mod normalize;

pub use destination::{resolve_url, DestinationDescriptor, DestinationError};
pub use normalize::normalize;

/// Lifecycle classification of one observed change.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed state of a watched resource.
///
/// `raw` is the full object as served by the store (minus `managedFields`).
/// `resource_version` only feeds the change feed's cursor and never leaves it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub resource_version: Option<String>,
    pub raw: serde_json::Value,
}

impl ResourceSnapshot {
    /// Build a snapshot from a raw object, reading identity from `metadata`.
    pub fn from_raw(raw: serde_json::Value) -> Self {
        let namespace = doc::str_at(&raw, &["metadata", "namespace"]).map(str::to_string);
        let name = doc::str_at(&raw, &["metadata", "name"]).map(str::to_string);
        let resource_version = doc::str_at(&raw, &["metadata", "resourceVersion"]).map(str::to_string);
        Self { namespace, name, resource_version, raw }
    }

    /// `namespace/name` key used to track known resources; `None` without a name.
    pub fn key(&self) -> Option<String> {
        let name = self.name.as_deref().filter(|n| !n.is_empty())?;
        Some(match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => format!("{}/{}", ns, name),
            _ => name.to_string(),
        })
    }
}

/// Normalized, destination-agnostic record of a lifecycle change.
///
/// Serializes to the webhook body: `namespace`, `name` and (when non-empty)
/// `annotations`. The kind is conveyed by routing, not by the payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CanonicalEvent {
    pub namespace: String,
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip)]
    pub kind: EventKind,
}
