//! Destination descriptors and URL routing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CanonicalEvent, EventKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DestinationError {
    #[error("destination url template is empty")]
    EmptyUrl,
}

/// One external webhook target.
///
/// `url_template` and `delete_url_template` accept the placeholders
/// `{namespace}`, `{name}` and `{kind}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DestinationDescriptor {
    #[serde(alias = "url")]
    pub url_template: String,
    /// Route for `Deleted` events; falls back to `url_template`.
    #[serde(default, alias = "deleteUrl")]
    pub delete_url_template: Option<String>,
    /// Bearer token sent as `Authorization: Bearer <token>`.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub insecure_tls: bool,
}

impl DestinationDescriptor {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self { url_template: url_template.into(), ..Default::default() }
    }

    pub fn with_delete_url(mut self, url: impl Into<String>) -> Self {
        self.delete_url_template = Some(url.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn validate(&self) -> Result<(), DestinationError> {
        if self.url_template.trim().is_empty() {
            return Err(DestinationError::EmptyUrl);
        }
        Ok(())
    }

    /// HTTP method for an event kind: `DELETE` for deletions, `POST` otherwise.
    pub fn method_for(&self, kind: EventKind) -> &'static str {
        match kind {
            EventKind::Deleted => "DELETE",
            EventKind::Created | EventKind::Updated => "POST",
        }
    }
}

/// Resolve the target URL for `event`, substituting `{namespace}`, `{name}` and `{kind}`.
pub fn resolve_url(dest: &DestinationDescriptor, event: &CanonicalEvent) -> String {
    let template = match (event.kind, dest.delete_url_template.as_deref()) {
        (EventKind::Deleted, Some(t)) if !t.trim().is_empty() => t,
        _ => dest.url_template.as_str(),
    };
    template
        .trim()
        .replace("{namespace}", &event.namespace)
        .replace("{name}", &event.name)
        .replace("{kind}", event.kind.as_str())
}
