//! hookwatch delivery dispatcher.
//!
//! One best-effort HTTP call per destination per event. Destinations run
//! concurrently and fail independently; there is no retry, queue or backoff.
//! Only HTTP 200 counts as success.

#![forbid(unsafe_code)]

use std::time::Duration;

use futures::future::join_all;
use hookwatch_core::{resolve_url, CanonicalEvent, DestinationDescriptor, DestinationError};
use reqwest::{header, Client, Method, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("hookwatch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("non-OK response: {0}")]
    Status(u16),
    #[error("invalid request: {0}")]
    Request(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DeliveryError::Timeout
        } else if e.is_builder() {
            DeliveryError::Request(e.to_string())
        } else {
            DeliveryError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("no destinations configured")]
    NoDestinations,
    #[error("request timeout must be non-zero")]
    ZeroTimeout,
    #[error("destination {index}: {source}")]
    Destination { index: usize, source: DestinationError },
    #[error("building http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub destinations: Vec<DestinationDescriptor>,
    /// Per-attempt timeout, applied to each destination independently.
    pub timeout: Duration,
}

impl DispatcherConfig {
    pub fn new(destinations: Vec<DestinationDescriptor>) -> Self {
        Self { destinations, timeout: Duration::from_secs(10) }
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug)]
pub struct DeliveryReport {
    pub url: String,
    pub method: String,
    pub outcome: Result<(), DeliveryError>,
}

impl DeliveryReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

struct Target {
    dest: DestinationDescriptor,
    client: Client,
}

pub struct Dispatcher {
    targets: Vec<Target>,
}

impl Dispatcher {
    pub fn new(cfg: DispatcherConfig) -> Result<Self, DispatcherError> {
        if cfg.destinations.is_empty() {
            return Err(DispatcherError::NoDestinations);
        }
        if cfg.timeout.is_zero() {
            return Err(DispatcherError::ZeroTimeout);
        }
        let mut targets = Vec::with_capacity(cfg.destinations.len());
        for (index, dest) in cfg.destinations.into_iter().enumerate() {
            dest.validate().map_err(|source| DispatcherError::Destination { index, source })?;
            let client = Client::builder()
                .user_agent(USER_AGENT)
                .timeout(cfg.timeout)
                .danger_accept_invalid_certs(dest.insecure_tls)
                .build()?;
            targets.push(Target { dest, client });
        }
        Ok(Self { targets })
    }

    pub fn destinations(&self) -> usize {
        self.targets.len()
    }

    /// Deliver `event` to every destination concurrently.
    ///
    /// Returns once every attempt has returned; failures are logged and reported,
    /// never propagated.
    pub async fn dispatch(&self, event: &CanonicalEvent) -> Vec<DeliveryReport> {
        let body = match serde_json::to_vec(event) {
            Ok(b) => b,
            Err(e) => {
                warn!(ns = %event.namespace, name = %event.name, error = %e, "failed to encode event");
                return Vec::new();
            }
        };
        join_all(self.targets.iter().map(|t| deliver(t, event, &body))).await
    }
}

async fn deliver(target: &Target, event: &CanonicalEvent, body: &[u8]) -> DeliveryReport {
    let url = resolve_url(&target.dest, event);
    let method = target.dest.method_for(event.kind);
    let outcome = send(target, &url, method, body).await;
    match &outcome {
        Ok(()) => {
            debug!(url = %url, method = %method, ns = %event.namespace, name = %event.name, kind = %event.kind, "delivered");
            metrics::counter!("hookwatch_deliveries_total", 1u64, "outcome" => "success");
        }
        Err(e) => {
            warn!(url = %url, method = %method, ns = %event.namespace, name = %event.name, kind = %event.kind, error = %e, "delivery failed");
            metrics::counter!("hookwatch_deliveries_total", 1u64, "outcome" => "failure");
        }
    }
    DeliveryReport { url, method: method.to_string(), outcome }
}

async fn send(target: &Target, url: &str, method: &str, body: &[u8]) -> Result<(), DeliveryError> {
    let method = Method::from_bytes(method.as_bytes()).map_err(|e| DeliveryError::Request(e.to_string()))?;
    let mut req = target
        .client
        .request(method, url)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.to_vec());
    if let Some(token) = target.dest.token.as_deref().filter(|t| !t.is_empty()) {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await?;
    match resp.status() {
        StatusCode::OK => Ok(()),
        other => Err(DeliveryError::Status(other.as_u16())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_destination_set() {
        assert!(matches!(Dispatcher::new(DispatcherConfig::new(vec![])), Err(DispatcherError::NoDestinations)));
    }

    #[test]
    fn rejects_zero_timeout() {
        let cfg = DispatcherConfig { destinations: vec![DestinationDescriptor::new("http://x")], timeout: Duration::ZERO };
        assert!(matches!(Dispatcher::new(cfg), Err(DispatcherError::ZeroTimeout)));
    }

    #[test]
    fn rejects_invalid_descriptor_with_index() {
        let cfg = DispatcherConfig::new(vec![DestinationDescriptor::new("http://x"), DestinationDescriptor::new("")]);
        match Dispatcher::new(cfg) {
            Err(DispatcherError::Destination { index, source }) => {
                assert_eq!(index, 1);
                assert_eq!(source, DestinationError::EmptyUrl);
            }
            other => panic!("unexpected: {:?}", other.err()),
        }
    }
}
