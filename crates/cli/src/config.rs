//! Process configuration, read once at startup from flags or environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use hookwatch_core::{DestinationDescriptor, DestinationError};
use hookwatch_dispatch::DispatcherConfig;
use hookwatch_kubehub::FeedOptions;
use thiserror::Error;

pub const DEFAULT_GVK: &str = "management.cattle.io/v3/Project";

const RANCHER_SELECTOR_PROXY: &str =
    "api/v1/namespaces/kube-system/services/http:rancher-selector-service:8080/proxy";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no destinations configured (set API_ENDPOINTS, RANCHER_FQDN or HOOKWATCH_DESTINATIONS_FILE)")]
    NoDestinations,
    #[error("RANCHER_FQDN requires a bearer token (BEARER_TOKEN or API_TOKEN)")]
    MissingToken,
    #[error("API_DELETE_ENDPOINTS has {deletes} entries but API_ENDPOINTS has {endpoints}")]
    DeleteEndpointsMismatch { endpoints: usize, deletes: usize },
    #[error("reading destinations file {path}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("parsing destinations file {path}: {source}")]
    ParseFile { path: PathBuf, source: serde_yaml::Error },
    #[error("destination {index}: {source}")]
    InvalidDestination { index: usize, source: DestinationError },
    #[error("timeout must be at least one second")]
    ZeroTimeout,
}

#[derive(Parser, Clone)]
#[command(name = "hookwatch", version, about = "Relay Kubernetes resource lifecycle changes to webhook listeners")]
pub struct Config {
    /// Comma-separated destination URL templates ({namespace}, {name}, {kind} are substituted)
    #[arg(long = "endpoints", env = "API_ENDPOINTS", value_delimiter = ',')]
    pub endpoints: Vec<String>,

    /// Comma-separated URL templates for deletions, paired by position with --endpoints
    #[arg(long = "delete-endpoints", env = "API_DELETE_ENDPOINTS", value_delimiter = ',')]
    pub delete_endpoints: Vec<String>,

    /// Bearer token for destinations given via --endpoints
    #[arg(long = "token", env = "API_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Bearer token under its legacy name; used when --token is unset
    #[arg(long = "bearer-token", env = "BEARER_TOKEN", hide_env_values = true, hide = true)]
    pub bearer_token: Option<String>,

    /// Skip TLS verification for destinations given via --endpoints or --rancher-fqdn
    #[arg(long = "insecure-tls", env = "API_INSECURE_TLS", action = ArgAction::SetTrue)]
    pub insecure_tls: bool,

    /// Legacy spelling of --insecure-tls; only the exact value "true" enables it
    #[arg(long = "skip-tls-verify", env = "skipTLSVerify", hide = true)]
    pub skip_tls_verify: Option<String>,

    /// Rancher host; adds a destination routed through each cluster's rancher-selector-service proxy
    #[arg(long = "rancher-fqdn", env = "RANCHER_FQDN")]
    pub rancher_fqdn: Option<String>,

    /// YAML/JSON list of destination descriptors (per-destination auth and routing)
    #[arg(long = "destinations-file", env = "HOOKWATCH_DESTINATIONS_FILE")]
    pub destinations_file: Option<PathBuf>,

    /// GVK key to watch, e.g. "v1/ConfigMap" or "management.cattle.io/v3/Project"
    #[arg(long = "gvk", env = "HOOKWATCH_GVK", default_value = DEFAULT_GVK)]
    pub gvk: String,

    /// Restrict the watch to one namespace (default: all)
    #[arg(long = "ns", env = "HOOKWATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Per-delivery HTTP timeout in seconds
    #[arg(long = "timeout-secs", env = "HOOKWATCH_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Upper bound for the relist/rewatch backoff in seconds
    #[arg(long = "watch-backoff-max-secs", env = "HOOKWATCH_WATCH_BACKOFF_MAX_SECS", default_value_t = 30)]
    pub watch_backoff_max_secs: u64,
}

fn split_list(values: &[String]) -> Vec<String> {
    values.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

impl Config {
    /// Merge env/flag destinations with the destinations file.
    pub fn destinations(&self) -> Result<Vec<DestinationDescriptor>, ConfigError> {
        let endpoints = split_list(&self.endpoints);
        let deletes = split_list(&self.delete_endpoints);
        if !deletes.is_empty() && deletes.len() != endpoints.len() {
            return Err(ConfigError::DeleteEndpointsMismatch { endpoints: endpoints.len(), deletes: deletes.len() });
        }
        let token = self.bearer();
        let insecure_tls = self.skip_tls();

        let mut out: Vec<DestinationDescriptor> = endpoints
            .into_iter()
            .enumerate()
            .map(|(i, url)| DestinationDescriptor {
                url_template: url,
                delete_url_template: deletes.get(i).cloned(),
                token: token.map(str::to_string),
                insecure_tls,
            })
            .collect();

        if let Some(fqdn) = self.rancher_fqdn.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
            let token = token.ok_or(ConfigError::MissingToken)?;
            out.push(DestinationDescriptor {
                insecure_tls,
                ..rancher_destination(fqdn).with_token(token)
            });
        }

        if let Some(path) = &self.destinations_file {
            out.extend(load_destinations_file(path)?);
        }
        if out.is_empty() {
            return Err(ConfigError::NoDestinations);
        }
        for (index, d) in out.iter().enumerate() {
            d.validate().map_err(|source| ConfigError::InvalidDestination { index, source })?;
        }
        Ok(out)
    }

    fn bearer(&self) -> Option<&str> {
        [self.token.as_deref(), self.bearer_token.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|t| !t.is_empty())
    }

    fn skip_tls(&self) -> bool {
        self.insecure_tls || self.skip_tls_verify.as_deref() == Some("true")
    }

    pub fn dispatcher_config(&self) -> Result<DispatcherConfig, ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(DispatcherConfig { destinations: self.destinations()?, timeout: Duration::from_secs(self.timeout_secs) })
    }

    pub fn feed_options(&self) -> FeedOptions {
        let defaults = FeedOptions::default();
        let max_backoff = Duration::from_secs(self.watch_backoff_max_secs.max(1));
        FeedOptions { initial_backoff: defaults.initial_backoff.min(max_backoff), max_backoff }
    }
}

// Hand-written so the bearer token never reaches the logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("endpoints", &self.endpoints)
            .field("delete_endpoints", &self.delete_endpoints)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("insecure_tls", &self.skip_tls())
            .field("rancher_fqdn", &self.rancher_fqdn)
            .field("destinations_file", &self.destinations_file)
            .field("gvk", &self.gvk)
            .field("namespace", &self.namespace)
            .field("timeout_secs", &self.timeout_secs)
            .field("watch_backoff_max_secs", &self.watch_backoff_max_secs)
            .finish()
    }
}

/// Destination for a Rancher management host: one route per downstream cluster
/// (the resource namespace), with deletions sent to the proxy's `delete` path.
pub fn rancher_destination(fqdn: &str) -> DestinationDescriptor {
    let base = format!("https://{}/k8s/clusters/{{namespace}}/{}", fqdn, RANCHER_SELECTOR_PROXY);
    DestinationDescriptor::new(format!("{}/", base)).with_delete_url(format!("{}/delete", base))
}

pub fn load_destinations_file(path: &std::path::Path) -> Result<Vec<DestinationDescriptor>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}
