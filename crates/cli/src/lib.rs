//! hookwatch: relay lifecycle changes of one Kubernetes kind to webhook listeners.

#![forbid(unsafe_code)]

pub mod config;
mod supervisor;

use anyhow::{Context, Result};
use hookwatch_dispatch::Dispatcher;
use hookwatch_kubehub::KubeStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use config::{Config, ConfigError};
pub use supervisor::{RelayStats, Supervisor};

/// Start the relay and block until Ctrl-C or SIGTERM.
///
/// Only startup failures (configuration, client bootstrap, kind resolution) return an error.
pub async fn run(cfg: Config) -> Result<()> {
    let dispatcher = Dispatcher::new(cfg.dispatcher_config()?).context("building dispatcher")?;
    let client = kube::Client::try_default().await.context("building kube client")?;
    let store = KubeStore::connect(client, &cfg.gvk, cfg.namespace.as_deref()).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let supervisor = Supervisor::new(dispatcher);
    supervisor.watch(store, cfg.feed_options(), shutdown).await;
    Ok(())
}

async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Ctrl-C received; shutting down"),
                    _ = term.recv() => info!("SIGTERM received; shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler; only Ctrl-C will stop the relay");
                let _ = tokio::signal::ctrl_c().await;
                info!("Ctrl-C received; shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received; shutting down");
    }
    token.cancel();
}
