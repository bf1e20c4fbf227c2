//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Startup and shutdown steps shared by every GDS service binary."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Every service starts the same way: `.env`, configuration, tracing. Then it
//! opens its own sockets. Shutdown waits for SIGINT or SIGTERM and ends with
//! an optional metrics dump.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use prometheus::Registry;
use tracing::{debug, info};

use crate::config::{GdsConfig, LoadedGdsConfig, MetricsConfig};
use crate::logging::init_tracing;
use crate::metrics::render_text;

/// Configuration file tried when `--config` and `IBv3_CONFIG` are unset.
pub const DEFAULT_CONFIG_FILE: &str = "configs/iris-gds.toml";

/// Flags shared by all service binaries.
#[derive(Debug, Clone, Default, Args)]
pub struct ServiceArgs {
    /// Path to the TOML configuration file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level, overriding `logging.level`.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Name the app answers to on APP_CONTROL and in logs.
    #[arg(long)]
    pub name: Option<String>,
}

impl ServiceArgs {
    /// `--name`, or `default`.
    pub fn app_name(&self, default: &str) -> String {
        self.name.clone().unwrap_or_else(|| default.to_owned())
    }
}

/// Load configuration and install tracing for `service`.
pub fn bootstrap(service: &str, args: &ServiceArgs) -> Result<LoadedGdsConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = &args.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut loaded = GdsConfig::load_with_source(&candidates)?;
    if let Some(level) = &args.log_level {
        loaded.config.logging.level = level.clone();
    }
    init_tracing(service, &loaded.config.logging)?;
    match &loaded.source {
        Some(path) => info!(config = %path.display(), "configuration loaded"),
        None => info!("no configuration file, running on defaults"),
    }
    Ok(loaded)
}

/// Resolves on SIGINT or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            debug!(error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                debug!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Log the registry at `debug` when enabled in `config`.
pub fn dump_metrics(registry: &Registry, config: &MetricsConfig) {
    if config.enabled && config.dump_on_shutdown {
        debug!(metrics = %render_text(registry), "metrics at shutdown");
    }
}
