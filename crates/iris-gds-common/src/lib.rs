//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the ground data system."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Core shared primitives for the Iris ground data system workspace.
//! This crate exposes configuration loading, logging, metrics, and time
//! helpers consumed by every library crate and service.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod service;
pub mod time;

pub use config::{
    ArchiveConfig, CatalogConfig, DownlinkConfig, GdsConfig, IpcConfig, LoadedGdsConfig,
    LoggingConfig, MetricsConfig, UplinkConfig, XcvrConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use metrics::{new_registry, render_text, PipelineMetrics, SharedRegistry};
pub use service::{bootstrap, dump_metrics, shutdown_signal, ServiceArgs};
