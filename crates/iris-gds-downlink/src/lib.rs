//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Downlink enrichment: SCET estimation and MetaChannels."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Turns downlinked packets into enriched payload batches: every payload
//! gets a spacecraft event time estimate, and ground-computed MetaChannels
//! add derived telemetry to the batch.
#![warn(missing_docs)]

pub mod meta;
pub mod prebuilt;
pub mod processor;
pub mod timestamping;

/// Result alias used throughout the downlink crate.
pub type Result<T> = std::result::Result<T, DownlinkError>;

/// Error type for downlink processing.
#[derive(Debug, thiserror::Error)]
pub enum DownlinkError {
    /// A MetaChannel or MetaModule definition is unusable.
    #[error("invalid metachannel definition: {0}")]
    Meta(String),
    /// Registering MetaModules into the catalog failed.
    #[error(transparent)]
    Catalog(#[from] iris_gds_catalog::CatalogError),
    /// A bus message could not be decoded or sent.
    #[error(transparent)]
    Ipc(#[from] iris_gds_ipc::IpcError),
}

pub use meta::{
    inherited_downlink_times, Calculation, ChannelOptions, Emission, Inputs, MetaChannel,
    MetaChannelProto, MetaModule, MetaRuntime, Sample, UpdateBehavior,
};
pub use prebuilt::{latency_module, prebuilt_meta_modules, rover_power_module};
pub use processor::{prepare_meta_runtime, DownlinkProcessor, ProcessedBatch};
pub use timestamping::RoverTimeEstimator;
