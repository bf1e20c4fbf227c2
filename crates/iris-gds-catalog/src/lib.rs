//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "DataStandards catalog of modules, commands, telemetry, and events."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! The DataStandards catalog: every module, command, telemetry channel and
//! event the ground segment knows how to encode or decode, keyed by both
//! name and numeric ID.
#![warn(missing_docs)]

use std::path::PathBuf;

use iris_gds_common::CatalogConfig;
use tracing::{info, warn};

/// Result alias used throughout the catalog crate.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Error type for catalog loading, caching and registration.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Malformed XML, an unknown type name, or a structurally invalid entry.
    #[error("schema error in {file}: {message}")]
    Schema {
        /// File (or logical source) the problem was found in.
        file: String,
        /// Human readable description.
        message: String,
    },
    /// Two entries share an ID or a name within the same scope.
    #[error("duplicate in {scope}: {detail}")]
    Duplicate {
        /// Where the collision happened (e.g. `module Navigation commands`).
        scope: String,
        /// The colliding key.
        detail: String,
    },
    /// A referenced import, cache file, or watched channel does not exist.
    #[error("missing: {0}")]
    Missing(String),
    /// MetaChannel watch declarations form a cycle.
    #[error("metachannel watch graph has a cycle through {0}")]
    Cycle(String),
    /// Wrapper for IO errors encountered while reading inputs or caches.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for CBOR serialization issues in the cache format.
    #[error("cbor serialization error: {0}")]
    Cbor(#[from] serde_cbor::Error),
}

impl CatalogError {
    pub(crate) fn schema(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            file: file.into(),
            message: message.into(),
        }
    }

    pub(crate) fn duplicate(scope: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Duplicate {
            scope: scope.into(),
            detail: detail.into(),
        }
    }
}

pub mod cache;
pub mod datatype;
pub mod loader;
pub mod meta;
pub mod model;
pub mod name_id;
pub mod prebuilt;
pub mod standards;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

pub use cache::{cache, load_cache, newest_cache, CACHE_EXTENSION, CACHE_FORMAT_VERSION};
pub use datatype::{DataType, IntType};
pub use loader::build;
pub use meta::{
    add_metamodules, MetaChannelDecl, MetaModuleDecl, META_MODULE_ID_RANGE, META_MODULE_PREFIX,
};
pub use model::{
    Argument, BitfieldField, BitfieldSpec, Command, EnumItem, Event, Module, RangeLimits,
    Severity, TelemetryChannel,
};
pub use name_id::{NameIdMap, NameOrId};
pub use standards::{DataStandards, StandardsSummary};

/// Load the catalog the way every GDS process does at startup: the newest
/// cache when `prefer_cache` is set and one exists, else the XML tree (which
/// is then cached for the next start).
pub fn load_standards(config: &CatalogConfig) -> Result<DataStandards> {
    if config.prefer_cache {
        match newest_cache(&config.cache_dir, &config.cache_name)? {
            Some(path) => match load_cache(&config.cache_dir, &path.to_string_lossy()) {
                Ok(standards) => {
                    info!(cache = %path.display(), summary = %standards.summary(), "loaded catalog cache");
                    return Ok(standards);
                }
                Err(err) => warn!(cache = %path.display(), error = %err, "ignoring unusable catalog cache"),
            },
            None => info!(dir = %config.cache_dir.display(), "no catalog cache found, building from XML"),
        }
    }

    let standards = build(
        &config.xml_root,
        config.topology_file.as_deref(),
        config.include_prebuilts,
    )?;
    let cached: PathBuf = cache(&standards, &config.cache_dir, &config.cache_name, true)?;
    info!(cache = %cached.display(), summary = %standards.summary(), "built catalog from XML");
    Ok(standards)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_standards_builds_then_prefers_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CatalogConfig {
            xml_root: fixtures::fprime_root(),
            cache_dir: dir.path().to_path_buf(),
            ..CatalogConfig::default()
        };

        let built = load_standards(&config).expect("build from xml");
        assert!(newest_cache(dir.path(), &config.cache_name)
            .expect("scan")
            .is_some());

        let loaded = load_standards(&config).expect("load from cache");
        assert_eq!(built, loaded);
    }

    #[test]
    fn error_messages_name_the_scope() {
        let err = CatalogError::duplicate("module Navigation commands", "id 0x00");
        assert_eq!(
            err.to_string(),
            "duplicate in module Navigation commands: id 0x00"
        );
    }
}
