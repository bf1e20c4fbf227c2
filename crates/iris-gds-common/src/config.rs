//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Layered configuration: TOML file, dotenv, and IBv3_ environment overlay."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Prefix shared by every environment override (`IBv3_<layer>__<key>`).
pub const ENV_PREFIX: &str = "IBv3";

fn default_ipc_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_hmac_key() -> String {
    "iris-gds-development-key".to_owned()
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_join_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_connect_retry() -> Duration {
    Duration::from_millis(250)
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_xml_root() -> PathBuf {
    PathBuf::from("config/fprime")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("out/datastandards")
}

fn default_cache_name() -> String {
    "DataStandards".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_serial_device() -> String {
    "/dev/ttyUSB0".to_owned()
}

fn default_serial_baud() -> u32 {
    9600
}

fn default_serial_byte_timeout() -> Duration {
    Duration::from_millis(5)
}

fn default_yamcs_url() -> String {
    "ws://localhost:8090/api/websocket".to_owned()
}

fn default_yamcs_instance() -> String {
    "iris".to_owned()
}

fn default_yamcs_processor() -> String {
    "realtime".to_owned()
}

fn default_udp_src() -> String {
    "192.168.10.105:43531".to_owned()
}

fn default_udp_dest() -> String {
    "192.168.150.3:42000".to_owned()
}

fn default_delay_est() -> Duration {
    // (4 s + 40 s) / 2 + 100 ms
    Duration::from_millis(22_100)
}

fn default_max_meta_depth() -> usize {
    5
}

fn default_archive_directory() -> PathBuf {
    PathBuf::from("out/archive")
}

fn default_summary_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("out/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_max_file_bytes() -> u64 {
    1_000_000
}

fn default_max_files() -> usize {
    5000
}

/// Primary configuration object shared by every Iris GDS process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GdsConfig {
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub xcvr: XcvrConfig,
    #[serde(default)]
    pub dl: DownlinkConfig,
    #[serde(default)]
    pub ul: UplinkConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where a [`GdsConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedGdsConfig {
    pub config: GdsConfig,
    /// `None` when no file was found and built-in defaults were used.
    pub source: Option<PathBuf>,
}

impl GdsConfig {
    pub const ENV_CONFIG_PATH: &'static str = "IBv3_CONFIG";

    /// Load configuration, respecting `.env`, `IBv3_CONFIG` and the
    /// `IBv3_<layer>__<key>` overlay.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// Resolution order: `IBv3_CONFIG`, then the first existing candidate,
    /// then built-in defaults. The environment overlay is applied last.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedGdsConfig> {
        load_dotenv();

        let mut source = None;
        let mut base = GdsConfig::default();
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                base = Self::read_file(&path)?;
                source = Some(path);
            }
        }
        if source.is_none() {
            if let Some(candidate) = candidates.iter().find(|c| c.as_ref().exists()) {
                let path = candidate.as_ref().to_path_buf();
                base = Self::read_file(&path)?;
                source = Some(path);
            } else {
                debug!(
                    inspected = %candidates
                        .iter()
                        .map(|p| p.as_ref().display().to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                    "no configuration file found, using defaults"
                );
            }
        }

        let config = base.with_env_overlay()?;
        config.validate()?;
        Ok(LoadedGdsConfig { config, source })
    }

    fn read_file(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        toml::from_str::<GdsConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Apply `IBv3_<layer>__<key>` variables from the process environment.
    pub fn with_env_overlay(self) -> Result<Self> {
        self.overlay(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Apply an overlay from an explicit variable map instead of the process
    /// environment.
    pub fn with_env_overlay_from(self, vars: HashMap<String, String>) -> Result<Self> {
        self.overlay(config::Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn overlay(self, env: config::Environment) -> Result<Self> {
        let base = config::Config::try_from(&self).context("failed to stage base configuration")?;
        let layered = config::Config::builder()
            .add_source(base)
            .add_source(
                env.prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to layer environment overrides")?;
        layered
            .try_deserialize::<GdsConfig>()
            .context("environment overrides produced an invalid configuration")
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.ipc.hmac_key.is_empty() {
            return Err(anyhow!("ipc.hmac_key must not be empty"));
        }
        if self.ipc.poll_interval.is_zero() {
            return Err(anyhow!("ipc.poll_interval must be positive"));
        }
        if self.dl.max_meta_depth == 0 {
            return Err(anyhow!("dl.max_meta_depth must be at least 1"));
        }
        if self.logging.max_files == 0 {
            return Err(anyhow!("logging.max_files must be at least 1"));
        }
        self.xcvr.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for GdsConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: GdsConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Load `.env` from the working directory or any ancestor. Missing files are
/// not an error.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "loaded .env"),
        Err(err) if err.not_found() => {}
        Err(err) => debug!(error = %err, "ignoring unreadable .env"),
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    #[serde(default = "default_ipc_host")]
    pub host: String,
    #[serde(default = "default_hmac_key")]
    pub hmac_key: String,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_join_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub join_timeout: Duration,
    #[serde(default = "default_connect_retry")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_retry: Duration,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            host: default_ipc_host(),
            hmac_key: default_hmac_key(),
            poll_interval: default_poll_interval(),
            join_timeout: default_join_timeout(),
            connect_retry: default_connect_retry(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Directory holding the topology and component XML files.
    #[serde(default = "default_xml_root")]
    pub xml_root: PathBuf,
    /// Topology file name inside `xml_root`. Discovered when unset.
    #[serde(default)]
    pub topology_file: Option<String>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_cache_name")]
    pub cache_name: String,
    /// Try the newest cache before parsing XML.
    #[serde(default = "default_true")]
    pub prefer_cache: bool,
    #[serde(default = "default_true")]
    pub include_prebuilts: bool,
    #[serde(default = "default_true")]
    pub include_prebuilt_meta: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            xml_root: default_xml_root(),
            topology_file: None,
            cache_dir: default_cache_dir(),
            cache_name: default_cache_name(),
            prefer_cache: true,
            include_prebuilts: true,
            include_prebuilt_meta: true,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XcvrConfig {
    #[serde(default = "default_serial_device")]
    pub serial_device: String,
    #[serde(default = "default_serial_baud")]
    pub serial_baud: u32,
    #[serde(default = "default_serial_byte_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub serial_byte_timeout: Duration,
    #[serde(default)]
    pub pcap_file: Option<PathBuf>,
    #[serde(default)]
    pub archive_file: Option<PathBuf>,
    #[serde(default = "default_yamcs_url")]
    pub yamcs_url: String,
    #[serde(default = "default_yamcs_instance")]
    pub yamcs_instance: String,
    #[serde(default = "default_yamcs_processor")]
    pub yamcs_processor: String,
    #[serde(default)]
    pub yamcs_username: Option<String>,
    #[serde(default)]
    pub yamcs_password: Option<String>,
    /// Source `ip:port` written by the IP/UDP endec.
    #[serde(default = "default_udp_src")]
    pub udp_src: String,
    /// Destination `ip:port` written by the IP/UDP endec.
    #[serde(default = "default_udp_dest")]
    pub udp_dest: String,
}

impl Default for XcvrConfig {
    fn default() -> Self {
        Self {
            serial_device: default_serial_device(),
            serial_baud: default_serial_baud(),
            serial_byte_timeout: default_serial_byte_timeout(),
            pcap_file: None,
            archive_file: None,
            yamcs_url: default_yamcs_url(),
            yamcs_instance: default_yamcs_instance(),
            yamcs_processor: default_yamcs_processor(),
            yamcs_username: None,
            yamcs_password: None,
            udp_src: default_udp_src(),
            udp_dest: default_udp_dest(),
        }
    }
}

impl XcvrConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.yamcs_url.starts_with("ws://") || self.yamcs_url.starts_with("wss://")) {
            return Err(anyhow!(
                "xcvr.yamcs_url must be a ws:// or wss:// url, got {}",
                self.yamcs_url
            ));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownlinkConfig {
    /// Initial estimate of the rover to ground downlink delay.
    #[serde(default = "default_delay_est")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub delay_est: Duration,
    /// Maximum rounds of meta-of-meta evaluation per batch.
    #[serde(default = "default_max_meta_depth")]
    pub max_meta_depth: usize,
}

impl Default for DownlinkConfig {
    fn default() -> Self {
        Self {
            delay_est: default_delay_est(),
            max_meta_depth: default_max_meta_depth(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UplinkConfig {
    #[serde(default)]
    pub use_seq_num: bool,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_archive_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_summary_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub summary_interval: Duration,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            directory: default_archive_directory(),
            summary_interval: default_summary_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            level: default_log_level(),
            max_file_bytes: default_max_file_bytes(),
            max_files: default_max_files(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log the Prometheus text exposition when a service shuts down.
    #[serde(default = "default_true")]
    pub dump_on_shutdown: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dump_on_shutdown: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: GdsConfig = "".parse().expect("defaults are valid");
        assert_eq!(config.dl.delay_est, Duration::from_millis(22_100));
        assert_eq!(config.dl.max_meta_depth, 5);
        assert!(!config.ul.use_seq_num);
        assert_eq!(config.logging.max_file_bytes, 1_000_000);
        assert_eq!(config.logging.max_files, 5000);
        assert_eq!(config.ipc.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config: GdsConfig = r#"
            [ul]
            use_seq_num = true

            [dl]
            delay_est = 1500

            [logging]
            format = "pretty"
            level = "debug"
        "#
        .parse()
        .expect("parse");
        assert!(config.ul.use_seq_num);
        assert_eq!(config.dl.delay_est, Duration::from_millis(1500));
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn environment_overlay_uses_layer_separator() {
        let mut vars = HashMap::new();
        vars.insert("IBv3_xcvr__yamcs_username".to_owned(), "operator".to_owned());
        vars.insert("IBv3_ul__use_seq_num".to_owned(), "true".to_owned());
        vars.insert("IBv3_dl__max_meta_depth".to_owned(), "3".to_owned());
        vars.insert("UNRELATED".to_owned(), "ignored".to_owned());

        let config = GdsConfig::default()
            .with_env_overlay_from(vars)
            .expect("overlay applies");
        assert_eq!(config.xcvr.yamcs_username.as_deref(), Some("operator"));
        assert!(config.ul.use_seq_num);
        assert_eq!(config.dl.max_meta_depth, 3);
        assert_eq!(config.dl.delay_est, Duration::from_millis(22_100));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = GdsConfig::default();
        config.ipc.hmac_key.clear();
        assert!(config.validate().is_err());

        let mut config = GdsConfig::default();
        config.xcvr.yamcs_url = "http://localhost".to_owned();
        assert!(config.validate().is_err());

        let mut config = GdsConfig::default();
        config.dl.max_meta_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_falls_back_to_first_existing_candidate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gds.toml");
        fs::write(&path, "[archive]\nsummary_interval = 5\n").expect("write");
        let missing = dir.path().join("missing.toml");

        let loaded = GdsConfig::load_with_source(&[missing, path.clone()]).expect("load");
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
        assert_eq!(loaded.config.archive.summary_interval, Duration::from_secs(5));
    }

    #[test]
    fn shipped_example_config_matches_the_defaults() {
        let shipped: GdsConfig = include_str!("../../../configs/iris-gds.toml")
            .parse()
            .expect("example config parses");
        let defaults = GdsConfig::default();
        assert_eq!(shipped.dl.delay_est, defaults.dl.delay_est);
        assert_eq!(shipped.ipc.hmac_key, defaults.ipc.hmac_key);
        assert_eq!(shipped.catalog.cache_dir, defaults.catalog.cache_dir);
        assert_eq!(shipped.logging.format, defaults.logging.format);
        assert_eq!(shipped.archive.summary_interval, defaults.archive.summary_interval);
    }
}
