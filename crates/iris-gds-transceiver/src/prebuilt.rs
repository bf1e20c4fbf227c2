//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Named transceiver presets with YAML overrides."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Transceivers that can be built from a name on the command line. Each
//! preset fixes sensible defaults; an [`XcvrArgs`] file overrides any of
//! them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use iris_gds_catalog::DataStandards;
use iris_gds_common::XcvrConfig;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use tracing::info;

use crate::backend::{
    ArchiveOpts, ArchiveTransceiver, PcapOpts, PcapTransceiver, SerialTransceiver,
    TransportProtocol,
};
use crate::core::Transceiver;
use crate::endec::{EndecChain, IpUdpEndec, SlipEndec, UnityEndec};
use crate::yamcs::{YamcsOpts, YamcsTransceiver};
use crate::{Result, TransceiverError};

const GENERIC_PCAP: &str = "./test-data/telem_rc9_9.5.3_200packets_w_IMU.pcap";
const LONG_PCAP: &str = "./test-data/Iris_210503_18_hours_of_telem.pcap";
const IMG_GRID_PCAP: &str = "./test-data/____real_img_of_real_grid_cam1_w_herc_mon_on.pcap";
const DEFAULT_ARCHIVE: &str = "./out/databases/fm1_mission_archive.csv";

/// Named transceiver presets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum PrebuiltTransceiver {
    /// Two minutes of sample telemetry, looped.
    #[strum(serialize = "PCAP_GENERIC")]
    PcapGeneric,
    /// Eighteen hours of telemetry, one packet a second.
    #[strum(serialize = "PCAP_18H")]
    Pcap18h,
    /// Telemetry with IMU motion, looped.
    #[strum(serialize = "PCAP_2MIN_IMU")]
    Pcap2minImu,
    /// Downlink of an image of the calibration grid.
    #[strum(serialize = "IMG_GRID")]
    ImgGrid,
    /// SLIP over the configured serial device.
    #[strum(serialize = "SERIAL")]
    Serial,
    /// Replay of a lander archive.
    #[strum(serialize = "ARCHIVE")]
    Archive,
    /// Live YAMCS bridge.
    #[strum(serialize = "YAMCS")]
    Yamcs,
}

/// Endec by name, for [`XcvrArgs::endecs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum EndecName {
    /// [`UnityEndec`].
    Unity,
    /// [`SlipEndec`].
    Slip,
    /// [`IpUdpEndec`] with the configured addresses.
    IpUdp,
}

/// Overrides for a preset, usually read from YAML. Unset fields keep the
/// preset's value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct XcvrArgs {
    /// Endecs, innermost first.
    pub endecs: Option<Vec<EndecName>>,
    /// Capture to replay.
    pub pcap_file: Option<PathBuf>,
    /// Capture destination-port filter.
    pub filter_port: Option<u16>,
    /// Capture transport filter.
    pub filter_protocol: Option<TransportProtocol>,
    /// Capture packets to skip.
    pub packetgap: Option<usize>,
    /// Leading bytes to strip from captured payloads.
    pub deadspace: Option<usize>,
    /// Replay period in ms; 0 keeps captured timing.
    pub fixed_period_ms: Option<u64>,
    /// Restart replays at the end.
    #[serde(rename = "loop")]
    pub loop_replay: Option<bool>,
    /// Archive to replay.
    pub archive_file: Option<PathBuf>,
    /// Archive playback multiplier.
    pub playback_speed: Option<f64>,
    /// Archive window start.
    pub start_time_utc: Option<DateTime<Utc>>,
    /// Archive window end.
    pub end_time_utc: Option<DateTime<Utc>>,
    /// Skip archive rows before Iris telemetry.
    pub jump_to_iris: Option<bool>,
    /// Serial device.
    pub device: Option<String>,
    /// Serial baud.
    pub baud: Option<u32>,
    /// YAMCS parameters to subscribe to.
    pub params: Option<Vec<String>>,
}

impl XcvrArgs {
    /// Overrides from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|err| {
            TransceiverError::Config(format!("bad transceiver args {}: {err}", path.display()))
        })
    }

    fn endec_chain(&self, default: &[EndecName], config: &XcvrConfig) -> Result<EndecChain> {
        let mut chain = EndecChain::new();
        for name in self.endecs.as_deref().unwrap_or(default) {
            match name {
                EndecName::Unity => chain.push(Box::new(UnityEndec)),
                EndecName::Slip => chain.push(Box::new(SlipEndec)),
                EndecName::IpUdp => chain.push(Box::new(IpUdpEndec::parse(
                    &config.udp_src,
                    &config.udp_dest,
                )?)),
            }
        }
        Ok(chain)
    }

    fn pcap(&self, file: PathBuf, period_ms: u64, loop_replay: bool, packetgap: usize) -> PcapOpts {
        let period_ms = self.fixed_period_ms.unwrap_or(period_ms);
        PcapOpts {
            pcap_file: self.pcap_file.clone().unwrap_or(file),
            filter_port: self.filter_port,
            filter_protocol: self.filter_protocol,
            packetgap: self.packetgap.unwrap_or(packetgap),
            deadspace: self.deadspace.unwrap_or(0),
            fixed_period: (period_ms > 0).then(|| Duration::from_millis(period_ms)),
            loop_replay: self.loop_replay.unwrap_or(loop_replay),
        }
    }
}

/// Build the transceiver preset called `name`.
pub fn build_xcvr_by_name(
    name: &str,
    args: &XcvrArgs,
    config: &XcvrConfig,
    standards: Arc<DataStandards>,
) -> Result<Box<dyn Transceiver>> {
    let preset: PrebuiltTransceiver = name.parse().map_err(|_| {
        TransceiverError::Config(format!("`{name}` is not a prebuilt transceiver"))
    })?;
    build_xcvr(preset, args, config, standards)
}

/// Build `preset` with `args` applied.
pub fn build_xcvr(
    preset: PrebuiltTransceiver,
    args: &XcvrArgs,
    config: &XcvrConfig,
    standards: Arc<DataStandards>,
) -> Result<Box<dyn Transceiver>> {
    info!(xcvr = %preset, ?args, "building transceiver");
    let configured_pcap = config.pcap_file.clone();
    let pcap_file = |fallback: &str| configured_pcap.clone().unwrap_or_else(|| PathBuf::from(fallback));
    let unity = [EndecName::Unity];
    let xcvr: Box<dyn Transceiver> = match preset {
        PrebuiltTransceiver::PcapGeneric => Box::new(PcapTransceiver::new(
            args.pcap(pcap_file(GENERIC_PCAP), 588, true, 0),
            args.endec_chain(&unity, config)?,
            standards,
        )),
        PrebuiltTransceiver::Pcap18h => Box::new(PcapTransceiver::new(
            args.pcap(pcap_file(LONG_PCAP), 1000, false, 37_000),
            args.endec_chain(&unity, config)?,
            standards,
        )),
        PrebuiltTransceiver::Pcap2minImu => Box::new(PcapTransceiver::new(
            args.pcap(PathBuf::from(GENERIC_PCAP), 588, true, 0),
            args.endec_chain(&unity, config)?,
            standards,
        )),
        PrebuiltTransceiver::ImgGrid => Box::new(PcapTransceiver::new(
            args.pcap(PathBuf::from(IMG_GRID_PCAP), 200, false, 0),
            args.endec_chain(&unity, config)?,
            standards,
        )),
        PrebuiltTransceiver::Serial => Box::new(SerialTransceiver::new(
            args.device.clone().unwrap_or_else(|| config.serial_device.clone()),
            args.baud.unwrap_or(config.serial_baud),
            config.serial_byte_timeout,
            args.endec_chain(&[], config)?,
            standards,
        )),
        PrebuiltTransceiver::Archive => {
            let file = args
                .archive_file
                .clone()
                .or_else(|| config.archive_file.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ARCHIVE));
            let defaults = ArchiveOpts::new(file);
            let opts = ArchiveOpts {
                playback_speed: args.playback_speed.unwrap_or(defaults.playback_speed),
                loop_replay: args.loop_replay.unwrap_or(defaults.loop_replay),
                start_time_utc: args.start_time_utc.or(defaults.start_time_utc),
                end_time_utc: args.end_time_utc.or(defaults.end_time_utc),
                jump_to_iris: args.jump_to_iris.unwrap_or(defaults.jump_to_iris),
                ..defaults
            };
            Box::new(ArchiveTransceiver::new(opts, args.endec_chain(&[], config)?, standards))
        }
        PrebuiltTransceiver::Yamcs => {
            let mut opts = YamcsOpts::from_config(config);
            if let Some(params) = &args.params {
                opts.params = params.clone();
            }
            Box::new(YamcsTransceiver::new(opts, args.endec_chain(&[], config)?, standards))
        }
    };
    Ok(xcvr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_gds_catalog::fixtures;
    use strum::IntoEnumIterator;

    #[test]
    fn every_preset_builds_from_its_name() {
        let standards = Arc::new(fixtures::standards());
        let config = XcvrConfig::default();
        for preset in PrebuiltTransceiver::iter() {
            let xcvr = build_xcvr_by_name(&preset.to_string(), &XcvrArgs::default(), &config, standards.clone())
                .expect("build");
            assert!(!xcvr.core().name().is_empty());
        }
        assert!(matches!(
            build_xcvr_by_name("WIFI", &XcvrArgs::default(), &config, standards),
            Err(TransceiverError::Config(_))
        ));
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!("pcap_18h".parse::<PrebuiltTransceiver>().ok(), Some(PrebuiltTransceiver::Pcap18h));
        assert_eq!(PrebuiltTransceiver::Pcap2minImu.to_string(), "PCAP_2MIN_IMU");
    }

    #[test]
    fn yaml_overrides_preset_defaults() {
        let args: XcvrArgs = serde_yaml::from_str(
            "pcap_file: other.pcap\nfixed_period_ms: 0\nloop: false\nendecs: [SLIP]\n",
        )
        .expect("yaml");
        let opts = args.pcap(PathBuf::from(GENERIC_PCAP), 588, true, 0);
        assert_eq!(opts.pcap_file, PathBuf::from("other.pcap"));
        assert_eq!(opts.fixed_period, None);
        assert!(!opts.loop_replay);
        let chain = args.endec_chain(&[EndecName::Unity], &XcvrConfig::default()).expect("chain");
        assert_eq!(chain.names(), vec!["slip"]);

        assert!(serde_yaml::from_str::<XcvrArgs>("bogus: 1").is_err());
    }
}
