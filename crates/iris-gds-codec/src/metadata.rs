//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Pathway, source, and ground time records carried by payloads."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use strum::{Display, EnumString};

/// Route a command or packet took between ground and rover.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataPathway {
    /// Direct RS-422 through the lander.
    Wired,
    /// Rover radio over the lander WiFi.
    Wireless,
    /// Ground-generated or unknown.
    #[default]
    None,
}

/// Where the bytes behind a payload came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSource {
    /// Built on the ground.
    Generated,
    /// Replayed from a packet capture.
    Pcap,
    /// Received through the YAMCS bridge.
    Yamcs,
    /// Replayed from an archive timeseries.
    Archive,
    /// Read from a serial device.
    Serial,
    /// Forwarded as UDP by the lander.
    UdpFromLander,
    /// Not recorded.
    #[default]
    Unknown,
}

/// Ground-side timestamps of a downlinked datum.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DownlinkTimes {
    /// Rover transmit time.
    #[serde(default)]
    pub rover_tx: Option<DateTime<Utc>>,
    /// Lander receive time.
    #[serde(default)]
    pub lander_rx: Option<DateTime<Utc>>,
    /// Lander transmit time.
    #[serde(default)]
    pub lander_tx: Option<DateTime<Utc>>,
    /// Receipt at the auxiliary mission control centre.
    #[serde(default)]
    pub amcc_rx: Option<DateTime<Utc>>,
    /// Receipt at the primary mission control centre.
    #[serde(default)]
    pub pmcc_rx: Option<DateTime<Utc>>,
    /// Estimated spacecraft event time.
    #[serde(default)]
    pub scet_est: Option<DateTime<Utc>>,
    /// Downlink delay assumed when `scet_est` was computed.
    #[serde(default)]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub scet_dl_delay_est: Option<Duration>,
}

impl DownlinkTimes {
    /// Record received at the primary MCC at `at`.
    pub fn received_at(at: DateTime<Utc>) -> Self {
        Self {
            pmcc_rx: Some(at),
            ..Self::default()
        }
    }

    /// Best available ground time: SCET estimate, then lander, AMCC, and
    /// PMCC receipt.
    pub fn best_time(&self) -> Option<DateTime<Utc>> {
        self.scet_est
            .or(self.lander_rx)
            .or(self.amcc_rx)
            .or(self.pmcc_rx)
    }
}

/// Ground-side timestamps of an uplinked command.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UplinkTimes {
    /// Creation on the ground.
    #[serde(default)]
    pub generated: Option<DateTime<Utc>>,
    /// Sent by the primary MCC.
    #[serde(default)]
    pub pmcc_tx: Option<DateTime<Utc>>,
    /// Received by the auxiliary MCC.
    #[serde(default)]
    pub amcc_rx: Option<DateTime<Utc>>,
    /// Accepted by the auxiliary MCC.
    #[serde(default)]
    pub amcc_ok: Option<DateTime<Utc>>,
    /// Sent on by the auxiliary MCC.
    #[serde(default)]
    pub amcc_tx: Option<DateTime<Utc>>,
    /// Acknowledged by the lander.
    #[serde(default)]
    pub ack_lander: Option<DateTime<Utc>>,
    /// Acknowledged by the rover.
    #[serde(default)]
    pub ack_rover: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn best_time_prefers_scet_then_receipt_order() {
        let t = |s: i64| Utc.timestamp_opt(s, 0).single().expect("time");
        let mut times = DownlinkTimes::received_at(t(30));
        assert_eq!(times.best_time(), Some(t(30)));
        times.amcc_rx = Some(t(20));
        assert_eq!(times.best_time(), Some(t(20)));
        times.lander_rx = Some(t(10));
        assert_eq!(times.best_time(), Some(t(10)));
        times.scet_est = Some(t(5));
        assert_eq!(times.best_time(), Some(t(5)));
    }

    #[test]
    fn enums_parse_from_operator_text() {
        assert_eq!("wired".parse::<DataPathway>(), Ok(DataPathway::Wired));
        assert_eq!(DataSource::UdpFromLander.to_string(), "UDP_FROM_LANDER");
    }
}
