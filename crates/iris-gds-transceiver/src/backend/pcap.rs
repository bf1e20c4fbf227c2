//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay of captured link traffic from classic pcap files."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use iris_gds_catalog::DataStandards;
use iris_gds_codec::{DataPathway, DataSource};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use strum::{Display, EnumString};
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::core::{RawFrame, Transceiver, TransceiverCore};
use crate::endec::{EndecChain, Ipv4Datagram};
use crate::{Result, TransceiverError};

const PROTO_ICMP: u8 = 1;
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;
/// Longest a read waits when nothing is due yet.
const MAX_WAIT: Duration = Duration::from_millis(250);

/// Transport layer a capture can be filtered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TransportProtocol {
    /// UDP.
    Udp,
    /// TCP.
    Tcp,
}

impl TransportProtocol {
    fn number(self) -> u8 {
        match self {
            TransportProtocol::Udp => PROTO_UDP,
            TransportProtocol::Tcp => PROTO_TCP,
        }
    }
}

/// How a capture is filtered and paced.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcapOpts {
    /// Capture to replay.
    pub pcap_file: PathBuf,
    /// Keep only packets to this destination port.
    #[serde(default)]
    pub filter_port: Option<u16>,
    /// Keep only packets of this transport.
    #[serde(default)]
    pub filter_protocol: Option<TransportProtocol>,
    /// Packets to skip after the protocol filter.
    #[serde(default)]
    pub packetgap: usize,
    /// Leading bytes to strip from every payload.
    #[serde(default)]
    pub deadspace: usize,
    /// Emit one packet per period. Without it packets keep their captured
    /// relative timing.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub fixed_period: Option<Duration>,
    /// Start over at the end of the capture.
    #[serde(default, rename = "loop")]
    pub loop_replay: bool,
}

impl PcapOpts {
    /// Options for `pcap_file` with no filtering, paced at `period`.
    pub fn new(pcap_file: impl Into<PathBuf>, period: Option<Duration>) -> Self {
        Self {
            pcap_file: pcap_file.into(),
            filter_port: None,
            filter_protocol: None,
            packetgap: 0,
            deadspace: 0,
            fixed_period: period,
            loop_replay: false,
        }
    }
}

/// Application bytes of one captured packet.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Captured {
    /// Capture time since the epoch of the file's clock.
    at: Duration,
    protocol: u8,
    destination_port: Option<u16>,
    payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
enum LinkType {
    Null,
    Ethernet,
    RawIp,
    LinuxSll,
}

impl LinkType {
    fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(LinkType::Null),
            1 => Some(LinkType::Ethernet),
            101 | 228 => Some(LinkType::RawIp),
            113 => Some(LinkType::LinuxSll),
            _ => None,
        }
    }

    /// IPv4 bytes inside a link-layer frame, `None` for other network layers.
    fn ipv4(self, frame: &[u8], little_endian: bool) -> Option<&[u8]> {
        match self {
            LinkType::RawIp => Some(frame),
            LinkType::Null => {
                let family = frame.get(..4)?;
                let family = if little_endian {
                    u32::from_le_bytes([family[0], family[1], family[2], family[3]])
                } else {
                    u32::from_be_bytes([family[0], family[1], family[2], family[3]])
                };
                (family == 2).then(|| &frame[4..])
            }
            LinkType::Ethernet => {
                let mut at = 12;
                let mut ethertype = u16::from_be_bytes([*frame.get(at)?, *frame.get(at + 1)?]);
                // 802.1Q tags.
                while ethertype == 0x8100 || ethertype == 0x88A8 {
                    at += 4;
                    ethertype = u16::from_be_bytes([*frame.get(at)?, *frame.get(at + 1)?]);
                }
                (ethertype == 0x0800).then(|| frame.get(at + 2..)).flatten()
            }
            LinkType::LinuxSll => {
                let protocol = u16::from_be_bytes([*frame.get(14)?, *frame.get(15)?]);
                (protocol == 0x0800).then(|| frame.get(16..)).flatten()
            }
        }
    }
}

fn pcap_error(message: impl Into<String>) -> TransceiverError {
    TransceiverError::decoding("pcap", message)
}

/// Transport payload and destination port of an IPv4 datagram.
fn transport(ip: &Ipv4Datagram<'_>) -> (Option<u16>, Vec<u8>) {
    match ip.protocol {
        PROTO_UDP => match ip.udp() {
            Some((port, payload)) => (Some(port), payload.to_vec()),
            None => (None, Vec::new()),
        },
        PROTO_TCP => {
            let body = ip.body;
            if body.len() < 20 {
                return (None, Vec::new());
            }
            let port = u16::from_be_bytes([body[2], body[3]]);
            let offset = usize::from(body[12] >> 4) * 4;
            (Some(port), body.get(offset..).unwrap_or_default().to_vec())
        }
        _ => (None, ip.body.to_vec()),
    }
}

/// Every IPv4 packet in a classic (not ng) pcap file.
fn parse_capture(data: &[u8]) -> Result<Vec<Captured>> {
    let header = data
        .get(..24)
        .ok_or_else(|| pcap_error(format!("{} bytes is too short for a pcap header", data.len())))?;
    let magic = [header[0], header[1], header[2], header[3]];
    let (little_endian, nanos) = match u32::from_le_bytes(magic) {
        0xA1B2_C3D4 => (true, false),
        0xA1B2_3C4D => (true, true),
        _ => match u32::from_be_bytes(magic) {
            0xA1B2_C3D4 => (false, false),
            0xA1B2_3C4D => (false, true),
            other => return Err(pcap_error(format!("unknown pcap magic {other:#010x}"))),
        },
    };
    let read_u32 = |b: &[u8]| {
        let b = [b[0], b[1], b[2], b[3]];
        if little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        }
    };
    let link_code = read_u32(&header[20..24]) & 0x0FFF_FFFF;
    let link = LinkType::from_code(link_code)
        .ok_or_else(|| pcap_error(format!("unsupported link type {link_code}")))?;

    let mut captured = Vec::new();
    let mut at = 24;
    while at < data.len() {
        let record = data
            .get(at..at + 16)
            .ok_or_else(|| pcap_error(format!("truncated record header at byte {at}")))?;
        let seconds = u64::from(read_u32(&record[0..4]));
        let fraction = u64::from(read_u32(&record[4..8]));
        let length = read_u32(&record[8..12]) as usize;
        let frame = data
            .get(at + 16..at + 16 + length)
            .ok_or_else(|| pcap_error(format!("truncated record at byte {at}")))?;
        at += 16 + length;

        let Some(ipv4) = link.ipv4(frame, little_endian) else {
            continue;
        };
        let Ok(ip) = Ipv4Datagram::parse(ipv4) else {
            continue;
        };
        let (destination_port, payload) = transport(&ip);
        let subsec = if nanos {
            Duration::from_nanos(fraction)
        } else {
            Duration::from_micros(fraction)
        };
        captured.push(Captured {
            at: Duration::from_secs(seconds) + subsec,
            protocol: ip.protocol,
            destination_port,
            payload,
        });
    }
    Ok(captured)
}

/// Apply the filters in capture order: protocol, gap, ICMP exclusion, port,
/// then dead space. Packets left with no bytes are dropped.
fn select(captured: Vec<Captured>, opts: &PcapOpts) -> Vec<Captured> {
    let total = captured.len();
    let by_protocol: Vec<_> = captured
        .into_iter()
        .filter(|c| opts.filter_protocol.map_or(true, |p| c.protocol == p.number()))
        .collect();
    let after_protocol = by_protocol.len();
    let selected: Vec<_> = by_protocol
        .into_iter()
        .skip(opts.packetgap)
        .filter(|c| c.protocol != PROTO_ICMP)
        .filter(|c| opts.filter_port.map_or(true, |p| c.destination_port == Some(p)))
        .filter_map(|mut c| {
            if opts.deadspace >= c.payload.len() {
                return None;
            }
            c.payload.drain(..opts.deadspace);
            Some(c)
        })
        .collect();
    if selected.is_empty() {
        error!(
            total,
            after_protocol,
            packetgap = opts.packetgap,
            port = ?opts.filter_port,
            "no packets in the capture match the filters"
        );
    }
    selected
}

/// Replays a capture of link traffic. Uplinked bytes are discarded.
pub struct PcapTransceiver {
    core: TransceiverCore,
    opts: PcapOpts,
    captured: Vec<Captured>,
    head: usize,
    started: Instant,
    last_emit: Instant,
}

impl PcapTransceiver {
    /// Replay of `opts.pcap_file`. `endecs` are those the capture was
    /// written with.
    pub fn new(opts: PcapOpts, endecs: EndecChain, standards: Arc<DataStandards>) -> Self {
        let now = Instant::now();
        Self {
            core: TransceiverCore::new(
                "pcap",
                standards,
                endecs,
                DataPathway::Wired,
                DataSource::Pcap,
            ),
            opts,
            captured: Vec::new(),
            head: 0,
            started: now,
            last_emit: now,
        }
    }

    /// Packets left to replay in this pass.
    pub fn remaining(&self) -> usize {
        self.captured.len().saturating_sub(self.head)
    }

    fn load(path: &Path, opts: &PcapOpts) -> Result<Vec<Captured>> {
        let data = std::fs::read(path).map_err(|err| {
            TransceiverError::Connection(format!("cannot read {}: {err}", path.display()))
        })?;
        Ok(select(parse_capture(&data)?, opts))
    }

    fn restart(&mut self) {
        let now = Instant::now();
        self.head = 0;
        self.started = now;
        self.last_emit = now.checked_sub(self.opts.fixed_period.unwrap_or_default()).unwrap_or(now);
    }

    fn take(&mut self, n: usize) -> Vec<RawFrame> {
        let end = (self.head + n).min(self.captured.len());
        let frames = self.captured[self.head..end]
            .iter()
            .map(|c| RawFrame::new(c.payload.clone()))
            .collect();
        self.head = end;
        frames
    }

    async fn fixed_period(&mut self, period: Duration) -> Vec<RawFrame> {
        let mut elapsed = self.last_emit.elapsed();
        if elapsed < period {
            tokio::time::sleep(period - elapsed).await;
            elapsed = self.last_emit.elapsed();
        }
        let periods = (elapsed.as_secs_f64() / period.as_secs_f64().max(f64::EPSILON)) as usize;
        if periods == 0 {
            return Vec::new();
        }
        self.last_emit = Instant::now();
        self.take(periods)
    }

    async fn captured_timing(&mut self) -> Vec<RawFrame> {
        let origin = self.captured[0].at;
        let due = self.captured[self.head].at.saturating_sub(origin);
        let elapsed = self.started.elapsed();
        if elapsed < due {
            tokio::time::sleep((due - elapsed).min(MAX_WAIT)).await;
        }
        let elapsed = self.started.elapsed();
        let n = self.captured[self.head..]
            .iter()
            .take_while(|c| c.at.saturating_sub(origin) <= elapsed)
            .count();
        self.take(n)
    }
}

#[async_trait]
impl Transceiver for PcapTransceiver {
    fn core(&self) -> &TransceiverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TransceiverCore {
        &mut self.core
    }

    async fn open(&mut self) -> Result<()> {
        info!(file = %self.opts.pcap_file.display(), opts = ?self.opts, "loading capture");
        self.captured = Self::load(&self.opts.pcap_file, &self.opts)?;
        info!(packets = self.captured.len(), "capture loaded");
        self.restart();
        Ok(())
    }

    async fn downlink(&mut self) -> Result<Vec<RawFrame>> {
        if self.head >= self.captured.len() {
            if self.opts.loop_replay && !self.captured.is_empty() {
                debug!(file = %self.opts.pcap_file.display(), "looping capture");
                self.restart();
            } else {
                trace!("capture exhausted");
                tokio::time::sleep(MAX_WAIT).await;
                return Ok(Vec::new());
            }
        }
        Ok(match self.opts.fixed_period {
            Some(period) => self.fixed_period(period).await,
            None => self.captured_timing().await,
        })
    }

    async fn uplink(&mut self, bytes: &[u8]) -> Result<()> {
        debug!(
            len = bytes.len(),
            "replaying a capture, uplinked bytes are discarded"
        );
        Ok(())
    }
}
