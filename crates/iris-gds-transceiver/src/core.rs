//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transceiver trait and the state shared by every backend."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iris_gds_catalog::DataStandards;
use iris_gds_codec::{
    parse_packet, DataPathway, DataSource, IrisCommonPacket, Packet, PacketKind,
    PayloadCollection,
};
use iris_gds_common::PipelineMetrics;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::endec::EndecChain;
use crate::{Result, TransceiverError};

/// One frame as it came off the link, before the endec chain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawFrame {
    /// Frame bytes.
    pub bytes: Vec<u8>,
    /// Pathway when the backend knows it per frame.
    pub pathway: Option<DataPathway>,
    /// Lander receive time, for relayed frames.
    pub lander_rx: Option<DateTime<Utc>>,
    /// AMCC receive time, for relayed frames.
    pub amcc_rx: Option<DateTime<Utc>>,
}

impl RawFrame {
    /// Frame with no per-frame metadata.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            ..Self::default()
        }
    }
}

/// Observer of every packet a transceiver produces. Called inline, so
/// implementations must not block.
pub trait DataHandler: Send + Sync {
    /// A packet was read.
    fn on_packet(&self, packet: &Packet);
}

/// Per-transceiver counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransceiverStats {
    /// Frames read from the link.
    pub frames_in: u64,
    /// Frames the endec chain rejected.
    pub frames_dropped: u64,
    /// Packets handed to the caller.
    pub packets_out: u64,
    /// Of those, packets that did not decode.
    pub unsupported: u64,
    /// Frames written to the link.
    pub frames_uplinked: u64,
}

/// State every backend embeds: endecs, tags, handlers and counters.
pub struct TransceiverCore {
    name: String,
    standards: Arc<DataStandards>,
    endecs: EndecChain,
    pathway: DataPathway,
    source: DataSource,
    handlers: Vec<Arc<dyn DataHandler>>,
    stats: TransceiverStats,
    metrics: Option<PipelineMetrics>,
    dormant: bool,
}

impl fmt::Debug for TransceiverCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransceiverCore")
            .field("name", &self.name)
            .field("endecs", &self.endecs.names())
            .field("pathway", &self.pathway)
            .field("source", &self.source)
            .field("handlers", &self.handlers.len())
            .field("stats", &self.stats)
            .field("dormant", &self.dormant)
            .finish()
    }
}

impl TransceiverCore {
    /// Core for a backend called `name`.
    pub fn new(
        name: impl Into<String>,
        standards: Arc<DataStandards>,
        endecs: EndecChain,
        pathway: DataPathway,
        source: DataSource,
    ) -> Self {
        Self {
            name: name.into(),
            standards,
            endecs,
            pathway,
            source,
            handlers: Vec::new(),
            stats: TransceiverStats::default(),
            metrics: None,
            dormant: false,
        }
    }

    /// Count packets and drops into `metrics`.
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start counting into `metrics` on an already built transceiver.
    pub fn set_metrics(&mut self, metrics: PipelineMetrics) {
        self.metrics = Some(metrics);
    }

    /// Backend name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Catalog packets are decoded against.
    pub fn standards(&self) -> &Arc<DataStandards> {
        &self.standards
    }

    /// Default pathway of packets from this link.
    pub fn pathway(&self) -> DataPathway {
        self.pathway
    }

    /// Source tag of packets from this link.
    pub fn source(&self) -> DataSource {
        self.source
    }

    /// Counters so far.
    pub fn stats(&self) -> TransceiverStats {
        self.stats
    }

    /// Whether the link failed and reads return nothing.
    pub fn is_dormant(&self) -> bool {
        self.dormant
    }

    pub(crate) fn set_dormant(&mut self, dormant: bool) {
        self.dormant = dormant;
    }

    /// Add an observer.
    pub fn register_data_handler(&mut self, handler: Arc<dyn DataHandler>) {
        self.handlers.push(handler);
    }

    /// Peel, classify and stamp downlinked frames. Frames the endec chain
    /// rejects are logged and dropped; bytes that do not decode still come
    /// back as unsupported packets.
    pub fn process_frames(&mut self, frames: Vec<RawFrame>) -> Vec<Packet> {
        let mut packets = Vec::with_capacity(frames.len());
        for frame in frames {
            self.stats.frames_in += 1;
            let bytes = match self.endecs.decode(&frame.bytes) {
                Ok(bytes) => bytes,
                Err(err) => {
                    self.stats.frames_dropped += 1;
                    let reason = match &err {
                        TransceiverError::Decoding { endec, .. } => *endec,
                        _ => "endec",
                    };
                    if let Some(metrics) = &self.metrics {
                        metrics.record_drop(&self.source.to_string(), reason);
                    }
                    warn!(
                        xcvr = %self.name,
                        error = %err,
                        frame = %hex::encode(&frame.bytes),
                        "dropping frame the endec chain rejected"
                    );
                    continue;
                }
            };
            let packet = parse_packet(&bytes, &self.standards);
            packets.push(self.finish_packet(
                packet,
                frame.pathway,
                frame.lander_rx,
                frame.amcc_rx,
            ));
        }
        packets
    }

    /// Tag, timestamp, count and publish a packet produced by this link.
    ///
    /// Every payload without a PMCC receive time gets `now`; relay times are
    /// filled in where missing.
    pub fn finish_packet(
        &mut self,
        mut packet: Packet,
        pathway: Option<DataPathway>,
        lander_rx: Option<DateTime<Utc>>,
        amcc_rx: Option<DateTime<Utc>>,
    ) -> Packet {
        packet.set_source(self.source);
        packet.set_pathway(pathway.unwrap_or(self.pathway));

        let now = Utc::now();
        for payload in packet.payloads_mut().iter_mut() {
            if let Some(times) = payload.downlink_times_mut() {
                times.pmcc_rx.get_or_insert(now);
                if times.amcc_rx.is_none() {
                    times.amcc_rx = amcc_rx;
                }
                if times.lander_rx.is_none() {
                    times.lander_rx = lander_rx;
                }
            }
        }

        self.stats.packets_out += 1;
        if packet.kind() == PacketKind::Unsupported {
            self.stats.unsupported += 1;
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_packet(&self.source.to_string(), &packet.kind().to_string());
        }
        debug!(
            xcvr = %self.name,
            class = %packet.kind(),
            payloads = packet.payloads().len(),
            "packet downlinked"
        );
        for handler in &self.handlers {
            handler.on_packet(&packet);
        }
        packet
    }

    /// Wire bytes for `packet` after the endec chain.
    pub fn encode_packet(&self, packet: &Packet) -> Result<Vec<u8>> {
        let bytes = packet.encode(&self.standards)?;
        self.endecs.encode(&bytes)
    }

    pub(crate) fn count_uplink(&mut self) {
        self.stats.frames_uplinked += 1;
    }
}

/// A byte source and sink for the rover link.
///
/// Backends implement [`open`](Transceiver::open),
/// [`downlink`](Transceiver::downlink) and [`uplink`](Transceiver::uplink);
/// the provided methods add endecs, classification and failure handling.
#[async_trait]
pub trait Transceiver: Send {
    /// Shared state.
    fn core(&self) -> &TransceiverCore;

    /// Shared state, mutably.
    fn core_mut(&mut self) -> &mut TransceiverCore;

    /// Open or reopen the underlying link.
    async fn open(&mut self) -> Result<()>;

    /// Frames currently available. Must not block for longer than the
    /// link's natural period.
    async fn downlink(&mut self) -> Result<Vec<RawFrame>>;

    /// Write one encoded frame.
    async fn uplink(&mut self, bytes: &[u8]) -> Result<()>;

    /// Packets from the next frames. Backends that receive structured data
    /// instead of bytes override this.
    async fn downlink_packets(&mut self) -> Result<Vec<Packet>> {
        let frames = self.downlink().await?;
        Ok(self.core_mut().process_frames(frames))
    }

    /// Open the link. Calling again resets it. On failure the transceiver
    /// goes dormant and the error is returned.
    async fn begin(&mut self) -> Result<()> {
        match self.open().await {
            Ok(()) => {
                let core = self.core_mut();
                core.set_dormant(false);
                info!(xcvr = %core.name(), endecs = ?core.endecs.names(), "transceiver ready");
                Ok(())
            }
            Err(err) => {
                let core = self.core_mut();
                core.set_dormant(true);
                error!(xcvr = %core.name(), error = %err, "transceiver failed to open");
                Err(err)
            }
        }
    }

    /// Packets currently available. Never fails: errors are logged, and a
    /// lost connection makes the transceiver dormant.
    async fn read(&mut self) -> Vec<Packet> {
        if self.core().is_dormant() {
            return Vec::new();
        }
        match self.downlink_packets().await {
            Ok(packets) => packets,
            Err(err @ TransceiverError::Connection(_)) => {
                let core = self.core_mut();
                core.set_dormant(true);
                error!(xcvr = %core.name(), error = %err, "link lost, transceiver is now dormant");
                Vec::new()
            }
            Err(err) => {
                warn!(xcvr = %self.core().name(), error = %err, "read failed");
                Vec::new()
            }
        }
    }

    /// Encode `packet` through the endec chain and send it.
    async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let bytes = self.core().encode_packet(packet)?;
        self.uplink(&bytes).await?;
        self.core_mut().count_uplink();
        debug!(xcvr = %self.core().name(), class = %packet.kind(), len = bytes.len(), "packet uplinked");
        Ok(())
    }

    /// Wrap `payloads` in an unsequenced common packet and send it.
    async fn send_payloads(&mut self, payloads: PayloadCollection) -> Result<()> {
        let packet = Packet::from(IrisCommonPacket::new(0, payloads));
        self.send_packet(&packet).await
    }

    /// Add an observer of every downlinked packet.
    fn register_data_handler(&mut self, handler: Arc<dyn DataHandler>) {
        self.core_mut().register_data_handler(handler);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::endec::{IpUdpEndec, SlipEndec};
    use iris_gds_catalog::fixtures;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// In-memory link: frames pushed in come back out of `downlink`, and
    /// uplinked frames are recorded.
    pub(crate) struct Loopback {
        pub core: TransceiverCore,
        pub inbound: VecDeque<RawFrame>,
        pub sent: Vec<Vec<u8>>,
        pub fail_open: bool,
    }

    impl Loopback {
        pub fn new(endecs: EndecChain) -> Self {
            let core = TransceiverCore::new(
                "loopback",
                Arc::new(fixtures::standards()),
                endecs,
                DataPathway::Wired,
                DataSource::Generated,
            );
            Self {
                core,
                inbound: VecDeque::new(),
                sent: Vec::new(),
                fail_open: false,
            }
        }
    }

    #[async_trait]
    impl Transceiver for Loopback {
        fn core(&self) -> &TransceiverCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut TransceiverCore {
            &mut self.core
        }

        async fn open(&mut self) -> Result<()> {
            if self.fail_open {
                return Err(TransceiverError::Connection("no device".to_owned()));
            }
            Ok(())
        }

        async fn downlink(&mut self) -> Result<Vec<RawFrame>> {
            Ok(self.inbound.drain(..).collect())
        }

        async fn uplink(&mut self, bytes: &[u8]) -> Result<()> {
            self.sent.push(bytes.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<PacketKind>>);

    impl DataHandler for Recorder {
        fn on_packet(&self, packet: &Packet) {
            self.0.lock().push(packet.kind());
        }
    }

    fn slip_udp() -> EndecChain {
        EndecChain::new()
            .with(IpUdpEndec::parse("10.0.0.1:8080", "10.0.0.2:8080").expect("addrs"))
            .with(SlipEndec)
    }

    #[tokio::test]
    async fn uplinked_frames_read_back_as_packets() {
        let mut xcvr = Loopback::new(slip_udp());
        xcvr.begin().await.expect("begin");
        let recorder = Arc::new(Recorder::default());
        xcvr.register_data_handler(recorder.clone());

        xcvr.send_payloads(PayloadCollection::new()).await.expect("send");
        let wire = xcvr.sent.pop().expect("sent");
        xcvr.inbound.push_back(RawFrame::new(wire));
        xcvr.inbound.push_back(RawFrame::new(vec![0xC0, 0xDB, 0x01, 0xC0]));

        let packets = xcvr.read().await;
        assert_eq!(packets.len(), 1, "the bad escape is dropped");
        assert_eq!(packets[0].source(), DataSource::Generated);
        assert_eq!(packets[0].pathway(), DataPathway::Wired);
        let stats = xcvr.core().stats();
        assert_eq!((stats.frames_in, stats.frames_dropped, stats.frames_uplinked), (2, 1, 1));
        assert_eq!(recorder.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn frames_get_receive_times_and_their_own_pathway() {
        let mut xcvr = Loopback::new(EndecChain::new());
        let lander = Utc::now() - chrono::Duration::seconds(3);
        xcvr.inbound.push_back(RawFrame {
            bytes: vec![0xFF, 241, 121, 233],
            pathway: Some(DataPathway::Wireless),
            lander_rx: Some(lander),
            amcc_rx: None,
        });
        let packets = xcvr.read().await;
        let packet = &packets[0];
        assert_eq!(packet.kind(), PacketKind::WatchdogHeartbeat);
        assert_eq!(packet.pathway(), DataPathway::Wireless);
        for payload in packet.payloads().iter() {
            let times = payload.downlink_times().expect("times");
            assert!(times.pmcc_rx.is_some());
            assert_eq!(times.lander_rx, Some(lander));
            assert_eq!(payload.pathway(), DataPathway::Wireless);
        }
    }

    #[tokio::test]
    async fn failed_open_leaves_the_transceiver_dormant() {
        let mut xcvr = Loopback::new(EndecChain::new());
        xcvr.fail_open = true;
        assert!(xcvr.begin().await.is_err());
        xcvr.inbound.push_back(RawFrame::new(vec![0xFF, 1, 2, 3]));
        assert!(xcvr.read().await.is_empty());
        assert_eq!(xcvr.inbound.len(), 1, "dormant transceivers do not touch the link");

        xcvr.fail_open = false;
        xcvr.begin().await.expect("reopen");
        assert_eq!(xcvr.read().await.len(), 1);
    }
}
