//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "UL_PAYLOADS to UL_PACKET: pack, number, and validate uplink packets."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{DateTime, Utc};
use iris_gds_catalog::DataStandards;
use iris_gds_codec::{IrisCommonPacket, Packet, PacketKind, Payload, PayloadCollection, UplinkTimes};
use iris_gds_common::time::utc_now;
use iris_gds_common::{PipelineMetrics, UplinkConfig};
use iris_gds_ipc::messages::{UplinkPacketRequestMessage, UplinkPayloadsRequestMessage};
use tracing::{debug, info, warn};

use crate::packing::pack;
use crate::sequence::SequenceTracker;
use crate::{Result, UplinkError};

const METRICS_SOURCE: &str = "uplink";

/// Packets built for one request and what failed.
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkOutcome {
    /// Packets to publish, in payload order.
    pub packets: Vec<UplinkPacketRequestMessage>,
    /// Payload groups that could not be built.
    pub failed: usize,
}

/// Uplink packing stage.
#[derive(Debug)]
pub struct UplinkProcessor {
    standards: Arc<DataStandards>,
    use_seq_num: bool,
    sequences: SequenceTracker,
    metrics: Option<PipelineMetrics>,
}

impl UplinkProcessor {
    /// Processor over `standards`.
    pub fn new(standards: Arc<DataStandards>, config: &UplinkConfig) -> Self {
        Self {
            standards,
            use_seq_num: config.use_seq_num,
            sequences: SequenceTracker::new(),
            metrics: None,
        }
    }

    /// Count built and failed packets in `metrics`.
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sequence counters.
    pub fn sequences(&self) -> &SequenceTracker {
        &self.sequences
    }

    /// Process `request` at the current time.
    pub fn process(&mut self, request: UplinkPayloadsRequestMessage) -> UplinkOutcome {
        self.process_at(request, utc_now())
    }

    /// Process `request`, stamping commands generated at `now` when they
    /// carry no generation time yet.
    pub fn process_at(&mut self, request: UplinkPayloadsRequestMessage, now: DateTime<Utc>) -> UplinkOutcome {
        let UplinkPayloadsRequestMessage {
            payloads,
            split,
            packet_class,
            target_xcvr,
        } = request;
        let kind = packet_class.unwrap_or(PacketKind::IrisCommon);

        let mut outcome = UplinkOutcome {
            packets: Vec::new(),
            failed: 0,
        };
        for mut group in pack(payloads, split) {
            stamp_generated(&mut group, now);
            match self.build(kind, group) {
                Ok(packet) => {
                    debug!(class = %kind, seq = ?packet.seq_num(), "uplink packet built");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_packet(METRICS_SOURCE, &kind.to_string());
                    }
                    outcome.packets.push(UplinkPacketRequestMessage { packet, target_xcvr });
                }
                Err(err) => {
                    warn!(class = %kind, error = %err, "skipping payloads that could not be packed");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_drop(METRICS_SOURCE, "build_failed");
                    }
                    outcome.failed += 1;
                }
            }
        }
        info!(
            class = %kind,
            %split,
            target = %target_xcvr,
            built = outcome.packets.len(),
            failed = outcome.failed,
            "uplink request processed"
        );
        outcome
    }

    /// One packet of `kind` around `payloads`. The class counter only
    /// advances once the packet encodes.
    fn build(&mut self, kind: PacketKind, payloads: Vec<Payload>) -> Result<Packet> {
        if kind != PacketKind::IrisCommon {
            return Err(UplinkError::UnsupportedClass(kind));
        }
        let pathway = payloads.first().map(Payload::pathway).unwrap_or_default();
        let seq = if self.use_seq_num {
            self.sequences.peek(kind)
        } else {
            0
        };
        let mut packet: Packet = IrisCommonPacket::new(seq, PayloadCollection::from(payloads)).into();
        packet.set_pathway(pathway);
        packet.encode(&self.standards)?;
        self.sequences.advance(kind);
        Ok(packet)
    }
}

fn stamp_generated(payloads: &mut [Payload], now: DateTime<Utc>) {
    for payload in payloads {
        if let Payload::Command(command) = payload {
            let times = command.uplink_times.get_or_insert_with(UplinkTimes::default);
            times.generated.get_or_insert(now);
        }
    }
}
