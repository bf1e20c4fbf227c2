//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Prometheus counters for the packet and payload pipeline."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Registry shared between a service and the libraries it drives.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render the registry in the Prometheus text exposition format.
pub fn render_text(registry: &Registry) -> String {
    let mut buffer = Vec::new();
    if TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Counters describing packets, payloads and IPC traffic.
#[derive(Clone)]
pub struct PipelineMetrics {
    packets: IntCounterVec,
    packets_dropped: IntCounterVec,
    ipc_messages: IntCounterVec,
    payloads: IntCounterVec,
    meta_emissions: IntCounterVec,
}

impl PipelineMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let packets = IntCounterVec::new(
            Opts::new("iris_packets_total", "Packets decoded, by source and packet class"),
            &["source", "class"],
        )?;
        registry.register(Box::new(packets.clone()))?;

        let packets_dropped = IntCounterVec::new(
            Opts::new(
                "iris_packets_dropped_total",
                "Byte blocks or packets dropped, by source and reason",
            ),
            &["source", "reason"],
        )?;
        registry.register(Box::new(packets_dropped.clone()))?;

        let ipc_messages = IntCounterVec::new(
            Opts::new("iris_ipc_messages_total", "IPC envelopes by topic and direction"),
            &["topic", "direction"],
        )?;
        registry.register(Box::new(ipc_messages.clone()))?;

        let payloads = IntCounterVec::new(
            Opts::new("iris_payloads_total", "Payloads processed, by payload kind"),
            &["kind"],
        )?;
        registry.register(Box::new(payloads.clone()))?;

        let meta_emissions = IntCounterVec::new(
            Opts::new(
                "iris_meta_emissions_total",
                "Synthetic telemetry emitted by MetaChannels",
            ),
            &["channel"],
        )?;
        registry.register(Box::new(meta_emissions.clone()))?;

        Ok(Self {
            packets,
            packets_dropped,
            ipc_messages,
            payloads,
            meta_emissions,
        })
    }

    /// Metrics bound to a private registry, for components built without one.
    pub fn detached() -> Result<Self, prometheus::Error> {
        Self::new(&Registry::new())
    }

    pub fn record_packet(&self, source: &str, class: &str) {
        self.packets.with_label_values(&[source, class]).inc();
    }

    pub fn record_drop(&self, source: &str, reason: &str) {
        self.packets_dropped.with_label_values(&[source, reason]).inc();
    }

    pub fn record_ipc(&self, topic: &str, direction: &str) {
        self.ipc_messages.with_label_values(&[topic, direction]).inc();
    }

    pub fn record_payloads(&self, kind: &str, count: u64) {
        self.payloads.with_label_values(&[kind]).inc_by(count);
    }

    pub fn record_meta_emission(&self, channel: &str) {
        self.meta_emissions.with_label_values(&[channel]).inc();
    }

    pub fn packets_for(&self, source: &str, class: &str) -> u64 {
        self.packets.with_label_values(&[source, class]).get()
    }

    pub fn drops_for(&self, source: &str, reason: &str) -> u64 {
        self.packets_dropped.with_label_values(&[source, reason]).get()
    }
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_registered_and_rendered() {
        let registry = new_registry();
        let metrics = PipelineMetrics::new(&registry).expect("register");
        metrics.record_packet("pcap", "IrisCommonPacket");
        metrics.record_packet("pcap", "IrisCommonPacket");
        metrics.record_drop("serial", "slip");
        assert_eq!(metrics.packets_for("pcap", "IrisCommonPacket"), 2);
        assert_eq!(metrics.drops_for("serial", "slip"), 1);

        let text = render_text(&registry);
        assert!(text.contains("iris_packets_total"));
        assert!(text.contains("iris_packets_dropped_total"));
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = new_registry();
        PipelineMetrics::new(&registry).expect("first");
        assert!(PipelineMetrics::new(&registry).is_err());
    }
}
