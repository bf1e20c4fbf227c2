//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "DL_PACKETS to DL_PAYLOADS: flatten, stamp SCET, evaluate MetaChannels."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use iris_gds_catalog::DataStandards;
use iris_gds_codec::{Payload, PayloadCollection, PayloadKind};
use iris_gds_common::time::utc_now;
use iris_gds_common::{DownlinkConfig, PipelineMetrics};
use iris_gds_ipc::messages::{DownlinkedPacketsMessage, DownlinkedPayloadsMessage};
use strum::IntoEnumIterator;
use tracing::{debug, info};

use crate::meta::{Emission, MetaRuntime, Sample};
use crate::prebuilt::prebuilt_meta_modules;
use crate::timestamping::RoverTimeEstimator;
use crate::Result;

/// Outcome of one processed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedBatch {
    /// Downlinked payloads in packet order, then generated ones.
    pub payloads: PayloadCollection,
    /// Payloads that came from the packets.
    pub downlinked: usize,
    /// Payloads produced by MetaChannels.
    pub generated: usize,
}

impl ProcessedBatch {
    /// The batch as the message published on `DL_PAYLOADS`.
    pub fn into_message(self) -> DownlinkedPayloadsMessage {
        DownlinkedPayloadsMessage {
            payloads: self.payloads,
        }
    }
}

/// Build the MetaChannel runtime for a downlink process and register its
/// modules into `standards`. Without prebuilt modules the runtime is empty.
pub fn prepare_meta_runtime(
    standards: &mut DataStandards,
    include_prebuilt: bool,
    config: &DownlinkConfig,
) -> Result<MetaRuntime> {
    let modules = if include_prebuilt {
        prebuilt_meta_modules()?
    } else {
        Vec::new()
    };
    let runtime = MetaRuntime::new(modules, config.max_meta_depth);
    let added = runtime.register(standards)?;
    info!(
        modules = runtime.modules().len(),
        added,
        max_depth = runtime.max_depth(),
        "MetaChannel runtime ready"
    );
    Ok(runtime)
}

/// Downlink enrichment stage.
#[derive(Debug)]
pub struct DownlinkProcessor {
    standards: Arc<DataStandards>,
    meta: MetaRuntime,
    delay_est: Duration,
    log_events: bool,
    metrics: Option<PipelineMetrics>,
}

impl DownlinkProcessor {
    /// Processor over `standards`, which must already contain the modules
    /// of `meta`.
    pub fn new(standards: Arc<DataStandards>, meta: MetaRuntime, config: &DownlinkConfig) -> Self {
        Self {
            standards,
            meta,
            delay_est: config.delay_est,
            log_events: false,
            metrics: None,
        }
    }

    /// Count payloads and MetaChannel emissions in `metrics`.
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Log every event's formatted string at `info`.
    pub fn log_events(mut self, enabled: bool) -> Self {
        self.log_events = enabled;
        self
    }

    /// Catalog in use.
    pub fn standards(&self) -> &Arc<DataStandards> {
        &self.standards
    }

    /// Current downlink delay estimate.
    pub fn delay_est(&self) -> Duration {
        self.delay_est
    }

    /// Replace the downlink delay estimate for subsequent batches.
    pub fn set_delay_est(&mut self, delay_est: Duration) {
        debug!(?delay_est, "downlink delay estimate updated");
        self.delay_est = delay_est;
    }

    /// Process `message` at the current time.
    pub fn process(&mut self, message: DownlinkedPacketsMessage) -> ProcessedBatch {
        self.process_at(message, utc_now())
    }

    /// Process `message` as if received at `now`.
    pub fn process_at(&mut self, message: DownlinkedPacketsMessage, now: DateTime<Utc>) -> ProcessedBatch {
        let mut payloads: PayloadCollection = message
            .packets
            .into_iter()
            .flat_map(|packet| packet.into_payloads())
            .collect();

        RoverTimeEstimator::new(&payloads, now, self.delay_est).stamp(&mut payloads);

        let seeds: Vec<Sample> = payloads
            .telemetry()
            .filter_map(|t| Sample::from_payload(t, &self.standards))
            .collect();
        if self.log_events {
            for event in payloads.events() {
                info!(
                    event = event.name(&self.standards).as_deref().unwrap_or("<unknown>"),
                    "{}",
                    event.formatted_string(&self.standards)
                );
            }
        }

        let downlinked = payloads.len();
        let emissions = self.meta.evaluate(seeds, now);
        let generated = emissions.len();
        self.record(&payloads, &emissions);
        payloads.extend(emissions.into_iter().map(|e| Payload::from(e.payload)));

        debug!(downlinked, generated, "downlink batch processed");
        ProcessedBatch {
            payloads,
            downlinked,
            generated,
        }
    }

    /// Fire due `TIME_ONLY` channels at the current time.
    pub fn tick(&mut self) -> PayloadCollection {
        self.tick_at(utc_now())
    }

    /// Fire due `TIME_ONLY` channels as of `now`.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> PayloadCollection {
        let emissions = self.meta.tick(now);
        self.record(&PayloadCollection::new(), &emissions);
        emissions.into_iter().map(|e| Payload::from(e.payload)).collect()
    }

    fn record(&self, payloads: &PayloadCollection, emissions: &[Emission]) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        for kind in PayloadKind::iter() {
            let count = payloads.count(kind) as u64;
            if count > 0 {
                metrics.record_payloads(&kind.to_string(), count);
            }
        }
        for emission in emissions {
            metrics.record_meta_emission(&emission.channel);
        }
    }
}
