//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the downlink processor."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use iris_gds_catalog::load_standards;
use iris_gds_common::{bootstrap, dump_metrics, new_registry, shutdown_signal, PipelineMetrics, ServiceArgs};
use iris_gds_downlink::{prepare_meta_runtime, DownlinkProcessor};
use iris_gds_ipc::{
    AppContext, AppManager, DownlinkedPacketsMessage, DownlinkedPayloadsMessage, IpcPayload, Port,
    SocketSpec, SocketTopicHandler, Topic, TopicHandler, TopicHandlerTable,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

const SUB_SOCK: &str = "sub";
const PUB_SOCK: &str = "pub";
const GUI_SOCK: &str = "gui";
const META_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(author, version, about = "Iris GDS downlink processor", long_about = None)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,

    /// Also forward every DL_PACKETS message to the GUI port.
    #[arg(long)]
    full_packets: bool,

    /// Log every downlinked event's formatted text at info.
    #[arg(long)]
    events: bool,
}

#[derive(Clone)]
struct DownlinkApp {
    processor: Arc<Mutex<DownlinkProcessor>>,
    forward_packets: bool,
}

#[async_trait]
impl TopicHandler for DownlinkApp {
    async fn handle(&self, ctx: &AppContext, payload: IpcPayload) -> iris_gds_ipc::Result<()> {
        let message = DownlinkedPacketsMessage::try_from(ctx.decode(&payload)?)?;
        if self.forward_packets {
            ctx.send_to(GUI_SOCK, message.clone(), &payload.subtopic_bytes)?;
        }
        let batch = self.processor.lock().process(message);
        if batch.payloads.is_empty() {
            return Ok(());
        }
        debug!(
            downlinked = batch.downlinked,
            generated = batch.generated,
            "publishing downlinked payloads"
        );
        ctx.send_to(PUB_SOCK, batch.into_message(), &payload.subtopic_bytes)
    }
}

impl SocketTopicHandler for DownlinkApp {
    fn handlers(&self) -> TopicHandlerTable {
        let mut table = TopicHandlerTable::new();
        table.insert(Topic::DlPackets, Arc::new(self.clone()) as Arc<dyn TopicHandler>);
        table
    }
}

/// Offer time ticks to TIME_ONLY MetaChannels until shutdown.
async fn tick_meta(
    processor: Arc<Mutex<DownlinkProcessor>>,
    ctx: AppContext,
    mut shutdown: broadcast::Receiver<()>,
) -> iris_gds_ipc::Result<()> {
    let mut interval = tokio::time::interval(META_TICK);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = interval.tick() => {
                let payloads = processor.lock().tick();
                if !payloads.is_empty() {
                    ctx.send_to(PUB_SOCK, DownlinkedPayloadsMessage { payloads }, b"")?;
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = bootstrap("dl-processor", &cli.service)?;
    let config = loaded.config;
    let app_name = cli.service.app_name("dl-processor");

    let registry = new_registry();
    let metrics = PipelineMetrics::new(&registry).context("failed to register metrics")?;

    let mut standards = load_standards(&config.catalog).context("failed to load the catalog")?;
    let meta = prepare_meta_runtime(&mut standards, config.catalog.include_prebuilt_meta, &config.dl)
        .context("failed to register MetaModules")?;
    let processor = DownlinkProcessor::new(Arc::new(standards), meta, &config.dl)
        .with_metrics(metrics.clone())
        .log_events(cli.events);
    let app = DownlinkApp {
        processor: Arc::new(Mutex::new(processor)),
        forward_packets: cli.full_packets,
    };

    let mut specs = vec![
        SocketSpec::new(SUB_SOCK, Port::TransceiverSub).subscribing(&[Topic::DlPackets, Topic::AppControl]),
        SocketSpec::new(PUB_SOCK, Port::TransceiverPub),
    ];
    if cli.full_packets {
        specs.push(SocketSpec::new(GUI_SOCK, Port::GuiPub));
    }
    let mut manager = AppManager::open_with_metrics(&app_name, &config.ipc, &specs, metrics)
        .await
        .context("failed to open IPC sockets")?;
    manager.attach(SUB_SOCK, &app)?;
    let ticking = app.processor.clone();
    manager.spawn("meta-tick", move |ctx, shutdown| tick_meta(ticking, ctx, shutdown));

    info!(app = %app_name, full_packets = cli.full_packets, events = cli.events, "downlink processor running");
    let outcome = manager.run_until(shutdown_signal()).await;
    dump_metrics(&registry, &config.metrics);
    outcome.context("downlink processor stopped with an error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from(["iris-dl-processor", "--full-packets", "--events", "--name", "dl-2"]);
        assert!(cli.full_packets && cli.events);
        assert_eq!(cli.service.app_name("dl-processor"), "dl-2");
    }
}
