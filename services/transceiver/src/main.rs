//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for a transceiver process."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use iris_gds_catalog::load_standards;
use iris_gds_common::{bootstrap, dump_metrics, new_registry, shutdown_signal, PipelineMetrics, ServiceArgs};
use iris_gds_ipc::{
    AppContext, AppManager, DownlinkedPacketsMessage, IpcPayload, Port, SocketSpec,
    SocketTopicHandler, Topic, TopicHandler, TopicHandlerTable, UplinkPacketRequestMessage,
    XcvrCommand, XcvrControlMessage,
};
use iris_gds_transceiver::{build_xcvr_by_name, Transceiver, XcvrArgs};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

const SUB_SOCK: &str = "sub";
const PUB_SOCK: &str = "pub";

#[derive(Debug, Parser)]
#[command(author, version, about = "Iris GDS transceiver", long_about = None)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,

    /// Prebuilt transceiver to run (e.g. PCAP_GENERIC, SERIAL, YAMCS).
    #[arg(short = 'n', long)]
    xcvr_name: String,

    /// YAML file with overrides for the prebuilt transceiver.
    #[arg(short = 'x', long, value_name = "FILE")]
    xcvr_args_yaml: Option<PathBuf>,
}

#[derive(Clone)]
struct Link {
    xcvr: Arc<Mutex<Box<dyn Transceiver>>>,
    paused: Arc<AtomicBool>,
    name: String,
}

impl Link {
    async fn uplink(&self, ctx: &AppContext, payload: &IpcPayload) -> iris_gds_ipc::Result<()> {
        let request = UplinkPacketRequestMessage::try_from(ctx.decode(payload)?)?;
        if !request.target_xcvr.includes(&self.name) {
            return Ok(());
        }
        if let Err(err) = self.xcvr.lock().await.send_packet(&request.packet).await {
            warn!(xcvr = %self.name, error = %err, "uplink failed");
        }
        Ok(())
    }

    async fn control(&self, ctx: &AppContext, payload: &IpcPayload) -> iris_gds_ipc::Result<()> {
        let control = XcvrControlMessage::try_from(ctx.decode(payload)?)?;
        if !control.target_xcvr.includes(&self.name) {
            return Ok(());
        }
        info!(xcvr = %self.name, command = %control.command, "transceiver control");
        match control.command {
            XcvrCommand::Begin | XcvrCommand::Restart => {
                self.paused.store(false, Ordering::SeqCst);
                // A failed begin is logged by the transceiver, which goes dormant.
                let _ = self.xcvr.lock().await.begin().await;
            }
            XcvrCommand::Pause => self.paused.store(true, Ordering::SeqCst),
            XcvrCommand::Resume => self.paused.store(false, Ordering::SeqCst),
        }
        Ok(())
    }
}

#[async_trait]
impl TopicHandler for Link {
    async fn handle(&self, ctx: &AppContext, payload: IpcPayload) -> iris_gds_ipc::Result<()> {
        match payload.topic() {
            Some(Topic::UlPacket) => self.uplink(ctx, &payload).await,
            Some(Topic::XcvrControl) => self.control(ctx, &payload).await,
            _ => Ok(()),
        }
    }
}

impl SocketTopicHandler for Link {
    fn handlers(&self) -> TopicHandlerTable {
        let handler = Arc::new(self.clone()) as Arc<dyn TopicHandler>;
        [Topic::UlPacket, Topic::XcvrControl]
            .into_iter()
            .map(|topic| (topic, handler.clone()))
            .collect()
    }
}

/// Publish every packet read from the link until shutdown.
async fn downlink(
    link: Link,
    ctx: AppContext,
    mut shutdown: broadcast::Receiver<()>,
    idle: std::time::Duration,
) -> iris_gds_ipc::Result<()> {
    loop {
        let packets = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            packets = async {
                if link.paused.load(Ordering::SeqCst) {
                    Vec::new()
                } else {
                    link.xcvr.lock().await.read().await
                }
            } => packets,
        };
        if packets.is_empty() {
            tokio::time::sleep(idle).await;
            continue;
        }
        ctx.send_to(PUB_SOCK, DownlinkedPacketsMessage { packets }, link.name.as_bytes())?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = bootstrap("transceiver", &cli.service)?;
    let config = loaded.config;

    let registry = new_registry();
    let metrics = PipelineMetrics::new(&registry).context("failed to register metrics")?;
    let standards = Arc::new(load_standards(&config.catalog).context("failed to load the catalog")?);
    let args = match &cli.xcvr_args_yaml {
        Some(path) => XcvrArgs::from_yaml_file(path)?,
        None => XcvrArgs::default(),
    };
    let mut xcvr = build_xcvr_by_name(&cli.xcvr_name, &args, &config.xcvr, standards)
        .with_context(|| format!("unable to build transceiver {}", cli.xcvr_name))?;
    xcvr.core_mut().set_metrics(metrics.clone());
    if let Err(err) = xcvr.begin().await {
        warn!(error = %err, "transceiver is dormant until restarted");
    }

    let name = xcvr.core().name().to_owned();
    let app_name = cli.service.app_name(&format!("xcvr-{name}"));
    let link = Link {
        xcvr: Arc::new(Mutex::new(xcvr)),
        paused: Arc::new(AtomicBool::new(false)),
        name,
    };

    let specs = [
        SocketSpec::new(SUB_SOCK, Port::TransceiverSub).subscribing(&[
            Topic::UlPacket,
            Topic::XcvrControl,
            Topic::AppControl,
        ]),
        SocketSpec::new(PUB_SOCK, Port::TransceiverPub),
    ];
    let mut manager = AppManager::open_with_metrics(&app_name, &config.ipc, &specs, metrics)
        .await
        .context("failed to open IPC sockets")?;
    manager.attach(SUB_SOCK, &link)?;
    let reader = link.clone();
    let idle = config.ipc.poll_interval;
    manager.spawn("downlink", move |ctx, shutdown| downlink(reader, ctx, shutdown, idle));

    info!(app = %app_name, xcvr = %link.name, "transceiver running");
    let outcome = manager.run_until(shutdown_signal()).await;
    dump_metrics(&registry, &config.metrics);
    outcome.context("transceiver stopped with an error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_transceiver_name_is_required() {
        assert!(Cli::try_parse_from(["iris-transceiver"]).is_err());
        let cli = Cli::parse_from(["iris-transceiver", "-n", "PCAP_GENERIC", "-x", "args.yaml"]);
        assert_eq!(cli.xcvr_name, "PCAP_GENERIC");
        assert_eq!(cli.xcvr_args_yaml, Some(PathBuf::from("args.yaml")));
    }
}
