//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the uplink processor."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use iris_gds_catalog::load_standards;
use iris_gds_common::{bootstrap, dump_metrics, new_registry, PipelineMetrics, ServiceArgs, UplinkConfig};
use iris_gds_ipc::{
    AppManagerSync, IpcError, Port, SocketSpec, Topic, UplinkPayloadsRequestMessage,
};
use iris_gds_uplink::UplinkProcessor;
use tracing::{info, warn};

const SUB_SOCK: &str = "sub";
const PUB_SOCK: &str = "pub";

#[derive(Debug, Parser)]
#[command(author, version, about = "Iris GDS uplink processor", long_about = None)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,

    /// Put the per-class sequence number on the wire instead of 0.
    #[arg(long)]
    use_seq_num: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = bootstrap("ul-processor", &cli.service)?;
    let config = loaded.config;
    let app_name = cli.service.app_name("ul-processor");

    let registry = new_registry();
    let metrics = PipelineMetrics::new(&registry).context("failed to register metrics")?;
    let standards = load_standards(&config.catalog).context("failed to load the catalog")?;
    let ul = UplinkConfig {
        use_seq_num: cli.use_seq_num || config.ul.use_seq_num,
    };
    let mut processor = UplinkProcessor::new(Arc::new(standards), &ul).with_metrics(metrics.clone());

    let specs = [
        SocketSpec::new(SUB_SOCK, Port::TransceiverSub).subscribing(&[Topic::UlPayloads, Topic::AppControl]),
        SocketSpec::new(PUB_SOCK, Port::TransceiverPub),
    ];
    let mut manager = AppManagerSync::open_with_metrics(&app_name, &config.ipc, &specs, metrics)
        .context("failed to open IPC sockets")?;
    manager.install_signal_handler();
    info!(app = %app_name, use_seq_num = ul.use_seq_num, "uplink processor running");

    let outcome = loop {
        let payload = match manager.read(SUB_SOCK) {
            Ok(payload) => payload,
            Err(err) if err.is_end_app_request() => break Ok(()),
            Err(err @ IpcError::Closed(_)) => break Err(err),
            Err(err) => {
                warn!(error = %err, "dropping unreadable payload");
                continue;
            }
        };
        if payload.topic() != Some(Topic::UlPayloads) {
            continue;
        }
        let request = match manager
            .decode(&payload)
            .and_then(UplinkPayloadsRequestMessage::try_from)
        {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "dropping undecodable uplink request");
                continue;
            }
        };
        for message in processor.process(request).packets {
            if let Err(err) = manager.send_to(PUB_SOCK, message, &payload.subtopic_bytes) {
                warn!(error = %err, "failed to publish uplink packet");
            }
        }
    };

    manager.close();
    dump_metrics(&registry, &config.metrics);
    outcome.context("uplink processor stopped with an error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_opt_in() {
        assert!(!Cli::parse_from(["iris-ul-processor"]).use_seq_num);
        assert!(Cli::parse_from(["iris-ul-processor", "--use-seq-num"]).use_seq_num);
    }
}
