//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the IPC topic proxy."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use clap::Parser;
use iris_gds_common::{bootstrap, shutdown_signal, ServiceArgs};
use iris_gds_ipc::{Port, SocketOptions, TopicProxy};
use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about = "Iris GDS topic proxy", long_about = None)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,

    /// Publisher-side port publishers connect to (name or number).
    #[arg(long, value_parser = parse_port, default_value = "TRANSCEIVER_PUB")]
    inbound_pub_port: Port,

    /// Subscriber-side port subscribers connect to (name or number).
    #[arg(long, value_parser = parse_port, default_value = "TRANSCEIVER_SUB")]
    outbound_sub_port: Port,
}

fn parse_port(value: &str) -> Result<Port, String> {
    if let Ok(number) = value.parse::<u16>() {
        return Port::from_number(number).ok_or_else(|| format!("{number} is not a GDS port"));
    }
    value
        .parse::<Port>()
        .map_err(|_| format!("`{value}` is not a GDS port name"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = bootstrap("topic-proxy", &cli.service)?;
    let ipc = &loaded.config.ipc;

    let proxy = TopicProxy::for_ports(
        &ipc.host,
        cli.inbound_pub_port,
        cli.outbound_sub_port,
        SocketOptions::from_config(ipc),
    )
    .await
    .with_context(|| {
        format!(
            "unable to bind {} and {}",
            cli.inbound_pub_port, cli.outbound_sub_port
        )
    })?;
    info!(
        inbound = %proxy.inbound_addr(),
        outbound = %proxy.outbound_addr(),
        "topic proxy running"
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let forwarding = tokio::spawn(proxy.run(shutdown_rx));
    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    let forwarded = forwarding.await.context("proxy task panicked")??;
    info!(forwarded, "topic proxy exited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_parse_by_name_or_number() {
        assert_eq!(parse_port("9002"), Ok(Port::ProcessorsPub));
        assert_eq!(parse_port("gui_sub"), Ok(Port::GuiSub));
        assert!(parse_port("8080").is_err());
        assert!(parse_port("NOPE").is_err());
    }

    #[test]
    fn cli_requires_nothing_but_accepts_ports() {
        let cli = Cli::parse_from([
            "iris-topic-proxy",
            "--inbound-pub-port",
            "MAIN_PUB",
            "--outbound-sub-port",
            "9007",
        ]);
        assert_eq!(cli.inbound_pub_port, Port::MainPub);
        assert_eq!(cli.outbound_sub_port, Port::MainSub);
    }
}
