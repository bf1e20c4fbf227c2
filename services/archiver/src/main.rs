//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the IPC archiver."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use iris_gds_archive::{ArchiveMetrics, ArchiveSink};
use iris_gds_common::time::utc_now;
use iris_gds_common::{bootstrap, dump_metrics, new_registry, shutdown_signal, PipelineMetrics, ServiceArgs};
use iris_gds_ipc::{
    AppContext, AppManager, IpcPayload, Port, PortSide, SocketSpec, SocketTopicHandler,
    Topic, TopicHandler, TopicHandlerTable,
};
use parking_lot::Mutex;
use strum::IntoEnumIterator;
use tokio::sync::broadcast;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about = "Iris GDS IPC archiver", long_about = None)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,

    /// Directory for archive files, overriding `archive.directory`.
    #[arg(long, value_name = "DIR")]
    directory: Option<PathBuf>,
}

#[derive(Clone)]
struct Archiver {
    sink: Arc<Mutex<ArchiveSink>>,
}

#[async_trait]
impl TopicHandler for Archiver {
    async fn handle(&self, _ctx: &AppContext, payload: IpcPayload) -> iris_gds_ipc::Result<()> {
        if let Err(err) = self.sink.lock().archive(&payload, utc_now()) {
            error!(error = %err, "failed to archive payload");
        }
        Ok(())
    }
}

impl SocketTopicHandler for Archiver {
    fn handlers(&self) -> TopicHandlerTable {
        Topic::iter()
            .map(|topic| (topic, Arc::new(self.clone()) as Arc<dyn TopicHandler>))
            .collect()
    }
}

/// Log the interval summary every `archive.summary_interval`.
async fn summarise(
    sink: Arc<Mutex<ArchiveSink>>,
    mut shutdown: broadcast::Receiver<()>,
) -> iris_gds_ipc::Result<()> {
    let period = sink.lock().summary_interval();
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = interval.tick() => {
                sink.lock().flush_summary(utc_now());
            }
        }
    }
    Ok(())
}

fn sub_ports() -> Vec<Port> {
    Port::iter().filter(|port| port.side() == PortSide::Sub).collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = bootstrap("archiver", &cli.service)?;
    let mut config = loaded.config;
    if let Some(directory) = cli.directory {
        config.archive.directory = directory;
    }
    let app_name = cli.service.app_name("archiver");

    let registry = new_registry();
    let metrics = PipelineMetrics::new(&registry).context("failed to register metrics")?;
    let archive_metrics = ArchiveMetrics::new(&registry).context("failed to register archive metrics")?;
    let sink = ArchiveSink::create(&config.archive, utc_now())
        .with_context(|| format!("unable to start an archive in {}", config.archive.directory.display()))?
        .with_metrics(archive_metrics);
    let archiver = Archiver {
        sink: Arc::new(Mutex::new(sink)),
    };

    let specs: Vec<SocketSpec> = sub_ports()
        .into_iter()
        .map(|port| SocketSpec::new(port.to_string().to_lowercase(), port))
        .collect();
    let mut manager = AppManager::open_with_metrics(&app_name, &config.ipc, &specs, metrics)
        .await
        .context("failed to open IPC sockets")?;
    for spec in &specs {
        manager.attach(&spec.name, &archiver)?;
    }
    let summary_sink = archiver.sink.clone();
    manager.spawn("summary", move |_ctx, shutdown| summarise(summary_sink, shutdown));

    info!(app = %app_name, ports = ?sub_ports(), "archiver running");
    let outcome = manager.run_until(shutdown_signal()).await;

    {
        let mut sink = archiver.sink.lock();
        if let Err(err) = sink.flush() {
            error!(error = %err, "failed to flush the archive");
        }
        sink.flush_summary(utc_now());
        info!(path = %sink.path().display(), "archive closed");
    }
    dump_metrics(&registry, &config.metrics);
    outcome.context("archiver stopped with an error")
}
