//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Operator CLI for catalog caches, bus ports, and topics."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as subscriber_fmt, Registry};

mod catalog;
mod ports;
mod topics;

#[derive(Debug, Parser)]
#[command(author, version, about = "Iris GDS operator utility", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand, about = "Build and inspect catalog caches")]
    Catalog(catalog::CatalogCommand),
    #[command(subcommand, about = "Find and stop processes holding GDS ports")]
    Ports(ports::PortsCommand),
    #[command(about = "Print the topic table and check tag prefix-freeness")]
    Topics,
}

fn init_logging() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Catalog(cmd) => catalog::run(cmd)?,
        Commands::Ports(cmd) => ports::run(cmd)?,
        Commands::Topics => topics::run()?,
    }
    Ok(())
}
