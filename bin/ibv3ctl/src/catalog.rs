//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Catalog build and inspect subcommands."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use iris_gds_catalog::{build, cache, load_cache, DataStandards};
use iris_gds_common::CatalogConfig;
use tracing::info;

/// Dispatch entry point for catalog subcommands.
pub fn run(command: CatalogCommand) -> Result<()> {
    match command {
        CatalogCommand::Build(cmd) => cmd.execute(),
        CatalogCommand::Inspect(cmd) => cmd.execute(),
    }
}

#[derive(Debug, Subcommand)]
pub enum CatalogCommand {
    /// Build the catalog from an F Prime XML tree and cache it.
    Build(BuildCommand),
    /// Load a cache and print what it holds.
    Inspect(InspectCommand),
}

#[derive(Debug, Args)]
pub struct BuildCommand {
    /// Root of the XML tree.
    #[arg(long, value_name = "DIR")]
    root: PathBuf,

    /// Topology file relative to the root; discovered when omitted.
    #[arg(long, value_name = "FILE")]
    topology: Option<String>,

    /// Leave out the ground-defined modules.
    #[arg(long)]
    no_prebuilts: bool,

    /// Directory for the cache file.
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Base name of the cache file.
    #[arg(long, value_name = "BASE")]
    name: Option<String>,

    /// Write `{name}.ibds` instead of a ULID-suffixed file.
    #[arg(long)]
    no_ulid: bool,
}

impl BuildCommand {
    fn execute(self) -> Result<()> {
        let defaults = CatalogConfig::default();
        let cache_dir = self.cache_dir.unwrap_or(defaults.cache_dir);
        let name = self.name.unwrap_or(defaults.cache_name);
        let path = build_and_cache(
            &self.root,
            self.topology.as_deref(),
            !self.no_prebuilts,
            &cache_dir,
            &name,
            !self.no_ulid,
        )?;
        println!("{}", path.display());
        Ok(())
    }
}

fn build_and_cache(
    root: &Path,
    topology: Option<&str>,
    include_prebuilts: bool,
    cache_dir: &Path,
    name: &str,
    ulid: bool,
) -> Result<PathBuf> {
    let standards = build(root, topology, include_prebuilts)
        .with_context(|| format!("failed to build the catalog from {}", root.display()))?;
    let path = cache(&standards, cache_dir, name, ulid)
        .with_context(|| format!("failed to write a cache into {}", cache_dir.display()))?;
    info!(cache = %path.display(), summary = %standards.summary(), "catalog cached");
    Ok(path)
}

#[derive(Debug, Args)]
pub struct InspectCommand {
    /// Cache file to load.
    #[arg(long, value_name = "FILE", conflicts_with = "name")]
    file: Option<PathBuf>,

    /// Load the newest cache with this base name from the cache directory.
    #[arg(long, value_name = "BASE")]
    name: Option<String>,

    /// Directory searched with `--name`.
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Also list every module.
    #[arg(long)]
    modules: bool,
}

impl InspectCommand {
    fn execute(self) -> Result<()> {
        let defaults = CatalogConfig::default();
        let standards = match &self.file {
            Some(file) => {
                let dir = file.parent().unwrap_or_else(|| Path::new("."));
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                load_cache(dir, &name)
            }
            None => {
                let dir = self.cache_dir.unwrap_or(defaults.cache_dir);
                load_cache(&dir, self.name.as_deref().unwrap_or(&defaults.cache_name))
            }
        }
        .context("failed to load the catalog cache")?;
        print!("{}", render(&standards, self.modules));
        Ok(())
    }
}

fn render(standards: &DataStandards, modules: bool) -> String {
    let mut out = format!("catalog {}\n{}\n", standards.version, standards.summary());
    if modules {
        for module in standards.modules.values() {
            out.push_str(&format!(
                "  0x{:04X} {:<28} {:>3} commands {:>4} channels {:>3} events{}\n",
                module.id,
                module.name,
                module.commands.len(),
                module.telemetry.len(),
                module.events.len(),
                if module.is_meta { " (meta)" } else { "" }
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_gds_catalog::fixtures;

    #[test]
    fn build_then_inspect_round_trips_through_the_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = build_and_cache(&fixtures::fprime_root(), None, true, dir.path(), "ops", false)
            .expect("build");
        assert_eq!(path, dir.path().join("ops.ibds"));

        let loaded = load_cache(dir.path(), "ops").expect("load");
        let text = render(&loaded, true);
        assert!(text.contains(&loaded.summary().to_string()));
        assert!(text.contains("Navigation"));
    }
}
