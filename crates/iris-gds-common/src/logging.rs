//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Tracing bootstrap with a size-rotating per-process log file."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use walkdir::WalkDir;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "IBv3_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available stdout log formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Initialize the tracing subscriber for one GDS process.
///
/// * `IBv3_LOG` overrides the filter (e.g. `info`, `debug,iris_gds_ipc=trace`).
///   When unset `RUST_LOG` is honoured, finally falling back to
///   `config.level`.
/// * stdout receives structured JSON by default; a JSON file named
///   `{prefix}-{service}.log` is written through a [`SizeRotatingWriter`].
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    fs::create_dir_all(&config.directory)?;
    let prefix = config.file_prefix.clone().unwrap_or_else(|| "iris".to_owned());

    let file_writer = SizeRotatingWriter::open(
        &config.directory,
        &format!("{}-{}", prefix, service_name),
        config.max_file_bytes,
        config.max_files,
    )?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_writer);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(io::stdout());

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); using configured level {}",
                LOG_ENV, err, config.level
            );
            EnvFilter::new(&config.level)
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level)),
    };

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(service = %service_name, log_dir = %config.directory.display(), format = ?config.format, "tracing initialised");
    Ok(())
}

/// Appends to `{dir}/{stem}.log` and rolls it over to
/// `{stem}.log.{n}` once it exceeds `max_bytes`, keeping `max_files`
/// rollovers.
pub struct SizeRotatingWriter {
    directory: PathBuf,
    stem: String,
    max_bytes: u64,
    max_files: usize,
    file: File,
    written: u64,
    next_index: u64,
}

impl SizeRotatingWriter {
    pub fn open(directory: &Path, stem: &str, max_bytes: u64, max_files: usize) -> io::Result<Self> {
        fs::create_dir_all(directory)?;
        let active = directory.join(format!("{stem}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&active)?;
        let written = file.metadata()?.len();
        let next_index = rollover_indices(directory, stem)
            .into_iter()
            .max()
            .map(|idx| idx + 1)
            .unwrap_or(1);
        Ok(Self {
            directory: directory.to_path_buf(),
            stem: stem.to_owned(),
            max_bytes: max_bytes.max(1),
            max_files: max_files.max(1),
            file,
            written,
            next_index,
        })
    }

    fn active_path(&self) -> PathBuf {
        self.directory.join(format!("{}.log", self.stem))
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let rolled = self
            .directory
            .join(format!("{}.log.{}", self.stem, self.next_index));
        fs::rename(self.active_path(), rolled)?;
        self.next_index += 1;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active_path())?;
        self.written = 0;
        self.prune()
    }

    fn prune(&self) -> io::Result<()> {
        let mut indices = rollover_indices(&self.directory, &self.stem);
        if indices.len() <= self.max_files {
            return Ok(());
        }
        indices.sort_unstable();
        let excess = indices.len() - self.max_files;
        for idx in indices.into_iter().take(excess) {
            fs::remove_file(self.directory.join(format!("{}.log.{}", self.stem, idx)))?;
        }
        Ok(())
    }
}

fn rollover_indices(directory: &Path, stem: &str) -> Vec<u64> {
    let prefix = format!("{stem}.log.");
    WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(&prefix))
                .and_then(|suffix| suffix.parse::<u64>().ok())
        })
        .collect()
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_when_size_exceeded_and_prunes_oldest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = SizeRotatingWriter::open(dir.path(), "iris-test", 16, 2).expect("open");
        for _ in 0..5 {
            writer.write_all(b"0123456789abcdef").expect("write");
        }
        writer.flush().expect("flush");

        let mut rolled = rollover_indices(dir.path(), "iris-test");
        rolled.sort_unstable();
        assert_eq!(rolled, vec![3, 4]);
        assert!(dir.path().join("iris-test.log").exists());
    }

    #[test]
    fn reopening_continues_rollover_numbering() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let mut writer = SizeRotatingWriter::open(dir.path(), "svc", 4, 10).expect("open");
            writer.write_all(b"aaaa").expect("write");
            writer.write_all(b"bbbb").expect("write");
        }
        let writer = SizeRotatingWriter::open(dir.path(), "svc", 4, 10).expect("reopen");
        assert_eq!(writer.next_index, 2);
    }
}
