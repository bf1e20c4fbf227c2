//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay of archived lander parameter timeseries."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Archive replay. The archive is a CSV timeseries: a `time` column in
//! RFC 3339 UTC, then one column per qualified lander parameter. Iris
//! telemetry columns hold hex packet bytes; housekeeping columns hold
//! engineering values. Empty cells mean no sample in that row.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use iris_gds_catalog::DataStandards;
use iris_gds_codec::{DataPathway, DataSource, Packet, Value};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{RawFrame, Transceiver, TransceiverCore};
use crate::endec::EndecChain;
use crate::lander::{self, LanderSample};
use crate::{Result, TransceiverError};

/// Longest a read waits for the next row.
const MAX_WAIT: Duration = Duration::from_secs(1);
/// Idle wait once a non-looping archive is exhausted.
const EXHAUSTED_WAIT: Duration = Duration::from_secs(5);
/// Lead-in kept before the first Iris telemetry when jumping to it.
const IRIS_LEAD_IN_SECS: i64 = 5;

/// How an archive is windowed and paced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveOpts {
    /// Archive to replay.
    pub archive_file: PathBuf,
    /// Archive seconds per wall-clock second.
    #[serde(default = "default_playback_speed")]
    pub playback_speed: f64,
    /// Start over at the end of the archive.
    #[serde(default = "default_true", rename = "loop")]
    pub loop_replay: bool,
    /// Drop rows before this time.
    #[serde(default)]
    pub start_time_utc: Option<DateTime<Utc>>,
    /// Drop rows after this time.
    #[serde(default)]
    pub end_time_utc: Option<DateTime<Utc>>,
    /// Start shortly before the first Iris telemetry in the window.
    #[serde(default = "default_true")]
    pub jump_to_iris: bool,
    /// Treat row times as reception times as well as generation times.
    #[serde(default = "default_true")]
    pub rx_is_generation_time: bool,
}

fn default_playback_speed() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl ArchiveOpts {
    /// Default options for `archive_file`.
    pub fn new(archive_file: impl Into<PathBuf>) -> Self {
        Self {
            archive_file: archive_file.into(),
            playback_speed: default_playback_speed(),
            loop_replay: true,
            start_time_utc: None,
            end_time_utc: None,
            jump_to_iris: true,
            rx_is_generation_time: true,
        }
    }
}

/// One archive row with its non-empty cells.
#[derive(Debug, Clone, PartialEq)]
struct Row {
    time: DateTime<Utc>,
    cells: Vec<(String, String)>,
}

impl Row {
    fn has_iris_telemetry(&self) -> bool {
        self.cells.iter().any(|(name, _)| lander::iris_pathway(name).is_some())
    }
}

fn archive_error(path: &Path, message: impl std::fmt::Display) -> TransceiverError {
    TransceiverError::Connection(format!("archive {}: {message}", path.display()))
}

fn load_rows(path: &Path) -> Result<Vec<Row>> {
    let file = File::open(path).map_err(|err| archive_error(path, err))?;
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
    let headers = reader.headers().map_err(|err| archive_error(path, err))?.clone();
    let time_col = headers
        .iter()
        .position(|h| h == "time")
        .ok_or_else(|| archive_error(path, "no `time` column"))?;

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|err| archive_error(path, err))?;
        let stamp = record.get(time_col).unwrap_or_default();
        let time = match DateTime::parse_from_rfc3339(stamp) {
            Ok(time) => time.with_timezone(&Utc),
            Err(err) => {
                warn!(row = index + 1, stamp, error = %err, "skipping archive row with a bad time");
                continue;
            }
        };
        let cells = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(col, (_, cell))| *col != time_col && !cell.trim().is_empty())
            .map(|(_, (name, cell))| (name.to_owned(), cell.trim().to_owned()))
            .collect();
        rows.push(Row { time, cells });
    }
    rows.sort_by_key(|row| row.time);
    Ok(rows)
}

fn window(rows: Vec<Row>, opts: &ArchiveOpts) -> Vec<Row> {
    let mut rows: Vec<_> = rows
        .into_iter()
        .filter(|r| opts.start_time_utc.map_or(true, |start| r.time >= start))
        .filter(|r| opts.end_time_utc.map_or(true, |end| r.time <= end))
        .collect();
    if opts.jump_to_iris {
        let iris: Vec<_> = rows.iter().filter(|r| r.has_iris_telemetry()).map(|r| r.time).collect();
        match (iris.first(), iris.last()) {
            (Some(&first), Some(&last)) => {
                info!(from = %first, to = %last, span = %(last - first), "Iris telemetry span");
                let start = first - chrono::Duration::seconds(IRIS_LEAD_IN_SECS);
                rows.retain(|r| r.time >= start);
            }
            _ => info!("no Iris telemetry in the archive window"),
        }
    }
    rows
}

/// Engineering value of a housekeeping cell.
fn cell_value(cell: &str) -> Value {
    if let Ok(v) = cell.parse::<i64>() {
        return Value::Int(v);
    }
    if let Ok(v) = cell.parse::<f64>() {
        return Value::Float(v);
    }
    match cell.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Text(cell.to_owned()),
    }
}

/// Replays an archived lander parameter timeseries in archive time.
pub struct ArchiveTransceiver {
    core: TransceiverCore,
    opts: ArchiveOpts,
    rows: Vec<Row>,
    head: usize,
    started: Instant,
    lander: Vec<LanderSample>,
}

impl ArchiveTransceiver {
    /// Replay of `opts.archive_file`.
    pub fn new(opts: ArchiveOpts, endecs: EndecChain, standards: Arc<DataStandards>) -> Self {
        Self {
            core: TransceiverCore::new(
                "archive",
                standards,
                endecs,
                DataPathway::None,
                DataSource::Archive,
            ),
            opts,
            rows: Vec::new(),
            head: 0,
            started: Instant::now(),
            lander: Vec::new(),
        }
    }

    fn restart(&mut self) {
        self.head = 0;
        self.started = Instant::now();
    }

    /// Archive time the replay has reached.
    fn archive_now(&self, origin: DateTime<Utc>) -> DateTime<Utc> {
        let elapsed = self.started.elapsed().as_secs_f64() * self.opts.playback_speed;
        origin + chrono::Duration::microseconds((elapsed * 1e6) as i64)
    }

    fn split_row(&mut self, row: Row) -> Vec<RawFrame> {
        let reception = self.opts.rx_is_generation_time.then_some(row.time);
        let mut frames = Vec::new();
        for (name, cell) in row.cells {
            if let Some(pathway) = lander::iris_pathway(&name) {
                match hex::decode(cell.trim_start_matches("0x")) {
                    Ok(bytes) => frames.push(RawFrame {
                        bytes,
                        pathway: Some(pathway),
                        lander_rx: Some(row.time),
                        amcc_rx: reception,
                    }),
                    Err(err) => warn!(param = %name, time = %row.time, error = %err, "Iris telemetry cell is not hex"),
                }
            } else {
                self.lander.push(LanderSample {
                    value: cell_value(&cell),
                    name,
                    generation_time: Some(row.time),
                    reception_time: reception,
                });
            }
        }
        frames
    }
}

#[async_trait]
impl Transceiver for ArchiveTransceiver {
    fn core(&self) -> &TransceiverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TransceiverCore {
        &mut self.core
    }

    async fn open(&mut self) -> Result<()> {
        info!(opts = ?self.opts, "loading archive");
        let rows = load_rows(&self.opts.archive_file)?;
        let total = rows.len();
        self.rows = window(rows, &self.opts);
        info!(rows = self.rows.len(), total, "archive loaded");
        self.lander.clear();
        self.restart();
        Ok(())
    }

    /// Iris frames of every row now due. Housekeeping cells of those rows
    /// are held for [`downlink_packets`](Transceiver::downlink_packets).
    async fn downlink(&mut self) -> Result<Vec<RawFrame>> {
        if self.head >= self.rows.len() {
            if self.opts.loop_replay && !self.rows.is_empty() {
                debug!("looping archive");
                self.restart();
            } else {
                tokio::time::sleep(EXHAUSTED_WAIT).await;
                return Ok(Vec::new());
            }
        }
        let origin = self.rows[0].time;
        let next = self.rows[self.head].time;
        let wait = (next - self.archive_now(origin)).to_std().unwrap_or_default();
        if !wait.is_zero() {
            tokio::time::sleep(wait.min(MAX_WAIT)).await;
        }
        let now = self.archive_now(origin);
        let due = self.rows[self.head..].iter().take_while(|r| r.time <= now).count();
        let rows: Vec<_> = self.rows[self.head..self.head + due].to_vec();
        self.head += due;
        Ok(rows.into_iter().flat_map(|row| self.split_row(row)).collect())
    }

    async fn downlink_packets(&mut self) -> Result<Vec<Packet>> {
        let frames = self.downlink().await?;
        let mut packets = self.core.process_frames(frames);
        let samples = std::mem::take(&mut self.lander);
        if !samples.is_empty() {
            let reception = samples.first().and_then(|s| s.reception_time);
            let generation = samples.first().and_then(|s| s.generation_time);
            if let Some(packet) = lander::peregrine_packet(self.core.standards(), samples) {
                packets.push(self.core.finish_packet(
                    packet,
                    Some(DataPathway::None),
                    generation,
                    reception,
                ));
            }
        }
        Ok(packets)
    }

    async fn uplink(&mut self, bytes: &[u8]) -> Result<()> {
        debug!(len = bytes.len(), "replaying an archive, uplinked bytes are discarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_gds_catalog::fixtures;
    use iris_gds_codec::PacketKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FET: &str = "/Peregrine/PL1/LSS1_Derived/LSS1_HK_Derived/Iris_Operational_EnabledFet";

    fn archive(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("tmp");
        writeln!(file, "time,{FET},{}", lander::IRIS_TM_WLAN).expect("header");
        for line in lines {
            writeln!(file, "{line}").expect("row");
        }
        file.flush().expect("flush");
        file
    }

    #[test]
    fn jump_to_iris_keeps_five_seconds_of_lead_in() {
        let file = archive(&[
            "2024-01-08T00:00:00Z,DISABLED,",
            "2024-01-08T00:00:56Z,ENABLED,",
            "2024-01-08T00:01:00Z,,fff179e9",
            "2024-01-08T00:01:30Z,ENABLED,fff179e9",
        ]);
        let rows = window(load_rows(file.path()).expect("rows"), &ArchiveOpts::new(file.path()));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].time.to_rfc3339(), "2024-01-08T00:00:56+00:00");

        let mut opts = ArchiveOpts::new(file.path());
        opts.end_time_utc = Some("2024-01-08T00:00:30Z".parse().expect("time"));
        let rows = window(load_rows(file.path()).expect("rows"), &opts);
        assert_eq!(rows.len(), 1, "no Iris telemetry leaves the window alone");
    }

    #[test]
    fn cells_parse_to_the_narrowest_value() {
        assert_eq!(cell_value("3"), Value::Int(3));
        assert_eq!(cell_value("-1.5"), Value::Float(-1.5));
        assert_eq!(cell_value("Active"), Value::Text("Active".to_owned()));
    }

    #[tokio::test]
    async fn fast_replay_yields_iris_and_lander_packets() {
        let file = archive(&[
            "2024-01-08T00:00:59Z,ENABLED,",
            "2024-01-08T00:01:00Z,,fff179e9",
        ]);
        let mut opts = ArchiveOpts::new(file.path());
        opts.playback_speed = 1000.0;
        opts.loop_replay = false;
        let mut xcvr = ArchiveTransceiver::new(opts, EndecChain::new(), Arc::new(fixtures::standards()));
        xcvr.begin().await.expect("begin");

        let mut packets = Vec::new();
        for _ in 0..5 {
            packets.extend(xcvr.read().await);
            if packets.len() >= 2 {
                break;
            }
        }
        let kinds: Vec<_> = packets.iter().map(Packet::kind).collect();
        assert!(kinds.contains(&PacketKind::PeregrineDummy), "{kinds:?}");
        assert!(kinds.contains(&PacketKind::WatchdogHeartbeat), "{kinds:?}");

        let heartbeat = packets
            .iter()
            .find(|p| p.kind() == PacketKind::WatchdogHeartbeat)
            .expect("heartbeat");
        assert_eq!(heartbeat.pathway(), DataPathway::Wireless);
        assert_eq!(heartbeat.source(), DataSource::Archive);
        let times = heartbeat.payloads().iter().next().and_then(|p| p.downlink_times()).expect("times");
        assert_eq!(times.lander_rx.map(|t| t.to_rfc3339()).as_deref(), Some("2024-01-08T00:01:00+00:00"));
    }
}
