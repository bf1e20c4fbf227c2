//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "JSON-lines envelope log: writer, streaming reader, replay."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! One header line, then one line per IPC envelope. Envelope bytes are
//! stored verbatim (base64) together with the serializer version so a later
//! process can verify and decode them.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use iris_gds_ipc::serializer::envelope_version;
use iris_gds_ipc::{IpcPayload, Topic};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use ulid::Ulid;

use crate::{ArchiveError, Result};

/// Format version written into every header.
pub const ARCHIVE_VERSION: u16 = 1;

/// First line of an archive file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    /// Format version.
    pub version: u16,
    /// Creation time of the file.
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of `created_at` in RFC 3339.
    pub hash: String,
}

impl ArchiveHeader {
    fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            version: ARCHIVE_VERSION,
            created_at,
            hash: Self::digest(created_at),
        }
    }

    fn digest(created_at: DateTime<Utc>) -> String {
        format!("{:x}", sha2::Sha256::digest(created_at.to_rfc3339().as_bytes()))
    }

    /// Whether the hash matches the creation time.
    pub fn is_consistent(&self) -> bool {
        self.hash == Self::digest(self.created_at)
    }
}

/// One archived envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// Position in the file, from 1.
    pub sequence: u64,
    /// When the archiver received the envelope.
    pub arrival_time: DateTime<Utc>,
    /// Topic name, or the raw tag for unregistered topics.
    pub topic: String,
    /// Subtopic, hex.
    pub subtopic: String,
    /// Envelope bytes, base64.
    pub msg: String,
    /// Version byte of the envelope.
    pub serializer_version: u8,
}

impl ArchiveRecord {
    /// Record of `payload` received at `arrival_time`. The sequence is
    /// assigned when appended.
    pub fn from_payload(payload: &IpcPayload, arrival_time: DateTime<Utc>) -> Self {
        let topic = match payload.topic() {
            Some(topic) => topic.to_string(),
            None => String::from_utf8_lossy(&payload.topic_bytes).into_owned(),
        };
        Self {
            sequence: 0,
            arrival_time,
            topic,
            subtopic: hex::encode(&payload.subtopic_bytes),
            msg: BASE64.encode(&payload.msg_bytes),
            serializer_version: envelope_version(&payload.msg_bytes).unwrap_or(0),
        }
    }

    /// The archived envelope as it travelled on the bus.
    pub fn to_payload(&self) -> Result<IpcPayload> {
        let topic_bytes = match Topic::from_str(&self.topic) {
            Ok(topic) => topic.tag().to_vec(),
            Err(_) => self.topic.as_bytes().to_vec(),
        };
        Ok(IpcPayload {
            topic_bytes,
            subtopic_bytes: hex::decode(&self.subtopic)?,
            msg_bytes: BASE64.decode(&self.msg)?,
        })
    }
}

/// Append-only archive writer.
pub struct ArchiveWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    next_sequence: u64,
}

impl ArchiveWriter {
    /// Start a new archive `ipc-archive-{ULID}.jsonl` in `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        Self::open(&dir.join(format!("ipc-archive-{}.jsonl", Ulid::new())))
    }

    /// Open `path` for appending, writing a header if the file is new.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let fresh = !path.exists() || fs::metadata(path)?.len() == 0;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);

        let next_sequence = if fresh {
            let line = serde_json::to_string(&ArchiveHeader::new(Utc::now()))?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            0
        } else {
            last_sequence(path)?
        };
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            next_sequence,
        })
    }

    /// Append `payload`. Returns the assigned sequence and the bytes written.
    pub fn append(&mut self, payload: &IpcPayload, arrival_time: DateTime<Utc>) -> Result<(u64, usize)> {
        let mut record = ArchiveRecord::from_payload(payload, arrival_time);
        self.next_sequence += 1;
        record.sequence = self.next_sequence;
        let line = serde_json::to_string(&record)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok((record.sequence, line.len() + 1))
    }

    /// Flush buffered writes.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("path", &self.path)
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

fn last_sequence(path: &Path) -> Result<u64> {
    let mut last = 0;
    for record in ArchiveReader::open(path)? {
        match record {
            Ok(record) => last = record.sequence,
            // A torn final line from a crash; appending continues after it.
            Err(ArchiveError::Json(_)) => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(last)
}

/// Call `handler` for every record in order. Returns the number of records.
pub fn replay<F>(path: &Path, mut handler: F) -> Result<usize>
where
    F: FnMut(ArchiveRecord) -> Result<()>,
{
    let mut count = 0;
    for record in ArchiveReader::open(path)? {
        handler(record?)?;
        count += 1;
    }
    Ok(count)
}

/// Streaming reader over the records of an archive.
pub struct ArchiveReader {
    header: ArchiveHeader,
    lines: std::io::Lines<BufReader<File>>,
}

impl ArchiveReader {
    /// Open `path` and read its header.
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut first = String::new();
        reader.read_line(&mut first)?;
        let header: ArchiveHeader = serde_json::from_str(first.trim_end())
            .map_err(|err| ArchiveError::Header(format!("{}: {err}", path.display())))?;
        if header.version > ARCHIVE_VERSION {
            return Err(ArchiveError::Header(format!(
                "{}: version {} is newer than {ARCHIVE_VERSION}",
                path.display(),
                header.version
            )));
        }
        Ok(Self {
            header,
            lines: reader.lines(),
        })
    }

    /// Header of the file.
    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }
}

impl Iterator for ArchiveReader {
    type Item = Result<ArchiveRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => return Some(serde_json::from_str(&line).map_err(ArchiveError::from)),
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn payload(topic: Topic, sub: &[u8], msg: &[u8]) -> IpcPayload {
        IpcPayload::new(topic, sub.to_vec(), msg.to_vec())
    }

    #[test]
    fn append_then_read_back_in_order() {
        let dir = tempdir().expect("tempdir");
        let mut writer = ArchiveWriter::create(dir.path()).expect("writer");
        let name = writer.path().file_name().and_then(|n| n.to_str()).expect("name").to_owned();
        assert!(name.starts_with("ipc-archive-") && name.ends_with(".jsonl"));

        let now = Utc::now();
        writer.append(&payload(Topic::DlPackets, b"serial", &[1, 0xAA]), now).expect("append");
        writer.append(&payload(Topic::AppControl, b"", &[1, 0xBB]), now).expect("append");

        let reader = ArchiveReader::open(writer.path()).expect("reader");
        assert!(reader.header().is_consistent());
        let records: Vec<ArchiveRecord> = reader.map(|r| r.expect("record")).collect();
        assert_eq!(records.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(records[0].topic, "DL_PACKETS");
        assert_eq!(records[0].subtopic, hex::encode(b"serial"));
        assert_eq!(records[0].serializer_version, 1);
        assert_eq!(
            records[0].to_payload().expect("payload"),
            payload(Topic::DlPackets, b"serial", &[1, 0xAA])
        );
    }

    #[test]
    fn reopening_continues_the_sequence() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        {
            let mut writer = ArchiveWriter::open(&path).expect("writer");
            writer.append(&payload(Topic::DlPayloads, b"", &[1]), Utc::now()).expect("append");
        }
        let mut writer = ArchiveWriter::open(&path).expect("reopen");
        let (seq, bytes) = writer.append(&payload(Topic::DlPayloads, b"", &[1]), Utc::now()).expect("append");
        assert_eq!(seq, 2);
        assert!(bytes > 0);
        assert_eq!(replay(&path, |_| Ok(())).expect("replay"), 2);
    }

    #[test]
    fn files_without_a_header_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("junk.jsonl");
        fs::write(&path, "not json\n").expect("write");
        assert!(matches!(ArchiveReader::open(&path), Err(ArchiveError::Header(_))));
    }
}
