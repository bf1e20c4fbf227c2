//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "SLIP-framed serial transceiver."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use iris_gds_catalog::DataStandards;
use iris_gds_codec::{DataPathway, DataSource};
use parking_lot::Mutex;
use serialport::SerialPort;
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

use crate::core::{RawFrame, Transceiver, TransceiverCore};
use crate::endec::{EndecChain, SlipEndec, SlipFramer};
use crate::{Result, TransceiverError};

const READ_CHUNK: usize = 1024;

/// Bytes the reader thread has collected, and why it stopped if it did.
#[derive(Default)]
struct Inbox {
    bytes: BytesMut,
    failure: Option<String>,
}

struct Reader {
    inbox: Arc<Mutex<Inbox>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reader {
    fn spawn(mut port: Box<dyn SerialPort>) -> Self {
        let inbox = Arc::new(Mutex::new(Inbox::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let (thread_inbox, thread_stop) = (inbox.clone(), stop.clone());
        let handle = thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            while !thread_stop.load(Ordering::Relaxed) {
                match port.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => thread_inbox.lock().bytes.extend_from_slice(&buf[..n]),
                    Err(err) if err.kind() == io::ErrorKind::TimedOut => {}
                    Err(err) => {
                        thread_inbox.lock().failure = Some(err.to_string());
                        break;
                    }
                }
            }
        });
        Self {
            inbox,
            stop,
            handle: Some(handle),
        }
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("serial reader thread panicked");
            }
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Serial line carrying SLIP frames.
///
/// A background thread reads the device with a per-byte timeout; reads
/// drain what it collected. When a read finds no new bytes, whatever is
/// buffered is flushed as a frame, so a sender that omits the closing END
/// is still heard.
pub struct SerialTransceiver {
    core: TransceiverCore,
    device: String,
    baud: u32,
    byte_timeout: Duration,
    reader: Option<Reader>,
    writer: Option<Box<dyn SerialPort>>,
    pending: BytesMut,
}

impl SerialTransceiver {
    /// Transceiver on `device`. `endecs` sit inside the SLIP framing.
    pub fn new(
        device: impl Into<String>,
        baud: u32,
        byte_timeout: Duration,
        endecs: EndecChain,
        standards: Arc<DataStandards>,
    ) -> Self {
        let endecs = endecs.with(SlipEndec);
        Self {
            core: TransceiverCore::new(
                "serial",
                standards,
                endecs,
                DataPathway::Wired,
                DataSource::Serial,
            ),
            device: device.into(),
            baud,
            byte_timeout,
            reader: None,
            writer: None,
            pending: BytesMut::new(),
        }
    }

    /// Split buffered bytes into frames, re-wrapped in END so the SLIP
    /// endec sees a complete frame.
    fn drain_frames(&mut self, flush: bool) -> Result<Vec<RawFrame>> {
        let mut framer = SlipFramer;
        let mut frames = Vec::new();
        while let Some(body) = framer.decode(&mut self.pending)? {
            frames.push(body);
        }
        if flush {
            if let Some(body) = framer.decode_eof(&mut self.pending)? {
                frames.push(body);
            }
        }
        Ok(frames
            .into_iter()
            .filter(|body| !body.is_empty())
            .map(|body| {
                let mut framed = Vec::with_capacity(body.len() + 2);
                framed.push(SlipEndec::END);
                framed.extend(body);
                framed.push(SlipEndec::END);
                RawFrame::new(framed)
            })
            .collect())
    }
}

#[async_trait]
impl Transceiver for SerialTransceiver {
    fn core(&self) -> &TransceiverCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TransceiverCore {
        &mut self.core
    }

    async fn open(&mut self) -> Result<()> {
        if let Some(mut reader) = self.reader.take() {
            reader.shutdown();
        }
        self.pending.clear();
        let port = serialport::new(&self.device, self.baud)
            .timeout(self.byte_timeout)
            .open()
            .map_err(|err| {
                TransceiverError::Connection(format!("cannot open {}: {err}", self.device))
            })?;
        let writer = port
            .try_clone()
            .map_err(|err| TransceiverError::Connection(format!("cannot clone {}: {err}", self.device)))?;
        self.reader = Some(Reader::spawn(port));
        self.writer = Some(writer);
        info!(device = %self.device, baud = self.baud, "serial port open");
        Ok(())
    }

    async fn downlink(&mut self) -> Result<Vec<RawFrame>> {
        let Some(reader) = &self.reader else {
            return Err(TransceiverError::Connection("serial port is not open".to_owned()));
        };
        let (fresh, failure) = {
            let mut inbox = reader.inbox.lock();
            (inbox.bytes.split(), inbox.failure.take())
        };
        if let Some(failure) = failure {
            return Err(TransceiverError::Connection(format!(
                "{} read failed: {failure}",
                self.device
            )));
        }
        let idle = fresh.is_empty();
        self.pending.extend_from_slice(&fresh);
        if idle && self.pending.is_empty() {
            tokio::time::sleep(self.byte_timeout).await;
            return Ok(Vec::new());
        }
        let frames = self.drain_frames(idle)?;
        if !frames.is_empty() {
            debug!(frames = frames.len(), "serial frames received");
        }
        Ok(frames)
    }

    async fn uplink(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TransceiverError::Connection("serial port is not open".to_owned()))?;
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_gds_catalog::fixtures;

    fn xcvr() -> SerialTransceiver {
        SerialTransceiver::new(
            "/dev/null-serial",
            9600,
            Duration::from_millis(5),
            EndecChain::new(),
            Arc::new(fixtures::standards()),
        )
    }

    #[test]
    fn partial_frames_wait_until_the_line_goes_idle() {
        let mut serial = xcvr();
        serial.pending.extend_from_slice(&[0xC0, 0xFF, 1, 2, 3, 0xC0, 0xFF, 4]);
        let frames = serial.drain_frames(false).expect("frames");
        assert_eq!(frames, vec![RawFrame::new(vec![0xC0, 0xFF, 1, 2, 3, 0xC0])]);
        assert_eq!(&serial.pending[..], &[0xFF, 4]);

        let frames = serial.drain_frames(true).expect("flush");
        assert_eq!(frames, vec![RawFrame::new(vec![0xC0, 0xFF, 4, 0xC0])]);
        assert!(serial.pending.is_empty());
    }

    #[tokio::test]
    async fn missing_device_fails_begin_and_goes_dormant() {
        let mut serial = xcvr();
        let err = serial.begin().await.expect_err("no such device");
        assert!(matches!(err, TransceiverError::Connection(_)));
        assert!(serial.core().is_dormant());
        assert!(serial.read().await.is_empty());
    }
}
