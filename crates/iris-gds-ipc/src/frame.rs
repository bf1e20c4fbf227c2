//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Wire framing of IPC payloads and subscription notices."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Wire framing. Every frame is a 6 byte header followed by its body:
//!
//! ```text
//! ┌────────────┬─────────────┬─────────────────────────────────────────┐
//! │ Magic (2B) │ Length (4B) │ Body (Length bytes)                     │
//! │ "IB" data  │ LE          │ 3 × (u32 LE length ‖ bytes):            │
//! │            │             │   topic, subtopic, message              │
//! │ "IC" ctrl  │ LE          │ 0x01 subscribe / 0x00 unsubscribe ‖ tag │
//! └────────────┴─────────────┴─────────────────────────────────────────┘
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::topics::Topic;
use crate::{IpcError, Result};

/// Header: magic (2) + length (4).
pub const HEADER_SIZE: usize = 6;

/// Magic of a data frame: "IB".
pub const DATA_MAGIC: [u8; 2] = *b"IB";

/// Magic of a subscription control frame: "IC".
pub const CONTROL_MAGIC: [u8; 2] = *b"IC";

const SUBSCRIBE: u8 = 0x01;
const UNSUBSCRIBE: u8 = 0x00;

/// The unit the bus carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpcPayload {
    /// Routing tag, matched by prefix.
    pub topic_bytes: Vec<u8>,
    /// Consumer-side selector.
    pub subtopic_bytes: Vec<u8>,
    /// Serialized message envelope.
    pub msg_bytes: Vec<u8>,
}

impl IpcPayload {
    /// Payload for `topic`.
    pub fn new(topic: Topic, subtopic: impl Into<Vec<u8>>, msg: Vec<u8>) -> Self {
        Self {
            topic_bytes: topic.tag().to_vec(),
            subtopic_bytes: subtopic.into(),
            msg_bytes: msg,
        }
    }

    /// Registered topic of the payload.
    pub fn topic(&self) -> Option<Topic> {
        Topic::from_tag(&self.topic_bytes)
    }

    /// Body length on the wire.
    fn body_len(&self) -> usize {
        12 + self.topic_bytes.len() + self.subtopic_bytes.len() + self.msg_bytes.len()
    }
}

/// Anything a socket sends or receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A payload.
    Data(IpcPayload),
    /// Start receiving topics with this tag prefix.
    Subscribe(Vec<u8>),
    /// Stop receiving topics with this tag prefix.
    Unsubscribe(Vec<u8>),
}

/// `tokio_util` codec for [`Frame`]s.
#[derive(Debug, Clone, Copy)]
pub struct IpcCodec {
    max_frame_bytes: usize,
}

impl IpcCodec {
    /// Codec rejecting bodies larger than `max_frame_bytes`.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

fn take_part(body: &mut BytesMut, name: &str) -> Result<Vec<u8>> {
    if body.len() < 4 {
        return Err(IpcError::Decode(format!("frame ends before the {name} length")));
    }
    let len = body.get_u32_le() as usize;
    if body.len() < len {
        return Err(IpcError::Decode(format!(
            "{name} claims {len} bytes but {} remain",
            body.len()
        )));
    }
    Ok(body.split_to(len).to_vec())
}

fn put_part(dst: &mut BytesMut, part: &[u8]) {
    dst.put_u32_le(part.len() as u32);
    dst.put_slice(part);
}

impl Decoder for IpcCodec {
    type Item = Frame;
    type Error = IpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }
        let magic = [src[0], src[1]];
        if magic != DATA_MAGIC && magic != CONTROL_MAGIC {
            return Err(IpcError::Decode(format!("bad frame magic {magic:02x?}")));
        }
        let len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
        if len > self.max_frame_bytes {
            return Err(IpcError::FrameTooLarge {
                size: len,
                max: self.max_frame_bytes,
            });
        }
        if src.len() < HEADER_SIZE + len {
            src.reserve(HEADER_SIZE + len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_SIZE);
        let mut body = src.split_to(len);

        if magic == CONTROL_MAGIC {
            if body.is_empty() {
                return Err(IpcError::Decode("empty control frame".to_owned()));
            }
            let op = body.get_u8();
            let prefix = body.to_vec();
            return match op {
                SUBSCRIBE => Ok(Some(Frame::Subscribe(prefix))),
                UNSUBSCRIBE => Ok(Some(Frame::Unsubscribe(prefix))),
                other => Err(IpcError::Decode(format!("unknown control op {other:#04x}"))),
            };
        }

        let payload = IpcPayload {
            topic_bytes: take_part(&mut body, "topic")?,
            subtopic_bytes: take_part(&mut body, "subtopic")?,
            msg_bytes: take_part(&mut body, "message")?,
        };
        if !body.is_empty() {
            return Err(IpcError::Decode(format!(
                "{} trailing bytes after the message",
                body.len()
            )));
        }
        Ok(Some(Frame::Data(payload)))
    }
}

impl Encoder<Frame> for IpcCodec {
    type Error = IpcError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let (magic, len) = match &frame {
            Frame::Data(payload) => (DATA_MAGIC, payload.body_len()),
            Frame::Subscribe(prefix) | Frame::Unsubscribe(prefix) => {
                (CONTROL_MAGIC, 1 + prefix.len())
            }
        };
        if len > self.max_frame_bytes || len > u32::MAX as usize {
            return Err(IpcError::FrameTooLarge {
                size: len,
                max: self.max_frame_bytes,
            });
        }
        dst.reserve(HEADER_SIZE + len);
        dst.put_slice(&magic);
        dst.put_u32_le(len as u32);
        match frame {
            Frame::Data(payload) => {
                put_part(dst, &payload.topic_bytes);
                put_part(dst, &payload.subtopic_bytes);
                put_part(dst, &payload.msg_bytes);
            }
            Frame::Subscribe(prefix) => {
                dst.put_u8(SUBSCRIBE);
                dst.put_slice(&prefix);
            }
            Frame::Unsubscribe(prefix) => {
                dst.put_u8(UNSUBSCRIBE);
                dst.put_slice(&prefix);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> IpcCodec {
        IpcCodec::new(1024)
    }

    fn payload() -> IpcPayload {
        IpcPayload::new(Topic::DlPackets, b"serial".to_vec(), vec![1, 2, 3])
    }

    #[test]
    fn data_frame_layout() {
        let mut buf = BytesMut::new();
        codec().encode(Frame::Data(payload()), &mut buf).expect("encode");
        assert_eq!(&buf[..2], b"IB");
        assert_eq!(&buf[2..6], &(12u32 + 2 + 6 + 3).to_le_bytes());
        assert_eq!(&buf[6..10], &2u32.to_le_bytes());
        assert_eq!(&buf[10..12], b"DP");

        let frame = codec().decode(&mut buf).expect("decode");
        assert_eq!(frame, Some(Frame::Data(payload())));
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let mut whole = BytesMut::new();
        codec().encode(Frame::Data(payload()), &mut whole).expect("encode");
        codec().encode(Frame::Subscribe(b"DL".to_vec()), &mut whole).expect("encode");

        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for byte in whole.iter() {
            buf.put_u8(*byte);
            if let Some(frame) = codec().decode(&mut buf).expect("decode") {
                frames.push(frame);
            }
        }
        assert_eq!(frames, vec![Frame::Data(payload()), Frame::Subscribe(b"DL".to_vec())]);
        assert_eq!(payload().topic(), Some(Topic::DlPackets));
    }

    #[test]
    fn control_frames_carry_the_prefix() {
        let mut buf = BytesMut::new();
        codec().encode(Frame::Unsubscribe(b"UK".to_vec()), &mut buf).expect("encode");
        assert_eq!(&buf[..], &[b'I', b'C', 3, 0, 0, 0, 0x00, b'U', b'K']);
        assert_eq!(
            codec().decode(&mut buf).expect("decode"),
            Some(Frame::Unsubscribe(b"UK".to_vec()))
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        let mut bad_magic = BytesMut::from(&b"XX\0\0\0\0"[..]);
        assert!(matches!(codec().decode(&mut bad_magic), Err(IpcError::Decode(_))));

        let mut huge = BytesMut::new();
        huge.put_slice(b"IB");
        huge.put_u32_le(4096);
        assert!(matches!(codec().decode(&mut huge), Err(IpcError::FrameTooLarge { .. })));

        let mut short_part = BytesMut::new();
        short_part.put_slice(b"IB");
        short_part.put_u32_le(6);
        short_part.put_u32_le(9);
        short_part.put_slice(b"DP");
        assert!(matches!(codec().decode(&mut short_part), Err(IpcError::Decode(_))));
    }
}
