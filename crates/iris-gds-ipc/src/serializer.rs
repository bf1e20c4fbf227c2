//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Versioned, double-signed CBOR message envelopes."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Envelope layout:
//!
//! ```text
//! ┌─────────┬──────────────────────┬──────────────┬──────────────┐
//! │ version │ CBOR(MessageContent) │ HMAC(v‖body) │ HMAC(v‖b‖d1) │
//! │ 1 byte  │ n bytes              │ 32 bytes     │ 32 bytes     │
//! └─────────┴──────────────────────┴──────────────┴──────────────┘
//! ```
//!
//! Both digests use HMAC-SHA256 with the shared bus key. Receivers verify
//! the outer digest first, then the inner one.

use hmac::{Hmac, Mac};
use iris_gds_common::IpcConfig;
use sha2::Sha256;

use crate::messages::MessageContent;
use crate::topics::Topic;
use crate::{IpcError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Envelope version written by this build.
pub const SERIALIZER_VERSION: u8 = 1;

const DIGEST_LEN: usize = 32;

/// Encodes and verifies message envelopes.
#[derive(Clone)]
pub struct Serializer {
    key: Vec<u8>,
}

impl std::fmt::Debug for Serializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serializer").field("key", &"<redacted>").finish()
    }
}

impl Serializer {
    /// Serializer keyed with `key`.
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    /// Serializer keyed with the configured bus key.
    pub fn from_config(config: &IpcConfig) -> Self {
        Self::new(config.hmac_key.as_bytes())
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|err| IpcError::Config(format!("unusable bus key: {err}")))
    }

    fn digest(&self, parts: &[&[u8]]) -> Result<[u8; DIGEST_LEN]> {
        let mut mac = self.mac()?;
        for part in parts {
            mac.update(part);
        }
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&mac.finalize().into_bytes());
        Ok(digest)
    }

    fn verify(&self, parts: &[&[u8]], digest: &[u8], which: &str) -> Result<()> {
        let mut mac = self.mac()?;
        for part in parts {
            mac.update(part);
        }
        mac.verify_slice(digest)
            .map_err(|_| IpcError::Integrity(format!("{which} digest does not match")))
    }

    /// Envelope bytes for `content`.
    pub fn encode(&self, content: &MessageContent) -> Result<Vec<u8>> {
        let body = serde_cbor::to_vec(content).map_err(|err| IpcError::Encode(err.to_string()))?;
        let version = [SERIALIZER_VERSION];
        let first = self.digest(&[&version[..], &body[..]])?;
        let second = self.digest(&[&version[..], &body[..], &first[..]])?;

        let mut out = Vec::with_capacity(1 + body.len() + 2 * DIGEST_LEN);
        out.push(SERIALIZER_VERSION);
        out.extend_from_slice(&body);
        out.extend_from_slice(&first);
        out.extend_from_slice(&second);
        Ok(out)
    }

    /// Content of a verified envelope.
    pub fn decode(&self, bytes: &[u8]) -> Result<MessageContent> {
        if bytes.len() < 1 + 2 * DIGEST_LEN {
            return Err(IpcError::Decode(format!(
                "envelope of {} bytes is shorter than its digests",
                bytes.len()
            )));
        }
        let (signed, second) = bytes.split_at(bytes.len() - DIGEST_LEN);
        let (versioned, first) = signed.split_at(signed.len() - DIGEST_LEN);
        let (version, body) = versioned.split_at(1);

        self.verify(&[version, body, first], second, "outer")?;
        self.verify(&[version, body], first, "inner")?;

        if version[0] != SERIALIZER_VERSION {
            return Err(IpcError::Decode(format!(
                "envelope version {} is not {SERIALIZER_VERSION}",
                version[0]
            )));
        }
        serde_cbor::from_slice(body).map_err(|err| IpcError::Decode(err.to_string()))
    }

    /// Content of a verified envelope received on `topic`, rejecting
    /// message types the topic does not carry.
    pub fn decode_for(&self, topic: Topic, bytes: &[u8]) -> Result<MessageContent> {
        let content = self.decode(bytes)?;
        if content.kind() != topic.kind() {
            return Err(IpcError::Decode(format!(
                "topic {topic} carries {} but got {}",
                topic.kind(),
                content.kind()
            )));
        }
        Ok(content)
    }
}

/// Version byte of an envelope, without verifying it.
pub fn envelope_version(bytes: &[u8]) -> Option<u8> {
    bytes.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{
        AppAction, AppControlMessage, TargetXcvr, XcvrCommand, XcvrControlMessage,
    };

    fn shutdown() -> MessageContent {
        AppControlMessage {
            target_app: Some("archiver".to_owned()),
            action: AppAction::Shutdown,
        }
        .into()
    }

    #[test]
    fn envelopes_verify_and_decode() {
        let serializer = Serializer::new("bus-key");
        let bytes = serializer.encode(&shutdown()).expect("encode");
        assert_eq!(envelope_version(&bytes), Some(SERIALIZER_VERSION));
        assert_eq!(serializer.decode(&bytes).expect("decode"), shutdown());
    }

    #[test]
    fn any_flipped_byte_fails_a_digest() {
        let serializer = Serializer::new("bus-key");
        let bytes = serializer.encode(&shutdown()).expect("encode");
        for index in 0..bytes.len() {
            let mut tampered = bytes.clone();
            tampered[index] ^= 0x40;
            assert!(
                matches!(serializer.decode(&tampered), Err(IpcError::Integrity(_))),
                "byte {index} was not protected"
            );
        }
    }

    #[test]
    fn wrong_key_or_short_envelope_is_rejected() {
        let bytes = Serializer::new("a").encode(&shutdown()).expect("encode");
        assert!(matches!(Serializer::new("b").decode(&bytes), Err(IpcError::Integrity(_))));
        assert!(matches!(Serializer::new("a").decode(&bytes[..10]), Err(IpcError::Decode(_))));
    }

    #[test]
    fn other_versions_are_a_decode_error() {
        let serializer = Serializer::new("bus-key");
        let body = serde_cbor::to_vec(&shutdown()).expect("cbor");
        let version = [SERIALIZER_VERSION + 1];
        let first = serializer.digest(&[&version[..], &body[..]]).expect("digest");
        let second = serializer.digest(&[&version[..], &body[..], &first[..]]).expect("digest");
        let bytes = [&version[..], &body[..], &first[..], &second[..]].concat();
        assert!(matches!(serializer.decode(&bytes), Err(IpcError::Decode(_))));
    }

    #[test]
    fn topics_only_accept_their_message_kind() {
        let serializer = Serializer::new("bus-key");
        let control = serializer
            .encode(
                &XcvrControlMessage {
                    target_xcvr: TargetXcvr::All,
                    command: XcvrCommand::Pause,
                }
                .into(),
            )
            .expect("encode");
        assert!(serializer.decode_for(Topic::XcvrControl, &control).is_ok());
        assert!(matches!(
            serializer.decode_for(Topic::DlPackets, &control),
            Err(IpcError::Decode(_))
        ));
    }
}
