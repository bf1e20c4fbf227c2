//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Topic registry with prefix-free routing tags."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Topics are routed by prefix match on their tag, so no tag may be a
//! prefix of another. [`TOPICS`] is checked at compile time.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::messages::MessageKind;

/// Routable topics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Topic {
    /// Packets straight from a transceiver.
    DlPackets,
    /// Enriched payloads from the downlink processor.
    DlPayloads,
    /// Payloads an operator wants uplinked.
    UlPayloads,
    /// Packed packets ready for a transceiver.
    UlPacket,
    /// Transceiver lifecycle commands.
    XcvrControl,
    /// App shutdown requests and heartbeats.
    AppControl,
}

/// Binding of a topic to its tag and message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicDefinition {
    /// The topic.
    pub topic: Topic,
    /// Routing tag, sent as the first part of every payload.
    pub tag: &'static [u8],
    /// The only message type the topic carries.
    pub kind: MessageKind,
    /// Short description for tooling.
    pub description: &'static str,
}

/// Every topic, in declaration order.
pub const TOPICS: [TopicDefinition; 6] = [
    TopicDefinition {
        topic: Topic::DlPackets,
        tag: b"DP",
        kind: MessageKind::DownlinkedPackets,
        description: "packets read by a transceiver",
    },
    TopicDefinition {
        topic: Topic::DlPayloads,
        tag: b"DL",
        kind: MessageKind::DownlinkedPayloads,
        description: "downlinked payloads with time estimates and meta channels",
    },
    TopicDefinition {
        topic: Topic::UlPayloads,
        tag: b"UP",
        kind: MessageKind::UplinkPayloadsRequest,
        description: "payloads to pack for uplink",
    },
    TopicDefinition {
        topic: Topic::UlPacket,
        tag: b"UK",
        kind: MessageKind::UplinkPacketRequest,
        description: "packets to uplink",
    },
    TopicDefinition {
        topic: Topic::XcvrControl,
        tag: b"XC",
        kind: MessageKind::XcvrControl,
        description: "transceiver control",
    },
    TopicDefinition {
        topic: Topic::AppControl,
        tag: b"AC",
        kind: MessageKind::AppControl,
        description: "app shutdown and heartbeat",
    },
];

const fn starts_with(long: &[u8], short: &[u8]) -> bool {
    if short.len() > long.len() {
        return false;
    }
    let mut i = 0;
    while i < short.len() {
        if long[i] != short[i] {
            return false;
        }
        i += 1;
    }
    true
}

/// Whether no tag in `defs` is a prefix of another.
pub const fn is_prefix_free(defs: &[TopicDefinition]) -> bool {
    let mut i = 0;
    while i < defs.len() {
        let mut j = 0;
        while j < defs.len() {
            if i != j && starts_with(defs[j].tag, defs[i].tag) {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const _: () = assert!(is_prefix_free(&TOPICS), "topic tags must be prefix-free");

/// Pairs `(a, b)` where `a`'s tag is a prefix of `b`'s.
pub fn prefix_conflicts(defs: &[TopicDefinition]) -> Vec<(Topic, Topic)> {
    let mut conflicts = Vec::new();
    for a in defs {
        for b in defs {
            if a.topic != b.topic && b.tag.starts_with(a.tag) {
                conflicts.push((a.topic, b.topic));
            }
        }
    }
    conflicts
}

impl Topic {
    /// Registry entry of this topic.
    pub fn definition(self) -> &'static TopicDefinition {
        // TOPICS is declared in variant order.
        &TOPICS[self as usize]
    }

    /// Routing tag.
    pub fn tag(self) -> &'static [u8] {
        self.definition().tag
    }

    /// Message type carried.
    pub fn kind(self) -> MessageKind {
        self.definition().kind
    }

    /// Topic whose tag is exactly `tag`.
    pub fn from_tag(tag: &[u8]) -> Option<Topic> {
        TOPICS.iter().find(|d| d.tag == tag).map(|d| d.topic)
    }

    /// Topic that carries `kind`. Every message type has exactly one.
    pub fn for_kind(kind: MessageKind) -> Topic {
        TOPICS
            .iter()
            .find(|d| d.kind == kind)
            .map(|d| d.topic)
            .unwrap_or(Topic::AppControl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn registry_is_prefix_free() {
        assert!(is_prefix_free(&TOPICS));
        assert!(prefix_conflicts(&TOPICS).is_empty());

        let mut clashing = TOPICS;
        clashing[1].tag = &b"DPX"[..];
        assert!(!is_prefix_free(&clashing));
        assert_eq!(prefix_conflicts(&clashing), vec![(Topic::DlPackets, Topic::DlPayloads)]);
    }

    #[test]
    fn registry_follows_variant_order() {
        for topic in Topic::iter() {
            assert_eq!(topic.definition().topic, topic);
            assert_eq!(Topic::from_tag(topic.tag()), Some(topic));
        }
        assert_eq!(Topic::DlPackets.tag(), b"DP");
        assert_eq!(Topic::UlPacket.kind(), MessageKind::UplinkPacketRequest);
        assert_eq!(Topic::from_tag(b"ZZ"), None);
        for def in TOPICS {
            assert_eq!(Topic::for_kind(def.kind), def.topic);
        }
    }
}
