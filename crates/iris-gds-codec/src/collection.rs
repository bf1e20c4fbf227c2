//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Ordered payload collection indexed by payload kind."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::metadata::{DataPathway, DataSource};
use crate::payload::{
    CommandPayload, EventPayload, FileBlockPayload, Payload, PayloadKind, TelemetryPayload,
};

/// Payloads in arrival order, with an index per [`PayloadKind`] so all
/// payloads of one kind are found without a scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Payload>", into = "Vec<Payload>")]
pub struct PayloadCollection {
    items: Vec<Payload>,
    by_kind: HashMap<PayloadKind, Vec<usize>>,
}

impl PayloadCollection {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload.
    pub fn push(&mut self, payload: impl Into<Payload>) {
        let payload = payload.into();
        self.by_kind
            .entry(payload.kind())
            .or_default()
            .push(self.items.len());
        self.items.push(payload);
    }

    /// Append every payload from `other`, keeping its order.
    pub fn extend(&mut self, other: impl IntoIterator<Item = Payload>) {
        for payload in other {
            self.push(payload);
        }
    }

    /// All payloads, in arrival order.
    pub fn iter(&self) -> std::slice::Iter<'_, Payload> {
        self.items.iter()
    }

    /// Mutable access. Kinds cannot change through a `&mut Payload` except
    /// by retagging a command's magic, which [`Self::reindex`] repairs.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Payload> {
        self.items.iter_mut()
    }

    /// Rebuild the kind index.
    pub fn reindex(&mut self) {
        self.by_kind.clear();
        for (i, payload) in self.items.iter().enumerate() {
            self.by_kind.entry(payload.kind()).or_default().push(i);
        }
    }

    /// Payloads of one kind, in arrival order.
    pub fn of_kind(&self, kind: PayloadKind) -> impl Iterator<Item = &Payload> + '_ {
        self.by_kind
            .get(&kind)
            .into_iter()
            .flatten()
            .filter_map(|&i| self.items.get(i))
    }

    /// Number of payloads of one kind.
    pub fn count(&self, kind: PayloadKind) -> usize {
        self.by_kind.get(&kind).map_or(0, Vec::len)
    }

    /// Telemetry payloads.
    pub fn telemetry(&self) -> impl Iterator<Item = &TelemetryPayload> + '_ {
        self.of_kind(PayloadKind::Telemetry).filter_map(|p| match p {
            Payload::Telemetry(t) => Some(t),
            _ => None,
        })
    }

    /// Event payloads.
    pub fn events(&self) -> impl Iterator<Item = &EventPayload> + '_ {
        self.of_kind(PayloadKind::Event).filter_map(|p| match p {
            Payload::Event(e) => Some(e),
            _ => None,
        })
    }

    /// Command payloads of both magics, in arrival order.
    pub fn commands(&self) -> impl Iterator<Item = &CommandPayload> + '_ {
        self.items.iter().filter_map(|p| match p {
            Payload::Command(c) => Some(c),
            _ => None,
        })
    }

    /// File blocks.
    pub fn file_blocks(&self) -> impl Iterator<Item = &FileBlockPayload> + '_ {
        self.of_kind(PayloadKind::FileBlock).filter_map(|p| match p {
            Payload::FileBlock(f) => Some(f),
            _ => None,
        })
    }

    /// Number of payloads.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there are no payloads.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Set the pathway of every payload.
    pub fn set_pathway(&mut self, pathway: DataPathway) {
        self.items.iter_mut().for_each(|p| p.set_pathway(pathway));
    }

    /// Set the source of every payload.
    pub fn set_source(&mut self, source: DataSource) {
        self.items.iter_mut().for_each(|p| p.set_source(source));
    }

    /// Payloads as a slice.
    pub fn as_slice(&self) -> &[Payload] {
        &self.items
    }
}

impl PartialEq for PayloadCollection {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl From<Vec<Payload>> for PayloadCollection {
    fn from(items: Vec<Payload>) -> Self {
        let mut collection = Self::default();
        collection.extend(items);
        collection
    }
}

impl From<PayloadCollection> for Vec<Payload> {
    fn from(collection: PayloadCollection) -> Self {
        collection.items
    }
}

impl FromIterator<Payload> for PayloadCollection {
    fn from_iter<I: IntoIterator<Item = Payload>>(iter: I) -> Self {
        let mut collection = Self::default();
        collection.extend(iter);
        collection
    }
}

impl IntoIterator for PayloadCollection {
    type Item = Payload;
    type IntoIter = std::vec::IntoIter<Payload>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a PayloadCollection {
    type Item = &'a Payload;
    type IntoIter = std::slice::Iter<'a, Payload>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::Value;

    fn tlm(id: u8) -> Payload {
        TelemetryPayload::new(0x4A00, id, Value::UInt(u64::from(id)), 0).into()
    }

    fn block(n: u8) -> Payload {
        FileBlockPayload::new(1, 4, n, vec![n]).into()
    }

    #[test]
    fn kinds_keep_insertion_order() {
        let collection: PayloadCollection = vec![tlm(1), block(1), tlm(2), block(2), tlm(3)]
            .into_iter()
            .collect();
        let ids: Vec<u8> = collection.telemetry().map(|t| t.channel_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(collection.count(PayloadKind::FileBlock), 2);
        assert_eq!(collection.count(PayloadKind::Event), 0);
        assert_eq!(collection.len(), 5);
    }

    #[test]
    fn serde_preserves_payloads_and_rebuilds_index() {
        let collection = PayloadCollection::from(vec![tlm(1), block(7)]);
        let json = serde_json::to_string(&collection).expect("serialize");
        let back: PayloadCollection = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, collection);
        assert_eq!(back.file_blocks().next().map(|f| f.block_number), Some(7));
    }

    #[test]
    fn pathway_and_source_apply_to_all() {
        let mut collection = PayloadCollection::from(vec![tlm(1), block(1)]);
        collection.set_pathway(DataPathway::Wireless);
        collection.set_source(DataSource::Pcap);
        assert!(collection
            .iter()
            .all(|p| p.pathway() == DataPathway::Wireless && p.source() == DataSource::Pcap));
    }
}
