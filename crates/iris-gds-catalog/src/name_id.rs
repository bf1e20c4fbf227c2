//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Map addressable by either name or numeric ID."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// Key accepted by [`NameIdMap`] lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOrId<'a> {
    /// Look up by name.
    Name(&'a str),
    /// Look up by numeric ID.
    Id(u16),
}

impl<'a> From<&'a str> for NameOrId<'a> {
    fn from(name: &'a str) -> Self {
        NameOrId::Name(name)
    }
}

impl<'a> From<&'a String> for NameOrId<'a> {
    fn from(name: &'a String) -> Self {
        NameOrId::Name(name.as_str())
    }
}

impl From<u16> for NameOrId<'_> {
    fn from(id: u16) -> Self {
        NameOrId::Id(id)
    }
}

impl From<u8> for NameOrId<'_> {
    fn from(id: u8) -> Self {
        NameOrId::Id(u16::from(id))
    }
}

/// Why an insert into a [`NameIdMap`] was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameIdConflict {
    /// The ID is already bound.
    Id(u16),
    /// The name is already bound.
    Name(String),
}

impl fmt::Display for NameIdConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameIdConflict::Id(id) => write!(f, "id {id:#04X}"),
            NameIdConflict::Name(name) => write!(f, "name `{name}`"),
        }
    }
}

/// Ordered map whose entries are reachable by both name and ID. Writes
/// always bind both keys, so the two indices never disagree.
#[derive(Clone, PartialEq)]
pub struct NameIdMap<T> {
    by_id: IndexMap<u16, (String, T)>,
    by_name: HashMap<String, u16>,
}

impl<T> Default for NameIdMap<T> {
    fn default() -> Self {
        Self {
            by_id: IndexMap::new(),
            by_name: HashMap::new(),
        }
    }
}

impl<T> NameIdMap<T> {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under both `id` and `name`. Refuses to overwrite either.
    pub fn insert(
        &mut self,
        id: u16,
        name: impl Into<String>,
        value: T,
    ) -> Result<(), NameIdConflict> {
        let name = name.into();
        if self.by_id.contains_key(&id) {
            return Err(NameIdConflict::Id(id));
        }
        if self.by_name.contains_key(&name) {
            return Err(NameIdConflict::Name(name));
        }
        self.by_name.insert(name.clone(), id);
        self.by_id.insert(id, (name, value));
        Ok(())
    }

    /// Look up by name or ID.
    pub fn get<'k>(&self, key: impl Into<NameOrId<'k>>) -> Option<&T> {
        self.entry(key).map(|(_, _, value)| value)
    }

    /// Mutable lookup by name or ID.
    pub fn get_mut<'k>(&mut self, key: impl Into<NameOrId<'k>>) -> Option<&mut T> {
        let id = self.resolve(key.into())?;
        self.by_id.get_mut(&id).map(|(_, value)| value)
    }

    /// Look up the full `(id, name, value)` entry.
    pub fn entry<'k>(&self, key: impl Into<NameOrId<'k>>) -> Option<(u16, &str, &T)> {
        let id = self.resolve(key.into())?;
        self.by_id
            .get(&id)
            .map(|(name, value)| (id, name.as_str(), value))
    }

    fn resolve(&self, key: NameOrId<'_>) -> Option<u16> {
        match key {
            NameOrId::Id(id) => self.by_id.contains_key(&id).then_some(id),
            NameOrId::Name(name) => self.by_name.get(name).copied(),
        }
    }

    /// Whether an entry exists under `key`.
    pub fn contains<'k>(&self, key: impl Into<NameOrId<'k>>) -> bool {
        self.resolve(key.into()).is_some()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &str, &T)> + '_ {
        self.by_id
            .iter()
            .map(|(id, (name, value))| (*id, name.as_str(), value))
    }

    /// IDs in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.by_id.keys().copied()
    }

    /// Names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.by_id.values().map(|(name, _)| name.as_str())
    }

    /// Values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.by_id.values().map(|(_, value)| value)
    }
}

impl<T: fmt::Debug> fmt::Debug for NameIdMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.by_id.iter().map(|(id, (name, value))| ((id, name), value)))
            .finish()
    }
}

#[derive(Serialize)]
struct RowRef<'a, T> {
    id: u16,
    name: &'a str,
    value: &'a T,
}

#[derive(Deserialize)]
struct Row<T> {
    id: u16,
    name: String,
    value: T,
}

impl<T: Serialize> Serialize for NameIdMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for (id, name, value) in self.iter() {
            seq.serialize_element(&RowRef { id, name, value })?;
        }
        seq.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for NameIdMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rows = Vec::<Row<T>>::deserialize(deserializer)?;
        let mut map = NameIdMap::new();
        for row in rows {
            map.insert(row.id, row.name, row.value)
                .map_err(|conflict| de::Error::custom(format!("duplicate {conflict}")))?;
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_by_either_key_agree() {
        let mut map = NameIdMap::new();
        map.insert(0x01, "Alpha", 'a').expect("insert");
        map.insert(0x02, "Beta", 'b').expect("insert");

        assert_eq!(map.get("Alpha"), Some(&'a'));
        assert_eq!(map.get(0x02u16), Some(&'b'));
        assert_eq!(map.entry("Beta").map(|(id, _, _)| id), Some(2));
        assert_eq!(map.names().collect::<Vec<_>>(), vec!["Alpha", "Beta"]);
        assert!(!map.contains("Gamma"));
    }

    #[test]
    fn refuses_to_rebind_either_key() {
        let mut map = NameIdMap::new();
        map.insert(0x01, "Alpha", 1).expect("insert");
        assert_eq!(map.insert(0x01, "Other", 2), Err(NameIdConflict::Id(1)));
        assert_eq!(
            map.insert(0x03, "Alpha", 3),
            Err(NameIdConflict::Name("Alpha".to_owned()))
        );
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn serde_keeps_order_and_rejects_duplicates() {
        let mut map = NameIdMap::new();
        map.insert(0x10, "Zed", 26u8).expect("insert");
        map.insert(0x01, "Ay", 1u8).expect("insert");
        let json = serde_json::to_string(&map).expect("serialize");
        let back: NameIdMap<u8> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, map);
        assert_eq!(back.ids().collect::<Vec<_>>(), vec![0x10, 0x01]);

        let dup = r#"[{"id":1,"name":"A","value":1},{"id":1,"name":"B","value":2}]"#;
        assert!(serde_json::from_str::<NameIdMap<u8>>(dup).is_err());
    }
}
