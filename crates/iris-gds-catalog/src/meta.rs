//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "MetaModule declarations and atomic registration into DataStandards."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Catalog side of ground-computed MetaModules. The runtime (update policies
//! and calculations) lives in the downlink crate; here only the prototypes
//! and their watch graph are registered and validated.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::datatype::DataType;
use crate::model::{EnumItem, Module, TelemetryChannel};
use crate::standards::DataStandards;
use crate::{CatalogError, Result};

/// Module IDs reserved for MetaModules.
pub const META_MODULE_ID_RANGE: RangeInclusive<u16> = 0xA000..=0xAFFF;
/// Prefix every MetaModule name carries.
pub const META_MODULE_PREFIX: &str = "MetaMod";

/// Prototype of one MetaChannel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaChannelDecl {
    /// Channel name within its MetaModule.
    pub name: String,
    /// Channel ID within its MetaModule.
    pub id: u8,
    /// Output type.
    pub datatype: DataType,
    /// Enum items for enum outputs.
    #[serde(default)]
    pub enum_items: Vec<EnumItem>,
    /// Fully qualified (`Module_Channel`) names of the watched channels.
    pub watching: Vec<String>,
}

/// A MetaModule and its channel prototypes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaModuleDecl {
    /// Module name, with or without [`META_MODULE_PREFIX`].
    pub name: String,
    /// Module ID inside [`META_MODULE_ID_RANGE`].
    pub id: u16,
    /// Channel prototypes.
    pub channels: Vec<MetaChannelDecl>,
}

impl MetaModuleDecl {
    /// Module name with the universal prefix applied.
    pub fn prefixed_name(&self) -> String {
        if self.name.starts_with(META_MODULE_PREFIX) {
            self.name.clone()
        } else {
            format!("{META_MODULE_PREFIX}{}", self.name)
        }
    }
}

/// Register `decls` into `standards`. Either every module is added or, on
/// error, `standards` is left untouched.
pub fn add_metamodules(standards: &mut DataStandards, decls: &[MetaModuleDecl]) -> Result<()> {
    let mut staged = standards.clone();

    for decl in decls {
        let name = decl.prefixed_name();
        if !META_MODULE_ID_RANGE.contains(&decl.id) {
            return Err(CatalogError::schema(
                &name,
                format!(
                    "MetaModule id {:#06X} is outside {:#06X}..={:#06X}",
                    decl.id,
                    META_MODULE_ID_RANGE.start(),
                    META_MODULE_ID_RANGE.end()
                ),
            ));
        }
        let mut module = Module::new(name.clone(), decl.id);
        module.is_meta = true;
        for channel in &decl.channels {
            if channel.datatype.is_enum() != !channel.enum_items.is_empty() {
                return Err(CatalogError::schema(
                    &name,
                    format!("channel {} enum items do not match its type", channel.name),
                ));
            }
            let mut proto = TelemetryChannel::new(&channel.name, channel.id, channel.datatype);
            proto.enum_items = channel.enum_items.clone();
            module
                .telemetry
                .insert(u16::from(channel.id), channel.name.clone(), proto)
                .map_err(|c| CatalogError::duplicate(format!("module {name} telemetry"), c.to_string()))?;
        }
        staged.add_module(module)?;
    }

    check_watch_graph(&staged, decls)?;

    let added = decls.len();
    *standards = staged;
    info!(added, "registered MetaModules");
    Ok(())
}

/// Every watched channel must exist and the watch graph must be acyclic.
/// Registered modules cannot be redeclared and only ever watch channels that
/// existed before them, so edges from `decls` are the only ones that can
/// close a cycle.
fn check_watch_graph(standards: &DataStandards, decls: &[MetaModuleDecl]) -> Result<()> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
    let mut node_for = |graph: &mut DiGraph<String, ()>, name: String| {
        *nodes
            .entry(name.clone())
            .or_insert_with(|| graph.add_node(name))
    };

    for decl in decls {
        let module_name = decl.prefixed_name();
        for channel in &decl.channels {
            let target = node_for(&mut graph, format!("{module_name}_{}", channel.name));
            for watched in &channel.watching {
                let (module, source) = standards.find_channel(watched).ok_or_else(|| {
                    CatalogError::Missing(format!(
                        "channel {watched} watched by {module_name}_{}",
                        channel.name
                    ))
                })?;
                let source = node_for(&mut graph, module.qualified_name(&source.name));
                graph.add_edge(source, target, ());
            }
        }
    }

    if is_cyclic_directed(&graph) {
        let culprit = petgraph::algo::tarjan_scc(&graph)
            .into_iter()
            .find(|scc| scc.len() > 1 || scc.iter().any(|n| graph.contains_edge(*n, *n)))
            .map(|scc| {
                scc.iter()
                    .map(|n| graph[*n].as_str())
                    .collect::<Vec<_>>()
                    .join(" -> ")
            })
            .unwrap_or_default();
        return Err(CatalogError::Cycle(culprit));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn channel(name: &str, id: u8, watching: &[&str]) -> MetaChannelDecl {
        MetaChannelDecl {
            name: name.to_owned(),
            id,
            datatype: DataType::F64,
            enum_items: Vec::new(),
            watching: watching.iter().map(|w| (*w).to_owned()).collect(),
        }
    }

    #[test]
    fn registers_prefixed_meta_modules() {
        let mut standards = fixtures::standards();
        let decl = MetaModuleDecl {
            name: "Speed".to_owned(),
            id: 0xA100,
            channels: vec![channel("DoubleSpeed", 0, &["Navigation_Speed"])],
        };
        add_metamodules(&mut standards, &[decl]).expect("register");

        let module = standards.module("MetaModSpeed").expect("module");
        assert!(module.is_meta);
        assert!(standards.find_channel("MetaModSpeed_DoubleSpeed").is_some());
        assert_eq!(standards.summary().meta_modules, 1);
    }

    #[test]
    fn meta_of_meta_is_allowed_but_cycles_are_not() {
        let mut standards = fixtures::standards();
        let chained = MetaModuleDecl {
            name: "Chain".to_owned(),
            id: 0xA200,
            channels: vec![
                channel("First", 0, &["Navigation_Speed"]),
                channel("Second", 1, &["MetaModChain_First"]),
            ],
        };
        add_metamodules(&mut standards, &[chained]).expect("dag");

        let mut standards = fixtures::standards();
        let before = standards.clone();
        let cyclic = MetaModuleDecl {
            name: "Loop".to_owned(),
            id: 0xA300,
            channels: vec![
                channel("Ping", 0, &["MetaModLoop_Pong"]),
                channel("Pong", 1, &["MetaModLoop_Ping"]),
            ],
        };
        assert!(matches!(
            add_metamodules(&mut standards, &[cyclic]),
            Err(CatalogError::Cycle(_))
        ));
        assert_eq!(standards, before);
    }

    #[test]
    fn separate_registrations_cannot_close_a_cycle() {
        let mut standards = fixtures::standards();
        // Watching a module that is not registered yet fails outright.
        let early = MetaModuleDecl {
            name: "Early".to_owned(),
            id: 0xA500,
            channels: vec![channel("X", 0, &["MetaModLate_Y"])],
        };
        assert!(matches!(
            add_metamodules(&mut standards, &[early]),
            Err(CatalogError::Missing(_))
        ));

        let late = MetaModuleDecl {
            name: "Late".to_owned(),
            id: 0xA600,
            channels: vec![channel("Y", 0, &["Navigation_Speed"])],
        };
        add_metamodules(&mut standards, &[late]).expect("late");
        let early = MetaModuleDecl {
            name: "Early".to_owned(),
            id: 0xA500,
            channels: vec![channel("X", 0, &["MetaModLate_Y"])],
        };
        add_metamodules(&mut standards, &[early]).expect("early");

        // Closing the loop means redeclaring a registered module.
        let before = standards.clone();
        let late_again = MetaModuleDecl {
            name: "Late".to_owned(),
            id: 0xA600,
            channels: vec![channel("Y", 0, &["MetaModEarly_X"])],
        };
        assert!(matches!(
            add_metamodules(&mut standards, &[late_again]),
            Err(CatalogError::Duplicate { .. })
        ));
        assert_eq!(standards, before);
    }

    #[test]
    fn rejects_out_of_range_ids_and_unknown_sources() {
        let mut standards = fixtures::standards();
        let outside = MetaModuleDecl {
            name: "Outside".to_owned(),
            id: 0x4A00,
            channels: vec![],
        };
        assert!(matches!(
            add_metamodules(&mut standards, &[outside]),
            Err(CatalogError::Schema { .. })
        ));

        let dangling = MetaModuleDecl {
            name: "Dangling".to_owned(),
            id: 0xA400,
            channels: vec![channel("X", 0, &["Nowhere_Nothing"])],
        };
        assert!(matches!(
            add_metamodules(&mut standards, &[dangling]),
            Err(CatalogError::Missing(_))
        ));
        assert!(standards.module("MetaModDangling").is_none());
    }
}
