//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Process-wide DataStandards directory and lookups."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Command, Event, Module, TelemetryChannel};
use crate::name_id::{NameIdMap, NameOrId};
use crate::{CatalogError, Result};

/// The full command/telemetry dictionary. Built once at startup and shared
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataStandards {
    /// Version string of the dictionary source (topology `version` attribute
    /// or the crate version).
    pub version: String,
    /// Modules keyed by ID and name.
    pub modules: NameIdMap<Module>,
}

/// Entry counts reported by the operator tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StandardsSummary {
    /// All modules, meta included.
    pub modules: usize,
    /// Ground-computed MetaModules.
    pub meta_modules: usize,
    /// Commands across all modules.
    pub commands: usize,
    /// Telemetry channels across all modules.
    pub channels: usize,
    /// Events across all modules.
    pub events: usize,
}

impl fmt::Display for StandardsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} modules ({} meta), {} commands, {} channels, {} events",
            self.modules, self.meta_modules, self.commands, self.channels, self.events
        )
    }
}

impl DataStandards {
    /// Empty standards with the given version label.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            modules: NameIdMap::new(),
        }
    }

    /// Add a module, rejecting ID or name collisions and modules whose ID has
    /// a non-zero low byte.
    pub fn add_module(&mut self, module: Module) -> Result<()> {
        if module.id & 0x00FF != 0 {
            return Err(CatalogError::schema(
                &module.name,
                format!("module id {:#06X} must have a zero low byte", module.id),
            ));
        }
        let id = module.id;
        let name = module.name.clone();
        self.modules
            .insert(id, name, module)
            .map_err(|conflict| CatalogError::duplicate("modules", conflict.to_string()))
    }

    /// Module by name or full 16-bit ID.
    pub fn module<'k>(&self, key: impl Into<NameOrId<'k>>) -> Option<&Module> {
        self.modules.get(key)
    }

    /// Module by the high byte carried in payload headers.
    pub fn module_by_hi(&self, id_hi: u8) -> Option<&Module> {
        self.modules.get(u16::from(id_hi) << 8)
    }

    /// Command by global opcode (`module.id | command.id`).
    pub fn command_by_opcode(&self, opcode: u16) -> Option<(&Module, &Command)> {
        let module = self.modules.get(opcode & 0xFF00)?;
        let command = module.commands.get((opcode & 0x00FF) as u8)?;
        Some((module, command))
    }

    /// Command by `Module_Command` name, `Module.Command`, or a bare command
    /// name unique across modules.
    pub fn find_command(&self, name: &str) -> Option<(&Module, &Command)> {
        if let Some((module, rest)) = self.split_qualified(name) {
            if let Some(command) = module
                .commands
                .get(name)
                .or_else(|| module.commands.get(module.qualified_name(rest).as_str()))
                .or_else(|| module.commands.values().find(|c| c.mnemonic == rest))
            {
                return Some((module, command));
            }
        }
        let mut hits = self.modules.values().filter_map(|module| {
            module
                .commands
                .values()
                .find(|c| c.mnemonic == name)
                .map(|command| (module, command))
        });
        let first = hits.next()?;
        hits.next().is_none().then_some(first)
    }

    /// Channel by module high byte and channel ID.
    pub fn channel(&self, id_hi: u8, channel_id: u8) -> Option<(&Module, &TelemetryChannel)> {
        let module = self.module_by_hi(id_hi)?;
        Some((module, module.telemetry.get(channel_id)?))
    }

    /// Event by module high byte and event ID.
    pub fn event(&self, id_hi: u8, event_id: u8) -> Option<(&Module, &Event)> {
        let module = self.module_by_hi(id_hi)?;
        Some((module, module.events.get(event_id)?))
    }

    /// Channel by `Module_Channel` or `Module.Channel`.
    pub fn find_channel(&self, qualified: &str) -> Option<(&Module, &TelemetryChannel)> {
        let (module, rest) = self.split_qualified(qualified)?;
        Some((module, module.telemetry.get(rest)?))
    }

    /// Event by `Module_Event` or `Module.Event`.
    pub fn find_event(&self, qualified: &str) -> Option<(&Module, &Event)> {
        let (module, rest) = self.split_qualified(qualified)?;
        Some((module, module.events.get(rest)?))
    }

    /// Split `Module_Rest` or `Module.Rest`, preferring the longest module
    /// name that matches (module names may themselves share prefixes).
    fn split_qualified<'a>(&self, qualified: &'a str) -> Option<(&Module, &'a str)> {
        self.modules
            .values()
            .filter_map(|module| {
                let rest = qualified.strip_prefix(module.name.as_str())?;
                let rest = rest.strip_prefix('_').or_else(|| rest.strip_prefix('.'))?;
                Some((module, rest))
            })
            .max_by_key(|(module, _)| module.name.len())
    }

    /// Entry counts.
    pub fn summary(&self) -> StandardsSummary {
        let mut summary = StandardsSummary {
            modules: self.modules.len(),
            meta_modules: 0,
            commands: 0,
            channels: 0,
            events: 0,
        };
        for module in self.modules.values() {
            if module.is_meta {
                summary.meta_modules += 1;
            }
            summary.commands += module.commands.len();
            summary.channels += module.telemetry.len();
            summary.events += module.events.len();
        }
        summary
    }
}
