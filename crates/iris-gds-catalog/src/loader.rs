//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Builds DataStandards from an F Prime topology and component XML tree."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! F Prime XML loader.
//!
//! The topology file lists `<import_component_type>` paths (relative to the
//! topology file) and one `<instance type=".." base_id="..">` per component.
//! Each component file holds `<commands>`, `<telemetry>` and `<events>`,
//! possibly spread over further `<import_*>` files. `ID`-like attributes
//! (`id`, `opcode`, `base_id`, `origin`, `length`) are hexadecimal with or
//! without a `0x` prefix.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::datatype::{DataType, IntType};
use crate::model::{
    Argument, BitfieldSpec, Command, EnumItem, Event, Metadata, Module, RangeLimits, Severity,
    TelemetryChannel,
};
use crate::prebuilt;
use crate::standards::DataStandards;
use crate::{CatalogError, Result};

const MAX_IMPORT_DEPTH: usize = 100;

/// Build the catalog from the XML tree under `root`.
///
/// `topology_file` is relative to `root`; when `None` the first
/// `*Topology*.xml` found under `root` is used.
pub fn build(
    root: &Path,
    topology_file: Option<&str>,
    include_prebuilts: bool,
) -> Result<DataStandards> {
    let topology_path = match topology_file {
        Some(file) => root.join(file),
        None => discover_topology(root)?,
    };
    if !topology_path.is_file() {
        return Err(CatalogError::Missing(format!(
            "topology file {}",
            topology_path.display()
        )));
    }
    let topology_dir = topology_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.to_path_buf());
    let topology_label = topology_path.display().to_string();
    let topology_text = read_xml(&topology_path)?;
    let topology = parse_doc(&topology_label, &topology_text)?;

    let assembly = topology.root_element();
    if !assembly.has_tag_name("assembly") {
        return Err(CatalogError::schema(
            &topology_label,
            format!(
                "topology root should be <assembly>, found <{}>",
                assembly.tag_name().name()
            ),
        ));
    }
    let version = assembly
        .attribute("version")
        .unwrap_or(env!("CARGO_PKG_VERSION"))
        .to_owned();
    let mut standards = DataStandards::new(version);

    let instances: Vec<(String, Node<'_, '_>)> = assembly
        .children()
        .filter(|n| n.has_tag_name("instance"))
        .filter_map(|n| n.attribute("type").map(|t| (standardize_name(t), n)))
        .collect();

    let mut seen_imports = HashSet::new();
    for import in assembly
        .children()
        .filter(|n| n.is_element() && n.tag_name().name().starts_with("import_component"))
    {
        let relative = node_text(import).trim().to_owned();
        if relative.is_empty() || !seen_imports.insert(relative.clone()) {
            continue;
        }
        let sources = load_sources(&topology_dir, &relative)?;
        let module = build_module(&sources, &instances, &topology_label)?;
        if standards.module(module.name.as_str()).is_some() {
            debug!(module = %module.name, import = %relative, "module already parsed, ignoring import");
            continue;
        }
        debug!(
            module = %module.name,
            id = %format!("{:#06X}", module.id),
            commands = module.commands.len(),
            channels = module.telemetry.len(),
            events = module.events.len(),
            "parsed component"
        );
        standards.add_module(module)?;
    }

    if include_prebuilts {
        for module in prebuilt::all_prebuilt_modules()? {
            standards.add_module(module)?;
        }
    }
    Ok(standards)
}

fn discover_topology(root: &Path) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.contains("Topology") && n.ends_with(".xml"))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| CatalogError::Missing(format!("no *Topology*.xml under {}", root.display())))
}

/// One XML file with processing instructions stripped.
struct SourceFile {
    label: String,
    text: String,
}

fn read_xml(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            CatalogError::Missing(format!("import {}", path.display()))
        } else {
            CatalogError::Io(err)
        }
    })?;
    Ok(strip_processing_instructions(&text))
}

/// Remove every `<? ... ?>` so imported fragments parse under the importer's
/// rules.
pub(crate) fn strip_processing_instructions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<?") {
        out.push_str(&rest[..start]);
        match rest[start..].find("?>") {
            Some(end) => rest = &rest[start + end + 2..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

fn parse_doc<'a>(label: &str, text: &'a str) -> Result<Document<'a>> {
    Document::parse(text).map_err(|err| CatalogError::schema(label, err.to_string()))
}

/// Load a component file and, recursively, every file it imports.
fn load_sources(base_dir: &Path, relative: &str) -> Result<Vec<SourceFile>> {
    let mut sources = Vec::new();
    let mut seen = HashSet::new();
    load_source_tree(base_dir, relative, &mut seen, &mut sources, MAX_IMPORT_DEPTH)?;
    Ok(sources)
}

fn load_source_tree(
    base_dir: &Path,
    relative: &str,
    seen: &mut HashSet<String>,
    out: &mut Vec<SourceFile>,
    depth: usize,
) -> Result<()> {
    if !seen.insert(relative.to_owned()) {
        return Ok(());
    }
    if !relative.to_ascii_lowercase().ends_with(".xml") {
        warn!(import = %relative, "ignoring non-xml import");
        return Ok(());
    }
    let path = base_dir.join(relative);
    let label = path.display().to_string();
    let text = read_xml(&path)?;
    let nested: Vec<String> = {
        let doc = parse_doc(&label, &text)?;
        doc.descendants()
            .filter(|n| n.is_element() && n.tag_name().name().starts_with("import_"))
            .map(|n| node_text(n).trim().to_owned())
            .filter(|t| !t.is_empty())
            .collect()
    };
    out.push(SourceFile { label, text });

    if !nested.is_empty() && depth == 0 {
        return Err(CatalogError::schema(
            relative,
            "import nesting exceeds the maximum depth",
        ));
    }
    for import in nested {
        load_source_tree(base_dir, &import, seen, out, depth.saturating_sub(1))?;
    }
    Ok(())
}

fn build_module(
    sources: &[SourceFile],
    instances: &[(String, Node<'_, '_>)],
    topology_label: &str,
) -> Result<Module> {
    let docs = sources
        .iter()
        .map(|s| parse_doc(&s.label, &s.text).map(|doc| (s.label.as_str(), doc)))
        .collect::<Result<Vec<_>>>()?;
    let (primary_label, primary) = docs
        .first()
        .ok_or_else(|| CatalogError::Missing("empty component import".to_owned()))?;

    let components: Vec<Node<'_, '_>> = primary
        .descendants()
        .filter(|n| n.has_tag_name("component"))
        .collect();
    let component = match components.as_slice() {
        [one] => *one,
        [] => {
            return Err(CatalogError::schema(
                *primary_label,
                "no <component> found in component file",
            ))
        }
        _ => {
            return Err(CatalogError::schema(
                *primary_label,
                "multiple <component>s found in one component file",
            ))
        }
    };
    let name = standardize_name(required_attr(component, "name", primary_label)?);

    let matching: Vec<&Node<'_, '_>> = instances
        .iter()
        .filter(|(ty, _)| *ty == name)
        .map(|(_, node)| node)
        .collect();
    let instance = match matching.as_slice() {
        [one] => **one,
        [] => {
            return Err(CatalogError::schema(
                topology_label,
                format!("no <instance> of component {name} in topology"),
            ))
        }
        many => {
            return Err(CatalogError::schema(
                topology_label,
                format!("{} <instance>s of component {name} in topology", many.len()),
            ))
        }
    };
    let id = parse_hex(required_attr(instance, "base_id", topology_label)?)
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| {
            CatalogError::schema(topology_label, format!("bad base_id for instance {name}"))
        })?;

    let mut module = Module::new(&name, id);
    for (label, doc) in &docs {
        for node in section_children(doc, "commands", "command") {
            let command = extract_command(node, &name, label)?;
            let command_id = u16::from(command.id);
            let command_name = command.name.clone();
            module
                .commands
                .insert(command_id, command_name, command)
                .map_err(|c| CatalogError::duplicate(format!("module {name} commands"), c.to_string()))?;
        }
        for node in section_children(doc, "telemetry", "channel") {
            let channel = extract_channel(node, label)?;
            let channel_id = u16::from(channel.id);
            let channel_name = channel.name.clone();
            module
                .telemetry
                .insert(channel_id, channel_name, channel)
                .map_err(|c| CatalogError::duplicate(format!("module {name} telemetry"), c.to_string()))?;
        }
        for node in section_children(doc, "events", "event") {
            let event = extract_event(node, label)?;
            let event_id = u16::from(event.id);
            let event_name = event.name.clone();
            module
                .events
                .insert(event_id, event_name, event)
                .map_err(|c| CatalogError::duplicate(format!("module {name} events"), c.to_string()))?;
        }
    }
    if module.commands.is_empty() && module.telemetry.is_empty() && module.events.is_empty() {
        warn!(module = %name, "module has no commands, telemetry, or events");
    }
    Ok(module)
}

fn section_children<'a, 'input>(
    doc: &'a Document<'input>,
    section: &'static str,
    entry: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    doc.descendants()
        .filter(move |n| n.has_tag_name(section))
        .flat_map(move |s| s.children().filter(move |n| n.has_tag_name(entry)))
}

fn extract_command(node: Node<'_, '_>, module_name: &str, label: &str) -> Result<Command> {
    let mnemonic = standardize_name(required_attr(node, "mnemonic", label)?);
    let id = entry_id(node, "opcode", label)?;
    let mut command = Command::new(module_name, mnemonic, id, extract_args(node, label)?);
    let (metadata, comment) = extract_metadata(node, label);
    command.metadata = metadata;
    command.comment = comment;
    Ok(command)
}

fn extract_channel(node: Node<'_, '_>, label: &str) -> Result<TelemetryChannel> {
    let name = standardize_name(required_attr(node, "name", label)?);
    let id = entry_id(node, "id", label)?;
    let datatype = extract_type(node, "data_type", label)?;
    let mut channel = TelemetryChannel::new(name, id, datatype);
    channel.enum_items = extract_enum(node, datatype, label)?;
    channel.bitfields = extract_bitfields(node, datatype, label)?;
    channel.format_string = node.attribute("format_string").map(str::to_owned);
    channel.limits = extract_limits(node, label)?;
    channel.metadata = extract_metadata(node, label).0;
    Ok(channel)
}

fn extract_event(node: Node<'_, '_>, label: &str) -> Result<Event> {
    let name = standardize_name(required_attr(node, "name", label)?);
    let id = entry_id(node, "id", label)?;
    let severity_text = required_attr(node, "severity", label)?;
    let severity: Severity = severity_text.parse().map_err(|_| {
        CatalogError::schema(label, format!("event {name} has unknown severity `{severity_text}`"))
    })?;
    let format_string = required_attr(node, "format_string", label)?;
    let mut event = Event::new(name, id, severity, format_string, extract_args(node, label)?);
    event.metadata = extract_metadata(node, label).0;
    Ok(event)
}

fn extract_args(node: Node<'_, '_>, label: &str) -> Result<Vec<Argument>> {
    node.children()
        .filter(|n| n.has_tag_name("args"))
        .flat_map(|args| args.children().filter(|n| n.has_tag_name("arg")))
        .map(|arg| {
            let name = standardize_field_name(required_attr(arg, "name", label)?);
            let datatype = extract_type(arg, "type", label)?;
            let mut argument = Argument::new(name, datatype);
            argument.enum_items = extract_enum(arg, datatype, label)?;
            argument.bitfields = extract_bitfields(arg, datatype, label)?;
            argument.metadata = extract_metadata(arg, label).0;
            Ok(argument)
        })
        .collect()
}

fn extract_type(node: Node<'_, '_>, attr: &str, label: &str) -> Result<DataType> {
    let raw = required_attr(node, attr, label)?;
    let size = match node.attribute("size") {
        Some(text) => Some(parse_auto(text).and_then(|v| usize::try_from(v).ok()).ok_or_else(
            || CatalogError::schema(label, format!("bad size `{text}` on line {}", line_of(node))),
        )?),
        None => None,
    };
    let mut datatype = DataType::from_fprime(raw, size).ok_or_else(|| {
        CatalogError::schema(
            label,
            format!(
                "type `{raw}` in attribute `{attr}` on line {} is not a known data type",
                line_of(node)
            ),
        )
    })?;

    let int_attr = |name: &str| -> Result<Option<IntType>> {
        match node.attribute(name) {
            None => Ok(None),
            Some(text) => match DataType::from_fprime(text, None) {
                Some(DataType::Int(int)) => Ok(Some(int)),
                _ => Err(CatalogError::schema(
                    label,
                    format!("`{name}` must name an integer type, got `{text}`"),
                )),
            },
        }
    };
    if let (DataType::Enum { underlying }, Some(int)) = (&mut datatype, int_attr("underlying")?) {
        *underlying = int;
    }
    if let (DataType::String { prefix, .. }, Some(int)) = (&mut datatype, int_attr("prefix")?) {
        if !matches!(int, IntType::U8 | IntType::U16 | IntType::U32) {
            return Err(CatalogError::schema(
                label,
                format!("string prefix must be U8, U16 or U32, got {int}"),
            ));
        }
        *prefix = int;
    }
    Ok(datatype)
}

fn extract_enum(node: Node<'_, '_>, datatype: DataType, label: &str) -> Result<Vec<EnumItem>> {
    let enums: Vec<Node<'_, '_>> = node.children().filter(|n| n.has_tag_name("enum")).collect();
    let enum_node = match enums.as_slice() {
        [] => return Ok(Vec::new()),
        [one] => *one,
        _ => {
            return Err(CatalogError::schema(
                label,
                format!("<{}> on line {} has multiple <enum> children", node.tag_name().name(), line_of(node)),
            ))
        }
    };
    if !datatype.is_enum() {
        return Err(CatalogError::schema(
            label,
            format!("line {}: enum items given for non-enum type {datatype}", line_of(node)),
        ));
    }
    enum_node
        .children()
        .filter(|n| n.has_tag_name("item"))
        .enumerate()
        .map(|(index, item)| {
            let name = standardize_constant_name(required_attr(item, "name", label)?);
            let value = match item.attribute("value") {
                Some(text) => parse_auto(text).and_then(|v| i64::try_from(v).ok()).ok_or_else(|| {
                    CatalogError::schema(label, format!("bad enum value `{text}` for {name}"))
                })?,
                None => index as i64,
            };
            let comment = item.attribute("comment").unwrap_or_default();
            Ok(EnumItem::with_comment(name, value, comment))
        })
        .collect()
}

fn extract_bitfields(
    node: Node<'_, '_>,
    datatype: DataType,
    label: &str,
) -> Result<Option<BitfieldSpec>> {
    let Some(bitfields) = node.children().find(|n| n.has_tag_name("bitfields")) else {
        return Ok(None);
    };
    let mut fields = Vec::new();
    for field in bitfields.children().filter(|n| n.has_tag_name("field")) {
        let name = standardize_field_name(required_attr(field, "name", label)?);
        let width_text = required_attr(field, "width", label)?;
        let width = parse_auto(width_text)
            .and_then(|w| u8::try_from(w).ok())
            .ok_or_else(|| CatalogError::schema(label, format!("bad bitfield width `{width_text}`")))?;
        fields.push((name, width));
    }
    let spec = BitfieldSpec::new(fields);
    let expected = datatype.int_type().map(IntType::size);
    if spec.byte_len().is_none() || spec.byte_len() != expected {
        return Err(CatalogError::schema(
            label,
            format!(
                "line {}: bitfield widths ({} bits) must fill the {datatype} storage exactly",
                line_of(node),
                spec.total_bits()
            ),
        ));
    }
    Ok(Some(spec))
}

fn extract_limits(node: Node<'_, '_>, label: &str) -> Result<RangeLimits> {
    let limit = |attr: &str| -> Result<Option<f64>> {
        node.attribute(attr)
            .map(|text| {
                text.trim()
                    .parse::<f64>()
                    .map_err(|_| CatalogError::schema(label, format!("bad {attr} limit `{text}`")))
            })
            .transpose()
    };
    Ok(RangeLimits {
        low_red: limit("low_red")?,
        low_orange: limit("low_orange")?,
        low_yellow: limit("low_yellow")?,
        high_yellow: limit("high_yellow")?,
        high_orange: limit("high_orange")?,
        high_red: limit("high_red")?,
    })
}

/// JSON from the entry's `<comment>` CDATA becomes metadata; anything else
/// is kept as a plain comment.
fn extract_metadata(node: Node<'_, '_>, label: &str) -> (Metadata, Option<String>) {
    let Some(comment) = node.children().find(|n| n.has_tag_name("comment")) else {
        return (Metadata::new(), None);
    };
    let text = node_text(comment);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return (Metadata::new(), None);
    }
    if trimmed.starts_with('{') {
        match serde_json::from_str::<Metadata>(trimmed) {
            Ok(metadata) => return (metadata, None),
            Err(err) => warn!(
                file = %label,
                line = line_of(node),
                error = %err,
                "comment looks like metadata but is not valid JSON; keeping it as text"
            ),
        }
    }
    (Metadata::new(), Some(trimmed.to_owned()))
}

fn entry_id(node: Node<'_, '_>, attr: &str, label: &str) -> Result<u8> {
    let text = required_attr(node, attr, label)?;
    parse_hex(text)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| {
            CatalogError::schema(
                label,
                format!("line {}: `{attr}` value `{text}` is not a one-byte hex id", line_of(node)),
            )
        })
}

fn required_attr<'a>(node: Node<'a, '_>, attr: &str, label: &str) -> Result<&'a str> {
    node.attribute(attr).ok_or_else(|| {
        CatalogError::schema(
            label,
            format!(
                "<{}> on line {} is missing attribute `{attr}`",
                node.tag_name().name(),
                line_of(node)
            ),
        )
    })
}

fn node_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

fn line_of(node: Node<'_, '_>) -> u32 {
    node.document().text_pos_at(node.range().start).row
}

/// Parse an `ID`-like attribute: hexadecimal, `0x` prefix optional.
pub fn parse_hex(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16).ok()
}

/// Parse a number whose base is given by its prefix (`0x`, `0o`, `0b`),
/// decimal otherwise. Negative decimals are accepted.
pub fn parse_auto(text: &str) -> Option<i128> {
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let lower = body.to_ascii_lowercase();
    let magnitude = if let Some(hex) = lower.strip_prefix("0x") {
        i128::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i128::from_str_radix(oct, 8).ok()?
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i128::from_str_radix(bin, 2).ok()?
    } else {
        lower.parse::<i128>().ok()?
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn split_pieces(name: &str) -> impl Iterator<Item = &str> {
    name.split(|c: char| c.is_whitespace() || c == '_' || c == '-' || c == ':')
        .filter(|p| !p.is_empty())
}

/// Split on separators, then before every capital letter.
fn split_on_capitals(name: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for piece in split_pieces(name) {
        let mut current = String::new();
        for ch in piece.chars() {
            if ch.is_ascii_uppercase() && !current.is_empty() {
                terms.push(std::mem::take(&mut current));
            }
            current.push(ch);
        }
        if !current.is_empty() {
            terms.push(current);
        }
    }
    terms
}

/// Split on separators, then on case boundaries keeping acronyms together
/// (`ADCValue` -> `ADC`, `Value`).
fn split_terms(name: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for piece in split_pieces(name) {
        let chars: Vec<char> = piece.chars().collect();
        let mut current = String::new();
        for (i, &ch) in chars.iter().enumerate() {
            if !current.is_empty() && ch.is_ascii_uppercase() {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|c| c.is_ascii_lowercase());
                if !prev.is_ascii_uppercase() || next_is_lower {
                    terms.push(std::mem::take(&mut current));
                }
            }
            current.push(ch);
        }
        if !current.is_empty() {
            terms.push(current);
        }
    }
    terms
}

/// `nav_driveForward` -> `NavDriveForward`. Used for modules, commands,
/// channels and events.
pub fn standardize_name(name: &str) -> String {
    split_on_capitals(name)
        .into_iter()
        .map(|term| {
            let mut chars = term.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// `CallbackId` -> `callback_id`. Used for arguments and bitfields.
pub fn standardize_field_name(name: &str) -> String {
    split_terms(name)
        .iter()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// `notDeployed` -> `NOT_DEPLOYED`. Used for enum items.
pub fn standardize_constant_name(name: &str) -> String {
    split_terms(name)
        .iter()
        .map(|t| t.to_uppercase())
        .collect::<Vec<_>>()
        .join("_")
}
