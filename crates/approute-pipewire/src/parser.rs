//! Parser for the human-readable object dump printed by `pw-cli info all`.
//!
//! The dump is a sequence of blocks, one per registry object:
//!
//! ```text
//!     id: 64
//!     permissions: r-xm
//!     type: PipeWire:Interface:Port/3
//! *   direction: "output"
//! *   properties:
//! *       port.name = "monitor_FL"
//! *       node.id = "62"
//! *   params: (6)
//! ```
//!
//! Lines before `properties:` are root attributes (`key: value`), lines after it
//! are properties (`key = value`). A `format:` section is skipped and `params:`
//! ends the block. Lines matching neither shape are dropped with a warning.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

/// Line index (within a block, delimiter line included) of the `type:` line.
const TYPE_LINE_OFFSET: usize = 2;

static BLOCK_DELIMITER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*id: (\d+)\s*$").expect("valid delimiter regex"));

static ROOT_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\**\s+([A-Za-z0-9 ._-]+): (.+)$").expect("valid attribute regex"));

static PROPERTY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\**\s+([A-Za-z0-9._-]+) = (.+)$").expect("valid property regex"));

static TYPE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"type: ([^\s/]+)/(\d+)").expect("valid type regex"));

/// A typed attribute or property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Convert raw dump text into a typed value.
    ///
    /// Surrounding quotes are stripped, then `true`/`false`, integers and
    /// floats are tried in that order; the first successful parse wins.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let text = unquote(raw);
        match text {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => {
                if let Ok(i) = text.parse::<i64>() {
                    Self::Int(i)
                } else if let Ok(f) = text.parse::<f64>() {
                    Self::Float(f)
                } else {
                    Self::Str(text.to_string())
                }
            }
        }
    }

    /// The value as an object id, if it is a non-negative integer in range.
    #[must_use]
    pub fn as_id(&self) -> Option<u32> {
        match self {
            Self::Int(i) => u32::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Registry object kind, taken from the `type:` line of a block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Core,
    Client,
    Module,
    Node,
    Port,
    Link,
    Device,
    Factory,
    Session,
    Endpoint,
    Other(String),
}

impl ObjectKind {
    /// Classify a type token such as `PipeWire:Interface:Node`.
    #[must_use]
    pub fn from_type_token(token: &str) -> Self {
        let name = token.rsplit(':').next().unwrap_or(token);
        match name {
            "Core" => Self::Core,
            "Client" => Self::Client,
            "Module" => Self::Module,
            "Node" => Self::Node,
            "Port" => Self::Port,
            "Link" => Self::Link,
            "Device" => Self::Device,
            "Factory" => Self::Factory,
            "Session" => Self::Session,
            "Endpoint" => Self::Endpoint,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One parsed registry object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    /// PipeWire object ID
    pub id: u32,
    /// Object kind
    pub kind: ObjectKind,
    /// Interface version from the type line
    pub version: Option<u32>,
    /// Root attributes (`key: value` lines)
    pub attributes: BTreeMap<String, Value>,
    /// Properties (`key = value` lines)
    pub properties: BTreeMap<String, Value>,
    /// Property text as the daemon printed it, quotes stripped
    pub raw_properties: BTreeMap<String, String>,
}

impl ObjectRecord {
    /// Get a root attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Get a property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Get a property's text exactly as printed, without the typed conversion.
    ///
    /// `"007"` stays `007` here while [`property`](Self::property) yields `Int(7)`.
    #[must_use]
    pub fn property_text(&self, key: &str) -> Option<String> {
        self.raw_properties.get(key).cloned()
    }
}

/// A line the parser could not classify. Recoverable: the line is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    /// Object the line belonged to, if a block had started
    pub object_id: Option<u32>,
    /// The offending line
    pub line: String,
}

/// Result of parsing a full dump.
#[derive(Debug, Clone, Default)]
pub struct ParsedDump {
    /// Objects by ID
    pub objects: BTreeMap<u32, ObjectRecord>,
    /// Lines or blocks that were dropped
    pub warnings: Vec<ParseWarning>,
}

impl ParsedDump {
    /// Iterate over every object of one kind, in ID order.
    pub fn of_kind<'a>(&'a self, kind: &'a ObjectKind) -> impl Iterator<Item = &'a ObjectRecord> {
        self.objects.values().filter(move |o| &o.kind == kind)
    }

    /// IDs of every object of one kind, in ascending order.
    #[must_use]
    pub fn ids_of(&self, kind: &ObjectKind) -> Vec<u32> {
        self.of_kind(kind).map(|o| o.id).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Root,
    Format,
    Properties,
}

/// Parse a complete `pw-cli info all` dump.
#[must_use]
pub fn parse_dump(text: &str) -> ParsedDump {
    let mut dump = ParsedDump::default();
    let mut current: Option<(u32, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some(caps) = BLOCK_DELIMITER.captures(line) {
            if let Some((id, lines)) = current.take() {
                parse_block_into(&mut dump, id, &lines);
            }
            match caps[1].parse::<u32>() {
                Ok(id) => current = Some((id, vec![line])),
                Err(_) => {
                    warn!(line, "Object id out of range, skipping block");
                    dump.warnings.push(ParseWarning { object_id: None, line: line.to_string() });
                }
            }
            continue;
        }

        match current.as_mut() {
            Some((_, lines)) => lines.push(line),
            None if line.trim().is_empty() => {}
            None => {
                debug!(line, "Text before first object block ignored");
                dump.warnings.push(ParseWarning { object_id: None, line: line.to_string() });
            }
        }
    }

    if let Some((id, lines)) = current.take() {
        parse_block_into(&mut dump, id, &lines);
    }

    debug!(objects = dump.objects.len(), warnings = dump.warnings.len(), "Parsed object dump");
    dump
}

fn parse_block_into(dump: &mut ParsedDump, id: u32, lines: &[&str]) {
    let Some((kind, version)) = lines.get(TYPE_LINE_OFFSET).and_then(|l| classify(l)) else {
        warn!(id, "Object block has no type line, skipping");
        dump.warnings.push(ParseWarning {
            object_id: Some(id),
            line: lines.get(TYPE_LINE_OFFSET).copied().unwrap_or_default().to_string(),
        });
        return;
    };

    let (record, warnings) = parse_block(id, kind, version, lines);
    dump.warnings.extend(warnings);
    dump.objects.insert(id, record);
}

fn classify(line: &str) -> Option<(ObjectKind, Option<u32>)> {
    let caps = TYPE_TOKEN.captures(line)?;
    Some((ObjectKind::from_type_token(&caps[1]), caps[2].parse().ok()))
}

/// Parse the lines of one object block into a record.
///
/// The delimiter line (`id: N`) is treated like any other root attribute.
#[must_use]
pub fn parse_block(
    id: u32,
    kind: ObjectKind,
    version: Option<u32>,
    lines: &[&str],
) -> (ObjectRecord, Vec<ParseWarning>) {
    let mut record = ObjectRecord {
        id,
        kind,
        version,
        attributes: BTreeMap::new(),
        properties: BTreeMap::new(),
        raw_properties: BTreeMap::new(),
    };
    let mut warnings = Vec::new();
    let mut section = Section::Root;

    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        // Params are never needed and their layout varies the most.
        if line.contains("params: ") {
            break;
        }
        if line.ends_with("properties:") {
            section = Section::Properties;
            continue;
        }

        match section {
            Section::Format => {}
            Section::Root if bullet_content(line) == "format:" => section = Section::Format,
            Section::Root => match ROOT_ATTRIBUTE.captures(line) {
                Some(caps) => {
                    record.attributes.insert(caps[1].to_string(), Value::parse(&caps[2]));
                }
                None => warnings.push(unrecognised(id, line)),
            },
            Section::Properties => match PROPERTY.captures(line) {
                Some(caps) => {
                    record.properties.insert(caps[1].to_string(), Value::parse(&caps[2]));
                    record.raw_properties.insert(caps[1].to_string(), unquote(&caps[2]).to_string());
                }
                None => warnings.push(unrecognised(id, line)),
            },
        }
    }

    (record, warnings)
}

fn unquote(raw: &str) -> &str {
    raw.trim().trim_matches('"')
}

fn bullet_content(line: &str) -> &str {
    line.trim_start_matches('*').trim()
}

fn unrecognised(id: u32, line: &str) -> ParseWarning {
    warn!(id, line, "Unrecognised pattern, skipping");
    ParseWarning { object_id: Some(id), line: line.to_string() }
}
