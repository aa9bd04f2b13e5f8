//! PipeWire nodes and ports as seen in one graph snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PwError, PwResult};
use crate::parser::{ObjectKind, ObjectRecord};

/// Placeholder for node properties the daemon did not report.
pub const UNKNOWN: &str = "unknown";

/// Port direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port (receives audio)
    Input,
    /// Output port (sends audio)
    Output,
}

impl PortDirection {
    /// Parse the daemon's spelling (`in`/`out` in properties, `input`/`output` in attributes).
    #[must_use]
    pub fn from_daemon(text: &str) -> Option<Self> {
        match text {
            "in" | "input" => Some(Self::Input),
            "out" | "output" => Some(Self::Output),
            _ => None,
        }
    }
}

/// Information about a PipeWire port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// PipeWire object ID
    pub id: u32,
    /// Port name (e.g. `playback_FL`)
    pub name: String,
    /// Port alias
    pub alias: String,
    /// Parent node ID
    pub node_id: u32,
    /// Port direction (in/out)
    pub direction: PortDirection,
}

impl Port {
    /// Build a port from a parsed `Port` object.
    ///
    /// # Errors
    /// Returns [`PwError::MalformedRecord`] if the record is not a port or lacks
    /// its name, direction or parent node.
    pub fn from_record(record: &ObjectRecord) -> PwResult<Self> {
        let malformed = |reason: &str| PwError::MalformedRecord {
            id: record.id,
            reason: reason.to_string(),
        };

        if record.kind != ObjectKind::Port {
            return Err(malformed("not a port"));
        }

        let name = record.property_text("port.name").ok_or_else(|| malformed("missing port.name"))?;
        let direction = record
            .property_text("port.direction")
            .or_else(|| record.attribute("direction").map(ToString::to_string))
            .and_then(|d| PortDirection::from_daemon(&d))
            .ok_or_else(|| malformed("missing or unknown port direction"))?;
        let node_id = record
            .property("node.id")
            .and_then(crate::parser::Value::as_id)
            .ok_or_else(|| malformed("missing node.id"))?;
        let alias = record.property_text("port.alias").unwrap_or_else(|| name.clone());

        Ok(Self { id: record.id, name, alias, node_id, direction })
    }
}

/// Information about a PipeWire node.
///
/// Port maps are filled by [`GraphSnapshot`](crate::graph::GraphSnapshot)
/// from each port's back-reference, never from the node's own record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// PipeWire object ID
    pub id: u32,
    /// Node name
    pub node_name: String,
    /// Application name (for client nodes)
    pub app_name: String,
    /// Media name
    pub media_name: String,
    /// Input ports by ID
    pub input_ports: BTreeMap<u32, Port>,
    /// Output ports by ID
    pub output_ports: BTreeMap<u32, Port>,
}

impl Node {
    /// Build a node (without ports) from a parsed `Node` object.
    ///
    /// # Errors
    /// Returns [`PwError::MalformedRecord`] if the record is not a node.
    pub fn from_record(record: &ObjectRecord) -> PwResult<Self> {
        if record.kind != ObjectKind::Node {
            return Err(PwError::MalformedRecord { id: record.id, reason: "not a node".to_string() });
        }

        let text = |key: &str| record.property_text(key).unwrap_or_else(|| UNKNOWN.to_string());

        Ok(Self {
            id: record.id,
            node_name: text("node.name"),
            app_name: text("application.name"),
            media_name: text("media.name"),
            input_ports: BTreeMap::new(),
            output_ports: BTreeMap::new(),
        })
    }

    /// Check if this node produces audio (has output ports).
    #[must_use]
    pub fn is_source(&self) -> bool {
        !self.output_ports.is_empty()
    }

    /// Check if this node consumes audio (has input ports).
    #[must_use]
    pub fn is_sink(&self) -> bool {
        !self.input_ports.is_empty()
    }

    /// Check if a port belongs to this node, in either direction.
    #[must_use]
    pub fn contains_port(&self, port_id: u32) -> bool {
        self.input_ports.contains_key(&port_id) || self.output_ports.contains_key(&port_id)
    }

    /// Name shown in pickers: `node (app): media`, the app part only when it differs.
    #[must_use]
    pub fn readable_name(&self) -> String {
        if self.app_name == self.node_name {
            format!("{}: {}", self.node_name, self.media_name)
        } else {
            format!("{} ({}): {}", self.node_name, self.app_name, self.media_name)
        }
    }

    /// Ports in one direction, in ID order.
    #[must_use]
    pub fn ports(&self, direction: PortDirection) -> Vec<&Port> {
        match direction {
            PortDirection::Input => self.input_ports.values().collect(),
            PortDirection::Output => self.output_ports.values().collect(),
        }
    }

    /// File a port under the map matching its direction.
    pub(crate) fn attach_port(&mut self, port: Port) {
        match port.direction {
            PortDirection::Input => self.input_ports.insert(port.id, port),
            PortDirection::Output => self.output_ports.insert(port.id, port),
        };
    }
}

/// Which nodes a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeFilter {
    /// Every node
    All,
    /// Nodes with at least one output port
    Sources,
    /// Nodes with at least one input port
    Sinks,
}

impl NodeFilter {
    /// Check if a node passes this filter.
    #[must_use]
    pub fn matches(self, node: &Node) -> bool {
        match self {
            Self::All => true,
            Self::Sources => node.is_source(),
            Self::Sinks => node.is_sink(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_dump;
    use assert_matches::assert_matches;

    fn node(node_name: &str, app_name: &str, media_name: &str) -> Node {
        Node {
            id: 1,
            node_name: node_name.into(),
            app_name: app_name.into(),
            media_name: media_name.into(),
            input_ports: BTreeMap::new(),
            output_ports: BTreeMap::new(),
        }
    }

    #[test]
    fn test_readable_name_collapses_identical_app() {
        assert_eq!(node("Firefox", "Firefox", "AudioStream").readable_name(), "Firefox: AudioStream");
        assert_eq!(
            node("spotify", "Spotify", "Spotify").readable_name(),
            "spotify (Spotify): Spotify"
        );
    }

    #[test]
    fn test_missing_properties_default_to_placeholder() {
        let dump = parse_dump(
            "\tid: 40\n\tpermissions: r-xm\n\ttype: PipeWire:Interface:Node/3\n*\tproperties:\n*\t\tnode.name = \"alsa_output\"\n",
        );
        let node = Node::from_record(&dump.objects[&40]).unwrap();

        assert_eq!(node.node_name, "alsa_output");
        assert_eq!(node.app_name, UNKNOWN);
        assert_eq!(node.media_name, UNKNOWN);
        assert!(!node.is_sink());
        assert!(!node.is_source());
    }

    #[test]
    fn test_numeric_looking_names_keep_their_text() {
        let dump = parse_dump(
            "\tid: 41\n\tpermissions: r-xm\n\ttype: PipeWire:Interface:Node/3\n*\tproperties:\n*\t\tnode.name = \"007\"\n*\t\tapplication.name = \"1.50\"\n*\t\tmedia.name = \"1e3\"\n",
        );
        let node = Node::from_record(&dump.objects[&41]).unwrap();

        assert_eq!(node.node_name, "007");
        assert_eq!(node.app_name, "1.50");
        assert_eq!(node.media_name, "1e3");
    }

    #[test]
    fn test_port_from_record() {
        let dump = parse_dump(
            "\tid: 64\n\tpermissions: r-xm\n\ttype: PipeWire:Interface:Port/3\n*\tdirection: \"output\"\n*\tproperties:\n*\t\tport.name = \"monitor_FL\"\n*\t\tport.direction = \"out\"\n*\t\tport.alias = \"Sink:monitor_FL\"\n*\t\tnode.id = \"62\"\n*\tparams: (6)\n",
        );
        let port = Port::from_record(&dump.objects[&64]).unwrap();

        assert_eq!(port.name, "monitor_FL");
        assert_eq!(port.alias, "Sink:monitor_FL");
        assert_eq!(port.node_id, 62);
        assert_eq!(port.direction, PortDirection::Output);
    }

    #[test]
    fn test_port_direction_falls_back_to_attribute() {
        let dump = parse_dump(
            "\tid: 65\n\tpermissions: r-xm\n\ttype: PipeWire:Interface:Port/3\n*\tdirection: \"input\"\n*\tproperties:\n*\t\tport.name = \"playback_FR\"\n*\t\tnode.id = \"47\"\n",
        );
        let port = Port::from_record(&dump.objects[&65]).unwrap();

        assert_eq!(port.direction, PortDirection::Input);
        assert_eq!(port.alias, "playback_FR");
    }

    #[test]
    fn test_port_without_parent_is_malformed() {
        let dump = parse_dump(
            "\tid: 66\n\tpermissions: r-xm\n\ttype: PipeWire:Interface:Port/3\n*\tproperties:\n*\t\tport.name = \"capture_1\"\n*\t\tport.direction = \"in\"\n",
        );

        assert_matches!(
            Port::from_record(&dump.objects[&66]),
            Err(PwError::MalformedRecord { id: 66, .. })
        );
    }

    #[test]
    fn test_attach_port_files_by_direction() {
        let mut n = node("sink", "sink", "sink");
        n.attach_port(Port {
            id: 10,
            name: "playback_FL".into(),
            alias: "playback_FL".into(),
            node_id: 1,
            direction: PortDirection::Input,
        });
        n.attach_port(Port {
            id: 11,
            name: "monitor_FL".into(),
            alias: "monitor_FL".into(),
            node_id: 1,
            direction: PortDirection::Output,
        });

        assert!(n.is_sink());
        assert!(n.is_source());
        assert!(n.contains_port(10));
        assert!(n.contains_port(11));
        assert!(!n.contains_port(12));
        assert!(NodeFilter::Sinks.matches(&n));
        assert_eq!(n.ports(PortDirection::Input).len(), 1);
    }
}
