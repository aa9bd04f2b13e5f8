//! PipeWire link management.

use serde::{Deserialize, Serialize};

use crate::error::{PwError, PwResult};
use crate::parser::{ObjectKind, ObjectRecord, Value};

/// Information about a PipeWire link.
///
/// Links are only ever discovered from a dump; creating or removing one goes
/// through the gateway's `link`/`unlink` commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// PipeWire object ID
    pub id: u32,
    /// Output (source) node ID
    pub output_node_id: u32,
    /// Output port ID
    pub output_port_id: u32,
    /// Input (destination) node ID
    pub input_node_id: u32,
    /// Input port ID
    pub input_port_id: u32,
}

impl Link {
    /// Build a link from a parsed `Link` object.
    ///
    /// Root attributes (`output-port-id: 64`) are preferred; the `link.*`
    /// properties are used when an attribute is missing.
    ///
    /// # Errors
    /// Returns [`PwError::MalformedRecord`] if any endpoint ID is missing.
    pub fn from_record(record: &ObjectRecord) -> PwResult<Self> {
        if record.kind != ObjectKind::Link {
            return Err(PwError::MalformedRecord { id: record.id, reason: "not a link".to_string() });
        }

        let endpoint = |attribute: &str, property: &str| {
            record
                .attribute(attribute)
                .and_then(Value::as_id)
                .or_else(|| record.property(property).and_then(Value::as_id))
                .ok_or_else(|| PwError::MalformedRecord {
                    id: record.id,
                    reason: format!("missing {attribute}"),
                })
        };

        Ok(Self {
            id: record.id,
            output_node_id: endpoint("output-node-id", "link.output.node")?,
            output_port_id: endpoint("output-port-id", "link.output.port")?,
            input_node_id: endpoint("input-node-id", "link.input.node")?,
            input_port_id: endpoint("input-port-id", "link.input.port")?,
        })
    }

    /// The port pair this link connects.
    #[must_use]
    pub fn ports(&self) -> PortPair {
        PortPair { output_port: self.output_port_id, input_port: self.input_port_id }
    }
}

/// An output port paired with an input port, the unit of `pw-link`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortPair {
    /// Output port ID
    pub output_port: u32,
    /// Input port ID
    pub input_port: u32,
}
