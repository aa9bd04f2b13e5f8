//! PipeWire error types.

use thiserror::Error;

use crate::loopback::LoopbackSide;

/// PipeWire error type.
#[derive(Debug, Error)]
pub enum PwError {
    #[error("`{command}` failed (status {status:?}): {stderr}")]
    ExternalToolFailure { command: String, status: Option<i32>, stderr: String },

    #[error("Failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed record for object {id}: {reason}")]
    MalformedRecord { id: u32, reason: String },

    #[error(
        "Port count mismatch: node {source_node} has {outputs} output ports, node {sink_node} has {inputs} input ports"
    )]
    PortCountMismatch { source_node: u32, outputs: usize, sink_node: u32, inputs: usize },

    #[error("Loopback node for {name} ({side}) not found after {attempts} attempts")]
    LoopbackNodeNotFound { name: String, side: LoopbackSide, attempts: u32 },

    #[error("No links were created from node {source_node} to node {sink_node}")]
    NoLinksCreated { source_node: u32, sink_node: u32 },

    #[error("Node not found: {0}")]
    NodeNotFound(u32),

    #[error("Virtual sink is not tracked: {0}")]
    SinkNotTracked(String),

    #[error("Binding not found: {0}")]
    BindingNotFound(u64),

    #[error(transparent)]
    Core(#[from] approute_core::Error),
}

/// Result type for PipeWire operations.
pub type PwResult<T> = Result<T, PwError>;
