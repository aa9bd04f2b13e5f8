//! approute PipeWire - Graph snapshots, virtual sinks and links.
//!
//! This crate drives a PipeWire daemon through its command-line tools:
//! - Parsing the `pw-cli info all` object dump into graph snapshots
//! - Linking nodes port by port with `pw-link`
//! - Creating virtual sinks with `pw-loopback` and waiting for their nodes
//! - Keeping user bindings consistent as the graph changes

pub mod binding;
pub mod connect;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod link;
pub mod loopback;
pub mod monitor;
pub mod node;
pub mod parser;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use binding::{BindingId, BindingRole, BindingState, BindingTable};
pub use connect::{ConnectionEngine, LinkReport};
pub use error::{PwError, PwResult};
pub use gateway::{DaemonGateway, LoopbackProcess, PwCliGateway, ToolPaths};
pub use graph::{GraphConfig, GraphManager, GraphSnapshot};
pub use loopback::{LoopbackManager, LoopbackProps, LoopbackSide, VirtualSink};
pub use monitor::{ChangeMonitor, GraphEvent};
pub use node::{Node, NodeFilter, Port, PortDirection};
pub use router::{Route, Router, RouterConfig};
