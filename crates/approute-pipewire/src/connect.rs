//! Port-level linking between nodes.
//!
//! Ports are paired by sorting both sides on their reversed names, so
//! `output_FL` meets `playback_FL` and `output_FR` meets `playback_FR`
//! regardless of prefix or object ID order.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{PwError, PwResult};
use crate::gateway::DaemonGateway;
use crate::graph::GraphManager;
use crate::link::PortPair;
use crate::node::{Node, Port, PortDirection};

/// Outcome of a batch of link or unlink commands.
///
/// Individual command failures are logged and counted, never raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkReport {
    /// Commands that succeeded
    pub succeeded: usize,
    /// Commands that failed
    pub failed: usize,
}

impl LinkReport {
    /// Check if every command succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    fn merge(self, other: Self) -> Self {
        Self { succeeded: self.succeeded + other.succeeded, failed: self.failed + other.failed }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Link,
    Unlink,
}

/// Pair the output ports of `source` with the input ports of `sink`.
///
/// # Errors
/// Returns [`PwError::PortCountMismatch`] when the counts differ.
pub fn pair_ports(source: &Node, sink: &Node) -> PwResult<Vec<PortPair>> {
    let outputs = sorted_by_reversed_name(source.ports(PortDirection::Output));
    let inputs = sorted_by_reversed_name(sink.ports(PortDirection::Input));

    if outputs.len() != inputs.len() {
        return Err(PwError::PortCountMismatch {
            source_node: source.id,
            outputs: outputs.len(),
            sink_node: sink.id,
            inputs: inputs.len(),
        });
    }

    Ok(outputs
        .into_iter()
        .zip(inputs)
        .map(|(out, inp)| PortPair { output_port: out.id, input_port: inp.id })
        .collect())
}

fn sorted_by_reversed_name(mut ports: Vec<&Port>) -> Vec<&Port> {
    ports.sort_by_cached_key(|p| (p.name.chars().rev().collect::<String>(), p.id));
    ports
}

/// Issues link commands against the nodes of the current snapshot.
pub struct ConnectionEngine {
    graph: Arc<GraphManager>,
}

impl ConnectionEngine {
    /// Create an engine over a graph manager.
    #[must_use]
    pub fn new(graph: Arc<GraphManager>) -> Self {
        Self { graph }
    }

    /// The graph this engine resolves nodes from.
    #[must_use]
    pub fn graph(&self) -> &Arc<GraphManager> {
        &self.graph
    }

    fn gateway(&self) -> &Arc<dyn DaemonGateway> {
        self.graph.gateway()
    }

    fn resolve(&self, source_id: u32, sink_id: u32) -> PwResult<(Node, Node)> {
        let snapshot = self.graph.snapshot();
        let source = snapshot.node(source_id).cloned().ok_or(PwError::NodeNotFound(source_id))?;
        let sink = snapshot.node(sink_id).cloned().ok_or(PwError::NodeNotFound(sink_id))?;
        Ok((source, sink))
    }

    /// Link every output port of one node to the matching input port of another.
    ///
    /// # Errors
    /// Returns an error if either node is unknown or the port counts differ.
    /// In both cases no command is issued.
    pub fn connect(&self, source_id: u32, sink_id: u32) -> PwResult<LinkReport> {
        let (source, sink) = self.resolve(source_id, sink_id)?;
        self.connect_nodes(&source, &sink)
    }

    /// [`connect`](Self::connect) for nodes already in hand.
    ///
    /// # Errors
    /// Returns [`PwError::PortCountMismatch`] without issuing any command.
    pub fn connect_nodes(&self, source: &Node, sink: &Node) -> PwResult<LinkReport> {
        let pairs = pair_ports(source, sink)?;
        let report = self.apply(Command::Link, &pairs);
        info!(
            source = source.id,
            sink = sink.id,
            linked = report.succeeded,
            failed = report.failed,
            "Connected nodes"
        );
        Ok(report)
    }

    /// Remove the links [`connect`](Self::connect) would create.
    ///
    /// # Errors
    /// Returns an error if either node is unknown or the port counts differ.
    pub fn disconnect(&self, source_id: u32, sink_id: u32) -> PwResult<LinkReport> {
        let (source, sink) = self.resolve(source_id, sink_id)?;
        self.disconnect_nodes(&source, &sink)
    }

    /// [`disconnect`](Self::disconnect) for nodes already in hand.
    ///
    /// # Errors
    /// Returns [`PwError::PortCountMismatch`] without issuing any command.
    pub fn disconnect_nodes(&self, source: &Node, sink: &Node) -> PwResult<LinkReport> {
        let pairs = pair_ports(source, sink)?;
        let report = self.unlink_pairs(&pairs);
        info!(
            source = source.id,
            sink = sink.id,
            unlinked = report.succeeded,
            failed = report.failed,
            "Disconnected nodes"
        );
        Ok(report)
    }

    /// Make `source` the only node feeding `sink`.
    ///
    /// Every link into the sink's input ports is removed first, using the
    /// current snapshot, then the nodes are connected.
    ///
    /// # Errors
    /// Returns an error if either node is unknown or the port counts differ.
    /// The existing links are left alone in that case.
    pub fn connect_replacing(&self, source_id: u32, sink_id: u32) -> PwResult<LinkReport> {
        let (source, sink) = self.resolve(source_id, sink_id)?;
        self.connect_replacing_nodes(&source, &sink)
    }

    /// [`connect_replacing`](Self::connect_replacing) for nodes already in hand.
    ///
    /// # Errors
    /// Returns [`PwError::PortCountMismatch`] without issuing any command.
    pub fn connect_replacing_nodes(&self, source: &Node, sink: &Node) -> PwResult<LinkReport> {
        let pairs = pair_ports(source, sink)?;
        let removed = self.disconnect_all_inputs(sink);
        let report = self.apply(Command::Link, &pairs);
        info!(
            source = source.id,
            sink = sink.id,
            replaced = removed.succeeded,
            linked = report.succeeded,
            failed = report.failed,
            "Replaced sink inputs"
        );
        Ok(report)
    }

    /// Remove every link feeding the node's input ports.
    pub fn disconnect_all_inputs(&self, node: &Node) -> LinkReport {
        let snapshot = self.graph.snapshot();
        let pairs: Vec<PortPair> = snapshot.links_into(node).iter().map(|l| l.ports()).collect();
        debug!(node = node.id, links = pairs.len(), "Removing links into node");
        self.unlink_pairs(&pairs)
    }

    /// Remove every link leaving the node's output ports.
    pub fn disconnect_all_outputs(&self, node: &Node) -> LinkReport {
        let snapshot = self.graph.snapshot();
        let pairs: Vec<PortPair> = snapshot.links_from(node).iter().map(|l| l.ports()).collect();
        debug!(node = node.id, links = pairs.len(), "Removing links out of node");
        self.unlink_pairs(&pairs)
    }

    /// Unlink specific port pairs.
    pub fn unlink_pairs(&self, pairs: &[PortPair]) -> LinkReport {
        self.apply(Command::Unlink, pairs)
    }

    fn apply(&self, command: Command, pairs: &[PortPair]) -> LinkReport {
        pairs.iter().fold(LinkReport::default(), |report, pair| {
            let result = match command {
                Command::Link => self.gateway().link(pair.output_port, pair.input_port),
                Command::Unlink => self.gateway().unlink(pair.output_port, pair.input_port),
            };
            let outcome = match result {
                Ok(()) => {
                    debug!(?command, output = pair.output_port, input = pair.input_port, "Port command done");
                    LinkReport { succeeded: 1, failed: 0 }
                }
                Err(e) => {
                    warn!(?command, output = pair.output_port, input = pair.input_port, error = %e, "Port command failed");
                    LinkReport { succeeded: 0, failed: 1 }
                }
            };
            report.merge(outcome)
        })
    }
}
