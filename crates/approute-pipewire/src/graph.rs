//! PipeWire graph snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use approute_core::{Blacklist, RetryPolicy, Sleeper, ThreadSleeper};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PwError, PwResult};
use crate::gateway::DaemonGateway;
use crate::link::Link;
use crate::node::{Node, NodeFilter, Port};
use crate::parser::{ObjectKind, ParsedDump, parse_dump};

/// Settings for building snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Nodes hidden from every snapshot
    #[serde(default)]
    pub blacklist: Blacklist,
    /// Retry budget for a refused `pw-cli info all`
    #[serde(default = "default_dump_retry")]
    pub dump_retry: RetryPolicy,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self { blacklist: Blacklist::default(), dump_retry: default_dump_retry() }
    }
}

fn default_dump_retry() -> RetryPolicy {
    RetryPolicy::fixed(5, Duration::from_millis(200))
}

/// An immutable view of the daemon graph at one instant.
///
/// Every port in a node's port maps has that node as its parent and sits in
/// the map matching its direction. Ports whose parent node was dropped (or
/// never reported) are not part of the snapshot at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphSnapshot {
    /// Surviving ports by ID
    pub ports: BTreeMap<u32, Port>,
    /// Surviving nodes by ID
    pub nodes: BTreeMap<u32, Node>,
    /// Every link the daemon reported
    pub links: BTreeMap<u32, Link>,
}

impl GraphSnapshot {
    /// Build a snapshot from a parsed dump.
    ///
    /// Malformed objects are logged and skipped. Blacklisted nodes are dropped
    /// before ports are attached, so their ports are discarded as orphans.
    #[must_use]
    pub fn from_dump(dump: &ParsedDump, blacklist: &Blacklist) -> Self {
        let mut nodes = BTreeMap::new();
        for record in dump.of_kind(&ObjectKind::Node) {
            match Node::from_record(record) {
                Ok(node) if blacklist.blocks(&node.app_name, &node.node_name) => {
                    debug!(id = node.id, name = %node.node_name, app = %node.app_name, "Node blacklisted");
                }
                Ok(node) => {
                    nodes.insert(node.id, node);
                }
                Err(e) => warn!(error = %e, "Skipping malformed node"),
            }
        }

        let mut ports = BTreeMap::new();
        for record in dump.of_kind(&ObjectKind::Port) {
            match Port::from_record(record) {
                Ok(port) => match nodes.get_mut(&port.node_id) {
                    Some(node) => {
                        node.attach_port(port.clone());
                        ports.insert(port.id, port);
                    }
                    None => debug!(id = port.id, node_id = port.node_id, "Discarding orphaned port"),
                },
                Err(e) => warn!(error = %e, "Skipping malformed port"),
            }
        }

        let mut links = BTreeMap::new();
        for record in dump.of_kind(&ObjectKind::Link) {
            match Link::from_record(record) {
                Ok(link) => {
                    links.insert(link.id, link);
                }
                Err(e) => warn!(error = %e, "Skipping malformed link"),
            }
        }

        Self { ports, nodes, links }
    }

    /// Get a node by ID.
    #[must_use]
    pub fn node(&self, id: u32) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Find the node that owns a port.
    #[must_use]
    pub fn node_of_port(&self, port_id: u32) -> Option<&Node> {
        self.ports.get(&port_id).and_then(|p| self.nodes.get(&p.node_id))
    }

    /// Nodes passing a filter, in ID order.
    #[must_use]
    pub fn query_nodes(&self, filter: NodeFilter) -> Vec<Node> {
        self.nodes.values().filter(|n| filter.matches(n)).cloned().collect()
    }

    /// Links feeding any of a node's input ports.
    #[must_use]
    pub fn links_into(&self, node: &Node) -> Vec<&Link> {
        self.links.values().filter(|l| node.input_ports.contains_key(&l.input_port_id)).collect()
    }

    /// Links leaving any of a node's output ports.
    #[must_use]
    pub fn links_from(&self, node: &Node) -> Vec<&Link> {
        self.links.values().filter(|l| node.output_ports.contains_key(&l.output_port_id)).collect()
    }
}

/// Owns the current graph snapshot.
///
/// A refresh builds a complete new snapshot and swaps it in atomically.
/// Readers holding an older `Arc<GraphSnapshot>` keep a consistent view.
pub struct GraphManager {
    gateway: Arc<dyn DaemonGateway>,
    config: GraphConfig,
    sleeper: Arc<dyn Sleeper>,
    snapshot: ArcSwap<GraphSnapshot>,
}

impl GraphManager {
    /// Create a graph manager and load the first snapshot.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the first refresh fails.
    pub fn new(gateway: Arc<dyn DaemonGateway>, config: GraphConfig) -> PwResult<Self> {
        Self::with_sleeper(gateway, config, Arc::new(ThreadSleeper))
    }

    /// Create a graph manager that waits between dump retries with `sleeper`.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the first refresh fails.
    pub fn with_sleeper(
        gateway: Arc<dyn DaemonGateway>,
        config: GraphConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> PwResult<Self> {
        config.blacklist.validate()?;
        config.dump_retry.validate()?;

        let manager = Self {
            gateway,
            config,
            sleeper,
            snapshot: ArcSwap::from_pointee(GraphSnapshot::default()),
        };
        manager.refresh()?;
        Ok(manager)
    }

    /// Rebuild the snapshot from a fresh dump.
    ///
    /// Blocks while the dump command runs. On failure the previous snapshot
    /// stays in place.
    ///
    /// # Errors
    /// Returns the last dump error once the retry budget is spent.
    pub fn refresh(&self) -> PwResult<Arc<GraphSnapshot>> {
        let text = self.fetch_dump()?;
        let dump = parse_dump(&text);
        let snapshot = Arc::new(GraphSnapshot::from_dump(&dump, &self.config.blacklist));

        debug!(
            nodes = snapshot.nodes.len(),
            ports = snapshot.ports.len(),
            links = snapshot.links.len(),
            warnings = dump.warnings.len(),
            "Graph refreshed"
        );

        self.snapshot.store(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn fetch_dump(&self) -> PwResult<String> {
        let policy = self.config.dump_retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.gateway.dump_all() {
                Ok(text) => {
                    if attempt > 1 {
                        info!(attempt, "Object dump succeeded after retry");
                    }
                    return Ok(text);
                }
                // The daemon refuses queries for a moment while its state settles.
                Err(e @ PwError::ExternalToolFailure { .. }) if policy.allows_retry_after(attempt) => {
                    let delay = policy.delay_for(attempt);
                    warn!(attempt, ?delay, error = %e, "Object dump failed, retrying");
                    self.sleeper.sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.snapshot.load_full()
    }

    /// Nodes passing a filter in the current snapshot. Never refreshes.
    #[must_use]
    pub fn query_nodes(&self, filter: NodeFilter) -> Vec<Node> {
        self.snapshot.load().query_nodes(filter)
    }

    /// Nodes passing a filter, ordered the way pickers list them.
    #[must_use]
    pub fn picker_nodes(&self, filter: NodeFilter) -> Vec<Node> {
        let mut nodes = self.query_nodes(filter);
        nodes.sort_by_cached_key(|n| (n.readable_name().to_lowercase(), n.id));
        nodes
    }

    /// Get a node from the current snapshot.
    #[must_use]
    pub fn get_node(&self, id: u32) -> Option<Node> {
        self.snapshot.load().node(id).cloned()
    }

    /// The gateway this manager reads from.
    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn DaemonGateway> {
        &self.gateway
    }

    /// The blacklist applied to every snapshot.
    #[must_use]
    pub fn blacklist(&self) -> &Blacklist {
        &self.config.blacklist
    }
}
