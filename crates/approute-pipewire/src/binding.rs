//! Bindings between a virtual sink and a user-chosen node.
//!
//! A binding is anchored on one side of a virtual sink and is either unbound
//! or bound to exactly one node. Changing the selection always tears the old
//! links down before the new ones are made.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::connect::{ConnectionEngine, pair_ports};
use crate::error::{PwError, PwResult};
use crate::node::Node;

/// Binding identifier.
pub type BindingId = u64;

/// How the anchor and the selected node are linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingRole {
    /// The selected node plays into the anchor (a virtual sink's sink side)
    Feed,
    /// The anchor (a virtual sink's source side) plays into the selected node,
    /// replacing whatever fed it before
    Target,
}

/// Binding state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingState {
    /// No node selected
    Unbound,
    /// Linked to this node
    Bound(Node),
}

impl BindingState {
    /// The bound node, if any.
    #[must_use]
    pub fn node(&self) -> Option<&Node> {
        match self {
            Self::Unbound => None,
            Self::Bound(node) => Some(node),
        }
    }
}

#[derive(Debug)]
struct Binding {
    anchor_id: u32,
    role: BindingRole,
    state: BindingState,
}

impl Binding {
    /// Source and sink of the links this binding owns.
    fn endpoints<'a>(&self, anchor: &'a Node, node: &'a Node) -> (&'a Node, &'a Node) {
        match self.role {
            BindingRole::Feed => (node, anchor),
            BindingRole::Target => (anchor, node),
        }
    }
}

/// All live bindings.
pub struct BindingTable {
    engine: Arc<ConnectionEngine>,
    bindings: Mutex<BTreeMap<BindingId, Binding>>,
    next_id: AtomicU64,
}

impl BindingTable {
    /// Create an empty table.
    #[must_use]
    pub fn new(engine: Arc<ConnectionEngine>) -> Self {
        Self { engine, bindings: Mutex::new(BTreeMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Register an unbound binding anchored on the node `anchor_id`.
    ///
    /// The anchor is looked up in the current snapshot whenever links are
    /// made or removed, so ports it gains later are picked up.
    pub fn add(&self, anchor_id: u32, role: BindingRole) -> BindingId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(binding = id, anchor = anchor_id, ?role, "Binding added");
        self.bindings.lock().insert(id, Binding { anchor_id, role, state: BindingState::Unbound });
        id
    }

    /// Current state of a binding.
    ///
    /// # Errors
    /// Returns [`PwError::BindingNotFound`] for an unknown ID.
    pub fn state(&self, id: BindingId) -> PwResult<BindingState> {
        self.bindings.lock().get(&id).map(|b| b.state.clone()).ok_or(PwError::BindingNotFound(id))
    }

    /// Check if a binding is bound to a node the current snapshot still has.
    #[must_use]
    pub fn is_live(&self, id: BindingId) -> bool {
        let bindings = self.bindings.lock();
        let Some(BindingState::Bound(node)) = bindings.get(&id).map(|b| &b.state) else {
            return false;
        };
        self.engine.graph().get_node(node.id).is_some()
    }

    /// IDs of the bindings anchored on a node.
    #[must_use]
    pub fn anchored_on(&self, anchor_id: u32) -> Vec<BindingId> {
        self.bindings.lock().iter().filter(|(_, b)| b.anchor_id == anchor_id).map(|(id, _)| *id).collect()
    }

    /// Change a binding's selection.
    ///
    /// `None` unbinds. Selecting the node already bound is a no-op. Any other
    /// selection tears down the current links, then links the new node from
    /// the current snapshot. If that fails, or no link could be created, the
    /// binding is left unbound and the error is returned.
    ///
    /// # Errors
    /// Returns [`PwError::BindingNotFound`], [`PwError::NodeNotFound`],
    /// [`PwError::PortCountMismatch`] or [`PwError::NoLinksCreated`].
    pub fn select(&self, id: BindingId, selection: Option<u32>) -> PwResult<BindingState> {
        let mut bindings = self.bindings.lock();
        let binding = bindings.get_mut(&id).ok_or(PwError::BindingNotFound(id))?;

        if let (Some(node_id), BindingState::Bound(current)) = (selection, &binding.state)
            && current.id == node_id
        {
            return Ok(binding.state.clone());
        }

        self.teardown(id, binding, None);

        let Some(node_id) = selection else {
            return Ok(BindingState::Unbound);
        };

        let graph = self.engine.graph();
        let anchor = graph.get_node(binding.anchor_id).ok_or(PwError::NodeNotFound(binding.anchor_id))?;
        let node = graph.get_node(node_id).ok_or(PwError::NodeNotFound(node_id))?;
        let (source, sink) = binding.endpoints(&anchor, &node);
        let (source_id, sink_id) = (source.id, sink.id);
        let result = match binding.role {
            BindingRole::Feed => self.engine.connect_nodes(source, sink),
            BindingRole::Target => self.engine.connect_replacing_nodes(source, sink),
        };

        match result {
            Ok(report) if report.succeeded > 0 => {
                info!(binding = id, node = node.id, linked = report.succeeded, "Binding bound");
                binding.state = BindingState::Bound(node);
                Ok(binding.state.clone())
            }
            Ok(_) => {
                warn!(binding = id, node = node.id, "Binding created no links, left unbound");
                Err(PwError::NoLinksCreated { source_node: source_id, sink_node: sink_id })
            }
            Err(e) => {
                warn!(binding = id, node = node.id, error = %e, "Binding failed, left unbound");
                Err(e)
            }
        }
    }

    /// Unbind and forget a binding.
    ///
    /// # Errors
    /// Returns [`PwError::BindingNotFound`] for an unknown ID.
    pub fn remove(&self, id: BindingId) -> PwResult<()> {
        let mut bindings = self.bindings.lock();
        let mut binding = bindings.remove(&id).ok_or(PwError::BindingNotFound(id))?;
        self.teardown(id, &mut binding, None);
        debug!(binding = id, "Binding removed");
        Ok(())
    }

    /// Unbind and forget every binding.
    pub fn clear(&self) {
        let mut bindings = self.bindings.lock();
        for (id, mut binding) in std::mem::take(&mut *bindings) {
            self.teardown(id, &mut binding, None);
        }
    }

    /// Unbind every binding whose bound node owned the removed port.
    ///
    /// Returns the IDs that were reset.
    pub fn on_port_removed(&self, port_id: u32) -> Vec<BindingId> {
        let mut bindings = self.bindings.lock();
        let mut reset = Vec::new();

        for (id, binding) in bindings.iter_mut() {
            let owns_port = binding.state.node().is_some_and(|n| n.contains_port(port_id));
            if owns_port {
                self.teardown(*id, binding, Some(port_id));
                reset.push(*id);
            }
        }

        if !reset.is_empty() {
            info!(port = port_id, bindings = ?reset, "Bindings reset after port removal");
        }
        reset
    }

    /// Best-effort unlink of a bound binding, then mark it unbound.
    ///
    /// Pairs touching `gone_port` are skipped since that link no longer exists.
    fn teardown(&self, id: BindingId, binding: &mut Binding, gone_port: Option<u32>) {
        let BindingState::Bound(node) = std::mem::replace(&mut binding.state, BindingState::Unbound) else {
            return;
        };

        let Some(anchor) = self.engine.graph().get_node(binding.anchor_id) else {
            debug!(binding = id, anchor = binding.anchor_id, "Anchor gone, nothing to unlink");
            return;
        };
        let (source, sink) = binding.endpoints(&anchor, &node);
        match pair_ports(source, sink) {
            Ok(pairs) => {
                let pairs: Vec<_> = pairs
                    .into_iter()
                    .filter(|p| gone_port.is_none_or(|g| p.output_port != g && p.input_port != g))
                    .collect();
                let report = self.engine.unlink_pairs(&pairs);
                debug!(binding = id, node = node.id, unlinked = report.succeeded, failed = report.failed, "Binding torn down");
            }
            Err(e) => warn!(binding = id, node = node.id, error = %e, "Cannot pair ports for teardown"),
        }
    }
}
