//! Routes: a virtual sink plus the bindings hanging off it.

use std::sync::Arc;

use approute_core::{RetryPolicy, Sleeper, ThreadSleeper};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::binding::{BindingId, BindingRole, BindingState, BindingTable};
use crate::connect::ConnectionEngine;
use crate::error::PwResult;
use crate::gateway::DaemonGateway;
use crate::graph::{GraphConfig, GraphManager, GraphSnapshot};
use crate::loopback::{LoopbackManager, LoopbackProps, LoopbackSide, VirtualSink, default_discovery_policy};
use crate::node::{Node, NodeFilter};

/// Router configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Snapshot settings
    #[serde(default)]
    pub graph: GraphConfig,
    /// Virtual sink properties
    #[serde(default)]
    pub loopback: LoopbackProps,
    /// Budget for waiting on a new sink's nodes
    #[serde(default = "default_discovery_policy")]
    pub discovery: RetryPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            graph: GraphConfig::default(),
            loopback: LoopbackProps::default(),
            discovery: default_discovery_policy(),
        }
    }
}

/// An open route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// The virtual sink
    pub sink: VirtualSink,
    /// Its sink side, which applications feed
    pub sink_node: Node,
    /// Its source side, which plays into the target
    pub source_node: Node,
    /// Binding choosing where the mixed audio goes
    pub target: BindingId,
}

/// Entry point tying the graph, links, virtual sinks and bindings together.
pub struct Router {
    graph: Arc<GraphManager>,
    engine: Arc<ConnectionEngine>,
    loopbacks: LoopbackManager,
    bindings: BindingTable,
}

impl Router {
    /// Create a router and load the first snapshot.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the first refresh fails.
    pub fn new(gateway: Arc<dyn DaemonGateway>, config: RouterConfig) -> PwResult<Self> {
        Self::with_sleeper(gateway, config, Arc::new(ThreadSleeper))
    }

    /// Create a router whose retry loops wait with `sleeper`.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the first refresh fails.
    pub fn with_sleeper(
        gateway: Arc<dyn DaemonGateway>,
        config: RouterConfig,
        sleeper: Arc<dyn Sleeper>,
    ) -> PwResult<Self> {
        let graph = Arc::new(GraphManager::with_sleeper(Arc::clone(&gateway), config.graph, Arc::clone(&sleeper))?);
        let engine = Arc::new(ConnectionEngine::new(Arc::clone(&graph)));
        let loopbacks = LoopbackManager::with_sleeper(gateway, config.loopback, config.discovery, sleeper)?;
        let bindings = BindingTable::new(Arc::clone(&engine));

        Ok(Self { graph, engine, loopbacks, bindings })
    }

    /// The graph manager.
    #[must_use]
    pub fn graph(&self) -> &Arc<GraphManager> {
        &self.graph
    }

    /// The connection engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<ConnectionEngine> {
        &self.engine
    }

    /// The binding table.
    #[must_use]
    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    /// Refresh the graph snapshot.
    ///
    /// # Errors
    /// Returns the dump error once its retry budget is spent.
    pub fn refresh(&self) -> PwResult<Arc<GraphSnapshot>> {
        self.graph.refresh()
    }

    /// Nodes passing a filter in the current snapshot.
    #[must_use]
    pub fn query_nodes(&self, filter: NodeFilter) -> Vec<Node> {
        self.graph.query_nodes(filter)
    }

    /// Create a virtual sink and wait for both of its nodes.
    ///
    /// The sink's automatic output links are removed and an unbound target
    /// binding is registered on its source side. If either node never
    /// appears the sink is torn down again.
    ///
    /// # Errors
    /// Returns the spawn error or [`PwError::LoopbackNodeNotFound`](crate::PwError::LoopbackNodeNotFound).
    pub fn open_route(&self) -> PwResult<Route> {
        let sink = self.loopbacks.create()?;

        let resolved = self
            .loopbacks
            .discover(&self.engine, &sink, LoopbackSide::Sink)
            .and_then(|sink_node| {
                let source_node = self.loopbacks.discover(&self.engine, &sink, LoopbackSide::Source)?;
                Ok((sink_node, source_node))
            });

        let (sink_node, source_node) = match resolved {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(name = %sink.name, error = %e, "Route setup failed, removing virtual sink");
                if let Err(remove_err) = self.loopbacks.remove(&sink) {
                    warn!(name = %sink.name, error = %remove_err, "Failed to remove virtual sink");
                }
                return Err(e);
            }
        };

        let target = self.bindings.add(source_node.id, BindingRole::Target);
        info!(
            name = %sink.name,
            sink_node = sink_node.id,
            source_node = source_node.id,
            "Route opened"
        );
        Ok(Route { sink, sink_node, source_node, target })
    }

    /// Register an unbound binding feeding the route's sink.
    pub fn add_feed(&self, route: &Route) -> BindingId {
        self.bindings.add(route.sink_node.id, BindingRole::Feed)
    }

    /// Change a binding's selection. See [`BindingTable::select`].
    ///
    /// # Errors
    /// Returns the selection error; the binding is left unbound.
    pub fn select(&self, binding: BindingId, selection: Option<u32>) -> PwResult<BindingState> {
        self.bindings.select(binding, selection)
    }

    /// Tear down every binding on the route and stop its virtual sink.
    ///
    /// # Errors
    /// Returns an error if the sink is not tracked or its process cannot be stopped.
    pub fn close_route(&self, route: &Route) -> PwResult<()> {
        for anchor in [route.sink_node.id, route.source_node.id] {
            for binding in self.bindings.anchored_on(anchor) {
                if let Err(e) = self.bindings.remove(binding) {
                    warn!(binding, error = %e, "Failed to remove binding");
                }
            }
        }

        self.loopbacks.remove(&route.sink)?;
        info!(name = %route.sink.name, "Route closed");
        Ok(())
    }

    /// Virtual sinks currently running.
    #[must_use]
    pub fn sinks(&self) -> Vec<VirtualSink> {
        self.loopbacks.tracked()
    }

    /// React to a port disappearing from the graph.
    pub fn on_port_removed(&self, port_id: u32) -> Vec<BindingId> {
        self.bindings.on_port_removed(port_id)
    }

    /// Tear down every binding and stop every virtual sink.
    pub fn shutdown(&self) {
        self.bindings.clear();
        let stopped = self.loopbacks.terminate_all();
        info!(stopped, "Router shut down");
    }
}
