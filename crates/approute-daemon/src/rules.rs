//! Configured routes and the pass that keeps them applied.

use std::collections::{BTreeMap, BTreeSet};

use approute_pipewire::{BindingId, BindingState, Node, NodeFilter, PwResult, Route, Router};
use tracing::{debug, info, warn};

use crate::config::RouteConfig;

/// Outcome of one rule pass over a route.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Applications newly fed into the route
    pub bound: usize,
    /// Feeds dropped because their application went away
    pub released: usize,
}

/// A route opened from configuration.
pub struct ActiveRoute {
    config: RouteConfig,
    route: Route,
    feeds: BTreeMap<u32, BindingId>,
    rejected: BTreeSet<u32>,
}

impl ActiveRoute {
    /// Open the route's virtual sink.
    ///
    /// # Errors
    /// Returns an error if the sink cannot be created or its nodes never appear.
    pub fn open(router: &Router, config: RouteConfig) -> PwResult<Self> {
        let route = router.open_route()?;
        info!(route = %config.name, sink = %route.sink.name, "Configured route opened");
        Ok(Self { config, route, feeds: BTreeMap::new(), rejected: BTreeSet::new() })
    }

    /// Route name from configuration.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Apply the route's rules to the current snapshot.
    ///
    /// Feeds whose binding was reset are dropped, matching applications
    /// without a feed get one, and the target is bound once its sink exists.
    /// Nodes that failed to bind are not retried while they keep their ID.
    pub fn sync(&mut self, router: &Router) -> SyncReport {
        let mut report = SyncReport::default();
        let sources = router.query_nodes(NodeFilter::Sources);

        self.feeds.retain(|node, binding| match router.bindings().state(*binding) {
            Ok(BindingState::Bound(_)) => true,
            _ => {
                if let Err(e) = router.bindings().remove(*binding) {
                    debug!(binding = *binding, error = %e, "Feed already gone");
                }
                debug!(node = *node, "Feed released");
                report.released += 1;
                false
            }
        });
        self.rejected.retain(|id| sources.iter().any(|n| n.id == *id));

        let candidates: Vec<&Node> = sources.iter().filter(|n| self.wants(n)).collect();
        for node in candidates {
            let binding = router.add_feed(&self.route);
            match router.select(binding, Some(node.id)) {
                Ok(_) => {
                    info!(route = %self.config.name, node = node.id, app = %node.app_name, "Application routed");
                    self.feeds.insert(node.id, binding);
                    report.bound += 1;
                }
                Err(e) => {
                    warn!(route = %self.config.name, node = node.id, error = %e, "Failed to route application");
                    if let Err(e) = router.bindings().remove(binding) {
                        debug!(binding, error = %e, "Feed already gone");
                    }
                    self.rejected.insert(node.id);
                }
            }
        }

        self.sync_target(router);
        report
    }

    fn sync_target(&self, router: &Router) {
        let Some(target_name) = &self.config.target else {
            return;
        };
        if router.bindings().is_live(self.route.target) {
            return;
        }
        if matches!(router.bindings().state(self.route.target), Ok(BindingState::Bound(_))) {
            info!(route = %self.config.name, target = %target_name, "Route target vanished, unbinding");
            if let Err(e) = router.select(self.route.target, None) {
                debug!(route = %self.config.name, error = %e, "Target already gone");
            }
        }

        let Some(target) = router.query_nodes(NodeFilter::Sinks).into_iter().find(|n| n.node_name == *target_name)
        else {
            debug!(route = %self.config.name, target = %target_name, "Target sink not present");
            return;
        };

        match router.select(self.route.target, Some(target.id)) {
            Ok(_) => info!(route = %self.config.name, target = %target_name, "Route target bound"),
            Err(e) => warn!(route = %self.config.name, target = %target_name, error = %e, "Failed to bind route target"),
        }
    }

    /// Check if a node should be fed into this route and is not handled yet.
    fn wants(&self, node: &Node) -> bool {
        matches_app(&self.config, node)
            && node.id != self.route.sink_node.id
            && node.id != self.route.source_node.id
            && !self.feeds.contains_key(&node.id)
            && !self.rejected.contains(&node.id)
    }

    /// Tear the route down.
    ///
    /// # Errors
    /// Returns an error if the virtual sink cannot be stopped.
    pub fn close(self, router: &Router) -> PwResult<()> {
        router.close_route(&self.route)
    }
}

/// Check if a node belongs to one of the route's applications.
fn matches_app(config: &RouteConfig, node: &Node) -> bool {
    config.apps.iter().any(|app| *app == node.app_name || *app == node.node_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(node_name: &str, app_name: &str) -> Node {
        Node {
            id: 7,
            node_name: node_name.into(),
            app_name: app_name.into(),
            media_name: "AudioStream".into(),
            input_ports: BTreeMap::new(),
            output_ports: BTreeMap::new(),
        }
    }

    fn route(apps: &[&str]) -> RouteConfig {
        RouteConfig {
            name: "stream".into(),
            apps: apps.iter().map(ToString::to_string).collect(),
            target: None,
        }
    }

    #[test]
    fn test_matches_application_name() {
        assert!(matches_app(&route(&["Firefox"]), &node("Firefox", "Firefox")));
        assert!(matches_app(&route(&["Spotify"]), &node("spotify", "Spotify")));
    }

    #[test]
    fn test_matches_node_name() {
        assert!(matches_app(&route(&["mpv"]), &node("mpv", "unknown")));
    }

    #[test]
    fn test_match_is_exact() {
        assert!(!matches_app(&route(&["fire"]), &node("Firefox", "Firefox")));
        assert!(!matches_app(&route(&["firefox"]), &node("Firefox", "Firefox")));
        assert!(!matches_app(&route(&[]), &node("Firefox", "Firefox")));
    }
}
