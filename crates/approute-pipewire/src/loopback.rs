//! Virtual sinks backed by `pw-loopback` processes.
//!
//! Each virtual sink is a loopback process registering two nodes: a sink side
//! (`media.name` equal to the sink name) that applications play into, and a
//! source side (`"<name> output"`) that carries the mixed audio on. The nodes
//! appear some time after the process starts, so they are found by polling.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use approute_core::{RetryPolicy, Sleeper, ThreadSleeper};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::connect::ConnectionEngine;
use crate::error::{PwError, PwResult};
use crate::gateway::{DaemonGateway, LoopbackProcess};
use crate::graph::GraphSnapshot;
use crate::node::{Node, NodeFilter};

/// Object index `pw-loopback` appends to its process ID to form the sink name.
pub const LOOPBACK_NAME_SUFFIX: u32 = 18;

/// Sink name a loopback process with this PID registers.
///
/// Process IDs are reused by the OS, so a name may collide with one left
/// behind by an earlier, unreaped process.
#[must_use]
pub fn sink_name_for_pid(pid: u32) -> String {
    format!("loopback-{pid}-{LOOPBACK_NAME_SUFFIX}")
}

/// Properties passed to `pw-loopback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopbackProps {
    /// `node.name` of the capture (sink) side
    #[serde(default = "default_node_name")]
    pub node_name: String,
    /// `media.class` of the capture side
    #[serde(default = "default_media_class")]
    pub media_class: String,
    /// Channel positions
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
}

impl LoopbackProps {
    /// Stereo sink props with the given node name.
    #[must_use]
    pub fn stereo(node_name: impl Into<String>) -> Self {
        Self { node_name: node_name.into(), media_class: default_media_class(), channels: default_channels() }
    }

    /// Command-line arguments for `pw-loopback`.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "-m".to_string(),
            format!("[ {} ]", self.channels.join(" ")),
            format!("--capture-props=media.class={} node.name={}", self.media_class, self.node_name),
        ]
    }
}

impl Default for LoopbackProps {
    fn default() -> Self {
        Self::stereo(default_node_name())
    }
}

fn default_node_name() -> String {
    "approute-sink".to_string()
}

fn default_media_class() -> String {
    "Audio/Sink".to_string()
}

fn default_channels() -> Vec<String> {
    vec!["FL".to_string(), "FR".to_string()]
}

/// Which of a loopback's two nodes to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopbackSide {
    /// The node applications play into
    Sink,
    /// The node carrying the mixed audio out
    Source,
}

impl LoopbackSide {
    /// `media.name` the node on this side carries.
    #[must_use]
    pub fn expected_media_name(self, sink_name: &str) -> String {
        match self {
            Self::Sink => sink_name.to_string(),
            Self::Source => format!("{sink_name} output"),
        }
    }

    fn filter(self) -> NodeFilter {
        match self {
            Self::Sink => NodeFilter::Sinks,
            Self::Source => NodeFilter::Sources,
        }
    }

    fn other(self) -> Self {
        match self {
            Self::Sink => Self::Source,
            Self::Source => Self::Sink,
        }
    }
}

impl fmt::Display for LoopbackSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sink => f.write_str("sink"),
            Self::Source => f.write_str("source"),
        }
    }
}

/// Find a loopback's node in a snapshot.
///
/// Candidates must pass the side's direction filter and contain the sink name
/// in their media name. A node carrying the other side's media name is never
/// a candidate: the sink side has monitor outputs and would otherwise pass
/// as a source. An exact media-name match wins over a partial one.
#[must_use]
pub fn find_loopback_node<'a>(snapshot: &'a GraphSnapshot, sink_name: &str, side: LoopbackSide) -> Option<&'a Node> {
    let expected = side.expected_media_name(sink_name);
    let opposite = side.other().expected_media_name(sink_name);
    let mut candidates = snapshot
        .nodes
        .values()
        .filter(|n| side.filter().matches(n) && n.media_name.contains(sink_name) && n.media_name != opposite)
        .peekable();

    let first = *candidates.peek()?;
    Some(candidates.find(|n| n.media_name == expected).unwrap_or(first))
}

/// A virtual sink created by [`LoopbackManager::create`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualSink {
    /// Sink name, the `media.name` of the sink side
    pub name: String,
    /// Loopback process ID
    pub pid: u32,
}

#[derive(Debug)]
struct TrackedSink {
    sink: VirtualSink,
    process: Box<dyn LoopbackProcess>,
    source_resolved: bool,
}

/// Creates, tracks and tears down virtual sinks.
pub struct LoopbackManager {
    gateway: Arc<dyn DaemonGateway>,
    props: LoopbackProps,
    discovery: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    sinks: Mutex<Vec<TrackedSink>>,
}

/// Discovery budget used when none is configured.
#[must_use]
pub fn default_discovery_policy() -> RetryPolicy {
    RetryPolicy::linear(10, Duration::from_millis(100))
}

impl LoopbackManager {
    /// Create a manager.
    ///
    /// # Errors
    /// Returns an error if the discovery policy allows no attempt.
    pub fn new(gateway: Arc<dyn DaemonGateway>, props: LoopbackProps, discovery: RetryPolicy) -> PwResult<Self> {
        Self::with_sleeper(gateway, props, discovery, Arc::new(ThreadSleeper))
    }

    /// Create a manager that waits between discovery polls with `sleeper`.
    ///
    /// # Errors
    /// Returns an error if the discovery policy allows no attempt.
    pub fn with_sleeper(
        gateway: Arc<dyn DaemonGateway>,
        props: LoopbackProps,
        discovery: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> PwResult<Self> {
        discovery.validate()?;
        Ok(Self { gateway, props, discovery, sleeper, sinks: Mutex::new(Vec::new()) })
    }

    /// Start a loopback process and track it.
    ///
    /// Returns once the process is running. Its nodes may not exist yet;
    /// use [`discover`](Self::discover) to wait for them.
    ///
    /// # Errors
    /// Returns an error if the process cannot be spawned.
    pub fn create(&self) -> PwResult<VirtualSink> {
        let process = self.gateway.spawn_loopback(&self.props)?;
        let sink = VirtualSink { name: sink_name_for_pid(process.pid()), pid: process.pid() };

        info!(name = %sink.name, pid = sink.pid, "Virtual sink created");
        self.sinks.lock().push(TrackedSink { sink: sink.clone(), process, source_resolved: false });
        Ok(sink)
    }

    /// Stop a tracked sink's process.
    ///
    /// # Errors
    /// Returns [`PwError::SinkNotTracked`] if the sink is unknown, or the
    /// termination error.
    pub fn remove(&self, sink: &VirtualSink) -> PwResult<()> {
        let tracked = {
            let mut sinks = self.sinks.lock();
            let index = sinks
                .iter()
                .position(|t| t.sink == *sink)
                .ok_or_else(|| PwError::SinkNotTracked(sink.name.clone()))?;
            sinks.remove(index)
        };

        Self::terminate(tracked)
    }

    /// Stop every tracked sink. Returns how many were stopped cleanly.
    pub fn terminate_all(&self) -> usize {
        let tracked: Vec<TrackedSink> = std::mem::take(&mut *self.sinks.lock());
        let total = tracked.len();
        let stopped = tracked.into_iter().filter_map(|t| Self::terminate(t).ok()).count();

        info!(stopped, total, "Virtual sinks terminated");
        stopped
    }

    fn terminate(mut tracked: TrackedSink) -> PwResult<()> {
        match tracked.process.terminate() {
            Ok(()) => {
                info!(name = %tracked.sink.name, pid = tracked.sink.pid, "Virtual sink removed");
                Ok(())
            }
            Err(e) => {
                warn!(name = %tracked.sink.name, pid = tracked.sink.pid, error = %e, "Failed to stop loopback");
                Err(e)
            }
        }
    }

    /// Sinks currently tracked, in creation order.
    #[must_use]
    pub fn tracked(&self) -> Vec<VirtualSink> {
        self.sinks.lock().iter().map(|t| t.sink.clone()).collect()
    }

    /// Wait for one of a sink's nodes to appear.
    ///
    /// Refreshes the graph up to the policy's attempt budget, sleeping a
    /// linearly growing delay between polls. A failed refresh counts as a
    /// failed attempt. The first time a sink's source side is resolved, every
    /// link the session manager made out of it is removed.
    ///
    /// # Errors
    /// Returns [`PwError::SinkNotTracked`] for an unknown sink and
    /// [`PwError::LoopbackNodeNotFound`] once the budget is spent.
    pub fn discover(&self, engine: &ConnectionEngine, sink: &VirtualSink, side: LoopbackSide) -> PwResult<Node> {
        if !self.sinks.lock().iter().any(|t| t.sink == *sink) {
            return Err(PwError::SinkNotTracked(sink.name.clone()));
        }

        let policy = self.discovery;
        for attempt in 1..=policy.max_attempts {
            match engine.graph().refresh() {
                Ok(snapshot) => {
                    if let Some(node) = find_loopback_node(&snapshot, &sink.name, side) {
                        let node = node.clone();
                        debug!(name = %sink.name, %side, node = node.id, attempt, "Loopback node found");
                        if side == LoopbackSide::Source && self.mark_source_resolved(sink) {
                            let report = engine.disconnect_all_outputs(&node);
                            info!(name = %sink.name, removed = report.succeeded, "Cleared automatic links from loopback");
                        }
                        return Ok(node);
                    }
                }
                Err(e) => warn!(name = %sink.name, %side, attempt, error = %e, "Refresh failed during discovery"),
            }

            if policy.allows_retry_after(attempt) {
                let delay = policy.delay_for(attempt);
                debug!(name = %sink.name, %side, attempt, ?delay, "Loopback node not visible yet");
                self.sleeper.sleep(delay);
            }
        }

        Err(PwError::LoopbackNodeNotFound { name: sink.name.clone(), side, attempts: policy.max_attempts })
    }

    /// Flag the sink's source side as resolved. True only the first time.
    fn mark_source_resolved(&self, sink: &VirtualSink) -> bool {
        let mut sinks = self.sinks.lock();
        match sinks.iter_mut().find(|t| t.sink == *sink) {
            Some(tracked) if !tracked.source_resolved => {
                tracked.source_resolved = true;
                true
            }
            _ => false,
        }
    }
}

impl Drop for LoopbackManager {
    fn drop(&mut self) {
        if !self.sinks.get_mut().is_empty() {
            self.terminate_all();
        }
    }
}
