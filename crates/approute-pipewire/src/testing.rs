//! In-memory daemon used by unit tests.
//!
//! [`FakeGateway`] keeps a small graph of nodes, ports and links, renders it in
//! the `pw-cli info all` format and applies `link`/`unlink` commands to it.
//! Loopback processes register their two nodes after a configurable number
//! of dumps.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use approute_core::Sleeper;
use parking_lot::Mutex;

use crate::error::{PwError, PwResult};
use crate::gateway::{DaemonGateway, LoopbackProcess};
use crate::link::PortPair;
use crate::loopback::{LoopbackProps, sink_name_for_pid};
use crate::node::PortDirection;

pub(crate) const STEREO_IN: &[(&str, PortDirection)] =
    &[("playback_FL", PortDirection::Input), ("playback_FR", PortDirection::Input)];

pub(crate) const STEREO_OUT: &[(&str, PortDirection)] =
    &[("output_FL", PortDirection::Output), ("output_FR", PortDirection::Output)];

#[derive(Debug, Clone)]
struct FakeNode {
    node_name: String,
    app_name: Option<String>,
    media_name: Option<String>,
}

#[derive(Debug, Clone)]
struct FakePort {
    node_id: u32,
    name: String,
    direction: PortDirection,
}

#[derive(Debug, Clone, Copy)]
struct FakeLink {
    output_node: u32,
    output_port: u32,
    input_node: u32,
    input_port: u32,
}

#[derive(Debug)]
struct PendingLoopback {
    pid: u32,
    dumps_left: usize,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u32,
    next_pid: u32,
    nodes: BTreeMap<u32, FakeNode>,
    ports: BTreeMap<u32, FakePort>,
    links: BTreeMap<u32, FakeLink>,
    pending: Vec<PendingLoopback>,
    loopback_nodes: BTreeMap<u32, Vec<u32>>,
    loopback_delay: usize,
    default_sink: Option<u32>,
    failing_dumps: usize,
    dump_calls: usize,
    link_calls: Vec<PortPair>,
    unlink_calls: Vec<PortPair>,
    terminated: Vec<u32>,
}

impl FakeState {
    fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn add_node(
        &mut self,
        node_name: &str,
        app_name: Option<&str>,
        media_name: Option<&str>,
        ports: &[(&str, PortDirection)],
    ) -> u32 {
        let id = self.allocate();
        self.nodes.insert(id, FakeNode {
            node_name: node_name.to_string(),
            app_name: app_name.map(ToString::to_string),
            media_name: media_name.map(ToString::to_string),
        });
        for (name, direction) in ports {
            let port_id = self.allocate();
            self.ports.insert(port_id, FakePort {
                node_id: id,
                name: (*name).to_string(),
                direction: *direction,
            });
        }
        id
    }

    fn remove_node(&mut self, id: u32) {
        self.nodes.remove(&id);
        self.ports.retain(|_, p| p.node_id != id);
        self.links.retain(|_, l| l.output_node != id && l.input_node != id);
    }

    fn ports_of(&self, node_id: u32, direction: PortDirection) -> Vec<u32> {
        self.ports
            .iter()
            .filter(|(_, p)| p.node_id == node_id && p.direction == direction)
            .map(|(id, _)| *id)
            .collect()
    }

    fn insert_link(&mut self, output_port: u32, input_port: u32) -> PwResult<u32> {
        let (Some(output), Some(input)) = (self.ports.get(&output_port), self.ports.get(&input_port))
        else {
            return Err(tool_failure(format!("pw-link {output_port} {input_port}"), "No such port"));
        };
        if output.direction != PortDirection::Output || input.direction != PortDirection::Input {
            return Err(tool_failure(format!("pw-link {output_port} {input_port}"), "Invalid argument"));
        }
        if self.link_between(output_port, input_port).is_some() {
            return Err(tool_failure(format!("pw-link {output_port} {input_port}"), "File exists"));
        }

        let link = FakeLink {
            output_node: output.node_id,
            output_port,
            input_node: input.node_id,
            input_port,
        };
        let id = self.allocate();
        self.links.insert(id, link);
        Ok(id)
    }

    fn link_between(&self, output_port: u32, input_port: u32) -> Option<u32> {
        self.links
            .iter()
            .find(|(_, l)| l.output_port == output_port && l.input_port == input_port)
            .map(|(id, _)| *id)
    }

    fn materialize_loopbacks(&mut self) {
        let mut ready = Vec::new();
        for pending in &mut self.pending {
            if pending.dumps_left == 0 {
                ready.push(pending.pid);
            } else {
                pending.dumps_left -= 1;
            }
        }
        self.pending.retain(|p| !ready.contains(&p.pid));

        for pid in ready {
            let name = sink_name_for_pid(pid);
            let sink = self.add_node("approute-sink", Some("pw-loopback"), Some(&name), &[
                ("playback_FL", PortDirection::Input),
                ("playback_FR", PortDirection::Input),
                ("monitor_FL", PortDirection::Output),
                ("monitor_FR", PortDirection::Output),
            ]);
            let output_name = format!("{name} output");
            let source = self.add_node(
                &format!("output.{name}"),
                Some("pw-loopback"),
                Some(&output_name),
                STEREO_OUT,
            );

            // The session manager wires fresh streams to the default sink.
            if let Some(target) = self.default_sink.filter(|t| self.nodes.contains_key(t)) {
                let outputs = self.ports_of(source, PortDirection::Output);
                let inputs = self.ports_of(target, PortDirection::Input);
                for (out, inp) in outputs.into_iter().zip(inputs) {
                    let _ = self.insert_link(out, inp);
                }
            }

            self.loopback_nodes.insert(pid, vec![sink, source]);
        }
    }

    fn render(&self) -> String {
        let mut blocks: BTreeMap<u32, String> = BTreeMap::new();
        blocks.insert(0, render_block(0, "Core", &[("name", "\"pipewire-0\"")], &[]));

        for (id, node) in &self.nodes {
            let inputs = self.ports_of(*id, PortDirection::Input).len();
            let outputs = self.ports_of(*id, PortDirection::Output).len();
            let mut props = vec![("node.name", quoted(&node.node_name))];
            if let Some(app) = &node.app_name {
                props.push(("application.name", quoted(app)));
            }
            if let Some(media) = &node.media_name {
                props.push(("media.name", quoted(media)));
            }
            let in_ports = format!("{inputs}/64");
            let out_ports = format!("{outputs}/64");
            blocks.insert(
                *id,
                render_block(
                    *id,
                    "Node",
                    &[
                        ("input ports", in_ports.as_str()),
                        ("output ports", out_ports.as_str()),
                        ("state", "\"idle\""),
                    ],
                    &props.iter().map(|(k, v)| (*k, v.as_str())).collect::<Vec<_>>(),
                ),
            );
        }

        for (id, port) in &self.ports {
            let (attribute, property) = match port.direction {
                PortDirection::Input => ("\"input\"", "\"in\""),
                PortDirection::Output => ("\"output\"", "\"out\""),
            };
            let owner = self.nodes.get(&port.node_id).map_or("", |n| n.node_name.as_str());
            let name = quoted(&port.name);
            let alias = quoted(&format!("{owner}:{}", port.name));
            let node_id = quoted(&port.node_id.to_string());
            blocks.insert(
                *id,
                render_block(*id, "Port", &[("direction", attribute)], &[
                    ("port.name", name.as_str()),
                    ("port.direction", property),
                    ("port.alias", alias.as_str()),
                    ("node.id", node_id.as_str()),
                ]),
            );
        }

        for (id, link) in &self.links {
            let mut block = String::new();
            let _ = writeln!(block, "\tid: {id}");
            let _ = writeln!(block, "\tpermissions: r-xm");
            let _ = writeln!(block, "\ttype: PipeWire:Interface:Link/3");
            let _ = writeln!(block, "*\toutput-node-id: {}", link.output_node);
            let _ = writeln!(block, "*\toutput-port-id: {}", link.output_port);
            let _ = writeln!(block, "*\tinput-node-id: {}", link.input_node);
            let _ = writeln!(block, "*\tinput-port-id: {}", link.input_port);
            let _ = writeln!(block, "*\tstate: \"active\"");
            let _ = writeln!(block, "*\tformat:");
            let _ = writeln!(block, "*\t  Object: size 120, type Spa:Pod:Object:Param:Format (262147)");
            let _ = writeln!(block, "*\tproperties:");
            let _ = writeln!(block, "*\t\tlink.output.node = \"{}\"", link.output_node);
            let _ = writeln!(block, "*\t\tlink.input.node = \"{}\"", link.input_node);
            blocks.insert(*id, block);
        }

        blocks.into_values().collect()
    }
}

fn quoted(text: &str) -> String {
    format!("\"{text}\"")
}

fn render_block(id: u32, kind: &str, attributes: &[(&str, &str)], properties: &[(&str, &str)]) -> String {
    let mut block = String::new();
    let _ = writeln!(block, "\tid: {id}");
    let _ = writeln!(block, "\tpermissions: r-xm");
    let _ = writeln!(block, "\ttype: PipeWire:Interface:{kind}/3");
    for (key, value) in attributes {
        let _ = writeln!(block, "*\t{key}: {value}");
    }
    let _ = writeln!(block, "*\tproperties:");
    for (key, value) in properties {
        let _ = writeln!(block, "*\t\t{key} = {value}");
    }
    let _ = writeln!(block, "*\tparams: (0)");
    block
}

fn tool_failure(command: String, stderr: &str) -> PwError {
    PwError::ExternalToolFailure { command, status: Some(1), stderr: stderr.to_string() }
}

/// A scripted stand-in for the PipeWire daemon.
#[derive(Debug, Default)]
pub(crate) struct FakeGateway {
    state: Arc<Mutex<FakeState>>,
}

impl FakeGateway {
    pub(crate) fn new() -> Arc<Self> {
        let state = FakeState { next_id: 30, next_pid: 4000, ..FakeState::default() };
        Arc::new(Self { state: Arc::new(Mutex::new(state)) })
    }

    /// Add a node with ports, returning the node ID.
    pub(crate) fn add_node(
        &self,
        node_name: &str,
        app_name: Option<&str>,
        media_name: Option<&str>,
        ports: &[(&str, PortDirection)],
    ) -> u32 {
        self.state.lock().add_node(node_name, app_name, media_name, ports)
    }

    /// Remove a node with its ports and links.
    pub(crate) fn remove_node(&self, id: u32) {
        self.state.lock().remove_node(id);
    }

    /// Add a port to an existing node, returning the port ID.
    pub(crate) fn add_port(&self, node_id: u32, name: &str, direction: PortDirection) -> u32 {
        let mut state = self.state.lock();
        let id = state.allocate();
        state.ports.insert(id, FakePort { node_id, name: name.to_string(), direction });
        id
    }

    /// Remove a single port and its links.
    pub(crate) fn remove_port(&self, port_id: u32) {
        let mut state = self.state.lock();
        state.ports.remove(&port_id);
        state.links.retain(|_, l| l.output_port != port_id && l.input_port != port_id);
    }

    /// Link two nodes port by port in ID order, bypassing the call log.
    pub(crate) fn link_nodes(&self, source: u32, sink: u32) {
        let mut state = self.state.lock();
        let outputs = state.ports_of(source, PortDirection::Output);
        let inputs = state.ports_of(sink, PortDirection::Input);
        for (out, inp) in outputs.into_iter().zip(inputs) {
            let _ = state.insert_link(out, inp);
        }
    }

    /// Find a port by node and name.
    pub(crate) fn port_id(&self, node_id: u32, name: &str) -> Option<u32> {
        let state = self.state.lock();
        state.ports.iter().find(|(_, p)| p.node_id == node_id && p.name == name).map(|(id, _)| *id)
    }

    /// Every current link as a port pair.
    pub(crate) fn links(&self) -> Vec<PortPair> {
        let state = self.state.lock();
        state
            .links
            .values()
            .map(|l| PortPair { output_port: l.output_port, input_port: l.input_port })
            .collect()
    }

    /// Number of links from one node into another.
    pub(crate) fn links_between_nodes(&self, source: u32, sink: u32) -> usize {
        let state = self.state.lock();
        state.links.values().filter(|l| l.output_node == source && l.input_node == sink).count()
    }

    /// Number of links into a node.
    pub(crate) fn links_into_node(&self, sink: u32) -> usize {
        self.state.lock().links.values().filter(|l| l.input_node == sink).count()
    }

    /// Number of links out of a node.
    pub(crate) fn links_from_node(&self, source: u32) -> usize {
        self.state.lock().links.values().filter(|l| l.output_node == source).count()
    }

    pub(crate) fn dump_calls(&self) -> usize {
        self.state.lock().dump_calls
    }

    pub(crate) fn link_calls(&self) -> Vec<PortPair> {
        self.state.lock().link_calls.clone()
    }

    pub(crate) fn unlink_calls(&self) -> Vec<PortPair> {
        self.state.lock().unlink_calls.clone()
    }

    pub(crate) fn terminated(&self) -> Vec<u32> {
        self.state.lock().terminated.clone()
    }

    /// Make the next `count` dumps fail with a non-zero exit.
    pub(crate) fn fail_next_dumps(&self, count: usize) {
        self.state.lock().failing_dumps = count;
    }

    /// Loopback nodes stay invisible for this many dumps after spawning.
    pub(crate) fn set_loopback_delay(&self, dumps: usize) {
        self.state.lock().loopback_delay = dumps;
    }

    /// New loopback outputs are linked to this node when they appear.
    pub(crate) fn set_default_sink(&self, node_id: u32) {
        self.state.lock().default_sink = Some(node_id);
    }

    /// Node IDs (sink side, source side) registered by a loopback process.
    pub(crate) fn loopback_nodes(&self, pid: u32) -> Option<(u32, u32)> {
        let state = self.state.lock();
        state.loopback_nodes.get(&pid).and_then(|ids| Some((*ids.first()?, *ids.get(1)?)))
    }

    /// Render the current graph as `pw-cli info all` would.
    pub(crate) fn render(&self) -> String {
        self.state.lock().render()
    }
}

impl DaemonGateway for FakeGateway {
    fn dump_all(&self) -> PwResult<String> {
        let mut state = self.state.lock();
        state.dump_calls += 1;
        if state.failing_dumps > 0 {
            state.failing_dumps -= 1;
            return Err(tool_failure("pw-cli info all".into(), "Host is down"));
        }
        state.materialize_loopbacks();
        Ok(state.render())
    }

    fn link(&self, output_port: u32, input_port: u32) -> PwResult<()> {
        let mut state = self.state.lock();
        state.link_calls.push(PortPair { output_port, input_port });
        state.insert_link(output_port, input_port).map(|_| ())
    }

    fn unlink(&self, output_port: u32, input_port: u32) -> PwResult<()> {
        let mut state = self.state.lock();
        state.unlink_calls.push(PortPair { output_port, input_port });
        match state.link_between(output_port, input_port) {
            Some(id) => {
                state.links.remove(&id);
                Ok(())
            }
            None => Err(tool_failure(format!("pw-link -d {output_port} {input_port}"), "No such file or directory")),
        }
    }

    fn spawn_loopback(&self, _props: &LoopbackProps) -> PwResult<Box<dyn LoopbackProcess>> {
        let mut state = self.state.lock();
        state.next_pid += 1;
        let pid = state.next_pid;
        let dumps_left = state.loopback_delay;
        state.pending.push(PendingLoopback { pid, dumps_left });
        Ok(Box::new(FakeLoopback { pid, state: Arc::clone(&self.state), running: true }))
    }
}

#[derive(Debug)]
struct FakeLoopback {
    pid: u32,
    state: Arc<Mutex<FakeState>>,
    running: bool,
}

impl LoopbackProcess for FakeLoopback {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn terminate(&mut self) -> PwResult<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;

        let mut state = self.state.lock();
        state.terminated.push(self.pid);
        state.pending.retain(|p| p.pid != self.pid);
        if let Some(nodes) = state.loopback_nodes.remove(&self.pid) {
            for node in nodes {
                state.remove_node(node);
            }
        }
        Ok(())
    }
}

/// A sleeper that records requested delays and returns immediately.
#[derive(Debug, Default)]
pub(crate) struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}
