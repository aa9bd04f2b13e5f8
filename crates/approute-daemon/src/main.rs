//! approute Daemon - per-application audio routing for PipeWire.
//!
//! Opens the configured routes, feeds matching applications into their
//! virtual sinks and keeps the bindings consistent as streams come and go.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::block_in_place;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod rules;
mod signals;

use approute_pipewire::{ChangeMonitor, GraphEvent, NodeFilter, PwCliGateway, Router};
use config::{DaemonConfig, LogFormat};
use rules::ActiveRoute;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::load_config()?;
    init_logging(&config.daemon)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting approute daemon");

    let mut shutdown = signals::ShutdownSignals::install()?;

    // Read the graph once before anything else touches it
    let gateway = Arc::new(PwCliGateway::new(config.tools.clone()));
    let router = block_in_place(|| Router::new(gateway, config.router_config()))
        .context("Failed to read the PipeWire graph")?;
    info!(nodes = router.query_nodes(NodeFilter::All).len(), "Initial graph loaded");

    let (mut monitor, mut graph_event_rx) =
        ChangeMonitor::spawn(&config.tools).context("Failed to start the change monitor")?;

    // Open configured routes
    let mut routes = Vec::new();
    for route_config in &config.routes {
        match block_in_place(|| ActiveRoute::open(&router, route_config.clone())) {
            Ok(route) => routes.push(route),
            Err(e) => error!(route = %route_config.name, error = %e, "Failed to open route"),
        }
    }
    info!(open = routes.len(), configured = config.routes.len(), "Routes ready");

    let mut refresh = tokio::time::interval(config.refresh_interval());
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Daemon running");

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,

            Some(event) = graph_event_rx.recv() => match event {
                GraphEvent::PortRemoved { id } => {
                    let reset = block_in_place(|| router.on_port_removed(id));
                    if !reset.is_empty() {
                        debug!(port = id, bindings = reset.len(), "Bindings released by port removal");
                    }
                }
                GraphEvent::PortAdded { id, name } => {
                    debug!(port = id, name = %name, "Port added");
                    // Route new streams without waiting for the next period.
                    refresh.reset_immediately();
                }
                GraphEvent::PortListed { .. } => {}
            },

            _ = refresh.tick() => block_in_place(|| apply_rules(&router, &mut routes)),
        }
    }

    info!("Shutting down...");
    block_in_place(|| {
        for route in routes {
            let name = route.name().to_string();
            if let Err(e) = route.close(&router) {
                warn!(route = %name, error = %e, "Failed to close route");
            }
        }
        router.shutdown();
    });
    // Unblocks a reader parked on a full channel.
    drop(graph_event_rx);
    monitor.stop();

    info!("approute daemon stopped");
    Ok(())
}

fn init_logging(daemon: &DaemonConfig) -> Result<()> {
    let level = &daemon.log_level;
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("approute_daemon={level}").parse()?)
        .add_directive(format!("approute_pipewire={level}").parse()?)
        .add_directive(format!("approute_core={level}").parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match daemon.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

/// Refresh the graph and run every route's rules against it.
fn apply_rules(router: &Router, routes: &mut [ActiveRoute]) {
    if let Err(e) = router.refresh() {
        warn!(error = %e, "Graph refresh failed, skipping rule pass");
        return;
    }

    for route in routes {
        let report = route.sync(router);
        if report.bound > 0 || report.released > 0 {
            info!(route = route.name(), bound = report.bound, released = report.released, "Route updated");
        }
    }
}
