//! Graph change feed.
//!
//! Runs `pw-link --output --monitor --id` for the lifetime of the daemon and
//! turns its output into [`GraphEvent`]s. The reader runs in a dedicated
//! thread because the child's stdout is a blocking pipe.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{PwError, PwResult};
use crate::gateway::ToolPaths;

/// Events emitted by the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    /// An output port present when the feed started
    PortListed { id: u32, name: String },
    /// An output port was added
    PortAdded { id: u32, name: String },
    /// An output port was removed
    PortRemoved { id: u32 },
}

impl GraphEvent {
    /// Parse one line of `pw-link --monitor --id` output.
    ///
    /// Lines look like `+ 130 Firefox:output_FL`. A leading `-` marks a
    /// removal and `+` an addition; anything else is part of the initial
    /// listing.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        let (marker, rest) = match trimmed.chars().next()? {
            c @ ('+' | '-' | '=') => (Some(c), trimmed[1..].trim_start()),
            _ => (None, trimmed),
        };

        let mut fields = rest.splitn(2, char::is_whitespace);
        let id = fields.next()?.parse::<u32>().ok()?;
        let name = fields.next().unwrap_or_default().trim().to_string();

        Some(match marker {
            Some('+') => Self::PortAdded { id, name },
            Some('-') => Self::PortRemoved { id },
            _ => Self::PortListed { id, name },
        })
    }
}

/// A running change feed.
#[derive(Debug)]
pub struct ChangeMonitor {
    child: Child,
    reader: Option<JoinHandle<()>>,
}

impl ChangeMonitor {
    /// Start the feed and return it with its event channel.
    ///
    /// # Errors
    /// Returns an error if `pw-link` or the reader thread cannot be started.
    pub fn spawn(tools: &ToolPaths) -> PwResult<(Self, mpsc::Receiver<GraphEvent>)> {
        let command = format!("{} --output --monitor --id", tools.pw_link.display());
        let mut child = Command::new(&tools.pw_link)
            .args(["--output", "--monitor", "--id"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| PwError::SpawnFailed { command: command.clone(), source })?;

        let stdout = child.stdout.take().ok_or_else(|| PwError::ExternalToolFailure {
            command: command.clone(),
            status: None,
            stderr: "stdout not captured".to_string(),
        })?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let reader = std::thread::Builder::new()
            .name("pipewire-monitor".to_string())
            .spawn(move || read_events(BufReader::new(stdout), &event_tx))?;

        info!(pid = child.id(), command = %command, "Change monitor started");
        Ok((Self { child, reader: Some(reader) }, event_rx))
    }

    /// Stop the feed and wait for the reader thread.
    ///
    /// Drop the event receiver first: a reader parked on a full channel only
    /// wakes up once the receiver is gone.
    pub fn stop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "Change monitor already exited");
        }
        if let Err(e) = self.child.wait() {
            warn!(error = %e, "Failed to reap change monitor");
        }
        if let Some(reader) = self.reader.take()
            && reader.join().is_err()
        {
            error!("Change monitor reader panicked");
        }
        info!("Change monitor stopped");
    }
}

impl Drop for ChangeMonitor {
    fn drop(&mut self) {
        if self.reader.is_some() {
            self.stop();
        }
    }
}

fn read_events(reader: impl BufRead, event_tx: &mpsc::Sender<GraphEvent>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Change monitor read failed");
                break;
            }
        };

        let Some(event) = GraphEvent::parse_line(&line) else {
            if !line.trim().is_empty() {
                debug!(line, "Ignoring monitor line");
            }
            continue;
        };

        if event_tx.blocking_send(event).is_err() {
            debug!("Event receiver dropped, stopping change monitor reader");
            break;
        }
    }
    debug!("Change monitor output closed");
}
