//! The seam between approute and the PipeWire daemon.
//!
//! Everything approute knows about the daemon comes through [`DaemonGateway`]:
//! a text dump of the registry, link/unlink commands and loopback processes.
//! [`PwCliGateway`] implements it by running the stock PipeWire CLI tools.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PwError, PwResult};
use crate::loopback::LoopbackProps;

/// Commands approute issues against the daemon.
///
/// Every call blocks until the underlying tool returns. No timeout is applied.
#[cfg_attr(test, mockall::automock)]
pub trait DaemonGateway: Send + Sync {
    /// Dump every registry object as text (`pw-cli info all`).
    fn dump_all(&self) -> PwResult<String>;

    /// Link an output port to an input port.
    fn link(&self, output_port: u32, input_port: u32) -> PwResult<()>;

    /// Remove the link between an output port and an input port.
    fn unlink(&self, output_port: u32, input_port: u32) -> PwResult<()>;

    /// Start a long-lived loopback process that registers a virtual sink.
    fn spawn_loopback(&self, props: &LoopbackProps) -> PwResult<Box<dyn LoopbackProcess>>;
}

/// A running loopback process.
pub trait LoopbackProcess: Send + fmt::Debug {
    /// OS process ID.
    fn pid(&self) -> u32;

    /// Stop the process and reap it.
    fn terminate(&mut self) -> PwResult<()>;
}

/// Locations of the PipeWire command-line tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    /// `pw-cli`
    #[serde(default = "default_pw_cli")]
    pub pw_cli: PathBuf,
    /// `pw-link`
    #[serde(default = "default_pw_link")]
    pub pw_link: PathBuf,
    /// `pw-loopback`
    #[serde(default = "default_pw_loopback")]
    pub pw_loopback: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            pw_cli: default_pw_cli(),
            pw_link: default_pw_link(),
            pw_loopback: default_pw_loopback(),
        }
    }
}

fn default_pw_cli() -> PathBuf {
    PathBuf::from("pw-cli")
}

fn default_pw_link() -> PathBuf {
    PathBuf::from("pw-link")
}

fn default_pw_loopback() -> PathBuf {
    PathBuf::from("pw-loopback")
}

/// [`DaemonGateway`] backed by `pw-cli`, `pw-link` and `pw-loopback`.
#[derive(Debug, Clone, Default)]
pub struct PwCliGateway {
    tools: ToolPaths,
}

impl PwCliGateway {
    /// Create a gateway using the given tool locations.
    #[must_use]
    pub fn new(tools: ToolPaths) -> Self {
        Self { tools }
    }

    /// Tool locations in use.
    #[must_use]
    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    fn run(&self, program: &Path, args: &[String]) -> PwResult<String> {
        let command = describe(program, args);
        debug!(command = %command, "Running PipeWire tool");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| PwError::SpawnFailed { command: command.clone(), source })?;

        if !output.status.success() {
            return Err(PwError::ExternalToolFailure {
                command,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl DaemonGateway for PwCliGateway {
    fn dump_all(&self) -> PwResult<String> {
        self.run(&self.tools.pw_cli, &["info".to_string(), "all".to_string()])
    }

    fn link(&self, output_port: u32, input_port: u32) -> PwResult<()> {
        self.run(&self.tools.pw_link, &[output_port.to_string(), input_port.to_string()])?;
        Ok(())
    }

    fn unlink(&self, output_port: u32, input_port: u32) -> PwResult<()> {
        self.run(
            &self.tools.pw_link,
            &["-d".to_string(), output_port.to_string(), input_port.to_string()],
        )?;
        Ok(())
    }

    fn spawn_loopback(&self, props: &LoopbackProps) -> PwResult<Box<dyn LoopbackProcess>> {
        let args = props.to_args();
        let command = describe(&self.tools.pw_loopback, &args);

        let child = Command::new(&self.tools.pw_loopback)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| PwError::SpawnFailed { command: command.clone(), source })?;

        info!(pid = child.id(), command = %command, "Loopback process started");
        Ok(Box::new(ChildLoopback { child, command, reaped: false }))
    }
}

/// A `pw-loopback` child process.
#[derive(Debug)]
struct ChildLoopback {
    child: Child,
    command: String,
    reaped: bool,
}

impl ChildLoopback {
    #[allow(unsafe_code)] // kill(2) has no memory-safety preconditions
    fn send_sigterm(&self) -> bool {
        let Ok(pid) = libc::pid_t::try_from(self.child.id()) else {
            return false;
        };
        unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
    }
}

impl LoopbackProcess for ChildLoopback {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn terminate(&mut self) -> PwResult<()> {
        if self.reaped {
            return Ok(());
        }

        // SIGTERM lets pw-loopback unregister its nodes; fall back to SIGKILL.
        if !self.send_sigterm() {
            warn!(pid = self.child.id(), command = %self.command, "SIGTERM failed, killing loopback");
            self.child.kill()?;
        }

        let status = self.child.wait()?;
        self.reaped = true;
        debug!(pid = self.child.id(), ?status, "Loopback process exited");
        Ok(())
    }
}

impl Drop for ChildLoopback {
    fn drop(&mut self) {
        if !self.reaped {
            warn!(pid = self.child.id(), "Loopback dropped while running, terminating");
            if let Err(e) = self.terminate() {
                warn!(error = %e, "Failed to terminate loopback on drop");
            }
        }
    }
}

fn describe(program: &Path, args: &[String]) -> String {
    let mut command = program.display().to_string();
    for arg in args {
        command.push(' ');
        command.push_str(arg);
    }
    command
}
