//! Vagrant provider abstraction library.
//!
//! The orchestrator talks to Vagrant through the narrow [`VagrantTool`] and
//! [`Machine`] traits defined here, and to VirtualBox port-forwarding rules
//! through [`PortForwarding`]. The real implementations shell out to the
//! `vagrant` and `VBoxManage` binaries; the mock implementations (behind the
//! `test-helpers` feature) script their behaviour for tests.

// Standard library
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// External crates
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub mod error;
pub mod vagrant;
pub mod vagrantfile;
pub mod virtualbox;

// When the `test-helpers` feature is enabled, include the mock provider.
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

pub use error::{ProviderError, Result};
pub use vagrant::CliVagrant;
pub use vagrantfile::{render_vagrantfile, VagrantfileSpec};
pub use virtualbox::VBoxManage;

/// A single event emitted by a running Vagrant command.
#[derive(Debug)]
pub enum CommandOutput {
    /// One line of combined stdout/stderr, without the trailing newline.
    Line(String),
    /// The command terminated unsuccessfully. Always the last event.
    Error(ProviderError),
}

/// Live, ordered output of a running command. The stream ends when the
/// sending side is dropped.
pub type CommandStream = mpsc::UnboundedReceiver<CommandOutput>;

/// Consumes `stream` until it ends, passing each line to `on_line`.
///
/// Returns the terminal error of the command, if it reported one.
pub async fn wait<F>(mut stream: CommandStream, mut on_line: F) -> Result<()>
where
    F: FnMut(&str),
{
    let mut result = Ok(());
    while let Some(output) = stream.recv().await {
        match output {
            CommandOutput::Line(line) => on_line(&line),
            CommandOutput::Error(err) => result = Err(err),
        }
    }
    result
}

/// Machine state as reported by `vagrant status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Running,
    Poweroff,
    NotCreated,
    Saved,
    Aborted,
    Preparing,
    Unknown,
}

impl MachineState {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "running" => MachineState::Running,
            "poweroff" | "shutoff" | "stopped" => MachineState::Poweroff,
            "not_created" | "not created" => MachineState::NotCreated,
            "saved" | "suspended" => MachineState::Saved,
            "aborted" => MachineState::Aborted,
            "preparing" => MachineState::Preparing,
            _ => MachineState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MachineState::Running => "running",
            MachineState::Poweroff => "poweroff",
            MachineState::NotCreated => "not_created",
            MachineState::Saved => "saved",
            MachineState::Aborted => "aborted",
            MachineState::Preparing => "preparing",
            MachineState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A machine known to Vagrant on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInfo {
    pub vagrantfile_path: PathBuf,
    pub state: MachineState,
}

/// A VirtualBox NAT port-forwarding rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedPort {
    #[serde(rename = "guest", default, skip_serializing_if = "is_zero")]
    pub guest_port: u16,
    #[serde(rename = "host", default, skip_serializing_if = "is_zero")]
    pub host_port: u16,
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

/// Binds Vagrant working directories to [`Machine`] handles.
pub trait VagrantTool: Send + Sync {
    /// Creates a handle for the Vagrant environment rooted at `path`.
    ///
    /// Must not touch the filesystem beyond validating the path.
    fn open(&self, path: &Path) -> Result<Arc<dyn Machine>>;
}

/// One Vagrant environment (a directory holding a `Vagrantfile`).
///
/// Streaming operations return as soon as the command has been started;
/// their output arrives on the returned [`CommandStream`].
pub trait Machine: Send + Sync {
    fn vagrantfile_path(&self) -> &Path;

    /// Every machine Vagrant knows about on this host.
    fn list(&self) -> Result<Vec<MachineInfo>>;

    /// Writes `vagrantfile` into the environment directory.
    fn create(&self, vagrantfile: &str) -> Result<()>;

    fn provider(&self) -> Result<String>;

    fn status(&self) -> Result<MachineState>;

    fn version(&self) -> Result<String>;

    /// Starts `vagrant box add`. An already installed box ends the stream
    /// with [`ProviderError::BoxAlreadyExists`].
    fn box_add(&self, name: &str) -> Result<CommandStream>;

    fn up(&self) -> Result<CommandStream>;

    fn halt(&self) -> Result<CommandStream>;

    fn destroy(&self) -> Result<CommandStream>;
}

/// Read access to VirtualBox port-forwarding rules.
pub trait PortForwarding: Send + Sync {
    /// Resolves a box name to the VirtualBox VM name backing it.
    fn lookup_name(&self, name: &str) -> Result<String>;

    fn forwarded_ports(&self, vm_name: &str) -> Result<Vec<ForwardedPort>>;
}
