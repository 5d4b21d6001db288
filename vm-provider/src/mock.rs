//! Scriptable in-process stand-ins for `vagrant` and `VBoxManage`.

use crate::virtualbox::match_vm_name;
use crate::{
    CommandOutput, CommandStream, ForwardedPort, Machine, MachineInfo, MachineState,
    PortForwarding, ProviderError, Result, VagrantTool,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a mocked `vagrant box add` ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoxOutcome {
    Added,
    AlreadyExists,
    Fail(String),
}

/// One scripted event of a mocked streaming command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutput {
    Line(String),
    Error(String),
}

#[derive(Debug)]
struct MockState {
    opened: AtomicUsize,
    rejected: Mutex<HashSet<PathBuf>>,
    box_adds: Mutex<Vec<String>>,
    box_delay: Mutex<Duration>,
    box_outcomes: Mutex<Vec<BoxOutcome>>,
    script: Mutex<Vec<ScriptedOutput>>,
    start_failure: Mutex<Option<String>>,
    commands: Mutex<Vec<(PathBuf, String)>>,
    vagrantfiles: Mutex<HashMap<PathBuf, String>>,
    states: Mutex<HashMap<PathBuf, MachineState>>,
}

/// Mock [`VagrantTool`]. Clones share state, so a test can keep one clone
/// for assertions while the orchestrator owns another.
#[derive(Debug, Clone)]
pub struct MockVagrant {
    state: Arc<MockState>,
}

impl Default for MockVagrant {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVagrant {
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                opened: AtomicUsize::new(0),
                rejected: Mutex::new(HashSet::new()),
                box_adds: Mutex::new(Vec::new()),
                box_delay: Mutex::new(Duration::ZERO),
                box_outcomes: Mutex::new(Vec::new()),
                script: Mutex::new(Vec::new()),
                start_failure: Mutex::new(None),
                commands: Mutex::new(Vec::new()),
                vagrantfiles: Mutex::new(HashMap::new()),
                states: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Delays the end of every `box add` stream.
    pub fn with_box_delay(self, delay: Duration) -> Self {
        *lock(&self.state.box_delay) = delay;
        self
    }

    /// Queues outcomes for successive `box add` calls; once exhausted every
    /// call ends with [`BoxOutcome::Added`].
    pub fn with_box_outcomes(self, outcomes: Vec<BoxOutcome>) -> Self {
        *lock(&self.state.box_outcomes) = outcomes;
        self
    }

    /// Output emitted by `up`, `halt` and `destroy`.
    pub fn with_script(self, script: Vec<ScriptedOutput>) -> Self {
        *lock(&self.state.script) = script;
        self
    }

    /// Makes `up`, `halt` and `destroy` fail before producing a stream.
    pub fn with_start_failure(self, message: &str) -> Self {
        *lock(&self.state.start_failure) = Some(message.to_string());
        self
    }

    /// Makes `open` fail for `path`.
    pub fn reject(self, path: impl Into<PathBuf>) -> Self {
        lock(&self.state.rejected).insert(path.into());
        self
    }

    pub fn set_state(&self, path: impl Into<PathBuf>, state: MachineState) {
        lock(&self.state.states).insert(path.into(), state);
    }

    /// Number of handles constructed through `open`.
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Number of `box add` invocations for `name`.
    pub fn box_add_calls(&self, name: &str) -> usize {
        lock(&self.state.box_adds)
            .iter()
            .filter(|n| n.as_str() == name)
            .count()
    }

    /// Streaming commands started so far, as `(path, command)`.
    pub fn commands(&self) -> Vec<(PathBuf, String)> {
        lock(&self.state.commands).clone()
    }

    pub fn vagrantfile(&self, path: &Path) -> Option<String> {
        lock(&self.state.vagrantfiles).get(path).cloned()
    }
}

impl VagrantTool for MockVagrant {
    fn open(&self, path: &Path) -> Result<Arc<dyn Machine>> {
        if lock(&self.state.rejected).contains(path) {
            return Err(ProviderError::InvalidPath(path.display().to_string()));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockMachine {
            path: path.to_path_buf(),
            state: Arc::clone(&self.state),
        }))
    }
}

#[derive(Debug)]
pub struct MockMachine {
    path: PathBuf,
    state: Arc<MockState>,
}

impl MockMachine {
    fn stream(&self, command: &str, on_success: Option<MachineState>) -> Result<CommandStream> {
        if let Some(message) = lock(&self.state.start_failure).clone() {
            return Err(ProviderError::CommandFailed(message));
        }
        lock(&self.state.commands).push((self.path.clone(), command.to_string()));

        let script = lock(&self.state.script).clone();
        let failed = script.iter().any(|o| matches!(o, ScriptedOutput::Error(_)));
        if let (false, Some(state)) = (failed, on_success) {
            lock(&self.state.states).insert(self.path.clone(), state);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for output in script {
            let output = match output {
                ScriptedOutput::Line(line) => CommandOutput::Line(line),
                ScriptedOutput::Error(msg) => {
                    CommandOutput::Error(ProviderError::CommandFailed(msg))
                }
            };
            let _ = tx.send(output);
        }
        Ok(rx)
    }
}

impl Machine for MockMachine {
    fn vagrantfile_path(&self) -> &Path {
        &self.path
    }

    fn list(&self) -> Result<Vec<MachineInfo>> {
        let mut machines: Vec<MachineInfo> = lock(&self.state.vagrantfiles)
            .keys()
            .map(|path| MachineInfo {
                vagrantfile_path: path.clone(),
                state: lock(&self.state.states)
                    .get(path)
                    .copied()
                    .unwrap_or(MachineState::NotCreated),
            })
            .collect();
        machines.sort_by(|a, b| a.vagrantfile_path.cmp(&b.vagrantfile_path));
        Ok(machines)
    }

    fn create(&self, vagrantfile: &str) -> Result<()> {
        lock(&self.state.vagrantfiles).insert(self.path.clone(), vagrantfile.to_string());
        Ok(())
    }

    fn provider(&self) -> Result<String> {
        Ok("virtualbox".to_string())
    }

    fn status(&self) -> Result<MachineState> {
        Ok(lock(&self.state.states)
            .get(&self.path)
            .copied()
            .unwrap_or(MachineState::NotCreated))
    }

    fn version(&self) -> Result<String> {
        Ok("2.4.1".to_string())
    }

    fn box_add(&self, name: &str) -> Result<CommandStream> {
        lock(&self.state.box_adds).push(name.to_string());

        let outcome = {
            let mut outcomes = lock(&self.state.box_outcomes);
            if outcomes.is_empty() {
                BoxOutcome::Added
            } else {
                outcomes.remove(0)
            }
        };
        let delay = *lock(&self.state.box_delay);
        let name = name.to_string();

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let _ = tx.send(CommandOutput::Line(format!("==> box: Adding box '{}'", name)));
            std::thread::sleep(delay);
            let end = match outcome {
                BoxOutcome::Added => None,
                BoxOutcome::AlreadyExists => Some(ProviderError::BoxAlreadyExists(name)),
                BoxOutcome::Fail(msg) => Some(ProviderError::CommandFailed(msg)),
            };
            if let Some(err) = end {
                let _ = tx.send(CommandOutput::Error(err));
            }
        });
        Ok(rx)
    }

    fn up(&self) -> Result<CommandStream> {
        self.stream("up", Some(MachineState::Running))
    }

    fn halt(&self) -> Result<CommandStream> {
        self.stream("halt", Some(MachineState::Poweroff))
    }

    fn destroy(&self) -> Result<CommandStream> {
        self.stream("destroy", Some(MachineState::NotCreated))
    }
}

/// Mock [`PortForwarding`] over a fixed VM table.
#[derive(Debug, Clone, Default)]
pub struct MockPortForwarding {
    vms: HashMap<String, Vec<ForwardedPort>>,
}

impl MockPortForwarding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vm(mut self, name: &str, ports: Vec<ForwardedPort>) -> Self {
        self.vms.insert(name.to_string(), ports);
        self
    }
}

impl PortForwarding for MockPortForwarding {
    fn lookup_name(&self, name: &str) -> Result<String> {
        let names: Vec<String> = self.vms.keys().cloned().collect();
        match_vm_name(&names, name)
    }

    fn forwarded_ports(&self, vm_name: &str) -> Result<Vec<ForwardedPort>> {
        self.vms
            .get(vm_name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(vm_name.to_string()))
    }
}
