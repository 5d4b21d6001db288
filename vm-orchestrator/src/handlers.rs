//! RPC handlers for managing Vagrant boxes on many different paths.
//!
//! Every path-based request goes through the same pipeline: decode the
//! arguments, resolve the [`Machine`] handle for the normalized path, then
//! run the operation. `up` additionally waits until a base box is
//! available, and the lifecycle operations (`up`, `halt`, `destroy`) report
//! their progress through the caller's callbacks instead of the RPC reply.

use crate::boxes::BoxCoordinator;
use crate::callback::CallbackSink;
use crate::error::{HandlerError, Result};
use crate::registry::InstanceRegistry;
use crate::storage::StatusStore;
use crate::watcher::{CommandWatcher, WatchCallbacks};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tracing::{debug, error, info, warn};
use vm_provider::{
    render_vagrantfile, CommandStream, ForwardedPort, Machine, MachineState, PortForwarding,
    VagrantTool, VagrantfileSpec,
};

pub const DEFAULT_BOX: &str = "ubuntu/trusty64";
pub const DEFAULT_MEMORY_MB: u32 = 1024;
pub const DEFAULT_CPUS: u32 = 1;

/// Collaborators and settings supplied at process start.
pub struct Options {
    /// Base directory for relative request paths.
    pub home: PathBuf,
    /// Hostname given to machines created without one.
    pub username: String,
    pub default_box: String,
    pub vagrant: Arc<dyn VagrantTool>,
    pub ports: Arc<dyn PortForwarding>,
    pub store: Arc<dyn StatusStore>,
    pub callbacks: Arc<dyn CallbackSink>,
}

/// An inbound call: method name, calling user and raw JSON arguments.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub username: String,
    pub args: Value,
}

impl Request {
    pub fn new(method: impl Into<String>, username: impl Into<String>, args: Value) -> Self {
        Self {
            method: method.into(),
            username: username.into(),
            args,
        }
    }
}

/// Returned by `status` and `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    #[serde(rename = "filePath")]
    pub file_path: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Arguments of `create`; returned with defaults filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateOptions {
    pub username: String,
    pub hostname: String,
    #[serde(rename = "box", skip_serializing_if = "String::is_empty")]
    pub box_name: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub memory: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub cpus: u32,
    pub provision_data: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub custom_script: String,
    pub file_path: String,
    #[serde(rename = "forwarded_ports", skip_serializing_if = "Vec::is_empty")]
    pub forwarded_ports: Vec<ForwardedPort>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

#[derive(Debug, Deserialize)]
struct PathRequest {
    #[serde(rename = "filePath", default)]
    file_path: String,
}

#[derive(Debug, Deserialize)]
struct ForwardedPortsRequest {
    #[serde(default)]
    name: String,
}

impl ForwardedPortsRequest {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(HandlerError::InvalidArgument("box name is empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Lifecycle {
    Up,
    Halt,
    Destroy,
}

impl Lifecycle {
    fn start(self, machine: &dyn Machine) -> vm_provider::Result<CommandStream> {
        match self {
            Lifecycle::Up => machine.up(),
            Lifecycle::Halt => machine.halt(),
            Lifecycle::Destroy => machine.destroy(),
        }
    }

    fn resulting_state(self) -> MachineState {
        match self {
            Lifecycle::Up => MachineState::Running,
            Lifecycle::Halt => MachineState::Poweroff,
            Lifecycle::Destroy => MachineState::NotCreated,
        }
    }
}

struct Inner {
    username: String,
    default_box: String,
    registry: InstanceRegistry,
    boxes: BoxCoordinator,
    watcher: CommandWatcher,
    ports: Arc<dyn PortForwarding>,
    store: Arc<dyn StatusStore>,
    init: Once,
}

/// Entry point for every Vagrant RPC. Cheap to clone.
#[derive(Clone)]
pub struct Handlers {
    inner: Arc<Inner>,
}

impl Handlers {
    pub fn new(opts: Options) -> Self {
        Self {
            inner: Arc::new(Inner {
                username: opts.username,
                default_box: opts.default_box,
                registry: InstanceRegistry::new(opts.home, opts.vagrant),
                boxes: BoxCoordinator::new(),
                watcher: CommandWatcher::new(opts.callbacks),
                ports: opts.ports,
                store: opts.store,
                init: Once::new(),
            }),
        }
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.inner.registry
    }

    pub fn boxes(&self) -> &BoxCoordinator {
        &self.inner.boxes
    }

    /// Dispatches `req` by method name. Accepts both `vagrant.<method>` and
    /// bare method names.
    pub async fn call(&self, req: &Request) -> Result<Value> {
        let method = req.method.strip_prefix("vagrant.").unwrap_or(&req.method);

        let value = match method {
            "list" => serde_json::to_value(self.list(req).await?)?,
            "create" => serde_json::to_value(self.create(req).await?)?,
            "provider" => serde_json::to_value(self.provider(req).await?)?,
            "destroy" => serde_json::to_value(self.destroy(req).await?)?,
            "halt" => serde_json::to_value(self.halt(req).await?)?,
            "up" => serde_json::to_value(self.up(req).await?)?,
            "status" => serde_json::to_value(self.status(req).await?)?,
            "version" => serde_json::to_value(self.version(req).await?)?,
            "forwardedPorts" | "forwarded_ports" => {
                serde_json::to_value(self.forwarded_ports(req).await?)?
            }
            other => return Err(HandlerError::UnknownMethod(other.to_string())),
        };

        Ok(value)
    }

    /// Lists every Vagrant machine on this host with its state.
    pub async fn list(&self, req: &Request) -> Result<Vec<Info>> {
        self.with_path(req, |machine| async move {
            let machines = blocking(move || machine.list()).await??;

            Ok(machines
                .into_iter()
                .map(|m| Info {
                    file_path: m.vagrantfile_path.display().to_string(),
                    state: m.state.to_string(),
                    error: None,
                })
                .collect())
        })
        .await
    }

    /// Writes a Vagrantfile for the path and starts fetching its box.
    pub async fn create(&self, req: &Request) -> Result<CreateOptions> {
        self.with_path(req, |machine| async move {
            let mut params: CreateOptions = decode(&req.args)?;

            params.file_path = machine.vagrantfile_path().display().to_string();
            if params.box_name.is_empty() {
                params.box_name = self.inner.default_box.clone();
            }
            if params.hostname.is_empty() {
                params.hostname = self.inner.username.clone();
            }
            if params.username.is_empty() {
                params.username = req.username.clone();
            }
            if params.memory == 0 {
                params.memory = DEFAULT_MEMORY_MB;
            }
            if params.cpus == 0 {
                params.cpus = DEFAULT_CPUS;
            }

            let vagrantfile = render_vagrantfile(&VagrantfileSpec {
                username: params.username.clone(),
                hostname: params.hostname.clone(),
                box_name: params.box_name.clone(),
                memory: params.memory,
                cpus: params.cpus,
                provision_data: params.provision_data.clone(),
                custom_script: params.custom_script.clone(),
                forwarded_ports: params.forwarded_ports.clone(),
            })?;

            let writer = Arc::clone(&machine);
            blocking(move || writer.create(&vagrantfile)).await??;

            let path = machine.vagrantfile_path().to_path_buf();
            self.inner.boxes.begin(machine, &params.box_name, &path);

            Ok(params)
        })
        .await
    }

    /// Returns the provider of the Vagrantfile, such as "virtualbox".
    pub async fn provider(&self, req: &Request) -> Result<String> {
        self.with_path(req, |machine| async move {
            Ok(blocking(move || machine.provider()).await??)
        })
        .await
    }

    /// Destroys the machine; progress goes to the request callbacks.
    pub async fn destroy(&self, req: &Request) -> Result<bool> {
        self.lifecycle(req, Lifecycle::Destroy).await
    }

    /// Stops the machine; progress goes to the request callbacks.
    pub async fn halt(&self, req: &Request) -> Result<bool> {
        self.lifecycle(req, Lifecycle::Halt).await
    }

    /// Creates and starts the machine once a base box is available;
    /// progress goes to the request callbacks.
    pub async fn up(&self, req: &Request) -> Result<bool> {
        self.lifecycle(req, Lifecycle::Up).await
    }

    pub async fn status(&self, req: &Request) -> Result<Info> {
        self.with_path(req, |machine| async move {
            let path = machine.vagrantfile_path().to_path_buf();
            let file_path = path.display().to_string();

            match blocking(move || machine.status()).await? {
                Ok(state) => {
                    self.remember(&path, state).await;
                    Ok(Info {
                        file_path,
                        state: state.to_string(),
                        error: None,
                    })
                }
                // Fall back to what we last saw, flagged with the error.
                Err(err) => match self.inner.store.get(&path).await {
                    Ok(Some(last)) => Ok(Info {
                        file_path,
                        state: last.to_string(),
                        error: Some(err.to_string()),
                    }),
                    _ => Err(err.into()),
                },
            }
        })
        .await
    }

    /// Returns the Vagrant version of the system.
    pub async fn version(&self, req: &Request) -> Result<String> {
        self.with_path(req, |machine| async move {
            Ok(blocking(move || machine.version()).await??)
        })
        .await
    }

    /// Lists all forwarded port rules for the given box.
    pub async fn forwarded_ports(&self, req: &Request) -> Result<Vec<ForwardedPort>> {
        self.init();

        let params: ForwardedPortsRequest = decode(&req.args)?;
        params.validate()?;

        let ports = Arc::clone(&self.inner.ports);
        let name = params.name.clone();
        let vm_name = blocking(move || ports.lookup_name(&name))
            .await?
            .map_err(|source| HandlerError::Lookup {
                name: params.name.clone(),
                source,
            })?;

        let ports = Arc::clone(&self.inner.ports);
        let target = vm_name.clone();
        blocking(move || ports.forwarded_ports(&target))
            .await?
            .map_err(|source| HandlerError::ForwardedPorts {
                name: vm_name,
                source,
            })
    }

    async fn lifecycle(&self, req: &Request, op: Lifecycle) -> Result<bool> {
        self.with_path(req, |machine| async move {
            let callbacks = WatchCallbacks::from_args(&req.args)?;
            let path = machine.vagrantfile_path().to_path_buf();

            if let Lifecycle::Up = op {
                self.inner
                    .boxes
                    .ensure(Arc::clone(&machine), &self.inner.default_box, &path)
                    .await?;
            }

            let handle = self
                .inner
                .watcher
                .watch(&req.method, &path, callbacks, move || op.start(machine.as_ref()))?;

            let store = Arc::clone(&self.inner.store);
            tokio::spawn(async move {
                if let Ok(Ok(())) = handle.await {
                    remember(store.as_ref(), &path, op.resulting_state()).await;
                }
            });

            Ok(true)
        })
        .await
    }

    /// Runs `f` against the handle for the request's `filePath`.
    async fn with_path<'a, T, F, Fut>(&'a self, req: &'a Request, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Machine>) -> Fut,
        Fut: Future<Output = Result<T>> + 'a,
        T: fmt::Debug,
    {
        // The first request of any kind starts downloading the default box
        // so that later `up` calls are unlikely to wait for it.
        self.init();

        let params: PathRequest = decode(&req.args)?;
        if params.file_path.is_empty() {
            return Err(HandlerError::InvalidArgument(
                "[filePath] is missing".to_string(),
            ));
        }

        let machine = self.inner.registry.resolve(&params.file_path)?;

        info!(
            "Calling {:?} on {}",
            req.method,
            machine.vagrantfile_path().display()
        );
        debug!(
            "vagrant: calling {:?} by {:?} with {}",
            req.method, req.username, req.args
        );

        let result = f(machine).await;

        debug!(
            "vagrant: call {:?} by {:?} result: {:?}",
            req.method, req.username, result
        );

        result
    }

    fn init(&self) {
        self.inner.init.call_once(|| {
            let home = self.inner.registry.home();
            match self.inner.registry.tool().open(home) {
                Ok(machine) => {
                    self.inner
                        .boxes
                        .begin(machine, &self.inner.default_box, Path::new(""));
                }
                Err(err) => error!("failed to init Vagrant handlers: {}", err),
            }
        });
    }

    async fn remember(&self, path: &Path, state: MachineState) {
        remember(self.inner.store.as_ref(), path, state).await;
    }
}

async fn remember(store: &dyn StatusStore, path: &Path, state: MachineState) {
    if let Err(err) = store.set(path, state).await {
        warn!("Unable to record state of {}: {}", path.display(), err);
    }
}

fn decode<T: DeserializeOwned>(args: &Value) -> Result<T> {
    if args.is_null() {
        return Err(HandlerError::InvalidArgument(
            "arguments are not passed".to_string(),
        ));
    }
    serde_json::from_value(args.clone()).map_err(|e| HandlerError::InvalidArgument(e.to_string()))
}

async fn blocking<T, F>(f: F) -> Result<vm_provider::Result<T>>
where
    F: FnOnce() -> vm_provider::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await?)
}
