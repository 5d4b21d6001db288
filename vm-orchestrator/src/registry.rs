//! Path to [`Machine`] handle cache.

use crate::error::{HandlerError, Result};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use vm_provider::{Machine, VagrantTool};

/// Caches one [`Machine`] handle per normalized Vagrant directory for the
/// lifetime of the process.
pub struct InstanceRegistry {
    home: PathBuf,
    tool: Arc<dyn VagrantTool>,
    handles: Mutex<HashMap<PathBuf, Arc<dyn Machine>>>,
}

impl InstanceRegistry {
    pub fn new(home: impl Into<PathBuf>, tool: Arc<dyn VagrantTool>) -> Self {
        Self {
            home: home.into(),
            tool,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn tool(&self) -> &Arc<dyn VagrantTool> {
        &self.tool
    }

    /// Relative paths are taken relative to the home directory; the result
    /// is always lexically cleaned.
    pub fn absolute(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            clean(path)
        } else {
            clean(&self.home.join(path))
        }
    }

    /// Returns the cached handle for `path`, constructing it on first use.
    ///
    /// The lock is not held while the handle is constructed. Two tasks
    /// touching the same new path at once may both construct a handle; the
    /// first one inserted is kept and the other is dropped.
    pub fn resolve(&self, path: &str) -> Result<Arc<dyn Machine>> {
        let path = self.absolute(path);

        if let Some(machine) = self.lock().get(&path) {
            return Ok(Arc::clone(machine));
        }

        let machine = self
            .tool
            .open(&path)
            .map_err(|source| HandlerError::Resolution {
                path: path.display().to_string(),
                source,
            })?;

        debug!("Registered Vagrant handle for {}", path.display());
        Ok(Arc::clone(self.lock().entry(path).or_insert(machine)))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<dyn Machine>>> {
        // Entries are inserted whole; a poisoned map is still consistent.
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Lexical path cleaning: drops `.` components, resolves `..` against the
/// preceding component and never climbs above the root.
fn clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() && !path.has_root() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}
