//! Vagrant lifecycle orchestration
//!
//! This crate contains the request handling behind the Vagrant RPC surface:
//! per-path machine handles, deduplicated base box downloads, streamed
//! command watching and last-known machine state. It is consumed by the
//! vm-api HTTP service but has no HTTP dependencies of its own.

pub mod boxes;
pub mod callback;
pub mod db;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod storage;
pub mod watcher;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;


pub use boxes::{BoxCoordinator, BoxResult};
pub use callback::{Callback, CallbackSink};
pub use error::{AggregatedError, HandlerError, ProvisioningError, Result};
pub use handlers::{CreateOptions, Handlers, Info, Options, Request, DEFAULT_BOX};
pub use registry::InstanceRegistry;
pub use storage::{MemoryStatusStore, SqliteStatusStore, StatusStore};
pub use watcher::{CommandWatcher, WatchCallbacks, WatchOutcome};
