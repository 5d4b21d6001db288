//! Remote callbacks passed along with streaming requests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque identifier of a function on the caller's side. What it means
/// (a webhook URL, a session-scoped id) is up to the [`CallbackSink`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Callback(String);

impl Callback {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivers callback invocations back to the caller.
///
/// Calls for one streamed command are awaited one after another, so a sink
/// that delivers synchronously preserves line order.
#[async_trait]
pub trait CallbackSink: Send + Sync {
    async fn invoke(&self, callback: &Callback, args: Vec<Value>);
}
