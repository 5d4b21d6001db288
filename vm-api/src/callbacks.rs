//! Delivers watcher callbacks to the caller as webhooks.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use vm_orchestrator::{Callback, CallbackSink};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Treats every callback identifier as a URL and POSTs `{"args": [...]}`
/// to it. Delivery is best effort.
#[derive(Clone)]
pub struct WebhookCallbacks {
    client: reqwest::Client,
}

impl WebhookCallbacks {
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackSink for WebhookCallbacks {
    async fn invoke(&self, callback: &Callback, args: Vec<Value>) {
        let body = json!({ "args": args });

        match self.client.post(callback.as_str()).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Delivered callback to {}", callback);
            }
            Ok(response) => {
                warn!(
                    "Callback {} rejected with status {}",
                    callback,
                    response.status()
                );
            }
            Err(err) => warn!("Failed to deliver callback to {}: {}", callback, err),
        }
    }
}
