use crate::callback::{Callback, CallbackSink};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    // A single connection: every `sqlite::memory:` connection is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// One recorded callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackEvent {
    pub callback: String,
    pub args: Vec<Value>,
}

impl CallbackEvent {
    pub fn new(callback: &str, args: Vec<Value>) -> Self {
        Self {
            callback: callback.to_string(),
            args,
        }
    }
}

/// [`CallbackSink`] that records every invocation in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<CallbackEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CallbackEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, callback: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.callback == callback)
            .count()
    }

    /// Polls until `callback` has fired at least `times` times; gives up
    /// after five seconds.
    pub async fn wait_for(&self, callback: &str, times: usize) -> bool {
        for _ in 0..500 {
            if self.count(callback) >= times {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

#[async_trait]
impl CallbackSink for RecordingSink {
    async fn invoke(&self, callback: &Callback, args: Vec<Value>) {
        self.events
            .lock()
            .unwrap()
            .push(CallbackEvent::new(callback.as_str(), args));
    }
}
