//! Replicated key-value document store seen by the sync engine.
//!
//! The engine only needs two capabilities: observe a path and get every
//! value it takes (including values this process wrote), and write either a
//! whole document or a subset of its keys.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::{sync::mpsc, task::JoinHandle};

mod memory;
mod path;
mod rest;
mod sse;

pub use memory::{MemoryStore, StoreWrite, WriteKind};
pub use path::{get_at, merge_at, segments, set_at};
pub use rest::{RestStore, RestStoreConfig};

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Starts observing `path`. The current value is delivered first, then
    /// every later value. An absent document is delivered as `Value::Null`.
    async fn observe(&self, path: &str) -> Result<Subscription>;

    /// Partial write: only the given keys under `path` are replaced.
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()>;

    /// Full write of the document at `path`.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// One-shot read.
    async fn get(&self, path: &str) -> Result<Value>;
}

/// Lifetime object for one observed path.
///
/// Values stop arriving once [`Subscription::stop`] is called or the
/// subscription is dropped.
pub struct Subscription {
    path: String,
    values: mpsc::UnboundedReceiver<Value>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        path: impl Into<String>,
        values: mpsc::UnboundedReceiver<Value>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            path: path.into(),
            values,
            task: Some(task),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next observed value, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Value> {
        self.values.recv().await
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.values.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
