use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{debug, warn};

use crate::{
    path::{get_at, merge_at, overlaps, segments, set_at},
    RemoteStore, Subscription,
};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Set,
    Update,
}

/// One accepted write, in the order the store applied it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreWrite {
    pub kind: WriteKind,
    pub path: String,
    pub value: Value,
}

#[derive(Clone)]
struct Change {
    path: String,
    root: Arc<Value>,
}

struct MemoryState {
    root: Value,
    writes: Vec<StoreWrite>,
    reject_writes: Option<String>,
}

/// In-process replica. Every accepted write is pushed to every subscriber
/// whose path it touches, even when the value did not change.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    changes: broadcast::Sender<Change>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_root(Value::Object(Map::new()))
    }

    pub fn with_root(root: Value) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                root,
                writes: Vec::new(),
                reject_writes: None,
            })),
            changes,
        }
    }

    /// Rejects every later write with `reason` until cleared with `None`.
    pub async fn reject_writes(&self, reason: Option<String>) {
        self.state.lock().await.reject_writes = reason;
    }

    pub async fn writes(&self) -> Vec<StoreWrite> {
        self.state.lock().await.writes.clone()
    }

    pub async fn snapshot(&self) -> Value {
        self.state.lock().await.root.clone()
    }

    async fn apply(&self, write: StoreWrite) -> Result<()> {
        let change = {
            let mut state = self.state.lock().await;
            if let Some(reason) = &state.reject_writes {
                return Err(anyhow!("write to {} rejected: {reason}", write.path));
            }
            let segs = segments(&write.path);
            match (&write.kind, &write.value) {
                (WriteKind::Set, value) => set_at(&mut state.root, &segs, value.clone()),
                (WriteKind::Update, Value::Object(fields)) => {
                    merge_at(&mut state.root, &segs, fields)
                }
                (WriteKind::Update, other) => {
                    return Err(anyhow!(
                        "partial write to {} must be an object, got {other}",
                        write.path
                    ));
                }
            }
            let change = Change {
                path: write.path.clone(),
                root: Arc::new(state.root.clone()),
            };
            state.writes.push(write);
            change
        };

        // No receivers is fine: nobody is observing yet.
        let _ = self.changes.send(change);
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn observe(&self, path: &str) -> Result<Subscription> {
        let observed = path.to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let receiver = self.changes.subscribe();
        let current = {
            let state = self.state.lock().await;
            get_at(&state.root, &segments(path))
        };
        let _ = tx.send(current);

        let task = tokio::spawn({
            let observed = observed.clone();
            async move {
                let observed_segs = segments(&observed);
                let mut stream = BroadcastStream::new(receiver);
                while let Some(item) = stream.next().await {
                    let change = match item {
                        Ok(change) => change,
                        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                            warn!(path = %observed, skipped, "memory store: subscriber lagged");
                            continue;
                        }
                    };
                    if !overlaps(&segments(&change.path), &observed_segs) {
                        continue;
                    }
                    debug!(path = %observed, written = %change.path, "memory store: push");
                    if tx.send(get_at(&change.root, &observed_segs)).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(observed, rx, task))
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        self.apply(StoreWrite {
            kind: WriteKind::Update,
            path: path.to_string(),
            value: Value::Object(fields),
        })
        .await
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.apply(StoreWrite {
            kind: WriteKind::Set,
            path: path.to_string(),
            value,
        })
        .await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let state = self.state.lock().await;
        Ok(get_at(&state.root, &segments(path)))
    }
}
