//! Task wiring around [`Engine`]: one loop task owns the engine, a single
//! writer task applies store writes in issue order, and each notification
//! runs on its own task.

use std::sync::Arc;

use anyhow::{Context, Result};
use remote_store::{RemoteStore, Subscription};
use serde_json::Value;
use shared::{
    domain::{GestureMapping, OperatingMode},
    error::SyncError,
    protocol::paths,
};
use tokio::{
    sync::{broadcast, mpsc, oneshot, Mutex},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, info, warn};

use crate::{
    dispatcher::{DispatchTicket, LocalExport},
    engine::{Clock, Effect, Engine, StoreWriteRequest, SystemClock, WriteBody},
    events::{EngineEvent, EngineSnapshot, StoreDocument},
    notifier::{DispatchError, Notifier},
};

const COMMAND_QUEUE_DEPTH: usize = 64;
const EVENT_CAPACITY: usize = 256;

enum EngineCommand {
    SetAction {
        gesture: String,
        action: String,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    EnterMode {
        mode: OperatingMode,
        reply: oneshot::Sender<()>,
    },
    ForceSync {
        reply: oneshot::Sender<()>,
    },
    ExportLocal {
        reply: oneshot::Sender<Result<LocalExport, SyncError>>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum LoopInput {
    Store {
        document: StoreDocument,
        value: Value,
    },
    WriteFinished {
        request: StoreWriteRequest,
        result: Result<(), String>,
    },
}

pub struct SyncEngine {
    store: Arc<dyn RemoteStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RemoteStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Opens the store subscriptions and spawns the engine tasks.
    pub async fn start(self) -> Result<EngineHandle> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let mut forwarders = Forwarders::default();
        for document in StoreDocument::ALL {
            let subscription = self
                .store
                .observe(document.path())
                .await
                .with_context(|| format!("failed to observe {}", document.path()))?;
            forwarders.0.push(tokio::spawn(forward_subscription(
                document,
                subscription,
                input_tx.clone(),
            )));
        }

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(Arc::clone(&self.store), write_rx, input_tx));

        let event_loop = EventLoop {
            engine: Engine::new(self.clock),
            notifier: self.notifier,
            writes: write_tx,
            events: events.clone(),
            dispatches: JoinSet::new(),
            in_flight: None,
        };
        let task = tokio::spawn(event_loop.run(command_rx, input_rx, forwarders, writer));
        info!("engine: started");

        Ok(EngineHandle {
            commands: command_tx,
            events,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }
}

/// Cloneable front door to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    events: broadcast::Sender<EngineEvent>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EngineHandle {
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn set_action(&self, gesture: &str, action: &str) -> Result<(), SyncError> {
        let (gesture, action) = (gesture.to_string(), action.to_string());
        self.request(|reply| EngineCommand::SetAction {
            gesture,
            action,
            reply,
        })
        .await?
    }

    pub async fn enter_mode(&self, mode: OperatingMode) -> Result<(), SyncError> {
        self.request(|reply| EngineCommand::EnterMode { mode, reply })
            .await
    }

    pub async fn force_sync(&self) -> Result<(), SyncError> {
        self.request(|reply| EngineCommand::ForceSync { reply }).await
    }

    pub async fn export_local(&self) -> Result<LocalExport, SyncError> {
        self.request(|reply| EngineCommand::ExportLocal { reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot, SyncError> {
        self.request(|reply| EngineCommand::Snapshot { reply }).await
    }

    /// Stops every subscription and waits for the loop to exit. Writes that
    /// were already issued are still delivered to the store.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self
            .commands
            .send(EngineCommand::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = done.await;
        }
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, SyncError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| SyncError::EngineStopped)?;
        response.await.map_err(|_| SyncError::EngineStopped)
    }
}

#[derive(Default)]
struct Forwarders(Vec<JoinHandle<()>>);

impl Forwarders {
    async fn stop(mut self) {
        for task in self.0.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for Forwarders {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

struct EventLoop {
    engine: Engine,
    notifier: Arc<dyn Notifier>,
    writes: mpsc::UnboundedSender<StoreWriteRequest>,
    events: broadcast::Sender<EngineEvent>,
    dispatches: JoinSet<(DispatchTicket, Result<(), DispatchError>)>,
    in_flight: Option<DispatchTicket>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        mut inputs: mpsc::UnboundedReceiver<LoopInput>,
        forwarders: Forwarders,
        writer: JoinHandle<()>,
    ) {
        let mut shutdown_reply = None;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(EngineCommand::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(input) = inputs.recv() => {
                    self.handle_input(input);
                    self.flush();
                }
                Some(joined) = self.dispatches.join_next(), if !self.dispatches.is_empty() => {
                    self.handle_dispatch_joined(joined);
                    self.flush();
                }
            }
        }

        forwarders.stop().await;
        self.dispatches.abort_all();
        drop(self.writes);
        let _ = writer.await;
        info!("engine: stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SetAction {
                gesture,
                action,
                reply,
            } => {
                let result = self.engine.set_action(&gesture, &action);
                if let Err(err) = &result {
                    debug!(
                        gesture = %gesture,
                        action = %action,
                        "engine: rejected operator input: {err}"
                    );
                }
                self.flush();
                let _ = reply.send(result);
            }
            EngineCommand::EnterMode { mode, reply } => {
                self.engine.enter_mode(mode);
                self.flush();
                let _ = reply.send(());
            }
            EngineCommand::ForceSync { reply } => {
                self.engine.force_sync();
                self.flush();
                let _ = reply.send(());
            }
            EngineCommand::ExportLocal { reply } => {
                let result = self.engine.export_local();
                self.flush();
                let _ = reply.send(result);
            }
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot());
            }
            EngineCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_input(&mut self, input: LoopInput) {
        match input {
            LoopInput::Store { document, value } => self.engine.on_store_value(document, value),
            LoopInput::WriteFinished { request, result } => {
                self.engine.on_write_finished(&request, result)
            }
        }
    }

    fn handle_dispatch_joined(
        &mut self,
        joined: Result<(DispatchTicket, Result<(), DispatchError>), tokio::task::JoinError>,
    ) {
        let (ticket, result) = match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                let Some(ticket) = self.in_flight else {
                    warn!("engine: dispatch task ended without a ticket: {err}");
                    return;
                };
                (ticket, Err(DispatchError::Transport(err.to_string())))
            }
        };
        self.in_flight = None;
        self.engine.on_dispatch_finished(ticket, result);
    }

    fn flush(&mut self) {
        for effect in self.engine.drain_effects() {
            match effect {
                Effect::Write(request) => {
                    if self.writes.send(request).is_err() {
                        warn!("engine: store writer is gone; dropping write");
                    }
                }
                Effect::Dispatch { ticket, payload } => {
                    let notifier = Arc::clone(&self.notifier);
                    self.in_flight = Some(ticket);
                    self.dispatches.spawn(async move {
                        let result = notifier.dispatch(&payload).await;
                        (ticket, result)
                    });
                }
                Effect::Publish(event) => {
                    let _ = self.events.send(event);
                }
            }
        }
    }
}

async fn forward_subscription(
    document: StoreDocument,
    mut subscription: Subscription,
    inputs: mpsc::UnboundedSender<LoopInput>,
) {
    while let Some(value) = subscription.next().await {
        if inputs.send(LoopInput::Store { document, value }).is_err() {
            return;
        }
    }
    warn!(
        path = document.path(),
        "engine: subscription ended; keeping last known value"
    );
}

async fn run_writer(
    store: Arc<dyn RemoteStore>,
    mut requests: mpsc::UnboundedReceiver<StoreWriteRequest>,
    inputs: mpsc::UnboundedSender<LoopInput>,
) {
    while let Some(request) = requests.recv().await {
        let outcome = match &request.body {
            WriteBody::Partial(fields) => store.update(request.path, fields.clone()).await,
            WriteBody::Full(document) => store.set(request.path, document.clone()).await,
        };
        let result = outcome.map_err(|err| format!("{err:#}"));
        // The loop may already be gone during shutdown; the write itself still happened.
        let _ = inputs.send(LoopInput::WriteFinished { request, result });
    }
}

/// Writes the default mapping unless the store already holds one.
/// Returns whether anything was written.
pub async fn seed_default_mappings(store: &dyn RemoteStore, overwrite: bool) -> Result<bool> {
    if !overwrite && !store.get(paths::MAPPINGS).await?.is_null() {
        return Ok(false);
    }
    let defaults = serde_json::to_value(GestureMapping::default())?;
    store
        .set(paths::MAPPINGS, defaults)
        .await
        .context("failed to seed default mappings")?;
    info!(path = paths::MAPPINGS, "engine: seeded default mappings");
    Ok(true)
}

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
