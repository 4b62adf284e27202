//! Engine state and its reactions. Nothing here performs I/O: every method
//! records the writes, dispatches and events it wants in an outbox that the
//! runtime drains and executes.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use shared::{
    domain::{
        CalibrationSession, HardwareDocument, HardwareStatus, NotificationStatus, OperatingMode,
        RehabSession, SyncStatus,
    },
    error::SyncError,
    protocol::{paths, NotificationPayload},
};
use tracing::{debug, info, warn};

use crate::{
    classifier::{classify, ClassifyContext},
    dispatcher::{DispatchRequest, DispatchTicket, LocalExport, NotificationDispatcher},
    events::{EngineEvent, EngineSnapshot, StoreDocument},
    mapping_store::{validate_and_normalize, MappingStore, WriteTicket},
    mode::{ModeController, ModeRequest, SessionToken},
    notifier::DispatchError,
    status::Transition,
};

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOrigin {
    Mapping(WriteTicket),
    Session {
        token: SessionToken,
        target: OperatingMode,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteBody {
    Partial(Map<String, Value>),
    Full(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreWriteRequest {
    pub origin: WriteOrigin,
    pub path: &'static str,
    pub body: WriteBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Write(StoreWriteRequest),
    Dispatch {
        ticket: DispatchTicket,
        payload: NotificationPayload,
    },
    Publish(EngineEvent),
}

pub struct Engine {
    clock: Arc<dyn Clock>,
    mappings: MappingStore,
    dispatcher: NotificationDispatcher,
    modes: ModeController,
    hardware: HardwareStatus,
    current_gesture: Option<String>,
    calibration: CalibrationSession,
    rehab: RehabSession,
    outbox: Vec<Effect>,
}

impl Engine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            mappings: MappingStore::new(),
            dispatcher: NotificationDispatcher::new(),
            modes: ModeController::new(),
            hardware: HardwareStatus::default(),
            current_gesture: None,
            calibration: CalibrationSession::default(),
            rehab: RehabSession::default(),
            outbox: Vec::new(),
        }
    }

    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.outbox)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            mapping: self.mappings.mapping().clone(),
            hardware: self.hardware,
            current_gesture: self.current_gesture.clone(),
            mode: self.modes.active(),
            pending_mode: self.modes.pending().map(|pending| pending.target),
            sync_status: self.mappings.sync_status(),
            notification_status: self.dispatcher.status(),
            calibration: self.calibration.clone(),
            rehab: self.rehab.clone(),
            outstanding_writes: self.mappings.outstanding_writes(),
            dispatch_in_flight: self.dispatcher.in_flight(),
        }
    }

    pub fn on_store_value(&mut self, document: StoreDocument, value: Value) {
        match document {
            StoreDocument::Mappings => self.on_mapping_pushed(&value),
            StoreDocument::CurrentGesture => {
                let gesture = match value {
                    Value::Null => None,
                    Value::String(label) => Some(label),
                    other => Some(other.to_string()),
                };
                if gesture != self.current_gesture {
                    self.current_gesture = gesture.clone();
                    self.publish(EngineEvent::GestureDetected(gesture));
                }
            }
            StoreDocument::Hardware => {
                let hardware: HardwareStatus =
                    parse_or_default::<HardwareDocument>(document, value).into();
                if hardware != self.hardware {
                    self.hardware = hardware;
                    self.publish(EngineEvent::HardwareChanged(hardware));
                }
            }
            StoreDocument::Calibration => {
                let session: CalibrationSession = parse_or_default(document, value);
                if session != self.calibration {
                    self.calibration = session.clone();
                    self.publish(EngineEvent::CalibrationChanged(session));
                }
            }
            StoreDocument::Rehab => {
                let session: RehabSession = parse_or_default(document, value);
                if session != self.rehab {
                    self.rehab = session.clone();
                    self.publish(EngineEvent::RehabChanged(session));
                }
            }
        }
    }

    fn on_mapping_pushed(&mut self, raw: &Value) {
        let observation = validate_and_normalize(raw);
        if !observation.corrected.is_empty() {
            warn!(
                corrected = ?observation.corrected,
                "engine: store holds unknown actions; showing defaults"
            );
        }

        let ingested = self.mappings.ingest(&observation);
        let kind = classify(
            ingested.previous.as_ref(),
            &observation,
            ClassifyContext {
                notifications_enabled: self.modes.notifications_enabled(),
                echoed: &ingested.echoed,
            },
        );
        debug!(kind = ?kind, echoed = ingested.echoed.len(), "engine: mapping pushed");

        if ingested.local_changed || ingested.previous.is_none() {
            self.publish(EngineEvent::MappingChanged(self.mappings.mapping().clone()));
        }
        self.publish_sync(ingested.sync);
        if kind.notifies() {
            self.request_dispatch();
        }
    }

    pub fn set_action(&mut self, gesture: &str, action: &str) -> Result<(), SyncError> {
        let set = self.mappings.set_action(gesture, action)?;
        let ticket = set.ticket;
        info!(
            gesture = %ticket.gesture,
            action = %ticket.action,
            seq = ticket.seq.get(),
            "engine: mapping write issued"
        );

        self.outbox.push(Effect::Write(StoreWriteRequest {
            origin: WriteOrigin::Mapping(ticket),
            path: paths::MAPPINGS,
            body: WriteBody::Partial(ticket.fields()),
        }));
        if set.local_changed {
            self.publish(EngineEvent::MappingChanged(self.mappings.mapping().clone()));
        }
        self.publish_sync(set.sync);

        if set.local_changed && self.modes.notifications_enabled() {
            self.request_dispatch();
        }
        Ok(())
    }

    pub fn force_sync(&mut self) {
        info!(mode = %self.modes.active(), "engine: manual sync requested");
        self.request_dispatch();
    }

    pub fn export_local(&mut self) -> Result<LocalExport, SyncError> {
        let payload = NotificationPayload::manual_export(
            self.clock.now_millis(),
            self.mappings.mapping().clone(),
            self.modes.active(),
            self.hardware,
        );
        let (export, status) = self.dispatcher.export_local(&payload)?;
        info!(
            file = %export.file_name,
            bytes = export.bytes.len(),
            "engine: manual export ready"
        );
        self.publish_notification(status);
        Ok(export)
    }

    pub fn enter_mode(&mut self, target: OperatingMode) {
        let request = match self.modes.request(target, self.clock.now_millis()) {
            Ok(request) => request,
            Err(err) => {
                warn!(mode = %target, "engine: cannot build session document: {err}");
                self.publish(EngineEvent::Error(err));
                ModeRequest::Switched(self.modes.switch_now(target))
            }
        };

        match request {
            ModeRequest::AlreadyActive => {
                debug!(mode = %target, "engine: mode already active");
            }
            ModeRequest::Switched(switch) => {
                info!(from = %switch.from, to = %switch.to, "engine: mode switched");
                self.reset_statuses();
                self.publish(EngineEvent::ModeChanged(switch.to));
            }
            ModeRequest::SessionRequired {
                token,
                target,
                path,
                document,
            } => {
                info!(mode = %target, path, "engine: starting session");
                self.reset_statuses();
                self.publish(EngineEvent::ModePending(target));
                self.outbox.push(Effect::Write(StoreWriteRequest {
                    origin: WriteOrigin::Session { token, target },
                    path,
                    body: WriteBody::Full(document),
                }));
            }
        }
    }

    pub fn on_write_finished(&mut self, request: &StoreWriteRequest, result: Result<(), String>) {
        match &request.origin {
            WriteOrigin::Mapping(ticket) => match result {
                Ok(()) => {
                    let sync = self.mappings.write_acknowledged(ticket);
                    self.publish_sync(sync);
                }
                Err(message) => {
                    warn!(
                        gesture = %ticket.gesture,
                        seq = ticket.seq.get(),
                        "engine: mapping write rejected: {message}"
                    );
                    let rejected = self.mappings.write_failed(ticket);
                    if rejected.local_changed {
                        self.publish(EngineEvent::MappingChanged(self.mappings.mapping().clone()));
                    }
                    self.publish_sync(rejected.sync);
                    self.publish(EngineEvent::Error(SyncError::RemoteWriteFailed {
                        path: request.path.to_string(),
                        message,
                    }));
                    // The endpoint may already hold the rejected value.
                    if rejected.local_changed && self.modes.notifications_enabled() {
                        self.request_dispatch();
                    }
                }
            },
            WriteOrigin::Session { token, target } => {
                if let Err(message) = result {
                    warn!(
                        mode = %target,
                        path = request.path,
                        "engine: session write failed: {message}"
                    );
                    self.publish(EngineEvent::Error(SyncError::RemoteWriteFailed {
                        path: request.path.to_string(),
                        message,
                    }));
                }
                match self.modes.session_written(*token) {
                    Some(switch) => {
                        info!(from = %switch.from, to = %switch.to, "engine: mode switched");
                        self.publish(EngineEvent::ModeChanged(switch.to));
                    }
                    None => debug!(mode = %target, "engine: session entry superseded"),
                }
            }
        }
    }

    pub fn on_dispatch_finished(
        &mut self,
        ticket: DispatchTicket,
        result: Result<(), DispatchError>,
    ) {
        let resolution = self.dispatcher.resolve(ticket, result.is_ok());
        if resolution.status.is_stale() {
            info!(ticket = ticket.id, "engine: discarding outcome of dispatch issued before reset");
        } else {
            match result {
                Ok(()) => info!(ticket = ticket.id, "engine: notification delivered"),
                Err(err) => {
                    warn!(ticket = ticket.id, "engine: notification failed: {err}");
                    self.publish(EngineEvent::Error(SyncError::DispatchFailed(err.to_string())));
                }
            }
        }
        self.publish_notification(resolution.status);

        if resolution.follow_up_due {
            debug!("engine: sending follow-up with latest state");
            self.request_dispatch();
        }
    }

    fn request_dispatch(&mut self) {
        match self.dispatcher.request() {
            DispatchRequest::Start { ticket, status } => {
                let payload = NotificationPayload::snapshot(
                    self.clock.now_millis(),
                    self.mappings.mapping().clone(),
                    self.modes.active(),
                    self.mappings.sync_status(),
                    self.hardware,
                );
                self.publish_notification(status);
                self.outbox.push(Effect::Dispatch { ticket, payload });
            }
            DispatchRequest::Coalesced => {
                debug!("engine: dispatch in flight; follow-up queued");
            }
        }
    }

    fn reset_statuses(&mut self) {
        let sync = self.mappings.reset_status();
        self.publish_sync(sync);
        let notification = self.dispatcher.reset();
        self.publish_notification(notification);
    }

    fn publish_sync(&mut self, transition: Transition<SyncStatus>) {
        if let Some(status) = transition.changed_to() {
            self.publish(EngineEvent::SyncStatusChanged(status));
        }
    }

    fn publish_notification(&mut self, transition: Transition<NotificationStatus>) {
        if let Some(status) = transition.changed_to() {
            self.publish(EngineEvent::NotificationStatusChanged(status));
        }
    }

    fn publish(&mut self, event: EngineEvent) {
        self.outbox.push(Effect::Publish(event));
    }
}

fn parse_or_default<T: DeserializeOwned + Default>(document: StoreDocument, value: Value) -> T {
    if value.is_null() {
        return T::default();
    }
    serde_json::from_value(value).unwrap_or_else(|err| {
        warn!(path = document.path(), "engine: unreadable document, using defaults: {err}");
        T::default()
    })
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
