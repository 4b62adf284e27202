//! Notification dispatch bookkeeping: one request in flight, later changes
//! folded into a single follow-up.

use shared::{domain::NotificationStatus, error::SyncError, protocol::NotificationPayload};
use tracing::warn;

use crate::status::{Generation, NotificationStatusMachine, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTicket {
    pub id: u64,
    pub generation: Generation,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DispatchRequest {
    Start {
        ticket: DispatchTicket,
        status: Transition<NotificationStatus>,
    },
    Coalesced,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Resolution {
    pub status: Transition<NotificationStatus>,
    pub follow_up_due: bool,
}

/// Bytes of a manual export and the file name to save them under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalExport {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl LocalExport {
    pub fn from_payload(payload: &NotificationPayload) -> Result<Self, SyncError> {
        let bytes = serde_json::to_vec_pretty(payload)?;
        Ok(Self {
            file_name: format!("omnicontrol-gestures-{}.json", payload.timestamp()),
            bytes,
        })
    }
}

#[derive(Debug, Default)]
pub struct NotificationDispatcher {
    status: NotificationStatusMachine,
    in_flight: Option<DispatchTicket>,
    follow_up: bool,
    next_id: u64,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> NotificationStatus {
        self.status.status()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn follow_up_pending(&self) -> bool {
        self.follow_up
    }

    /// Starts a dispatch, or marks a follow-up when one is already running.
    pub fn request(&mut self) -> DispatchRequest {
        if self.in_flight.is_some() {
            self.follow_up = true;
            return DispatchRequest::Coalesced;
        }
        self.next_id += 1;
        let ticket = DispatchTicket {
            id: self.next_id,
            generation: self.status.generation(),
        };
        self.in_flight = Some(ticket);
        DispatchRequest::Start {
            ticket,
            status: self.status.dispatch_issued(),
        }
    }

    pub fn resolve(&mut self, ticket: DispatchTicket, succeeded: bool) -> Resolution {
        if self.in_flight != Some(ticket) {
            warn!(ticket = ticket.id, "dispatcher: resolution for unknown dispatch");
            return Resolution {
                status: Transition::Unchanged,
                follow_up_due: false,
            };
        }
        self.in_flight = None;
        Resolution {
            status: self.status.dispatch_resolved(ticket.generation, succeeded),
            follow_up_due: std::mem::take(&mut self.follow_up),
        }
    }

    pub fn export_local(
        &mut self,
        payload: &NotificationPayload,
    ) -> Result<(LocalExport, Transition<NotificationStatus>), SyncError> {
        let export = LocalExport::from_payload(payload)?;
        Ok((export, self.status.exported()))
    }

    /// Back to idle. A running dispatch keeps its slot but its outcome
    /// becomes stale; a pending follow-up is dropped.
    pub fn reset(&mut self) -> Transition<NotificationStatus> {
        self.follow_up = false;
        self.status.reset()
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
