//! Local copy of the remote gesture mapping and the store-sync status.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use shared::{
    domain::{Action, Gesture, GestureMapping, SyncStatus},
    error::SyncError,
};

use crate::{
    classifier::{PendingWrite, WriteLedger, WriteSeq},
    status::{Generation, SyncStatusMachine, Transition},
};

/// A pushed mapping after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub mapping: GestureMapping,
    /// Gestures whose raw value was present but not a known action.
    pub corrected: BTreeSet<Gesture>,
}

/// Builds a complete mapping from whatever the store pushed.
///
/// Known actions are kept, invalid or missing ones fall back to the gesture's
/// default, unknown gesture keys are ignored and non-object input counts as
/// empty.
pub fn validate_and_normalize(raw: &Value) -> Observation {
    let fields = raw.as_object();
    let mut mapping = GestureMapping::default();
    let mut corrected = BTreeSet::new();

    for gesture in Gesture::ALL.iter().copied() {
        let Some(value) = fields.and_then(|fields| fields.get(gesture.as_str())) else {
            continue;
        };
        match value.as_str().map(str::parse::<Action>) {
            Some(Ok(action)) => mapping.set(gesture, action),
            _ => {
                corrected.insert(gesture);
            }
        }
    }

    Observation { mapping, corrected }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteTicket {
    pub seq: WriteSeq,
    pub gesture: Gesture,
    pub action: Action,
    pub generation: Generation,
}

impl WriteTicket {
    /// Partial-write body touching only this ticket's key.
    pub fn fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(
            self.gesture.as_str().to_string(),
            Value::String(self.action.as_str().to_string()),
        );
        fields
    }
}

#[derive(Debug)]
pub struct ActionSet {
    pub ticket: WriteTicket,
    pub local_changed: bool,
    pub sync: Transition<SyncStatus>,
}

#[derive(Debug)]
pub struct Ingested {
    pub previous: Option<GestureMapping>,
    pub echoed: BTreeSet<Gesture>,
    pub local_changed: bool,
    pub sync: Transition<SyncStatus>,
}

#[derive(Debug)]
pub struct Rejected {
    pub local_changed: bool,
    pub sync: Transition<SyncStatus>,
}

#[derive(Debug, Default)]
pub struct MappingStore {
    observed: Option<GestureMapping>,
    ledger: WriteLedger,
    local: GestureMapping,
    sync: SyncStatusMachine,
    last_rejected: Option<WriteSeq>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// What the display shows: observed value plus outstanding intent.
    pub fn mapping(&self) -> &GestureMapping {
        &self.local
    }

    pub fn observed(&self) -> Option<&GestureMapping> {
        self.observed.as_ref()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    pub fn outstanding_writes(&self) -> usize {
        self.ledger.outstanding()
    }

    pub fn set_action(&mut self, gesture: &str, action: &str) -> Result<ActionSet, SyncError> {
        let gesture: Gesture = gesture.parse()?;
        let action: Action = action.parse()?;

        let generation = self.sync.generation();
        let seq = self.ledger.record(gesture, action, generation);
        let local_changed = self.local.get(gesture) != action;
        self.local.set(gesture, action);

        Ok(ActionSet {
            ticket: WriteTicket {
                seq,
                gesture,
                action,
                generation,
            },
            local_changed,
            sync: self.sync.write_issued(),
        })
    }

    pub fn ingest(&mut self, observation: &Observation) -> Ingested {
        let retired = self
            .ledger
            .retire_echoes(self.observed.as_ref(), &observation.mapping);
        let echoed = retired.iter().map(|(gesture, _)| *gesture).collect();
        let previous = self.observed.replace(observation.mapping.clone());
        let sync = self.settle(retired.iter().map(|(_, write)| *write));
        let local_changed = self.refresh_local();

        Ingested {
            previous,
            echoed,
            local_changed,
            sync,
        }
    }

    /// Store accepted a write. Confirms it directly when the observed value
    /// already matches, since the store may not push an unchanged value.
    pub fn write_acknowledged(&mut self, ticket: &WriteTicket) -> Transition<SyncStatus> {
        let already_observed = self
            .observed
            .as_ref()
            .is_some_and(|observed| observed.get(ticket.gesture) == ticket.action);
        if !already_observed || !self.ledger.is_oldest(ticket.gesture, ticket.seq) {
            return Transition::Unchanged;
        }
        match self.ledger.remove(ticket.gesture, ticket.seq) {
            Some(write) => self.settle(std::iter::once(write)),
            None => Transition::Unchanged,
        }
    }

    pub fn write_failed(&mut self, ticket: &WriteTicket) -> Rejected {
        self.ledger.remove(ticket.gesture, ticket.seq);
        self.last_rejected = self.last_rejected.max(Some(ticket.seq));
        let sync = self.sync.write_rejected(ticket.generation);
        Rejected {
            local_changed: self.refresh_local(),
            sync,
        }
    }

    pub fn reset_status(&mut self) -> Transition<SyncStatus> {
        self.sync.reset()
    }

    fn settle(&mut self, retired: impl Iterator<Item = PendingWrite>) -> Transition<SyncStatus> {
        let Some(newest) = retired.max_by_key(|write| write.seq) else {
            return Transition::Unchanged;
        };
        if !self.ledger.is_empty() {
            return Transition::Unchanged;
        }
        if self.last_rejected.is_some_and(|rejected| rejected > newest.seq) {
            return Transition::Unchanged;
        }
        self.sync.writes_confirmed(newest.generation)
    }

    fn refresh_local(&mut self) -> bool {
        let base = self.observed.clone().unwrap_or_default();
        let local = self.ledger.overlay(&base);
        let changed = local != self.local;
        self.local = local;
        changed
    }
}

#[cfg(test)]
#[path = "tests/mapping_store_tests.rs"]
mod tests;
