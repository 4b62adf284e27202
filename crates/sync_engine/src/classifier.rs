//! Decides whether an observed mapping change should notify the endpoint.

use std::collections::{BTreeMap, BTreeSet};

use shared::domain::{Action, Gesture, GestureMapping};

use crate::{mapping_store::Observation, status::Generation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// First value ever observed.
    Initial,
    /// No-op push, echo of our own write, or a change outside mapping mode.
    Foreign,
    /// A difference that nothing issued by this process explains.
    Operator,
}

impl ChangeKind {
    pub fn notifies(self) -> bool {
        matches!(self, ChangeKind::Operator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WriteSeq(u64);

impl WriteSeq {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingWrite {
    pub seq: WriteSeq,
    pub action: Action,
    pub generation: Generation,
}

/// Writes this process issued and has not yet seen come back.
#[derive(Debug, Default)]
pub struct WriteLedger {
    next_seq: u64,
    pending: BTreeMap<Gesture, Vec<PendingWrite>>,
}

impl WriteLedger {
    pub fn record(&mut self, gesture: Gesture, action: Action, generation: Generation) -> WriteSeq {
        self.next_seq += 1;
        let seq = WriteSeq(self.next_seq);
        self.pending.entry(gesture).or_default().push(PendingWrite {
            seq,
            action,
            generation,
        });
        seq
    }

    /// Retires, per key, the writes the observed value shows the store has
    /// applied. Writes land in issue order, so only a prefix can retire: up to
    /// the oldest write equal to the observed value when that key moved, plus
    /// any following writes that would leave it where it is. A key that did
    /// not move retires only writes of its current value.
    pub fn retire_echoes(
        &mut self,
        previous: Option<&GestureMapping>,
        observed: &GestureMapping,
    ) -> Vec<(Gesture, PendingWrite)> {
        let mut retired = Vec::new();
        for (gesture, writes) in self.pending.iter_mut() {
            let current = observed.get(*gesture);
            let moved = previous.map_or(true, |previous| previous.get(*gesture) != current);
            let landed = if moved {
                writes
                    .iter()
                    .position(|write| write.action == current)
                    .map_or(0, |pos| pos + 1)
            } else {
                0
            };
            let unchanged = writes[landed..]
                .iter()
                .take_while(|write| write.action == current)
                .count();
            retired.extend(
                writes
                    .drain(..landed + unchanged)
                    .map(|write| (*gesture, write)),
            );
        }
        self.pending.retain(|_, writes| !writes.is_empty());
        retired
    }

    /// Drops one write, typically after the store rejected it.
    pub fn remove(&mut self, gesture: Gesture, seq: WriteSeq) -> Option<PendingWrite> {
        let writes = self.pending.get_mut(&gesture)?;
        let pos = writes.iter().position(|write| write.seq == seq)?;
        let removed = writes.remove(pos);
        if writes.is_empty() {
            self.pending.remove(&gesture);
        }
        Some(removed)
    }

    pub fn is_oldest(&self, gesture: Gesture, seq: WriteSeq) -> bool {
        self.pending
            .get(&gesture)
            .and_then(|writes| writes.first())
            .is_some_and(|write| write.seq == seq)
    }

    pub fn newest(&self, gesture: Gesture) -> Option<Action> {
        self.pending
            .get(&gesture)
            .and_then(|writes| writes.last())
            .map(|write| write.action)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn outstanding(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Observed mapping with the operator's newest intent laid over it.
    pub fn overlay(&self, observed: &GestureMapping) -> GestureMapping {
        let mut local = observed.clone();
        for gesture in self.pending.keys() {
            if let Some(action) = self.newest(*gesture) {
                local.set(*gesture, action);
            }
        }
        local
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext<'a> {
    pub notifications_enabled: bool,
    pub echoed: &'a BTreeSet<Gesture>,
}

pub fn classify(
    previous: Option<&GestureMapping>,
    current: &Observation,
    context: ClassifyContext<'_>,
) -> ChangeKind {
    let Some(previous) = previous else {
        return ChangeKind::Initial;
    };
    if !context.notifications_enabled {
        return ChangeKind::Foreign;
    }

    let unexplained = current
        .mapping
        .diff(previous)
        .into_iter()
        .filter(|gesture| !current.corrected.contains(gesture))
        .any(|gesture| !context.echoed.contains(&gesture));

    if unexplained {
        ChangeKind::Operator
    } else {
        ChangeKind::Foreign
    }
}

#[cfg(test)]
#[path = "tests/classifier_tests.rs"]
mod tests;
