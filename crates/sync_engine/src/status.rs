//! Store-sync and notification status machines.
//!
//! Both machines move only on operation outcomes. Every reset starts a new
//! [`Generation`]; outcomes of operations issued in an earlier generation are
//! reported as [`Transition::Stale`] and leave the status alone.

use shared::domain::{NotificationStatus, SyncStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S> {
    Changed { from: S, to: S },
    Unchanged,
    Stale,
}

impl<S: Copy> Transition<S> {
    pub fn changed_to(&self) -> Option<S> {
        match self {
            Transition::Changed { to, .. } => Some(*to),
            Transition::Unchanged | Transition::Stale => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Transition::Stale)
    }
}

fn move_to<S: Copy + PartialEq>(current: &mut S, to: S) -> Transition<S> {
    let from = *current;
    if from == to {
        return Transition::Unchanged;
    }
    *current = to;
    Transition::Changed { from, to }
}

#[derive(Debug, Default)]
pub struct SyncStatusMachine {
    status: SyncStatus,
    generation: Generation,
}

impl SyncStatusMachine {
    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn write_issued(&mut self) -> Transition<SyncStatus> {
        move_to(&mut self.status, SyncStatus::InFlight)
    }

    pub fn writes_confirmed(&mut self, issued_in: Generation) -> Transition<SyncStatus> {
        if issued_in != self.generation {
            return Transition::Stale;
        }
        move_to(&mut self.status, SyncStatus::Confirmed)
    }

    pub fn write_rejected(&mut self, issued_in: Generation) -> Transition<SyncStatus> {
        if issued_in != self.generation {
            return Transition::Stale;
        }
        move_to(&mut self.status, SyncStatus::Error)
    }

    pub fn reset(&mut self) -> Transition<SyncStatus> {
        self.generation = self.generation.next();
        move_to(&mut self.status, SyncStatus::Idle)
    }
}

#[derive(Debug, Default)]
pub struct NotificationStatusMachine {
    status: NotificationStatus,
    generation: Generation,
}

impl NotificationStatusMachine {
    pub fn status(&self) -> NotificationStatus {
        self.status
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn dispatch_issued(&mut self) -> Transition<NotificationStatus> {
        move_to(&mut self.status, NotificationStatus::Sending)
    }

    pub fn dispatch_resolved(
        &mut self,
        issued_in: Generation,
        succeeded: bool,
    ) -> Transition<NotificationStatus> {
        if issued_in != self.generation {
            return Transition::Stale;
        }
        let to = if succeeded {
            NotificationStatus::Synced
        } else {
            NotificationStatus::Error
        };
        move_to(&mut self.status, to)
    }

    pub fn exported(&mut self) -> Transition<NotificationStatus> {
        move_to(&mut self.status, NotificationStatus::Downloaded)
    }

    pub fn reset(&mut self) -> Transition<NotificationStatus> {
        self.generation = self.generation.next();
        move_to(&mut self.status, NotificationStatus::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_machine_follows_write_outcomes() {
        let mut machine = SyncStatusMachine::default();
        let generation = machine.generation();

        assert_eq!(
            machine.write_issued(),
            Transition::Changed {
                from: SyncStatus::Idle,
                to: SyncStatus::InFlight
            }
        );
        assert_eq!(machine.write_issued(), Transition::Unchanged);
        assert_eq!(
            machine.writes_confirmed(generation).changed_to(),
            Some(SyncStatus::Confirmed)
        );
        machine.write_issued();
        assert_eq!(
            machine.write_rejected(generation).changed_to(),
            Some(SyncStatus::Error)
        );
    }

    #[test]
    fn outcomes_from_before_a_reset_are_stale() {
        let mut sync = SyncStatusMachine::default();
        let before = sync.generation();
        sync.write_issued();
        sync.reset();
        assert!(sync.write_rejected(before).is_stale());
        assert_eq!(sync.status(), SyncStatus::Idle);

        let mut notify = NotificationStatusMachine::default();
        let before = notify.generation();
        notify.dispatch_issued();
        assert_eq!(notify.reset().changed_to(), Some(NotificationStatus::Idle));
        assert!(notify.dispatch_resolved(before, true).is_stale());
        assert_eq!(notify.status(), NotificationStatus::Idle);
    }

    #[test]
    fn export_is_reachable_from_idle() {
        let mut notify = NotificationStatusMachine::default();
        assert_eq!(
            notify.exported(),
            Transition::Changed {
                from: NotificationStatus::Idle,
                to: NotificationStatus::Downloaded
            }
        );
    }
}
