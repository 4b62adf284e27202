use serde_json::Value;
use shared::{
    domain::{CalibrationSession, OperatingMode, RehabSession},
    error::SyncError,
    protocol::paths,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEntry {
    pub token: SessionToken,
    pub target: OperatingMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSwitch {
    pub from: OperatingMode,
    pub to: OperatingMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModeRequest {
    AlreadyActive,
    Switched(ModeSwitch),
    /// The session document has to be written before the switch happens.
    SessionRequired {
        token: SessionToken,
        target: OperatingMode,
        path: &'static str,
        document: Value,
    },
}

/// Fresh session document for a mode that owns one.
pub fn session_document(
    mode: OperatingMode,
    timestamp: i64,
) -> Result<Option<(&'static str, Value)>, SyncError> {
    let document = match mode {
        OperatingMode::Mapping => return Ok(None),
        OperatingMode::Calibration => (
            paths::CALIBRATION,
            serde_json::to_value(CalibrationSession::fresh(timestamp))?,
        ),
        OperatingMode::Rehabilitation => (
            paths::REHAB,
            serde_json::to_value(RehabSession::fresh(timestamp))?,
        ),
    };
    Ok(Some(document))
}

#[derive(Debug, Default)]
pub struct ModeController {
    active: OperatingMode,
    pending: Option<PendingEntry>,
    next_token: u64,
}

impl ModeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> OperatingMode {
        self.active
    }

    pub fn pending(&self) -> Option<PendingEntry> {
        self.pending
    }

    /// Mapping-mode notifications run only while mapping mode is settled.
    pub fn notifications_enabled(&self) -> bool {
        self.active == OperatingMode::Mapping && self.pending.is_none()
    }

    pub fn request(&mut self, target: OperatingMode, now: i64) -> Result<ModeRequest, SyncError> {
        match session_document(target, now)? {
            None => {
                if self.active == target && self.pending.is_none() {
                    return Ok(ModeRequest::AlreadyActive);
                }
                Ok(ModeRequest::Switched(self.switch_now(target)))
            }
            Some((path, document)) => {
                self.next_token += 1;
                let token = SessionToken(self.next_token);
                self.pending = Some(PendingEntry { token, target });
                Ok(ModeRequest::SessionRequired {
                    token,
                    target,
                    path,
                    document,
                })
            }
        }
    }

    /// Completes a pending entry. Superseded tokens are ignored.
    pub fn session_written(&mut self, token: SessionToken) -> Option<ModeSwitch> {
        let pending = self.pending.filter(|pending| pending.token == token)?;
        Some(self.switch_now(pending.target))
    }

    pub fn switch_now(&mut self, target: OperatingMode) -> ModeSwitch {
        self.pending = None;
        let from = std::mem::replace(&mut self.active, target);
        ModeSwitch { from, to: target }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entering_mapping_is_immediate() {
        let mut modes = ModeController::new();
        assert_eq!(
            modes.request(OperatingMode::Mapping, 1).expect("request"),
            ModeRequest::AlreadyActive
        );

        modes.switch_now(OperatingMode::Rehabilitation);
        assert_eq!(
            modes.request(OperatingMode::Mapping, 2).expect("request"),
            ModeRequest::Switched(ModeSwitch {
                from: OperatingMode::Rehabilitation,
                to: OperatingMode::Mapping
            })
        );
        assert!(modes.notifications_enabled());
    }

    #[test]
    fn session_mode_waits_for_its_document() {
        let mut modes = ModeController::new();
        let ModeRequest::SessionRequired {
            token,
            path,
            document,
            ..
        } = modes
            .request(OperatingMode::Calibration, 1_700_000_000_000)
            .expect("request")
        else {
            panic!("calibration needs a session document");
        };

        assert_eq!(path, "user/calibration");
        assert_eq!(document["status"], "running");
        assert_eq!(document["exercises"][3], "right");
        assert_eq!(document["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(modes.active(), OperatingMode::Mapping);
        assert!(!modes.notifications_enabled());

        let switch = modes.session_written(token).expect("pending entry");
        assert_eq!(switch.to, OperatingMode::Calibration);
        assert_eq!(modes.active(), OperatingMode::Calibration);
        assert!(modes.pending().is_none());
    }

    #[test]
    fn superseded_session_write_is_ignored() {
        let mut modes = ModeController::new();
        let ModeRequest::SessionRequired { token: first, .. } = modes
            .request(OperatingMode::Rehabilitation, 1)
            .expect("request")
        else {
            panic!("rehab needs a session document");
        };
        modes.request(OperatingMode::Mapping, 2).expect("request");

        assert!(modes.session_written(first).is_none());
        assert_eq!(modes.active(), OperatingMode::Mapping);
    }

    #[test]
    fn rehab_document_has_camel_case_fields() {
        let (path, document) = session_document(OperatingMode::Rehabilitation, 5)
            .expect("serialize")
            .expect("rehab owns a session");
        assert_eq!(path, "user/rehab");
        assert_eq!(document["stage"], 1);
        assert_eq!(document["noiseReduction"], 100.0);
        assert_eq!(document["exercisesCompleted"], 0);
    }
}
