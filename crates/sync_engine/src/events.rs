use serde::Serialize;
use shared::{
    domain::{
        CalibrationSession, GestureMapping, HardwareStatus, NotificationStatus, OperatingMode,
        RehabSession, SyncStatus,
    },
    error::SyncError,
    protocol::paths,
};

/// Documents the engine keeps a live subscription on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreDocument {
    Mappings,
    CurrentGesture,
    Hardware,
    Calibration,
    Rehab,
}

impl StoreDocument {
    pub const ALL: [StoreDocument; 5] = [
        StoreDocument::Mappings,
        StoreDocument::CurrentGesture,
        StoreDocument::Hardware,
        StoreDocument::Calibration,
        StoreDocument::Rehab,
    ];

    pub fn path(self) -> &'static str {
        match self {
            StoreDocument::Mappings => paths::MAPPINGS,
            StoreDocument::CurrentGesture => paths::CURRENT_GESTURE,
            StoreDocument::Hardware => paths::HARDWARE,
            StoreDocument::Calibration => paths::CALIBRATION,
            StoreDocument::Rehab => paths::REHAB,
        }
    }
}

/// Everything the display layer needs to redraw.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    MappingChanged(GestureMapping),
    GestureDetected(Option<String>),
    HardwareChanged(HardwareStatus),
    CalibrationChanged(CalibrationSession),
    RehabChanged(RehabSession),
    ModePending(OperatingMode),
    ModeChanged(OperatingMode),
    SyncStatusChanged(SyncStatus),
    NotificationStatusChanged(NotificationStatus),
    Error(SyncError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub mapping: GestureMapping,
    pub hardware: HardwareStatus,
    pub current_gesture: Option<String>,
    pub mode: OperatingMode,
    pub pending_mode: Option<OperatingMode>,
    pub sync_status: SyncStatus,
    pub notification_status: NotificationStatus,
    pub calibration: CalibrationSession,
    pub rehab: RehabSession,
    pub outstanding_writes: usize,
    pub dispatch_in_flight: bool,
}
