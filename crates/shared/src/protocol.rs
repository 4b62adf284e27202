use serde::{Deserialize, Serialize};

use crate::domain::{GestureMapping, HardwareStatus, OperatingMode, SyncStatus};

pub const PAYLOAD_VERSION: &str = "1.0";

/// Logical document paths in the replicated store.
pub mod paths {
    pub const MAPPINGS: &str = "settings/mappings";
    pub const CURRENT_GESTURE: &str = "system/current_gesture";
    pub const HARDWARE: &str = "system/hardware";
    pub const CALIBRATION: &str = "user/calibration";
    pub const REHAB: &str = "user/rehab";
}

/// Sync status as recorded inside a payload.
///
/// `ManualDownload` only appears in locally exported files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSyncStatus {
    Idle,
    InFlight,
    Confirmed,
    Error,
    ManualDownload,
}

impl From<SyncStatus> for SnapshotSyncStatus {
    fn from(value: SyncStatus) -> Self {
        match value {
            SyncStatus::Idle => SnapshotSyncStatus::Idle,
            SyncStatus::InFlight => SnapshotSyncStatus::InFlight,
            SyncStatus::Confirmed => SnapshotSyncStatus::Confirmed,
            SyncStatus::Error => SnapshotSyncStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMetadata {
    pub mode: OperatingMode,
    pub sync_status: SnapshotSyncStatus,
    pub hw_status: HardwareStatus,
}

/// Versioned configuration snapshot sent to the notification endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    timestamp: i64,
    version: String,
    mappings: GestureMapping,
    active: bool,
    metadata: PayloadMetadata,
}

impl NotificationPayload {
    pub fn snapshot(
        timestamp: i64,
        mappings: GestureMapping,
        mode: OperatingMode,
        sync_status: SyncStatus,
        hw_status: HardwareStatus,
    ) -> Self {
        Self::build(timestamp, mappings, mode, sync_status.into(), hw_status)
    }

    pub fn manual_export(
        timestamp: i64,
        mappings: GestureMapping,
        mode: OperatingMode,
        hw_status: HardwareStatus,
    ) -> Self {
        Self::build(
            timestamp,
            mappings,
            mode,
            SnapshotSyncStatus::ManualDownload,
            hw_status,
        )
    }

    fn build(
        timestamp: i64,
        mappings: GestureMapping,
        mode: OperatingMode,
        sync_status: SnapshotSyncStatus,
        hw_status: HardwareStatus,
    ) -> Self {
        Self {
            timestamp,
            version: PAYLOAD_VERSION.to_string(),
            mappings,
            active: true,
            metadata: PayloadMetadata {
                mode,
                sync_status,
                hw_status,
            },
        }
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn mappings(&self) -> &GestureMapping {
        &self.mappings
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn metadata(&self) -> &PayloadMetadata {
        &self.metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Chat-completions request wrapping a payload for LLM-backed endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl ChatCompletionRequest {
    pub fn for_payload(
        model: impl Into<String>,
        payload: &NotificationPayload,
    ) -> serde_json::Result<Self> {
        let body = serde_json::to_string_pretty(payload)?;
        Ok(Self {
            model: model.into(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: format!("GESTURE MAPPING UPDATE:\n\n{body}"),
            }],
            stream: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, Gesture};

    #[test]
    fn payload_wire_shape_matches_endpoint_contract() {
        let payload = NotificationPayload::snapshot(
            1_700_000_000_000,
            GestureMapping::default().with(Gesture::One, Action::Snapshot),
            OperatingMode::Mapping,
            SyncStatus::InFlight,
            HardwareStatus::default(),
        );
        let value = serde_json::to_value(&payload).expect("serialize");

        assert_eq!(value["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(value["version"], "1.0");
        assert_eq!(value["active"], true);
        assert_eq!(value["mappings"]["one"], "snapshot");
        assert_eq!(value["metadata"]["mode"], "mapping");
        assert_eq!(value["metadata"]["sync_status"], "in_flight");
        assert_eq!(value["metadata"]["hw_status"]["mouse_nav"], true);
        assert_eq!(value["metadata"]["hw_status"]["left_active"], false);
        assert_eq!(value["metadata"]["hw_status"]["right_active"], false);
    }

    #[test]
    fn manual_export_marks_sync_status() {
        let payload = NotificationPayload::manual_export(
            1,
            GestureMapping::default(),
            OperatingMode::Calibration,
            HardwareStatus::default(),
        );
        let value = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(value["metadata"]["sync_status"], "manual_download");
        assert_eq!(value["metadata"]["mode"], "calibration");
    }

    #[test]
    fn chat_envelope_embeds_pretty_payload() {
        let payload = NotificationPayload::snapshot(
            5,
            GestureMapping::default(),
            OperatingMode::Mapping,
            SyncStatus::Idle,
            HardwareStatus::default(),
        );
        let request = ChatCompletionRequest::for_payload("grok-beta", &payload).expect("wrap");
        assert_eq!(request.messages.len(), 1);
        assert!(request.messages[0]
            .content
            .starts_with("GESTURE MAPPING UPDATE:\n\n{"));
        assert!(!request.stream);
    }
}
