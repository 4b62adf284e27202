use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Declares a closed identifier vocabulary with its wire names.
macro_rules! closed_vocabulary {
    ($name:ident, $err:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = SyncError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                match raw {
                    $($wire => Ok($name::$variant),)+
                    other => Err(SyncError::$err(other.to_string())),
                }
            }
        }
    };
}

closed_vocabulary!(Gesture, InvalidGesture {
    One => "one",
    Two => "two",
    Three => "three",
    Four => "four",
    Five => "five",
    Fist => "fist",
    ThumbsUp => "thumbs_up",
    ThumbsDown => "thumbs_down",
});

closed_vocabulary!(Action, InvalidAction {
    Unmapped => "none",
    VoiceToTextToggle => "vtt_toggle",
    Snapshot => "snapshot",
    VolumeUp => "volume_up",
    VolumeDown => "volume_down",
    TabSwitch => "tab_switch",
    BrightnessUp => "brightness_up",
    BrightnessDown => "brightness_down",
    CursorNav => "cursor_nav",
    MediaPlay => "media_play",
    AslModeToggle => "asl_mode_toggle",
});

impl Gesture {
    pub fn default_action(self) -> Action {
        match self {
            Gesture::One => Action::CursorNav,
            Gesture::Two => Action::MediaPlay,
            Gesture::Three => Action::BrightnessUp,
            Gesture::Four => Action::BrightnessDown,
            Gesture::Five => Action::Snapshot,
            Gesture::Fist => Action::TabSwitch,
            Gesture::ThumbsUp => Action::VolumeUp,
            Gesture::ThumbsDown => Action::VolumeDown,
        }
    }
}

impl Action {
    /// Label shown on the binding selector.
    pub fn label(self) -> &'static str {
        match self {
            Action::Unmapped => "[ UNMAPPED ]",
            Action::VoiceToTextToggle => "VOICE_TO_TEXT_TOGGLE",
            Action::Snapshot => "SNAPSHOT",
            Action::VolumeUp => "VOLUME_UP",
            Action::VolumeDown => "VOLUME_DOWN",
            Action::TabSwitch => "TAB_SWITCH",
            Action::BrightnessUp => "BRIGHTNESS_UP",
            Action::BrightnessDown => "BRIGHTNESS_DOWN",
            Action::CursorNav => "CURSOR_NAVIGATION",
            Action::MediaPlay => "MEDIA_PLAY_PAUSE",
            Action::AslModeToggle => "ASL_MODE_TOGGLE",
        }
    }
}

/// Complete gesture to action table.
///
/// Every [`Gesture`] has exactly one entry. Equality is key/value equality,
/// independent of how the table was assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<Gesture, Action>", into = "BTreeMap<Gesture, Action>")]
pub struct GestureMapping {
    entries: BTreeMap<Gesture, Action>,
}

impl Default for GestureMapping {
    fn default() -> Self {
        Self {
            entries: Gesture::ALL
                .iter()
                .map(|gesture| (*gesture, gesture.default_action()))
                .collect(),
        }
    }
}

impl GestureMapping {
    pub fn get(&self, gesture: Gesture) -> Action {
        self.entries
            .get(&gesture)
            .copied()
            .unwrap_or_else(|| gesture.default_action())
    }

    pub fn set(&mut self, gesture: Gesture, action: Action) {
        self.entries.insert(gesture, action);
    }

    pub fn with(mut self, gesture: Gesture, action: Action) -> Self {
        self.set(gesture, action);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Gesture, Action)> + '_ {
        self.entries.iter().map(|(gesture, action)| (*gesture, *action))
    }

    /// Gestures whose action differs between `self` and `other`.
    pub fn diff(&self, other: &GestureMapping) -> Vec<Gesture> {
        Gesture::ALL
            .iter()
            .copied()
            .filter(|gesture| self.get(*gesture) != other.get(*gesture))
            .collect()
    }
}

impl TryFrom<BTreeMap<Gesture, Action>> for GestureMapping {
    type Error = String;

    fn try_from(entries: BTreeMap<Gesture, Action>) -> Result<Self, Self::Error> {
        if let Some(missing) = Gesture::ALL.iter().find(|g| !entries.contains_key(g)) {
            return Err(format!("mapping is missing gesture '{missing}'"));
        }
        Ok(Self { entries })
    }
}

impl From<GestureMapping> for BTreeMap<Gesture, Action> {
    fn from(value: GestureMapping) -> Self {
        value.entries
    }
}

/// Hardware flags reported by the wearable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareStatus {
    #[serde(rename = "mouse_nav")]
    pub navigation_enabled: bool,
    #[serde(rename = "left_active")]
    pub primary_active: bool,
    #[serde(rename = "right_active")]
    pub secondary_active: bool,
}

impl Default for HardwareStatus {
    fn default() -> Self {
        Self {
            navigation_enabled: true,
            primary_active: false,
            secondary_active: false,
        }
    }
}

/// Shape of `system/hardware` as the bridge writes it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HardwareDocument {
    #[serde(default)]
    pub mouse_nav: Option<bool>,
    #[serde(default)]
    pub left_click: Option<bool>,
    #[serde(default)]
    pub right_click: Option<bool>,
}

impl From<HardwareDocument> for HardwareStatus {
    fn from(doc: HardwareDocument) -> Self {
        let defaults = HardwareStatus::default();
        Self {
            navigation_enabled: doc.mouse_nav.unwrap_or(defaults.navigation_enabled),
            primary_active: doc.left_click.unwrap_or(defaults.primary_active),
            secondary_active: doc.right_click.unwrap_or(defaults.secondary_active),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Mapping,
    Calibration,
    Rehabilitation,
}

impl OperatingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OperatingMode::Mapping => "mapping",
            OperatingMode::Calibration => "calibration",
            OperatingMode::Rehabilitation => "rehabilitation",
        }
    }

    /// Whether entering this mode starts a fresh session document.
    pub fn owns_session(self) -> bool {
        !matches!(self, OperatingMode::Mapping)
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "mapping" => Ok(OperatingMode::Mapping),
            "calibration" => Ok(OperatingMode::Calibration),
            "rehabilitation" | "rehab" => Ok(OperatingMode::Rehabilitation),
            other => Err(format!("unknown operating mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    InFlight,
    Confirmed,
    Error,
}

impl SyncStatus {
    pub fn label(self) -> &'static str {
        match self {
            SyncStatus::Idle => "SYNC IDLE",
            SyncStatus::InFlight => "SYNC LIVE",
            SyncStatus::Confirmed => "SYNCED",
            SyncStatus::Error => "SYNC ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    #[default]
    Idle,
    Sending,
    Synced,
    Downloaded,
    Error,
}

impl NotificationStatus {
    pub fn label(self) -> &'static str {
        match self {
            NotificationStatus::Idle => "AI READY",
            NotificationStatus::Sending => "AI SENDING",
            NotificationStatus::Synced => "AI SYNCED",
            NotificationStatus::Downloaded => "JSON READY",
            NotificationStatus::Error => "AI ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Complete,
    /// Any status this build does not know; the rest of the document stays usable.
    #[serde(other)]
    Unknown,
}

pub const CALIBRATION_EXERCISES: [&str; 4] = ["up", "down", "left", "right"];

/// Document stored at `user/calibration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSession {
    #[serde(default)]
    pub status: SessionState,
    #[serde(default)]
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exercises: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Default for CalibrationSession {
    fn default() -> Self {
        Self {
            status: SessionState::Idle,
            progress: 0.0,
            exercises: Vec::new(),
            timestamp: None,
        }
    }
}

impl CalibrationSession {
    pub fn fresh(timestamp: i64) -> Self {
        Self {
            status: SessionState::Running,
            progress: 0.0,
            exercises: CALIBRATION_EXERCISES.iter().map(|e| e.to_string()).collect(),
            timestamp: Some(timestamp),
        }
    }
}

/// Document stored at `user/rehab`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RehabSession {
    #[serde(default = "first_stage")]
    pub stage: u32,
    #[serde(default)]
    pub progress: f64,
    #[serde(default = "full_noise_reduction")]
    pub noise_reduction: f64,
    #[serde(default)]
    pub exercises_completed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

fn first_stage() -> u32 {
    1
}

fn full_noise_reduction() -> f64 {
    100.0
}

impl Default for RehabSession {
    fn default() -> Self {
        Self {
            stage: first_stage(),
            progress: 0.0,
            noise_reduction: full_noise_reduction(),
            exercises_completed: 0,
            timestamp: None,
        }
    }
}

impl RehabSession {
    pub fn fresh(timestamp: i64) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }
}
