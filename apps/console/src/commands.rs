use std::fmt::Write as _;

use shared::domain::{Gesture, OperatingMode};
use sync_engine::EngineSnapshot;

pub const HELP: &str = "\
commands:
  set <gesture> <action>   bind a gesture (e.g. `set one snapshot`)
  mode <mode>              mapping | calibration | rehabilitation
  sync                     resend the current mapping to the endpoint
  export                   save the current mapping as a JSON file
  status                   print mapping and status
  help                     show this text
  quit                     stop the engine and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Set { gesture: String, action: String },
    Mode(OperatingMode),
    Sync,
    Export,
    Status,
    Help,
    Quit,
}

/// Parses one operator line. Gesture and action names are validated by the
/// engine, not here.
pub fn parse(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err("empty command; try `help`".to_string());
    };
    let args: Vec<&str> = words.collect();

    let command = match (verb.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("set", [gesture, action]) => ConsoleCommand::Set {
            gesture: gesture.to_string(),
            action: action.to_string(),
        },
        ("set", _) => return Err("usage: set <gesture> <action>".to_string()),
        ("mode", [mode]) => ConsoleCommand::Mode(mode.parse()?),
        ("mode", _) => return Err("usage: mode <mapping|calibration|rehabilitation>".to_string()),
        ("sync", []) => ConsoleCommand::Sync,
        ("export", []) => ConsoleCommand::Export,
        ("status", []) => ConsoleCommand::Status,
        ("help" | "?", _) => ConsoleCommand::Help,
        ("quit" | "exit", []) => ConsoleCommand::Quit,
        (other, _) => return Err(format!("unknown command '{other}'; try `help`")),
    };
    Ok(command)
}

pub fn render_snapshot(snapshot: &EngineSnapshot) -> String {
    let mut out = String::new();
    let pending = snapshot
        .pending_mode
        .map(|mode| format!(" (entering {mode})"))
        .unwrap_or_default();
    let _ = writeln!(out, "mode: {}{pending}", snapshot.mode);
    let _ = writeln!(
        out,
        "store: {}  endpoint: {}",
        snapshot.sync_status.label(),
        snapshot.notification_status.label()
    );
    let _ = writeln!(
        out,
        "hardware: nav={} left={} right={}",
        snapshot.hardware.navigation_enabled,
        snapshot.hardware.primary_active,
        snapshot.hardware.secondary_active
    );
    for gesture in Gesture::ALL.iter().copied() {
        let marker = if snapshot.current_gesture.as_deref() == Some(gesture.as_str()) {
            '*'
        } else {
            ' '
        };
        let _ = writeln!(
            out,
            "{marker} {:<12} {}",
            gesture.as_str(),
            snapshot.mapping.get(gesture).label()
        );
    }
    out
}
