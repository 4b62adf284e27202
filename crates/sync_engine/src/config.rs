use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::notifier::{Envelope, DEFAULT_CHAT_MODEL, DEFAULT_NOTIFY_TIMEOUT};

pub const DEFAULT_CONFIG_FILE: &str = "omnicontrol.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {message}")]
    File { path: PathBuf, message: String },
    #[error("{key} is not a usable url: {message}")]
    InvalidUrl { key: &'static str, message: String },
    #[error("{key} has invalid value '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Startup configuration. Credentials have no defaults and never leave this
/// struct through `Debug`.
#[derive(Clone, PartialEq)]
pub struct Settings {
    /// Realtime store base url; `None` runs against an in-process store.
    pub store_url: Option<Url>,
    pub store_auth: Option<String>,
    /// Notification endpoint; `None` disables outbound notifications.
    pub notify_url: Option<Url>,
    pub notify_token: Option<String>,
    pub notify_envelope: Envelope,
    pub notify_timeout: Duration,
    pub export_dir: PathBuf,
    /// Write the default mapping on start when the store has none.
    pub seed_on_start: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_url: None,
            store_auth: None,
            notify_url: None,
            notify_token: None,
            notify_envelope: Envelope::Raw,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            export_dir: PathBuf::from("."),
            seed_on_start: false,
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("store_url", &self.store_url.as_ref().map(Url::as_str))
            .field("store_auth", &self.store_auth.as_ref().map(|_| "<redacted>"))
            .field("notify_url", &self.notify_url.as_ref().map(Url::as_str))
            .field("notify_token", &self.notify_token.as_ref().map(|_| "<redacted>"))
            .field("notify_envelope", &self.notify_envelope)
            .field("notify_timeout", &self.notify_timeout)
            .field("export_dir", &self.export_dir)
            .field("seed_on_start", &self.seed_on_start)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    store_url: Option<String>,
    store_auth: Option<String>,
    notify_url: Option<String>,
    notify_token: Option<String>,
    notify_envelope: Option<String>,
    notify_model: Option<String>,
    notify_timeout_ms: Option<u64>,
    export_dir: Option<PathBuf>,
    seed_on_start: Option<bool>,
}

/// Raw values gathered from the file and the environment before validation.
#[derive(Debug, Default)]
struct RawSettings {
    store_url: Option<String>,
    store_auth: Option<String>,
    notify_url: Option<String>,
    notify_token: Option<String>,
    notify_envelope: Option<String>,
    notify_model: Option<String>,
    notify_timeout_ms: Option<String>,
    export_dir: Option<String>,
    seed_on_start: Option<String>,
}

/// Defaults, then `omnicontrol.toml` (or `OMNICONTROL_CONFIG`), then
/// environment variables.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let path = std::env::var("OMNICONTROL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
    load_settings_from(&path, |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Settings, ConfigError> {
    let mut raw = RawSettings::default();

    if let Some(file) = read_file(path)? {
        raw.store_url = file.store_url;
        raw.store_auth = file.store_auth;
        raw.notify_url = file.notify_url;
        raw.notify_token = file.notify_token;
        raw.notify_envelope = file.notify_envelope;
        raw.notify_model = file.notify_model;
        raw.notify_timeout_ms = file.notify_timeout_ms.map(|ms| ms.to_string());
        raw.export_dir = file.export_dir.map(|dir| dir.to_string_lossy().into_owned());
        raw.seed_on_start = file.seed_on_start.map(|seed| seed.to_string());
    }

    let overrides: [(&str, &str, &mut Option<String>); 9] = [
        ("OMNICONTROL_STORE_URL", "APP__STORE_URL", &mut raw.store_url),
        ("OMNICONTROL_STORE_AUTH", "APP__STORE_AUTH", &mut raw.store_auth),
        ("OMNICONTROL_NOTIFY_URL", "APP__NOTIFY_URL", &mut raw.notify_url),
        ("OMNICONTROL_NOTIFY_TOKEN", "APP__NOTIFY_TOKEN", &mut raw.notify_token),
        ("OMNICONTROL_NOTIFY_ENVELOPE", "APP__NOTIFY_ENVELOPE", &mut raw.notify_envelope),
        ("OMNICONTROL_NOTIFY_MODEL", "APP__NOTIFY_MODEL", &mut raw.notify_model),
        ("OMNICONTROL_NOTIFY_TIMEOUT_MS", "APP__NOTIFY_TIMEOUT_MS", &mut raw.notify_timeout_ms),
        ("OMNICONTROL_EXPORT_DIR", "APP__EXPORT_DIR", &mut raw.export_dir),
        ("OMNICONTROL_SEED_ON_START", "APP__SEED_ON_START", &mut raw.seed_on_start),
    ];
    for (primary, alias, slot) in overrides {
        if let Some(v) = env(primary) {
            *slot = Some(v);
        }
        if let Some(v) = env(alias) {
            *slot = Some(v);
        }
    }

    validate(raw)
}

fn read_file(path: &Path) -> Result<Option<FileSettings>, ConfigError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(ConfigError::File {
                path: path.to_path_buf(),
                message: err.to_string(),
            })
        }
    };
    toml::from_str(&raw).map(Some).map_err(|err| ConfigError::File {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn validate(raw: RawSettings) -> Result<Settings, ConfigError> {
    let defaults = Settings::default();

    let notify_envelope = match non_empty(raw.notify_envelope).as_deref() {
        None | Some("raw") => Envelope::Raw,
        Some("chat_completion") => Envelope::ChatCompletion {
            model: non_empty(raw.notify_model).unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
        },
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                key: "notify_envelope",
                value: other.to_string(),
            })
        }
    };

    let notify_timeout = match non_empty(raw.notify_timeout_ms) {
        None => defaults.notify_timeout,
        Some(v) => match v.parse::<u64>() {
            Ok(ms) if ms > 0 => Duration::from_millis(ms),
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "notify_timeout_ms",
                    value: v,
                })
            }
        },
    };

    let seed_on_start = match non_empty(raw.seed_on_start) {
        None => defaults.seed_on_start,
        Some(v) => v.parse::<bool>().map_err(|_| ConfigError::InvalidValue {
            key: "seed_on_start",
            value: v.clone(),
        })?,
    };

    Ok(Settings {
        store_url: parse_url("store_url", raw.store_url)?,
        store_auth: non_empty(raw.store_auth),
        notify_url: parse_url("notify_url", raw.notify_url)?,
        notify_token: non_empty(raw.notify_token),
        notify_envelope,
        notify_timeout,
        export_dir: non_empty(raw.export_dir)
            .map(PathBuf::from)
            .unwrap_or(defaults.export_dir),
        seed_on_start,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_url(key: &'static str, value: Option<String>) -> Result<Option<Url>, ConfigError> {
    let Some(value) = non_empty(value) else {
        return Ok(None);
    };
    let url = Url::parse(&value).map_err(|err| ConfigError::InvalidUrl {
        key,
        message: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            key,
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(Some(url))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
