use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

fn temp_config(contents: &str) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir = env::temp_dir().join(format!("omnicontrol_config_test_{suffix}"));
    fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join(DEFAULT_CONFIG_FILE);
    fs::write(&path, contents).expect("write config");
    path
}

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_without_file_or_env() {
    let settings = load_settings_from(Path::new("/nonexistent/omnicontrol.toml"), env_from(&[]))
        .expect("defaults");
    assert_eq!(settings, Settings::default());
    assert!(settings.store_auth.is_none());
    assert!(settings.notify_token.is_none());
}

#[test]
fn file_values_are_read() {
    let path = temp_config(
        r#"
store_url = "https://omni-default-rtdb.example.test"
notify_url = "https://notify.example.test/v1/chat/completions"
notify_envelope = "chat_completion"
notify_model = "local-model"
notify_timeout_ms = 2500
export_dir = "/tmp/exports"
seed_on_start = true
"#,
    );

    let settings = load_settings_from(&path, env_from(&[])).expect("settings");
    assert_eq!(
        settings.store_url.as_ref().map(Url::as_str),
        Some("https://omni-default-rtdb.example.test/")
    );
    assert_eq!(
        settings.notify_envelope,
        Envelope::ChatCompletion {
            model: "local-model".into()
        }
    );
    assert_eq!(settings.notify_timeout, Duration::from_millis(2500));
    assert_eq!(settings.export_dir, PathBuf::from("/tmp/exports"));
    assert!(settings.seed_on_start);

    fs::remove_dir_all(path.parent().expect("parent")).expect("cleanup");
}

#[test]
fn environment_overrides_file_and_alias_wins() {
    let path = temp_config("notify_url = \"https://from-file.example.test/hook\"\n");
    let settings = load_settings_from(
        &path,
        env_from(&[
            ("OMNICONTROL_NOTIFY_URL", "https://from-env.example.test/hook"),
            ("OMNICONTROL_NOTIFY_TOKEN", "primary-token"),
            ("APP__NOTIFY_TOKEN", "alias-token"),
            ("OMNICONTROL_STORE_AUTH", "db-secret"),
        ]),
    )
    .expect("settings");

    assert_eq!(
        settings.notify_url.as_ref().map(Url::as_str),
        Some("https://from-env.example.test/hook")
    );
    assert_eq!(settings.notify_token.as_deref(), Some("alias-token"));
    assert_eq!(settings.store_auth.as_deref(), Some("db-secret"));

    fs::remove_dir_all(path.parent().expect("parent")).expect("cleanup");
}

#[test]
fn blank_credentials_count_as_unset() {
    let settings = load_settings_from(
        Path::new("/nonexistent/omnicontrol.toml"),
        env_from(&[("OMNICONTROL_NOTIFY_TOKEN", "  "), ("OMNICONTROL_STORE_URL", "")]),
    )
    .expect("settings");
    assert!(settings.notify_token.is_none());
    assert!(settings.store_url.is_none());
}

#[test]
fn invalid_values_are_rejected() {
    let missing = Path::new("/nonexistent/omnicontrol.toml");

    let err = load_settings_from(missing, env_from(&[("OMNICONTROL_NOTIFY_URL", "not a url")]))
        .expect_err("bad url");
    assert!(matches!(err, ConfigError::InvalidUrl { key: "notify_url", .. }));

    let err = load_settings_from(
        missing,
        env_from(&[("OMNICONTROL_STORE_URL", "ftp://store.example.test")]),
    )
    .expect_err("bad scheme");
    assert!(matches!(err, ConfigError::InvalidUrl { key: "store_url", .. }));

    let err = load_settings_from(missing, env_from(&[("OMNICONTROL_NOTIFY_ENVELOPE", "soap")]))
        .expect_err("bad envelope");
    assert!(matches!(err, ConfigError::InvalidValue { key: "notify_envelope", .. }));

    let err = load_settings_from(missing, env_from(&[("APP__NOTIFY_TIMEOUT_MS", "0")]))
        .expect_err("bad timeout");
    assert!(matches!(err, ConfigError::InvalidValue { key: "notify_timeout_ms", .. }));
}

#[test]
fn malformed_file_is_an_error() {
    let path = temp_config("store_url = [unterminated");
    let err = load_settings_from(&path, env_from(&[])).expect_err("malformed");
    assert!(matches!(err, ConfigError::File { .. }));
    fs::remove_dir_all(path.parent().expect("parent")).expect("cleanup");
}

#[test]
fn debug_output_redacts_credentials() {
    let settings = Settings {
        store_auth: Some("db-secret".into()),
        notify_token: Some("notify-secret".into()),
        ..Settings::default()
    };
    let rendered = format!("{settings:?}");
    assert!(!rendered.contains("db-secret"));
    assert!(!rendered.contains("notify-secret"));
    assert!(rendered.contains("<redacted>"));
}
