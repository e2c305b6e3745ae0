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
    let dir = env::temp_dir().join(format!("execution_tracker_config_test_{suffix}"));
    fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("tracker.toml");
    fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn defaults_match_tracker_defaults() {
    let settings = Settings::default();
    assert_eq!(settings.tracker_options(), TrackerOptions::default());
}

#[test]
fn file_values_override_defaults() {
    let path = temp_config(
        r#"
ws_base = "wss://crm.example.com"
reconnect_max_attempts = 3
keepalive_interval_ms = 15000
"#,
    );

    let settings = load_settings(Some(&path)).expect("settings");
    assert_eq!(settings.ws_base, "wss://crm.example.com");
    assert_eq!(settings.reconnect_max_attempts, 3);
    assert_eq!(settings.keepalive_interval_ms, 15_000);
    assert_eq!(settings.api_base, Settings::default().api_base);

    fs::remove_dir_all(path.parent().expect("parent")).expect("cleanup");
}

#[test]
fn prefixed_env_keys_win_over_bare_keys() {
    let vars: HashMap<&str, &str> = [
        ("WS_BASE", "ws://bare:1"),
        ("APP__WS_BASE", "ws://prefixed:2"),
        ("API_BASE", "http://api.bare"),
        ("APP__RECONNECT_MAX_DELAY_MS", "8000"),
    ]
    .into_iter()
    .collect();

    let mut settings = Settings::default();
    settings.apply_env(|key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(settings.ws_base, "ws://prefixed:2");
    assert_eq!(settings.api_base, "http://api.bare");
    assert_eq!(settings.reconnect_max_delay_ms, 8_000);
}

#[test]
fn unparsable_numeric_override_is_ignored() {
    let mut settings = Settings::default();
    settings.apply_env(|key| (key == "APP__RECONNECT_MAX_ATTEMPTS").then(|| "many".to_string()));
    assert_eq!(settings.reconnect_max_attempts, 10);
}

#[test]
fn missing_explicit_config_file_is_an_error() {
    let path = env::temp_dir().join("execution_tracker_config_test_missing/tracker.toml");
    assert!(load_settings(Some(&path)).is_err());
}

#[test]
fn invalid_file_is_reported() {
    let path = temp_config("reconnect_max_attempts = \"ten\"");
    let err = load_settings(Some(&path)).expect_err("type mismatch");
    assert!(err.to_string().contains("failed to parse config file"));
    fs::remove_dir_all(path.parent().expect("parent")).expect("cleanup");
}

#[test]
fn validation_rejects_inverted_delays() {
    let settings = Settings {
        reconnect_base_delay_ms: 5_000,
        reconnect_max_delay_ms: 1_000,
        ..Settings::default()
    };
    assert!(settings.validate().is_err());

    let settings = Settings {
        keepalive_interval_ms: 0,
        ..Settings::default()
    };
    assert!(settings.validate().is_err());
}
