use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use execution_tracker::{ReconnectPolicy, TrackerOptions};
use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "tracker.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub ws_base: String,
    pub api_base: String,
    pub keepalive_interval_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ws_base: "ws://127.0.0.1:8000".into(),
            api_base: "http://127.0.0.1:8000/api".into(),
            keepalive_interval_ms: 30_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 16_000,
            reconnect_max_attempts: 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    ws_base: Option<String>,
    api_base: Option<String>,
    keepalive_interval_ms: Option<u64>,
    reconnect_base_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    reconnect_max_attempts: Option<u32>,
}

impl Settings {
    pub fn tracker_options(&self) -> TrackerOptions {
        TrackerOptions {
            keepalive_interval: Duration::from_millis(self.keepalive_interval_ms),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
                max_attempts: self.reconnect_max_attempts,
            },
        }
    }

    fn apply_file(&mut self, file_cfg: FileSettings) {
        if let Some(v) = file_cfg.ws_base {
            self.ws_base = v;
        }
        if let Some(v) = file_cfg.api_base {
            self.api_base = v;
        }
        if let Some(v) = file_cfg.keepalive_interval_ms {
            self.keepalive_interval_ms = v;
        }
        if let Some(v) = file_cfg.reconnect_base_delay_ms {
            self.reconnect_base_delay_ms = v;
        }
        if let Some(v) = file_cfg.reconnect_max_delay_ms {
            self.reconnect_max_delay_ms = v;
        }
        if let Some(v) = file_cfg.reconnect_max_attempts {
            self.reconnect_max_attempts = v;
        }
    }

    /// `APP__*` keys take precedence over the bare names.
    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WS_BASE") {
            self.ws_base = v;
        }
        if let Some(v) = lookup("APP__WS_BASE") {
            self.ws_base = v;
        }

        if let Some(v) = lookup("API_BASE") {
            self.api_base = v;
        }
        if let Some(v) = lookup("APP__API_BASE") {
            self.api_base = v;
        }

        if let Some(v) = parsed_env(&lookup, "APP__KEEPALIVE_INTERVAL_MS") {
            self.keepalive_interval_ms = v;
        }
        if let Some(v) = parsed_env(&lookup, "APP__RECONNECT_BASE_DELAY_MS") {
            self.reconnect_base_delay_ms = v;
        }
        if let Some(v) = parsed_env(&lookup, "APP__RECONNECT_MAX_DELAY_MS") {
            self.reconnect_max_delay_ms = v;
        }
        if let Some(v) = parsed_env(&lookup, "APP__RECONNECT_MAX_ATTEMPTS") {
            self.reconnect_max_attempts = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.keepalive_interval_ms == 0 {
            bail!("keepalive_interval_ms must be greater than zero");
        }
        if self.reconnect_base_delay_ms == 0 {
            bail!("reconnect_base_delay_ms must be greater than zero");
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            bail!(
                "reconnect_max_delay_ms ({}) must not be below reconnect_base_delay_ms ({})",
                self.reconnect_max_delay_ms,
                self.reconnect_base_delay_ms
            );
        }
        Ok(())
    }
}

fn parsed_env<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value = %raw, "config: ignoring unparsable environment override");
            None
        }
    }
}

/// Defaults, then the config file, then the environment. An explicitly
/// named config file must exist; the default one is optional.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    let explicit = config_path.is_some();
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    match fs::read_to_string(&path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
            settings.apply_file(file_cfg);
        }
        Err(err) if err.kind() == ErrorKind::NotFound && !explicit => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()));
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
