use std::{collections::HashMap, fs, path::Path, str::FromStr, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use session::BroadcastStyle;
use tracing::warn;

const SETTINGS_FILE: &str = "server.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub broadcast_style: BroadcastStyle,
    /// Periodic full-state push to each WebSocket connection; 0 disables it.
    pub resync_interval_secs: u64,
    pub broadcast_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3001".into(),
            broadcast_style: BroadcastStyle::Delta,
            resync_interval_secs: 30,
            broadcast_capacity: 256,
        }
    }
}

impl Settings {
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let file_cfg = read_settings_file(Path::new(SETTINGS_FILE))?;
    apply_file_overrides(&mut settings, &file_cfg);

    let env: HashMap<String, String> = std::env::vars().collect();
    apply_env_overrides(&mut settings, &env);

    Ok(settings)
}

fn read_settings_file(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
        }
    };
    let table: toml::Table =
        toml::from_str(&raw).with_context(|| format!("failed to parse '{}'", path.display()))?;
    Ok(table
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                toml::Value::String(text) => text,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

fn apply_file_overrides(settings: &mut Settings, file_cfg: &HashMap<String, String>) {
    if let Some(v) = file_cfg.get("bind_addr") {
        settings.server_bind = v.clone();
    }
    if let Some(v) = file_cfg.get("broadcast_style") {
        set_parsed(&mut settings.broadcast_style, "broadcast_style", v);
    }
    if let Some(v) = file_cfg.get("resync_interval_secs") {
        set_parsed(&mut settings.resync_interval_secs, "resync_interval_secs", v);
    }
    if let Some(v) = file_cfg.get("broadcast_capacity") {
        set_parsed(&mut settings.broadcast_capacity, "broadcast_capacity", v);
    }
}

fn apply_env_overrides(settings: &mut Settings, env: &HashMap<String, String>) {
    if let Some(v) = env.get("SERVER_BIND") {
        settings.server_bind = v.clone();
    }
    if let Some(v) = env.get("APP__BIND_ADDR") {
        settings.server_bind = v.clone();
    }

    if let Some(v) = env.get("APP__BROADCAST_STYLE") {
        set_parsed(&mut settings.broadcast_style, "APP__BROADCAST_STYLE", v);
    }
    if let Some(v) = env.get("APP__RESYNC_INTERVAL_SECS") {
        set_parsed(&mut settings.resync_interval_secs, "APP__RESYNC_INTERVAL_SECS", v);
    }
    if let Some(v) = env.get("APP__BROADCAST_CAPACITY") {
        set_parsed(&mut settings.broadcast_capacity, "APP__BROADCAST_CAPACITY", v);
    }

    // A zero-capacity broadcast channel panics on creation.
    if settings.broadcast_capacity == 0 {
        warn!("broadcast_capacity must be positive; using default");
        settings.broadcast_capacity = Settings::default().broadcast_capacity;
    }
}

fn set_parsed<T>(slot: &mut T, key: &str, raw: &str)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(error) => warn!(key, value = raw, %error, "ignoring invalid setting"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
