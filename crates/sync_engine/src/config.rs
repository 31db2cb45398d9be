use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context};
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "sync_client.toml";

/// Offset subtracted from server read timestamps before they are merged.
///
/// Works around a backend that stamps read receipts four hours ahead of the
/// message clock. It is not part of the protocol; once the backend is fixed
/// this must be set to zero through settings.
pub const DEFAULT_READ_RECEIPT_SKEW: Duration = Duration::from_secs(4 * 60 * 60);

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub server_url: String,
    pub socket_url: Option<String>,
    pub connect_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub typing_start_window: Duration,
    pub typing_idle_timeout: Duration,
    pub read_receipt_skew: Duration,
    pub event_log_capacity: usize,
    pub message_page_size: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            socket_url: None,
            connect_timeout: Duration::from_secs(20),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            typing_start_window: Duration::from_secs(3),
            typing_idle_timeout: Duration::from_secs(3),
            read_receipt_skew: DEFAULT_READ_RECEIPT_SKEW,
            event_log_capacity: 200,
            message_page_size: 50,
        }
    }
}

impl SyncSettings {
    /// Socket address for the realtime connection, derived from the server URL
    /// unless configured explicitly.
    pub fn socket_address(&self) -> anyhow::Result<String> {
        if let Some(socket_url) = &self.socket_url {
            return Ok(socket_url.clone());
        }
        websocket_url(&self.server_url)
    }
}

pub fn websocket_url(server_url: &str) -> anyhow::Result<String> {
    let server_url = server_url.trim_end_matches('/');
    if server_url.starts_with("ws://") || server_url.starts_with("wss://") {
        Ok(server_url.to_string())
    } else if server_url.starts_with("https://") {
        Ok(server_url.replacen("https://", "wss://", 1))
    } else if server_url.starts_with("http://") {
        Ok(server_url.replacen("http://", "ws://", 1))
    } else {
        Err(anyhow!(
            "server_url must start with http://, https://, ws:// or wss://"
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    socket_url: Option<String>,
    connect_timeout_ms: Option<u64>,
    reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
    typing_window_ms: Option<u64>,
    typing_idle_ms: Option<u64>,
    read_receipt_skew_minutes: Option<u64>,
    event_log_capacity: Option<usize>,
    message_page_size: Option<u32>,
}

pub fn load_settings() -> SyncSettings {
    let mut settings = SyncSettings::default();
    if Path::new(SETTINGS_FILE).exists() {
        if let Err(err) = apply_file(&mut settings, Path::new(SETTINGS_FILE)) {
            tracing::warn!(
                error = %format!("{err:#}"),
                "config: ignoring unreadable settings file"
            );
        }
    }
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub fn apply_file(settings: &mut SyncSettings, path: &Path) -> anyhow::Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    apply_toml(settings, &raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))
}

pub fn apply_toml(settings: &mut SyncSettings, raw: &str) -> anyhow::Result<()> {
    let file: FileSettings = toml::from_str(raw)?;

    if let Some(v) = file.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file.socket_url {
        settings.socket_url = Some(v);
    }
    if let Some(v) = file.connect_timeout_ms {
        settings.connect_timeout = Duration::from_millis(v);
    }
    if let Some(v) = file.reconnect_attempts {
        settings.reconnect_attempts = v;
    }
    if let Some(v) = file.reconnect_delay_ms {
        settings.reconnect_delay = Duration::from_millis(v);
    }
    if let Some(v) = file.typing_window_ms {
        settings.typing_start_window = Duration::from_millis(v);
    }
    if let Some(v) = file.typing_idle_ms {
        settings.typing_idle_timeout = Duration::from_millis(v);
    }
    if let Some(v) = file.read_receipt_skew_minutes {
        settings.read_receipt_skew = Duration::from_secs(v.saturating_mul(60));
    }
    if let Some(v) = file.event_log_capacity {
        settings.event_log_capacity = v;
    }
    if let Some(v) = file.message_page_size {
        settings.message_page_size = v;
    }
    Ok(())
}

pub fn apply_env_overrides(settings: &mut SyncSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SYNC_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("SYNC_SOCKET_URL") {
        settings.socket_url = Some(v);
    }
    if let Some(v) = lookup("APP__SOCKET_URL") {
        settings.socket_url = Some(v);
    }

    if let Some(v) = parsed::<u64>(&lookup, "APP__CONNECT_TIMEOUT_MS") {
        settings.connect_timeout = Duration::from_millis(v);
    }
    if let Some(v) = parsed::<u32>(&lookup, "APP__RECONNECT_ATTEMPTS") {
        settings.reconnect_attempts = v;
    }
    if let Some(v) = parsed::<u64>(&lookup, "APP__RECONNECT_DELAY_MS") {
        settings.reconnect_delay = Duration::from_millis(v);
    }
    if let Some(v) = parsed::<u64>(&lookup, "APP__TYPING_WINDOW_MS") {
        settings.typing_start_window = Duration::from_millis(v);
    }
    if let Some(v) = parsed::<u64>(&lookup, "APP__TYPING_IDLE_MS") {
        settings.typing_idle_timeout = Duration::from_millis(v);
    }
    if let Some(v) = parsed::<u64>(&lookup, "APP__READ_RECEIPT_SKEW_MINUTES") {
        settings.read_receipt_skew = Duration::from_secs(v.saturating_mul(60));
    }
    if let Some(v) = parsed::<usize>(&lookup, "APP__EVENT_LOG_CAPACITY") {
        settings.event_log_capacity = v;
    }
    if let Some(v) = parsed::<u32>(&lookup, "APP__MESSAGE_PAGE_SIZE") {
        settings.message_page_size = v;
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "config: ignoring unparsable override");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
