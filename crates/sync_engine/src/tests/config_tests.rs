use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

#[test]
fn defaults_match_reference_timings() {
    let settings = SyncSettings::default();
    assert_eq!(settings.typing_start_window, Duration::from_secs(3));
    assert_eq!(settings.typing_idle_timeout, Duration::from_secs(3));
    assert_eq!(settings.reconnect_attempts, 5);
    assert_eq!(settings.read_receipt_skew, DEFAULT_READ_RECEIPT_SKEW);
}

#[test]
fn derives_socket_url_from_server_url() {
    assert_eq!(
        websocket_url("https://chat.example.com/").expect("url"),
        "wss://chat.example.com"
    );
    assert_eq!(
        websocket_url("http://127.0.0.1:3000").expect("url"),
        "ws://127.0.0.1:3000"
    );
    assert!(websocket_url("ftp://nope").is_err());
}

#[test]
fn explicit_socket_url_wins() {
    let settings = SyncSettings {
        socket_url: Some("ws://realtime.local/socket".into()),
        ..SyncSettings::default()
    };
    assert_eq!(
        settings.socket_address().expect("address"),
        "ws://realtime.local/socket"
    );
}

#[test]
fn toml_overrides_selected_fields() {
    let mut settings = SyncSettings::default();
    apply_toml(
        &mut settings,
        r#"
server_url = "https://chat.example.com"
typing_window_ms = 1500
read_receipt_skew_minutes = 0
event_log_capacity = 10
"#,
    )
    .expect("toml");

    assert_eq!(settings.server_url, "https://chat.example.com");
    assert_eq!(settings.typing_start_window, Duration::from_millis(1500));
    assert_eq!(settings.read_receipt_skew, Duration::ZERO);
    assert_eq!(settings.event_log_capacity, 10);
    assert_eq!(settings.typing_idle_timeout, Duration::from_secs(3));
}

#[test]
fn invalid_toml_is_reported() {
    let mut settings = SyncSettings::default();
    assert!(apply_toml(&mut settings, "typing_window_ms = \"soon\"").is_err());
}

#[test]
fn env_overrides_prefer_app_prefix_and_skip_garbage() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("SYNC_SERVER_URL", "http://first"),
        ("APP__SERVER_URL", "http://second"),
        ("APP__RECONNECT_ATTEMPTS", "not-a-number"),
        ("APP__CONNECT_TIMEOUT_MS", "2500"),
    ]);
    let mut settings = SyncSettings::default();
    apply_env_overrides(&mut settings, |key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(settings.server_url, "http://second");
    assert_eq!(settings.reconnect_attempts, 5);
    assert_eq!(settings.connect_timeout, Duration::from_millis(2500));
}

#[test]
fn oversized_skew_minutes_saturate() {
    let huge = u64::MAX.to_string();
    let mut settings = SyncSettings::default();
    apply_env_overrides(&mut settings, |key| {
        (key == "APP__READ_RECEIPT_SKEW_MINUTES").then(|| huge.clone())
    });
    assert_eq!(settings.read_receipt_skew, Duration::from_secs(u64::MAX));

    let mut settings = SyncSettings::default();
    apply_toml(&mut settings, &format!("read_receipt_skew_minutes = {}", i64::MAX))
        .expect("toml");
    assert_eq!(settings.read_receipt_skew, Duration::from_secs(u64::MAX));
}

#[test]
fn reads_settings_file_from_disk() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("sync_engine_settings_{suffix}.toml"));
    fs::write(&path, "message_page_size = 25\n").expect("write settings");

    let mut settings = SyncSettings::default();
    apply_file(&mut settings, &path).expect("apply file");
    assert_eq!(settings.message_page_size, 25);

    fs::remove_file(path).expect("cleanup");
}
