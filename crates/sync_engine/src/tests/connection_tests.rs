use super::*;
use crate::transport::ChannelTransport;

fn manager(transport: &ChannelTransport) -> ConnectionManager {
    ConnectionManager::new(Arc::new(transport.clone()), Duration::from_secs(20))
}

fn record_states(manager: &ConnectionManager) -> Arc<Mutex<Vec<ConnectionState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    manager.on_status(move |status| sink.lock().expect("states").push(status.state));
    states
}

#[tokio::test]
async fn connect_without_identity_is_rejected() {
    let transport = ChannelTransport::new();
    let manager = manager(&transport);
    let states = record_states(&manager);

    let err = manager
        .connect("ws://local")
        .await
        .err()
        .expect("must fail");
    assert!(matches!(err, SyncError::IdentityMissing));
    assert_eq!(manager.status().state, ConnectionState::Disconnected);
    assert!(states.lock().expect("states").is_empty());
    assert!(transport.connect_attempts().is_empty());
}

#[tokio::test]
async fn blank_identity_counts_as_missing() {
    let transport = ChannelTransport::new();
    let manager = manager(&transport);
    manager.set_identity(Credentials::new(UserId::from("  ")));
    assert!(matches!(
        manager.connect("ws://local").await,
        Err(SyncError::IdentityMissing)
    ));
}

#[tokio::test]
async fn successful_connect_walks_connecting_then_connected() {
    let transport = ChannelTransport::new();
    let manager = manager(&transport);
    let states = record_states(&manager);
    manager.set_identity(Credentials::new(UserId::from("u1")));

    let outcome = manager.connect("ws://local").await.expect("connect");
    assert!(matches!(outcome, ConnectOutcome::Opened { epoch: 1, .. }));
    assert_eq!(
        *states.lock().expect("states"),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
    assert_eq!(transport.connect_attempts()[0].1.identity, UserId::from("u1"));

    let again = manager.connect("ws://local").await.expect("connect");
    assert!(matches!(again, ConnectOutcome::AlreadyActive(_)));
    assert_eq!(transport.connect_attempts().len(), 1);
}

#[tokio::test]
async fn failed_connect_captures_error_and_success_clears_it() {
    let transport = ChannelTransport::new();
    let manager = manager(&transport);
    manager.set_identity(Credentials::new(UserId::from("u1")));
    transport.fail_next_connect("connection refused");

    let outcome = manager.connect("ws://local").await.expect("connect");
    assert!(matches!(outcome, ConnectOutcome::Failed(_)));
    let status = manager.status();
    assert_eq!(status.state, ConnectionState::Error);
    assert_eq!(status.last_error.as_deref(), Some("connection refused"));

    manager.connect("ws://local").await.expect("connect");
    assert_eq!(
        manager.status(),
        ConnectionStatus {
            state: ConnectionState::Connected,
            last_error: None,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn stalled_connect_times_out_into_error() {
    let transport = ChannelTransport::new();
    transport.stall_connect(true);
    let manager = ConnectionManager::new(Arc::new(transport.clone()), Duration::from_secs(5));
    manager.set_identity(Credentials::new(UserId::from("u1")));

    let outcome = manager.connect("ws://local").await.expect("connect");
    assert!(matches!(outcome, ConnectOutcome::Failed(_)));
    assert_eq!(
        manager.status().last_error.as_deref(),
        Some(CONNECT_TIMEOUT_MESSAGE)
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_an_attempt_in_flight() {
    let transport = ChannelTransport::new();
    transport.stall_connect(true);
    let manager = Arc::new(ConnectionManager::new(
        Arc::new(transport.clone()),
        Duration::from_secs(5),
    ));
    manager.set_identity(Credentials::new(UserId::from("u1")));

    let pending = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.connect("ws://local").await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(manager.status().state, ConnectionState::Connecting);

    assert!(manager.disconnect().await);
    let outcome = pending.await.expect("join").expect("connect");
    assert!(matches!(outcome, ConnectOutcome::Cancelled(_)));
    assert_eq!(manager.status().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn stale_epoch_signals_are_ignored() {
    let transport = ChannelTransport::new();
    let manager = manager(&transport);
    manager.set_identity(Credentials::new(UserId::from("u1")));
    manager.connect("ws://local").await.expect("connect");
    let epoch = manager.epoch();

    assert!(manager.mark_dropped(epoch, "stream ended"));
    assert_eq!(manager.status().state, ConnectionState::Error);
    assert!(manager.mark_reopened(epoch));
    assert_eq!(manager.status().state, ConnectionState::Connected);

    manager.disconnect().await;
    assert!(!manager.mark_reopened(epoch));
    assert_eq!(manager.status().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn identity_change_while_connected_requests_reconnect() {
    let transport = ChannelTransport::new();
    let manager = manager(&transport);
    assert_eq!(manager.set_identity(Credentials::new(UserId::from("u1"))), None);
    manager.connect("ws://local").await.expect("connect");

    assert_eq!(manager.set_identity(Credentials::new(UserId::from("u1"))), None);
    assert_eq!(
        manager.set_identity(Credentials::new(UserId::from("u2"))),
        Some("ws://local".to_string())
    );
    assert_eq!(manager.identity(), Some(UserId::from("u2")));
}

#[tokio::test]
async fn identity_change_after_a_drop_still_requests_reconnect() {
    let transport = ChannelTransport::new();
    let manager = manager(&transport);
    manager.set_identity(Credentials::new(UserId::from("u1")));
    manager.connect("ws://local").await.expect("connect");
    assert!(manager.mark_dropped(manager.epoch(), "stream ended"));

    assert_eq!(
        manager.set_identity(Credentials::new(UserId::from("u2"))),
        Some("ws://local".to_string())
    );
}

#[tokio::test]
async fn listeners_run_in_order_and_survive_a_panicking_peer() {
    let transport = ChannelTransport::new();
    let manager = manager(&transport);
    let calls = Arc::new(Mutex::new(Vec::new()));

    let first = Arc::clone(&calls);
    manager.on_status(move |status| {
        let line = format!("first:{}", status.state.as_str());
        first.lock().expect("calls").push(line);
    });
    manager.on_status(|_| panic!("listener bug"));
    let third = Arc::clone(&calls);
    let token = manager.on_status(move |status| {
        let line = format!("third:{}", status.state.as_str());
        third.lock().expect("calls").push(line);
    });

    manager.set_identity(Credentials::new(UserId::from("u1")));
    manager.connect("ws://local").await.expect("connect");
    assert!(manager.remove_status_listener(token));
    assert!(!manager.remove_status_listener(token));
    manager.disconnect().await;

    assert_eq!(
        *calls.lock().expect("calls"),
        vec![
            "first:connecting".to_string(),
            "third:connecting".to_string(),
            "first:connected".to_string(),
            "third:connected".to_string(),
            "first:disconnected".to_string(),
        ]
    );
}

#[tokio::test]
async fn disconnect_is_safe_when_idle() {
    let transport = ChannelTransport::new();
    let manager = manager(&transport);
    let states = record_states(&manager);
    assert!(!manager.disconnect().await);
    assert!(states.lock().expect("states").is_empty());
}
