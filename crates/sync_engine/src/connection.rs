//! Connection lifecycle state machine.
//!
//! `disconnected → connecting → connected`, `connecting | connected → error`,
//! and any state back to `disconnected` on an explicit disconnect. Every
//! session gets an epoch; signals and late connect results tagged with an
//! older epoch are ignored, which is how `disconnect` cancels in-flight work.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use shared::domain::UserId;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::{
    error::SyncError,
    registry::panic_message,
    transport::{Credentials, InboundSignals, Transport},
};

pub const CONNECT_TIMEOUT_MESSAGE: &str = "connection attempt timed out";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_error: None,
        }
    }
}

pub type StatusListener = Arc<dyn Fn(&ConnectionStatus) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusToken(u64);

pub enum ConnectOutcome {
    /// A session is already open or being opened.
    AlreadyActive(ConnectionStatus),
    Opened { epoch: u64, signals: InboundSignals },
    Failed(ConnectionStatus),
    /// `disconnect` ran while the attempt was in flight.
    Cancelled(ConnectionStatus),
}

struct ConnectionInner {
    status: ConnectionStatus,
    credentials: Option<Credentials>,
    address: Option<String>,
    epoch: u64,
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    connect_timeout: Duration,
    inner: Mutex<ConnectionInner>,
    listeners: Mutex<Vec<(StatusToken, StatusListener)>>,
    next_listener: AtomicU64,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, connect_timeout: Duration) -> Self {
        Self {
            transport,
            connect_timeout,
            inner: Mutex::new(ConnectionInner {
                status: ConnectionStatus::disconnected(),
                credentials: None,
                address: None,
                epoch: 0,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.lock().status.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().status.state == ConnectionState::Connected
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    pub fn identity(&self) -> Option<UserId> {
        self.lock()
            .credentials
            .as_ref()
            .map(|credentials| credentials.identity.clone())
    }

    pub fn address(&self) -> Option<String> {
        self.lock().address.clone()
    }

    /// Stores the credentials. Returns the address to reconnect to when the
    /// identity changed while a session was open. A session in `error` still
    /// counts as open: the transport may be retrying with the old credentials.
    pub fn set_identity(&self, credentials: Credentials) -> Option<String> {
        let mut inner = self.lock();
        let changed = inner
            .credentials
            .as_ref()
            .map_or(true, |current| *current != credentials);
        inner.credentials = Some(credentials);
        let active = inner.status.state != ConnectionState::Disconnected;
        if changed && active {
            inner.address.clone()
        } else {
            None
        }
    }

    pub async fn connect(&self, address: &str) -> Result<ConnectOutcome, SyncError> {
        let (epoch, credentials, status) = {
            let mut inner = self.lock();
            let credentials = inner
                .credentials
                .clone()
                .filter(|credentials| !credentials.identity.is_blank())
                .ok_or(SyncError::IdentityMissing)?;
            if matches!(
                inner.status.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                return Ok(ConnectOutcome::AlreadyActive(inner.status.clone()));
            }
            inner.epoch += 1;
            inner.address = Some(address.to_string());
            inner.status = ConnectionStatus {
                state: ConnectionState::Connecting,
                last_error: inner.status.last_error.take(),
            };
            (inner.epoch, credentials, inner.status.clone())
        };
        self.notify(&status);
        info!(identity = %credentials.identity, epoch, "sync: connecting");

        let attempt = timeout(
            self.connect_timeout,
            self.transport.connect(address, &credentials),
        )
        .await;

        let (outcome, status) = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                info!(epoch, "sync: discarding connect result for cancelled attempt");
                return Ok(ConnectOutcome::Cancelled(inner.status.clone()));
            }
            match attempt {
                Ok(Ok(signals)) => {
                    inner.status = ConnectionStatus {
                        state: ConnectionState::Connected,
                        last_error: None,
                    };
                    (ConnectOutcome::Opened { epoch, signals }, inner.status.clone())
                }
                Ok(Err(err)) => {
                    inner.status = ConnectionStatus {
                        state: ConnectionState::Error,
                        last_error: Some(format!("{err:#}")),
                    };
                    (ConnectOutcome::Failed(inner.status.clone()), inner.status.clone())
                }
                Err(_) => {
                    inner.status = ConnectionStatus {
                        state: ConnectionState::Error,
                        last_error: Some(CONNECT_TIMEOUT_MESSAGE.to_string()),
                    };
                    (ConnectOutcome::Failed(inner.status.clone()), inner.status.clone())
                }
            }
        };
        match status.state {
            ConnectionState::Connected => info!(epoch, "sync: connected"),
            _ => warn!(
                epoch,
                error = status.last_error.as_deref().unwrap_or_default(),
                "sync: connect failed"
            ),
        }
        self.notify(&status);
        Ok(outcome)
    }

    /// Tears the session down. Safe in any state. Returns whether a session
    /// was open or being opened.
    pub async fn disconnect(&self) -> bool {
        let (was_active, status) = {
            let mut inner = self.lock();
            inner.epoch += 1;
            let was_active = inner.status.state != ConnectionState::Disconnected;
            inner.status = ConnectionStatus::disconnected();
            (was_active, inner.status.clone())
        };
        self.transport.disconnect().await;
        if was_active {
            info!("sync: disconnected");
            self.notify(&status);
        }
        was_active
    }

    /// The transport lost the socket and is retrying.
    pub fn mark_dropped(&self, epoch: u64, reason: &str) -> bool {
        self.transition(epoch, ConnectionState::Error, Some(reason.to_string()))
    }

    /// The transport re-established the socket.
    pub fn mark_reopened(&self, epoch: u64) -> bool {
        self.transition(epoch, ConnectionState::Connected, None)
    }

    /// The transport gave up retrying.
    pub fn mark_failed(&self, epoch: u64, message: &str) -> bool {
        self.transition(epoch, ConnectionState::Error, Some(message.to_string()))
    }

    fn transition(&self, epoch: u64, state: ConnectionState, last_error: Option<String>) -> bool {
        let status = {
            let mut inner = self.lock();
            if inner.epoch != epoch || inner.status.state == ConnectionState::Disconnected {
                return false;
            }
            inner.status = ConnectionStatus { state, last_error };
            inner.status.clone()
        };
        self.notify(&status);
        true
    }

    pub fn on_status<F>(&self, listener: F) -> StatusToken
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        let token = StatusToken(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((token, Arc::new(listener)));
        token
    }

    pub fn remove_status_listener(&self, token: StatusToken) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != token);
        listeners.len() != before
    }

    fn notify(&self, status: &ConnectionStatus) {
        let listeners: Vec<StatusListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(status))) {
                error!(
                    state = status.state.as_str(),
                    panic = %panic_message(&*panic),
                    "sync: status listener panicked"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
