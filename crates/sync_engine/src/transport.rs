//! Bidirectional event channel to the realtime server.
//!
//! A [`Transport`] connects with credentials, yields lifecycle signals and
//! named inbound events on a channel, and accepts named outbound emissions.
//! Retrying dropped sockets is the transport's job; callers only observe the
//! signals it reports.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use shared::{domain::UserId, protocol::Envelope};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

/// Credential context attached to a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub identity: UserId,
    pub token: Option<String>,
    pub auxiliary: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new(identity: UserId) -> Self {
        Self {
            identity,
            token: None,
            auxiliary: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    /// The socket came back after a drop.
    Reopened,
    /// The socket closed without an explicit disconnect.
    Closed { reason: String },
    /// The transport gave up re-establishing the socket.
    Failed { message: String },
    Event { name: String, payload: Value },
}

pub type InboundSignals = mpsc::UnboundedReceiver<TransportSignal>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves once the socket is open. Signals for this session arrive on the
    /// returned receiver until it is closed.
    async fn connect(&self, address: &str, credentials: &Credentials) -> Result<InboundSignals>;
    async fn emit(&self, event: &str, payload: Value) -> Result<()>;
    async fn disconnect(&self);
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SocketCommand {
    Send(Message, oneshot::Sender<Result<()>>),
    Close,
}

struct ActiveSocket {
    commands: mpsc::UnboundedSender<SocketCommand>,
    task: JoinHandle<()>,
}

/// JSON-envelope transport over a websocket (`{"event": .., "data": ..}` text frames).
///
/// Every `disconnect` bumps a generation; a connect that finishes its
/// handshake after a newer disconnect closes its socket instead of installing it.
pub struct WebSocketTransport {
    policy: ReconnectPolicy,
    active: tokio::sync::Mutex<Option<ActiveSocket>>,
    generation: AtomicU64,
}

impl WebSocketTransport {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            active: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    async fn open_with_retry(policy: ReconnectPolicy, url: &Url) -> Result<Socket> {
        let mut attempt = 0;
        loop {
            match connect_async(url.as_str()).await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) if attempt < policy.attempts => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_attempts = policy.attempts,
                        error = %err,
                        "transport: connect failed, retrying"
                    );
                    tokio::time::sleep(policy.delay).await;
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to connect websocket: {}", redact(url)))
                }
            }
        }
    }

    async fn run_socket(
        policy: ReconnectPolicy,
        url: Url,
        mut socket: Socket,
        mut commands: mpsc::UnboundedReceiver<SocketCommand>,
        signals: mpsc::UnboundedSender<TransportSignal>,
    ) {
        loop {
            let closed_reason = loop {
                tokio::select! {
                    command = commands.recv() => match command {
                        Some(SocketCommand::Send(frame, ack)) => {
                            let result = socket
                                .send(frame)
                                .await
                                .map_err(|err| anyhow!("websocket send failed: {err}"));
                            let failed = result.is_err();
                            let _ = ack.send(result);
                            if failed {
                                break "send failure".to_string();
                            }
                        }
                        Some(SocketCommand::Close) | None => {
                            let _ = socket.close(None).await;
                            return;
                        }
                    },
                    frame = socket.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(signal) = decode_frame(&text) {
                                let _ = signals.send(signal);
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break frame
                                .map(|frame| frame.reason.to_string())
                                .unwrap_or_else(|| "server closed".to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => break format!("websocket receive failed: {err}"),
                        None => break "stream ended".to_string(),
                    },
                }
            };

            info!(reason = %closed_reason, "transport: socket closed");
            if signals
                .send(TransportSignal::Closed {
                    reason: closed_reason,
                })
                .is_err()
            {
                return;
            }

            socket = match Self::open_with_retry(policy, &url).await {
                Ok(socket) => socket,
                Err(err) => {
                    let _ = signals.send(TransportSignal::Failed {
                        message: format!("{err:#}"),
                    });
                    return;
                }
            };
            info!("transport: socket re-established");
            let _ = signals.send(TransportSignal::Reopened);
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, address: &str, credentials: &Credentials) -> Result<InboundSignals> {
        let url = connect_url(address, credentials)?;
        self.disconnect().await;
        let generation = self.generation.load(Ordering::SeqCst);

        let mut socket = Self::open_with_retry(self.policy, &url).await?;
        let mut active = self.active.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            drop(active);
            let _ = socket.close(None).await;
            info!("transport: closing socket opened after disconnect");
            return Err(anyhow!("connect cancelled by disconnect"));
        }
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::run_socket(
            self.policy,
            url,
            socket,
            command_rx,
            signal_tx,
        ));
        *active = Some(ActiveSocket {
            commands: command_tx,
            task,
        });
        Ok(signal_rx)
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<()> {
        let text = serde_json::to_string(&Envelope {
            event: event.to_string(),
            data: payload,
        })?;
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let guard = self.active.lock().await;
            let active = guard
                .as_ref()
                .ok_or_else(|| anyhow!("transport is not connected"))?;
            active
                .commands
                .send(SocketCommand::Send(Message::Text(text), ack_tx))
                .map_err(|_| anyhow!("transport socket task has stopped"))?;
        }
        ack_rx
            .await
            .map_err(|_| anyhow!("transport dropped the frame"))?
    }

    async fn disconnect(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let Some(active) = self.active.lock().await.take() else {
            return;
        };
        if active.commands.send(SocketCommand::Close).is_err() {
            active.task.abort();
        }
        debug!("transport: disconnect requested");
    }
}

/// Builds the socket URL with the credential context in the query string.
pub fn connect_url(address: &str, credentials: &Credentials) -> Result<Url> {
    let mut url =
        Url::parse(address).with_context(|| format!("invalid socket address: {address}"))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(anyhow!("socket address must use ws:// or wss://"));
    }
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("userId", credentials.identity.as_str());
        if let Some(token) = &credentials.token {
            query.append_pair("token", token);
        }
        for (key, value) in &credentials.auxiliary {
            query.append_pair(key, value);
        }
    }
    Ok(url)
}

fn decode_frame(text: &str) -> Option<TransportSignal> {
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => Some(TransportSignal::Event {
            name: envelope.event,
            payload: envelope.data,
        }),
        Err(err) => {
            warn!(error = %err, "transport: ignoring undecodable frame");
            None
        }
    }
}

fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    redacted.set_query(None);
    redacted.to_string()
}

#[derive(Default)]
struct ChannelState {
    signals: Option<mpsc::UnboundedSender<TransportSignal>>,
    emitted: Vec<(String, Value)>,
    connect_attempts: Vec<(String, Credentials)>,
    fail_connect: Option<String>,
    stall_connect: bool,
    fail_emit: Option<String>,
}

/// In-process transport driven by hand; useful for embedding the engine
/// without a network and for exercising it deterministically.
#[derive(Clone, Default)]
pub struct ChannelTransport {
    state: Arc<Mutex<ChannelState>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ChannelState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Delivers a named inbound event on the live session. Returns false when
    /// no session is open.
    pub fn push_event(&self, name: &str, payload: Value) -> bool {
        self.push_signal(TransportSignal::Event {
            name: name.to_string(),
            payload,
        })
    }

    pub fn push_signal(&self, signal: TransportSignal) -> bool {
        self.with_state(|state| {
            state
                .signals
                .as_ref()
                .is_some_and(|signals| signals.send(signal).is_ok())
        })
    }

    pub fn fail_next_connect(&self, message: impl Into<String>) {
        self.with_state(|state| state.fail_connect = Some(message.into()));
    }

    pub fn stall_connect(&self, stall: bool) {
        self.with_state(|state| state.stall_connect = stall);
    }

    pub fn fail_emits(&self, message: Option<String>) {
        self.with_state(|state| state.fail_emit = message);
    }

    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.with_state(|state| state.emitted.clone())
    }

    pub fn emitted_names(&self) -> Vec<String> {
        self.with_state(|state| state.emitted.iter().map(|(name, _)| name.clone()).collect())
    }

    pub fn clear_emitted(&self) {
        self.with_state(|state| state.emitted.clear());
    }

    pub fn connect_attempts(&self) -> Vec<(String, Credentials)> {
        self.with_state(|state| state.connect_attempts.clone())
    }

    pub fn is_open(&self) -> bool {
        self.with_state(|state| state.signals.is_some())
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self, address: &str, credentials: &Credentials) -> Result<InboundSignals> {
        let (stall, failure) = self.with_state(|state| {
            state
                .connect_attempts
                .push((address.to_string(), credentials.clone()));
            (state.stall_connect, state.fail_connect.take())
        });
        if stall {
            std::future::pending::<()>().await;
        }
        if let Some(message) = failure {
            return Err(anyhow!(message));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.with_state(|state| state.signals = Some(tx));
        Ok(rx)
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<()> {
        self.with_state(|state| {
            if state.signals.is_none() {
                return Err(anyhow!("transport is not connected"));
            }
            if let Some(message) = &state.fail_emit {
                return Err(anyhow!(message.clone()));
            }
            state.emitted.push((event.to_string(), payload));
            Ok(())
        })
    }

    async fn disconnect(&self) {
        self.with_state(|state| state.signals = None);
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
