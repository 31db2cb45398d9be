pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_log;
pub mod query;
pub mod reconcile;
pub mod registry;
pub mod transport;
pub mod typing;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::{json, Value};
use shared::{
    domain::{ConversationId, MessageId, UserId},
    events::EventName,
    protocol::{normalize, InboundEvent, ReactionRecord},
};
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    commands::CommandFacade,
    config::SyncSettings,
    connection::{
        ConnectOutcome, ConnectionManager, ConnectionState, ConnectionStatus, StatusToken,
    },
    error::SyncError,
    event_log::EventLogEntry,
    query::ConversationApi,
    reconcile::{EngineEffect, EngineSnapshot, MembershipDirection, ReconciliationEngine},
    registry::{DispatchReport, EventRegistry, SubscriptionKey, SubscriptionToken},
    transport::{Credentials, InboundSignals, Transport, TransportSignal},
    typing::{TypingDebouncer, TypingSignal},
};

/// Client-side synchronization session: one connection, one dispatch
/// sequence, one set of mirrors.
pub struct SyncClient {
    settings: SyncSettings,
    api: Arc<dyn ConversationApi>,
    connection: Arc<ConnectionManager>,
    commands: CommandFacade,
    registry: EventRegistry,
    engine: Mutex<ReconciliationEngine>,
    typing: Mutex<TypingDebouncer>,
    typing_timer: Mutex<Option<JoinHandle<()>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncClient {
    pub fn new(
        settings: SyncSettings,
        transport: Arc<dyn Transport>,
        api: Arc<dyn ConversationApi>,
    ) -> Arc<Self> {
        let connection = Arc::new(ConnectionManager::new(
            Arc::clone(&transport),
            settings.connect_timeout,
        ));
        Arc::new(Self {
            commands: CommandFacade::new(transport, Arc::clone(&connection)),
            connection,
            api,
            registry: EventRegistry::new(settings.event_log_capacity),
            engine: Mutex::new(ReconciliationEngine::new(settings.read_receipt_skew)),
            typing: Mutex::new(TypingDebouncer::new(
                settings.typing_start_window,
                settings.typing_idle_timeout,
            )),
            typing_timer: Mutex::new(None),
            pump: Mutex::new(None),
            settings,
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn identity(&self) -> Option<UserId> {
        self.connection.identity()
    }

    pub fn on_status<F>(&self, listener: F) -> StatusToken
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.connection.on_status(listener)
    }

    pub fn remove_status_listener(&self, token: StatusToken) -> bool {
        self.connection.remove_status_listener(token)
    }

    pub fn subscribe<F>(&self, event: EventName, handler: F) -> SubscriptionToken
    where
        F: Fn(&InboundEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.subscribe(SubscriptionKey::global(event), handler)
    }

    /// Typing updates for one conversation, or for all of them with `None`.
    pub fn subscribe_typing<F>(
        &self,
        conversation_id: Option<ConversationId>,
        handler: F,
    ) -> SubscriptionToken
    where
        F: Fn(&InboundEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry
            .subscribe(SubscriptionKey::typing(conversation_id), handler)
    }

    pub fn subscribe_diagnostics<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&EventLogEntry) + Send + Sync + 'static,
    {
        self.registry.subscribe_diagnostics(handler)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.registry.unsubscribe(token)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        locked(&self.engine).snapshot()
    }

    pub fn last_read_index(&self, user_id: &UserId) -> Option<usize> {
        locked(&self.engine).last_read_index(user_id)
    }

    pub fn latest_event(&self, name: &str) -> Option<EventLogEntry> {
        self.registry.latest(name)
    }

    /// Most recent `message:new` payload received.
    pub fn latest_message(&self) -> Option<Value> {
        self.registry
            .latest(EventName::MessageNew.as_str())
            .map(|entry| entry.payload)
    }

    pub fn event_log(&self) -> Vec<EventLogEntry> {
        self.registry.log_snapshot()
    }

    /// Stores the identity. Changing it while a session is open reconnects to
    /// the previous address with the new credentials.
    pub async fn set_identity(
        self: &Arc<Self>,
        credentials: Credentials,
    ) -> Result<ConnectionStatus, SyncError> {
        let identity = credentials.identity.clone();
        match self.connection.set_identity(credentials) {
            Some(address) => {
                info!(identity = %identity, "sync: identity changed, reconnecting");
                self.disconnect().await;
                locked(&self.engine).set_identity(Some(identity));
                self.connect_to(&address).await
            }
            None => {
                locked(&self.engine).set_identity(Some(identity));
                Ok(self.status())
            }
        }
    }

    /// Connects to the configured socket address.
    pub async fn connect(self: &Arc<Self>) -> Result<ConnectionStatus, SyncError> {
        let address = self
            .settings
            .socket_address()
            .map_err(|err| SyncError::Transport(format!("{err:#}")))?;
        self.connect_to(&address).await
    }

    pub async fn connect_to(
        self: &Arc<Self>,
        address: &str,
    ) -> Result<ConnectionStatus, SyncError> {
        match self.connection.connect(address).await? {
            ConnectOutcome::AlreadyActive(status) | ConnectOutcome::Cancelled(status) => Ok(status),
            ConnectOutcome::Failed(status) => {
                let message = status.last_error.clone().unwrap_or_default();
                self.dispatch(
                    InboundEvent::ConnectError {
                        message: message.clone(),
                    },
                    json!({ "message": message }),
                );
                Ok(status)
            }
            ConnectOutcome::Opened { epoch, signals } => {
                self.dispatch(InboundEvent::Connected, json!({}));
                if let Err(err) = self.refresh_conversations().await {
                    warn!(error = %err, "sync: initial conversation fetch failed");
                }
                if self.connection.epoch() == epoch {
                    self.spawn_pump(epoch, signals);
                }
                Ok(self.status())
            }
        }
    }

    /// Tears down the session and clears every mirror. Safe in any state.
    pub async fn disconnect(&self) {
        let was_active = self.connection.disconnect().await;
        if let Some(pump) = locked(&self.pump).take() {
            pump.abort();
        }
        self.cancel_typing_timer();
        locked(&self.typing).reset();
        self.commands.forget_rooms();
        locked(&self.engine).reset();
        if was_active {
            let reason = "client disconnect".to_string();
            self.dispatch(
                InboundEvent::Disconnected {
                    reason: reason.clone(),
                },
                json!({ "reason": reason }),
            );
        }
    }

    fn spawn_pump(self: &Arc<Self>, epoch: u64, mut signals: InboundSignals) {
        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                if client.connection.epoch() != epoch {
                    break;
                }
                client.handle_signal(epoch, signal).await;
            }
            let still_connected = client.connection.status().state == ConnectionState::Connected;
            if still_connected && client.connection.mark_dropped(epoch, "connection closed") {
                client.dispatch(
                    InboundEvent::Disconnected {
                        reason: "connection closed".into(),
                    },
                    json!({ "reason": "connection closed" }),
                );
            }
            debug!(epoch, "sync: signal pump stopped");
        });
        if let Some(previous) = locked(&self.pump).replace(task) {
            previous.abort();
        }
    }

    async fn handle_signal(&self, epoch: u64, signal: TransportSignal) {
        match signal {
            TransportSignal::Event { name, payload } => self.handle_event(&name, payload).await,
            TransportSignal::Closed { reason } => {
                if self.connection.mark_dropped(epoch, &reason) {
                    self.cancel_typing_timer();
                    locked(&self.typing).reset();
                    self.dispatch(
                        InboundEvent::Disconnected {
                            reason: reason.clone(),
                        },
                        json!({ "reason": reason }),
                    );
                }
            }
            TransportSignal::Reopened => {
                if self.connection.mark_reopened(epoch) {
                    self.dispatch(InboundEvent::Connected, json!({}));
                    self.commands.rejoin_rooms().await;
                    let open = locked(&self.engine).open_conversation_id().cloned();
                    if let Some(conversation_id) = open {
                        self.commands.join_room(&conversation_id).await;
                    }
                    self.catch_up().await;
                }
            }
            TransportSignal::Failed { message } => {
                if self.connection.mark_failed(epoch, &message) {
                    self.dispatch(
                        InboundEvent::ConnectError {
                            message: message.clone(),
                        },
                        json!({ "message": message }),
                    );
                }
            }
        }
    }

    async fn handle_event(&self, name: &str, payload: Value) {
        let Some(event_name) = EventName::parse(name) else {
            debug!(event = name, "sync: ignoring unknown event");
            return;
        };
        let now = Utc::now();
        let event = match normalize(event_name, &payload, now) {
            Ok(event) => event,
            Err(malformed) => {
                warn!(event = name, reason = %malformed.reason, "sync: dropping malformed event");
                self.registry
                    .record_malformed(name, &payload, &malformed.reason, now);
                return;
            }
        };
        let effects = locked(&self.engine).apply(&event, now);
        let report = self.registry.dispatch(&event, &payload, now);
        if report.failed > 0 {
            debug!(event = name, failed = report.failed, "sync: some handlers failed");
        }
        self.run_effects(effects).await;
    }

    fn dispatch(&self, event: InboundEvent, raw: Value) -> DispatchReport {
        self.registry.dispatch(&event, &raw, Utc::now())
    }

    async fn run_effects(&self, effects: Vec<EngineEffect>) {
        for effect in effects {
            match effect {
                EngineEffect::MarkRead(conversation_id) => {
                    self.commands.mark_read(&conversation_id).await
                }
                EngineEffect::RefetchConversations => {
                    if let Err(err) = self.refresh_conversations().await {
                        warn!(error = %err, "sync: conversation refetch failed");
                    }
                }
            }
        }
    }

    /// Brings the mirrors back in line after the socket was re-established.
    async fn catch_up(&self) {
        if let Err(err) = self.refresh_conversations().await {
            warn!(error = %err, "sync: catch-up conversation fetch failed");
        }
        let Some(conversation_id) = locked(&self.engine).open_conversation_id().cloned() else {
            return;
        };
        match self
            .api
            .list_messages(&conversation_id, self.settings.message_page_size, None)
            .await
        {
            Ok(page) => {
                let merged = locked(&self.engine).merge_latest(&conversation_id, page);
                if merged > 0 {
                    info!(
                        conversation_id = %conversation_id,
                        merged,
                        "sync: merged missed messages"
                    );
                    self.commands.mark_read(&conversation_id).await;
                }
            }
            Err(err) => warn!(error = %format!("{err:#}"), "sync: catch-up message fetch failed"),
        }
    }

    pub async fn refresh_conversations(&self) -> Result<(), SyncError> {
        let conversations = self
            .api
            .list_conversations()
            .await
            .map_err(SyncError::query)?;
        locked(&self.engine).seed_conversations(conversations);
        Ok(())
    }

    /// Makes `conversation_id` the open conversation: joins its room, seeds
    /// detail and the newest page, and marks it read.
    pub async fn open_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), SyncError> {
        let previous = {
            let mut engine = locked(&self.engine);
            let previous = engine.open_conversation_id().cloned();
            engine.open_conversation(conversation_id.clone());
            previous
        };
        if let Some(previous) = previous.filter(|previous| previous != conversation_id) {
            self.stop_typing_in(&previous).await;
            self.commands.leave_room(&previous).await;
        }
        self.commands.join_room(conversation_id).await;

        match self.api.get_conversation(conversation_id).await {
            Ok(detail) => locked(&self.engine).seed_conversation_detail(detail),
            Err(err) => warn!(
                conversation_id = %conversation_id,
                error = %format!("{err:#}"),
                "sync: conversation detail fetch failed"
            ),
        }
        let page = self
            .api
            .list_messages(conversation_id, self.settings.message_page_size, None)
            .await
            .map_err(SyncError::query)?;
        let inserted = locked(&self.engine).seed_messages(conversation_id, page);
        debug!(conversation_id = %conversation_id, inserted, "sync: conversation opened");
        self.commands.mark_read(conversation_id).await;
        Ok(())
    }

    pub async fn close_conversation(&self) {
        let closed = locked(&self.engine).close_conversation();
        if let Some(conversation_id) = closed {
            self.stop_typing_in(&conversation_id).await;
            self.commands.leave_room(&conversation_id).await;
        }
    }

    /// Prepends the page older than the oldest loaded message. Returns how
    /// many messages were new.
    pub async fn load_older_messages(&self) -> Result<usize, SyncError> {
        let (conversation_id, oldest) = {
            let engine = locked(&self.engine);
            let Some(conversation_id) = engine.open_conversation_id().cloned() else {
                return Ok(0);
            };
            (conversation_id, engine.oldest_message_id().cloned())
        };
        let page = self
            .api
            .list_messages(
                &conversation_id,
                self.settings.message_page_size,
                oldest.as_ref(),
            )
            .await
            .map_err(SyncError::query)?;
        Ok(locked(&self.engine).seed_messages(&conversation_id, page))
    }

    pub async fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<(), SyncError> {
        self.commands.send_message(conversation_id, text).await?;
        self.stop_typing_in(conversation_id).await;
        Ok(())
    }

    pub async fn mark_read(&self, conversation_id: &ConversationId) {
        self.commands.mark_read(conversation_id).await;
    }

    /// Feeds a keystroke to the typing debouncer.
    pub async fn typing_input(self: &Arc<Self>, conversation_id: &ConversationId) {
        let signals = locked(&self.typing).on_input(conversation_id, Instant::now());
        for signal in signals {
            self.emit_typing(signal).await;
        }
        self.schedule_typing_stop();
    }

    /// The input lost focus; stops typing right away.
    pub async fn typing_blur(&self) {
        self.cancel_typing_timer();
        let signal = locked(&self.typing).on_blur();
        if let Some(signal) = signal {
            self.emit_typing(signal).await;
        }
    }

    async fn stop_typing_in(&self, conversation_id: &ConversationId) {
        let active = locked(&self.typing).active_conversation() == Some(conversation_id);
        if active {
            self.typing_blur().await;
        }
    }

    async fn emit_typing(&self, signal: TypingSignal) {
        match signal {
            TypingSignal::Start(conversation_id) => {
                self.commands.start_typing(&conversation_id).await
            }
            TypingSignal::Stop(conversation_id) => {
                self.commands.stop_typing(&conversation_id).await
            }
        }
    }

    fn schedule_typing_stop(self: &Arc<Self>) {
        let client = Arc::clone(self);
        let timer = tokio::spawn(async move {
            loop {
                let Some(deadline) = locked(&client.typing).next_deadline() else {
                    return;
                };
                tokio::time::sleep_until(deadline).await;
                let signal = locked(&client.typing).poll(Instant::now());
                if let Some(signal) = signal {
                    debug!("typing: idle timeout reached");
                    client.emit_typing(signal).await;
                    return;
                }
            }
        });
        if let Some(previous) = locked(&self.typing_timer).replace(timer) {
            previous.abort();
        }
    }

    fn cancel_typing_timer(&self) {
        if let Some(timer) = locked(&self.typing_timer).take() {
            timer.abort();
        }
    }

    pub async fn fetch_reactions(
        &self,
        message_id: &MessageId,
    ) -> Result<Vec<ReactionRecord>, SyncError> {
        self.api
            .list_reactions(message_id)
            .await
            .map_err(SyncError::query)
    }

    /// The mirror is updated when the server echoes the reaction event.
    pub async fn add_reaction(&self, message_id: &MessageId, emoji: &str) -> Result<(), SyncError> {
        self.api
            .add_reaction(message_id, emoji)
            .await
            .map_err(SyncError::query)
    }

    pub async fn remove_reaction(
        &self,
        message_id: &MessageId,
        emoji: &str,
    ) -> Result<(), SyncError> {
        self.api
            .remove_reaction(message_id, emoji)
            .await
            .map_err(SyncError::query)
    }

    /// Adds members optimistically; the member count is restored if the
    /// request fails.
    pub async fn add_members(
        &self,
        conversation_id: &ConversationId,
        user_ids: &[UserId],
    ) -> Result<(), SyncError> {
        locked(&self.engine).begin_member_change(
            conversation_id,
            user_ids,
            MembershipDirection::Added,
        );
        if let Err(err) = self.api.add_members(conversation_id, user_ids).await {
            locked(&self.engine).rollback_member_change(
                conversation_id,
                user_ids,
                MembershipDirection::Added,
            );
            return Err(SyncError::query(err));
        }
        Ok(())
    }

    pub async fn remove_member(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<(), SyncError> {
        let user_ids = [user_id.clone()];
        locked(&self.engine).begin_member_change(
            conversation_id,
            &user_ids,
            MembershipDirection::Removed,
        );
        if let Err(err) = self.api.remove_member(conversation_id, user_id).await {
            locked(&self.engine).rollback_member_change(
                conversation_id,
                &user_ids,
                MembershipDirection::Removed,
            );
            return Err(SyncError::query(err));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
