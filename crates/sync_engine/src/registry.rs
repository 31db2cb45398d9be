//! Routes normalized inbound events to subscribers.
//!
//! Handlers live in generation-tagged slots; a [`SubscriptionToken`] names a
//! slot and the generation it was issued for, so a revoked or reused slot is
//! never invoked through a stale token. Dispatch snapshots the handler list
//! and releases the lock before invoking anything, which lets handlers
//! subscribe or unsubscribe while an event is being delivered.

use std::{
    any::Any,
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::{domain::ConversationId, events::EventName, protocol::InboundEvent};
use tracing::{error, warn};

use crate::event_log::{EventCategory, EventLog, EventLogEntry};

pub type EventHandler = Arc<dyn Fn(&InboundEvent) -> anyhow::Result<()> + Send + Sync>;
pub type DiagnosticHandler = Arc<dyn Fn(&EventLogEntry) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Conversation(ConversationId),
    AllConversations,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub event: EventName,
    pub scope: Scope,
}

impl SubscriptionKey {
    pub fn global(event: EventName) -> Self {
        let scope = if event == EventName::TypingUpdate {
            Scope::AllConversations
        } else {
            Scope::Global
        };
        Self { event, scope }
    }

    pub fn typing(conversation_id: Option<ConversationId>) -> Self {
        Self {
            event: EventName::TypingUpdate,
            scope: conversation_id.map_or(Scope::AllConversations, Scope::Conversation),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    slot: usize,
    generation: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

enum SlotEntry {
    Event {
        key: SubscriptionKey,
        handler: EventHandler,
    },
    Diagnostic(DiagnosticHandler),
}

struct Slot {
    generation: u64,
    entry: Option<SlotEntry>,
}

struct RegistryState {
    slots: Vec<Slot>,
    free: Vec<usize>,
    order: HashMap<SubscriptionKey, Vec<SubscriptionToken>>,
    diagnostics: Vec<SubscriptionToken>,
    log: EventLog,
}

impl RegistryState {
    fn allocate(&mut self, entry: SlotEntry) -> SubscriptionToken {
        if let Some(slot) = self.free.pop() {
            let target = &mut self.slots[slot];
            target.entry = Some(entry);
            return SubscriptionToken {
                slot,
                generation: target.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });
        SubscriptionToken {
            slot: self.slots.len() - 1,
            generation: 0,
        }
    }

    fn is_live(&self, token: SubscriptionToken) -> bool {
        self.slots
            .get(token.slot)
            .is_some_and(|slot| slot.generation == token.generation && slot.entry.is_some())
    }

    fn event_handlers(&self, key: &SubscriptionKey) -> Vec<(SubscriptionToken, EventHandler)> {
        let Some(tokens) = self.order.get(key) else {
            return Vec::new();
        };
        tokens
            .iter()
            .filter_map(|token| match &self.slots[token.slot].entry {
                Some(SlotEntry::Event { handler, .. }) => Some((*token, Arc::clone(handler))),
                _ => None,
            })
            .collect()
    }
}

pub struct EventRegistry {
    state: Mutex<RegistryState>,
}

impl EventRegistry {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                slots: Vec::new(),
                free: Vec::new(),
                order: HashMap::new(),
                diagnostics: Vec::new(),
                log: EventLog::new(log_capacity),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe<F>(&self, key: SubscriptionKey, handler: F) -> SubscriptionToken
    where
        F: Fn(&InboundEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut state = self.lock();
        let token = state.allocate(SlotEntry::Event {
            key: key.clone(),
            handler: Arc::new(handler),
        });
        state.order.entry(key).or_default().push(token);
        token
    }

    /// Observes every log entry, including events nobody subscribed to and
    /// payloads that failed normalization.
    pub fn subscribe_diagnostics<F>(&self, handler: F) -> SubscriptionToken
    where
        F: Fn(&EventLogEntry) + Send + Sync + 'static,
    {
        let mut state = self.lock();
        let token = state.allocate(SlotEntry::Diagnostic(Arc::new(handler)));
        state.diagnostics.push(token);
        token
    }

    /// Revokes a subscription. Returns false for tokens that are already revoked.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut state = self.lock();
        if !state.is_live(token) {
            return false;
        }
        let slot = &mut state.slots[token.slot];
        let entry = slot.entry.take();
        slot.generation += 1;
        state.free.push(token.slot);
        match entry {
            Some(SlotEntry::Event { key, .. }) => {
                if let Some(tokens) = state.order.get_mut(&key) {
                    tokens.retain(|existing| *existing != token);
                    if tokens.is_empty() {
                        state.order.remove(&key);
                    }
                }
            }
            Some(SlotEntry::Diagnostic(_)) => {
                state.diagnostics.retain(|existing| *existing != token)
            }
            None => {}
        }
        true
    }

    pub fn subscriber_count(&self, key: &SubscriptionKey) -> usize {
        self.lock().order.get(key).map_or(0, Vec::len)
    }

    /// Logs the event, then delivers it to every matching handler in
    /// registration order. Typing updates reach conversation-scoped
    /// subscribers first and wildcard subscribers after them.
    pub fn dispatch(&self, event: &InboundEvent, raw: &Value, at: DateTime<Utc>) -> DispatchReport {
        let name = event.name();
        let category = if name.is_lifecycle() {
            EventCategory::Lifecycle
        } else {
            EventCategory::Inbound
        };
        let entry = EventLogEntry {
            category,
            name: name.as_str().to_string(),
            timestamp: at,
            payload: raw.clone(),
        };

        let (diagnostics, handlers) = {
            let mut state = self.lock();
            state.log.append(entry.clone());
            let mut handlers = Vec::new();
            if name == EventName::TypingUpdate {
                if let Some(conversation_id) = event.conversation_id() {
                    let scoped = SubscriptionKey::typing(Some(conversation_id.clone()));
                    handlers.extend(state.event_handlers(&scoped));
                }
                handlers.extend(state.event_handlers(&SubscriptionKey::typing(None)));
            } else {
                handlers.extend(state.event_handlers(&SubscriptionKey::global(name)));
            }
            (self.diagnostic_handlers(&state), handlers)
        };

        notify_diagnostics(&diagnostics, &entry);

        let mut report = DispatchReport::default();
        for (token, handler) in handlers {
            if !self.lock().is_live(token) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(event = %name, error = %format!("{err:#}"), "dispatch: handler failed");
                }
                Err(panic) => {
                    report.failed += 1;
                    error!(
                        event = %name,
                        panic = %panic_message(&*panic),
                        "dispatch: handler panicked"
                    );
                }
            }
        }
        report
    }

    /// Records a payload that was dropped before dispatch.
    pub fn record_malformed(&self, name: &str, raw: &Value, reason: &str, at: DateTime<Utc>) {
        let entry = EventLogEntry {
            category: EventCategory::Malformed,
            name: name.to_string(),
            timestamp: at,
            payload: serde_json::json!({ "reason": reason, "payload": raw }),
        };
        let diagnostics = {
            let mut state = self.lock();
            state.log.append(entry.clone());
            self.diagnostic_handlers(&state)
        };
        notify_diagnostics(&diagnostics, &entry);
    }

    fn diagnostic_handlers(&self, state: &RegistryState) -> Vec<DiagnosticHandler> {
        state
            .diagnostics
            .iter()
            .filter_map(|token| match &state.slots[token.slot].entry {
                Some(SlotEntry::Diagnostic(handler)) => Some(Arc::clone(handler)),
                _ => None,
            })
            .collect()
    }

    pub fn latest(&self, name: &str) -> Option<EventLogEntry> {
        self.lock().log.latest(name).cloned()
    }

    pub fn log_snapshot(&self) -> Vec<EventLogEntry> {
        self.lock().log.entries().cloned().collect()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }
}

fn notify_diagnostics(handlers: &[DiagnosticHandler], entry: &EventLogEntry) {
    for handler in handlers {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(entry))) {
            error!(
                event = %entry.name,
                panic = %panic_message(&*panic),
                "dispatch: diagnostic observer panicked"
            );
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
