//! Local typing debouncer.
//!
//! Turns a stream of keystrokes into at most one `typing:start` per start
//! window and a `typing:stop` after the idle timeout or on blur. Time is passed
//! in by the caller so the state machine stays deterministic.

use std::time::Duration;

use shared::domain::ConversationId;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingSignal {
    Start(ConversationId),
    Stop(ConversationId),
}

#[derive(Debug)]
struct ActiveTyping {
    conversation_id: ConversationId,
    started_at: Instant,
    last_input: Instant,
}

#[derive(Debug)]
pub struct TypingDebouncer {
    start_window: Duration,
    idle_timeout: Duration,
    active: Option<ActiveTyping>,
}

impl TypingDebouncer {
    pub fn new(start_window: Duration, idle_timeout: Duration) -> Self {
        Self {
            start_window,
            idle_timeout,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.active.as_ref().map(|active| &active.conversation_id)
    }

    /// Records a keystroke. Typing into a different conversation stops the
    /// previous one first.
    pub fn on_input(
        &mut self,
        conversation_id: &ConversationId,
        now: Instant,
    ) -> Vec<TypingSignal> {
        let mut signals = Vec::new();
        match self.active.as_mut() {
            Some(active) if active.conversation_id == *conversation_id => {
                active.last_input = now;
                if now.saturating_duration_since(active.started_at) >= self.start_window {
                    active.started_at = now;
                    signals.push(TypingSignal::Start(conversation_id.clone()));
                }
                return signals;
            }
            Some(active) => signals.push(TypingSignal::Stop(active.conversation_id.clone())),
            None => {}
        }
        self.active = Some(ActiveTyping {
            conversation_id: conversation_id.clone(),
            started_at: now,
            last_input: now,
        });
        signals.push(TypingSignal::Start(conversation_id.clone()));
        signals
    }

    /// Emits the stop signal once the idle timeout has passed since the last
    /// keystroke.
    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        let deadline = self.next_deadline()?;
        if now < deadline {
            return None;
        }
        self.active
            .take()
            .map(|active| TypingSignal::Stop(active.conversation_id))
    }

    pub fn on_blur(&mut self) -> Option<TypingSignal> {
        self.active
            .take()
            .map(|active| TypingSignal::Stop(active.conversation_id))
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.active
            .as_ref()
            .map(|active| active.last_input + self.idle_timeout)
    }

    /// Forgets local typing state without emitting anything.
    pub fn reset(&mut self) {
        self.active = None;
    }
}
