use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use shared::{domain::ConversationId, protocol::OutboundCommand};
use tracing::{debug, warn};

use crate::{connection::ConnectionManager, error::SyncError, transport::Transport};

/// Turns local intents into transport emissions. Everything except
/// `send_message` is dropped quietly while the connection is not up.
pub struct CommandFacade {
    transport: Arc<dyn Transport>,
    connection: Arc<ConnectionManager>,
    joined: Mutex<BTreeSet<ConversationId>>,
}

impl CommandFacade {
    pub fn new(transport: Arc<dyn Transport>, connection: Arc<ConnectionManager>) -> Self {
        Self {
            transport,
            connection,
            joined: Mutex::new(BTreeSet::new()),
        }
    }

    fn joined(&self) -> MutexGuard<'_, BTreeSet<ConversationId>> {
        self.joined.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn send_message(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<(), SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::SendFailure("message is empty".into()));
        }
        if !self.connection.is_connected() {
            return Err(SyncError::SendFailure("not connected".into()));
        }
        let command = OutboundCommand::SendMessage {
            conversation_id: conversation_id.clone(),
            message: text.to_string(),
        };
        self.transport
            .emit(command.event_name(), command.payload())
            .await
            .map_err(|err| SyncError::SendFailure(format!("{err:#}")))
    }

    pub async fn start_typing(&self, conversation_id: &ConversationId) {
        self.emit_if_connected(OutboundCommand::TypingStart {
            conversation_id: conversation_id.clone(),
        })
        .await;
    }

    pub async fn stop_typing(&self, conversation_id: &ConversationId) {
        self.emit_if_connected(OutboundCommand::TypingStop {
            conversation_id: conversation_id.clone(),
        })
        .await;
    }

    pub async fn mark_read(&self, conversation_id: &ConversationId) {
        self.emit_if_connected(OutboundCommand::MarkRead {
            conversation_id: conversation_id.clone(),
        })
        .await;
    }

    /// Joins the conversation's room once; repeated joins emit nothing.
    pub async fn join_room(&self, conversation_id: &ConversationId) {
        if !self.connection.is_connected() {
            debug!(conversation_id = %conversation_id, "commands: dropping join while offline");
            return;
        }
        if !self.joined().insert(conversation_id.clone()) {
            return;
        }
        let emitted = self
            .emit_if_connected(OutboundCommand::JoinRoom {
                conversation_id: conversation_id.clone(),
            })
            .await;
        if !emitted {
            self.joined().remove(conversation_id);
        }
    }

    pub async fn leave_room(&self, conversation_id: &ConversationId) {
        if !self.joined().remove(conversation_id) {
            return;
        }
        self.emit_if_connected(OutboundCommand::LeaveRoom {
            conversation_id: conversation_id.clone(),
        })
        .await;
    }

    /// Re-announces every joined room on a re-established socket.
    pub async fn rejoin_rooms(&self) {
        let rooms: Vec<ConversationId> = self.joined().iter().cloned().collect();
        for conversation_id in rooms {
            self.emit_if_connected(OutboundCommand::JoinRoom { conversation_id })
                .await;
        }
    }

    pub fn forget_rooms(&self) {
        self.joined().clear();
    }

    pub fn joined_rooms(&self) -> Vec<ConversationId> {
        self.joined().iter().cloned().collect()
    }

    async fn emit_if_connected(&self, command: OutboundCommand) -> bool {
        if !self.connection.is_connected() {
            debug!(
                event = command.event_name(),
                conversation_id = %command.conversation_id(),
                "commands: dropping command while offline"
            );
            return false;
        }
        match self
            .transport
            .emit(command.event_name(), command.payload())
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    event = command.event_name(),
                    error = %format!("{err:#}"),
                    "commands: emit failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use shared::domain::UserId;

    use super::*;
    use crate::transport::{ChannelTransport, Credentials};

    async fn connected() -> (ChannelTransport, CommandFacade) {
        let transport = ChannelTransport::new();
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(transport.clone()),
            std::time::Duration::from_secs(20),
        ));
        connection.set_identity(Credentials::new(UserId::from("u1")));
        connection.connect("ws://local").await.expect("connect");
        let facade = CommandFacade::new(Arc::new(transport.clone()), connection);
        (transport, facade)
    }

    #[tokio::test]
    async fn send_message_carries_conversation_and_text() {
        let (transport, facade) = connected().await;
        facade
            .send_message(&ConversationId::from("c1"), "hello")
            .await
            .expect("send");
        assert_eq!(
            transport.emitted(),
            vec![(
                "message:send".to_string(),
                json!({ "conversationId": "c1", "message": "hello" })
            )]
        );
    }

    #[tokio::test]
    async fn send_message_reports_offline_and_emit_failures() {
        let transport = ChannelTransport::new();
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(transport.clone()),
            std::time::Duration::from_secs(20),
        ));
        let facade = CommandFacade::new(Arc::new(transport.clone()), connection);
        let err = facade
            .send_message(&ConversationId::from("c1"), "hello")
            .await
            .expect_err("offline");
        assert!(matches!(err, SyncError::SendFailure(_)));

        let (transport, facade) = connected().await;
        transport.fail_emits(Some("socket gone".into()));
        let err = facade
            .send_message(&ConversationId::from("c1"), "hello")
            .await
            .expect_err("emit failure");
        assert!(err.to_string().contains("socket gone"));
    }

    #[tokio::test]
    async fn other_commands_are_dropped_while_offline() {
        let transport = ChannelTransport::new();
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(transport.clone()),
            std::time::Duration::from_secs(20),
        ));
        let facade = CommandFacade::new(Arc::new(transport.clone()), connection);
        let c1 = ConversationId::from("c1");
        facade.start_typing(&c1).await;
        facade.stop_typing(&c1).await;
        facade.mark_read(&c1).await;
        facade.join_room(&c1).await;
        assert!(transport.emitted().is_empty());
        assert!(facade.joined_rooms().is_empty());
    }

    #[tokio::test]
    async fn join_and_leave_are_idempotent() {
        let (transport, facade) = connected().await;
        let c1 = ConversationId::from("c1");
        facade.join_room(&c1).await;
        facade.join_room(&c1).await;
        facade.leave_room(&c1).await;
        facade.leave_room(&c1).await;
        assert_eq!(
            transport.emitted_names(),
            vec!["conversation:join".to_string(), "conversation:leave".to_string()]
        );
    }

    #[tokio::test]
    async fn rejoin_reannounces_joined_rooms() {
        let (transport, facade) = connected().await;
        facade.join_room(&ConversationId::from("c1")).await;
        facade.join_room(&ConversationId::from("c2")).await;
        transport.clear_emitted();

        facade.rejoin_rooms().await;
        assert_eq!(
            transport.emitted(),
            vec![
                ("conversation:join".to_string(), json!({ "conversationId": "c1" })),
                ("conversation:join".to_string(), json!({ "conversationId": "c2" })),
            ]
        );
    }
}
