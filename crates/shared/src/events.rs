//! Event names exchanged with the realtime server.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Connect,
    Disconnect,
    ConnectError,
    MessageNew,
    MessageSent,
    MessageUpdated,
    MessageDeleted,
    MessageUnsent,
    MessageRead,
    ReactionAdded,
    ReactionRemoved,
    MessageMention,
    ConversationNew,
    ConversationUpdated,
    ConversationJoined,
    ConversationLeft,
    MemberAdded,
    MemberRemoved,
    TypingUpdate,
    UserStatus,
}

impl EventName {
    pub const ALL: [EventName; 20] = [
        EventName::Connect,
        EventName::Disconnect,
        EventName::ConnectError,
        EventName::MessageNew,
        EventName::MessageSent,
        EventName::MessageUpdated,
        EventName::MessageDeleted,
        EventName::MessageUnsent,
        EventName::MessageRead,
        EventName::ReactionAdded,
        EventName::ReactionRemoved,
        EventName::MessageMention,
        EventName::ConversationNew,
        EventName::ConversationUpdated,
        EventName::ConversationJoined,
        EventName::ConversationLeft,
        EventName::MemberAdded,
        EventName::MemberRemoved,
        EventName::TypingUpdate,
        EventName::UserStatus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventName::Connect => "connect",
            EventName::Disconnect => "disconnect",
            EventName::ConnectError => "connect_error",
            EventName::MessageNew => "message:new",
            EventName::MessageSent => "message:sent",
            EventName::MessageUpdated => "message:updated",
            EventName::MessageDeleted => "message:deleted",
            EventName::MessageUnsent => "message:unsent",
            EventName::MessageRead => "message:read",
            EventName::ReactionAdded => "message:reaction:added",
            EventName::ReactionRemoved => "message:reaction:removed",
            EventName::MessageMention => "message:mention",
            EventName::ConversationNew => "conversation:new",
            EventName::ConversationUpdated => "conversation:updated",
            EventName::ConversationJoined => "conversation:joined",
            EventName::ConversationLeft => "conversation:left",
            EventName::MemberAdded => "conversation:member:added",
            EventName::MemberRemoved => "conversation:member:removed",
            EventName::TypingUpdate => "typing:update",
            EventName::UserStatus => "user:status",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == name)
    }

    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            EventName::Connect | EventName::Disconnect | EventName::ConnectError
        )
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub mod outbound {
    pub const MESSAGE_SEND: &str = "message:send";
    pub const TYPING_START: &str = "typing:start";
    pub const TYPING_STOP: &str = "typing:stop";
    pub const MESSAGE_READ: &str = "message:read";
    pub const CONVERSATION_JOIN: &str = "conversation:join";
    pub const CONVERSATION_LEAVE: &str = "conversation:leave";
}
