use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    domain::{ConversationId, MessageId, PresenceStatus, UserId},
    error::MalformedEvent,
    events::{outbound, EventName},
};

/// Text frame exchanged over the realtime socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRecord {
    pub user_id: UserId,
    pub emoji: String,
}

/// Canonical message shape seen by reconciliation code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: Vec<ReactionRecord>,
    #[serde(default)]
    pub mentions: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub member_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_group: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationDetail {
    pub summary: ConversationSummary,
    pub members: Vec<MemberRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEdit {
    pub conversation_id: Option<ConversationId>,
    pub message_id: MessageId,
    pub content: String,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRemoval {
    pub conversation_id: Option<ConversationId>,
    pub message_id: MessageId,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionChange {
    pub conversation_id: Option<ConversationId>,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationPatch {
    pub id: ConversationId,
    pub name: Option<String>,
    pub member_count: Option<u32>,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub conversation_id: ConversationId,
    pub user_ids: Vec<UserId>,
    pub member_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUpdate {
    pub conversation_id: ConversationId,
    pub typing_users: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStatusChange {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

/// One inbound event after normalization; every variant has a single shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Connected,
    Disconnected { reason: String },
    ConnectError { message: String },
    MessageNew(MessageRecord),
    MessageSent(MessageRecord),
    MessageUpdated(MessageEdit),
    MessageDeleted(MessageRemoval),
    MessageUnsent(MessageRemoval),
    MessageRead(ReadReceipt),
    ReactionAdded(ReactionChange),
    ReactionRemoved(ReactionChange),
    MessageMention(MessageRecord),
    ConversationNew(ConversationPatch),
    ConversationUpdated(ConversationPatch),
    ConversationJoined(MembershipChange),
    ConversationLeft(MembershipChange),
    MemberAdded(MembershipChange),
    MemberRemoved(MembershipChange),
    TypingUpdate(TypingUpdate),
    UserStatus(UserStatusChange),
}

impl InboundEvent {
    pub fn name(&self) -> EventName {
        match self {
            InboundEvent::Connected => EventName::Connect,
            InboundEvent::Disconnected { .. } => EventName::Disconnect,
            InboundEvent::ConnectError { .. } => EventName::ConnectError,
            InboundEvent::MessageNew(_) => EventName::MessageNew,
            InboundEvent::MessageSent(_) => EventName::MessageSent,
            InboundEvent::MessageUpdated(_) => EventName::MessageUpdated,
            InboundEvent::MessageDeleted(_) => EventName::MessageDeleted,
            InboundEvent::MessageUnsent(_) => EventName::MessageUnsent,
            InboundEvent::MessageRead(_) => EventName::MessageRead,
            InboundEvent::ReactionAdded(_) => EventName::ReactionAdded,
            InboundEvent::ReactionRemoved(_) => EventName::ReactionRemoved,
            InboundEvent::MessageMention(_) => EventName::MessageMention,
            InboundEvent::ConversationNew(_) => EventName::ConversationNew,
            InboundEvent::ConversationUpdated(_) => EventName::ConversationUpdated,
            InboundEvent::ConversationJoined(_) => EventName::ConversationJoined,
            InboundEvent::ConversationLeft(_) => EventName::ConversationLeft,
            InboundEvent::MemberAdded(_) => EventName::MemberAdded,
            InboundEvent::MemberRemoved(_) => EventName::MemberRemoved,
            InboundEvent::TypingUpdate(_) => EventName::TypingUpdate,
            InboundEvent::UserStatus(_) => EventName::UserStatus,
        }
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            InboundEvent::MessageNew(message)
            | InboundEvent::MessageSent(message)
            | InboundEvent::MessageMention(message) => Some(&message.conversation_id),
            InboundEvent::MessageUpdated(edit) => edit.conversation_id.as_ref(),
            InboundEvent::MessageDeleted(removal) | InboundEvent::MessageUnsent(removal) => {
                removal.conversation_id.as_ref()
            }
            InboundEvent::MessageRead(receipt) => Some(&receipt.conversation_id),
            InboundEvent::ReactionAdded(change) | InboundEvent::ReactionRemoved(change) => {
                change.conversation_id.as_ref()
            }
            InboundEvent::ConversationNew(patch) | InboundEvent::ConversationUpdated(patch) => {
                Some(&patch.id)
            }
            InboundEvent::ConversationJoined(change)
            | InboundEvent::ConversationLeft(change)
            | InboundEvent::MemberAdded(change)
            | InboundEvent::MemberRemoved(change) => Some(&change.conversation_id),
            InboundEvent::TypingUpdate(update) => Some(&update.conversation_id),
            InboundEvent::Connected
            | InboundEvent::Disconnected { .. }
            | InboundEvent::ConnectError { .. }
            | InboundEvent::UserStatus(_) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireUserRef {
    Id(UserId),
    Object {
        #[serde(alias = "_id", alias = "userId")]
        id: UserId,
    },
}

impl WireUserRef {
    fn into_id(self) -> UserId {
        match self {
            WireUserRef::Id(id) | WireUserRef::Object { id } => id,
        }
    }
}

/// Loose message shape accepted from the server and the REST API.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default, alias = "_id", alias = "messageId")]
    id: Option<MessageId>,
    #[serde(default, alias = "conversation")]
    conversation_id: Option<ConversationId>,
    #[serde(default, alias = "sender")]
    sender_id: Option<WireUserRef>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    unsent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    reactions: Vec<ReactionRecord>,
    #[serde(default)]
    mentions: Vec<WireUserRef>,
}

impl WireMessage {
    /// Fields missing on `self` are taken from `outer`.
    fn or(self, outer: WireMessage) -> WireMessage {
        WireMessage {
            id: self.id.or(outer.id),
            conversation_id: self.conversation_id.or(outer.conversation_id),
            sender_id: self.sender_id.or(outer.sender_id),
            content: self.content.or(outer.content),
            created_at: self.created_at.or(outer.created_at),
            edited_at: self.edited_at.or(outer.edited_at),
            deleted_at: self.deleted_at.or(outer.deleted_at),
            unsent_at: self.unsent_at.or(outer.unsent_at),
            reactions: if self.reactions.is_empty() {
                outer.reactions
            } else {
                self.reactions
            },
            mentions: if self.mentions.is_empty() {
                outer.mentions
            } else {
                self.mentions
            },
        }
    }

    pub fn into_record(
        self,
        event: &str,
        fallback_conversation: Option<&ConversationId>,
        received_at: DateTime<Utc>,
    ) -> Result<MessageRecord, MalformedEvent> {
        let id = self
            .id
            .filter(|id| !id.is_blank())
            .ok_or_else(|| MalformedEvent::new(event, "missing message id"))?;
        let conversation_id = self
            .conversation_id
            .or_else(|| fallback_conversation.cloned())
            .filter(|id| !id.is_blank())
            .ok_or_else(|| MalformedEvent::new(event, "missing conversation reference"))?;
        Ok(MessageRecord {
            id,
            conversation_id,
            sender_id: self.sender_id.map(WireUserRef::into_id),
            content: self.content.unwrap_or_default(),
            created_at: self.created_at.unwrap_or(received_at),
            edited_at: self.edited_at,
            deleted_at: self.deleted_at,
            unsent_at: self.unsent_at,
            reactions: self.reactions,
            mentions: self.mentions.into_iter().map(WireUserRef::into_id).collect(),
        })
    }
}

/// Loose conversation shape accepted from the server and the REST API.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConversation {
    #[serde(default, alias = "_id", alias = "conversationId")]
    id: Option<ConversationId>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    member_count: Option<u32>,
    #[serde(default, alias = "participants")]
    members: Option<Vec<WireMember>>,
    #[serde(default, alias = "lastMessageTime")]
    last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    unread_count: Option<u32>,
    #[serde(default)]
    is_group: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireMember {
    Id(UserId),
    Record {
        #[serde(alias = "userId", alias = "_id", alias = "id")]
        user_id: UserId,
        #[serde(default, alias = "name")]
        username: Option<String>,
    },
}

impl WireMember {
    fn into_record(self) -> MemberRecord {
        match self {
            WireMember::Id(user_id) => MemberRecord {
                user_id,
                username: None,
            },
            WireMember::Record { user_id, username } => MemberRecord { user_id, username },
        }
    }
}

impl WireConversation {
    fn or(self, outer: WireConversation) -> WireConversation {
        WireConversation {
            id: self.id.or(outer.id),
            name: self.name.or(outer.name),
            member_count: self.member_count.or(outer.member_count),
            members: self.members.or(outer.members),
            last_message_at: self.last_message_at.or(outer.last_message_at),
            unread_count: self.unread_count.or(outer.unread_count),
            is_group: self.is_group.or(outer.is_group),
        }
    }

    fn member_count(&self) -> Option<u32> {
        self.member_count.or_else(|| {
            self.members
                .as_ref()
                .map(|members| u32::try_from(members.len()).unwrap_or(u32::MAX))
        })
    }

    fn require_id(&self, event: &str) -> Result<ConversationId, MalformedEvent> {
        self.id
            .clone()
            .filter(|id| !id.is_blank())
            .ok_or_else(|| MalformedEvent::new(event, "missing conversation id"))
    }

    pub fn into_patch(self, event: &str) -> Result<ConversationPatch, MalformedEvent> {
        Ok(ConversationPatch {
            id: self.require_id(event)?,
            member_count: self.member_count(),
            name: self.name,
            last_message_at: self.last_message_at,
        })
    }

    pub fn into_detail(self, event: &str) -> Result<ConversationDetail, MalformedEvent> {
        let id = self.require_id(event)?;
        let member_count = self.member_count().unwrap_or_default();
        let members = self
            .members
            .unwrap_or_default()
            .into_iter()
            .map(WireMember::into_record)
            .collect();
        Ok(ConversationDetail {
            summary: ConversationSummary {
                id,
                name: self.name,
                member_count,
                last_message_at: self.last_message_at,
                unread_count: self.unread_count.unwrap_or_default(),
                is_group: self.is_group.unwrap_or(false),
            },
            members,
        })
    }

    pub fn into_summary(self, event: &str) -> Result<ConversationSummary, MalformedEvent> {
        self.into_detail(event).map(|detail| detail.summary)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRead {
    #[serde(default, alias = "conversation")]
    conversation_id: Option<ConversationId>,
    #[serde(default, alias = "readBy", alias = "reader")]
    user_id: Option<UserId>,
    #[serde(default, alias = "timestamp", alias = "lastReadAt")]
    read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReaction {
    #[serde(default)]
    message_id: Option<MessageId>,
    #[serde(default)]
    conversation_id: Option<ConversationId>,
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(default, alias = "type")]
    emoji: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMembership {
    #[serde(default, alias = "conversation")]
    conversation_id: Option<ConversationId>,
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(default, alias = "members", alias = "memberIds")]
    user_ids: Option<Vec<WireUserRef>>,
    #[serde(default)]
    member_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTyping {
    #[serde(default)]
    conversation_id: Option<ConversationId>,
    #[serde(default, alias = "users")]
    typing_users: Option<Vec<UserId>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUserStatus {
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(default)]
    status: Option<PresenceStatus>,
    #[serde(default)]
    last_seen: Option<DateTime<Utc>>,
}

fn decode<T: DeserializeOwned>(event: EventName, payload: &Value) -> Result<T, MalformedEvent> {
    serde_json::from_value(payload.clone())
        .map_err(|err| MalformedEvent::new(event.as_str(), err.to_string()))
}

/// The object nested under `field`, if the payload wraps its entity.
fn nested<'a>(payload: &'a Value, field: &str) -> Option<&'a Value> {
    payload.get(field).filter(|inner| inner.is_object())
}

fn text_field(payload: &Value, field: &str) -> Option<String> {
    match payload {
        Value::String(text) => Some(text.clone()),
        Value::Object(map) => map.get(field).and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn decode_message(
    event: EventName,
    payload: &Value,
    received_at: DateTime<Utc>,
) -> Result<MessageRecord, MalformedEvent> {
    let outer: WireMessage = decode(event, payload)?;
    let merged = match nested(payload, "message") {
        Some(inner) => decode::<WireMessage>(event, inner)?.or(outer),
        None => outer,
    };
    merged.into_record(event.as_str(), None, received_at)
}

/// Locates the target message of an update/delete/unsend, whichever shape it arrives in.
fn decode_message_target(
    event: EventName,
    payload: &Value,
) -> Result<(MessageId, WireMessage), MalformedEvent> {
    let outer: WireMessage = decode(event, payload)?;
    let merged = match nested(payload, "message") {
        Some(inner) => decode::<WireMessage>(event, inner)?.or(outer),
        None => outer,
    };
    let id = merged
        .id
        .clone()
        .filter(|id| !id.is_blank())
        .ok_or_else(|| MalformedEvent::new(event.as_str(), "missing message id"))?;
    Ok((id, merged))
}

fn decode_membership(
    event: EventName,
    payload: &Value,
) -> Result<MembershipChange, MalformedEvent> {
    let wire: WireMembership = decode(event, payload)?;
    let conversation_id = wire
        .conversation_id
        .filter(|id| !id.is_blank())
        .ok_or_else(|| MalformedEvent::new(event.as_str(), "missing conversation reference"))?;
    let mut user_ids: Vec<UserId> = wire
        .user_ids
        .unwrap_or_default()
        .into_iter()
        .map(WireUserRef::into_id)
        .collect();
    if let Some(user_id) = wire.user_id {
        if !user_ids.contains(&user_id) {
            user_ids.push(user_id);
        }
    }
    Ok(MembershipChange {
        conversation_id,
        user_ids,
        member_count: wire.member_count,
    })
}

fn decode_conversation(
    event: EventName,
    payload: &Value,
) -> Result<ConversationPatch, MalformedEvent> {
    let outer: WireConversation = decode(event, payload)?;
    let merged = match nested(payload, "conversation") {
        Some(inner) => decode::<WireConversation>(event, inner)?.or(outer),
        None => outer,
    };
    merged.into_patch(event.as_str())
}

fn decode_reaction(event: EventName, payload: &Value) -> Result<ReactionChange, MalformedEvent> {
    let outer: WireReaction = decode(event, payload)?;
    let inner: WireReaction = match nested(payload, "reaction") {
        Some(inner) => decode(event, inner)?,
        None => WireReaction::default(),
    };
    let message_id = outer
        .message_id
        .or(inner.message_id)
        .filter(|id| !id.is_blank())
        .ok_or_else(|| MalformedEvent::new(event.as_str(), "missing message id"))?;
    let user_id = inner
        .user_id
        .or(outer.user_id)
        .ok_or_else(|| MalformedEvent::new(event.as_str(), "missing user id"))?;
    let emoji = inner
        .emoji
        .or(outer.emoji)
        .filter(|emoji| !emoji.is_empty())
        .ok_or_else(|| MalformedEvent::new(event.as_str(), "missing emoji"))?;
    Ok(ReactionChange {
        conversation_id: outer.conversation_id.or(inner.conversation_id),
        message_id,
        user_id,
        emoji,
    })
}

/// Converts a raw payload into its canonical [`InboundEvent`].
///
/// Entity events may nest the entity under a named field (`message`,
/// `conversation`, `reaction`) or be the entity itself; both are accepted and
/// nested fields win over outer ones. `received_at` stands in for timestamps
/// the payload omits.
pub fn normalize(
    event: EventName,
    payload: &Value,
    received_at: DateTime<Utc>,
) -> Result<InboundEvent, MalformedEvent> {
    let name = event.as_str();
    match event {
        EventName::Connect => Ok(InboundEvent::Connected),
        EventName::Disconnect => Ok(InboundEvent::Disconnected {
            reason: text_field(payload, "reason").unwrap_or_else(|| "unknown".to_string()),
        }),
        EventName::ConnectError => Ok(InboundEvent::ConnectError {
            message: text_field(payload, "message")
                .unwrap_or_else(|| "connection failed".to_string()),
        }),
        EventName::MessageNew => {
            decode_message(event, payload, received_at).map(InboundEvent::MessageNew)
        }
        EventName::MessageSent => {
            decode_message(event, payload, received_at).map(InboundEvent::MessageSent)
        }
        EventName::MessageMention => {
            decode_message(event, payload, received_at).map(InboundEvent::MessageMention)
        }
        EventName::MessageUpdated => {
            let (message_id, wire) = decode_message_target(event, payload)?;
            let content = wire
                .content
                .ok_or_else(|| MalformedEvent::new(name, "missing content"))?;
            Ok(InboundEvent::MessageUpdated(MessageEdit {
                conversation_id: wire.conversation_id,
                message_id,
                content,
                edited_at: wire.edited_at.unwrap_or(received_at),
            }))
        }
        EventName::MessageDeleted => {
            let (message_id, wire) = decode_message_target(event, payload)?;
            Ok(InboundEvent::MessageDeleted(MessageRemoval {
                conversation_id: wire.conversation_id,
                message_id,
                at: wire.deleted_at.unwrap_or(received_at),
            }))
        }
        EventName::MessageUnsent => {
            let (message_id, wire) = decode_message_target(event, payload)?;
            Ok(InboundEvent::MessageUnsent(MessageRemoval {
                conversation_id: wire.conversation_id,
                message_id,
                at: wire.unsent_at.unwrap_or(received_at),
            }))
        }
        EventName::MessageRead => {
            let wire: WireRead = decode(event, payload)?;
            Ok(InboundEvent::MessageRead(ReadReceipt {
                conversation_id: wire
                    .conversation_id
                    .filter(|id| !id.is_blank())
                    .ok_or_else(|| MalformedEvent::new(name, "missing conversation reference"))?,
                user_id: wire
                    .user_id
                    .filter(|id| !id.is_blank())
                    .ok_or_else(|| MalformedEvent::new(name, "missing user id"))?,
                read_at: wire.read_at,
            }))
        }
        EventName::ReactionAdded => {
            decode_reaction(event, payload).map(InboundEvent::ReactionAdded)
        }
        EventName::ReactionRemoved => {
            decode_reaction(event, payload).map(InboundEvent::ReactionRemoved)
        }
        EventName::ConversationNew => {
            decode_conversation(event, payload).map(InboundEvent::ConversationNew)
        }
        EventName::ConversationUpdated => {
            decode_conversation(event, payload).map(InboundEvent::ConversationUpdated)
        }
        EventName::ConversationJoined => {
            decode_membership(event, payload).map(InboundEvent::ConversationJoined)
        }
        EventName::ConversationLeft => {
            decode_membership(event, payload).map(InboundEvent::ConversationLeft)
        }
        EventName::MemberAdded => decode_membership(event, payload).map(InboundEvent::MemberAdded),
        EventName::MemberRemoved => {
            decode_membership(event, payload).map(InboundEvent::MemberRemoved)
        }
        EventName::TypingUpdate => {
            let wire: WireTyping = decode(event, payload)?;
            Ok(InboundEvent::TypingUpdate(TypingUpdate {
                conversation_id: wire
                    .conversation_id
                    .filter(|id| !id.is_blank())
                    .ok_or_else(|| MalformedEvent::new(name, "missing conversation reference"))?,
                typing_users: wire
                    .typing_users
                    .ok_or_else(|| MalformedEvent::new(name, "missing typingUsers"))?,
            }))
        }
        EventName::UserStatus => {
            let wire: WireUserStatus = decode(event, payload)?;
            Ok(InboundEvent::UserStatus(UserStatusChange {
                user_id: wire
                    .user_id
                    .filter(|id| !id.is_blank())
                    .ok_or_else(|| MalformedEvent::new(name, "missing user id"))?,
                status: wire.status.unwrap_or(PresenceStatus::Unknown),
                last_seen: wire.last_seen,
            }))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    SendMessage {
        conversation_id: ConversationId,
        message: String,
    },
    TypingStart {
        conversation_id: ConversationId,
    },
    TypingStop {
        conversation_id: ConversationId,
    },
    MarkRead {
        conversation_id: ConversationId,
    },
    JoinRoom {
        conversation_id: ConversationId,
    },
    LeaveRoom {
        conversation_id: ConversationId,
    },
}

impl OutboundCommand {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundCommand::SendMessage { .. } => outbound::MESSAGE_SEND,
            OutboundCommand::TypingStart { .. } => outbound::TYPING_START,
            OutboundCommand::TypingStop { .. } => outbound::TYPING_STOP,
            OutboundCommand::MarkRead { .. } => outbound::MESSAGE_READ,
            OutboundCommand::JoinRoom { .. } => outbound::CONVERSATION_JOIN,
            OutboundCommand::LeaveRoom { .. } => outbound::CONVERSATION_LEAVE,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            OutboundCommand::SendMessage {
                conversation_id, ..
            }
            | OutboundCommand::TypingStart { conversation_id }
            | OutboundCommand::TypingStop { conversation_id }
            | OutboundCommand::MarkRead { conversation_id }
            | OutboundCommand::JoinRoom { conversation_id }
            | OutboundCommand::LeaveRoom { conversation_id } => conversation_id,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            OutboundCommand::SendMessage {
                conversation_id,
                message,
            } => json!({ "conversationId": conversation_id, "message": message }),
            _ => json!({ "conversationId": self.conversation_id() }),
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
