//! Local mirror of server-owned conversation state.
//!
//! [`ReconciliationEngine`] is the only owner of the mirrors. It never
//! suspends and never reorders: every inbound event is applied in delivery
//! order, and out-of-order content is handled by comparing timestamps and ids
//! instead. Work that needs the network (marking read, refetching the list)
//! is returned as [`EngineEffect`]s for the caller to carry out.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, MessageId, PresenceStatus, UserId},
    protocol::{
        ConversationDetail, ConversationPatch, ConversationSummary, InboundEvent, MemberRecord,
        MembershipChange, MessageEdit, MessageRecord, MessageRemoval, ReactionChange,
        ReadReceipt, TypingUpdate,
    },
};
use tracing::{debug, warn};

pub const DELETED_PLACEHOLDER: &str = "This message was deleted";
pub const UNSENT_PLACEHOLDER: &str = "This message was unsent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMirror {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: Option<UserId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub unsent_at: Option<DateTime<Utc>>,
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
    pub mentions: Vec<UserId>,
}

impl MessageMirror {
    pub fn is_removed(&self) -> bool {
        self.deleted_at.is_some() || self.unsent_at.is_some()
    }
}

impl From<MessageRecord> for MessageMirror {
    fn from(record: MessageRecord) -> Self {
        let mut reactions: BTreeMap<String, BTreeSet<UserId>> = BTreeMap::new();
        for reaction in record.reactions {
            reactions
                .entry(reaction.emoji)
                .or_default()
                .insert(reaction.user_id);
        }
        Self {
            id: record.id,
            conversation_id: record.conversation_id,
            sender_id: record.sender_id,
            content: record.content,
            created_at: record.created_at,
            edited_at: record.edited_at,
            deleted_at: record.deleted_at,
            unsent_at: record.unsent_at,
            reactions,
            mentions: record.mentions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMirror {
    pub id: ConversationId,
    pub name: Option<String>,
    pub member_count: u32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
    pub mention_count: u32,
    pub is_group: bool,
    pub members: Vec<MemberRecord>,
}

impl From<ConversationSummary> for ConversationMirror {
    fn from(summary: ConversationSummary) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            member_count: summary.member_count,
            last_message_at: summary.last_message_at,
            unread_count: summary.unread_count,
            mention_count: 0,
            is_group: summary.is_group,
            members: Vec::new(),
        }
    }
}

impl ConversationMirror {
    fn touch(&mut self, at: DateTime<Utc>) {
        if self.last_message_at.map_or(true, |current| at > current) {
            self.last_message_at = Some(at);
        }
    }

    fn apply_patch(&mut self, patch: &ConversationPatch) {
        if let Some(name) = &patch.name {
            self.name = Some(name.clone());
        }
        if let Some(member_count) = patch.member_count {
            self.member_count = member_count;
        }
        if let Some(at) = patch.last_message_at {
            self.touch(at);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConversation {
    pub id: ConversationId,
    pub messages: Vec<MessageMirror>,
    pub read_receipts: HashMap<UserId, DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub identity: Option<UserId>,
    pub conversations: Vec<ConversationMirror>,
    pub open: Option<OpenConversation>,
    pub typing: HashMap<ConversationId, Vec<UserId>>,
    pub presence: HashMap<UserId, PresenceStatus>,
}

impl EngineSnapshot {
    pub fn conversations_by_recency(&self) -> Vec<&ConversationMirror> {
        let mut ordered: Vec<_> = self.conversations.iter().collect();
        ordered.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        ordered
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEffect {
    MarkRead(ConversationId),
    RefetchConversations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipDirection {
    Added,
    Removed,
}

struct OpenState {
    id: ConversationId,
    messages: Vec<MessageMirror>,
    positions: HashMap<MessageId, usize>,
    read_receipts: HashMap<UserId, DateTime<Utc>>,
}

impl OpenState {
    fn new(id: ConversationId) -> Self {
        Self {
            id,
            messages: Vec::new(),
            positions: HashMap::new(),
            read_receipts: HashMap::new(),
        }
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.positions.contains_key(id)
    }

    fn push(&mut self, message: MessageMirror) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.positions.insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
        true
    }

    fn prepend(&mut self, older: Vec<MessageMirror>) -> usize {
        let mut seen = HashSet::new();
        let fresh: Vec<MessageMirror> = older
            .into_iter()
            .filter(|message| !self.contains(&message.id) && seen.insert(message.id.clone()))
            .collect();
        let inserted = fresh.len();
        if inserted == 0 {
            return 0;
        }
        let mut messages = fresh;
        messages.append(&mut self.messages);
        self.messages = messages;
        self.reindex();
        inserted
    }

    fn reindex(&mut self) {
        self.positions = self
            .messages
            .iter()
            .enumerate()
            .map(|(index, message)| (message.id.clone(), index))
            .collect();
    }

    fn message_mut(&mut self, id: &MessageId) -> Option<&mut MessageMirror> {
        let index = *self.positions.get(id)?;
        self.messages.get_mut(index)
    }

    fn targets(&self, conversation_id: Option<&ConversationId>) -> bool {
        conversation_id.map_or(true, |id| *id == self.id)
    }
}

pub struct ReconciliationEngine {
    identity: Option<UserId>,
    read_receipt_skew: chrono::Duration,
    conversations: Vec<ConversationMirror>,
    open: Option<OpenState>,
    typing: HashMap<ConversationId, BTreeSet<UserId>>,
    presence: HashMap<UserId, PresenceStatus>,
    pending_members: HashMap<(ConversationId, UserId), MembershipDirection>,
    counted_unread: HashMap<ConversationId, HashSet<MessageId>>,
    counted_mentions: HashMap<ConversationId, HashSet<MessageId>>,
}

impl ReconciliationEngine {
    pub fn new(read_receipt_skew: std::time::Duration) -> Self {
        let read_receipt_skew = chrono::Duration::from_std(read_receipt_skew).unwrap_or_else(|_| {
            warn!("sync: read receipt skew out of range, disabling correction");
            chrono::Duration::zero()
        });
        Self {
            identity: None,
            read_receipt_skew,
            conversations: Vec::new(),
            open: None,
            typing: HashMap::new(),
            presence: HashMap::new(),
            pending_members: HashMap::new(),
            counted_unread: HashMap::new(),
            counted_mentions: HashMap::new(),
        }
    }

    pub fn identity(&self) -> Option<&UserId> {
        self.identity.as_ref()
    }

    /// Switching identity discards every mirror built for the previous one.
    pub fn set_identity(&mut self, identity: Option<UserId>) {
        if self.identity != identity {
            self.reset();
        }
        self.identity = identity;
    }

    pub fn reset(&mut self) {
        self.conversations.clear();
        self.open = None;
        self.typing.clear();
        self.presence.clear();
        self.pending_members.clear();
        self.counted_unread.clear();
        self.counted_mentions.clear();
    }

    fn is_self(&self, user_id: &UserId) -> bool {
        self.identity.as_ref() == Some(user_id)
    }

    fn conversation_mut(&mut self, id: &ConversationId) -> Option<&mut ConversationMirror> {
        self.conversations
            .iter_mut()
            .find(|conversation| conversation.id == *id)
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&ConversationMirror> {
        self.conversations
            .iter()
            .find(|conversation| conversation.id == *id)
    }

    pub fn conversations(&self) -> &[ConversationMirror] {
        &self.conversations
    }

    pub fn open_conversation_id(&self) -> Option<&ConversationId> {
        self.open.as_ref().map(|open| &open.id)
    }

    pub fn messages(&self) -> &[MessageMirror] {
        self.open.as_ref().map_or(&[], |open| open.messages.as_slice())
    }

    pub fn oldest_message_id(&self) -> Option<&MessageId> {
        self.messages().first().map(|message| &message.id)
    }

    pub fn read_receipt(&self, user_id: &UserId) -> Option<DateTime<Utc>> {
        self.open
            .as_ref()
            .and_then(|open| open.read_receipts.get(user_id).copied())
    }

    pub fn last_read_index(&self, user_id: &UserId) -> Option<usize> {
        let read_at = self.read_receipt(user_id)?;
        find_last_read_message_index(self.messages(), read_at)
    }

    pub fn typing_users(&self, conversation_id: &ConversationId) -> Vec<UserId> {
        self.typing
            .get(conversation_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn presence(&self, user_id: &UserId) -> Option<&PresenceStatus> {
        self.presence.get(user_id)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            identity: self.identity.clone(),
            conversations: self.conversations.clone(),
            open: self.open.as_ref().map(|open| OpenConversation {
                id: open.id.clone(),
                messages: open.messages.clone(),
                read_receipts: open.read_receipts.clone(),
            }),
            typing: self
                .typing
                .iter()
                .map(|(id, users)| (id.clone(), users.iter().cloned().collect()))
                .collect(),
            presence: self.presence.clone(),
        }
    }

    /// Replaces conversation metadata with an authoritative list. Locally
    /// counted mentions survive for conversations still present.
    pub fn seed_conversations(&mut self, summaries: Vec<ConversationSummary>) {
        let previous: HashMap<ConversationId, ConversationMirror> = self
            .conversations
            .drain(..)
            .map(|conversation| (conversation.id.clone(), conversation))
            .collect();
        self.conversations = summaries
            .into_iter()
            .map(|summary| {
                let mut mirror = ConversationMirror::from(summary);
                if let Some(old) = previous.get(&mirror.id) {
                    mirror.mention_count = old.mention_count;
                    mirror.members = old.members.clone();
                }
                mirror
            })
            .collect();
        let known: HashSet<&ConversationId> =
            self.conversations.iter().map(|conversation| &conversation.id).collect();
        self.counted_unread.retain(|id, _| known.contains(id));
        self.counted_mentions.retain(|id, _| known.contains(id));
        self.pending_members.retain(|(id, _), _| known.contains(id));
        debug!(count = self.conversations.len(), "sync: conversation list seeded");
    }

    pub fn seed_conversation_detail(&mut self, detail: ConversationDetail) {
        let ConversationDetail { summary, members } = detail;
        match self.conversation_mut(&summary.id) {
            Some(existing) => {
                if summary.name.is_some() {
                    existing.name = summary.name;
                }
                existing.member_count = summary.member_count;
                existing.is_group = summary.is_group;
                if let Some(at) = summary.last_message_at {
                    existing.touch(at);
                }
                existing.members = members;
            }
            None => {
                let mut mirror = ConversationMirror::from(summary);
                mirror.members = members;
                self.conversations.push(mirror);
            }
        }
    }

    /// Makes `id` the open conversation with empty per-conversation caches.
    pub fn open_conversation(&mut self, id: ConversationId) {
        if let Some(previous) = self.open.take() {
            self.typing.remove(&previous.id);
        }
        if let Some(conversation) = self.conversation_mut(&id) {
            conversation.unread_count = 0;
            conversation.mention_count = 0;
        }
        self.counted_unread.remove(&id);
        self.counted_mentions.remove(&id);
        self.open = Some(OpenState::new(id));
    }

    pub fn close_conversation(&mut self) -> Option<ConversationId> {
        let previous = self.open.take()?;
        self.typing.remove(&previous.id);
        Some(previous.id)
    }

    /// Prepends an older page for the open conversation. Pages for a
    /// conversation that is no longer open are discarded.
    pub fn seed_messages(
        &mut self,
        conversation_id: &ConversationId,
        page: Vec<MessageRecord>,
    ) -> usize {
        let Some(open) = self.open.as_mut().filter(|open| open.id == *conversation_id) else {
            debug!(conversation_id = %conversation_id, "sync: discarding stale message page");
            return 0;
        };
        let mut page: Vec<MessageMirror> = page
            .into_iter()
            .filter(|record| record.conversation_id == *conversation_id)
            .map(MessageMirror::from)
            .collect();
        page.sort_by_key(|message| message.created_at);
        let inserted = open.prepend(page);
        if let Some(newest) = open.messages.last().map(|message| message.created_at) {
            if let Some(conversation) = self.conversation_mut(conversation_id) {
                conversation.touch(newest);
            }
        }
        inserted
    }

    /// Appends messages from a freshly fetched newest page that were missed
    /// while disconnected; already mirrored ids are skipped.
    pub fn merge_latest(
        &mut self,
        conversation_id: &ConversationId,
        page: Vec<MessageRecord>,
    ) -> usize {
        let Some(open) = self.open.as_mut().filter(|open| open.id == *conversation_id) else {
            return 0;
        };
        let mut page: Vec<MessageMirror> = page
            .into_iter()
            .filter(|record| record.conversation_id == *conversation_id)
            .map(MessageMirror::from)
            .collect();
        page.sort_by_key(|message| message.created_at);
        let mut inserted = 0;
        let mut newest = None;
        for message in page {
            let created_at = message.created_at;
            if open.push(message) {
                inserted += 1;
                newest = Some(created_at);
            }
        }
        if let Some(at) = newest {
            if let Some(conversation) = self.conversation_mut(conversation_id) {
                conversation.touch(at);
            }
        }
        inserted
    }

    /// Applies a local membership change before the server confirms it.
    pub fn begin_member_change(
        &mut self,
        conversation_id: &ConversationId,
        user_ids: &[UserId],
        direction: MembershipDirection,
    ) -> bool {
        if self.conversation(conversation_id).is_none() {
            return false;
        }
        let mut delta = 0u32;
        for user_id in user_ids {
            let key = (conversation_id.clone(), user_id.clone());
            if self.pending_members.contains_key(&key) {
                continue;
            }
            self.pending_members.insert(key, direction);
            delta += 1;
        }
        if let Some(conversation) = self.conversation_mut(conversation_id) {
            shift_member_count(conversation, direction, delta);
        }
        true
    }

    /// Reverts a pending membership change whose request failed.
    pub fn rollback_member_change(
        &mut self,
        conversation_id: &ConversationId,
        user_ids: &[UserId],
        direction: MembershipDirection,
    ) {
        let mut delta = 0u32;
        for user_id in user_ids {
            let key = (conversation_id.clone(), user_id.clone());
            if self.pending_members.get(&key) == Some(&direction) {
                self.pending_members.remove(&key);
                delta += 1;
            }
        }
        let reverse = match direction {
            MembershipDirection::Added => MembershipDirection::Removed,
            MembershipDirection::Removed => MembershipDirection::Added,
        };
        if let Some(conversation) = self.conversation_mut(conversation_id) {
            shift_member_count(conversation, reverse, delta);
        }
    }

    pub fn pending_member_changes(&self) -> usize {
        self.pending_members.len()
    }

    /// Merges one inbound event into the mirrors.
    pub fn apply(&mut self, event: &InboundEvent, now: DateTime<Utc>) -> Vec<EngineEffect> {
        let mut effects = Vec::new();
        match event {
            InboundEvent::Connected
            | InboundEvent::Disconnected { .. }
            | InboundEvent::ConnectError { .. } => {}
            InboundEvent::MessageNew(message) => self.insert_message(message, true, &mut effects),
            InboundEvent::MessageSent(message) => self.insert_message(message, false, &mut effects),
            InboundEvent::MessageMention(message) => self.count_mention(message),
            InboundEvent::MessageUpdated(edit) => self.edit_message(edit),
            InboundEvent::MessageDeleted(removal) => {
                self.remove_message(removal, DELETED_PLACEHOLDER, |message, at| {
                    message.deleted_at = Some(at)
                })
            }
            InboundEvent::MessageUnsent(removal) => {
                self.remove_message(removal, UNSENT_PLACEHOLDER, |message, at| {
                    message.unsent_at = Some(at)
                })
            }
            InboundEvent::MessageRead(receipt) => self.merge_read_receipt(receipt, now),
            InboundEvent::ReactionAdded(change) => self.patch_reaction(change, true),
            InboundEvent::ReactionRemoved(change) => self.patch_reaction(change, false),
            InboundEvent::ConversationNew(patch) | InboundEvent::ConversationUpdated(patch) => {
                match self.conversation_mut(&patch.id) {
                    Some(conversation) => conversation.apply_patch(patch),
                    None => effects.push(EngineEffect::RefetchConversations),
                }
            }
            InboundEvent::ConversationJoined(change) | InboundEvent::MemberAdded(change) => {
                self.apply_membership(change, MembershipDirection::Added, &mut effects)
            }
            InboundEvent::ConversationLeft(change) | InboundEvent::MemberRemoved(change) => {
                self.apply_membership(change, MembershipDirection::Removed, &mut effects)
            }
            InboundEvent::TypingUpdate(update) => self.replace_typing(update),
            InboundEvent::UserStatus(change) => {
                self.presence
                    .insert(change.user_id.clone(), change.status.clone());
            }
        }
        effects.dedup();
        effects
    }

    fn insert_message(
        &mut self,
        record: &MessageRecord,
        mark_read: bool,
        effects: &mut Vec<EngineEffect>,
    ) {
        let conversation_id = &record.conversation_id;
        if let Some(open) = self.open.as_mut().filter(|open| open.id == *conversation_id) {
            if !open.push(MessageMirror::from(record.clone())) {
                debug!(message_id = %record.id, "sync: dropping duplicate message");
                return;
            }
            if mark_read {
                effects.push(EngineEffect::MarkRead(conversation_id.clone()));
            }
            if let Some(conversation) = self.conversation_mut(conversation_id) {
                conversation.touch(record.created_at);
            }
            return;
        }

        let from_self = record
            .sender_id
            .as_ref()
            .is_some_and(|sender| self.is_self(sender));
        if self.conversation(conversation_id).is_none() {
            effects.push(EngineEffect::RefetchConversations);
            return;
        }
        let first_sighting = self
            .counted_unread
            .entry(conversation_id.clone())
            .or_default()
            .insert(record.id.clone());
        if let Some(conversation) = self.conversation_mut(conversation_id) {
            conversation.touch(record.created_at);
            if mark_read && first_sighting && !from_self {
                conversation.unread_count += 1;
            }
        }
    }

    fn count_mention(&mut self, record: &MessageRecord) {
        let conversation_id = &record.conversation_id;
        if self.open_conversation_id() == Some(conversation_id) {
            return;
        }
        if self.conversation(conversation_id).is_none() {
            return;
        }
        let first_sighting = self
            .counted_mentions
            .entry(conversation_id.clone())
            .or_default()
            .insert(record.id.clone());
        if first_sighting {
            if let Some(conversation) = self.conversation_mut(conversation_id) {
                conversation.mention_count += 1;
            }
        }
    }

    fn edit_message(&mut self, edit: &MessageEdit) {
        let Some(open) = self
            .open
            .as_mut()
            .filter(|open| open.targets(edit.conversation_id.as_ref()))
        else {
            return;
        };
        let Some(message) = open.message_mut(&edit.message_id) else {
            debug!(message_id = %edit.message_id, "sync: update for unknown message");
            return;
        };
        if message.is_removed() {
            debug!(message_id = %edit.message_id, "sync: ignoring update for removed message");
            return;
        }
        if message.edited_at.is_some_and(|current| edit.edited_at < current) {
            debug!(message_id = %edit.message_id, "sync: ignoring stale update");
            return;
        }
        message.content = edit.content.clone();
        message.edited_at = Some(edit.edited_at);
    }

    fn remove_message(
        &mut self,
        removal: &MessageRemoval,
        placeholder: &str,
        stamp: impl FnOnce(&mut MessageMirror, DateTime<Utc>),
    ) {
        let Some(open) = self
            .open
            .as_mut()
            .filter(|open| open.targets(removal.conversation_id.as_ref()))
        else {
            return;
        };
        let Some(message) = open.message_mut(&removal.message_id) else {
            debug!(message_id = %removal.message_id, "sync: removal for unknown message");
            return;
        };
        message.content = placeholder.to_string();
        stamp(message, removal.at);
    }

    fn merge_read_receipt(&mut self, receipt: &ReadReceipt, now: DateTime<Utc>) {
        if self.is_self(&receipt.user_id) {
            return;
        }
        let skew = self.read_receipt_skew;
        let Some(open) = self
            .open
            .as_mut()
            .filter(|open| open.id == receipt.conversation_id)
        else {
            return;
        };
        let candidate = receipt.read_at.unwrap_or(now) - skew;
        match open.read_receipts.get(&receipt.user_id) {
            Some(stored) if candidate <= *stored => {
                debug!(user_id = %receipt.user_id, "sync: ignoring older read receipt");
            }
            _ => {
                open.read_receipts.insert(receipt.user_id.clone(), candidate);
            }
        }
    }

    fn patch_reaction(&mut self, change: &ReactionChange, added: bool) {
        let Some(open) = self
            .open
            .as_mut()
            .filter(|open| open.targets(change.conversation_id.as_ref()))
        else {
            return;
        };
        let Some(message) = open.message_mut(&change.message_id) else {
            return;
        };
        if added {
            message
                .reactions
                .entry(change.emoji.clone())
                .or_default()
                .insert(change.user_id.clone());
        } else if let Some(users) = message.reactions.get_mut(&change.emoji) {
            users.remove(&change.user_id);
            if users.is_empty() {
                message.reactions.remove(&change.emoji);
            }
        }
    }

    fn apply_membership(
        &mut self,
        change: &MembershipChange,
        direction: MembershipDirection,
        effects: &mut Vec<EngineEffect>,
    ) {
        let conversation_id = &change.conversation_id;
        let self_removed = direction == MembershipDirection::Removed
            && change.user_ids.iter().any(|user| self.is_self(user));
        if self_removed {
            self.forget_conversation(conversation_id);
            return;
        }
        if self.conversation(conversation_id).is_none() {
            effects.push(EngineEffect::RefetchConversations);
            return;
        }

        let mut unconfirmed = 0u32;
        for user_id in &change.user_ids {
            let key = (conversation_id.clone(), user_id.clone());
            match self.pending_members.get(&key) {
                Some(pending) if *pending == direction => {
                    self.pending_members.remove(&key);
                }
                _ => unconfirmed += 1,
            }
        }
        if let Some(conversation) = self.conversation_mut(conversation_id) {
            match change.member_count {
                Some(member_count) => conversation.member_count = member_count,
                None => shift_member_count(conversation, direction, unconfirmed),
            }
            if !conversation.members.is_empty() {
                let members = &mut conversation.members;
                match direction {
                    MembershipDirection::Added => {
                        for user_id in &change.user_ids {
                            if !members.iter().any(|member| member.user_id == *user_id) {
                                members.push(MemberRecord {
                                    user_id: user_id.clone(),
                                    username: None,
                                });
                            }
                        }
                    }
                    MembershipDirection::Removed => {
                        members.retain(|member| !change.user_ids.contains(&member.user_id));
                    }
                }
            }
        }
    }

    fn forget_conversation(&mut self, conversation_id: &ConversationId) {
        self.conversations
            .retain(|conversation| conversation.id != *conversation_id);
        if self.open_conversation_id() == Some(conversation_id) {
            self.open = None;
        }
        self.typing.remove(conversation_id);
        self.counted_unread.remove(conversation_id);
        self.counted_mentions.remove(conversation_id);
        self.pending_members.retain(|(id, _), _| id != conversation_id);
        debug!(conversation_id = %conversation_id, "sync: removed from conversation");
    }

    fn replace_typing(&mut self, update: &TypingUpdate) {
        let users: BTreeSet<UserId> = update
            .typing_users
            .iter()
            .filter(|user| !self.is_self(user))
            .cloned()
            .collect();
        self.typing.insert(update.conversation_id.clone(), users);
    }
}

fn shift_member_count(
    conversation: &mut ConversationMirror,
    direction: MembershipDirection,
    delta: u32,
) {
    conversation.member_count = match direction {
        MembershipDirection::Added => conversation.member_count.saturating_add(delta),
        MembershipDirection::Removed => conversation.member_count.saturating_sub(delta),
    };
}

/// Index of the newest message created at or before `read_at`.
pub fn find_last_read_message_index(
    messages: &[MessageMirror],
    read_at: DateTime<Utc>,
) -> Option<usize> {
    messages
        .iter()
        .rposition(|message| message.created_at <= read_at)
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
