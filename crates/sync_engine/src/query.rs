//! Request/response collaborator for state that is not delivered as events.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use shared::{
    domain::{ConversationId, MessageId, UserId},
    error::ApiError,
    protocol::{
        ConversationDetail, ConversationSummary, MessageRecord, ReactionRecord, WireConversation,
        WireMessage,
    },
};
use tracing::warn;
use url::Url;

#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;
    async fn get_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationDetail>;
    /// Newest-first page of at most `limit` messages, older than `before` when given.
    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
        before: Option<&MessageId>,
    ) -> Result<Vec<MessageRecord>>;
    async fn list_reactions(&self, message_id: &MessageId) -> Result<Vec<ReactionRecord>>;
    async fn add_reaction(&self, message_id: &MessageId, emoji: &str) -> Result<()>;
    async fn remove_reaction(&self, message_id: &MessageId, emoji: &str) -> Result<()>;
    async fn add_members(
        &self,
        conversation_id: &ConversationId,
        user_ids: &[UserId],
    ) -> Result<()>;
    async fn remove_member(&self, conversation_id: &ConversationId, user_id: &UserId) -> Result<()>;
}

pub struct MissingConversationApi;

#[async_trait]
impl ConversationApi for MissingConversationApi {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        Err(anyhow!("conversation API unavailable"))
    }

    async fn get_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationDetail> {
        Err(anyhow!("conversation API unavailable for conversation {conversation_id}"))
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
        _limit: u32,
        _before: Option<&MessageId>,
    ) -> Result<Vec<MessageRecord>> {
        Err(anyhow!("conversation API unavailable for conversation {conversation_id}"))
    }

    async fn list_reactions(&self, message_id: &MessageId) -> Result<Vec<ReactionRecord>> {
        Err(anyhow!("conversation API unavailable for message {message_id}"))
    }

    async fn add_reaction(&self, message_id: &MessageId, _emoji: &str) -> Result<()> {
        Err(anyhow!("conversation API unavailable for message {message_id}"))
    }

    async fn remove_reaction(&self, message_id: &MessageId, _emoji: &str) -> Result<()> {
        Err(anyhow!("conversation API unavailable for message {message_id}"))
    }

    async fn add_members(
        &self,
        conversation_id: &ConversationId,
        _user_ids: &[UserId],
    ) -> Result<()> {
        Err(anyhow!("conversation API unavailable for conversation {conversation_id}"))
    }

    async fn remove_member(
        &self,
        conversation_id: &ConversationId,
        _user_id: &UserId,
    ) -> Result<()> {
        Err(anyhow!("conversation API unavailable for conversation {conversation_id}"))
    }
}

/// Responses arrive either as a bare array or wrapped in an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(alias = "conversations", alias = "messages", alias = "reactions", alias = "data")]
        items: Vec<T>,
    },
}

impl<T> Listing<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            Listing::Bare(items) | Listing::Wrapped { items } => items,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Single<T> {
    Wrapped {
        #[serde(alias = "conversation")]
        item: T,
    },
    Bare(T),
}

pub struct HttpConversationApi {
    http: Client,
    base: Url,
    token: Option<String>,
}

impl HttpConversationApi {
    pub fn new(server_url: &str) -> Result<Self> {
        let base = Url::parse(server_url)
            .with_context(|| format!("invalid server url '{server_url}'"))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("server url '{server_url}' cannot carry a path"));
        }
        Ok(Self {
            http: Client::new(),
            base,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("server url cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = check(builder.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<()> {
        check(builder.send().await?).await?;
        Ok(())
    }
}

/// Turns a non-success response into an error carrying the API's message when
/// the body has one.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => Err(anyhow!("{status}: {}", api_error.message)),
        Err(_) => Err(anyhow!("{status}")),
    }
}

#[async_trait]
impl ConversationApi for HttpConversationApi {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let url = self.endpoint(&["conversations"])?;
        let listing: Listing<WireConversation> = self.fetch(self.request(Method::GET, url)).await?;
        let mut summaries = Vec::new();
        for wire in listing.into_items() {
            match wire.into_summary("GET /conversations") {
                Ok(summary) => summaries.push(summary),
                Err(err) => warn!(error = %err, "query: skipping malformed conversation"),
            }
        }
        Ok(summaries)
    }

    async fn get_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationDetail> {
        let url = self.endpoint(&["conversations", conversation_id.as_str()])?;
        let single: Single<WireConversation> = self.fetch(self.request(Method::GET, url)).await?;
        let wire = match single {
            Single::Wrapped { item } | Single::Bare(item) => item,
        };
        Ok(wire.into_detail("GET /conversations/{id}")?)
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
        before: Option<&MessageId>,
    ) -> Result<Vec<MessageRecord>> {
        let url = self.endpoint(&["conversations", conversation_id.as_str(), "messages"])?;
        let mut builder = self
            .request(Method::GET, url)
            .query(&[("limit", limit.to_string())]);
        if let Some(before) = before {
            builder = builder.query(&[("before", before.as_str())]);
        }
        let listing: Listing<WireMessage> = self.fetch(builder).await?;
        let received_at = chrono::Utc::now();
        let mut records = Vec::new();
        for wire in listing.into_items() {
            match wire.into_record("GET /messages", Some(conversation_id), received_at) {
                Ok(record) => records.push(record),
                Err(err) => warn!(error = %err, "query: skipping malformed message"),
            }
        }
        Ok(records)
    }

    async fn list_reactions(&self, message_id: &MessageId) -> Result<Vec<ReactionRecord>> {
        let url = self.endpoint(&["messages", message_id.as_str(), "reactions"])?;
        let listing: Listing<ReactionRecord> = self.fetch(self.request(Method::GET, url)).await?;
        Ok(listing.into_items())
    }

    async fn add_reaction(&self, message_id: &MessageId, emoji: &str) -> Result<()> {
        let url = self.endpoint(&["messages", message_id.as_str(), "reactions"])?;
        self.execute(self.request(Method::POST, url).json(&json!({ "emoji": emoji })))
            .await
    }

    async fn remove_reaction(&self, message_id: &MessageId, emoji: &str) -> Result<()> {
        let url = self.endpoint(&["messages", message_id.as_str(), "reactions", emoji])?;
        self.execute(self.request(Method::DELETE, url)).await
    }

    async fn add_members(
        &self,
        conversation_id: &ConversationId,
        user_ids: &[UserId],
    ) -> Result<()> {
        let url = self.endpoint(&["conversations", conversation_id.as_str(), "members"])?;
        self.execute(
            self.request(Method::POST, url)
                .json(&json!({ "userIds": user_ids })),
        )
        .await
    }

    async fn remove_member(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<()> {
        let url = self.endpoint(&[
            "conversations",
            conversation_id.as_str(),
            "members",
            user_id.as_str(),
        ])?;
        self.execute(self.request(Method::DELETE, url)).await
    }
}

#[cfg(test)]
#[path = "tests/query_tests.rs"]
mod tests;
