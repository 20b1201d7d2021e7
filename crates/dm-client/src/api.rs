//! Persistence API client
//!
//! Thin REST boundary for the durable side of messaging: conversation and
//! history fetches, message creation (the server assigns the durable id)
//! and seen-batch marks. Realtime fan-out rides the transport, not this.

use crate::error::RealtimeError;
use async_trait::async_trait;
use dm_core::{Conversation, ConversationId, Message, MessageId, MessageKind};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Payload for creating a message
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[serde(rename = "type")]
    pub kind: MessageKind,

    #[validate(length(min = 1, max = 2000, message = "Content must be 1-2000 characters"))]
    pub content: String,

    /// Playback duration in seconds, required for audio/video
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 60, message = "Duration must be 1-60 seconds"))]
    pub duration: Option<u32>,
}

#[derive(Serialize)]
struct MarkSeenRequest<'a> {
    message_ids: &'a [MessageId],
}

/// Durable message operations against the REST API.
///
/// Production uses [`RestApi`]; tests plug in an in-memory fake.
#[async_trait]
pub trait ConversationApi: Send + Sync + 'static {
    /// All conversations the current user participates in
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, RealtimeError>;

    /// Full message history of one conversation
    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, RealtimeError>;

    /// Persist a new message; the returned copy carries the server id
    async fn create_message(
        &self,
        conversation_id: ConversationId,
        request: SendMessageRequest,
    ) -> Result<Message, RealtimeError>;

    /// Mark a batch of messages seen by the current user
    async fn mark_seen(
        &self,
        conversation_id: ConversationId,
        message_ids: &[MessageId],
    ) -> Result<(), RealtimeError>;
}

/// Result of a media upload
#[derive(Debug, Clone)]
pub struct MediaUpload {
    /// Public URL of the stored media
    pub secure_url: String,
    /// Playback duration in seconds, when the uploader can measure it
    pub duration: Option<u32>,
}

/// Opaque media signer and uploader.
///
/// The delivery pipeline only consumes the resulting URL and duration;
/// upload mechanics live behind this trait.
#[async_trait]
pub trait MediaUploader: Send + Sync + 'static {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        kind: MessageKind,
    ) -> Result<MediaUpload, RealtimeError>;
}

/// reqwest-backed [`ConversationApi`]
pub struct RestApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl RestApi {
    /// Create a client against the given API base URL
    #[must_use]
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            auth_token: auth_token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RealtimeError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RealtimeError::Auth(
                format!("API rejected credentials: {}", response.status()),
            )),
            status => Err(RealtimeError::Network(format!(
                "API returned {status}"
            ))),
        }
    }
}

#[async_trait]
impl ConversationApi for RestApi {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, RealtimeError> {
        let response = self
            .client
            .get(self.url("/conversations"))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, RealtimeError> {
        let response = self
            .client
            .get(self.url(&format!("/messages/{conversation_id}")))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn create_message(
        &self,
        conversation_id: ConversationId,
        request: SendMessageRequest,
    ) -> Result<Message, RealtimeError> {
        let response = self
            .client
            .post(self.url(&format!("/messages/{conversation_id}")))
            .bearer_auth(&self.auth_token)
            .json(&request)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn mark_seen(
        &self,
        conversation_id: ConversationId,
        message_ids: &[MessageId],
    ) -> Result<(), RealtimeError> {
        let response = self
            .client
            .post(self.url(&format!("/messages/{conversation_id}/seen")))
            .bearer_auth(&self.auth_token)
            .json(&MarkSeenRequest { message_ids })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}
