//! Discord REST v10 implementation of [`MessageStore`].
//!
//! One [`DiscordClient`] holds the bot token and HTTP client; each
//! [`DiscordChannel`] binds it to a single channel id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use streamwatch_core::types::{
    ChannelId, Embed, EmbedAuthor, Message, MessageId, OutgoingMessage,
};
use streamwatch_sync::{MessageStore, StoreError};

pub const API_BASE_URL: &str = "https://discord.com/api/v10";

/// Discord's maximum page size for message history.
const HISTORY_PAGE: usize = 100;
/// Attempts per request when rate limited.
const RATE_LIMIT_ATTEMPTS: usize = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Authenticated Discord REST client. The token is never logged.
#[derive(Debug)]
pub struct DiscordClient {
    http: Client,
    token: String,
    base_url: String,
    bot_user_id: OnceCell<String>,
}

impl DiscordClient {
    pub fn new(token: String) -> Self {
        Self::new_with_base_url(token, API_BASE_URL.to_string())
    }

    pub fn new_with_base_url(token: String, base_url: String) -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_user_id: OnceCell::new(),
        }
    }

    /// Bind this client to `channel`.
    pub fn channel(self: &Arc<Self>, channel: ChannelId) -> DiscordChannel {
        DiscordChannel {
            client: Arc::clone(self),
            channel,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path))
            .header("Authorization", format!("Bot {}", self.token))
    }

    /// Send, waiting out `429 Too Many Requests` a bounded number of times.
    async fn execute(&self, builder: RequestBuilder, endpoint: &str) -> Result<Response, StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = builder
                .try_clone()
                .ok_or_else(|| StoreError::Request(format!("{endpoint}: request body not cloneable")))?;
            let resp = request.send().await.map_err(request_err)?;
            if resp.status() != StatusCode::TOO_MANY_REQUESTS || attempt >= RATE_LIMIT_ATTEMPTS {
                return Ok(resp);
            }

            let retry_after = resp
                .json::<RateLimited>()
                .await
                .map(|r| Duration::from_secs_f64(r.retry_after.max(0.0)))
                .unwrap_or(Duration::from_secs(1))
                .min(MAX_RETRY_AFTER);
            tracing::warn!(
                endpoint,
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "rate limited by discord",
            );
            tokio::time::sleep(retry_after).await;
        }
    }

    async fn bot_user_id(&self) -> Result<&str, StoreError> {
        let id = self
            .bot_user_id
            .get_or_try_init(|| async {
                let resp = self
                    .execute(self.request(Method::GET, "users/@me"), "users/@me")
                    .await?;
                let user: WireUser = decode(resp, "users/@me").await?;
                tracing::debug!(bot_user = %user.id, "resolved bot identity");
                Ok::<_, StoreError>(user.id)
            })
            .await?;
        Ok(id.as_str())
    }
}

/// A single text channel.
#[derive(Debug, Clone)]
pub struct DiscordChannel {
    client: Arc<DiscordClient>,
    channel: ChannelId,
}

impl DiscordChannel {
    pub fn id(&self) -> &ChannelId {
        &self.channel
    }

    fn messages_path(&self) -> String {
        format!("channels/{}/messages", self.channel)
    }

    fn message_path(&self, id: &MessageId) -> String {
        format!("channels/{}/messages/{}", self.channel, id)
    }

    async fn to_message(&self, wire: WireMessage) -> Result<Message, StoreError> {
        let bot = self.client.bot_user_id().await?;
        Ok(wire.into_message(bot))
    }
}

#[async_trait]
impl MessageStore for DiscordChannel {
    async fn list_recent(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let bot = self.client.bot_user_id().await?.to_string();
        let path = self.messages_path();
        let mut out: Vec<Message> = Vec::with_capacity(limit);
        let mut before: Option<String> = None;

        while out.len() < limit {
            let page_size = (limit - out.len()).min(HISTORY_PAGE);
            let mut query = vec![("limit", page_size.to_string())];
            if let Some(before) = &before {
                query.push(("before", before.clone()));
            }
            let resp = self
                .client
                .execute(self.client.request(Method::GET, &path).query(&query), &path)
                .await?;
            let page: Vec<WireMessage> = decode(resp, &path).await?;
            let fetched = page.len();
            before = page.last().map(|m| m.id.clone());
            out.extend(page.into_iter().map(|m| m.into_message(&bot)));

            if fetched < page_size {
                break;
            }
        }
        Ok(out)
    }

    async fn fetch(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        let path = self.message_path(id);
        let resp = self
            .client
            .execute(self.client.request(Method::GET, &path), &path)
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let wire: WireMessage = decode(resp, &path).await?;
        Ok(Some(self.to_message(wire).await?))
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<Message, StoreError> {
        let path = self.messages_path();
        let body = WireOutgoing::from(message);
        let resp = self
            .client
            .execute(self.client.request(Method::POST, &path).json(&body), &path)
            .await?;
        let wire: WireMessage = decode(resp, &path).await?;
        self.to_message(wire).await
    }

    async fn edit(&self, id: &MessageId, message: &OutgoingMessage) -> Result<(), StoreError> {
        let path = self.message_path(id);
        let mut body = WireOutgoing::from(message);
        body.message_reference = None;
        let resp = self
            .client
            .execute(self.client.request(Method::PATCH, &path).json(&body), &path)
            .await?;
        check_status(&resp, &path)
    }

    async fn delete(&self, id: &MessageId) -> Result<(), StoreError> {
        let path = self.message_path(id);
        let resp = self
            .client
            .execute(self.client.request(Method::DELETE, &path), &path)
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            tracing::debug!(message = %id, "message already gone");
            return Ok(());
        }
        check_status(&resp, &path)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RateLimited {
    retry_after: f64,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireReference {
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireInteraction {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: String,
    author: WireUser,
    #[serde(default)]
    content: String,
    #[serde(default)]
    embeds: Vec<WireEmbed>,
    #[serde(default)]
    message_reference: Option<WireReference>,
    #[serde(default)]
    interaction: Option<WireInteraction>,
    timestamp: DateTime<Utc>,
}

impl WireMessage {
    fn into_message(self, bot_user_id: &str) -> Message {
        Message {
            from_self: self.author.id == bot_user_id,
            id: MessageId(self.id),
            content: self.content,
            embeds: self.embeds.into_iter().map(Embed::from).collect(),
            reference: self
                .message_reference
                .and_then(|r| r.message_id)
                .map(MessageId),
            interaction_name: self.interaction.map(|i| i.name),
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireEmbedAuthor {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    icon_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireImage {
    url: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireEmbed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<WireEmbedAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<WireImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

impl From<WireEmbed> for Embed {
    fn from(w: WireEmbed) -> Self {
        Embed {
            title: w.title,
            description: w.description,
            url: w.url,
            color: w.color,
            author: w.author.map(|a| EmbedAuthor {
                name: a.name,
                url: a.url,
                icon_url: a.icon_url,
            }),
            image_url: w.image.map(|i| i.url),
            timestamp: w.timestamp,
        }
    }
}

impl From<&Embed> for WireEmbed {
    fn from(e: &Embed) -> Self {
        WireEmbed {
            title: e.title.clone(),
            description: e.description.clone(),
            url: e.url.clone(),
            color: e.color,
            author: e.author.as_ref().map(|a| WireEmbedAuthor {
                name: a.name.clone(),
                url: a.url.clone(),
                icon_url: a.icon_url.clone(),
            }),
            image: e.image_url.clone().map(|url| WireImage { url }),
            timestamp: e.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessageReference {
    message_id: String,
}

#[derive(Debug, Serialize)]
struct WireOutgoing {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    embeds: Vec<WireEmbed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_reference: Option<WireMessageReference>,
}

impl From<&OutgoingMessage> for WireOutgoing {
    fn from(m: &OutgoingMessage) -> Self {
        WireOutgoing {
            content: m.content.clone(),
            embeds: m.embed.iter().map(WireEmbed::from).collect(),
            message_reference: m.reply_to.as_ref().map(|id| WireMessageReference {
                message_id: id.0.clone(),
            }),
        }
    }
}

fn request_err(err: reqwest::Error) -> StoreError {
    StoreError::Request(err.to_string())
}

fn check_status(resp: &Response, endpoint: &str) -> Result<(), StoreError> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(StoreError::Status {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
        })
    }
}

async fn decode<T>(resp: Response, endpoint: &str) -> Result<T, StoreError>
where
    T: for<'de> Deserialize<'de>,
{
    check_status(&resp, endpoint)?;
    resp.json::<T>()
        .await
        .map_err(|err| StoreError::Decode(format!("{endpoint}: {err}")))
}
