//! Discord REST implementation of [`Channel`].

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{Channel, Locator, RecentMessage};
use crate::config::SessionConfig;
use crate::error::{Result, StoreError};

const USER_AGENT: &str = concat!("DiscordBot (chanstore, ", env!("CARGO_PKG_VERSION"), ")");

/// Channel kinds that accept attachments: guild text, DM, group DM, announcement.
const MESSAGEABLE_KINDS: [u8; 4] = [0, 1, 3, 5];

#[derive(Debug, Deserialize)]
struct ApiChannel {
    #[serde(rename = "type")]
    kind: u8,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiAttachment {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    id: String,
    author: ApiUser,
    #[serde(default)]
    attachments: Vec<ApiAttachment>,
}

impl From<ApiMessage> for RecentMessage {
    fn from(msg: ApiMessage) -> Self {
        RecentMessage {
            id: msg.id,
            author_id: msg.author.id,
            attachments: msg
                .attachments
                .into_iter()
                .map(|a| Locator::new(a.url))
                .collect(),
        }
    }
}

fn classify_status(status: StatusCode, context: &str) -> StoreError {
    match status.as_u16() {
        401 | 403 | 404 => StoreError::ChannelUnusable(format!("{}: HTTP {}", context, status)),
        429 => StoreError::Transient(format!("{}: rate limited", context)),
        code => StoreError::HttpError(code),
    }
}

/// Bot-token client for one text channel.
#[derive(Debug)]
pub struct RestChannel {
    client: Client,
    api_base: String,
    token: String,
    channel_id: Option<String>,
    self_id: Option<String>,
}

impl RestChannel {
    /// Create a client for the channel named in `session`.
    pub fn new(session: &SessionConfig, api_base: &str) -> Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self::with_client(client, session, api_base))
    }

    /// Create a client that routes through a proxy.
    pub fn with_proxy(session: &SessionConfig, api_base: &str, proxy: &str) -> Result<Self> {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| StoreError::Custom(format!("Invalid proxy: {}", e)))?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .proxy(proxy)
            .build()?;
        Ok(Self::with_client(client, session, api_base))
    }

    fn with_client(client: Client, session: &SessionConfig, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: session.token.clone(),
            channel_id: session.room_id.clone().filter(|id| !id.is_empty()),
            self_id: None,
        }
    }

    fn channel_id(&self) -> Result<&str> {
        self.channel_id
            .as_deref()
            .ok_or_else(|| StoreError::ChannelUnusable("no channel id configured".to_string()))
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, context: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| StoreError::Transient(format!("{}: {}", context, e)))?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), context));
        }
        Ok(response.json().await?)
    }

    async fn self_id(&mut self) -> Result<String> {
        if let Some(id) = &self.self_id {
            return Ok(id.clone());
        }
        let url = format!("{}/users/@me", self.api_base);
        let me: ApiUser = self.get_json(&url, "identity lookup").await?;
        self.self_id = Some(me.id.clone());
        Ok(me.id)
    }

    /// Locate the attachment we just sent by scanning for our newest message.
    ///
    /// Only used when the send acknowledgment carries no attachment. Racy if
    /// another sender with the same identity posts in between.
    async fn resolve_by_scan(&mut self) -> Result<Locator> {
        let me = self.self_id().await?;
        let recent = self.list_recent(10).await?;
        recent
            .into_iter()
            .find(|m| m.author_id == me && !m.attachments.is_empty())
            .and_then(|m| m.attachments.into_iter().next())
            .ok_or_else(|| StoreError::Transient("sent message not found in history".to_string()))
    }
}

#[async_trait]
impl Channel for RestChannel {
    async fn check(&mut self) -> Result<()> {
        let url = format!("{}/channels/{}", self.api_base, self.channel_id()?);
        let channel: ApiChannel = self.get_json(&url, "channel lookup").await?;
        if !MESSAGEABLE_KINDS.contains(&channel.kind) {
            return Err(StoreError::ChannelUnusable(format!(
                "channel type {} cannot hold attachments",
                channel.kind
            )));
        }
        self.self_id().await?;
        Ok(())
    }

    async fn send_chunk(&mut self, name: &str, data: Vec<u8>) -> Result<Locator> {
        let url = format!("{}/channels/{}/messages", self.api_base, self.channel_id()?);
        let size = data.len();
        let part = Part::bytes(data)
            .file_name(name.to_string())
            .mime_str("application/octet-stream")?;
        let payload = json!({ "attachments": [{ "id": 0, "filename": name }] });
        let form = Form::new()
            .text("payload_json", payload.to_string())
            .part("files[0]", part);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth())
            .multipart(form)
            .send()
            .await
            .map_err(|e| StoreError::Transient(format!("send {}: {}", name, e)))?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), &format!("send {}", name)));
        }

        let message: ApiMessage = response.json().await?;
        debug!(name, size, message_id = %message.id, "chunk sent");
        match message.attachments.into_iter().next() {
            Some(attachment) => Ok(Locator::new(attachment.url)),
            None => self.resolve_by_scan().await,
        }
    }

    async fn fetch_chunk(&mut self, locator: &Locator) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(locator.as_str())
            .send()
            .await
            .map_err(|e| StoreError::Transient(format!("fetch: {}", e)))?;
        if !response.status().is_success() {
            return Err(StoreError::HttpError(response.status().as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| StoreError::Transient(format!("fetch body: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn list_recent(&mut self, limit: usize) -> Result<Vec<RecentMessage>> {
        let url = format!(
            "{}/channels/{}/messages?limit={}",
            self.api_base,
            self.channel_id()?,
            limit.clamp(1, 100)
        );
        let messages: Vec<ApiMessage> = self.get_json(&url, "history").await?;
        Ok(messages.into_iter().map(RecentMessage::from).collect())
    }
}
