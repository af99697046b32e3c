//! Lark (Feishu) channel: event-callback wire types, normalization, and
//! reply via the Open API (tenant token exchange + message reply).

use crate::channels::inbound::InboundMessage;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

const LARK_API_BASE: &str = "https://open.larksuite.com";

/// At-mention tokens as they appear in message text ("@_user_7 "), stripped
/// before the text reaches the model.
static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@_user_\d+\s*").expect("mention pattern"));

/// Top-level event-callback body. `challenge` is only present on the URL
/// verification handshake; everything else is optional-tolerant because the
/// platform sends many event shapes to the same endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub event: Option<WebhookEvent>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub sender: Option<EventSender>,
    #[serde(default)]
    pub message: Option<EventMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventSender {
    #[serde(default)]
    pub sender_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventMessage {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Present when the message belongs to a threaded topic.
    #[serde(default)]
    pub root_id: Option<String>,
    /// JSON-encoded content, e.g. `{"text":"@_user_1 hello"}`.
    #[serde(default)]
    pub content: Option<String>,
}

/// The `content` field of a text message, once decoded.
#[derive(Debug, Default, Deserialize)]
struct MessageContent {
    #[serde(default)]
    text: String,
}

/// Strip every at-mention token and trim the remainder.
fn strip_mentions(text: &str) -> String {
    MENTION_RE.replace_all(text, "").trim().to_string()
}

/// Normalize a raw event payload into an `InboundMessage`.
///
/// Returns None when the event is not actionable: no message object, no
/// message id, or no text left once mentions are stripped. The session id is
/// the thread root id when present and non-empty, the chat id otherwise, so
/// all messages of one thread share a transcript. An unparseable content
/// field reads as empty text rather than an error.
pub fn normalize(payload: &WebhookPayload) -> Option<InboundMessage> {
    let event = payload.event.as_ref()?;
    let message = event.message.as_ref()?;
    let message_id = message.message_id.clone().filter(|s| !s.is_empty())?;

    let session_id = message
        .root_id
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| message.chat_id.clone())
        .filter(|s| !s.is_empty())?;

    let content: MessageContent = message
        .content
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    let text = strip_mentions(&content.text);
    if text.is_empty() {
        return None;
    }

    let sender_type = event
        .sender
        .as_ref()
        .and_then(|s| s.sender_type.clone())
        .unwrap_or_default();

    Some(InboundMessage {
        message_id,
        session_id,
        sender_type,
        text,
    })
}

/// Lark channel connector: exchanges app credentials for a tenant token and
/// posts replies addressed by message id.
pub struct LarkChannel {
    app_id: String,
    app_secret: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TenantTokenResponse {
    #[serde(default)]
    tenant_access_token: Option<String>,
}

impl LarkChannel {
    pub fn new(
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
        base_url: Option<String>,
    ) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| LARK_API_BASE.to_string());
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Exchange app credentials for a tenant access token. Not cached; the
    /// reply path is low-volume enough that one exchange per reply is fine.
    async fn tenant_access_token(&self) -> Result<String, String> {
        let url = format!(
            "{}/open-apis/auth/v3/tenant_access_token/internal",
            self.base_url
        );
        let body = serde_json::json!({
            "app_id": self.app_id,
            "app_secret": self.app_secret,
        });
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("tenant_access_token failed: {} {}", status, body));
        }
        let data: TenantTokenResponse = res.json().await.map_err(|e| e.to_string())?;
        data.tenant_access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "tenant_access_token missing in response".to_string())
    }

    /// Post a text reply into the thread of the given message.
    pub async fn reply(&self, message_id: &str, text: &str) -> Result<(), String> {
        let token = self.tenant_access_token().await?;
        let url = format!(
            "{}/open-apis/im/v1/messages/{}/reply",
            self.base_url, message_id
        );
        let content = serde_json::json!({ "text": text }).to_string();
        let body = serde_json::json!({
            "content": content,
            "msg_type": "text",
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("reply failed: {} {}", status, body));
        }
        Ok(())
    }
}
