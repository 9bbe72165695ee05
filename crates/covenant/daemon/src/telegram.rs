//! Telegram Bot API actuator
//!
//! Maps the capability vocabulary onto `ChatPermissions`. Capability names
//! match the Bot API permission fields with the `can_` prefix dropped.

use crate::error::{DaemonError, DaemonResult};
use async_trait::async_trait;
use covenant_gate::{Notice, PermissionActuator, PlatformError, PlatformResult, Presence};
use covenant_types::{
    AckToken, Capability, CapabilitySet, MemberId, MessageRef, SpaceId, SpaceKind, SpaceRef,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// Label of the policy link button
const LINK_BUTTON: &str = "View Code of Conduct";

/// Label of the acknowledgement button in the onboarding post
const AGREE_BUTTON: &str = "View & Agree to the Code of Conduct";

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,

    /// Only sent for `restricted` members
    #[serde(default)]
    is_member: Option<bool>,
}

impl ChatMember {
    fn presence(&self) -> Presence {
        match (self.status.as_str(), self.is_member) {
            ("left" | "kicked", _) => Presence::Absent,
            ("restricted", Some(false)) => Presence::Absent,
            _ => Presence::Present,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    title: Option<String>,
}

impl Chat {
    fn space_kind(&self) -> SpaceKind {
        match self.kind.as_str() {
            "group" => SpaceKind::Group,
            "supergroup" => SpaceKind::Supergroup,
            "channel" => SpaceKind::Channel,
            _ => SpaceKind::Private,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Why a Bot API call failed
#[derive(Debug)]
enum CallError {
    Api { code: u16, description: String },
    Transport(String),
}

impl CallError {
    /// The member never opened a chat with the bot or blocked it
    fn is_unreachable(&self) -> bool {
        match self {
            CallError::Api { code, description } => {
                *code == 403 || (*code == 400 && description.contains("chat not found"))
            }
            CallError::Transport(_) => false,
        }
    }
}

impl From<CallError> for PlatformError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Api { code, description } => {
                PlatformError::Rejected(format!("{}: {}", code, description))
            }
            CallError::Transport(msg) => PlatformError::Transport(msg),
        }
    }
}

/// `ChatPermissions` granting exactly `capabilities`
pub fn chat_permissions(capabilities: &CapabilitySet) -> Value {
    let fields: Map<String, Value> = Capability::ALL
        .iter()
        .map(|c| (format!("can_{}", c.as_str()), Value::Bool(capabilities.contains(*c))))
        .collect();
    Value::Object(fields)
}

fn link_keyboard(notice: &Notice) -> Option<Value> {
    notice.link.as_ref().map(|url| {
        json!({
            "inline_keyboard": [[{ "text": LINK_BUTTON, "url": url }]]
        })
    })
}

/// Permission actuator backed by the Telegram Bot API
#[derive(Clone)]
pub struct TelegramActuator {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramActuator {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        request_timeout: Duration,
    ) -> DaemonResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DaemonError::Platform(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, CallError> {
        let url = format!("{}/bot{}/{}", self.api_base, self.token, method);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            // reqwest errors carry the URL, which contains the token
            .map_err(|e| CallError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        match serde_json::from_str::<ApiResponse<T>>(&text) {
            Ok(ApiResponse {
                ok: true,
                result: Some(result),
                ..
            }) => Ok(result),
            Ok(envelope) => Err(CallError::Api {
                code: envelope.error_code.unwrap_or_else(|| status.as_u16()),
                description: envelope
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
            Err(_) if !status.is_success() => Err(CallError::Api {
                code: status.as_u16(),
                description: text,
            }),
            Err(e) => Err(CallError::Transport(format!(
                "Unreadable {} response: {}",
                method, e
            ))),
        }
    }

    async fn set_permissions(
        &self,
        member: MemberId,
        space: SpaceId,
        capabilities: &CapabilitySet,
    ) -> PlatformResult<()> {
        self.call::<bool>(
            "restrictChatMember",
            json!({
                "chat_id": space.get(),
                "user_id": member.get(),
                "permissions": chat_permissions(capabilities),
                "use_independent_chat_permissions": true,
            }),
        )
        .await?;
        Ok(())
    }

    async fn send(&self, chat_id: i64, text: &str, reply_markup: Option<Value>) -> Result<i64, CallError> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if let Some(markup) = reply_markup {
            body["reply_markup"] = markup;
        }
        let sent: SentMessage = self.call("sendMessage", body).await?;
        Ok(sent.message_id)
    }

    /// Post the onboarding message whose button carries the acknowledgement
    /// token for `space`. Returns the new message id.
    pub async fn post_onboarding(&self, space: SpaceId, notice: &Notice) -> PlatformResult<i64> {
        let mut rows = vec![vec![json!({
            "text": AGREE_BUTTON,
            "callback_data": AckToken::new(space).to_string(),
        })]];
        if let Some(url) = &notice.link {
            rows.push(vec![json!({ "text": LINK_BUTTON, "url": url })]);
        }

        let message_id = self
            .send(space.get(), &notice.text, Some(json!({ "inline_keyboard": rows })))
            .await?;
        tracing::info!(space = %space, message_id, "Posted onboarding message");
        Ok(message_id)
    }
}

impl std::fmt::Debug for TelegramActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramActuator")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PermissionActuator for TelegramActuator {
    async fn restrict(&self, member: MemberId, space: SpaceId) -> PlatformResult<()> {
        self.set_permissions(member, space, &CapabilitySet::none()).await
    }

    async fn unrestrict(
        &self,
        member: MemberId,
        space: SpaceId,
        capabilities: &CapabilitySet,
    ) -> PlatformResult<()> {
        self.set_permissions(member, space, capabilities).await
    }

    async fn delete_message(&self, message: &MessageRef) -> PlatformResult<()> {
        self.call::<bool>(
            "deleteMessage",
            json!({
                "chat_id": message.space_id.get(),
                "message_id": message.message_id.get(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn send_direct_notice(&self, member: MemberId, notice: &Notice) -> PlatformResult<()> {
        match self.send(member.get(), &notice.text, link_keyboard(notice)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_unreachable() => Err(PlatformError::Unreachable(match e {
                CallError::Api { description, .. } => description,
                CallError::Transport(msg) => msg,
            })),
            Err(e) => Err(e.into()),
        }
    }

    async fn send_space_notice(&self, space: SpaceId, notice: &Notice) -> PlatformResult<()> {
        self.send(space.get(), &notice.text, link_keyboard(notice))
            .await?;
        Ok(())
    }

    async fn member_presence(&self, member: MemberId, space: SpaceId) -> PlatformResult<Presence> {
        let chat_member: ChatMember = self
            .call(
                "getChatMember",
                json!({ "chat_id": space.get(), "user_id": member.get() }),
            )
            .await?;

        Ok(chat_member.presence())
    }

    async fn lookup_space(&self, space: SpaceId) -> PlatformResult<Option<SpaceRef>> {
        match self
            .call::<Chat>("getChat", json!({ "chat_id": space.get() }))
            .await
        {
            Ok(chat) => {
                let mut found = SpaceRef::group(chat.id).with_kind(chat.space_kind());
                found.title = chat.title;
                Ok(Some(found))
            }
            // Unknown chat, or one the bot was removed from
            Err(CallError::Api { code: 400 | 403, .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
