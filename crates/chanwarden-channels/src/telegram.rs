//! Telegram Bot API transport: member moderation, channel posting, owner DMs.

use std::time::Duration;

use async_trait::async_trait;
use chanwarden_core::config::TelegramSettings;
use chanwarden_core::error::{ChanwardenError, Result};
use chanwarden_core::traits::TransportGateway;
use chanwarden_core::types::{ChannelId, MemberRole, OwnerAction, OwnerMessage, PostButton, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::OnceCell;

/// Bot API client implementing the engine's transport contract.
pub struct TelegramTransport {
    bot_token: String,
    api_base: String,
    client: reqwest::Client,
    bot_id: OnceCell<UserId>,
}

impl TelegramTransport {
    pub fn new(settings: &TelegramSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| ChanwardenError::Transport(format!("HTTP client: {e}")))?;
        Ok(Self {
            bot_token: settings.bot_token.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            client,
            bot_id: OnceCell::new(),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    /// POST a Bot API method and unwrap its `result`.
    ///
    /// The request URL embeds the bot token, so it is stripped from errors.
    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChanwardenError::Transport(format!("{method} failed: {}", e.without_url())))?;

        let body: TelegramApiResponse<T> = response
            .json()
            .await
            .map_err(|e| {
                ChanwardenError::Transport(format!("Invalid {method} response: {}", e.without_url()))
            })?;
        body.into_result(method)
    }

    /// Get bot info.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        self.call("getMe", json!({})).await
    }

    async fn send(&self, method: &str, mut body: Value, buttons: &[PostButton]) -> Result<()> {
        if let Some(markup) = url_keyboard(buttons) {
            body["reply_markup"] = markup;
        }
        let _: Value = self.call(method, body).await?;
        Ok(())
    }

    async fn send_media(
        &self,
        method: &str,
        field: &str,
        channel_id: ChannelId,
        file: &str,
        caption: Option<&str>,
        buttons: &[PostButton],
    ) -> Result<()> {
        let mut body = json!({ "chat_id": channel_id });
        body[field] = json!(file);
        if let Some(caption) = caption {
            body["caption"] = json!(caption);
        }
        self.send(method, body, buttons).await
    }
}

#[async_trait]
impl TransportGateway for TelegramTransport {
    async fn agent_id(&self) -> Result<UserId> {
        self.bot_id
            .get_or_try_init(|| async {
                let me = self.get_me().await?;
                tracing::info!(
                    "🤖 Telegram bot: @{} ({})",
                    me.username.as_deref().unwrap_or("unknown"),
                    me.id
                );
                Ok::<_, ChanwardenError>(me.id)
            })
            .await
            .copied()
    }

    async fn remove_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<()> {
        let _: bool = self
            .call(
                "banChatMember",
                json!({ "chat_id": channel_id, "user_id": user_id }),
            )
            .await?;
        Ok(())
    }

    async fn unban_member(&self, channel_id: ChannelId, user_id: UserId) -> Result<()> {
        let _: bool = self
            .call(
                "unbanChatMember",
                json!({ "chat_id": channel_id, "user_id": user_id, "only_if_banned": true }),
            )
            .await?;
        Ok(())
    }

    async fn get_member_role(&self, channel_id: ChannelId, user_id: UserId) -> Result<MemberRole> {
        let member: TelegramChatMember = self
            .call(
                "getChatMember",
                json!({ "chat_id": channel_id, "user_id": user_id }),
            )
            .await?;
        Ok(member.role())
    }

    async fn get_member_count(&self, channel_id: ChannelId) -> Result<i64> {
        self.call("getChatMemberCount", json!({ "chat_id": channel_id }))
            .await
    }

    async fn send_message(&self, channel_id: ChannelId, text: &str, buttons: &[PostButton]) -> Result<()> {
        self.send(
            "sendMessage",
            json!({ "chat_id": channel_id, "text": text }),
            buttons,
        )
        .await
    }

    async fn send_photo(
        &self,
        channel_id: ChannelId,
        photo: &str,
        caption: Option<&str>,
        buttons: &[PostButton],
    ) -> Result<()> {
        self.send_media("sendPhoto", "photo", channel_id, photo, caption, buttons)
            .await
    }

    async fn send_video(
        &self,
        channel_id: ChannelId,
        video: &str,
        caption: Option<&str>,
        buttons: &[PostButton],
    ) -> Result<()> {
        self.send_media("sendVideo", "video", channel_id, video, caption, buttons)
            .await
    }

    async fn send_document(
        &self,
        channel_id: ChannelId,
        document: &str,
        caption: Option<&str>,
        buttons: &[PostButton],
    ) -> Result<()> {
        self.send_media("sendDocument", "document", channel_id, document, caption, buttons)
            .await
    }

    async fn send_sticker(&self, channel_id: ChannelId, sticker: &str, buttons: &[PostButton]) -> Result<()> {
        self.send(
            "sendSticker",
            json!({ "chat_id": channel_id, "sticker": sticker }),
            buttons,
        )
        .await
    }

    async fn notify_owner(&self, owner_id: UserId, message: &OwnerMessage) -> Result<()> {
        let _: Value = self.call("sendMessage", owner_message_body(owner_id, message)).await?;
        Ok(())
    }
}

/// Rights failures are told apart from everything else by the API description.
pub fn classify_error(method: &str, description: &str) -> ChanwardenError {
    let lower = description.to_lowercase();
    if lower.contains("not enough rights") || lower.contains("restrict") {
        ChanwardenError::InsufficientRights(format!("{method}: {description}"))
    } else {
        ChanwardenError::Transport(format!("{method}: {description}"))
    }
}

/// One URL button per row.
pub fn url_keyboard(buttons: &[PostButton]) -> Option<Value> {
    if buttons.is_empty() {
        return None;
    }
    let rows: Vec<Value> = buttons
        .iter()
        .map(|b| json!([{ "text": b.text, "url": b.url }]))
        .collect();
    Some(json!({ "inline_keyboard": rows }))
}

/// One callback button per row.
pub fn callback_keyboard(actions: &[OwnerAction]) -> Option<Value> {
    if actions.is_empty() {
        return None;
    }
    let rows: Vec<Value> = actions
        .iter()
        .map(|a| json!([{ "text": a.label, "callback_data": a.callback_data }]))
        .collect();
    Some(json!({ "inline_keyboard": rows }))
}

fn owner_message_body(owner_id: UserId, message: &OwnerMessage) -> Value {
    let mut body = json!({
        "chat_id": owner_id,
        "text": message.text,
        "parse_mode": "HTML",
        "disable_web_page_preview": true,
    });
    if message.silent {
        body["disable_notification"] = json!(true);
    }
    if let Some(markup) = callback_keyboard(&message.actions) {
        body["reply_markup"] = markup;
    }
    body
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

impl<T> TelegramApiResponse<T> {
    pub fn into_result(self, method: &str) -> Result<T> {
        if !self.ok {
            let description = self.description.unwrap_or_default();
            return Err(classify_error(method, &description));
        }
        self.result
            .ok_or_else(|| ChanwardenError::Transport(format!("{method}: empty result")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChatMember {
    pub status: String,
    pub user: Option<TelegramUser>,
    /// Present for administrators only.
    pub can_restrict_members: Option<bool>,
}

impl TelegramChatMember {
    pub fn role(&self) -> MemberRole {
        match self.status.as_str() {
            "creator" => MemberRole::Creator,
            "administrator" => MemberRole::Administrator {
                can_restrict_members: self.can_restrict_members.unwrap_or(true),
            },
            "restricted" => MemberRole::Restricted,
            "left" => MemberRole::Left,
            "kicked" => MemberRole::Banned,
            _ => MemberRole::Member,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> TelegramTransport {
        TelegramTransport::new(&TelegramSettings {
            bot_token: "123456:ABCDEF".into(),
            api_base: "https://api.telegram.org/".into(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_api_url() {
        assert_eq!(
            transport().api_url("getMe"),
            "https://api.telegram.org/bot123456:ABCDEF/getMe"
        );
    }

    #[tokio::test]
    async fn test_connection_errors_do_not_leak_token() {
        let transport = TelegramTransport::new(&TelegramSettings {
            bot_token: "123456:SECRETTOKENVALUE".into(),
            api_base: "http://127.0.0.1:1".into(),
            request_timeout_secs: 5,
        })
        .unwrap();

        let err = transport.remove_member(100, 42).await.unwrap_err().to_string();
        assert!(err.contains("banChatMember"));
        assert!(!err.contains("SECRETTOKENVALUE"));
    }

    #[test]
    fn test_rights_errors_are_classified() {
        let err = classify_error(
            "banChatMember",
            "Bad Request: not enough rights to restrict/unrestrict chat member",
        );
        assert!(err.is_insufficient_rights());

        let err = classify_error("banChatMember", "Too Many Requests: retry after 5");
        assert!(!err.is_insufficient_rights());
    }

    #[test]
    fn test_error_response_into_result() {
        let body: TelegramApiResponse<bool> = serde_json::from_str(
            r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        )
        .unwrap();
        let err = body.into_result("sendMessage").unwrap_err();
        assert!(matches!(err, ChanwardenError::Transport(ref m) if m.contains("chat not found")));

        let body: TelegramApiResponse<i64> =
            serde_json::from_str(r#"{"ok":true,"result":1234}"#).unwrap();
        assert_eq!(body.into_result("getChatMemberCount").unwrap(), 1234);
    }

    #[test]
    fn test_chat_member_roles() {
        let parse = |json: &str| serde_json::from_str::<TelegramChatMember>(json).unwrap().role();

        assert_eq!(parse(r#"{"status":"creator"}"#), MemberRole::Creator);
        assert_eq!(
            parse(r#"{"status":"administrator","can_restrict_members":false}"#),
            MemberRole::Administrator { can_restrict_members: false }
        );
        assert_eq!(
            parse(r#"{"status":"administrator"}"#),
            MemberRole::Administrator { can_restrict_members: true }
        );
        assert_eq!(parse(r#"{"status":"member"}"#), MemberRole::Member);
        assert_eq!(parse(r#"{"status":"kicked"}"#), MemberRole::Banned);
    }

    #[test]
    fn test_url_keyboard_rows() {
        assert!(url_keyboard(&[]).is_none());
        let markup = url_keyboard(&[
            PostButton { text: "Join".into(), url: "https://t.me/a".into() },
            PostButton { text: "Site".into(), url: "https://example.org".into() },
        ])
        .unwrap();
        let rows = markup["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0]["url"], "https://example.org");
    }

    #[test]
    fn test_owner_message_body() {
        let message = OwnerMessage::new("<b>Lead</b>")
            .with_action("↩️ Undo ban", "undo_ban:42:100:7")
            .silent();
        let body = owner_message_body(7, &message);

        assert_eq!(body["chat_id"], 7);
        assert_eq!(body["parse_mode"], "HTML");
        assert_eq!(body["disable_notification"], true);
        assert_eq!(
            body["reply_markup"]["inline_keyboard"][0][0]["callback_data"],
            "undo_ban:42:100:7"
        );

        let loud = owner_message_body(7, &OwnerMessage::new("x"));
        assert!(loud.get("disable_notification").is_none());
        assert!(loud.get("reply_markup").is_none());
    }
}
