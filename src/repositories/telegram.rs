use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::Messenger;
use crate::models::channels::{ChannelRef, Membership};

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
    is_member: Option<bool>,
}

pub struct TelegramApi {
    url: String,
    client: reqwest::Client,
}

impl TelegramApi {
    pub fn new(api_url: &str, bot_token: &str) -> Self {
        Self {
            url: format!("{}/bot{}", api_url.trim_end_matches('/'), bot_token),
            client: reqwest::Client::new(),
        }
    }
}

/// Errors meaning the bot cannot see the channel's members at all.
fn is_uninspectable(description: &str) -> bool {
    let low = description.to_lowercase();
    ["forbidden", "not a member", "chat not found", "member list is inaccessible"]
        .iter()
        .any(|marker| low.contains(marker))
}

fn member_status(member: &ChatMember) -> Membership {
    match member.status.as_str() {
        "creator" | "administrator" | "member" => Membership::Member,
        "restricted" if member.is_member.unwrap_or(false) => Membership::Member,
        _ => Membership::NotMember,
    }
}

#[async_trait]
impl Messenger for TelegramApi {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), anyhow::Error> {
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let response: ApiResponse<serde_json::Value> = self
            .client
            .post(format!("{}/sendMessage", self.url))
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            bail!(
                "Telegram: sendMessage failed: {}",
                response.description.unwrap_or_default()
            );
        }

        Ok(())
    }

    async fn membership(
        &self,
        channel: &ChannelRef,
        user_id: i64,
    ) -> Result<Membership, anyhow::Error> {
        let Some(chat_id) = channel.chat_id() else {
            return Ok(Membership::NotMember);
        };

        let payload = json!({
            "chat_id": chat_id,
            "user_id": user_id,
        });

        let response: ApiResponse<ChatMember> = self
            .client
            .post(format!("{}/getChatMember", self.url))
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        match (response.ok, response.result) {
            (true, Some(member)) => Ok(member_status(&member)),
            (_, _) => {
                let description = response.description.unwrap_or_default();
                if is_uninspectable(&description) {
                    Ok(Membership::Uninspectable)
                } else {
                    bail!("Telegram: getChatMember failed: {}", description)
                }
            }
        }
    }
}
