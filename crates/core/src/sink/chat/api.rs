//! Thin Telegram Bot HTTP API client: long-poll updates, text messages,
//! photo uploads.

use reqwest::multipart;
use serde::Deserialize;
use serde_json::json;

use crate::sink::SinkError;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

pub struct BotApi {
    client: reqwest::Client,
    base: String,
}

impl BotApi {
    pub fn new(client: reqwest::Client, api_url: &str, token: &str) -> Self {
        Self {
            client,
            base: format!("{}/bot{token}", api_url.trim_end_matches('/')),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, SinkError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base))
            .json(&body)
            .send()
            .await?;
        let envelope: ApiResponse<T> = response.json().await?;
        if !envelope.ok {
            return Err(SinkError::Transport(format!(
                "{method}: {}",
                envelope.description.unwrap_or_else(|| "unknown".to_string())
            )));
        }
        envelope
            .result
            .ok_or_else(|| SinkError::Transport(format!("{method}: empty result")))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout: u64) -> Result<Vec<Update>, SinkError> {
        self.call(
            "getUpdates",
            json!({ "offset": offset, "timeout": timeout, "allowed_updates": ["message"] }),
        )
        .await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), SinkError> {
        let _: Message = self
            .call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await?;
        Ok(())
    }

    pub async fn send_photo(
        &self,
        chat_id: i64,
        caption: &str,
        photo: &[u8],
    ) -> Result<(), SinkError> {
        let form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part(
                "photo",
                multipart::Part::bytes(photo.to_vec()).file_name("poster.jpg"),
            );
        let response = self
            .client
            .post(format!("{}/sendPhoto", self.base))
            .multipart(form)
            .send()
            .await?;
        let envelope: ApiResponse<Message> = response.json().await?;
        if !envelope.ok {
            return Err(SinkError::Transport(format!(
                "sendPhoto: {}",
                envelope.description.unwrap_or_else(|| "unknown".to_string())
            )));
        }
        Ok(())
    }
}
