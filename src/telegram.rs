//! Telegram transport adapter
//!
//! Turns webhook payloads into [`IncomingMessage`] values and talks back to
//! the Bot API. Only the handful of update fields the bot uses are modeled.

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::{debug, info};

use crate::errors::{ParseError, TransportError};
use crate::models::{FetchedImage, ImageRef, IncomingMessage};

#[derive(Debug, Deserialize)]
struct RawUpdate {
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    chat: Option<RawChat>,
    text: Option<String>,
    #[serde(default)]
    photo: Vec<RawPhotoSize>,
    from: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawPhotoSize {
    file_id: String,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    language_code: Option<String>,
}

/// Parse a Telegram update body into an `IncomingMessage`
pub fn parse_incoming(raw: &[u8]) -> Result<IncomingMessage, ParseError> {
    let update: RawUpdate = serde_json::from_slice(raw)?;
    let message = update.message.ok_or(ParseError::MissingChatId)?;
    let chat_id = message
        .chat
        .and_then(|chat| chat.id)
        .ok_or(ParseError::MissingChatId)?;

    Ok(IncomingMessage {
        chat_id,
        text: message.text,
        photo: message
            .photo
            .into_iter()
            .map(|size| ImageRef {
                file_id: size.file_id,
                size: size.file_size.unwrap_or(0),
            })
            .collect(),
        language_code: message.from.and_then(|user| user.language_code),
    })
}

/// Variant with the largest declared byte size; the first one wins ties
pub fn select_largest_photo(variants: &[ImageRef]) -> Option<&ImageRef> {
    variants.iter().fold(None, |best: Option<&ImageRef>, candidate| match best {
        Some(current) if current.size >= candidate.size => Some(current),
        _ => Some(candidate),
    })
}

/// Outbound Bot API calls used by the router
#[async_trait]
pub trait BotApi: Send + Sync {
    async fn send_reply(&self, token: &str, chat_id: i64, text: &str)
        -> Result<(), TransportError>;

    /// Download the largest variant of a photo
    async fn fetch_largest_photo(
        &self,
        token: &str,
        variants: &[ImageRef],
    ) -> Result<FetchedImage, TransportError>;
}

/// Bot API client backed by teloxide
#[derive(Debug, Clone)]
pub struct TelegramClient {
    api_url: Url,
    http: reqwest::Client,
}

impl TelegramClient {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let api_url = Url::parse(api_url)
            .map_err(|e| TransportError::Telegram(format!("invalid API URL {api_url}: {e}")))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { api_url, http })
    }

    fn bot(&self, token: &str) -> Bot {
        Bot::with_client(token, self.http.clone()).set_api_url(self.api_url.clone())
    }

    fn download_url(&self, token: &str, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.api_url.as_str().trim_end_matches('/'),
            token,
            file_path
        )
    }
}

#[async_trait]
impl BotApi for TelegramClient {
    async fn send_reply(
        &self,
        token: &str,
        chat_id: i64,
        text: &str,
    ) -> Result<(), TransportError> {
        self.bot(token)
            .send_message(ChatId(chat_id), text.to_string())
            .await?;
        debug!(chat_id, reply_length = text.len(), "Reply sent");
        Ok(())
    }

    async fn fetch_largest_photo(
        &self,
        token: &str,
        variants: &[ImageRef],
    ) -> Result<FetchedImage, TransportError> {
        let photo = select_largest_photo(variants).ok_or(TransportError::NoPhoto)?;
        let file = self
            .bot(token)
            .get_file(FileId(photo.file_id.clone()))
            .await?;

        let bytes = self
            .http
            .get(self.download_url(token, &file.path))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        info!(
            file_id = %photo.file_id,
            declared_size = photo.size,
            downloaded = bytes.len(),
            "Photo downloaded"
        );

        Ok(FetchedImage {
            bytes: bytes.to_vec(),
            source_url: format!("telegram:{}", file.path),
            file_path: file.path,
        })
    }
}
