//! # Error Types Module
//!
//! Error taxonomy for the webhook pipeline. Outcomes that are part of normal
//! operation (unregistered chat, unknown category, no open invoice, already
//! settled invoice) are modeled as values elsewhere, not as errors.

use rust_decimal::Decimal;
use thiserror::Error;

/// Inbound webhook payload could not be turned into an `IncomingMessage`
#[derive(Debug, Error)]
pub enum ParseError {
    /// The body is not a JSON Telegram update
    #[error("malformed update payload: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The update carries no message or no chat id
    #[error("update has no chat id")]
    MissingChatId,
}

/// Network or API failure talking to Telegram or the vision model
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("Telegram API error: {0}")]
    Telegram(String),
    #[error("vision model error: {0}")]
    Model(String),
    #[error("no photo variant to fetch")]
    NoPhoto,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs carry the bot token
        TransportError::Http(err.without_url())
    }
}

impl From<teloxide::RequestError> for TransportError {
    fn from(err: teloxide::RequestError) -> Self {
        TransportError::Telegram(err.to_string())
    }
}

/// The model answered, but its answer is not a usable receipt
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ExtractionError {
    pub reason: String,
    /// Extracted text, surfaced verbatim to the user as a diagnostic
    pub raw: String,
}

impl ExtractionError {
    pub fn new(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.into(),
        }
    }
}

/// Business-records repository failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("record not found: {0}")]
    NotFound(String),
    /// A payment allocation exceeds what is still outstanding on the invoice
    #[error("allocation of {allocated} exceeds outstanding amount of invoice {invoice}")]
    OverAllocation { invoice: String, allocated: Decimal },
    #[error("store error: {0}")]
    Other(String),
}

/// Payment entry could not be created for a submitted income log
#[derive(Debug, Error)]
pub enum PostingError {
    #[error("invoice {0} not found")]
    InvoiceNotFound(String),
    #[error("company {0} has no default bank account")]
    MissingBankAccount(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfacing at the conversation router boundary
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing bot or AI credentials
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Posting(#[from] PostingError),
}
