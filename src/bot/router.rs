//! Conversation router
//!
//! One webhook delivery in, at most one reply out. The router reads the chat's
//! session state, dispatches on command or photo, and never fails: every error
//! is logged and turned into a generic acknowledgement.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::db::RecordStore;
use crate::errors::{AppError, ParseError};
use crate::identity::IdentityResolver;
use crate::localization::LocalizationManager;
use crate::models::{BotSettings, ChatState, IncomingMessage};
use crate::receipt::ReceiptExtractor;
use crate::reconciliation::ReconciliationEngine;
use crate::session::{ChatLocks, SessionStore};
use crate::telegram::{parse_incoming, BotApi};
use crate::vision::VisionModel;

use super::replies::{
    format_expense_saved, format_income_logged, format_invoice_list, format_parse_failure,
    help_text,
};

/// Everything the router talks to, constructed once at startup
pub struct Capabilities {
    pub store: Arc<dyn RecordStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub locks: ChatLocks,
    pub identity: IdentityResolver,
    pub extractor: ReceiptExtractor,
    pub engine: ReconciliationEngine,
    pub bot_api: Arc<dyn BotApi>,
    pub messages: LocalizationManager,
    pub session_ttl: Duration,
}

impl Capabilities {
    pub fn new(
        store: Arc<dyn RecordStore>,
        sessions: Arc<dyn SessionStore>,
        bot_api: Arc<dyn BotApi>,
        vision: Arc<dyn VisionModel>,
        messages: LocalizationManager,
        session_ttl: Duration,
    ) -> Self {
        Self {
            identity: IdentityResolver::new(store.clone()),
            engine: ReconciliationEngine::new(store.clone()),
            extractor: ReceiptExtractor::new(vision),
            locks: ChatLocks::new(),
            store,
            sessions,
            bot_api,
            messages,
            session_ttl,
        }
    }
}

/// Acknowledgement returned to the webhook caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookStatus {
    Ok,
    NoChatId,
    Error,
}

impl WebhookStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookStatus::Ok => "ok",
            WebhookStatus::NoChatId => "no chat_id",
            WebhookStatus::Error => "error",
        }
    }
}

/// What a photo means for the current request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoPolicy {
    /// Read it as a receipt and log an expense
    ExpenseReceipt,
    /// Treat it as proof of a customer transfer
    PaymentProof,
    /// Payment proofs must be announced with `/bukti_transfer` first
    RequireCommand,
}

impl PhotoPolicy {
    pub fn select(state: ChatState, ai_enabled: bool) -> Self {
        match state {
            ChatState::AwaitingImage => PhotoPolicy::PaymentProof,
            ChatState::Idle if ai_enabled => PhotoPolicy::ExpenseReceipt,
            ChatState::Idle => PhotoPolicy::RequireCommand,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    CheckInvoices,
    TransferProof,
    Cancel,
    Unknown(String),
}

impl Command {
    /// Command in the first token of `text`, with any `@botname` suffix
    /// stripped. `None` for text that is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let token = text.split_whitespace().next()?;
        let name = token.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name).to_lowercase();

        Some(match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "cek_tagihan" => Command::CheckInvoices,
            "bukti_transfer" => Command::TransferProof,
            "batal" => Command::Cancel,
            _ => Command::Unknown(name),
        })
    }
}

struct RequestContext<'a> {
    caps: &'a Capabilities,
    message: &'a IncomingMessage,
    settings: &'a BotSettings,
    token: &'a str,
    language: &'a str,
}

impl RequestContext<'_> {
    fn t(&self, key: &str) -> String {
        self.caps.messages.get_message(self.language, key, None)
    }
}

/// Handle one raw webhook payload
pub async fn handle_update(caps: &Capabilities, raw: &[u8]) -> WebhookStatus {
    let message = match parse_incoming(raw) {
        Ok(message) => message,
        Err(ParseError::MissingChatId) => {
            debug!("Update without chat id ignored");
            return WebhookStatus::NoChatId;
        }
        Err(e) => {
            warn!(error = %e, "Unreadable webhook payload");
            return WebhookStatus::Error;
        }
    };
    let chat_id = message.chat_id;

    // Held until the reply is sent
    let _guard = caps.locks.acquire(chat_id).await;

    let settings = match caps.store.load_settings().await {
        Ok(settings) => settings,
        Err(e) => {
            error!(chat_id, error = %e, "Failed to load bot settings");
            return WebhookStatus::Error;
        }
    };
    let Some(token) = settings.bot_token.as_deref() else {
        error!(chat_id, "Bot token is not configured");
        return WebhookStatus::Error;
    };

    let language = caps
        .messages
        .resolve_language(message.language_code.as_deref());
    let ctx = RequestContext {
        caps,
        message: &message,
        settings: &settings,
        token,
        language,
    };

    let (reply, status) = match route(&ctx).await {
        Ok(Some(reply)) => (reply, WebhookStatus::Ok),
        Ok(None) => return WebhookStatus::Ok,
        Err(e) => {
            error!(chat_id, error = %e, "Failed to handle update");
            (ctx.t("processing-error"), WebhookStatus::Error)
        }
    };

    match caps.bot_api.send_reply(token, chat_id, &reply).await {
        Ok(()) => status,
        Err(e) => {
            error!(chat_id, error = %e, "Failed to send reply");
            WebhookStatus::Error
        }
    }
}

async fn route(ctx: &RequestContext<'_>) -> Result<Option<String>, AppError> {
    let chat_id = ctx.message.chat_id;
    let state = ctx
        .caps
        .sessions
        .get(chat_id)
        .await
        .map(|session| session.state)
        .unwrap_or_default();
    let command = ctx.message.text.as_deref().and_then(Command::parse);
    debug!(chat_id, ?state, ?command, has_photo = ctx.message.has_photo(), "Routing update");

    if ctx.message.has_photo() {
        return match PhotoPolicy::select(state, ctx.settings.ai_enabled) {
            PhotoPolicy::PaymentProof => handle_payment_proof(ctx).await.map(Some),
            PhotoPolicy::RequireCommand => Ok(Some(ctx.t("use-transfer-command-first"))),
            PhotoPolicy::ExpenseReceipt => handle_expense_receipt(ctx).await.map(Some),
        };
    }

    if state == ChatState::AwaitingImage {
        return Ok(Some(match command {
            Some(Command::Cancel) => {
                ctx.caps.sessions.delete(chat_id).await;
                info!(chat_id, "Transfer proof cancelled");
                ctx.t("cancelled")
            }
            _ => ctx.t("send-photo-first"),
        }));
    }

    let Some(command) = command else {
        return Ok(ctx.message.text.as_ref().map(|_| ctx.t("unknown-command")));
    };

    match command {
        Command::Start | Command::Help => Ok(Some(help_text(
            &ctx.caps.messages,
            ctx.language,
            ctx.settings.ai_enabled,
        ))),
        Command::CheckInvoices => {
            let identity = ctx.caps.identity.resolve(chat_id).await?;
            let Some(customer) = identity.customer else {
                return Ok(Some(ctx.t("not-registered")));
            };
            let invoices = ctx.caps.engine.open_invoices(&customer.id).await?;
            Ok(Some(format_invoice_list(&ctx.caps.messages, ctx.language, &invoices)))
        }
        Command::TransferProof => {
            let identity = ctx.caps.identity.resolve(chat_id).await?;
            if identity.customer.is_none() {
                return Ok(Some(ctx.t("not-registered")));
            }
            ctx.caps
                .sessions
                .set(chat_id, ChatState::AwaitingImage, ctx.caps.session_ttl)
                .await;
            info!(chat_id, "Awaiting transfer proof");
            Ok(Some(ctx.t("awaiting-transfer-photo")))
        }
        Command::Cancel => Ok(Some(ctx.t("nothing-to-cancel"))),
        Command::Unknown(name) => {
            debug!(chat_id, command = %name, "Unknown command");
            Ok(Some(ctx.t("unknown-command")))
        }
    }
}

async fn handle_payment_proof(ctx: &RequestContext<'_>) -> Result<String, AppError> {
    let chat_id = ctx.message.chat_id;
    ctx.caps.sessions.delete(chat_id).await;

    let identity = ctx.caps.identity.resolve(chat_id).await?;
    if identity.customer.is_none() {
        return Ok(ctx.t("not-registered"));
    }

    let image = ctx
        .caps
        .bot_api
        .fetch_largest_photo(ctx.token, &ctx.message.photo)
        .await?;
    let logged = ctx.caps.engine.log_income(&identity, Some(&image)).await?;

    Ok(format_income_logged(&ctx.caps.messages, ctx.language, &logged))
}

async fn handle_expense_receipt(ctx: &RequestContext<'_>) -> Result<String, AppError> {
    let chat_id = ctx.message.chat_id;
    let identity = ctx.caps.identity.resolve(chat_id).await?;
    let categories = ctx.caps.store.expense_categories().await?;

    let image = ctx
        .caps
        .bot_api
        .fetch_largest_photo(ctx.token, &ctx.message.photo)
        .await?;

    let receipt = match ctx
        .caps
        .extractor
        .extract(&image.bytes, &categories, ctx.settings)
        .await
    {
        Ok(receipt) => receipt,
        Err(AppError::Extraction(e)) => {
            return Ok(format_parse_failure(&ctx.caps.messages, ctx.language, &e.raw));
        }
        Err(e) => return Err(e),
    };

    let record = ctx
        .caps
        .engine
        .log_expense(&identity, &receipt, Some(&image))
        .await?;
    Ok(format_expense_saved(&ctx.caps.messages, ctx.language, &record))
}
