//! # Record Model Module
//!
//! Typed records exchanged between the router, the reconciliation engine and
//! the business-records store.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Document lifecycle flag shared by invoices and income logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocStatus {
    #[default]
    Draft,
    Submitted,
    Cancelled,
}

impl DocStatus {
    pub fn as_i16(self) -> i16 {
        match self {
            DocStatus::Draft => 0,
            DocStatus::Submitted => 1,
            DocStatus::Cancelled => 2,
        }
    }

    pub fn from_i16(value: i16) -> Self {
        match value {
            1 => DocStatus::Submitted,
            2 => DocStatus::Cancelled,
            _ => DocStatus::Draft,
        }
    }
}

/// A single photo size variant as announced by Telegram
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub file_id: String,
    pub size: u64,
}

/// Normalized inbound chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub text: Option<String>,
    /// Every resolution variant of the photo, empty for non-photo messages
    pub photo: Vec<ImageRef>,
    pub language_code: Option<String>,
}

impl IncomingMessage {
    pub fn has_photo(&self) -> bool {
        !self.photo.is_empty()
    }
}

/// Conversation state of a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChatState {
    #[default]
    Idle,
    AwaitingImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub chat_id: i64,
    pub state: ChatState,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl SessionState {
    pub fn new(chat_id: i64, state: ChatState, ttl: Duration) -> Self {
        Self {
            chat_id,
            state,
            created_at: Utc::now(),
            ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => now >= self.created_at + ttl,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
}

/// Registration link between a Telegram chat and the business records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramUser {
    pub telegram_user_id: i64,
    pub user: Option<String>,
    pub customer: Option<String>,
}

/// Who is writing, as far as the business records know
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub chat_id: i64,
    pub system_user: Option<String>,
    pub customer: Option<Customer>,
}

impl Identity {
    pub fn unregistered(chat_id: i64) -> Self {
        Self {
            chat_id,
            ..Default::default()
        }
    }
}

/// Structured data read from a receipt image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedReceipt {
    pub description: String,
    pub category: String,
    pub amount: Decimal,
    /// Whether `category` is one of the configured expense categories
    pub category_valid: bool,
}

/// Photo downloaded from Telegram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    /// Telegram-side path, e.g. `photos/file_12.jpg`
    pub file_path: String,
    /// Download URL without credentials
    pub source_url: String,
}

impl FetchedImage {
    pub fn file_name(&self) -> &str {
        self.file_path.rsplit('/').next().unwrap_or(&self.file_path)
    }
}

/// Image to attach to a record being created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    pub file_name: String,
    pub file_url: String,
}

impl NewImage {
    pub fn attach_to(self, doctype: &str, name: &str) -> NewFileAttachment {
        NewFileAttachment {
            file_name: self.file_name,
            file_url: self.file_url,
            attached_to_doctype: doctype.to_string(),
            attached_to_name: name.to_string(),
        }
    }
}

impl From<&FetchedImage> for NewImage {
    fn from(image: &FetchedImage) -> Self {
        Self {
            file_name: image.file_name().to_string(),
            file_url: image.source_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFileAttachment {
    pub file_name: String,
    pub file_url: String,
    pub attached_to_doctype: String,
    pub attached_to_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub id: String,
    pub file_name: String,
    pub file_url: String,
    pub attached_to_doctype: String,
    pub attached_to_name: String,
}

pub const EXPENSE_LOG_DOCTYPE: &str = "Telegram Expense Log";
pub const INCOME_LOG_DOCTYPE: &str = "Telegram Income Log";

/// Fields required to append an expense log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExpenseLog {
    pub chat_id: i64,
    pub description: String,
    pub category: String,
    pub category_verified: bool,
    pub amount: Decimal,
    pub user: Option<String>,
}

impl NewExpenseLog {
    pub fn new(identity: &Identity, receipt: &ExtractedReceipt) -> Self {
        Self {
            chat_id: identity.chat_id,
            description: receipt.description.clone(),
            category: receipt.category.clone(),
            category_verified: receipt.category_valid,
            amount: receipt.amount,
            user: identity.system_user.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseLogRecord {
    pub id: String,
    pub chat_id: i64,
    pub description: String,
    pub category: String,
    pub category_verified: bool,
    pub amount: Decimal,
    pub user: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create a draft income log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIncomeLog {
    pub chat_id: i64,
    pub user: Option<String>,
    pub customer: String,
    pub matched_invoice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeLogRecord {
    pub id: String,
    pub chat_id: i64,
    pub user: Option<String>,
    pub customer: String,
    pub matched_invoice: Option<String>,
    pub image: Option<String>,
    pub docstatus: DocStatus,
    pub payment_entry: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub customer: String,
    pub company: String,
    pub posting_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub grand_total: Decimal,
    pub outstanding_amount: Decimal,
    /// Receivable account the invoice was booked against
    pub debit_to: String,
    pub docstatus: DocStatus,
}

impl Invoice {
    pub fn is_open(&self) -> bool {
        self.docstatus == DocStatus::Submitted && self.outstanding_amount > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentType {
    Receive,
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentType::Receive => write!(f, "Receive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReference {
    pub reference_doctype: String,
    pub reference_name: String,
    pub total_amount: Decimal,
    pub outstanding_amount: Decimal,
    pub allocated_amount: Decimal,
}

/// Payment entry as handed to the store for creation and submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPaymentEntry {
    pub payment_type: PaymentType,
    pub party_type: String,
    pub party: String,
    pub company: String,
    pub posting_date: NaiveDate,
    pub paid_amount: Decimal,
    pub received_amount: Decimal,
    pub paid_from: String,
    pub paid_to: String,
    pub reference_no: String,
    pub reference_date: NaiveDate,
    pub references: Vec<PaymentReference>,
}

impl NewPaymentEntry {
    /// Full settlement of `invoice` received into `bank_account`
    pub fn settle_invoice(
        invoice: &Invoice,
        bank_account: &str,
        reference_no: &str,
        today: NaiveDate,
    ) -> Self {
        Self {
            payment_type: PaymentType::Receive,
            party_type: "Customer".to_string(),
            party: invoice.customer.clone(),
            company: invoice.company.clone(),
            posting_date: today,
            paid_amount: invoice.outstanding_amount,
            received_amount: invoice.outstanding_amount,
            paid_from: invoice.debit_to.clone(),
            paid_to: bank_account.to_string(),
            reference_no: reference_no.to_string(),
            reference_date: today,
            references: vec![PaymentReference {
                reference_doctype: "Sales Invoice".to_string(),
                reference_name: invoice.id.clone(),
                total_amount: invoice.grand_total,
                outstanding_amount: invoice.outstanding_amount,
                allocated_amount: invoice.outstanding_amount,
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub id: String,
    pub docstatus: DocStatus,
    #[serde(flatten)]
    pub entry: NewPaymentEntry,
}

/// Externally managed bot configuration, read per request
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BotSettings {
    pub bot_token: Option<String>,
    pub ai_api_key: Option<String>,
    pub ai_enabled: bool,
    pub ai_model: String,
}

impl fmt::Debug for BotSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotSettings")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("ai_api_key", &self.ai_api_key.as_ref().map(|_| "<redacted>"))
            .field("ai_enabled", &self.ai_enabled)
            .field("ai_model", &self.ai_model)
            .finish()
    }
}

pub const DEFAULT_AI_MODEL: &str = "gemini-1.5-flash";
