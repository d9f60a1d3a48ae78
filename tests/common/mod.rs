//! Shared doubles and fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use telexpense::bot::Capabilities;
use telexpense::errors::TransportError;
use telexpense::localization::LocalizationManager;
use telexpense::memory_store::MemoryStore;
use telexpense::models::{
    BotSettings, Customer, DocStatus, FetchedImage, ImageRef, Invoice, TelegramUser,
    DEFAULT_AI_MODEL,
};
use telexpense::session::InMemorySessionStore;
use telexpense::telegram::{select_largest_photo, BotApi};
use telexpense::vision::{VisionModel, VisionRequest};

pub const BOT_TOKEN: &str = "123:TEST";
pub const CUSTOMER_CHAT: i64 = 42;
pub const STRANGER_CHAT: i64 = 77;

/// Records replies and serves a fixed JPEG for every photo
#[derive(Default)]
pub struct FakeBotApi {
    replies: Mutex<Vec<(i64, String)>>,
    fetches: AtomicUsize,
}

impl FakeBotApi {
    pub fn replies(&self) -> Vec<(i64, String)> {
        self.replies.lock().unwrap().clone()
    }

    pub fn last_reply(&self) -> Option<String> {
        self.replies.lock().unwrap().last().map(|(_, text)| text.clone())
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BotApi for FakeBotApi {
    async fn send_reply(&self, token: &str, chat_id: i64, text: &str) -> Result<(), TransportError> {
        assert_eq!(token, BOT_TOKEN);
        self.replies.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn fetch_largest_photo(
        &self,
        token: &str,
        variants: &[ImageRef],
    ) -> Result<FetchedImage, TransportError> {
        assert_eq!(token, BOT_TOKEN);
        let photo = select_largest_photo(variants).ok_or(TransportError::NoPhoto)?;
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FetchedImage {
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10],
            file_path: format!("photos/{}_{n}.jpg", photo.file_id),
            source_url: format!("telegram:photos/{}_{n}.jpg", photo.file_id),
        })
    }
}

/// Vision model answering every request with the same text
pub struct CannedVision {
    answer: String,
    calls: AtomicUsize,
}

impl CannedVision {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionModel for CannedVision {
    async fn generate(&self, request: VisionRequest<'_>) -> Result<String, TransportError> {
        assert!(!request.image.is_empty());
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }
}

pub fn invoice(id: &str, posting_date: (i32, u32, u32), outstanding: i64) -> Invoice {
    Invoice {
        id: id.to_string(),
        customer: "CUST-1".to_string(),
        company: "Sopwer".to_string(),
        posting_date: NaiveDate::from_ymd_opt(posting_date.0, posting_date.1, posting_date.2).unwrap(),
        due_date: None,
        grand_total: Decimal::from(outstanding),
        outstanding_amount: Decimal::from(outstanding),
        debit_to: "Debtors - S".to_string(),
        docstatus: DocStatus::Submitted,
    }
}

/// Store with one registered customer chat and two open invoices
pub fn seeded_store(ai_enabled: bool) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.set_settings(BotSettings {
        bot_token: Some(BOT_TOKEN.to_string()),
        ai_api_key: Some("gemini-key".to_string()),
        ai_enabled,
        ai_model: DEFAULT_AI_MODEL.to_string(),
    });
    store.set_expense_categories(["Transport", "Makan", "Akomodasi"]);
    store.upsert_customer(Customer {
        id: "CUST-1".to_string(),
        name: "Budi Santoso".to_string(),
    });
    store.register_telegram_user(TelegramUser {
        telegram_user_id: CUSTOMER_CHAT,
        user: Some("budi@example.com".to_string()),
        customer: Some("CUST-1".to_string()),
    });
    store.set_company_bank_account("Sopwer", "Bank BCA - S");
    store.insert_invoice(invoice("SINV-0003", (2024, 3, 1), 275_000));
    store.insert_invoice(invoice("SINV-0001", (2024, 1, 15), 150_000));
    store
}

pub struct Harness {
    pub caps: Arc<Capabilities>,
    pub store: Arc<MemoryStore>,
    pub bot: Arc<FakeBotApi>,
    pub vision: Arc<CannedVision>,
}

pub fn harness(store: Arc<MemoryStore>, vision_answer: &str) -> Harness {
    let bot = Arc::new(FakeBotApi::default());
    let vision = Arc::new(CannedVision::new(vision_answer));
    let caps = Capabilities::new(
        store.clone(),
        Arc::new(InMemorySessionStore::new()),
        bot.clone(),
        vision.clone(),
        LocalizationManager::new("id").unwrap(),
        Duration::from_secs(600),
    );
    Harness {
        caps: Arc::new(caps),
        store,
        bot,
        vision,
    }
}

pub fn text_update(chat_id: i64, text: &str) -> Vec<u8> {
    json!({
        "update_id": 1,
        "message": {
            "message_id": 1,
            "chat": {"id": chat_id, "type": "private"},
            "from": {"id": chat_id, "is_bot": false, "first_name": "Budi", "language_code": "id"},
            "text": text
        }
    })
    .to_string()
    .into_bytes()
}

pub fn photo_update(chat_id: i64) -> Vec<u8> {
    json!({
        "update_id": 2,
        "message": {
            "message_id": 2,
            "chat": {"id": chat_id, "type": "private"},
            "from": {"id": chat_id, "is_bot": false, "first_name": "Budi", "language_code": "id"},
            "photo": [
                {"file_id": "thumb", "file_unique_id": "u1", "width": 90, "height": 90, "file_size": 1_500},
                {"file_id": "full", "file_unique_id": "u2", "width": 1280, "height": 1280, "file_size": 180_000}
            ]
        }
    })
    .to_string()
    .into_bytes()
}
