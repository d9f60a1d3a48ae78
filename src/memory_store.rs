//! In-process record store.
//!
//! Mirrors the semantics of [`crate::db::PgStore`] (naming series, all-or-nothing
//! income log submission) without a database. Used for
//! local runs without `DATABASE_URL` and as the store behind the test suite.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::db::{RecordStore, StoreResult, Submission};
use crate::errors::StoreError;
use crate::models::{
    BotSettings, Customer, DocStatus, ExpenseLogRecord, FileAttachment, IncomeLogRecord, Invoice,
    NewExpenseLog, NewImage, NewIncomeLog, NewPaymentEntry, PaymentEntry, TelegramUser,
    EXPENSE_LOG_DOCTYPE, INCOME_LOG_DOCTYPE,
};

#[derive(Debug, Default)]
struct Inner {
    settings: BotSettings,
    categories: Vec<String>,
    customers: HashMap<String, Customer>,
    telegram_users: HashMap<i64, TelegramUser>,
    bank_accounts: HashMap<String, String>,
    invoices: BTreeMap<String, Invoice>,
    expense_logs: BTreeMap<String, ExpenseLogRecord>,
    income_logs: BTreeMap<String, IncomeLogRecord>,
    payment_entries: BTreeMap<String, PaymentEntry>,
    files: BTreeMap<String, FileAttachment>,
    sequences: HashMap<&'static str, u64>,
}

impl Inner {
    fn next_name(&mut self, prefix: &'static str) -> String {
        let counter = self.sequences.entry(prefix).or_insert(0);
        *counter += 1;
        format!("{prefix}{:05}", *counter)
    }

    fn attach(&mut self, image: Option<NewImage>, doctype: &str, name: &str) -> Option<String> {
        let image = image?;
        let id = self.next_name("FILE-");
        let file = image.attach_to(doctype, name);
        self.files.insert(
            id.clone(),
            FileAttachment {
                id: id.clone(),
                file_name: file.file_name,
                file_url: file.file_url,
                attached_to_doctype: file.attached_to_doctype,
                attached_to_name: file.attached_to_name,
            },
        );
        Some(id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Mutations are single inserts or field writes; a poisoned lock still guards consistent data
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_settings(&self, settings: BotSettings) {
        self.lock().settings = settings;
    }

    pub fn set_expense_categories<I, S>(&self, categories: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().categories = categories.into_iter().map(Into::into).collect();
    }

    pub fn upsert_customer(&self, customer: Customer) {
        self.lock().customers.insert(customer.id.clone(), customer);
    }

    pub fn register_telegram_user(&self, user: TelegramUser) {
        self.lock()
            .telegram_users
            .insert(user.telegram_user_id, user);
    }

    pub fn set_company_bank_account(&self, company: &str, account: &str) {
        self.lock()
            .bank_accounts
            .insert(company.to_string(), account.to_string());
    }

    pub fn insert_invoice(&self, invoice: Invoice) {
        self.lock().invoices.insert(invoice.id.clone(), invoice);
    }

    pub fn payment_entry_count(&self) -> usize {
        self.lock().payment_entries.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn load_settings(&self) -> StoreResult<BotSettings> {
        Ok(self.lock().settings.clone())
    }

    async fn expense_categories(&self) -> StoreResult<Vec<String>> {
        Ok(self.lock().categories.clone())
    }

    async fn find_telegram_user(&self, chat_id: i64) -> StoreResult<Option<TelegramUser>> {
        Ok(self.lock().telegram_users.get(&chat_id).cloned())
    }

    async fn get_customer(&self, customer_id: &str) -> StoreResult<Option<Customer>> {
        Ok(self.lock().customers.get(customer_id).cloned())
    }

    async fn open_invoices(&self, customer_id: &str) -> StoreResult<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = self
            .lock()
            .invoices
            .values()
            .filter(|invoice| invoice.customer == customer_id && invoice.is_open())
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            a.posting_date
                .cmp(&b.posting_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(invoices)
    }

    async fn get_invoice(&self, invoice_id: &str) -> StoreResult<Option<Invoice>> {
        Ok(self.lock().invoices.get(invoice_id).cloned())
    }

    async fn company_default_bank_account(&self, company: &str) -> StoreResult<Option<String>> {
        Ok(self.lock().bank_accounts.get(company).cloned())
    }

    async fn insert_expense_log(
        &self,
        log: NewExpenseLog,
        image: Option<NewImage>,
    ) -> StoreResult<ExpenseLogRecord> {
        let mut inner = self.lock();
        let id = inner.next_name("TEL-EXP-");
        let image = inner.attach(image, EXPENSE_LOG_DOCTYPE, &id);
        let record = ExpenseLogRecord {
            id: id.clone(),
            chat_id: log.chat_id,
            description: log.description,
            category: log.category,
            category_verified: log.category_verified,
            amount: log.amount,
            user: log.user,
            image,
            created_at: Utc::now(),
        };
        inner.expense_logs.insert(id.clone(), record.clone());
        info!(expense_log = %id, chat_id = record.chat_id, "Expense log created");
        Ok(record)
    }

    async fn get_expense_log(&self, id: &str) -> StoreResult<Option<ExpenseLogRecord>> {
        Ok(self.lock().expense_logs.get(id).cloned())
    }

    async fn expense_logs_for_chat(&self, chat_id: i64) -> StoreResult<Vec<ExpenseLogRecord>> {
        Ok(self
            .lock()
            .expense_logs
            .values()
            .filter(|log| log.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn insert_income_log(
        &self,
        log: NewIncomeLog,
        image: Option<NewImage>,
    ) -> StoreResult<IncomeLogRecord> {
        let mut inner = self.lock();
        let id = inner.next_name("TEL-INC-");
        let image = inner.attach(image, INCOME_LOG_DOCTYPE, &id);
        let record = IncomeLogRecord {
            id: id.clone(),
            chat_id: log.chat_id,
            user: log.user,
            customer: log.customer,
            matched_invoice: log.matched_invoice,
            image,
            docstatus: DocStatus::Draft,
            payment_entry: None,
            created_at: Utc::now(),
        };
        inner.income_logs.insert(id.clone(), record.clone());
        info!(income_log = %id, chat_id = record.chat_id, "Income log created");
        Ok(record)
    }

    async fn get_income_log(&self, id: &str) -> StoreResult<Option<IncomeLogRecord>> {
        Ok(self.lock().income_logs.get(id).cloned())
    }

    async fn income_logs_for_chat(&self, chat_id: i64) -> StoreResult<Vec<IncomeLogRecord>> {
        Ok(self
            .lock()
            .income_logs
            .values()
            .filter(|log| log.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn submit_income_log(
        &self,
        id: &str,
        payment: Option<NewPaymentEntry>,
    ) -> StoreResult<Submission> {
        let mut inner = self.lock();

        let log = inner
            .income_logs
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if log.docstatus != DocStatus::Draft || log.payment_entry.is_some() {
            return Ok(Submission::AlreadySubmitted);
        }

        // Validate every allocation before touching any record
        if let Some(entry) = &payment {
            for reference in &entry.references {
                let invoice = inner
                    .invoices
                    .get(&reference.reference_name)
                    .ok_or_else(|| StoreError::NotFound(reference.reference_name.clone()))?;
                if invoice.outstanding_amount < reference.allocated_amount {
                    return Err(StoreError::OverAllocation {
                        invoice: reference.reference_name.clone(),
                        allocated: reference.allocated_amount,
                    });
                }
            }
        }

        let payment = payment.map(|entry| {
            for reference in &entry.references {
                if let Some(invoice) = inner.invoices.get_mut(&reference.reference_name) {
                    invoice.outstanding_amount -= reference.allocated_amount;
                }
            }
            let payment_id = inner.next_name("ACC-PAY-");
            let payment = PaymentEntry {
                id: payment_id.clone(),
                docstatus: DocStatus::Submitted,
                entry,
            };
            inner.payment_entries.insert(payment_id, payment.clone());
            payment
        });

        if let Some(log) = inner.income_logs.get_mut(id) {
            log.docstatus = DocStatus::Submitted;
            log.payment_entry = payment.as_ref().map(|payment| payment.id.clone());
        }

        match &payment {
            Some(payment) => info!(
                income_log = %id,
                payment_entry = %payment.id,
                party = %payment.entry.party,
                amount = %payment.entry.paid_amount,
                "Income log submitted with payment entry"
            ),
            None => info!(income_log = %id, "Income log submitted"),
        }
        Ok(Submission::Submitted(payment))
    }

    async fn payment_entries_for_invoice(
        &self,
        invoice_id: &str,
    ) -> StoreResult<Vec<PaymentEntry>> {
        Ok(self
            .lock()
            .payment_entries
            .values()
            .filter(|payment| {
                payment
                    .entry
                    .references
                    .iter()
                    .any(|reference| reference.reference_name == invoice_id)
            })
            .cloned()
            .collect())
    }

    async fn get_file(&self, id: &str) -> StoreResult<Option<FileAttachment>> {
        Ok(self.lock().files.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn invoice(id: &str, outstanding: i64) -> Invoice {
        Invoice {
            id: id.to_string(),
            customer: "CUST-1".to_string(),
            company: "Sopwer".to_string(),
            posting_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            due_date: None,
            grand_total: Decimal::from(outstanding),
            outstanding_amount: Decimal::from(outstanding),
            debit_to: "Debtors - S".to_string(),
            docstatus: DocStatus::Submitted,
        }
    }

    #[tokio::test]
    async fn test_naming_series_increments() {
        let store = MemoryStore::new();
        let log = NewIncomeLog {
            chat_id: 1,
            user: None,
            customer: "CUST-1".to_string(),
            matched_invoice: None,
        };
        let first = store.insert_income_log(log.clone(), None).await.unwrap();
        let second = store.insert_income_log(log, None).await.unwrap();
        assert_eq!(first.id, "TEL-INC-00001");
        assert_eq!(second.id, "TEL-INC-00002");
    }

    #[tokio::test]
    async fn test_image_is_attached_to_created_record() {
        let store = MemoryStore::new();
        let log = NewIncomeLog {
            chat_id: 1,
            user: None,
            customer: "CUST-1".to_string(),
            matched_invoice: None,
        };
        let image = NewImage {
            file_name: "file_1.jpg".to_string(),
            file_url: "https://api.telegram.org/file/photos/file_1.jpg".to_string(),
        };
        let record = store.insert_income_log(log, Some(image)).await.unwrap();

        let file_id = record.image.expect("image should be attached");
        let file = store.get_file(&file_id).await.unwrap().unwrap();
        assert_eq!(file.attached_to_doctype, INCOME_LOG_DOCTYPE);
        assert_eq!(file.attached_to_name, record.id);
    }

    fn draft_log(matched_invoice: Option<&str>) -> NewIncomeLog {
        NewIncomeLog {
            chat_id: 1,
            user: None,
            customer: "CUST-1".to_string(),
            matched_invoice: matched_invoice.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_over_allocation_is_rejected_without_side_effects() {
        let store = MemoryStore::new();
        store.insert_invoice(invoice("SINV-1", 100));
        let log = store.insert_income_log(draft_log(Some("SINV-1")), None).await.unwrap();
        let entry = NewPaymentEntry::settle_invoice(
            &invoice("SINV-1", 500),
            "Bank - S",
            &log.id,
            NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
        );

        let err = store.submit_income_log(&log.id, Some(entry)).await.unwrap_err();
        assert!(matches!(err, StoreError::OverAllocation { ref invoice, .. } if invoice == "SINV-1"));

        let stored = store.get_invoice("SINV-1").await.unwrap().unwrap();
        assert_eq!(stored.outstanding_amount, Decimal::from(100));
        assert_eq!(store.payment_entry_count(), 0);
        let log = store.get_income_log(&log.id).await.unwrap().unwrap();
        assert_eq!(log.docstatus, DocStatus::Draft);
        assert!(log.payment_entry.is_none());
    }

    #[tokio::test]
    async fn test_submission_links_payment_entry_once() {
        let store = MemoryStore::new();
        store.insert_invoice(invoice("SINV-1", 100));
        let log = store.insert_income_log(draft_log(Some("SINV-1")), None).await.unwrap();
        let entry = NewPaymentEntry::settle_invoice(
            &invoice("SINV-1", 100),
            "Bank - S",
            &log.id,
            NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
        );

        let Submission::Submitted(Some(payment)) = store
            .submit_income_log(&log.id, Some(entry.clone()))
            .await
            .unwrap()
        else {
            panic!("expected a submitted payment entry");
        };
        assert_eq!(
            store.submit_income_log(&log.id, Some(entry)).await.unwrap(),
            Submission::AlreadySubmitted
        );

        let stored = store.get_income_log(&log.id).await.unwrap().unwrap();
        assert_eq!(stored.docstatus, DocStatus::Submitted);
        assert_eq!(stored.payment_entry.as_deref(), Some(payment.id.as_str()));
        assert_eq!(store.payment_entry_count(), 1);
        let invoice = store.get_invoice("SINV-1").await.unwrap().unwrap();
        assert_eq!(invoice.outstanding_amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_submission_without_payment() {
        let store = MemoryStore::new();
        let log = store.insert_income_log(draft_log(None), None).await.unwrap();

        assert_eq!(
            store.submit_income_log(&log.id, None).await.unwrap(),
            Submission::Submitted(None)
        );
        let stored = store.get_income_log(&log.id).await.unwrap().unwrap();
        assert_eq!(stored.docstatus, DocStatus::Submitted);
        assert!(stored.payment_entry.is_none());
        assert!(matches!(
            store.submit_income_log("TEL-INC-99999", None).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
