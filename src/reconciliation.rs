//! # Reconciliation Module
//!
//! Turns extracted receipts and payment proofs into business records:
//! expense logs, draft income logs matched to the oldest open invoice, and
//! on submission a payment entry settling that invoice.
//!
//! Submission is idempotent. The Draft→Submitted transition, the payment
//! entry and its write-back onto the log are one store operation, so repeated
//! or concurrent submits never post twice and a failed posting leaves the log
//! in draft.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::db::{RecordStore, StoreResult, Submission};
use crate::errors::{PostingError, StoreError};
use crate::models::{
    DocStatus, ExpenseLogRecord, ExtractedReceipt, FetchedImage, Identity, IncomeLogRecord,
    Invoice, NewExpenseLog, NewImage, NewIncomeLog, NewPaymentEntry, PaymentEntry,
};

/// Result of submitting an income log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A payment entry was created and linked
    Posted(PaymentEntry),
    /// The log was already submitted or already carries a payment entry
    AlreadyPosted,
    /// The matched invoice has nothing left to pay
    AlreadySettled,
    /// No invoice was matched when the proof arrived
    Unmatched,
}

impl SubmitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitOutcome::Posted(_) => "posted",
            SubmitOutcome::AlreadyPosted => "already_posted",
            SubmitOutcome::AlreadySettled => "already_settled",
            SubmitOutcome::Unmatched => "unmatched",
        }
    }
}

/// A freshly created income log with the invoice it was matched to
#[derive(Debug, Clone)]
pub struct LoggedIncome {
    pub record: IncomeLogRecord,
    pub invoice: Option<Invoice>,
}

enum PreparedPayment {
    Unmatched,
    Settled,
    Entry(NewPaymentEntry),
}

pub struct ReconciliationEngine {
    store: Arc<dyn RecordStore>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Record an expense read from a receipt, with the receipt photo attached
    pub async fn log_expense(
        &self,
        identity: &Identity,
        receipt: &ExtractedReceipt,
        image: Option<&FetchedImage>,
    ) -> StoreResult<ExpenseLogRecord> {
        self.store
            .insert_expense_log(NewExpenseLog::new(identity, receipt), image.map(NewImage::from))
            .await
    }

    /// Create a draft income log for a payment proof, matched to the
    /// customer's oldest open invoice
    pub async fn log_income(
        &self,
        identity: &Identity,
        image: Option<&FetchedImage>,
    ) -> StoreResult<LoggedIncome> {
        let customer = identity.customer.as_ref().ok_or_else(|| {
            StoreError::NotFound(format!("customer linked to chat {}", identity.chat_id))
        })?;

        let invoice = self.match_invoice(&customer.id).await?;
        let new_log = NewIncomeLog {
            chat_id: identity.chat_id,
            user: identity.system_user.clone(),
            customer: customer.id.clone(),
            matched_invoice: invoice.as_ref().map(|invoice| invoice.id.clone()),
        };

        let record = self
            .store
            .insert_income_log(new_log, image.map(NewImage::from))
            .await?;

        match &invoice {
            Some(invoice) => info!(
                income_log = %record.id,
                invoice = %invoice.id,
                outstanding = %invoice.outstanding_amount,
                "Payment proof matched to invoice"
            ),
            None => info!(income_log = %record.id, customer = %customer.id, "Payment proof has no open invoice"),
        }

        Ok(LoggedIncome { record, invoice })
    }

    /// Oldest open invoice of `customer_id`
    pub async fn match_invoice(&self, customer_id: &str) -> StoreResult<Option<Invoice>> {
        Ok(self.open_invoices(customer_id).await?.into_iter().next())
    }

    /// Submitted invoices with an outstanding balance, oldest first
    pub async fn open_invoices(&self, customer_id: &str) -> StoreResult<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = self
            .store
            .open_invoices(customer_id)
            .await?
            .into_iter()
            .filter(Invoice::is_open)
            .collect();
        invoices.sort_by(|a, b| {
            a.posting_date
                .cmp(&b.posting_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(invoices)
    }

    /// Submit an income log, posting a payment for its matched invoice
    pub async fn submit_income_log(&self, id: &str) -> Result<SubmitOutcome, PostingError> {
        let log = self
            .store
            .get_income_log(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.submit(&log).await
    }

    /// Create and link a payment entry settling the invoice matched by
    /// `income_log`. `None` when there is nothing to post or the log was
    /// already submitted.
    pub async fn post_payment(
        &self,
        income_log: &IncomeLogRecord,
    ) -> Result<Option<PaymentEntry>, PostingError> {
        match self.submit(income_log).await? {
            SubmitOutcome::Posted(payment) => Ok(Some(payment)),
            SubmitOutcome::AlreadyPosted
            | SubmitOutcome::AlreadySettled
            | SubmitOutcome::Unmatched => Ok(None),
        }
    }

    async fn submit(&self, log: &IncomeLogRecord) -> Result<SubmitOutcome, PostingError> {
        if log.payment_entry.is_some() || log.docstatus != DocStatus::Draft {
            info!(income_log = %log.id, "Income log already submitted");
            return Ok(SubmitOutcome::AlreadyPosted);
        }

        // Posting problems surface before the store is touched, leaving the log in draft
        let entry = match self.prepare_payment(log, today()).await? {
            PreparedPayment::Unmatched => {
                return self.submit_without_payment(log, SubmitOutcome::Unmatched).await
            }
            PreparedPayment::Settled => {
                return self.submit_without_payment(log, SubmitOutcome::AlreadySettled).await
            }
            PreparedPayment::Entry(entry) => entry,
        };

        match self.store.submit_income_log(&log.id, Some(entry)).await? {
            Submission::Submitted(Some(payment)) => {
                info!(
                    income_log = %log.id,
                    payment_entry = %payment.id,
                    amount = %payment.entry.paid_amount,
                    "Payment posted"
                );
                Ok(SubmitOutcome::Posted(payment))
            }
            Submission::Submitted(None) | Submission::AlreadySubmitted => {
                info!(income_log = %log.id, "Income log was submitted concurrently");
                Ok(SubmitOutcome::AlreadyPosted)
            }
        }
    }

    async fn submit_without_payment(
        &self,
        log: &IncomeLogRecord,
        outcome: SubmitOutcome,
    ) -> Result<SubmitOutcome, PostingError> {
        match self.store.submit_income_log(&log.id, None).await? {
            Submission::AlreadySubmitted => {
                info!(income_log = %log.id, "Income log was submitted concurrently");
                Ok(SubmitOutcome::AlreadyPosted)
            }
            Submission::Submitted(_) => {
                info!(income_log = %log.id, outcome = outcome.as_str(), "Submitted without posting");
                Ok(outcome)
            }
        }
    }

    async fn prepare_payment(
        &self,
        income_log: &IncomeLogRecord,
        today: NaiveDate,
    ) -> Result<PreparedPayment, PostingError> {
        let Some(invoice_id) = income_log.matched_invoice.as_deref() else {
            return Ok(PreparedPayment::Unmatched);
        };

        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| PostingError::InvoiceNotFound(invoice_id.to_string()))?;

        if invoice.outstanding_amount <= Decimal::ZERO {
            return Ok(PreparedPayment::Settled);
        }

        let bank_account = self
            .store
            .company_default_bank_account(&invoice.company)
            .await?
            .ok_or_else(|| PostingError::MissingBankAccount(invoice.company.clone()))?;

        Ok(PreparedPayment::Entry(NewPaymentEntry::settle_invoice(
            &invoice,
            &bank_account,
            &income_log.id,
            today,
        )))
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}
