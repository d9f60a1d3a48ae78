//! Business-records store: repository trait and its Postgres implementation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, PgRow};
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::config::parse_flag;
use crate::errors::StoreError;
use crate::models::{
    BotSettings, Customer, DocStatus, ExpenseLogRecord, FileAttachment, IncomeLogRecord, Invoice,
    NewExpenseLog, NewFileAttachment, NewImage, NewIncomeLog, NewPaymentEntry, PaymentEntry,
    PaymentReference, PaymentType, TelegramUser, DEFAULT_AI_MODEL, EXPENSE_LOG_DOCTYPE,
    INCOME_LOG_DOCTYPE,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of [`RecordStore::submit_income_log`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The log is now submitted, with its payment entry when one was posted
    Submitted(Option<PaymentEntry>),
    /// The log was no longer a draft; nothing was written
    AlreadySubmitted,
}

/// Repository over the business records this bot reads and appends to
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load_settings(&self) -> StoreResult<BotSettings>;
    async fn expense_categories(&self) -> StoreResult<Vec<String>>;

    async fn find_telegram_user(&self, chat_id: i64) -> StoreResult<Option<TelegramUser>>;
    async fn get_customer(&self, customer_id: &str) -> StoreResult<Option<Customer>>;

    /// Submitted invoices of `customer` with an outstanding balance, oldest first
    async fn open_invoices(&self, customer_id: &str) -> StoreResult<Vec<Invoice>>;
    async fn get_invoice(&self, invoice_id: &str) -> StoreResult<Option<Invoice>>;
    async fn company_default_bank_account(&self, company: &str) -> StoreResult<Option<String>>;

    /// Append an expense log, attaching `image` to it in the same write
    async fn insert_expense_log(
        &self,
        log: NewExpenseLog,
        image: Option<NewImage>,
    ) -> StoreResult<ExpenseLogRecord>;
    async fn get_expense_log(&self, id: &str) -> StoreResult<Option<ExpenseLogRecord>>;
    async fn expense_logs_for_chat(&self, chat_id: i64) -> StoreResult<Vec<ExpenseLogRecord>>;

    /// Create a draft income log, attaching `image` to it in the same write
    async fn insert_income_log(
        &self,
        log: NewIncomeLog,
        image: Option<NewImage>,
    ) -> StoreResult<IncomeLogRecord>;
    async fn get_income_log(&self, id: &str) -> StoreResult<Option<IncomeLogRecord>>;
    async fn income_logs_for_chat(&self, chat_id: i64) -> StoreResult<Vec<IncomeLogRecord>>;

    /// Move a draft income log without payment entry to submitted. When
    /// `payment` is given, the entry is inserted and submitted, the outstanding
    /// amount of every referenced invoice is reduced by its allocation, and the
    /// entry id is written back onto the log. All of it commits or none of it.
    async fn submit_income_log(
        &self,
        id: &str,
        payment: Option<NewPaymentEntry>,
    ) -> StoreResult<Submission>;

    async fn payment_entries_for_invoice(&self, invoice_id: &str)
        -> StoreResult<Vec<PaymentEntry>>;

    async fn get_file(&self, id: &str) -> StoreResult<Option<FileAttachment>>;
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS expense_categories (
        name TEXT PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS customers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS telegram_users (
        telegram_user_id BIGINT PRIMARY KEY,
        system_user TEXT,
        customer TEXT REFERENCES customers(id)
    )",
    "CREATE TABLE IF NOT EXISTS companies (
        name TEXT PRIMARY KEY,
        default_bank_account TEXT
    )",
    "CREATE TABLE IF NOT EXISTS invoices (
        id TEXT PRIMARY KEY,
        customer TEXT NOT NULL REFERENCES customers(id),
        company TEXT NOT NULL,
        posting_date DATE NOT NULL,
        due_date DATE,
        grand_total NUMERIC(18, 2) NOT NULL,
        outstanding_amount NUMERIC(18, 2) NOT NULL,
        debit_to TEXT NOT NULL,
        docstatus SMALLINT NOT NULL DEFAULT 1
    )",
    "CREATE INDEX IF NOT EXISTS idx_invoices_customer_open
        ON invoices(customer, posting_date) WHERE outstanding_amount > 0",
    "CREATE SEQUENCE IF NOT EXISTS expense_log_seq",
    "CREATE TABLE IF NOT EXISTS expense_logs (
        id TEXT PRIMARY KEY DEFAULT ('TEL-EXP-' || lpad(nextval('expense_log_seq')::text, 5, '0')),
        chat_id BIGINT NOT NULL,
        description TEXT NOT NULL,
        category TEXT NOT NULL,
        category_verified BOOLEAN NOT NULL,
        amount NUMERIC(18, 2) NOT NULL CHECK (amount >= 0),
        system_user TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE SEQUENCE IF NOT EXISTS income_log_seq",
    "CREATE TABLE IF NOT EXISTS income_logs (
        id TEXT PRIMARY KEY DEFAULT ('TEL-INC-' || lpad(nextval('income_log_seq')::text, 5, '0')),
        chat_id BIGINT NOT NULL,
        system_user TEXT,
        customer TEXT NOT NULL,
        matched_invoice TEXT REFERENCES invoices(id),
        docstatus SMALLINT NOT NULL DEFAULT 0,
        payment_entry TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE SEQUENCE IF NOT EXISTS payment_entry_seq",
    "CREATE TABLE IF NOT EXISTS payment_entries (
        id TEXT PRIMARY KEY DEFAULT ('ACC-PAY-' || lpad(nextval('payment_entry_seq')::text, 5, '0')),
        payment_type TEXT NOT NULL,
        party_type TEXT NOT NULL,
        party TEXT NOT NULL,
        company TEXT NOT NULL,
        posting_date DATE NOT NULL,
        paid_amount NUMERIC(18, 2) NOT NULL,
        received_amount NUMERIC(18, 2) NOT NULL,
        paid_from TEXT NOT NULL,
        paid_to TEXT NOT NULL,
        reference_no TEXT NOT NULL,
        reference_date DATE NOT NULL,
        docstatus SMALLINT NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS payment_entry_references (
        payment_entry TEXT NOT NULL REFERENCES payment_entries(id) ON DELETE CASCADE,
        reference_doctype TEXT NOT NULL,
        reference_name TEXT NOT NULL,
        total_amount NUMERIC(18, 2) NOT NULL,
        outstanding_amount NUMERIC(18, 2) NOT NULL,
        allocated_amount NUMERIC(18, 2) NOT NULL
    )",
    "CREATE SEQUENCE IF NOT EXISTS file_seq",
    "CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY DEFAULT ('FILE-' || lpad(nextval('file_seq')::text, 5, '0')),
        file_name TEXT NOT NULL,
        file_url TEXT NOT NULL,
        attached_to_doctype TEXT NOT NULL,
        attached_to_name TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_files_attached
        ON files(attached_to_doctype, attached_to_name)",
];

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> StoreResult<()> {
    info!("Initializing database schema...");
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Database schema initialized successfully");
    Ok(())
}

/// Postgres-backed record store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn save_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_expense_category(&self, name: &str) -> StoreResult<()> {
        sqlx::query("INSERT INTO expense_categories (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_customer(&self, customer: &Customer) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO customers (id, name) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(&customer.id)
        .bind(&customer.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn register_telegram_user(&self, user: &TelegramUser) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO telegram_users (telegram_user_id, system_user, customer) VALUES ($1, $2, $3)
             ON CONFLICT (telegram_user_id)
             DO UPDATE SET system_user = EXCLUDED.system_user, customer = EXCLUDED.customer",
        )
        .bind(user.telegram_user_id)
        .bind(&user.user)
        .bind(&user.customer)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_company_bank_account(&self, company: &str, account: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO companies (name, default_bank_account) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET default_bank_account = EXCLUDED.default_bank_account",
        )
        .bind(company)
        .bind(account)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_invoice(&self, invoice: &Invoice) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO invoices
                (id, customer, company, posting_date, due_date, grand_total,
                 outstanding_amount, debit_to, docstatus)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&invoice.id)
        .bind(&invoice.customer)
        .bind(&invoice.company)
        .bind(invoice.posting_date)
        .bind(invoice.due_date)
        .bind(invoice.grand_total)
        .bind(invoice.outstanding_amount)
        .bind(&invoice.debit_to)
        .bind(invoice.docstatus.as_i16())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_file<'e, E>(executor: E, file: &NewFileAttachment) -> StoreResult<String>
    where
        E: sqlx::postgres::PgExecutor<'e>,
    {
        let row = sqlx::query(
            "INSERT INTO files (file_name, file_url, attached_to_doctype, attached_to_name)
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&file.file_name)
        .bind(&file.file_url)
        .bind(&file.attached_to_doctype)
        .bind(&file.attached_to_name)
        .fetch_one(executor)
        .await?;
        Ok(row.try_get("id")?)
    }

    /// Insert a submitted payment entry and apply its allocations. Fails with
    /// [`StoreError::OverAllocation`] when an invoice has less outstanding than
    /// allocated; the caller's transaction is then left to roll back.
    async fn insert_payment_entry(
        conn: &mut PgConnection,
        entry: &NewPaymentEntry,
    ) -> StoreResult<String> {
        let row = sqlx::query(
            "INSERT INTO payment_entries
                (payment_type, party_type, party, company, posting_date, paid_amount,
                 received_amount, paid_from, paid_to, reference_no, reference_date, docstatus)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 1)
             RETURNING id",
        )
        .bind(entry.payment_type.to_string())
        .bind(&entry.party_type)
        .bind(&entry.party)
        .bind(&entry.company)
        .bind(entry.posting_date)
        .bind(entry.paid_amount)
        .bind(entry.received_amount)
        .bind(&entry.paid_from)
        .bind(&entry.paid_to)
        .bind(&entry.reference_no)
        .bind(entry.reference_date)
        .fetch_one(&mut *conn)
        .await?;
        let id: String = row.try_get("id")?;

        for reference in &entry.references {
            sqlx::query(
                "INSERT INTO payment_entry_references
                    (payment_entry, reference_doctype, reference_name, total_amount,
                     outstanding_amount, allocated_amount)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(&id)
            .bind(&reference.reference_doctype)
            .bind(&reference.reference_name)
            .bind(reference.total_amount)
            .bind(reference.outstanding_amount)
            .bind(reference.allocated_amount)
            .execute(&mut *conn)
            .await?;

            let updated = sqlx::query(
                "UPDATE invoices SET outstanding_amount = outstanding_amount - $1
                 WHERE id = $2 AND outstanding_amount >= $1",
            )
            .bind(reference.allocated_amount)
            .bind(&reference.reference_name)
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() != 1 {
                warn!(invoice = %reference.reference_name, "Allocation exceeds outstanding amount");
                return Err(StoreError::OverAllocation {
                    invoice: reference.reference_name.clone(),
                    allocated: reference.allocated_amount,
                });
            }
        }
        Ok(id)
    }

    async fn references_for(&self, payment_entry: &str) -> StoreResult<Vec<PaymentReference>> {
        let rows = sqlx::query(
            "SELECT reference_doctype, reference_name, total_amount, outstanding_amount, allocated_amount
             FROM payment_entry_references WHERE payment_entry = $1",
        )
        .bind(payment_entry)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<PaymentReference> {
                Ok(PaymentReference {
                    reference_doctype: row.try_get("reference_doctype")?,
                    reference_name: row.try_get("reference_name")?,
                    total_amount: row.try_get("total_amount")?,
                    outstanding_amount: row.try_get("outstanding_amount")?,
                    allocated_amount: row.try_get("allocated_amount")?,
                })
            })
            .collect()
    }
}

const INVOICE_COLUMNS: &str = "id, customer, company, posting_date, due_date, grand_total, \
                               outstanding_amount, debit_to, docstatus";

const EXPENSE_LOG_SELECT: &str = "SELECT e.id, e.chat_id, e.description, e.category, \
     e.category_verified, e.amount, e.system_user, e.created_at, \
     (SELECT f.id FROM files f WHERE f.attached_to_doctype = 'Telegram Expense Log' \
        AND f.attached_to_name = e.id ORDER BY f.id LIMIT 1) AS image \
     FROM expense_logs e";

const INCOME_LOG_SELECT: &str = "SELECT i.id, i.chat_id, i.system_user, i.customer, \
     i.matched_invoice, i.docstatus, i.payment_entry, i.created_at, \
     (SELECT f.id FROM files f WHERE f.attached_to_doctype = 'Telegram Income Log' \
        AND f.attached_to_name = i.id ORDER BY f.id LIMIT 1) AS image \
     FROM income_logs i";

fn invoice_from_row(row: &PgRow) -> StoreResult<Invoice> {
    Ok(Invoice {
        id: row.try_get("id")?,
        customer: row.try_get("customer")?,
        company: row.try_get("company")?,
        posting_date: row.try_get("posting_date")?,
        due_date: row.try_get("due_date")?,
        grand_total: row.try_get("grand_total")?,
        outstanding_amount: row.try_get("outstanding_amount")?,
        debit_to: row.try_get("debit_to")?,
        docstatus: DocStatus::from_i16(row.try_get("docstatus")?),
    })
}

fn expense_log_from_row(row: &PgRow) -> StoreResult<ExpenseLogRecord> {
    Ok(ExpenseLogRecord {
        id: row.try_get("id")?,
        chat_id: row.try_get("chat_id")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        category_verified: row.try_get("category_verified")?,
        amount: row.try_get("amount")?,
        user: row.try_get("system_user")?,
        image: row.try_get("image")?,
        created_at: row.try_get("created_at")?,
    })
}

fn income_log_from_row(row: &PgRow) -> StoreResult<IncomeLogRecord> {
    Ok(IncomeLogRecord {
        id: row.try_get("id")?,
        chat_id: row.try_get("chat_id")?,
        user: row.try_get("system_user")?,
        customer: row.try_get("customer")?,
        matched_invoice: row.try_get("matched_invoice")?,
        image: row.try_get("image")?,
        docstatus: DocStatus::from_i16(row.try_get("docstatus")?),
        payment_entry: row.try_get("payment_entry")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl RecordStore for PgStore {
    async fn load_settings(&self) -> StoreResult<BotSettings> {
        let rows = sqlx::query("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;

        let mut settings = BotSettings {
            ai_model: DEFAULT_AI_MODEL.to_string(),
            ..Default::default()
        };
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            match key.as_str() {
                "bot_token" => settings.bot_token = Some(value),
                "ai_api_key" => settings.ai_api_key = Some(value),
                "ai_enabled" => settings.ai_enabled = parse_flag(&value),
                "ai_model" => settings.ai_model = value,
                other => debug!(key = other, "Ignoring unknown setting"),
            }
        }
        Ok(settings)
    }

    async fn expense_categories(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM expense_categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(StoreError::from))
            .collect()
    }

    async fn find_telegram_user(&self, chat_id: i64) -> StoreResult<Option<TelegramUser>> {
        let row = sqlx::query(
            "SELECT telegram_user_id, system_user, customer FROM telegram_users
             WHERE telegram_user_id = $1",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> StoreResult<TelegramUser> {
            Ok(TelegramUser {
                telegram_user_id: row.try_get("telegram_user_id")?,
                user: row.try_get("system_user")?,
                customer: row.try_get("customer")?,
            })
        })
        .transpose()
    }

    async fn get_customer(&self, customer_id: &str) -> StoreResult<Option<Customer>> {
        let row = sqlx::query("SELECT id, name FROM customers WHERE id = $1")
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> StoreResult<Customer> {
            Ok(Customer {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
            })
        })
        .transpose()
    }

    async fn open_invoices(&self, customer_id: &str) -> StoreResult<Vec<Invoice>> {
        let rows = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices
             WHERE customer = $1 AND docstatus = 1 AND outstanding_amount > 0
             ORDER BY posting_date ASC, id ASC"
        ))
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(invoice_from_row).collect()
    }

    async fn get_invoice(&self, invoice_id: &str) -> StoreResult<Option<Invoice>> {
        let row = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(invoice_from_row).transpose()
    }

    async fn company_default_bank_account(&self, company: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT default_bank_account FROM companies WHERE name = $1")
            .bind(company)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.try_get("default_bank_account")?),
            None => Ok(None),
        }
    }

    async fn insert_expense_log(
        &self,
        log: NewExpenseLog,
        image: Option<NewImage>,
    ) -> StoreResult<ExpenseLogRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO expense_logs
                (chat_id, description, category, category_verified, amount, system_user)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, created_at",
        )
        .bind(log.chat_id)
        .bind(&log.description)
        .bind(&log.category)
        .bind(log.category_verified)
        .bind(log.amount)
        .bind(&log.user)
        .fetch_one(&mut *tx)
        .await?;
        let id: String = row.try_get("id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        let image_id = match image {
            Some(image) => {
                let file = image.attach_to(EXPENSE_LOG_DOCTYPE, &id);
                Some(Self::insert_file(&mut *tx, &file).await?)
            }
            None => None,
        };
        tx.commit().await?;

        info!(expense_log = %id, chat_id = log.chat_id, "Expense log created");
        Ok(ExpenseLogRecord {
            id,
            chat_id: log.chat_id,
            description: log.description,
            category: log.category,
            category_verified: log.category_verified,
            amount: log.amount,
            user: log.user,
            image: image_id,
            created_at,
        })
    }

    async fn get_expense_log(&self, id: &str) -> StoreResult<Option<ExpenseLogRecord>> {
        let row = sqlx::query(&format!("{EXPENSE_LOG_SELECT} WHERE e.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(expense_log_from_row).transpose()
    }

    async fn expense_logs_for_chat(&self, chat_id: i64) -> StoreResult<Vec<ExpenseLogRecord>> {
        let rows = sqlx::query(&format!(
            "{EXPENSE_LOG_SELECT} WHERE e.chat_id = $1 ORDER BY e.created_at, e.id"
        ))
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(expense_log_from_row).collect()
    }

    async fn insert_income_log(
        &self,
        log: NewIncomeLog,
        image: Option<NewImage>,
    ) -> StoreResult<IncomeLogRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO income_logs (chat_id, system_user, customer, matched_invoice)
             VALUES ($1, $2, $3, $4)
             RETURNING id, created_at",
        )
        .bind(log.chat_id)
        .bind(&log.user)
        .bind(&log.customer)
        .bind(&log.matched_invoice)
        .fetch_one(&mut *tx)
        .await?;
        let id: String = row.try_get("id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        let image_id = match image {
            Some(image) => {
                let file = image.attach_to(INCOME_LOG_DOCTYPE, &id);
                Some(Self::insert_file(&mut *tx, &file).await?)
            }
            None => None,
        };
        tx.commit().await?;

        info!(income_log = %id, chat_id = log.chat_id, "Income log created");
        Ok(IncomeLogRecord {
            id,
            chat_id: log.chat_id,
            user: log.user,
            customer: log.customer,
            matched_invoice: log.matched_invoice,
            image: image_id,
            docstatus: DocStatus::Draft,
            payment_entry: None,
            created_at,
        })
    }

    async fn get_income_log(&self, id: &str) -> StoreResult<Option<IncomeLogRecord>> {
        let row = sqlx::query(&format!("{INCOME_LOG_SELECT} WHERE i.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(income_log_from_row).transpose()
    }

    async fn income_logs_for_chat(&self, chat_id: i64) -> StoreResult<Vec<IncomeLogRecord>> {
        let rows = sqlx::query(&format!(
            "{INCOME_LOG_SELECT} WHERE i.chat_id = $1 ORDER BY i.created_at, i.id"
        ))
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(income_log_from_row).collect()
    }

    async fn submit_income_log(
        &self,
        id: &str,
        payment: Option<NewPaymentEntry>,
    ) -> StoreResult<Submission> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE income_logs SET docstatus = 1
             WHERE id = $1 AND docstatus = 0 AND payment_entry IS NULL",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() != 1 {
            return Ok(Submission::AlreadySubmitted);
        }

        let payment = match payment {
            Some(entry) => {
                let payment_id = Self::insert_payment_entry(&mut *tx, &entry).await?;
                sqlx::query("UPDATE income_logs SET payment_entry = $2 WHERE id = $1")
                    .bind(id)
                    .bind(&payment_id)
                    .execute(&mut *tx)
                    .await?;
                Some(PaymentEntry {
                    id: payment_id,
                    docstatus: DocStatus::Submitted,
                    entry,
                })
            }
            None => None,
        };
        tx.commit().await?;

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
        let rows = sqlx::query(
            "SELECT DISTINCT p.id, p.party_type, p.party, p.company, p.posting_date,
                    p.paid_amount, p.received_amount, p.paid_from, p.paid_to,
                    p.reference_no, p.reference_date, p.docstatus
             FROM payment_entries p
             JOIN payment_entry_references r ON r.payment_entry = p.id
             WHERE r.reference_name = $1
             ORDER BY p.id",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let references = self.references_for(&id).await?;
            let posting_date: NaiveDate = row.try_get("posting_date")?;
            let paid_amount: Decimal = row.try_get("paid_amount")?;
            entries.push(PaymentEntry {
                docstatus: DocStatus::from_i16(row.try_get("docstatus")?),
                entry: NewPaymentEntry {
                    payment_type: PaymentType::Receive,
                    party_type: row.try_get("party_type")?,
                    party: row.try_get("party")?,
                    company: row.try_get("company")?,
                    posting_date,
                    paid_amount,
                    received_amount: row.try_get("received_amount")?,
                    paid_from: row.try_get("paid_from")?,
                    paid_to: row.try_get("paid_to")?,
                    reference_no: row.try_get("reference_no")?,
                    reference_date: row.try_get("reference_date")?,
                    references,
                },
                id,
            });
        }
        Ok(entries)
    }

    async fn get_file(&self, id: &str) -> StoreResult<Option<FileAttachment>> {
        let row = sqlx::query(
            "SELECT id, file_name, file_url, attached_to_doctype, attached_to_name
             FROM files WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| -> StoreResult<FileAttachment> {
            Ok(FileAttachment {
                id: row.try_get("id")?,
                file_name: row.try_get("file_name")?,
                file_url: row.try_get("file_url")?,
                attached_to_doctype: row.try_get("attached_to_doctype")?,
                attached_to_name: row.try_get("attached_to_name")?,
            })
        })
        .transpose()
    }
}
