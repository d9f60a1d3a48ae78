//! Reply text builders for the conversation router

use rust_decimal::{Decimal, RoundingStrategy};

use crate::localization::LocalizationManager;
use crate::models::{ExpenseLogRecord, Invoice};
use crate::reconciliation::LoggedIncome;

/// Rupiah amount with `.` grouping and `,` decimals, e.g. `1.250.000,50`
pub fn format_amount(amount: Decimal) -> String {
    let rounded = amount
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .normalize();
    let text = rounded.abs().to_string();
    let (integer, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    match fraction {
        "" => format!("{sign}{grouped}"),
        f => format!("{sign}{grouped},{f:0<2}"),
    }
}

pub fn help_text(messages: &LocalizationManager, language: &str, ai_enabled: bool) -> String {
    let help = messages.get_message(language, "help", None);
    if ai_enabled {
        format!("{help}\n\n{}", messages.get_message(language, "help-expense", None))
    } else {
        help
    }
}

/// Open invoices, oldest first, with their total outstanding
pub fn format_invoice_list(messages: &LocalizationManager, language: &str, invoices: &[Invoice]) -> String {
    if invoices.is_empty() {
        return messages.get_message(language, "no-open-invoices", None);
    }

    let mut lines = vec![messages.get_message(language, "open-invoices-header", None)];
    for invoice in invoices {
        lines.push(messages.get_message_with_args(
            language,
            "invoice-line",
            &[
                ("invoice", invoice.id.clone()),
                ("date", invoice.posting_date.format("%d-%m-%Y").to_string()),
                ("amount", format_amount(invoice.outstanding_amount)),
            ],
        ));
    }

    let total: Decimal = invoices.iter().map(|i| i.outstanding_amount).sum();
    lines.push(messages.get_message_with_args(
        language,
        "open-invoices-total",
        &[("total", format_amount(total))],
    ));
    lines.join("\n")
}

pub fn format_income_logged(messages: &LocalizationManager, language: &str, logged: &LoggedIncome) -> String {
    match &logged.invoice {
        Some(invoice) => messages.get_message_with_args(
            language,
            "income-logged-matched",
            &[
                ("log", logged.record.id.clone()),
                ("invoice", invoice.id.clone()),
                ("amount", format_amount(invoice.outstanding_amount)),
            ],
        ),
        None => messages.get_message_with_args(
            language,
            "income-logged-unmatched",
            &[("log", logged.record.id.clone())],
        ),
    }
}

/// Expense summary, with a review warning for unknown categories
pub fn format_expense_saved(messages: &LocalizationManager, language: &str, record: &ExpenseLogRecord) -> String {
    let summary = messages.get_message_with_args(
        language,
        "expense-saved",
        &[
            ("log", record.id.clone()),
            ("description", record.description.clone()),
            ("category", record.category.clone()),
            ("amount", format_amount(record.amount)),
        ],
    );

    if record.category_verified {
        summary
    } else {
        let warning = messages.get_message_with_args(
            language,
            "expense-category-warning",
            &[("category", record.category.clone())],
        );
        format!("{summary}\n\n⚠️ {warning}")
    }
}

pub fn format_parse_failure(messages: &LocalizationManager, language: &str, raw: &str) -> String {
    messages.get_message_with_args(language, "error-parsing-json", &[("raw", raw.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use crate::models::DocStatus;

    fn messages() -> LocalizationManager {
        LocalizationManager::new("id").unwrap()
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(Decimal::from(800_000)), "800.000");
        assert_eq!(format_amount(Decimal::from(150)), "150");
        assert_eq!(format_amount(Decimal::new(125_000_050, 2)), "1.250.000,50");
        assert_eq!(format_amount(Decimal::new(15, 1)), "1,50");
        assert_eq!(format_amount(Decimal::ZERO), "0");
    }

    #[test]
    fn test_invoice_list_lists_each_invoice_and_total() {
        let invoices = vec![
            Invoice {
                id: "SINV-0001".to_string(),
                customer: "CUST-1".to_string(),
                company: "Sopwer".to_string(),
                posting_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                due_date: None,
                grand_total: Decimal::from(150_000),
                outstanding_amount: Decimal::from(150_000),
                debit_to: "Debtors - S".to_string(),
                docstatus: DocStatus::Submitted,
            },
            Invoice {
                id: "SINV-0002".to_string(),
                customer: "CUST-1".to_string(),
                company: "Sopwer".to_string(),
                posting_date: NaiveDate::from_ymd_opt(2024, 2, 10).unwrap(),
                due_date: None,
                grand_total: Decimal::from(50_000),
                outstanding_amount: Decimal::from(50_000),
                debit_to: "Debtors - S".to_string(),
                docstatus: DocStatus::Submitted,
            },
        ];

        let text = format_invoice_list(&messages(), "id", &invoices);
        assert!(text.contains("SINV-0001 (15-01-2024): Rp 150.000"));
        assert!(text.contains("SINV-0002"));
        assert!(text.ends_with("Total: Rp 200.000"));
    }

    #[test]
    fn test_empty_invoice_list() {
        let text = format_invoice_list(&messages(), "en", &[]);
        assert_eq!(text, "You have no unpaid invoices.");
    }

    #[test]
    fn test_unverified_category_adds_warning() {
        let record = ExpenseLogRecord {
            id: "TEL-EXP-00001".to_string(),
            chat_id: 1,
            description: "Bioskop".to_string(),
            category: "Hiburan".to_string(),
            category_verified: false,
            amount: Decimal::from(50_000),
            user: None,
            image: None,
            created_at: Utc::now(),
        };
        let text = format_expense_saved(&messages(), "id", &record);
        assert!(text.starts_with("Transaksi berhasil disimpan (TEL-EXP-00001)"));
        assert!(text.contains("Rp 50.000"));
        assert!(text.contains("\"Hiburan\""));
    }
}
