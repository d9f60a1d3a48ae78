//! # Receipt Extraction Module
//!
//! Reads description, expense category and total from a receipt photo by
//! asking a vision model for a JSON object and validating what comes back.
//!
//! ## Amount formats
//!
//! Receipts mix `.` and `,` as grouping and decimal marks. The last separator
//! is the decimal mark only when one or two digits follow it; every other
//! separator is grouping. `800.000,00`, `800,000.00`, `800.000` and `800000`
//! all read as 800000.

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::errors::{AppError, ExtractionError};
use crate::models::{BotSettings, ExtractedReceipt, DEFAULT_AI_MODEL};
use crate::vision::{VisionModel, VisionRequest};

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("fenced block pattern should be valid");
}

/// Mime type sent along with images the format detector does not recognize
pub const FALLBACK_MIME_TYPE: &str = "image/jpeg";

/// Build the extraction prompt for the given category list
pub fn build_prompt(valid_categories: &[String]) -> String {
    let categories = valid_categories
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Dari struk ini, identifikasi jenis transaksi \
         (misalnya: BBM di Cimahi, Makan di Restoran Pak Unang, Tol Jagorawi) sebagai 'description', \
         lalu pilih 'expense_category' HANYA dari daftar berikut: [{categories}], \
         dan total jumlah pembayaran sebagai 'amount'. \
         Perhatikan angkanya terkadang ditulis 800.000,00 atau 800,000.00; keduanya berarti 800000.\n\
         Sajikan hasilnya dalam format JSON berikut:\n\
         {{\"description\": \"string\", \"expense_category\": \"string\", \"amount\": number}}\n\
         Output harus HANYA objek JSON tanpa teks tambahan."
    )
}

/// Content of the first fenced block, or the whole text, trimmed
pub fn extract_json(raw_text: &str) -> &str {
    match FENCED_BLOCK.captures(raw_text).and_then(|c| c.get(1)) {
        Some(block) => block.as_str().trim(),
        None => raw_text.trim(),
    }
}

/// Outermost `{ ... }` span, for answers with prose around the object
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a receipt amount written with any mix of grouping separators
pub fn normalize_amount(raw: &str) -> Option<Decimal> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    // "Rp. 800.000,-" style decorations around the number
    let cleaned = kept
        .trim_start_matches(['.', ','])
        .trim_end_matches(['.', ',', '-']);

    if cleaned.contains('-') || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let (integer, fraction) = match cleaned.rfind(['.', ',']) {
        Some(pos) if (1..=2).contains(&(cleaned.len() - pos - 1)) => {
            (&cleaned[..pos], &cleaned[pos + 1..])
        }
        _ => (cleaned, ""),
    };

    let mut digits: String = integer.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        digits.push('0');
    }
    if !fraction.is_empty() {
        digits.push('.');
        digits.push_str(fraction);
    }

    Decimal::from_str(&digits).ok().map(|d| d.normalize())
}

fn amount_from_value(value: &Value) -> Option<Decimal> {
    let amount = match value {
        Value::Number(number) => {
            let text = number.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()?
                .normalize()
        }
        Value::String(text) => normalize_amount(text)?,
        _ => return None,
    };
    (amount >= Decimal::ZERO).then_some(amount)
}

fn required_string(object: &Map<String, Value>, key: &str, raw: &str) -> Result<String, ExtractionError> {
    match object.get(key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Some(Value::String(_)) => Err(ExtractionError::new(format!("'{key}' is empty"), raw)),
        Some(_) => Err(ExtractionError::new(format!("'{key}' is not a string"), raw)),
        None => Err(ExtractionError::new(format!("missing '{key}'"), raw)),
    }
}

/// Parse a model answer into a receipt.
///
/// A category outside `valid_categories` is not an error: the receipt comes
/// back with `category_valid == false`. Categories are matched ignoring case
/// and take the configured spelling.
pub fn parse_receipt(
    raw_text: &str,
    valid_categories: &[String],
) -> Result<ExtractedReceipt, ExtractionError> {
    let extracted = extract_json(raw_text);

    let value: Value = match serde_json::from_str(extracted) {
        Ok(value) => value,
        Err(first_error) => outermost_object(extracted)
            .and_then(|object| serde_json::from_str(object).ok())
            .ok_or_else(|| ExtractionError::new(first_error.to_string(), extracted))?,
    };

    let object = value
        .as_object()
        .ok_or_else(|| ExtractionError::new("answer is not a JSON object", extracted))?;

    let description = required_string(object, "description", extracted)?;
    let category = required_string(object, "expense_category", extracted)?;
    let amount = object
        .get("amount")
        .ok_or_else(|| ExtractionError::new("missing 'amount'", extracted))
        .and_then(|value| {
            amount_from_value(value)
                .ok_or_else(|| ExtractionError::new(format!("unreadable amount {value}"), extracted))
        })?;

    let canonical = valid_categories
        .iter()
        .find(|valid| valid.trim().eq_ignore_ascii_case(&category));

    Ok(ExtractedReceipt {
        description,
        category_valid: canonical.is_some(),
        category: canonical.cloned().unwrap_or(category),
        amount,
    })
}

/// Mime type of an image, detected from its leading bytes
pub fn detect_mime_type(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => "image/png",
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        Ok(image::ImageFormat::WebP) => "image/webp",
        Ok(image::ImageFormat::Gif) => "image/gif",
        Ok(format) => {
            debug!(?format, "Image format not accepted by the model, sending as JPEG");
            FALLBACK_MIME_TYPE
        }
        Err(_) => FALLBACK_MIME_TYPE,
    }
}

pub struct ReceiptExtractor {
    model: Arc<dyn VisionModel>,
}

impl ReceiptExtractor {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self { model }
    }

    /// Ask the model about `image` once and parse its answer
    pub async fn extract(
        &self,
        image: &[u8],
        valid_categories: &[String],
        settings: &BotSettings,
    ) -> Result<ExtractedReceipt, AppError> {
        let api_key = settings
            .ai_api_key
            .as_deref()
            .ok_or_else(|| AppError::Configuration("AI API key is not set".to_string()))?;
        let model = match settings.ai_model.trim() {
            "" => DEFAULT_AI_MODEL,
            name => name,
        };

        let prompt = build_prompt(valid_categories);
        let mime_type = detect_mime_type(image);

        let answer = self
            .model
            .generate(VisionRequest {
                api_key,
                model,
                prompt: &prompt,
                image,
                mime_type,
            })
            .await?;
        debug!(answer_length = answer.len(), "Vision model answered");

        match parse_receipt(&answer, valid_categories) {
            Ok(receipt) => {
                if receipt.category_valid {
                    info!(category = %receipt.category, amount = %receipt.amount, "Receipt extracted");
                } else {
                    warn!(category = %receipt.category, "Receipt category is not a configured expense category");
                }
                Ok(receipt)
            }
            Err(e) => {
                warn!(error = %e, "Vision model answer is not a valid receipt");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> Vec<String> {
        vec!["Transport".to_string(), "Makan".to_string()]
    }

    #[test]
    fn test_extract_json_fenced() {
        let raw = "Here you go:\n```json\n  {\"a\": 1}  \n```\nthanks";
        assert_eq!(extract_json(raw), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_bare_fence() {
        assert_eq!(extract_json("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_unfenced() {
        assert_eq!(extract_json("  {\"a\": 1}\n"), "{\"a\": 1}");
    }

    #[test]
    fn test_normalize_amount_grouping_variants() {
        let expected = Decimal::from(800_000);
        for raw in ["800.000,00", "800,000.00", "800000", "800.000", "Rp 800.000,-", "Rp. 800.000"] {
            assert_eq!(normalize_amount(raw), Some(expected), "input {raw}");
        }
    }

    #[test]
    fn test_normalize_amount_fractions() {
        assert_eq!(normalize_amount("12,50"), Some(Decimal::new(125, 1)));
        assert_eq!(normalize_amount("1.234.567,8"), Some(Decimal::new(12_345_678, 1)));
    }

    #[test]
    fn test_normalize_amount_rejects_garbage() {
        assert_eq!(normalize_amount(""), None);
        assert_eq!(normalize_amount("total"), None);
        assert_eq!(normalize_amount("-5000"), None);
    }

    #[test]
    fn test_parse_receipt_string_amount() {
        let raw = r#"```json
{"description":"Fuel","expense_category":"Transport","amount":"800.000,00"}
```"#;
        let receipt = parse_receipt(raw, &categories()).unwrap();
        assert_eq!(receipt.description, "Fuel");
        assert_eq!(receipt.category, "Transport");
        assert!(receipt.category_valid);
        assert_eq!(receipt.amount, Decimal::from(800_000));
    }

    #[test]
    fn test_parse_receipt_numeric_amount() {
        let raw = r#"{"description":"Tol Jagorawi","expense_category":"transport","amount":15500.0}"#;
        let receipt = parse_receipt(raw, &categories()).unwrap();
        assert_eq!(receipt.amount, Decimal::from(15_500));
        assert_eq!(receipt.category, "Transport");
    }

    #[test]
    fn test_parse_receipt_unknown_category_is_flagged() {
        let raw = r#"{"description":"Bioskop","expense_category":"Hiburan","amount":50000}"#;
        let receipt = parse_receipt(raw, &categories()).unwrap();
        assert!(!receipt.category_valid);
        assert_eq!(receipt.category, "Hiburan");
    }

    #[test]
    fn test_parse_receipt_with_surrounding_prose() {
        let raw = r#"Berikut hasilnya: {"description":"Makan siang","expense_category":"Makan","amount":"45.000"} semoga membantu"#;
        let receipt = parse_receipt(raw, &categories()).unwrap();
        assert_eq!(receipt.amount, Decimal::from(45_000));
    }

    #[test]
    fn test_parse_receipt_malformed_keeps_raw_text() {
        let err = parse_receipt("```json\n{not json}\n```", &categories()).unwrap_err();
        assert_eq!(err.raw, "{not json}");
    }

    #[test]
    fn test_parse_receipt_missing_key() {
        let err = parse_receipt(r#"{"description":"x","amount":1}"#, &categories()).unwrap_err();
        assert!(err.reason.contains("expense_category"));
    }

    #[test]
    fn test_parse_receipt_negative_amount() {
        let raw = r#"{"description":"x","expense_category":"Makan","amount":-10}"#;
        assert!(parse_receipt(raw, &categories()).is_err());
    }

    #[test]
    fn test_prompt_lists_categories() {
        let prompt = build_prompt(&categories());
        assert!(prompt.contains("\"Transport\""));
        assert!(prompt.contains("\"Makan\""));
        assert!(prompt.contains("800.000,00"));
    }

    #[test]
    fn test_detect_mime_type() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(detect_mime_type(&png), "image/png");
        assert_eq!(detect_mime_type(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]), "image/jpeg");
        assert_eq!(detect_mime_type(b"plain text"), FALLBACK_MIME_TYPE);
    }

    struct CannedModel(&'static str);

    #[async_trait::async_trait]
    impl VisionModel for CannedModel {
        async fn generate(
            &self,
            request: VisionRequest<'_>,
        ) -> Result<String, crate::errors::TransportError> {
            assert_eq!(request.model, DEFAULT_AI_MODEL);
            assert_eq!(request.mime_type, FALLBACK_MIME_TYPE);
            Ok(self.0.to_string())
        }
    }

    fn ai_settings(api_key: Option<&str>) -> BotSettings {
        BotSettings {
            bot_token: Some("t".to_string()),
            ai_api_key: api_key.map(str::to_string),
            ai_enabled: true,
            ai_model: String::new(),
        }
    }

    #[tokio::test]
    async fn test_extractor_parses_model_answer() {
        let extractor = ReceiptExtractor::new(Arc::new(CannedModel(
            "```json\n{\"description\":\"BBM di Cimahi\",\"expense_category\":\"Transport\",\"amount\":\"800.000,00\"}\n```",
        )));
        let receipt = extractor
            .extract(b"raw", &categories(), &ai_settings(Some("key")))
            .await
            .unwrap();
        assert_eq!(receipt.amount, Decimal::from(800_000));
        assert_eq!(receipt.description, "BBM di Cimahi");
    }

    #[tokio::test]
    async fn test_extractor_requires_api_key() {
        let extractor = ReceiptExtractor::new(Arc::new(CannedModel("{}")));
        let err = extractor
            .extract(b"raw", &categories(), &ai_settings(None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_extractor_surfaces_unparseable_answer() {
        let extractor = ReceiptExtractor::new(Arc::new(CannedModel("maaf, tidak terbaca")));
        let err = extractor
            .extract(b"raw", &categories(), &ai_settings(Some("key")))
            .await
            .unwrap_err();
        match err {
            AppError::Extraction(e) => assert_eq!(e.raw, "maaf, tidak terbaca"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
