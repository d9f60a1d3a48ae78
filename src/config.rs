//! # Configuration Module
//!
//! Process-level settings read from the environment. Credentials and feature
//! toggles that operators change at runtime live in the record store instead
//! (see [`crate::models::BotSettings`]).

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 600;
pub const DEFAULT_TELEGRAM_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_AI_TIMEOUT_SECS: u64 = 25;
pub const DEFAULT_LANGUAGE: &str = "id";

/// Timeouts for outbound calls
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Telegram Bot API calls and file downloads
    pub telegram: Duration,
    /// Single vision model request
    pub ai: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            telegram: Duration::from_secs(DEFAULT_TELEGRAM_TIMEOUT_SECS),
            ai: Duration::from_secs(DEFAULT_AI_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres connection string; the in-memory store is used when absent
    pub database_url: Option<String>,
    pub telegram_api_url: String,
    pub gemini_api_url: String,
    /// How long a chat may stay in the awaiting-image state
    pub session_ttl: Duration,
    pub timeouts: TimeoutConfig,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` header value
    pub webhook_secret: Option<String>,
    /// Bearer token guarding the operator submit endpoint
    pub operator_token: Option<String>,
    pub default_language: String,
    /// Fallback credentials for the in-memory store
    pub bot_token: Option<String>,
    pub ai_api_key: Option<String>,
    pub ai_enabled: bool,
    pub expense_categories: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: None,
            telegram_api_url: DEFAULT_TELEGRAM_API_URL.to_string(),
            gemini_api_url: DEFAULT_GEMINI_API_URL.to_string(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            timeouts: TimeoutConfig::default(),
            webhook_secret: None,
            operator_token: None,
            default_language: DEFAULT_LANGUAGE.to_string(),
            bot_token: None,
            ai_api_key: None,
            ai_enabled: false,
            expense_categories: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = non_empty("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .context("BIND_ADDR must be a socket address like 0.0.0.0:8080")?;

        let secs = |key: &str, default: u64| -> Result<u64> {
            match non_empty(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{key} must be a whole number of seconds")),
                None => Ok(default),
            }
        };

        Ok(Self {
            bind_addr,
            database_url: non_empty("DATABASE_URL"),
            telegram_api_url: non_empty("TELEGRAM_API_URL")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
            gemini_api_url: non_empty("GEMINI_API_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_API_URL.to_string()),
            session_ttl: Duration::from_secs(secs("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?),
            timeouts: TimeoutConfig {
                telegram: Duration::from_secs(secs(
                    "TELEGRAM_TIMEOUT_SECS",
                    DEFAULT_TELEGRAM_TIMEOUT_SECS,
                )?),
                ai: Duration::from_secs(secs("AI_TIMEOUT_SECS", DEFAULT_AI_TIMEOUT_SECS)?),
            },
            webhook_secret: non_empty("TELEGRAM_WEBHOOK_SECRET"),
            operator_token: non_empty("OPERATOR_TOKEN"),
            default_language: non_empty("DEFAULT_LANGUAGE")
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            bot_token: non_empty("TELEGRAM_BOT_TOKEN"),
            ai_api_key: non_empty("GEMINI_API_KEY"),
            ai_enabled: non_empty("AI_ENABLED").is_some_and(|v| parse_flag(&v)),
            expense_categories: non_empty("EXPENSE_CATEGORIES")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

/// Interpret `1`, `true`, `yes`, `on` (any case) as enabled
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_empty() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.database_url.is_none());
        assert_eq!(config.telegram_api_url, DEFAULT_TELEGRAM_API_URL);
        assert_eq!(config.session_ttl, Duration::from_secs(600));
        assert_eq!(config.default_language, "id");
        assert!(!config.ai_enabled);
        assert!(config.operator_token.is_none());
    }

    #[test]
    fn test_values_from_environment() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/telexpense"),
            ("SESSION_TTL_SECS", "120"),
            ("AI_TIMEOUT_SECS", "5"),
            ("AI_ENABLED", "TRUE"),
            ("TELEGRAM_WEBHOOK_SECRET", "s3cret"),
            ("OPERATOR_TOKEN", "op-token"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/telexpense")
        );
        assert_eq!(config.session_ttl, Duration::from_secs(120));
        assert_eq!(config.timeouts.ai, Duration::from_secs(5));
        assert!(config.ai_enabled);
        assert_eq!(config.webhook_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.operator_token.as_deref(), Some("op-token"));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "  ")])).unwrap();
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let result = AppConfig::from_lookup(lookup_from(&[("SESSION_TTL_SECS", "ten")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_expense_categories_list() {
        let config = AppConfig::from_lookup(lookup_from(&[(
            "EXPENSE_CATEGORIES",
            "Transport, Makan,,Akomodasi ",
        )]))
        .unwrap();
        assert_eq!(config.expense_categories, vec!["Transport", "Makan", "Akomodasi"]);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" yes "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("nope"));
    }
}
