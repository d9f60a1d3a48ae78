use anyhow::{anyhow, Context, Result};
use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use std::collections::HashMap;
use tracing::{debug, warn};
use unic_langid::LanguageIdentifier;

/// Message resources compiled into the binary
const RESOURCES: &[(&str, &str)] = &[
    ("id", include_str!("../locales/id/main.ftl")),
    ("en", include_str!("../locales/en/main.ftl")),
];

/// Localized bot replies, one bundle per supported language
pub struct LocalizationManager {
    bundles: HashMap<String, FluentBundle<FluentResource>>,
    default_language: String,
}

impl LocalizationManager {
    /// Create a manager falling back to `default_language` for unknown or
    /// missing languages
    pub fn new(default_language: &str) -> Result<Self> {
        let mut bundles = HashMap::new();
        for (language, source) in RESOURCES {
            let bundle = Self::create_bundle(language, source)
                .with_context(|| format!("Failed to load messages for '{language}'"))?;
            bundles.insert(language.to_string(), bundle);
        }

        let default_language = default_language.trim().to_lowercase();
        if !bundles.contains_key(&default_language) {
            return Err(anyhow!("Unsupported default language '{default_language}'"));
        }

        Ok(Self {
            bundles,
            default_language,
        })
    }

    fn create_bundle(language: &str, source: &str) -> Result<FluentBundle<FluentResource>> {
        let locale: LanguageIdentifier = language.parse()?;
        let mut bundle = FluentBundle::new_concurrent(vec![locale]);
        // Replies are plain Telegram text; no bidi isolation marks
        bundle.set_use_isolating(false);

        let resource = FluentResource::try_new(source.to_string())
            .map_err(|(_, errors)| anyhow!("Invalid Fluent resource: {errors:?}"))?;
        bundle
            .add_resource(resource)
            .map_err(|errors| anyhow!("Conflicting Fluent messages: {errors:?}"))?;

        Ok(bundle)
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// Supported language for a Telegram `language_code` such as `en-US`
    pub fn resolve_language(&self, language_code: Option<&str>) -> &str {
        language_code
            .and_then(|code| code.split(['-', '_']).next())
            .map(str::to_lowercase)
            .and_then(|primary| self.bundles.get_key_value(&primary).map(|(k, _)| k.as_str()))
            .unwrap_or(self.default_language.as_str())
    }

    /// Get a localized message
    pub fn get_message(&self, language: &str, key: &str, args: Option<&FluentArgs>) -> String {
        if let Some(text) = self.format(language, key, args) {
            return text;
        }
        if language != self.default_language {
            debug!(language, key, "Message missing, using default language");
            if let Some(text) = self.format(&self.default_language, key, args) {
                return text;
            }
        }
        warn!(key, "Missing translation");
        format!("Missing translation: {key}")
    }

    /// Get a localized message with simple string arguments
    pub fn get_message_with_args(&self, language: &str, key: &str, args: &[(&str, String)]) -> String {
        let mut fluent_args = FluentArgs::new();
        for (name, value) in args {
            fluent_args.set(*name, FluentValue::from(value.clone()));
        }
        self.get_message(language, key, Some(&fluent_args))
    }

    fn format(&self, language: &str, key: &str, args: Option<&FluentArgs>) -> Option<String> {
        let bundle = self.bundles.get(language)?;
        let pattern = bundle.get_message(key)?.value()?;

        let mut errors = vec![];
        let value = bundle.format_pattern(pattern, args, &mut errors);
        if !errors.is_empty() {
            warn!(language, key, ?errors, "Message formatted with errors");
        }
        Some(value.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_language_is_used_for_unknown_codes() {
        let messages = LocalizationManager::new("id").unwrap();
        assert_eq!(messages.resolve_language(Some("en-US")), "en");
        assert_eq!(messages.resolve_language(Some("fr")), "id");
        assert_eq!(messages.resolve_language(None), "id");
    }

    #[test]
    fn test_arguments_are_interpolated_without_isolation_marks() {
        let messages = LocalizationManager::new("id").unwrap();
        let text = messages.get_message_with_args(
            "id",
            "error-parsing-json",
            &[("raw", "{not json}".to_string())],
        );
        assert_eq!(text, "Error parsing JSON:\n{not json}");
    }

    #[test]
    fn test_missing_key() {
        let messages = LocalizationManager::new("en").unwrap();
        assert_eq!(
            messages.get_message("en", "no-such-key", None),
            "Missing translation: no-such-key"
        );
    }

    #[test]
    fn test_unsupported_default_language() {
        assert!(LocalizationManager::new("xx").is_err());
    }

    #[test]
    fn test_every_key_exists_in_both_languages() {
        let messages = LocalizationManager::new("id").unwrap();
        for key in [
            "help",
            "not-registered",
            "no-open-invoices",
            "awaiting-transfer-photo",
            "send-photo-first",
            "cancelled",
            "unknown-command",
            "use-transfer-command-first",
            "processing-error",
        ] {
            for language in ["id", "en"] {
                assert!(messages.format(language, key, None).is_some(), "{language}/{key}");
            }
        }
    }
}
