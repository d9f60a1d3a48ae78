use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use telexpense::bot::Capabilities;
use telexpense::config::AppConfig;
use telexpense::db::{init_database_schema, PgStore, RecordStore};
use telexpense::localization::LocalizationManager;
use telexpense::memory_store::MemoryStore;
use telexpense::models::{BotSettings, DEFAULT_AI_MODEL};
use telexpense::server::{self, AppState};
use telexpense::session::InMemorySessionStore;
use telexpense::telegram::TelegramClient;
use telexpense::vision::GeminiClient;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_store(config: &AppConfig) -> Result<Arc<dyn RecordStore>> {
    match config.database_url.as_deref() {
        Some(database_url) => {
            info!("Connecting to Postgres");
            let store = PgStore::connect(database_url)
                .await
                .context("Failed to connect to the database")?;
            init_database_schema(store.pool())
                .await
                .context("Failed to initialize the database schema")?;
            Ok(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set, using the in-memory store");
            let store = MemoryStore::new();
            store.set_settings(BotSettings {
                bot_token: config.bot_token.clone(),
                ai_api_key: config.ai_api_key.clone(),
                ai_enabled: config.ai_enabled,
                ai_model: DEFAULT_AI_MODEL.to_string(),
            });
            store.set_expense_categories(config.expense_categories.iter().cloned());
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    init_tracing();

    info!("Starting Telexpense bot");

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let store = build_store(&config).await?;

    let bot_api = TelegramClient::new(&config.telegram_api_url, config.timeouts.telegram)
        .context("Failed to build the Telegram client")?;
    let vision = GeminiClient::new(&config.gemini_api_url, config.timeouts.ai)
        .context("Failed to build the vision model client")?;
    let messages = LocalizationManager::new(&config.default_language)?;

    let caps = Capabilities::new(
        store,
        Arc::new(InMemorySessionStore::new()),
        Arc::new(bot_api),
        Arc::new(vision),
        messages,
        config.session_ttl,
    );

    let state = AppState {
        caps: Arc::new(caps),
        webhook_secret: config.webhook_secret.as_deref().map(Arc::from),
        operator_token: config.operator_token.as_deref().map(Arc::from),
    };

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    server::serve(listener, state).await
}
