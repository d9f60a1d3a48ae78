//! Bot module for handling Telegram conversations
//!
//! - `router`: dispatches one webhook update on session state, command or photo
//! - `replies`: formats localized reply texts

pub mod replies;
pub mod router;

pub use router::{handle_update, Capabilities, Command, PhotoPolicy, WebhookStatus};
