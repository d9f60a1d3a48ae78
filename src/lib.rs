//! # Telexpense
//!
//! A Telegram webhook bot for small-business bookkeeping. Customers send
//! photos of transfer receipts that are matched to their oldest open invoice
//! and settled on submission; staff send receipt photos that a vision model
//! reads into expense logs.

pub mod bot;
pub mod config;
pub mod db;
pub mod errors;
pub mod identity;
pub mod localization;
pub mod memory_store;
pub mod models;
pub mod receipt;
pub mod reconciliation;
pub mod server;
pub mod session;
pub mod telegram;
pub mod vision;
