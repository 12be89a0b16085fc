//! SQLite persistence for campaigns, conversations, scheduled sends, drafts,
//! inbound receipts and the audit trail.

pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
