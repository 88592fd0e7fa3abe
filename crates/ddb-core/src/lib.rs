//! Core domain + application logic for the drink diary bot.
//!
//! This crate is intentionally framework-agnostic. Telegram and the
//! text-cleanup service live behind ports (traits) implemented in adapter
//! crates; only SQLite is embedded here.

pub mod backup;
pub mod config;
pub mod domain;
pub mod errors;
pub mod format;
pub mod logging;
pub mod parsers;
pub mod ports;
pub mod router;
pub mod scheduler;
pub mod steps;
pub mod store;
pub mod token;

pub use errors::{Error, Result};
