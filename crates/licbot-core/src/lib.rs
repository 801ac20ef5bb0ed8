//! Core domain + application logic for the license-gated chat bot.
//!
//! This crate is intentionally framework-agnostic. Telegram and the model
//! provider live behind adapter crates; everything here talks in terms of
//! user ids, license keys and token counts.

pub mod admin;
pub mod config;
pub mod domain;
pub mod errors;
pub mod gate;
pub mod license;
pub mod logging;
pub mod memory;
pub mod prompt;
pub mod store;
pub mod sweeper;
pub mod usage;

pub use errors::{Error, Result};
