//! Telegram adapter (teloxide).
//!
//! Two bots share this crate: the user-facing chat bot, where every inbound
//! message passes through the core access gate before it can reach the
//! model relay, and the button-driven admin bot for key management.

pub mod admin;
pub mod handlers;
pub mod router;
