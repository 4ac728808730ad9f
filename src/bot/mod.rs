/// Classification of inbound messages
pub mod classifier;
/// Command table
pub mod commands;
/// Per-update entry point
pub mod dispatch;
/// Command, private-chat and bookkeeping handlers
mod handlers;
/// Formatted sending with fallback
pub mod messaging;
/// Telegram Bot API seam
pub mod messenger;
/// AI-backed answers
mod questions;
/// Inbound update model
pub mod update;
/// Webhook HTTP surface
pub mod webhook;

#[cfg(test)]
mod tests;
