#![deny(missing_docs)]
//! Group Assistant
//!
//! Telegram group-assistant webhook: answers mentions with an AI chat model,
//! keeps bounded per-user context, enforces whitelists, a blacklist and
//! per-group cooldowns, and cleans up command replies after a short delay.

/// Whitelists, blacklist and command permissions
pub mod access;
/// Telegram bot implementation
pub mod bot;
/// Time source
pub mod clock;
/// Configuration management
pub mod config;
/// Per-user conversation history
pub mod context;
/// Per-group rate limiting
pub mod cooldown;
/// Chat-completion client
pub mod llm;
/// Delayed deletion of message pairs
pub mod scheduler;
/// Storage layer (R2/S3 and in-memory)
pub mod storage;
/// Utility functions
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
