//! Whitelists, blacklist and the command permission policy.

use crate::storage::{read_json, save_json, KeyValueStore, StorageError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// The three persisted id lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessList {
    /// Users exempt from cooldowns and allowed to run administrative commands
    UserWhitelist,
    /// Groups where the bot answers questions
    GroupWhitelist,
    /// Users denied all service
    UserBlacklist,
}

impl AccessList {
    /// KV key the list is stored under
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::UserWhitelist => "user_whitelist",
            Self::GroupWhitelist => "group_whitelist",
            Self::UserBlacklist => "user_blacklist",
        }
    }
}

/// How widely a command may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandScope {
    /// Informational commands, context reset and search
    Broad,
    /// List mutation
    Admin,
}

/// Decides whether a command may run.
///
/// Broad commands are open to anyone inside a whitelisted group and to
/// whitelisted users elsewhere. Admin commands always need a whitelisted user.
#[must_use]
pub const fn command_allowed(
    scope: CommandScope,
    group_whitelisted: bool,
    user_whitelisted: bool,
) -> bool {
    match scope {
        CommandScope::Broad => group_whitelisted || user_whitelisted,
        CommandScope::Admin => user_whitelisted,
    }
}

/// KV-backed access lists
#[derive(Clone)]
pub struct AccessControl {
    kv: Arc<dyn KeyValueStore>,
}

impl AccessControl {
    /// Wrap a key-value store
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Current members in insertion order, duplicates dropped. Absent or unreadable lists are empty.
    pub async fn members(&self, list: AccessList) -> Vec<i64> {
        match self.stored_members(list).await {
            Ok(members) => members,
            Err(e) => {
                warn!(list = list.key(), error = %e, "Access list unreadable, treating as empty");
                Vec::new()
            }
        }
    }

    /// Members for a read-modify-write: read failures are errors, not an empty list
    async fn stored_members(&self, list: AccessList) -> Result<Vec<i64>, StorageError> {
        let stored: Vec<i64> = read_json(self.kv.as_ref(), list.key())
            .await?
            .unwrap_or_default();
        let mut seen = HashSet::with_capacity(stored.len());
        Ok(stored.into_iter().filter(|id| seen.insert(*id)).collect())
    }

    /// Whether `id` is on `list`
    pub async fn is_listed(&self, list: AccessList, id: i64) -> bool {
        self.members(list).await.contains(&id)
    }

    /// Whether the user is blacklisted
    pub async fn is_blacklisted(&self, user_id: i64) -> bool {
        self.is_listed(AccessList::UserBlacklist, user_id).await
    }

    /// Add `id` to `list`. Adding a present id is a successful no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be read or the updated list cannot be written.
    pub async fn add(&self, list: AccessList, id: i64) -> Result<(), StorageError> {
        let mut members = self.stored_members(list).await?;
        if members.contains(&id) {
            return Ok(());
        }
        members.push(id);
        save_json(self.kv.as_ref(), list.key(), &members).await?;
        info!(list = list.key(), id, "Added to access list");
        Ok(())
    }

    /// Remove `id` from `list`. Removing an absent id is a successful no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be read or the updated list cannot be written.
    pub async fn remove(&self, list: AccessList, id: i64) -> Result<(), StorageError> {
        let mut members = self.stored_members(list).await?;
        let before = members.len();
        members.retain(|member| *member != id);
        if members.len() == before {
            return Ok(());
        }
        save_json(self.kv.as_ref(), list.key(), &members).await?;
        info!(list = list.key(), id, "Removed from access list");
        Ok(())
    }
}
