//! Command table: canonical names, permission scope and menu descriptions.

use crate::access::CommandScope;

/// Commands the bot understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Introduction
    Start,
    /// Usage overview
    Help,
    /// Web-grounded question
    Search,
    /// Reset the invoking user's context
    ClearUserContext,
    /// Add the current chat to the group whitelist
    WhitelistGroup,
    /// Remove the current chat from the group whitelist
    UnwhitelistGroup,
    /// Add a user to the user whitelist
    WhitelistUser,
    /// Remove a user from the user whitelist
    UnwhitelistUser,
    /// Blacklist a user
    Ban,
    /// Lift a blacklist entry
    Unban,
}

const TABLE: &[(&str, Command, &str)] = &[
    ("start", Command::Start, "Introduce the bot"),
    ("help", Command::Help, "Show usage"),
    ("search", Command::Search, "Search the web: /search <query>"),
    ("clear_user_context", Command::ClearUserContext, "Forget our conversation"),
    ("whitelist_group", Command::WhitelistGroup, "Enable the bot in this group"),
    ("unwhitelist_group", Command::UnwhitelistGroup, "Disable the bot in this group"),
    ("whitelist_user", Command::WhitelistUser, "Whitelist a user: /whitelist_user <id>"),
    ("unwhitelist_user", Command::UnwhitelistUser, "Remove a user from the whitelist"),
    ("ban", Command::Ban, "Ban a user: /ban <id>"),
    ("uban", Command::Unban, "Unban a user: /uban <id>"),
];

impl Command {
    /// Look up a lower-cased command name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        TABLE
            .iter()
            .find(|(candidate, _, _)| *candidate == name)
            .map(|(_, command, _)| *command)
    }

    /// Canonical name without `/`
    #[must_use]
    pub fn name(self) -> &'static str {
        TABLE
            .iter()
            .find(|(_, command, _)| *command == self)
            .map_or("", |(name, _, _)| name)
    }

    /// Who may run it
    #[must_use]
    pub const fn scope(self) -> CommandScope {
        match self {
            Self::Start | Self::Help | Self::Search | Self::ClearUserContext => CommandScope::Broad,
            Self::WhitelistGroup
            | Self::UnwhitelistGroup
            | Self::WhitelistUser
            | Self::UnwhitelistUser
            | Self::Ban
            | Self::Unban => CommandScope::Admin,
        }
    }
}

/// Command menu as (command, description) pairs
#[must_use]
pub fn menu() -> Vec<(String, String)> {
    TABLE
        .iter()
        .map(|(name, _, description)| ((*name).to_string(), (*description).to_string()))
        .collect()
}
