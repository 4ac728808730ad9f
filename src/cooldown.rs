//! Per-group rate limiting with independent general and search tracks.
//!
//! A group is cooling down while less than the configured duration has passed
//! since its last successfully answered request. Whitelisted users are never
//! held back.

// lazy_regex! uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use crate::access::{AccessControl, AccessList};
use crate::clock::Clock;
use crate::storage::{cooldown_key, load_json, save_json, search_cooldown_key, KeyValueStore, StorageError};
use lazy_regex::lazy_regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// `<number>[unit]`, unit one of ms/s/m/h, seconds when omitted
static RE_DURATION: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"^\s*(\d+(?:\.\d+)?)\s*(ms|s|m|h)?\s*$");

/// Parses a compact duration such as `1.5m`, `90s`, `250ms` or `2h`.
///
/// Unparsable input yields [`Duration::ZERO`], which means the track never
/// cools down.
#[must_use]
pub fn parse_duration(input: &str) -> Duration {
    let Some(caps) = RE_DURATION.captures(input) else {
        warn!(input, "Invalid cooldown duration, cooldown disabled");
        return Duration::ZERO;
    };
    let amount: f64 = caps
        .get(1)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);
    let factor_ms = match caps.get(2).map(|m| m.as_str()) {
        Some("ms") => 1.0,
        Some("m") => 60_000.0,
        Some("h") => 3_600_000.0,
        _ => 1_000.0,
    };
    let millis = amount * factor_ms;
    if !millis.is_finite() || millis <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(millis / 1000.0).unwrap_or_else(|e| {
        warn!(input, error = %e, "Cooldown duration out of range, cooldown disabled");
        Duration::ZERO
    })
}

/// Seconds left before a cooldown expires: `ceil(remaining / 1000)`, never below 1.
#[must_use]
pub fn remaining_secs(duration: Duration, last_request_ms: i64, now_ms: i64) -> u64 {
    let duration_ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
    let remaining_ms = duration_ms.saturating_sub(now_ms.saturating_sub(last_request_ms));
    let secs = remaining_ms.saturating_add(999).div_euclid(1000);
    u64::try_from(secs).unwrap_or(0).max(1)
}

/// Which rate-limit track a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownTrack {
    /// Questions answered from context or replies
    General,
    /// `/search` queries
    Search,
}

impl CooldownTrack {
    fn key(self, group_id: i64) -> String {
        match self {
            Self::General => cooldown_key(group_id),
            Self::Search => search_cooldown_key(group_id),
        }
    }
}

/// Stored per-group timestamp
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CooldownRecord {
    /// Epoch millis of the last completed request
    pub last_request_timestamp: i64,
}

/// Outcome of a cooldown check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownStatus {
    /// The request may proceed
    Clear,
    /// The group must wait
    Active {
        /// Whole seconds to wait, at least 1
        remaining_secs: u64,
    },
}

/// Rate limiter over KV-stored timestamps
#[derive(Clone)]
pub struct CooldownGate {
    kv: Arc<dyn KeyValueStore>,
    access: AccessControl,
    clock: Arc<dyn Clock>,
    general: Duration,
    search: Duration,
}

impl CooldownGate {
    /// Build a gate with one duration per track
    #[must_use]
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        access: AccessControl,
        clock: Arc<dyn Clock>,
        general: Duration,
        search: Duration,
    ) -> Self {
        Self {
            kv,
            access,
            clock,
            general,
            search,
        }
    }

    /// Configured duration of a track
    #[must_use]
    pub const fn duration(&self, track: CooldownTrack) -> Duration {
        match track {
            CooldownTrack::General => self.general,
            CooldownTrack::Search => self.search,
        }
    }

    async fn last_request(&self, group_id: i64, track: CooldownTrack) -> Option<i64> {
        load_json::<CooldownRecord>(self.kv.as_ref(), &track.key(group_id))
            .await
            .map(|record| record.last_request_timestamp)
    }

    /// Check the track for `group_id` on behalf of `user_id`
    pub async fn status(&self, group_id: i64, user_id: i64, track: CooldownTrack) -> CooldownStatus {
        if self.access.is_listed(AccessList::UserWhitelist, user_id).await {
            return CooldownStatus::Clear;
        }
        let Some(last) = self.last_request(group_id, track).await else {
            return CooldownStatus::Clear;
        };
        let duration = self.duration(track);
        let now = self.clock.now_ms();
        let duration_ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        if now.saturating_sub(last) < duration_ms {
            let remaining_secs = remaining_secs(duration, last, now);
            debug!(group_id, user_id, ?track, remaining_secs, "Group is cooling down");
            CooldownStatus::Active { remaining_secs }
        } else {
            CooldownStatus::Clear
        }
    }

    /// Whether `user_id` must wait before asking in `group_id`
    pub async fn is_in_cooldown(&self, group_id: i64, user_id: i64, track: CooldownTrack) -> bool {
        matches!(
            self.status(group_id, user_id, track).await,
            CooldownStatus::Active { .. }
        )
    }

    /// Stamp the track with the current time after a completed request
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be written.
    pub async fn record_request(&self, group_id: i64, track: CooldownTrack) -> Result<(), StorageError> {
        let record = CooldownRecord {
            last_request_timestamp: self.clock.now_ms(),
        };
        save_json(self.kv.as_ref(), &track.key(group_id), &record).await
    }
}
