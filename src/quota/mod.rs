//! Per-identity quota profiles and tiers.
//!
//! # Overview
//!
//! - [`Identity`] - Opaque user id, one profile each
//! - [`QuotaProfile`] - Concurrency slots, daily quota and size limit
//! - [`Tier`] / [`TierTable`] - Limits a profile is based on
//! - [`Clock`] - Source of "today" for the lazy daily reset
//!
//! Profiles are plain values. Mutation happens in
//! [`AdmissionController`](crate::admission::AdmissionController), which
//! serialises every read-modify-write cycle.

mod clock;

pub use clock::{Clock, FixedClock, SystemClock};

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(pub i64);

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error parsing a tier name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tier '{0}'\n  Suggestion: Use one of: basic, premium")]
pub struct UnknownTier(pub String);

/// Service tier a profile is based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Basic,
    Premium,
}

impl Tier {
    /// Stable lowercase label, matching the database column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "premium" => Ok(Self::Premium),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}

/// Limits granted by one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Fetches that may run at once.
    pub concurrent_slots: u32,
    /// Successful fetches per calendar day.
    pub daily_quota: u32,
    /// Largest selection, in bytes, a single fetch may cover.
    pub max_file_bytes: u64,
}

/// Default limits for [`Tier::Basic`]: 1 slot, 10 per day, 1.5 GiB.
pub const BASIC_LIMITS: TierLimits = TierLimits {
    concurrent_slots: 1,
    daily_quota: 10,
    max_file_bytes: 1536 * 1024 * 1024,
};

/// Default limits for [`Tier::Premium`]: 3 slots, 100 per day, 10 GiB.
pub const PREMIUM_LIMITS: TierLimits = TierLimits {
    concurrent_slots: 3,
    daily_quota: 100,
    max_file_bytes: 10 * 1024 * 1024 * 1024,
};

/// Limits for every tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable {
    pub basic: TierLimits,
    pub premium: TierLimits,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            basic: BASIC_LIMITS,
            premium: PREMIUM_LIMITS,
        }
    }
}

impl TierTable {
    /// Limits for `tier`.
    #[must_use]
    pub fn limits(&self, tier: Tier) -> TierLimits {
        match tier {
            Tier::Basic => self.basic,
            Tier::Premium => self.premium,
        }
    }
}

/// Quota state of one identity.
///
/// Invariants: `concurrent_slots_remaining <= concurrent_slots_total` and
/// `daily_quota_remaining <= daily_quota_total`. Unsigned fields cover the
/// lower bound of zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaProfile {
    pub identity: Identity,
    pub tier: Tier,
    pub concurrent_slots_total: u32,
    pub concurrent_slots_remaining: u32,
    pub daily_quota_total: u32,
    pub daily_quota_remaining: u32,
    /// Calendar day `daily_quota_remaining` was last reset for.
    pub daily_quota_reset_date: NaiveDate,
    pub max_file_bytes: u64,
}

impl QuotaProfile {
    /// Fresh profile with full allowances.
    #[must_use]
    pub fn new(identity: Identity, tier: Tier, limits: TierLimits, today: NaiveDate) -> Self {
        Self {
            identity,
            tier,
            concurrent_slots_total: limits.concurrent_slots,
            concurrent_slots_remaining: limits.concurrent_slots,
            daily_quota_total: limits.daily_quota,
            daily_quota_remaining: limits.daily_quota,
            daily_quota_reset_date: today,
            max_file_bytes: limits.max_file_bytes,
        }
    }

    /// Lazy daily reset: refills the daily quota if the marker is not `today`.
    ///
    /// Returns true when a reset happened. Calling it again on the same day
    /// is a no-op.
    pub fn refresh_daily(&mut self, today: NaiveDate) -> bool {
        if self.daily_quota_reset_date == today {
            return false;
        }
        self.daily_quota_remaining = self.daily_quota_total;
        self.daily_quota_reset_date = today;
        true
    }

    /// Moves the profile onto `tier`, clamping remaining values into range.
    ///
    /// Slots already taken by running fetches stay taken.
    pub fn rebase(&mut self, tier: Tier, limits: TierLimits) {
        let slots_in_use = self
            .concurrent_slots_total
            .saturating_sub(self.concurrent_slots_remaining);
        let daily_used = self
            .daily_quota_total
            .saturating_sub(self.daily_quota_remaining);

        self.tier = tier;
        self.concurrent_slots_total = limits.concurrent_slots;
        self.concurrent_slots_remaining = limits.concurrent_slots.saturating_sub(slots_in_use);
        self.daily_quota_total = limits.daily_quota;
        self.daily_quota_remaining = limits.daily_quota.saturating_sub(daily_used);
        self.max_file_bytes = limits.max_file_bytes;
    }

    /// Takes one concurrency slot. Returns false when none is left.
    pub fn take_slot(&mut self) -> bool {
        if self.concurrent_slots_remaining == 0 {
            return false;
        }
        self.concurrent_slots_remaining -= 1;
        true
    }

    /// Returns one concurrency slot, never exceeding the total.
    pub fn restore_slot(&mut self) {
        self.concurrent_slots_remaining = self
            .concurrent_slots_remaining
            .saturating_add(1)
            .min(self.concurrent_slots_total);
    }

    /// Consumes one unit of daily quota, stopping at zero.
    pub fn debit_daily(&mut self) {
        self.daily_quota_remaining = self.daily_quota_remaining.saturating_sub(1);
    }
}
