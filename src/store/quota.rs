//! Quota profile persistence.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{debug, instrument};

use super::{Result, Store, StoreError, column_u32, column_u64, to_sql_int};
use crate::quota::{Identity, QuotaProfile, Tier};

const TABLE: &str = "quota_profiles";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Data-access contract for quota profiles.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Reads the profile for `identity`, if one exists.
    async fn load_profile(&self, identity: Identity) -> Result<Option<QuotaProfile>>;

    /// Inserts or fully replaces a profile.
    async fn save_profile(&self, profile: &QuotaProfile) -> Result<()>;

    /// Restores every profile's remaining slots to its total. Returns rows touched.
    async fn reset_concurrent_slots(&self) -> Result<u64>;
}

fn profile_from_row(row: &SqliteRow) -> Result<QuotaProfile> {
    let tier_raw: String = row.try_get("tier")?;
    let tier = tier_raw
        .parse::<Tier>()
        .map_err(|e| StoreError::corrupt(TABLE, e.0))?;
    let date_raw: String = row.try_get("daily_quota_reset_date")?;
    let daily_quota_reset_date = NaiveDate::parse_from_str(&date_raw, DATE_FORMAT)
        .map_err(|e| StoreError::corrupt(TABLE, format!("bad reset date '{date_raw}': {e}")))?;

    Ok(QuotaProfile {
        identity: Identity(row.try_get("identity")?),
        tier,
        concurrent_slots_total: column_u32(
            TABLE,
            "concurrent_slots_total",
            row.try_get("concurrent_slots_total")?,
        )?,
        concurrent_slots_remaining: column_u32(
            TABLE,
            "concurrent_slots_remaining",
            row.try_get("concurrent_slots_remaining")?,
        )?,
        daily_quota_total: column_u32(TABLE, "daily_quota_total", row.try_get("daily_quota_total")?)?,
        daily_quota_remaining: column_u32(
            TABLE,
            "daily_quota_remaining",
            row.try_get("daily_quota_remaining")?,
        )?,
        daily_quota_reset_date,
        max_file_bytes: column_u64(TABLE, "max_file_bytes", row.try_get("max_file_bytes")?)?,
    })
}

impl Store {
    /// Reads the profile for `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails or
    /// [`StoreError::CorruptRow`] if a column cannot be decoded.
    #[instrument(skip(self), fields(identity = %identity))]
    pub async fn load_profile(&self, identity: Identity) -> Result<Option<QuotaProfile>> {
        let row = sqlx::query(
            r"SELECT identity, tier, concurrent_slots_total, concurrent_slots_remaining,
                     daily_quota_total, daily_quota_remaining, daily_quota_reset_date,
                     max_file_bytes
              FROM quota_profiles WHERE identity = ?",
        )
        .bind(identity.0)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(profile_from_row).transpose()
    }

    /// Inserts or replaces the profile.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails, including CHECK
    /// violations for out-of-range values.
    #[instrument(skip(self, profile), fields(identity = %profile.identity))]
    pub async fn save_profile(&self, profile: &QuotaProfile) -> Result<()> {
        sqlx::query(
            r"INSERT INTO quota_profiles (
                identity, tier, concurrent_slots_total, concurrent_slots_remaining,
                daily_quota_total, daily_quota_remaining, daily_quota_reset_date, max_file_bytes
              ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT(identity) DO UPDATE SET
                tier = excluded.tier,
                concurrent_slots_total = excluded.concurrent_slots_total,
                concurrent_slots_remaining = excluded.concurrent_slots_remaining,
                daily_quota_total = excluded.daily_quota_total,
                daily_quota_remaining = excluded.daily_quota_remaining,
                daily_quota_reset_date = excluded.daily_quota_reset_date,
                max_file_bytes = excluded.max_file_bytes,
                updated_at = datetime('now')",
        )
        .bind(profile.identity.0)
        .bind(profile.tier.as_str())
        .bind(i64::from(profile.concurrent_slots_total))
        .bind(i64::from(profile.concurrent_slots_remaining))
        .bind(i64::from(profile.daily_quota_total))
        .bind(i64::from(profile.daily_quota_remaining))
        .bind(profile.daily_quota_reset_date.format(DATE_FORMAT).to_string())
        .bind(to_sql_int(profile.max_file_bytes))
        .execute(self.db.pool())
        .await?;

        debug!(
            slots_remaining = profile.concurrent_slots_remaining,
            daily_remaining = profile.daily_quota_remaining,
            "quota profile saved"
        );
        Ok(())
    }

    /// Restores all concurrency slots; used once at process start.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn reset_concurrent_slots(&self) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE quota_profiles
              SET concurrent_slots_remaining = concurrent_slots_total,
                  updated_at = datetime('now')
              WHERE concurrent_slots_remaining != concurrent_slots_total",
        )
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl QuotaStore for Store {
    async fn load_profile(&self, identity: Identity) -> Result<Option<QuotaProfile>> {
        Store::load_profile(self, identity).await
    }

    async fn save_profile(&self, profile: &QuotaProfile) -> Result<()> {
        Store::save_profile(self, profile).await
    }

    async fn reset_concurrent_slots(&self) -> Result<u64> {
        Store::reset_concurrent_slots(self).await
    }
}
