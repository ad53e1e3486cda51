//! Publish ledger persistence: announcement claims and comment flags.
//!
//! An announcement row is created as a *claim* (no message id yet) by the
//! first caller that wins the unique-key insert. The claim is completed with
//! the channel message id once the announcement was transmitted, after which
//! the row never changes again. Comment flags are insert-once rows.
//!
//! A claim's `claimed_at_ms` doubles as its owner stamp: completing or
//! releasing a claim only touches the row while it still carries the stamp
//! the caller wrote, so a holder whose claim was taken over cannot clobber
//! the new owner.

use async_trait::async_trait;
use sqlx::Row;
use tracing::{debug, instrument};

use super::{Result, Store, check_affected};
use crate::locator::ResourceId;
use crate::manifest::FileSelector;
use crate::transport::MessageId;

/// Current state of a resource's announcement row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnouncementRecord {
    /// Channel message id, once published.
    pub message_id: Option<MessageId>,
    /// Unix milliseconds at which the current claim was taken.
    pub claimed_at_ms: i64,
}

/// Data-access contract for the publish ledger.
#[async_trait]
pub trait PublishStore: Send + Sync {
    /// Reads the announcement row for a resource.
    async fn announcement(&self, resource_id: &ResourceId) -> Result<Option<AnnouncementRecord>>;

    /// Inserts an empty claim row. Returns false if any row already exists.
    async fn try_claim_announcement(&self, resource_id: &ResourceId, now_ms: i64) -> Result<bool>;

    /// Re-stamps a claim that is still empty and older than `stale_before_ms`.
    ///
    /// Returns true when this caller took the claim over.
    async fn take_over_stale_claim(
        &self,
        resource_id: &ResourceId,
        stale_before_ms: i64,
        now_ms: i64,
    ) -> Result<bool>;

    /// Fills the caller's claim (stamped `claimed_at_ms`) with the published message id.
    async fn complete_announcement(
        &self,
        resource_id: &ResourceId,
        claimed_at_ms: i64,
        message_id: MessageId,
    ) -> Result<()>;

    /// Drops the caller's empty claim so a later attempt can retry.
    ///
    /// Returns false when the claim is no longer the caller's.
    async fn release_claim(&self, resource_id: &ResourceId, claimed_at_ms: i64) -> Result<bool>;

    /// True once the comment for `(resource, selector)` has been posted.
    async fn is_commented(&self, resource_id: &ResourceId, selector: FileSelector) -> Result<bool>;

    /// Records the comment flag. Returns false if it was already set.
    async fn mark_commented(&self, resource_id: &ResourceId, selector: FileSelector)
    -> Result<bool>;

    /// Removes every announcement and comment row. Returns rows deleted.
    async fn clear_ledger(&self) -> Result<u64>;
}

impl Store {
    /// Reads the announcement row for `resource_id`.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(resource_id = %resource_id))]
    pub async fn announcement(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<AnnouncementRecord>> {
        let row = sqlx::query(
            "SELECT channel_message_id, claimed_at_ms FROM publish_announcements WHERE resource_id = ?",
        )
        .bind(resource_id.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|row| -> Result<AnnouncementRecord> {
            Ok(AnnouncementRecord {
                message_id: row
                    .try_get::<Option<i64>, _>("channel_message_id")?
                    .map(MessageId),
                claimed_at_ms: row.try_get("claimed_at_ms")?,
            })
        })
        .transpose()
    }

    /// Inserts an empty claim unless a row exists.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the insert fails.
    #[instrument(skip(self), fields(resource_id = %resource_id))]
    pub async fn try_claim_announcement(
        &self,
        resource_id: &ResourceId,
        now_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"INSERT INTO publish_announcements (resource_id, channel_message_id, claimed_at_ms)
              VALUES (?, NULL, ?)
              ON CONFLICT(resource_id) DO NOTHING",
        )
        .bind(resource_id.as_str())
        .bind(now_ms)
        .execute(self.db.pool())
        .await?;

        let won = result.rows_affected() > 0;
        debug!(won, "announcement claim attempted");
        Ok(won)
    }

    /// Takes over an abandoned claim.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the update fails.
    #[instrument(skip(self), fields(resource_id = %resource_id))]
    pub async fn take_over_stale_claim(
        &self,
        resource_id: &ResourceId,
        stale_before_ms: i64,
        now_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"UPDATE publish_announcements
              SET claimed_at_ms = ?
              WHERE resource_id = ?
                AND channel_message_id IS NULL
                AND claimed_at_ms < ?",
        )
        .bind(now_ms)
        .bind(resource_id.as_str())
        .bind(stale_before_ms)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Sets the message id on a still-empty claim stamped `claimed_at_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::NotFound`] if the resource has no empty
    /// claim with that stamp, or [`super::StoreError::Database`] if the
    /// update fails.
    #[instrument(skip(self), fields(resource_id = %resource_id, message_id = %message_id))]
    pub async fn complete_announcement(
        &self,
        resource_id: &ResourceId,
        claimed_at_ms: i64,
        message_id: MessageId,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE publish_announcements
              SET channel_message_id = ?, published_at = datetime('now')
              WHERE resource_id = ?
                AND channel_message_id IS NULL
                AND claimed_at_ms = ?",
        )
        .bind(message_id.0)
        .bind(resource_id.as_str())
        .bind(claimed_at_ms)
        .execute(self.db.pool())
        .await?;

        check_affected(
            "publish_announcements",
            resource_id.as_str(),
            result.rows_affected(),
        )
    }

    /// Deletes a claim stamped `claimed_at_ms` that never received a message id.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the delete fails.
    #[instrument(skip(self), fields(resource_id = %resource_id))]
    pub async fn release_claim(&self, resource_id: &ResourceId, claimed_at_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            r"DELETE FROM publish_announcements
              WHERE resource_id = ?
                AND channel_message_id IS NULL
                AND claimed_at_ms = ?",
        )
        .bind(resource_id.as_str())
        .bind(claimed_at_ms)
        .execute(self.db.pool())
        .await?;

        let released = result.rows_affected() > 0;
        debug!(released, "announcement claim release attempted");
        Ok(released)
    }

    /// Checks the comment flag.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(resource_id = %resource_id, selector = %selector))]
    pub async fn is_commented(
        &self,
        resource_id: &ResourceId,
        selector: FileSelector,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM publish_comments WHERE resource_id = ? AND selector = ?",
        )
        .bind(resource_id.as_str())
        .bind(selector.as_wire())
        .fetch_one(self.db.pool())
        .await?;
        Ok(count > 0)
    }

    /// Sets the comment flag once.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the insert fails.
    #[instrument(skip(self), fields(resource_id = %resource_id, selector = %selector))]
    pub async fn mark_commented(
        &self,
        resource_id: &ResourceId,
        selector: FileSelector,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"INSERT INTO publish_comments (resource_id, selector) VALUES (?, ?)
              ON CONFLICT(resource_id, selector) DO NOTHING",
        )
        .bind(resource_id.as_str())
        .bind(selector.as_wire())
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Wipes both ledger tables.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if either delete fails.
    #[instrument(skip(self))]
    pub async fn clear_ledger(&self) -> Result<u64> {
        let mut tx = self.db.pool().begin().await?;
        let announcements = sqlx::query("DELETE FROM publish_announcements")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let comments = sqlx::query("DELETE FROM publish_comments")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        debug!(announcements, comments, "publish ledger cleared");
        Ok(announcements + comments)
    }
}

#[async_trait]
impl PublishStore for Store {
    async fn announcement(&self, resource_id: &ResourceId) -> Result<Option<AnnouncementRecord>> {
        Store::announcement(self, resource_id).await
    }

    async fn try_claim_announcement(&self, resource_id: &ResourceId, now_ms: i64) -> Result<bool> {
        Store::try_claim_announcement(self, resource_id, now_ms).await
    }

    async fn take_over_stale_claim(
        &self,
        resource_id: &ResourceId,
        stale_before_ms: i64,
        now_ms: i64,
    ) -> Result<bool> {
        Store::take_over_stale_claim(self, resource_id, stale_before_ms, now_ms).await
    }

    async fn complete_announcement(
        &self,
        resource_id: &ResourceId,
        claimed_at_ms: i64,
        message_id: MessageId,
    ) -> Result<()> {
        Store::complete_announcement(self, resource_id, claimed_at_ms, message_id).await
    }

    async fn release_claim(&self, resource_id: &ResourceId, claimed_at_ms: i64) -> Result<bool> {
        Store::release_claim(self, resource_id, claimed_at_ms).await
    }

    async fn is_commented(&self, resource_id: &ResourceId, selector: FileSelector) -> Result<bool> {
        Store::is_commented(self, resource_id, selector).await
    }

    async fn mark_commented(
        &self,
        resource_id: &ResourceId,
        selector: FileSelector,
    ) -> Result<bool> {
        Store::mark_commented(self, resource_id, selector).await
    }

    async fn clear_ledger(&self) -> Result<u64> {
        Store::clear_ledger(self).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::StoreError;

    async fn store() -> Store {
        Store::new(Database::new_in_memory().await.unwrap())
    }

    fn rid() -> ResourceId {
        ResourceId::parse(crate::manifest::tests::HEX).unwrap()
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = store().await;
        assert!(store.try_claim_announcement(&rid(), 1_000).await.unwrap());
        assert!(!store.try_claim_announcement(&rid(), 2_000).await.unwrap());

        let record = store.announcement(&rid()).await.unwrap().unwrap();
        assert_eq!(record.message_id, None);
        assert_eq!(record.claimed_at_ms, 1_000);
    }

    #[tokio::test]
    async fn test_complete_announcement_sets_id_once() {
        let store = store().await;
        store.try_claim_announcement(&rid(), 0).await.unwrap();
        store
            .complete_announcement(&rid(), 0, MessageId(77))
            .await
            .unwrap();

        let err = store
            .complete_announcement(&rid(), 0, MessageId(78))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        let record = store.announcement(&rid()).await.unwrap().unwrap();
        assert_eq!(record.message_id, Some(MessageId(77)));
    }

    #[tokio::test]
    async fn test_release_claim_never_removes_published_row() {
        let store = store().await;
        store.try_claim_announcement(&rid(), 0).await.unwrap();
        assert!(store.release_claim(&rid(), 0).await.unwrap());
        assert!(store.announcement(&rid()).await.unwrap().is_none());

        store.try_claim_announcement(&rid(), 0).await.unwrap();
        store
            .complete_announcement(&rid(), 0, MessageId(5))
            .await
            .unwrap();
        assert!(!store.release_claim(&rid(), 0).await.unwrap());
        assert!(store.announcement(&rid()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_superseded_claim_holder_cannot_release_or_complete() {
        let store = store().await;
        store.try_claim_announcement(&rid(), 1_000).await.unwrap();
        assert!(
            store
                .take_over_stale_claim(&rid(), 1_500, 2_000)
                .await
                .unwrap()
        );

        assert!(!store.release_claim(&rid(), 1_000).await.unwrap());
        let record = store.announcement(&rid()).await.unwrap().unwrap();
        assert_eq!(record.claimed_at_ms, 2_000);

        let err = store
            .complete_announcement(&rid(), 1_000, MessageId(9))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        store
            .complete_announcement(&rid(), 2_000, MessageId(10))
            .await
            .unwrap();
        assert_eq!(
            store.announcement(&rid()).await.unwrap().unwrap().message_id,
            Some(MessageId(10))
        );
    }

    #[tokio::test]
    async fn test_take_over_only_stale_empty_claims() {
        let store = store().await;
        store.try_claim_announcement(&rid(), 1_000).await.unwrap();

        assert!(
            !store
                .take_over_stale_claim(&rid(), 500, 2_000)
                .await
                .unwrap()
        );
        assert!(
            store
                .take_over_stale_claim(&rid(), 1_500, 2_000)
                .await
                .unwrap()
        );
        assert_eq!(
            store.announcement(&rid()).await.unwrap().unwrap().claimed_at_ms,
            2_000
        );
    }

    #[tokio::test]
    async fn test_comment_flag_is_insert_once_per_selector() {
        let store = store().await;
        assert!(!store.is_commented(&rid(), FileSelector::All).await.unwrap());
        assert!(store.mark_commented(&rid(), FileSelector::All).await.unwrap());
        assert!(!store.mark_commented(&rid(), FileSelector::All).await.unwrap());
        assert!(store.is_commented(&rid(), FileSelector::All).await.unwrap());
        assert!(
            !store
                .is_commented(&rid(), FileSelector::Index(0))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_clear_ledger_wipes_both_tables() {
        let store = store().await;
        store.try_claim_announcement(&rid(), 0).await.unwrap();
        store.mark_commented(&rid(), FileSelector::Images).await.unwrap();
        store.mark_commented(&rid(), FileSelector::Videos).await.unwrap();

        assert_eq!(store.clear_ledger().await.unwrap(), 3);
        assert!(store.announcement(&rid()).await.unwrap().is_none());
        assert!(!store.is_commented(&rid(), FileSelector::Images).await.unwrap());
    }
}
