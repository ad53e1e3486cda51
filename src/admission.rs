//! Quota and concurrency gate evaluated before any task starts.
//!
//! # Overview
//!
//! Admission runs in two phases so that cheap checks happen before any
//! engine work:
//!
//! 1. [`AdmissionController::enter`] sets the identity's in-progress flag
//!    and pre-checks slots and daily quota. It returns an [`AdmissionTicket`].
//! 2. [`AdmissionTicket::admit`] re-checks slots and daily quota against the
//!    resolved [`Selection`], checks its size, and only then takes a slot.
//!    It returns an [`Admission`].
//!
//! [`AdmissionController::try_admit`] runs both phases back to back.
//! [`AdmissionController::enter_flag_only`] sets just the flag, for work
//! that never consumes quota such as listing a resource's files.
//!
//! Rejections are reported in a fixed order: already in progress, slots
//! exhausted, daily quota exhausted, file too large.
//!
//! [`Admission::finish`] must be called once when the task ends. It returns
//! the slot, debits daily quota only on success, and clears the flag. If an
//! admission is dropped without `finish`, the flag is cleared immediately and
//! the slot is returned on a spawned task.
//!
//! Every profile read-modify-write runs under one process-wide lock. The
//! engine and the chat transport are never called while it is held. A
//! profile write that finds the database busy or locked is retried a few
//! times before the error surfaces.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::manifest::Selection;
use crate::quota::{Clock, Identity, QuotaProfile, Tier, TierTable};
use crate::store::{QuotaStore, StoreError};

/// Reasons a fetch is refused.
#[derive(Debug, Clone, Error)]
pub enum AdmissionError {
    /// The identity already has a resolution or fetch running.
    #[error(
        "a download is already in progress for user {identity}\n  Suggestion: Wait for it to finish or cancel it first"
    )]
    AlreadyInProgress {
        identity: Identity,
    },

    /// Every concurrency slot is taken.
    #[error("all {total} concurrent download slots are in use")]
    ConcurrencySlotsExhausted {
        total: u32,
    },

    /// Today's quota is used up.
    #[error("daily download quota of {total} is used up\n  Suggestion: Try again tomorrow")]
    DailyQuotaExhausted {
        total: u32,
    },

    /// The selection is larger than the profile allows.
    #[error("selection of {bytes} bytes exceeds the {limit} byte limit")]
    FileTooLarge {
        bytes: u64,
        limit: u64,
    },

    /// The quota store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Profile write attempts while the database reports busy or locked.
const SAVE_ATTEMPTS: u32 = 3;

/// Backoff before the n-th retry is `n * SAVE_BACKOFF`.
const SAVE_BACKOFF: Duration = Duration::from_millis(50);

struct Inner {
    store: Arc<dyn QuotaStore>,
    tiers: TierTable,
    clock: Arc<dyn Clock>,
    in_flight: DashSet<Identity>,
    quota_lock: Mutex<()>,
}

impl Inner {
    /// Loads (creating and lazily resetting) a profile, applies `apply`, and
    /// saves the result if anything changed. Runs entirely under the quota lock.
    async fn update<T>(
        &self,
        identity: Identity,
        apply: impl FnOnce(&mut QuotaProfile) -> Result<T, AdmissionError> + Send,
    ) -> Result<(T, QuotaProfile), AdmissionError> {
        let _guard = self.quota_lock.lock().await;
        let today = self.clock.today();

        let (mut profile, created) = match self.store.load_profile(identity).await? {
            Some(profile) => (profile, false),
            None => (
                QuotaProfile::new(identity, Tier::Basic, self.tiers.basic, today),
                true,
            ),
        };
        let reset = profile.refresh_daily(today);
        if reset {
            debug!(identity = %identity, "daily quota reset");
        }

        let before = profile.clone();
        let outcome = apply(&mut profile);
        if created || reset || profile != before {
            self.save(&profile).await?;
        }

        outcome.map(|value| (value, profile))
    }

    async fn save(&self, profile: &QuotaProfile) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.save_profile(profile).await {
                Err(error) if error.is_busy_or_locked() && attempt < SAVE_ATTEMPTS => {
                    warn!(
                        identity = %profile.identity,
                        attempt,
                        error = %error,
                        "quota profile write hit a busy database, retrying"
                    );
                    tokio::time::sleep(SAVE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn release_flag(&self, identity: Identity) {
        self.in_flight.remove(&identity);
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("tiers", &self.tiers)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

fn check_capacity(profile: &QuotaProfile) -> Result<(), AdmissionError> {
    if profile.concurrent_slots_remaining == 0 {
        return Err(AdmissionError::ConcurrencySlotsExhausted {
            total: profile.concurrent_slots_total,
        });
    }
    if profile.daily_quota_remaining == 0 {
        return Err(AdmissionError::DailyQuotaExhausted {
            total: profile.daily_quota_total,
        });
    }
    Ok(())
}

/// Gatekeeper for fetch requests.
///
/// Cheap to clone; clones share flags, lock and store.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

impl AdmissionController {
    #[must_use]
    pub fn new(store: Arc<dyn QuotaStore>, tiers: TierTable, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                tiers,
                clock,
                in_flight: DashSet::new(),
                quota_lock: Mutex::new(()),
            }),
        }
    }

    /// Phase one: marks `identity` busy and pre-checks slots and daily quota.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::AlreadyInProgress`],
    /// [`AdmissionError::ConcurrencySlotsExhausted`] or
    /// [`AdmissionError::DailyQuotaExhausted`], in that order of precedence.
    #[instrument(skip(self), fields(identity = %identity))]
    pub async fn enter(&self, identity: Identity) -> Result<AdmissionTicket, AdmissionError> {
        let ticket = self.enter_flag_only(identity)?;
        self.inner.update(identity, |p| check_capacity(p)).await?;
        Ok(ticket)
    }

    /// Marks `identity` busy without looking at slots or daily quota.
    ///
    /// The ticket clears the flag when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::AlreadyInProgress`].
    pub fn enter_flag_only(&self, identity: Identity) -> Result<AdmissionTicket, AdmissionError> {
        if !self.inner.in_flight.insert(identity) {
            debug!(identity = %identity, "rejected: already in progress");
            return Err(AdmissionError::AlreadyInProgress { identity });
        }
        Ok(AdmissionTicket {
            inner: Arc::clone(&self.inner),
            identity,
            armed: true,
        })
    }

    /// Runs both admission phases for an already resolved selection.
    ///
    /// # Errors
    ///
    /// Returns the first failing check, see [`AdmissionError`].
    pub async fn try_admit(
        &self,
        identity: Identity,
        selection: &Selection,
    ) -> Result<Admission, AdmissionError> {
        self.enter(identity).await?.admit(selection).await
    }

    /// True while `identity` holds a ticket or admission.
    #[must_use]
    pub fn is_in_progress(&self, identity: Identity) -> bool {
        self.inner.in_flight.contains(&identity)
    }

    /// Reads the profile, creating it and applying the lazy daily reset.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] if the store fails.
    pub async fn profile(&self, identity: Identity) -> Result<QuotaProfile, AdmissionError> {
        self.inner
            .update(identity, |_| Ok(()))
            .await
            .map(|((), profile)| profile)
    }

    /// Moves `identity` onto `tier`, clamping remaining values.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] if the store fails.
    #[instrument(skip(self), fields(identity = %identity, tier = %tier))]
    pub async fn set_tier(
        &self,
        identity: Identity,
        tier: Tier,
    ) -> Result<QuotaProfile, AdmissionError> {
        let limits = self.inner.tiers.limits(tier);
        let ((), profile) = self
            .inner
            .update(identity, |p| {
                p.rebase(tier, limits);
                Ok(())
            })
            .await?;
        info!("tier updated");
        Ok(profile)
    }

    /// Restores every profile's slots; call once at process start.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] if the store fails.
    #[instrument(skip(self))]
    pub async fn reset_concurrent_slots(&self) -> Result<u64, AdmissionError> {
        let _guard = self.inner.quota_lock.lock().await;
        let restored = self.inner.store.reset_concurrent_slots().await?;
        info!(restored, "concurrency slots reset");
        Ok(restored)
    }
}

/// Holds the in-progress flag between [`AdmissionController::enter`] and
/// [`AdmissionTicket::admit`]. Dropping it clears the flag.
#[derive(Debug)]
pub struct AdmissionTicket {
    inner: Arc<Inner>,
    identity: Identity,
    armed: bool,
}

impl AdmissionTicket {
    /// Identity this ticket belongs to.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Phase two: checks the selection and takes a concurrency slot.
    ///
    /// On rejection the ticket is consumed and the flag cleared.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::ConcurrencySlotsExhausted`],
    /// [`AdmissionError::DailyQuotaExhausted`] or
    /// [`AdmissionError::FileTooLarge`], in that order of precedence.
    #[instrument(skip(self, selection), fields(identity = %self.identity, selector = %selection.selector, bytes = selection.total_bytes))]
    pub async fn admit(mut self, selection: &Selection) -> Result<Admission, AdmissionError> {
        let bytes = selection.total_bytes;
        let ((), profile) = self
            .inner
            .update(self.identity, |p| {
                check_capacity(p)?;
                if bytes > p.max_file_bytes {
                    return Err(AdmissionError::FileTooLarge {
                        bytes,
                        limit: p.max_file_bytes,
                    });
                }
                p.take_slot();
                Ok(())
            })
            .await?;

        debug!(
            slots_remaining = profile.concurrent_slots_remaining,
            "admitted"
        );
        self.armed = false;
        Ok(Admission {
            inner: Arc::clone(&self.inner),
            identity: self.identity,
            settled: false,
        })
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        if self.armed {
            self.inner.release_flag(self.identity);
        }
    }
}

/// An admitted task's hold on a concurrency slot and the in-progress flag.
#[derive(Debug)]
#[must_use = "call finish() when the task ends"]
pub struct Admission {
    inner: Arc<Inner>,
    identity: Identity,
    settled: bool,
}

impl Admission {
    /// Identity this admission belongs to.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Ends the task: returns the slot, and debits one unit of daily quota
    /// when `succeeded`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Store`] if the store fails; the slot is then
    /// returned in the background when the admission drops.
    #[instrument(skip(self), fields(identity = %self.identity))]
    pub async fn finish(mut self, succeeded: bool) -> Result<QuotaProfile, AdmissionError> {
        let ((), profile) = self
            .inner
            .update(self.identity, |p| {
                p.restore_slot();
                if succeeded {
                    p.debit_daily();
                }
                Ok(())
            })
            .await?;
        self.settled = true;

        debug!(
            succeeded,
            slots_remaining = profile.concurrent_slots_remaining,
            daily_remaining = profile.daily_quota_remaining,
            "admission finished"
        );
        Ok(profile)
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.inner.release_flag(self.identity);
        if self.settled {
            return;
        }

        let identity = self.identity;
        let inner = Arc::clone(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(identity = %identity, "admission dropped without finish; returning slot");
                handle.spawn(async move {
                    let restored = inner
                        .update(identity, |p| {
                            p.restore_slot();
                            Ok(())
                        })
                        .await;
                    if let Err(error) = restored {
                        warn!(identity = %identity, error = %error, "failed to return slot");
                    }
                });
            }
            Err(_) => {
                warn!(identity = %identity, "no runtime to return slot; it is restored at next start");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::db::Database;
    use crate::manifest::FileSelector;
    use crate::quota::{BASIC_LIMITS, FixedClock};
    use crate::store::{Store, StoreErrorKind};

    /// Quota store whose next `failures` writes fail with `kind`.
    struct FailingWrites {
        store: Store,
        kind: StoreErrorKind,
        failures: std::sync::atomic::AtomicU32,
        writes: std::sync::atomic::AtomicU32,
    }

    impl FailingWrites {
        fn new(store: Store, kind: StoreErrorKind, failures: u32) -> Self {
            Self {
                store,
                kind,
                failures: failures.into(),
                writes: 0.into(),
            }
        }
    }

    #[async_trait::async_trait]
    impl QuotaStore for FailingWrites {
        async fn load_profile(&self, identity: Identity) -> Result<Option<QuotaProfile>, StoreError> {
            self.store.load_profile(identity).await
        }

        async fn save_profile(&self, profile: &QuotaProfile) -> Result<(), StoreError> {
            use std::sync::atomic::Ordering;
            self.writes.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StoreError::Database {
                    kind: self.kind,
                    message: "database is locked".to_string(),
                });
            }
            self.store.save_profile(profile).await
        }

        async fn reset_concurrent_slots(&self) -> Result<u64, StoreError> {
            self.store.reset_concurrent_slots().await
        }
    }

    fn controller_over(store: Arc<FailingWrites>) -> AdmissionController {
        AdmissionController::new(
            store,
            TierTable::default(),
            Arc::new(FixedClock::new(day(1))),
        )
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    async fn controller() -> (AdmissionController, Store, Arc<FixedClock>) {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let clock = Arc::new(FixedClock::new(day(1)));
        let controller = AdmissionController::new(
            Arc::new(store.clone()),
            TierTable::default(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (controller, store, clock)
    }

    fn selection(bytes: u64) -> Selection {
        Selection {
            selector: FileSelector::Index(0),
            indices: vec![0],
            total_bytes: bytes,
            label: "file".to_string(),
        }
    }

    #[tokio::test]
    async fn test_profile_created_lazily_with_basic_tier() {
        let (controller, store, _) = controller().await;
        let profile = controller.profile(Identity(9)).await.unwrap();
        assert_eq!(profile.tier, Tier::Basic);
        assert_eq!(profile.concurrent_slots_total, BASIC_LIMITS.concurrent_slots);
        assert!(store.load_profile(Identity(9)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_enter_is_already_in_progress() {
        let (controller, _, _) = controller().await;
        let _ticket = controller.enter(Identity(1)).await.unwrap();
        let err = controller.enter(Identity(1)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::AlreadyInProgress { .. }));
    }

    #[tokio::test]
    async fn test_dropped_ticket_clears_flag() {
        let (controller, _, _) = controller().await;
        drop(controller.enter(Identity(1)).await.unwrap());
        assert!(!controller.is_in_progress(Identity(1)));
        assert!(controller.enter(Identity(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_busy_profile_write_is_retried() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let failing = Arc::new(FailingWrites::new(
            store.clone(),
            StoreErrorKind::BusyOrLocked,
            SAVE_ATTEMPTS - 1,
        ));
        let controller = controller_over(Arc::clone(&failing));

        let profile = controller.profile(Identity(6)).await.unwrap();

        assert_eq!(profile.tier, Tier::Basic);
        assert_eq!(
            failing.writes.load(std::sync::atomic::Ordering::SeqCst),
            SAVE_ATTEMPTS
        );
        assert!(store.load_profile(Identity(6)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_persistently_busy_write_surfaces_after_bounded_attempts() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let failing = Arc::new(FailingWrites::new(
            store,
            StoreErrorKind::BusyOrLocked,
            u32::MAX,
        ));
        let controller = controller_over(Arc::clone(&failing));

        let err = controller.profile(Identity(6)).await.unwrap_err();

        assert!(matches!(err, AdmissionError::Store(ref e) if e.is_busy_or_locked()));
        assert_eq!(
            failing.writes.load(std::sync::atomic::Ordering::SeqCst),
            SAVE_ATTEMPTS
        );
    }

    #[tokio::test]
    async fn test_other_write_failures_are_not_retried() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let failing = Arc::new(FailingWrites::new(store, StoreErrorKind::Io, 1));
        let controller = controller_over(Arc::clone(&failing));

        assert!(controller.profile(Identity(6)).await.is_err());
        assert_eq!(failing.writes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flag_only_entry_ignores_exhausted_quota() {
        let (controller, store, _) = controller().await;
        let mut profile = controller.profile(Identity(4)).await.unwrap();
        profile.daily_quota_remaining = 0;
        profile.concurrent_slots_remaining = 0;
        store.save_profile(&profile).await.unwrap();

        let ticket = controller.enter_flag_only(Identity(4)).unwrap();
        assert!(controller.is_in_progress(Identity(4)));
        assert!(matches!(
            controller.enter_flag_only(Identity(4)),
            Err(AdmissionError::AlreadyInProgress { .. })
        ));

        drop(ticket);
        assert!(!controller.is_in_progress(Identity(4)));
        let unchanged = controller.profile(Identity(4)).await.unwrap();
        assert_eq!(unchanged.daily_quota_remaining, 0);
        assert_eq!(unchanged.concurrent_slots_remaining, 0);
    }

    #[tokio::test]
    async fn test_admit_takes_slot_and_finish_restores_it() {
        let (controller, _, _) = controller().await;
        let admission = controller
            .try_admit(Identity(1), &selection(10))
            .await
            .unwrap();
        let during = controller.profile(Identity(1)).await.unwrap();
        assert_eq!(during.concurrent_slots_remaining, 0);

        let after = admission.finish(false).await.unwrap();
        assert_eq!(after.concurrent_slots_remaining, 1);
        assert_eq!(after.daily_quota_remaining, 10, "failure must not debit");
        assert!(!controller.is_in_progress(Identity(1)));
    }

    #[tokio::test]
    async fn test_finish_success_debits_daily_quota() {
        let (controller, _, _) = controller().await;
        let admission = controller
            .try_admit(Identity(1), &selection(10))
            .await
            .unwrap();
        let after = admission.finish(true).await.unwrap();
        assert_eq!(after.daily_quota_remaining, 9);
    }

    #[tokio::test]
    async fn test_slots_exhausted_when_remaining_zero() {
        let (controller, store, _) = controller().await;
        let mut profile = controller.profile(Identity(2)).await.unwrap();
        profile.concurrent_slots_remaining = 0;
        store.save_profile(&profile).await.unwrap();

        let err = controller.enter(Identity(2)).await.unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::ConcurrencySlotsExhausted { total: 1 }
        ));
        assert!(!controller.is_in_progress(Identity(2)));
    }

    #[tokio::test]
    async fn test_daily_quota_exhausted_then_reset_next_day() {
        let (controller, store, clock) = controller().await;
        let mut profile = controller.profile(Identity(3)).await.unwrap();
        profile.daily_quota_remaining = 0;
        store.save_profile(&profile).await.unwrap();

        let err = controller.enter(Identity(3)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::DailyQuotaExhausted { .. }));

        clock.set(day(2));
        let ticket = controller.enter(Identity(3)).await.unwrap();
        drop(ticket);
        let refreshed = controller.profile(Identity(3)).await.unwrap();
        assert_eq!(refreshed.daily_quota_remaining, 10);
        assert_eq!(refreshed.daily_quota_reset_date, day(2));
    }

    #[tokio::test]
    async fn test_daily_reset_is_idempotent_on_same_day() {
        let (controller, store, clock) = controller().await;
        controller.profile(Identity(4)).await.unwrap();
        clock.set(day(5));

        let first = controller.profile(Identity(4)).await.unwrap();
        let mut used = first.clone();
        used.daily_quota_remaining = 6;
        store.save_profile(&used).await.unwrap();

        let second = controller.profile(Identity(4)).await.unwrap();
        assert_eq!(second.daily_quota_remaining, 6);
    }

    #[tokio::test]
    async fn test_file_too_large_leaves_slot_untouched() {
        let (controller, _, _) = controller().await;
        let err = controller
            .try_admit(Identity(5), &selection(BASIC_LIMITS.max_file_bytes + 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::FileTooLarge { .. }));

        let profile = controller.profile(Identity(5)).await.unwrap();
        assert_eq!(profile.concurrent_slots_remaining, 1);
        assert!(!controller.is_in_progress(Identity(5)));
    }

    #[tokio::test]
    async fn test_in_progress_outranks_quota_errors() {
        let (controller, store, _) = controller().await;
        let _ticket = controller.enter(Identity(6)).await.unwrap();
        let mut profile = controller.profile(Identity(6)).await.unwrap();
        profile.daily_quota_remaining = 0;
        store.save_profile(&profile).await.unwrap();

        let err = controller.enter(Identity(6)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::AlreadyInProgress { .. }));
    }

    #[tokio::test]
    async fn test_dropped_admission_returns_slot_in_background() {
        let (controller, _, _) = controller().await;
        let admission = controller
            .try_admit(Identity(7), &selection(1))
            .await
            .unwrap();
        drop(admission);
        assert!(!controller.is_in_progress(Identity(7)));

        for _ in 0..50 {
            let profile = controller.profile(Identity(7)).await.unwrap();
            if profile.concurrent_slots_remaining == 1 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("slot was never returned");
    }

    #[test]
    fn test_admission_dropped_outside_runtime_still_clears_flag() {
        let (controller, admission) = tokio_test::block_on(async {
            let (controller, _, _) = controller().await;
            let admission = controller
                .try_admit(Identity(11), &selection(1))
                .await
                .unwrap();
            (controller, admission)
        });

        drop(admission);
        assert!(!controller.is_in_progress(Identity(11)));
    }

    #[tokio::test]
    async fn test_slots_stay_within_bounds_across_admit_release_cycles() {
        let (controller, _, _) = controller().await;
        controller
            .set_tier(Identity(8), Tier::Premium)
            .await
            .unwrap();
        for round in 0..6 {
            let admission = controller
                .try_admit(Identity(8), &selection(1))
                .await
                .unwrap();
            let profile = admission.finish(round % 2 == 0).await.unwrap();
            assert!(profile.concurrent_slots_remaining <= profile.concurrent_slots_total);
            assert_eq!(profile.concurrent_slots_remaining, 3);
        }
    }

    #[tokio::test]
    async fn test_reset_concurrent_slots_after_crash() {
        let (controller, _, _) = controller().await;
        let admission = controller
            .try_admit(Identity(10), &selection(1))
            .await
            .unwrap();
        // Simulate a crash: neither finish nor drop runs.
        std::mem::forget(admission);

        let fresh = AdmissionController::new(
            Arc::clone(&controller.inner.store),
            TierTable::default(),
            Arc::new(FixedClock::new(day(1))),
        );
        assert_eq!(fresh.reset_concurrent_slots().await.unwrap(), 1);
        let profile = fresh.profile(Identity(10)).await.unwrap();
        assert_eq!(profile.concurrent_slots_remaining, 1);
    }
}
