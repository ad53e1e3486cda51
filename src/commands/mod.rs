//! CLI command handlers.

mod config;
mod ledger;
mod locator;
mod manifest;
mod quota;

use std::sync::Arc;

use anyhow::{Context, Result};
use magnet_relay::quota::SystemClock;
use magnet_relay::{AdmissionController, Database, Settings, Store};
use tracing::debug;

pub use config::run_config_show_command;
pub use ledger::run_ledger_clear_command;
pub use locator::run_locator_command;
pub use manifest::run_manifest_show_command;
pub use quota::{run_quota_set_tier_command, run_quota_show_command, run_slots_reset_command};

/// Opens the configured database, running pending migrations.
pub(crate) async fn open_store(settings: &Settings) -> Result<Store> {
    debug!(path = %settings.database_path.display(), "opening database");
    let db = Database::new_with_options(&settings.database_path, settings.database)
        .await
        .with_context(|| {
            format!(
                "Failed to open database '{}'",
                settings.database_path.display()
            )
        })?;
    Ok(Store::new(db))
}

/// Admission controller over `store` using the configured tiers.
pub(crate) fn admission_controller(store: &Store, settings: &Settings) -> AdmissionController {
    AdmissionController::new(
        Arc::new(store.clone()),
        settings.tiers,
        Arc::new(SystemClock),
    )
}
