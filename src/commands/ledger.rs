//! Ledger command handlers.

use anyhow::{Context, Result};
use magnet_relay::Settings;
use tracing::info;

use super::open_store;

pub async fn run_ledger_clear_command(settings: &Settings) -> Result<()> {
    let store = open_store(settings).await?;
    let removed = store
        .clear_ledger()
        .await
        .context("Failed to clear publish ledger")?;
    info!(removed, "publish ledger cleared");
    println!("removed = {removed}");
    Ok(())
}
