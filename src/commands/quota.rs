//! Quota and slot command handlers.

use anyhow::{Context, Result};
use magnet_relay::{Identity, QuotaProfile, Settings, Tier};

use super::{admission_controller, open_store};

fn print_profile(profile: &QuotaProfile, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(profile)?);
        return Ok(());
    }
    println!("identity = {}", profile.identity);
    println!("tier = {}", profile.tier);
    println!(
        "concurrent_slots = {}/{}",
        profile.concurrent_slots_remaining, profile.concurrent_slots_total
    );
    println!(
        "daily_quota = {}/{}",
        profile.daily_quota_remaining, profile.daily_quota_total
    );
    println!("daily_quota_reset_date = {}", profile.daily_quota_reset_date);
    println!("max_file_bytes = {}", profile.max_file_bytes);
    Ok(())
}

pub async fn run_quota_show_command(settings: &Settings, identity: i64, json: bool) -> Result<()> {
    let store = open_store(settings).await?;
    let profile = admission_controller(&store, settings)
        .profile(Identity(identity))
        .await
        .with_context(|| format!("Failed to load quota profile for {identity}"))?;
    print_profile(&profile, json)
}

pub async fn run_quota_set_tier_command(
    settings: &Settings,
    identity: i64,
    tier: Tier,
) -> Result<()> {
    let store = open_store(settings).await?;
    let profile = admission_controller(&store, settings)
        .set_tier(Identity(identity), tier)
        .await
        .with_context(|| format!("Failed to set tier for {identity}"))?;
    print_profile(&profile, false)
}

pub async fn run_slots_reset_command(settings: &Settings) -> Result<()> {
    let store = open_store(settings).await?;
    let restored = admission_controller(&store, settings)
        .reset_concurrent_slots()
        .await
        .context("Failed to reset concurrency slots")?;
    println!("restored = {restored}");
    Ok(())
}
