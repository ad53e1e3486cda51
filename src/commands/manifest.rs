//! Manifest command handlers: print cached manifests.

use anyhow::{Context, Result, bail};
use magnet_relay::report::format_bytes;
use magnet_relay::{ResourceId, Settings, extract_locator};

use super::open_store;

fn parse_target(target: &str) -> Result<ResourceId> {
    if let Ok(resource_id) = ResourceId::parse(target) {
        return Ok(resource_id);
    }
    let locator = extract_locator(target)
        .with_context(|| format!("'{target}' is neither a resource id nor a magnet link"))?;
    Ok(locator.resource_id().clone())
}

pub async fn run_manifest_show_command(settings: &Settings, target: &str, json: bool) -> Result<()> {
    let resource_id = parse_target(target)?;
    let store = open_store(settings).await?;
    let Some(manifest) = store.get_manifest(&resource_id).await? else {
        bail!("No cached manifest for {resource_id}");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    println!("resource_id = {}", manifest.resource_id);
    println!("display_name = {}", manifest.display_name);
    println!("total = {}", format_bytes(manifest.total_bytes));
    println!("container = {}", manifest.is_container);
    for file in &manifest.files {
        println!("{}. {} ({})", file.index + 1, file.path, format_bytes(file.bytes));
    }
    Ok(())
}
