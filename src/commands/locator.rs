//! Locator command handler: parse and canonicalise a magnet link.

use anyhow::Result;
use magnet_relay::extract_locator;

pub fn run_locator_command(text: &[String]) -> Result<()> {
    let locator = extract_locator(&text.join(" "))?;
    println!("resource_id = {}", locator.resource_id());
    println!("normalized = {}", locator.normalized());
    if let Some(name) = locator.display_name() {
        println!("display_name = {name}");
    }
    println!("trackers = {}", locator.trackers().len());
    Ok(())
}
