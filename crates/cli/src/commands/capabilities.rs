//! `scholarly capabilities`: Show what the configured providers contribute.

use scholarly_agent::SessionCoordinator;
use scholarly_config::AppConfig;

const DESCRIPTION_WIDTH: usize = 60;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let coordinator = SessionCoordinator::new(config);
    let status = coordinator.initialize().await;
    if !status.ok {
        return Err(status.message.into());
    }

    println!("Capability providers");
    println!("====================");
    let reports = coordinator.reports().await;
    if reports.is_empty() {
        println!("  (none configured)");
    }
    for report in &reports {
        match &report.error {
            Some(e) => println!("  ✗ {:<20} unavailable: {e}", report.provider),
            None => println!("  ✓ {:<20} {} registered", report.provider, report.registered),
        }
        for name in &report.skipped {
            println!("      skipped duplicate: {name}");
        }
    }

    println!();
    println!("Capabilities");
    println!("============");
    let capabilities = coordinator.capabilities().await;
    if capabilities.is_empty() {
        println!("  (none loaded)");
    }
    for def in &capabilities {
        println!("  {:<24} {}", def.name, truncate(&def.description, DESCRIPTION_WIDTH));
    }

    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.chars().count() <= width {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(width.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
