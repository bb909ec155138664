//! `scholarly init`: Write a starter config file.

use std::path::Path;

use scholarly_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_path();

    println!("scholarly — setup");
    println!("=================\n");

    if write_starter(&config_path)? {
        println!("Created config at: {}", config_path.display());
        println!("\nNext steps:");
        println!("  1. Set GOOGLE_API_KEY (or add api_key to the file)");
        println!("  2. Enable and point [mcp_servers.research] at your paper server");
        println!("  3. Run: scholarly chat");
    } else {
        println!("Config already exists at: {}", config_path.display());
        println!("Edit it manually or delete it and re-run init.");
    }

    Ok(())
}

/// Write the starter config unless `path` exists. Returns whether it wrote.
pub(crate) fn write_starter(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(true)
}
