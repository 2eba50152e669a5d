//! Task service commands: `taskboard serve`, `taskboard init`.

use anyhow::{Context, Result};

use taskboard::config::TaskboardConfig;

pub async fn cmd_serve(config: &TaskboardConfig) -> Result<()> {
    config.ensure_valid()?;
    taskboard::service::start_server(&config.server).await
}

pub fn cmd_init(config: &TaskboardConfig) -> Result<()> {
    let db_path = &config.server.db_path;
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    taskboard::service::TaskDb::new(db_path)?;
    println!("Task database initialized at {}", db_path.display());
    Ok(())
}
