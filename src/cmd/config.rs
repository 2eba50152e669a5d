//! Configuration view and setup commands: `taskboard config`.

use anyhow::Result;
use std::path::Path;

use super::super::ConfigCommands;
use taskboard::config::{CONFIG_FILE, TaskboardConfig};

pub fn cmd_config(
    config: &TaskboardConfig,
    path: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = path.unwrap_or_else(|| Path::new(CONFIG_FILE));

    match command {
        None | Some(ConfigCommands::Show) => {
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No {} found; showing defaults", config_path.display());
            }
            println!("# Effective values (with env/CLI overrides)");
            println!();
            print!("{}", config.to_toml()?);

            let problems = config.validate();
            if !problems.is_empty() {
                println!();
                println!("# Problems:");
                for problem in problems {
                    println!("#   - {}", problem);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            TaskboardConfig::init_file(config_path)?;
            println!("Created {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, db_path, dev_mode");
            println!("  - [client] server_url, search_debounce_ms, [client.reconnect]");
            println!("  - [logging] level, format");
        }
    }

    Ok(())
}
