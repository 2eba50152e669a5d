use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskboard::board::StatusFilter;
use taskboard::config::TaskboardConfig;
use taskboard::models::TaskStatus;

mod cmd;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(version, about = "Collaborative Kanban task tracker")]
pub struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to taskboard.toml (defaults to ./taskboard.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Task service URL used by signup and login. Overrides the config file.
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Where the login session is stored (defaults to the user config dir)
    #[arg(long, global = true)]
    pub session_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the task service
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS for a browser front end)
        #[arg(long)]
        dev: bool,
    },
    /// Create the task database without serving
    Init {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Create an account and log in
    Signup {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Read from a prompt when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Log in to an existing account
    Login {
        #[arg(long)]
        email: Option<String>,
        /// Read from a prompt when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Revoke the stored credential and forget it
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Show the board
    Board {
        /// Keep running and redraw on every change
        #[arg(short, long)]
        watch: bool,

        /// Only show one column: all, todo, in-progress, done
        #[arg(short, long, default_value = "all")]
        status: StatusFilter,

        /// Only show tasks whose title or description contains this text
        #[arg(short, long)]
        query: Option<String>,
    },
    /// Show one task
    Show {
        /// Task id or unique id prefix
        id: String,
    },
    /// Create a task
    Add {
        title: String,

        #[arg(short, long)]
        description: Option<String>,

        /// Initial status (defaults to To Do)
        #[arg(short, long)]
        status: Option<TaskStatus>,
    },
    /// Change a task's fields
    Edit {
        /// Task id or unique id prefix
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        /// New description; pass "" to clear it
        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        status: Option<TaskStatus>,
    },
    /// Move a task to another column
    Move {
        /// Task id or unique id prefix
        id: String,

        /// todo, in-progress or done
        status: TaskStatus,
    },
    /// Delete a task
    Delete {
        /// Task id or unique id prefix
        id: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a default taskboard.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = TaskboardConfig::resolve(cli.config.as_deref())?;
    if let Some(server) = &cli.server {
        config.client.server_url = server.clone();
    }

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    taskboard::telemetry::init_tracing(&level, config.logging.format);

    let session_file = cli.session_file.as_deref();

    match cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(db_path) = db_path {
                config.server.db_path = db_path;
            }
            config.server.dev_mode |= dev;
            cmd::cmd_serve(&config).await?;
        }
        Commands::Init { db_path } => {
            if let Some(db_path) = db_path {
                config.server.db_path = db_path;
            }
            cmd::cmd_init(&config)?;
        }
        Commands::Signup {
            name,
            email,
            password,
        } => cmd::cmd_signup(&config, session_file, name, email, password).await?,
        Commands::Login { email, password } => {
            cmd::cmd_login(&config, session_file, email, password).await?
        }
        Commands::Logout => cmd::cmd_logout(session_file).await?,
        Commands::Whoami => cmd::cmd_whoami(session_file).await?,
        Commands::Board {
            watch,
            status,
            query,
        } => cmd::cmd_board(&config, session_file, watch, status, query).await?,
        Commands::Show { id } => cmd::cmd_show(&config, session_file, &id).await?,
        Commands::Add {
            title,
            description,
            status,
        } => cmd::cmd_add(&config, session_file, title, description, status).await?,
        Commands::Edit {
            id,
            title,
            description,
            status,
        } => cmd::cmd_edit(&config, session_file, &id, title, description, status).await?,
        Commands::Move { id, status } => {
            cmd::cmd_move(&config, session_file, &id, status).await?
        }
        Commands::Delete { id, yes } => cmd::cmd_delete(&config, session_file, &id, yes).await?,
        Commands::Config { command } => {
            cmd::cmd_config(&config, cli.config.as_deref(), command)?
        }
    }

    Ok(())
}
