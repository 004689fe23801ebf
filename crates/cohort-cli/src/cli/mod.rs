//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use cohort_core::config::{self, paths};
use cohort_core::core::interrupt;
use cohort_core::logging;

mod commands;

#[derive(Parser)]
#[command(name = "cohort")]
#[command(version)]
#[command(about = "Terminal client for multi-agent chat backends")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Backend base URL (overrides the config file)
    #[arg(long, global = true, env = config::SERVER_URL_ENV, value_name = "URL")]
    server_url: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Sends a message and streams the agents' answer
    Chat {
        /// The message to send
        #[arg(value_name = "MESSAGE")]
        message: String,

        /// Continue a saved session by ID
        #[arg(long, value_name = "ID")]
        session: Option<String>,

        /// Title to save the session under
        #[arg(long)]
        title: Option<String>,

        /// Upload a file and ask about it
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Use the backend's demo stream
        #[arg(long)]
        demo: bool,
    },

    /// Manage saved sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum SessionCommands {
    /// Lists saved sessions, most recent first
    List,
    /// Shows a saved session's transcript
    Show {
        /// The ID of the session to show
        #[arg(value_name = "SESSION_ID")]
        id: String,
    },
    /// Rename a session
    Rename {
        /// The ID of the session to rename
        #[arg(value_name = "SESSION_ID")]
        id: String,
        /// New title for the session
        #[arg(value_name = "TITLE")]
        title: String,
    },
    /// Delete a session
    Delete {
        /// The ID of the session to delete
        #[arg(value_name = "SESSION_ID")]
        id: String,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Generate a fresh config from Rust defaults (for xtask)
    Generate,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    interrupt::init()?;

    // file logging is best effort; the guard flushes on exit
    let _log_guard = match logging::init(&paths::logs_dir()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e:#}");
            None
        }
    };

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "cohort starting");

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    let result = rt.block_on(async move { dispatch(cli).await });
    // a pending stdin prompt must not keep the process alive
    rt.shutdown_background();
    result
}

async fn dispatch(cli: Cli) -> Result<()> {
    let mut config = config::Config::load().context("load config")?;

    let Cli {
        command,
        server_url,
    } = cli;
    if let Some(url) = server_url {
        config.server_url = url;
    }

    match command {
        Commands::Chat {
            message,
            session,
            title,
            file,
            demo,
        } => {
            commands::chat::run(commands::chat::ChatRunOptions {
                message: &message,
                session: session.as_deref(),
                title: title.as_deref(),
                file: file.as_deref(),
                demo,
                config: &config,
            })
            .await
        }

        Commands::Sessions { command } => match command {
            SessionCommands::List => commands::sessions::list(),
            SessionCommands::Show { id } => commands::sessions::show(&id),
            SessionCommands::Rename { id, title } => commands::sessions::rename(&id, &title),
            SessionCommands::Delete { id } => commands::sessions::delete(&id),
        },

        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Generate => commands::config::generate(),
        },
    }
}
