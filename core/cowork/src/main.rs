//! cowork: isolated, resumable development sessions.
//!
//! Each session is a full clone of the current project on its own branch,
//! with its own devcontainer, reachable through a persistent terminal
//! multiplexer session.
//!
//! ## Subcommands
//!
//! - `auth`: Find or create the shared credential bundle
//! - `init`: Create sessions
//! - `list` / `status`: Inspect sessions
//! - `connect`: Start a session and attach to it
//! - `stop` / `clean`: Stop or remove all sessions of the project

mod logging;
mod output;

use clap::{Args, Parser, Subcommand};
use cowork_core::{Cowork, CoworkError, Multiplexer, StorageConfig};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "cowork")]
#[command(about = "Isolated, resumable development sessions in full clones and devcontainers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find, validate and share credentials, logging in if none are usable
    Auth,

    /// Create sessions for the current project
    Init {
        /// Session names, created in order
        #[arg(value_name = "NAME", required = true)]
        names: Vec<String>,
    },

    /// List the current project's sessions
    List,

    /// Start a session's environment and attach to it
    Connect {
        #[arg(value_name = "NAME")]
        name: String,

        #[command(flatten)]
        multiplexer: MultiplexerArgs,
    },

    /// Show project, credential and session status
    Status,

    /// Stop all running environments of the current project
    Stop,

    /// Stop and delete all sessions of the current project
    Clean,
}

#[derive(Args)]
#[group(multiple = false)]
struct MultiplexerArgs {
    /// Use tmux for this connection
    #[arg(long)]
    tmux: bool,

    /// Use zellij for this connection
    #[arg(long)]
    zellij: bool,

    /// Open a plain shell
    #[arg(long)]
    none: bool,
}

impl MultiplexerArgs {
    fn requested(&self) -> Option<Multiplexer> {
        if self.tmux {
            Some(Multiplexer::Tmux)
        } else if self.zellij {
            Some(Multiplexer::Zellij)
        } else if self.none {
            Some(Multiplexer::None)
        } else {
            None
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let logs_dir = StorageConfig::from_home().ok().map(|s| s.logs_dir());
    let _logging_guard = logging::init(logs_dir.as_deref());

    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!(error = ?e, "cowork failed");
            output::error(&e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<ExitCode, CoworkError> {
    let cwd = std::env::current_dir().map_err(|source| CoworkError::Io {
        context: "reading current directory".to_string(),
        source,
    })?;
    let cowork = Cowork::new(cwd)?;

    match command {
        Commands::Auth => output::auth(&cowork.auth()?),
        Commands::Init { names } => {
            let report = cowork.init(&names)?;
            output::init(&report);
            if report.failures() > 0 {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::List => output::list(&cowork.list()?),
        Commands::Connect { name, multiplexer } => {
            let report = cowork.connect(&name, multiplexer.requested())?;
            output::connect(&report);
            return Ok(ExitCode::from(exit_status(report.connection.exit_status)));
        }
        Commands::Status => output::status(&cowork.status()?),
        Commands::Stop => output::stop(&cowork.stop()?),
        Commands::Clean => output::clean(&cowork.clean()?),
    }
    Ok(ExitCode::SUCCESS)
}

/// Passes the attached command's exit status through.
fn exit_status(status: i32) -> u8 {
    u8::try_from(status).unwrap_or(1)
}
