//! Cowork - the entry point for every CLI verb.
//!
//! The engine owns the storage layout and the three collaborators, resolves
//! the project from the working directory, and loads configuration fresh for
//! each operation. It is:
//! - **Synchronous**: external tools are blocking calls with no internal timeout
//! - **Stateless**: configuration is passed into and returned from each step,
//!   never held between operations
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use cowork_core::Cowork;
//!
//! let cowork = Cowork::new(std::env::current_dir()?)?;
//! let report = cowork.init(&["backend".to_string(), "frontend".to_string()])?;
//! let listing = cowork.list()?;
//! ```

use crate::config::{Config, ConfigSource};
use crate::credentials::{CredentialBroker, CredentialReport, CredentialState};
use crate::devcontainer::{self, Readiness};
use crate::error::{CoworkError, Result};
use crate::external::{require_tool, ContainerRuntime, DevcontainerCli, GitCli, Vcs};
use crate::multiplexer::{Connection, Multiplexer, MultiplexerController};
use crate::project_identity::{resolve_identity, ProjectIdentity};
use crate::prompt::{Prompter, TerminalPrompter};
use crate::sessions::{CreateOutcome, Removal, Session, SessionRegistry, SessionStatus};
use crate::storage::StorageConfig;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// The literal answer `clean` requires.
pub const CLEAN_CONFIRMATION: &str = "yes";

const SESSION_TOOLS: [&str; 2] = ["devcontainer", "docker"];

/// Per-name result of `init`.
#[derive(Debug)]
pub struct InitEntry {
    pub name: String,
    pub result: Result<CreateOutcome>,
}

impl InitEntry {
    pub fn error(&self) -> Option<&CoworkError> {
        self.result.as_ref().err()
    }
}

#[derive(Debug)]
pub struct InitReport {
    pub identity: ProjectIdentity,
    pub entries: Vec<InitEntry>,
}

impl InitReport {
    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_err()).count()
    }
}

#[derive(Debug, Clone)]
pub struct SessionListing {
    pub identity: ProjectIdentity,
    pub sessions: Vec<Session>,
}

impl SessionListing {
    pub fn count(&self, status: SessionStatus) -> usize {
        self.sessions.iter().filter(|s| s.status == status).count()
    }
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub listing: SessionListing,
    pub credentials: CredentialState,
    pub auth_dir: PathBuf,
    pub multiplexer: Option<Multiplexer>,
}

#[derive(Debug, Clone)]
pub struct ConnectReport {
    pub session: String,
    pub credentials: CredentialReport,
    pub readiness: Readiness,
    pub connection: Connection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanOutcome {
    NothingToClean,
    Cancelled,
    Cleaned(Removal),
}

pub struct Cowork {
    storage: StorageConfig,
    cwd: PathBuf,
    vcs: Box<dyn Vcs>,
    runtime: Box<dyn ContainerRuntime>,
    prompter: Box<dyn Prompter>,
    check_tools: bool,
}

impl Cowork {
    /// Production wiring: `~/.cowork`, git, the devcontainer CLI and the
    /// terminal.
    pub fn new(cwd: PathBuf) -> Result<Self> {
        Ok(Self {
            storage: StorageConfig::from_home()?,
            cwd,
            vcs: Box::new(GitCli),
            runtime: Box::new(DevcontainerCli),
            prompter: Box::new(TerminalPrompter),
            check_tools: true,
        })
    }

    /// Custom wiring for tests. Skips the PATH checks for external tools.
    pub fn with_collaborators(
        storage: StorageConfig,
        cwd: PathBuf,
        vcs: Box<dyn Vcs>,
        runtime: Box<dyn ContainerRuntime>,
        prompter: Box<dyn Prompter>,
    ) -> Self {
        Self {
            storage,
            cwd,
            vcs,
            runtime,
            prompter,
            check_tools: false,
        }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Shared steps
    // ─────────────────────────────────────────────────────────────────────────────

    fn require_tools(&self, tools: &[&str]) -> Result<()> {
        if self.check_tools {
            for tool in tools {
                require_tool(tool)?;
            }
        }
        Ok(())
    }

    /// Identity of the enclosing repository plus its layered configuration.
    pub fn project(&self) -> Result<(ProjectIdentity, Config)> {
        let identity = resolve_identity(self.vcs.as_ref(), &self.cwd)?;
        let config = Config::load(&[
            ConfigSource::user(self.storage.user_config_file()),
            ConfigSource::project(self.storage.project_config_file(&identity.root)),
        ])?;
        Ok((identity, config))
    }

    fn registry(&self) -> SessionRegistry<'_> {
        SessionRegistry::new(&self.storage, self.vcs.as_ref(), self.runtime.as_ref())
    }

    fn broker(&self) -> CredentialBroker<'_> {
        CredentialBroker::new(&self.storage, self.runtime.as_ref(), self.prompter.as_ref())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Verbs
    // ─────────────────────────────────────────────────────────────────────────────

    /// Makes sure a usable canonical credential bundle exists.
    pub fn auth(&self) -> Result<CredentialReport> {
        let broker = self.broker();
        if broker.needs_bootstrap() {
            self.require_tools(&SESSION_TOOLS)?;
        }
        let report = broker.ensure()?;
        info!(path = %report.path.display(), health = %report.health, "Credentials ready");
        Ok(report)
    }

    /// Creates each named session in order. A failing name does not stop the
    /// ones after it; shared preconditions are checked once up front.
    pub fn init(&self, names: &[String]) -> Result<InitReport> {
        self.require_tools(&["git"])?;
        let (identity, mut config) = self.project()?;
        let registry = self.registry();

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let result = match registry.create_session(
                &identity,
                config.clone(),
                name,
                self.prompter.as_ref(),
            ) {
                Ok((next, outcome)) => {
                    config = next;
                    Ok(outcome)
                }
                Err(e) => {
                    error!(session = %name, error = %e, "Session creation failed");
                    Err(e)
                }
            };
            entries.push(InitEntry {
                name: name.clone(),
                result,
            });
        }
        Ok(InitReport { identity, entries })
    }

    pub fn list(&self) -> Result<SessionListing> {
        let (identity, config) = self.project()?;
        let sessions = self.registry().list_sessions(&identity, &config)?;
        Ok(SessionListing { identity, sessions })
    }

    /// Ensures credentials (bootstrapping if needed, blocking), reconciles the
    /// environment specification, starts the environment and attaches.
    pub fn connect(&self, name: &str, requested: Option<Multiplexer>) -> Result<ConnectReport> {
        self.require_tools(&SESSION_TOOLS)?;
        let (identity, config) = self.project()?;
        let dir = self.registry().require_session_dir(&identity, &config, name)?;

        let credentials = self.broker().ensure()?;
        let readiness = devcontainer::reconcile(&dir, self.prompter.as_ref())?;
        if readiness == Readiness::WithoutCredentials {
            warn!(session = %name, "Connecting without shared credentials");
        }

        info!(session = %name, path = %dir.display(), "Starting session environment");
        self.runtime.up(&dir)?;

        let connection = MultiplexerController::new(self.runtime.as_ref(), &dir).connect(
            requested,
            config.multiplexer(),
            name,
        )?;
        Ok(ConnectReport {
            session: name.to_string(),
            credentials,
            readiness,
            connection,
        })
    }

    pub fn status(&self) -> Result<StatusReport> {
        let (identity, config) = self.project()?;
        let sessions = self.registry().list_sessions(&identity, &config)?;
        Ok(StatusReport {
            listing: SessionListing { identity, sessions },
            credentials: self.broker().state(),
            auth_dir: self.storage.auth_dir(),
            multiplexer: config.multiplexer(),
        })
    }

    /// Stops every running environment of this project. Returns the names of
    /// the sessions that were stopped.
    pub fn stop(&self) -> Result<Vec<String>> {
        self.require_tools(&["docker"])?;
        let (identity, config) = self.project()?;
        self.registry().stop_running(&identity, &config)
    }

    /// Removes every session of this project after the user types the
    /// literal confirmation. Any other answer leaves everything untouched.
    pub fn clean(&self) -> Result<CleanOutcome> {
        let (identity, config) = self.project()?;
        let registry = self.registry();

        let doomed: Vec<PathBuf> = config
            .sessions()
            .iter()
            .map(|name| registry.session_dir(&identity, name))
            .collect();
        if doomed.is_empty() {
            return Ok(CleanOutcome::NothingToClean);
        }

        self.prompter.say("This stops and permanently deletes these session directories:");
        for dir in &doomed {
            self.prompter.say(&format!("  {}", dir.display()));
        }
        let answer = self
            .prompter
            .ask(&format!("Type '{}' to continue: ", CLEAN_CONFIRMATION))?;
        if answer.as_deref().map(str::trim) != Some(CLEAN_CONFIRMATION) {
            info!("Clean cancelled");
            return Ok(CleanOutcome::Cancelled);
        }

        self.require_tools(&["docker"])?;
        let (_, removal) = registry.remove_all(&identity, config)?;
        Ok(CleanOutcome::Cleaned(removal))
    }
}

impl std::fmt::Debug for Cowork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cowork")
            .field("storage", &self.storage)
            .field("cwd", &self.cwd)
            .finish_non_exhaustive()
    }
}
