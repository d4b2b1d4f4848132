//! Session registry.
//!
//! A session is a full clone of the project's origin in
//! `~/.cowork/sessions/{slug}-{name}`, on a branch named after the session.
//! Membership lives in the project config's session list; status is derived
//! from the runtime on every call and never stored.

use crate::config::Config;
use crate::devcontainer::{self, Readiness};
use crate::error::{CoworkError, Result};
use crate::external::{BranchOutcome, ContainerRuntime, Vcs, LOCAL_FOLDER_LABEL};
use crate::patterns::RE_SESSION_NAME;
use crate::project_identity::{canonicalize_path, ProjectIdentity};
use crate::prompt::Prompter;
use crate::storage::StorageConfig;
use fs_err as fs;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Registered, but the directory is gone.
    Missing,
    Stopped,
    Running,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Missing => "missing",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Running => "running",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub name: String,
    pub project_slug: String,
    pub dir: PathBuf,
    /// Checked-out branch, when the directory exists and git can tell.
    pub branch: Option<String>,
    pub status: SessionStatus,
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created {
        branch: BranchOutcome,
        readiness: Readiness,
    },
    /// The directory already existed; nothing was cloned.
    AlreadyExists,
}

/// Result of `remove_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removal {
    pub stopped: Vec<String>,
    pub removed: Vec<PathBuf>,
}

/// Rejects names that cannot double as a directory suffix, a git branch and a
/// multiplexer session name.
pub fn validate_session_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(CoworkError::InvalidSessionName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };
    if !RE_SESSION_NAME.is_match(name) {
        return invalid("must start with a letter or digit and use only letters, digits, '.', '_' or '-'");
    }
    if name.contains("..") {
        return invalid("must not contain '..'");
    }
    if name.ends_with(".lock") || name.ends_with('.') {
        return invalid("must not end with '.lock' or '.'");
    }
    Ok(())
}

pub struct SessionRegistry<'a> {
    storage: &'a StorageConfig,
    vcs: &'a dyn Vcs,
    runtime: &'a dyn ContainerRuntime,
}

impl<'a> SessionRegistry<'a> {
    pub fn new(
        storage: &'a StorageConfig,
        vcs: &'a dyn Vcs,
        runtime: &'a dyn ContainerRuntime,
    ) -> Self {
        Self {
            storage,
            vcs,
            runtime,
        }
    }

    pub fn session_dir(&self, identity: &ProjectIdentity, name: &str) -> PathBuf {
        self.storage.session_dir(&identity.slug, name)
    }

    /// Clones, branches, reconciles and registers `name`. An existing
    /// directory is skipped with a warning and only (re)registered. The
    /// returned config has been persisted.
    pub fn create_session(
        &self,
        identity: &ProjectIdentity,
        config: Config,
        name: &str,
        prompter: &dyn Prompter,
    ) -> Result<(Config, CreateOutcome)> {
        validate_session_name(name)?;
        let dir = self.session_dir(identity, name);

        if dir.exists() {
            warn!(session = %name, path = %dir.display(), "Session already exists, skipping");
            let config = config.with_session(name);
            config.persist()?;
            return Ok((config, CreateOutcome::AlreadyExists));
        }

        self.storage
            .ensure_dirs()
            .map_err(|e| CoworkError::io("creating sessions directory", e))?;

        info!(session = %name, path = %dir.display(), "Cloning session");
        self.vcs.clone_repo(&identity.origin_url, &dir)?;
        let branch = self.vcs.create_or_checkout_branch(&dir, name)?;
        let readiness = devcontainer::reconcile(&dir, prompter)?;
        if readiness == Readiness::WithoutCredentials {
            warn!(session = %name, "Session environment will start without shared credentials");
        }

        let config = config.with_session(name);
        config.persist()?;
        info!(session = %name, ?branch, "Session created");
        Ok((config, CreateOutcome::Created { branch, readiness }))
    }

    /// Every registered session, in list order, with status from a single
    /// runtime query.
    pub fn list_sessions(&self, identity: &ProjectIdentity, config: &Config) -> Result<Vec<Session>> {
        let running: HashMap<PathBuf, String> = self
            .runtime
            .list_running_by_label(LOCAL_FOLDER_LABEL)?
            .into_iter()
            .map(|c| (canonicalize_path(&c.local_folder), c.id))
            .collect();

        Ok(config
            .sessions()
            .iter()
            .map(|name| {
                let dir = self.session_dir(identity, name);
                let (status, container_id, branch) = if !dir.is_dir() {
                    (SessionStatus::Missing, None, None)
                } else {
                    let branch = self.vcs.current_branch(&dir).ok().flatten();
                    match running.get(&canonicalize_path(&dir)) {
                        Some(id) => (SessionStatus::Running, Some(id.clone()), branch),
                        None => (SessionStatus::Stopped, None, branch),
                    }
                };
                Session {
                    name: name.clone(),
                    project_slug: identity.slug.clone(),
                    dir,
                    branch,
                    status,
                    container_id,
                }
            })
            .collect())
    }

    /// Directory of the session called `name`, which must exist.
    pub fn require_session_dir(
        &self,
        identity: &ProjectIdentity,
        config: &Config,
        name: &str,
    ) -> Result<PathBuf> {
        validate_session_name(name)?;
        let dir = self.session_dir(identity, name);
        if !dir.is_dir() {
            return Err(CoworkError::SessionNotFound(name.to_string()));
        }
        if !config.sessions().iter().any(|s| s == name) {
            warn!(session = %name, "Session directory exists but is not registered");
        }
        Ok(dir)
    }

    /// Stops every running session environment of the project. Returns the
    /// names of the sessions that were stopped.
    pub fn stop_running(&self, identity: &ProjectIdentity, config: &Config) -> Result<Vec<String>> {
        let mut stopped = Vec::new();
        for session in self.list_sessions(identity, config)? {
            if let Some(id) = &session.container_id {
                self.runtime.stop(id)?;
                info!(session = %session.name, container = %id, "Stopped session");
                stopped.push(session.name);
            }
        }
        Ok(stopped)
    }

    /// Stops running environments, deletes every session directory, clears
    /// and persists the list. Directories go only after their environments
    /// have stopped. Nothing outside the sessions directory is ever deleted.
    pub fn remove_all(&self, identity: &ProjectIdentity, config: Config) -> Result<(Config, Removal)> {
        let stopped = self.stop_running(identity, &config)?;

        let sessions_dir = self.storage.sessions_dir();
        let mut removed = Vec::new();
        for name in config.sessions() {
            let dir = self.session_dir(identity, name);
            if validate_session_name(name).is_err() || dir.parent() != Some(sessions_dir.as_path()) {
                warn!(session = %name, path = %dir.display(), "Refusing to remove path outside the sessions directory");
                continue;
            }
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .map_err(|e| CoworkError::io(format!("removing {}", dir.display()), e))?;
                info!(session = %name, path = %dir.display(), "Removed session directory");
                removed.push(dir);
            }
        }

        let config = config.without_sessions();
        config.persist()?;
        Ok((config, Removal { stopped, removed }))
    }
}
