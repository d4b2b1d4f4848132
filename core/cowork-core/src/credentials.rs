//! Credential broker.
//!
//! One canonical credential bundle lives in `~/.cowork/auth/` and is mounted
//! into every session environment. The broker finds an existing bundle,
//! judges it, copies it into the canonical directory, or runs a login inside a
//! throwaway environment when nothing usable exists.
//!
//! ```text
//! Absent -> Discovered -> (Valid | Stale) -> Centralized
//!    \                 \-> Invalid -> bootstrap -> Centralized
//!     \-> bootstrap -> Centralized
//! ```

use crate::devcontainer::{login_spec, spec_path, write_spec, AUTH_MOUNT_TARGET};
use crate::error::{CoworkError, Result};
use crate::external::{ContainerRuntime, LOCAL_FOLDER_LABEL};
use crate::project_identity::canonicalize_path;
use crate::prompt::Prompter;
use crate::storage::StorageConfig;
use fs_err as fs;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const CREDENTIALS_FILE: &str = ".credentials.json";

/// Anything smaller cannot hold a usable token set.
pub const MIN_CREDENTIAL_BYTES: u64 = 100;

pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Probed in order, relative to the home directory.
const LEGACY_LOCATIONS: [&str; 3] = [
    ".claude/.credentials.json",
    ".config/claude/.credentials.json",
    ".claude-code/.credentials.json",
];

/// Scanned for any credential-shaped file when no fixed location matches.
const SCAN_DIR: &str = ".claude";
const SCAN_DEPTH: usize = 2;

/// `home/node/.claude/<file>` becomes `<file>` on extraction.
const EXTRACT_STRIP_COMPONENTS: usize = 3;

const LOGIN_COMMAND: [&str; 1] = ["claude"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Valid,
    /// Usable, but older than the freshness window.
    Stale { age_days: u64 },
    Invalid { reason: String },
}

impl Health {
    pub fn is_usable(&self) -> bool {
        !matches!(self, Health::Invalid { .. })
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Valid => write!(f, "valid"),
            Health::Stale { age_days } => write!(f, "stale ({} days old)", age_days),
            Health::Invalid { reason } => write!(f, "invalid ({})", reason),
        }
    }
}

/// What `ensure` had to do to produce a usable bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerAction {
    AlreadyCentral,
    Centralized { from: PathBuf },
    Bootstrapped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialReport {
    pub path: PathBuf,
    pub health: Health,
    pub action: BrokerAction,
}

/// Read-only view of the credential situation, for `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialState {
    Absent,
    Found {
        path: PathBuf,
        health: Health,
        centralized: bool,
    },
}

/// Judges the bundle at `path` against the current time.
pub fn validate(path: &Path) -> Health {
    validate_at(path, SystemTime::now())
}

pub fn validate_at(path: &Path, now: SystemTime) -> Health {
    if path.as_os_str().is_empty() {
        return Health::Invalid {
            reason: "empty path".to_string(),
        };
    }
    let metadata = match fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => {
            return Health::Invalid {
                reason: "not a file".to_string(),
            }
        }
        Err(_) => {
            return Health::Invalid {
                reason: "missing".to_string(),
            }
        }
    };

    if metadata.len() < MIN_CREDENTIAL_BYTES {
        return Health::Invalid {
            reason: format!("{} bytes, expected at least {}", metadata.len(), MIN_CREDENTIAL_BYTES),
        };
    }

    let age = metadata
        .modified()
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .unwrap_or_default();
    if age > FRESHNESS_WINDOW {
        Health::Stale {
            age_days: age.as_secs() / (24 * 60 * 60),
        }
    } else {
        Health::Valid
    }
}

pub struct CredentialBroker<'a> {
    storage: &'a StorageConfig,
    runtime: &'a dyn ContainerRuntime,
    prompter: &'a dyn Prompter,
}

impl<'a> CredentialBroker<'a> {
    pub fn new(
        storage: &'a StorageConfig,
        runtime: &'a dyn ContainerRuntime,
        prompter: &'a dyn Prompter,
    ) -> Self {
        Self {
            storage,
            runtime,
            prompter,
        }
    }

    pub fn canonical_path(&self) -> PathBuf {
        self.storage.auth_dir().join(CREDENTIALS_FILE)
    }

    /// First existing bundle, canonical location first.
    pub fn discover(&self) -> Option<PathBuf> {
        let home = self.storage.home();
        let fixed = std::iter::once(self.canonical_path())
            .chain(LEGACY_LOCATIONS.iter().map(|rel| home.join(rel)));
        for candidate in fixed {
            if candidate.is_file() {
                debug!(path = %candidate.display(), "Discovered credentials");
                return Some(candidate);
            }
        }

        WalkDir::new(home.join(SCAN_DIR))
            .max_depth(SCAN_DEPTH)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .find(|entry| {
                let name = entry.file_name().to_string_lossy();
                name.contains("credentials") && name.ends_with(".json")
            })
            .map(|entry| entry.into_path())
    }

    pub fn state(&self) -> CredentialState {
        match self.discover() {
            None => CredentialState::Absent,
            Some(path) => CredentialState::Found {
                health: validate(&path),
                centralized: path == self.canonical_path(),
                path,
            },
        }
    }

    /// True when `ensure` would have to run a login.
    pub fn needs_bootstrap(&self) -> bool {
        self.discover()
            .map_or(true, |found| !validate(&found).is_usable())
    }

    /// Produces a usable canonical bundle, bootstrapping when nothing usable
    /// is found. Blocks for the whole interactive login if one is needed.
    pub fn ensure(&self) -> Result<CredentialReport> {
        if let Some(found) = self.discover() {
            let health = validate(&found);
            if let Health::Stale { age_days } = health {
                warn!(path = %found.display(), age_days, "Credentials are stale, log in again soon");
            }
            if health.is_usable() {
                let canonical = self.canonical_path();
                if found == canonical {
                    return Ok(CredentialReport {
                        path: found,
                        health,
                        action: BrokerAction::AlreadyCentral,
                    });
                }
                let path = self.centralize(&found)?;
                return Ok(CredentialReport {
                    path,
                    health,
                    action: BrokerAction::Centralized { from: found },
                });
            }
            warn!(path = %found.display(), %health, "Discovered credentials are unusable");
        }

        let path = self.bootstrap()?;
        Ok(CredentialReport {
            health: validate(&path),
            path,
            action: BrokerAction::Bootstrapped,
        })
    }

    /// Copies `source` into the canonical directory with owner-only
    /// permissions. The source is left in place.
    pub fn centralize(&self, source: &Path) -> Result<PathBuf> {
        let auth_dir = self.storage.auth_dir();
        let destination = self.canonical_path();
        if source == destination {
            return Ok(destination);
        }
        self.prepare_auth_dir()?;

        let content =
            fs::read(source).map_err(|e| CoworkError::io("reading discovered credentials", e))?;
        let modified = fs::metadata(source).and_then(|m| m.modified()).ok();

        let write = || -> std::io::Result<()> {
            let mut temp = NamedTempFile::new_in(&auth_dir)?;
            temp.write_all(&content)?;
            temp.flush()?;
            // Keep the age of the original so staleness survives the copy.
            if let Some(modified) = modified {
                temp.as_file().set_modified(modified)?;
            }
            restrict(temp.path(), 0o600)?;
            temp.persist(&destination).map_err(|e| e.error)?;
            Ok(())
        };
        write().map_err(|e| CoworkError::io(format!("installing {}", destination.display()), e))?;

        info!(from = %source.display(), to = %destination.display(), "Centralized credentials");
        Ok(destination)
    }

    /// Runs an interactive login inside an ephemeral environment and installs
    /// the resulting files into the canonical directory. The environment is
    /// torn down on every exit path.
    pub fn bootstrap(&self) -> Result<PathBuf> {
        info!("Bootstrapping credentials in an ephemeral environment");
        let workspace = tempfile::Builder::new()
            .prefix("cowork-auth-")
            .tempdir()
            .map_err(|e| CoworkError::io("creating login workspace", e))?;
        write_spec(&spec_path(workspace.path()), &login_spec())?;

        let environment = EphemeralEnvironment {
            runtime: self.runtime,
            dir: canonicalize_path(workspace.path()),
        };
        let result = self.login_and_install(&environment.dir);
        drop(environment);
        result
    }

    fn login_and_install(&self, dir: &Path) -> Result<PathBuf> {
        self.runtime.up(dir).map_err(|e| match e {
            missing @ CoworkError::MissingExternalTool { .. } => missing,
            other => CoworkError::CredentialBootstrapFailed(format!(
                "login environment did not start: {}",
                other
            )),
        })?;

        self.prompter.say(
            "Log in when the assistant starts, then type /exit to return here.",
        );
        let status = self.runtime.exec_interactive(dir, &LOGIN_COMMAND)?;
        if status != 0 {
            warn!(status, "Login session exited with a non-zero status");
        }

        fs::create_dir_all(self.storage.root())
            .map_err(|e| CoworkError::io("creating cowork root", e))?;
        let staging = tempfile::Builder::new()
            .prefix(".auth-staging-")
            .tempdir_in(self.storage.root())
            .map_err(|e| CoworkError::io("creating staging directory", e))?;

        self.runtime
            .extract(dir, AUTH_MOUNT_TARGET, staging.path(), EXTRACT_STRIP_COMPONENTS)
            .map_err(|e| {
                CoworkError::CredentialBootstrapFailed(format!("could not copy credentials out: {}", e))
            })?;

        if let Health::Invalid { reason } = validate(&staging.path().join(CREDENTIALS_FILE)) {
            return Err(CoworkError::CredentialBootstrapFailed(format!(
                "login did not produce credentials: {}",
                reason
            )));
        }

        self.install_staged(staging.path())?;
        let installed = self.canonical_path();
        info!(path = %installed.display(), "Credentials installed");
        Ok(installed)
    }

    /// Moves every staged file into the canonical directory, keeping the
    /// relative layout, each file tightened before it becomes visible.
    fn install_staged(&self, staging: &Path) -> Result<()> {
        self.prepare_auth_dir()?;
        let auth_dir = self.storage.auth_dir();

        for entry in WalkDir::new(staging).min_depth(1).into_iter().filter_map(|e| e.ok()) {
            let Ok(relative) = entry.path().strip_prefix(staging) else {
                continue;
            };
            let destination = auth_dir.join(relative);
            let moved = if entry.file_type().is_dir() {
                fs::create_dir_all(&destination).and_then(|_| restrict(&destination, 0o700))
            } else if entry.file_type().is_file() {
                restrict(entry.path(), 0o600).and_then(|_| fs::rename(entry.path(), &destination))
            } else {
                continue;
            };
            moved.map_err(|e| CoworkError::io(format!("installing {}", destination.display()), e))?;
        }
        Ok(())
    }

    fn prepare_auth_dir(&self) -> Result<()> {
        let auth_dir = self.storage.auth_dir();
        fs::create_dir_all(&auth_dir)
            .and_then(|_| restrict(&auth_dir, 0o700))
            .map_err(|e| CoworkError::io(format!("creating {}", auth_dir.display()), e))
    }
}

/// Removes the login environment when dropped, whether or not its container
/// is still running.
struct EphemeralEnvironment<'a> {
    runtime: &'a dyn ContainerRuntime,
    dir: PathBuf,
}

impl Drop for EphemeralEnvironment<'_> {
    fn drop(&mut self) {
        let containers = match self.runtime.list_by_label(LOCAL_FOLDER_LABEL) {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "Could not list containers for login environment teardown");
                return;
            }
        };
        for container in containers.iter().filter(|c| c.local_folder == self.dir) {
            match self.runtime.remove(&container.id) {
                Ok(()) => debug!(container = %container.id, "Removed login environment"),
                Err(e) => warn!(container = %container.id, error = %e, "Failed to remove login environment"),
            }
        }
    }
}

#[cfg(unix)]
fn restrict(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
