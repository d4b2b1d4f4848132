//! Storage configuration and path management for cowork.
//!
//! All on-disk locations are decided here:
//!
//! ```text
//! ~/.cowork/
//! ├── .cowork.conf                      # user-level scalars
//! ├── auth/                             # canonical credential bundle
//! ├── logs/                             # CLI log files
//! └── sessions/{slug}-{name}/           # clone + .devcontainer/devcontainer.json
//! <repo>/.cowork/.cowork.conf           # project scalars + session list
//! ```
//!
//! Production code uses `StorageConfig::from_home()`. Tests use
//! `StorageConfig::with_roots(temp_root, temp_home)` for isolation.

use crate::error::{CoworkError, Result};
use fs_err as fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const CONFIG_FILE_NAME: &str = ".cowork.conf";
pub const PROJECT_CONFIG_DIR: &str = ".cowork";

/// Central configuration for all cowork storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for all cowork data (default: ~/.cowork)
    root: PathBuf,
    /// Home directory, probed for legacy credential locations
    home: PathBuf,
}

impl StorageConfig {
    /// Resolves `~/.cowork` from the current user's home directory.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(CoworkError::HomeDirNotFound)?;
        Ok(Self {
            root: home.join(".cowork"),
            home,
        })
    }

    /// Creates a StorageConfig with custom root and home directories.
    pub fn with_roots(root: PathBuf, home: PathBuf) -> Self {
        Self { root, home }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Global Paths
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to the user-level config file.
    pub fn user_config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// Canonical credential directory shared by every session.
    pub fn auth_dir(&self) -> PathBuf {
        self.root.join("auth")
    }

    /// Parent directory of all session clones.
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Per-Project Paths
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to a project's config file.
    /// Example: /Users/pete/Code/my-project/.cowork/.cowork.conf
    pub fn project_config_file(&self, repo_root: &Path) -> PathBuf {
        repo_root.join(PROJECT_CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Directory backing a session.
    /// Example: ~/.cowork/sessions/my-project-backend
    pub fn session_dir(&self, project_slug: &str, session_name: &str) -> PathBuf {
        self.sessions_dir()
            .join(format!("{}-{}", project_slug, session_name))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directory Creation
    // ─────────────────────────────────────────────────────────────────────────────

    /// Ensures the root directory and standard subdirectories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.sessions_dir())?;
        Ok(())
    }
}

/// Writes `content` to a temp file next to `path`, then renames it into place,
/// so readers never observe a truncated file.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.flush()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
