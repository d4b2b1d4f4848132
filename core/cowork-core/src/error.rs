//! Error types for cowork-core operations.
//!
//! Every fatal condition the CLI can report lives here. Recoverable
//! degradations (existing session on `init`, failed multiplexer probing) are
//! logged by the caller and never surface as a `CoworkError`.

use std::path::PathBuf;

/// All errors that can occur in cowork-core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoworkError {
    // ─────────────────────────────────────────────────────────────────────
    // Project Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Not inside a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("Repository has no remote origin: {0}")]
    NoRemote(PathBuf),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid session name: {name:?}: {reason}")]
    InvalidSessionName { name: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // Environment Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Required tool not found on PATH: {tool}")]
    MissingExternalTool { tool: String, install_hint: String },

    #[error("Unsupported CPU architecture for {multiplexer}: {arch}")]
    UnsupportedArchitecture { multiplexer: String, arch: String },

    #[error("No devcontainer specification at {0}")]
    MissingSpecification(PathBuf),

    #[error("Devcontainer specification malformed: {path}: {details}")]
    SpecificationMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Credential Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Credential bootstrap failed: {0}")]
    CredentialBootstrapFailed(String),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}:{line}: {details}")]
    ConfigMalformed {
        path: PathBuf,
        line: usize,
        details: String,
    },

    #[error("Configuration write failed: {path}: {source}")]
    ConfigWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Home directory not found")]
    HomeDirNotFound,

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Command execution failed: {command}: {details}")]
    CommandFailed { command: String, details: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CoworkError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CoworkError::Io {
            context: context.into(),
            source,
        }
    }

    /// Remediation hint shown under the error message.
    pub fn hint(&self) -> Option<String> {
        match self {
            CoworkError::NotARepository(_) => {
                Some("Run cowork from inside the git repository you want to work on.".to_string())
            }
            CoworkError::NoRemote(_) => Some(
                "Sessions are cloned from the remote origin. Add one with: git remote add origin <url>"
                    .to_string(),
            ),
            CoworkError::SessionNotFound(name) => Some(format!(
                "Create it first with: cowork init {name}  (see `cowork list`)"
            )),
            CoworkError::InvalidSessionName { .. } => Some(
                "Session names start with a letter or digit and contain only letters, digits, '.', '_' or '-'."
                    .to_string(),
            ),
            CoworkError::MissingExternalTool { install_hint, .. } => Some(install_hint.clone()),
            CoworkError::UnsupportedArchitecture { .. } => Some(
                "Pick another multiplexer with --tmux or --none, or install it in the image yourself."
                    .to_string(),
            ),
            CoworkError::MissingSpecification(_) => Some(
                "Add a .devcontainer/devcontainer.json to the session, or accept the generated default."
                    .to_string(),
            ),
            CoworkError::SpecificationMalformed { .. } => Some(
                "Fix the JSON syntax, or add the credential mount by hand (choose the manual option)."
                    .to_string(),
            ),
            CoworkError::CredentialBootstrapFailed(_) => {
                Some("Run `cowork auth` again and complete the login flow.".to_string())
            }
            CoworkError::ConfigMalformed { .. } => Some(
                "Config files only accept KEY=value and KEY=( ... ) lines. Fix or delete the file."
                    .to_string(),
            ),
            CoworkError::ConfigWriteFailed { .. } => {
                Some("Check permissions on the .cowork directory.".to_string())
            }
            CoworkError::HomeDirNotFound => Some("Set the HOME environment variable.".to_string()),
            CoworkError::CommandFailed { .. } | CoworkError::Io { .. } | CoworkError::Json { .. } => {
                None
            }
        }
    }
}

/// Convenience type alias for Results using CoworkError.
pub type Result<T> = std::result::Result<T, CoworkError>;
