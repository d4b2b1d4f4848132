//! # cowork-core
//!
//! Core library for cowork: isolated, resumable development sessions, each a
//! full clone of the project on its own branch with its own devcontainer.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. External tools are blocking calls.
//! - **No ambient globals**: Configuration is an explicit value passed into and
//!   returned from each operation.
//! - **Collaborators behind traits**: git, the container runtime and the terminal
//!   are reached through [`Vcs`], [`ContainerRuntime`] and [`Prompter`], so every
//!   lifecycle rule can be exercised without them.
//! - **Local state only**: Everything lives under `~/.cowork` and the project's
//!   `.cowork/` directory.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cowork_core::{Cowork, Multiplexer};
//!
//! let cowork = Cowork::new(std::env::current_dir()?)?;
//! cowork.init(&["backend".to_string()])?;
//! cowork.connect("backend", Some(Multiplexer::Tmux))?;
//! ```

pub mod config;
pub mod credentials;
pub mod devcontainer;
pub mod engine;
pub mod error;
pub mod external;
pub mod multiplexer;
pub mod patterns;
pub mod project_identity;
pub mod prompt;
pub mod sessions;
pub mod storage;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

// Re-export commonly used items at crate root
pub use config::{Config, ConfigDocument, ConfigScope, ConfigSource, ConfigValue};
pub use credentials::{BrokerAction, CredentialBroker, CredentialReport, CredentialState, Health};
pub use devcontainer::{Decision, PatchOutcome, Readiness, Reconciliation};
pub use engine::{
    CleanOutcome, ConnectReport, Cowork, InitEntry, InitReport, SessionListing, StatusReport,
};
pub use error::{CoworkError, Result};
pub use external::{BranchOutcome, ContainerRuntime, DevcontainerCli, GitCli, Vcs};
pub use multiplexer::{AttachOutcome, Connection, Multiplexer};
pub use project_identity::ProjectIdentity;
pub use prompt::{Prompter, TerminalPrompter};
pub use sessions::{CreateOutcome, Removal, Session, SessionStatus};
pub use storage::StorageConfig;
