//! Adapters for the tools cowork drives but does not implement: git, the
//! devcontainer CLI and docker. Each is a trait so the lifecycle logic can be
//! exercised against fakes.

mod process;
mod runtime;
mod vcs;

pub use process::{require_tool, which, ExecOutput};
pub use runtime::{ContainerRuntime, DevcontainerCli, LabeledContainer, LOCAL_FOLDER_LABEL};
pub use vcs::{BranchOutcome, GitCli, Vcs};
