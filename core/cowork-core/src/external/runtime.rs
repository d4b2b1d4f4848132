//! Container runtime collaborator.
//!
//! Environments are started and entered through the devcontainer CLI; the
//! docker CLI is used for the label query and for stopping containers, since
//! the devcontainer CLI has neither.
//!
//! Every container the devcontainer CLI starts carries a
//! `devcontainer.local_folder` label with the workspace folder, which is how a
//! session directory is joined to its container.

use super::process::{failure_details, run_capture, run_checked, run_interactive, run_pipeline};
use super::ExecOutput;
use crate::error::{CoworkError, Result};
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

pub const LOCAL_FOLDER_LABEL: &str = "devcontainer.local_folder";

/// A container and the workspace folder it was started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledContainer {
    pub id: String,
    pub local_folder: PathBuf,
}

pub trait ContainerRuntime {
    /// Builds (if needed) and starts the environment for `dir`. Idempotent.
    fn up(&self, dir: &Path) -> Result<()>;

    /// Runs `command` inside the environment attached to the terminal.
    fn exec_interactive(&self, dir: &Path, command: &[&str]) -> Result<i32>;

    /// Runs `command` inside the environment and captures its output.
    fn exec_capture(&self, dir: &Path, command: &[&str]) -> Result<ExecOutput>;

    /// All running containers carrying `label`, in one query.
    fn list_running_by_label(&self, label: &str) -> Result<Vec<LabeledContainer>>;

    /// Every container carrying `label`, including created and exited ones.
    fn list_by_label(&self, label: &str) -> Result<Vec<LabeledContainer>>;

    fn stop(&self, container_id: &str) -> Result<()>;

    fn remove(&self, container_id: &str) -> Result<()>;

    /// Streams `container_path` out of the environment as a tar archive and
    /// unpacks it into `host_dir`, dropping `strip_components` leading path
    /// segments from every entry.
    fn extract(
        &self,
        dir: &Path,
        container_path: &str,
        host_dir: &Path,
        strip_components: usize,
    ) -> Result<()>;
}

/// Final JSON line printed by `devcontainer up`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpResult {
    outcome: String,
    #[serde(default)]
    container_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DevcontainerCli;

impl DevcontainerCli {
    fn exec_args(dir: &Path, command: &[&str]) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["exec".into(), "--workspace-folder".into(), dir.into()];
        args.extend(command.iter().map(OsString::from));
        args
    }
}

impl ContainerRuntime for DevcontainerCli {
    fn up(&self, dir: &Path) -> Result<()> {
        info!(dir = %dir.display(), "Starting environment");
        let args: [OsString; 3] = ["up".into(), "--workspace-folder".into(), dir.into()];
        let output = run_capture("devcontainer", args)?;
        if !output.success() {
            return Err(CoworkError::CommandFailed {
                command: format!("devcontainer up --workspace-folder {}", dir.display()),
                details: failure_details(&output),
            });
        }

        // The CLI reports its outcome as a JSON line on stdout.
        let result = output
            .stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str::<UpResult>(line).ok());
        match result {
            Some(result) if result.outcome != "success" => Err(CoworkError::CommandFailed {
                command: "devcontainer up".to_string(),
                details: result
                    .message
                    .unwrap_or_else(|| format!("outcome {}", result.outcome)),
            }),
            Some(result) => {
                debug!(container = ?result.container_id, "Environment up");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn exec_interactive(&self, dir: &Path, command: &[&str]) -> Result<i32> {
        run_interactive("devcontainer", Self::exec_args(dir, command))
    }

    fn exec_capture(&self, dir: &Path, command: &[&str]) -> Result<ExecOutput> {
        run_capture("devcontainer", Self::exec_args(dir, command))
    }

    fn list_running_by_label(&self, label: &str) -> Result<Vec<LabeledContainer>> {
        docker_ps(label, false)
    }

    fn list_by_label(&self, label: &str) -> Result<Vec<LabeledContainer>> {
        docker_ps(label, true)
    }

    fn stop(&self, container_id: &str) -> Result<()> {
        info!(container = container_id, "Stopping container");
        run_checked("docker", ["stop", container_id])?;
        Ok(())
    }

    fn remove(&self, container_id: &str) -> Result<()> {
        run_checked("docker", ["rm", "-f", container_id])?;
        Ok(())
    }

    fn extract(
        &self,
        dir: &Path,
        container_path: &str,
        host_dir: &Path,
        strip_components: usize,
    ) -> Result<()> {
        let relative = container_path.trim_start_matches('/');
        let mut producer = Command::new("devcontainer");
        producer.args(Self::exec_args(dir, &["tar", "-cf", "-", "-C", "/", relative]));

        let mut consumer = Command::new("tar");
        consumer
            .arg("-xf")
            .arg("-")
            .arg(format!("--strip-components={}", strip_components))
            .arg("-C")
            .arg(host_dir);

        debug!(from = container_path, to = %host_dir.display(), strip_components, "Extracting archive");
        run_pipeline(producer, consumer)
    }
}

fn docker_ps(label: &str, all: bool) -> Result<Vec<LabeledContainer>> {
    let stdout = run_checked("docker", ps_args(label, all))?;
    Ok(parse_container_list(&stdout))
}

/// `docker ps` arguments printing `ID<TAB>label value` per container.
/// `all` adds created and exited containers.
fn ps_args(label: &str, all: bool) -> Vec<String> {
    let mut args = vec!["ps".to_string()];
    if all {
        args.push("-a".to_string());
    }
    args.extend([
        "--filter".to_string(),
        format!("label={}", label),
        "--format".to_string(),
        format!("{{{{.ID}}}}\t{{{{.Label \"{}\"}}}}", label),
    ]);
    args
}

fn parse_container_list(output: &str) -> Vec<LabeledContainer> {
    output
        .lines()
        .filter_map(|line| {
            let (id, folder) = line.split_once('\t')?;
            let (id, folder) = (id.trim(), folder.trim());
            if id.is_empty() || folder.is_empty() {
                return None;
            }
            Some(LabeledContainer {
                id: id.to_string(),
                local_folder: PathBuf::from(folder),
            })
        })
        .collect()
}
