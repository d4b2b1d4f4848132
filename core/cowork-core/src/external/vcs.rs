//! Version control collaborator.
//!
//! cowork never manipulates repositories itself; it asks `git` to clone and
//! switch branches. Repository discovery walks parent directories for a `.git`
//! entry (directory, or gitdir file for worktrees and submodules).

use super::process::{run_capture, run_checked, run_interactive};
use crate::error::{CoworkError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOutcome {
    Created,
    CheckedOut,
}

pub trait Vcs {
    /// Directory containing the `.git` entry that encloses `cwd`.
    fn repository_root(&self, cwd: &Path) -> Option<PathBuf>;

    fn remote_origin_url(&self, repo: &Path) -> Result<Option<String>>;

    fn clone_repo(&self, remote_url: &str, destination: &Path) -> Result<()>;

    /// Checks out `name`, creating it from the current HEAD when no local or
    /// remote branch of that name exists. Never fails on a name collision.
    fn create_or_checkout_branch(&self, dir: &Path, name: &str) -> Result<BranchOutcome>;

    fn current_branch(&self, dir: &Path) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl Vcs for GitCli {
    fn repository_root(&self, cwd: &Path) -> Option<PathBuf> {
        let start = if cwd.is_dir() {
            cwd.to_path_buf()
        } else {
            cwd.parent()?.to_path_buf()
        };

        start
            .ancestors()
            .find(|dir| dir.join(".git").exists())
            .map(Path::to_path_buf)
    }

    fn remote_origin_url(&self, repo: &Path) -> Result<Option<String>> {
        let output = run_capture("git", in_repo(repo, &["config", "--get", "remote.origin.url"]))?;
        if !output.success() {
            return Ok(None);
        }
        let url = output.stdout.trim();
        Ok((!url.is_empty()).then(|| url.to_string()))
    }

    fn clone_repo(&self, remote_url: &str, destination: &Path) -> Result<()> {
        info!(url = remote_url, dest = %destination.display(), "Cloning repository");
        let args: [OsString; 3] = ["clone".into(), remote_url.into(), destination.into()];
        let code = run_interactive("git", args)?;
        if code != 0 {
            return Err(CoworkError::CommandFailed {
                command: format!("git clone {} {}", remote_url, destination.display()),
                details: format!("exit status {}", code),
            });
        }
        Ok(())
    }

    fn create_or_checkout_branch(&self, dir: &Path, name: &str) -> Result<BranchOutcome> {
        let has_ref = |reference: String| -> Result<bool> {
            let output = run_capture(
                "git",
                in_repo(dir, &["show-ref", "--verify", "--quiet", &reference]),
            )?;
            Ok(output.success())
        };

        let exists = has_ref(format!("refs/heads/{}", name))?
            || has_ref(format!("refs/remotes/origin/{}", name))?;

        if exists {
            run_checked("git", in_repo(dir, &["checkout", name]))?;
            Ok(BranchOutcome::CheckedOut)
        } else {
            run_checked("git", in_repo(dir, &["checkout", "-b", name]))?;
            Ok(BranchOutcome::Created)
        }
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>> {
        let output = run_capture("git", in_repo(dir, &["rev-parse", "--abbrev-ref", "HEAD"]))?;
        if !output.success() {
            return Ok(None);
        }
        let branch = output.stdout.trim();
        Ok((!branch.is_empty() && branch != "HEAD").then(|| branch.to_string()))
    }
}

/// `git -C <dir> <args...>`
fn in_repo(dir: &Path, args: &[&str]) -> Vec<OsString> {
    let mut all: Vec<OsString> = vec!["-C".into(), dir.into()];
    all.extend(args.iter().map(OsString::from));
    all
}
