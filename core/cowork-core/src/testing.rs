//! In-memory collaborators for tests.
//!
//! Each fake shares its state behind an `Rc`, so a test can hand a clone to
//! the code under test and inspect the original afterwards.

use crate::credentials::CREDENTIALS_FILE;
use crate::devcontainer::spec_path;
use crate::error::{CoworkError, Result};
use crate::external::{BranchOutcome, ContainerRuntime, ExecOutput, LabeledContainer, Vcs};
use crate::project_identity::canonicalize_path;
use crate::prompt::Prompter;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::rc::Rc;

fn strings(command: &[&str]) -> Vec<String> {
    command.iter().map(|s| s.to_string()).collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Version control
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct VcsState {
    repos: Vec<(PathBuf, Option<String>)>,
    spec: Option<String>,
    remote_branches: HashSet<String>,
    clones: Vec<(String, PathBuf)>,
    branches: HashMap<PathBuf, String>,
}

/// Repositories exist only as registered roots. `clone_repo` creates the
/// destination directory, plus a devcontainer.json when one was configured.
#[derive(Debug, Clone, Default)]
pub struct FakeVcs {
    state: Rc<RefCell<VcsState>>,
}

impl FakeVcs {
    pub fn with_repo(root: &Path, origin: Option<&str>) -> Self {
        let vcs = Self::default();
        vcs.state
            .borrow_mut()
            .repos
            .push((canonicalize_path(root), origin.map(str::to_string)));
        vcs
    }

    /// Every clone will contain this devcontainer.json.
    pub fn with_spec(self, content: &str) -> Self {
        self.state.borrow_mut().spec = Some(content.to_string());
        self
    }

    /// Branch that already exists on the remote.
    pub fn with_remote_branch(self, name: &str) -> Self {
        self.state.borrow_mut().remote_branches.insert(name.to_string());
        self
    }

    pub fn clones(&self) -> Vec<(String, PathBuf)> {
        self.state.borrow().clones.clone()
    }

    pub fn branch_of(&self, dir: &Path) -> Option<String> {
        self.state.borrow().branches.get(&canonicalize_path(dir)).cloned()
    }
}

impl Vcs for FakeVcs {
    fn repository_root(&self, cwd: &Path) -> Option<PathBuf> {
        let cwd = canonicalize_path(cwd);
        self.state
            .borrow()
            .repos
            .iter()
            .find(|(root, _)| cwd.starts_with(root))
            .map(|(root, _)| root.clone())
    }

    fn remote_origin_url(&self, repo: &Path) -> Result<Option<String>> {
        let repo = canonicalize_path(repo);
        Ok(self
            .state
            .borrow()
            .repos
            .iter()
            .find(|(root, _)| *root == repo)
            .and_then(|(_, origin)| origin.clone()))
    }

    fn clone_repo(&self, remote_url: &str, destination: &Path) -> Result<()> {
        std::fs::create_dir_all(destination)
            .map_err(|e| CoworkError::io("fake clone", e))?;
        let mut state = self.state.borrow_mut();
        if let Some(spec) = &state.spec {
            let path = spec_path(destination);
            std::fs::create_dir_all(path.parent().unwrap_or(destination))
                .and_then(|_| std::fs::write(&path, spec))
                .map_err(|e| CoworkError::io("fake clone", e))?;
        }
        state
            .clones
            .push((remote_url.to_string(), destination.to_path_buf()));
        Ok(())
    }

    fn create_or_checkout_branch(&self, dir: &Path, name: &str) -> Result<BranchOutcome> {
        let mut state = self.state.borrow_mut();
        let outcome = if state.remote_branches.contains(name) {
            BranchOutcome::CheckedOut
        } else {
            BranchOutcome::Created
        };
        state.branches.insert(canonicalize_path(dir), name.to_string());
        Ok(outcome)
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>> {
        Ok(self.branch_of(dir))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Container runtime
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct RuntimeState {
    running: Vec<LabeledContainer>,
    /// Created but not running, e.g. after a failed post-create step.
    exited: Vec<LabeledContainer>,
    next_id: usize,
    fail_up: bool,
    fail_up_after_create: bool,
    missing_tool: Option<String>,
    fail_exec: bool,
    binaries: BTreeSet<String>,
    multiplexer_sessions: BTreeSet<String>,
    login_credentials: Option<usize>,
    arch: String,
    uid: String,
    up_calls: Vec<PathBuf>,
    captured: Vec<Vec<String>>,
    interactive: Vec<Vec<String>>,
    stopped: Vec<String>,
    removed: Vec<String>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            running: Vec::new(),
            exited: Vec::new(),
            next_id: 1,
            fail_up: false,
            fail_up_after_create: false,
            missing_tool: None,
            fail_exec: false,
            binaries: BTreeSet::new(),
            multiplexer_sessions: BTreeSet::new(),
            login_credentials: None,
            arch: "x86_64".to_string(),
            uid: "1000".to_string(),
            up_calls: Vec::new(),
            captured: Vec::new(),
            interactive: Vec::new(),
            stopped: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// Simulates environments as a list of running containers plus a set of
/// binaries and multiplexer sessions shared by every environment.
#[derive(Debug, Clone, Default)]
pub struct FakeRuntime {
    state: Rc<RefCell<RuntimeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binaries<'s>(self, binaries: impl IntoIterator<Item = &'s str>) -> Self {
        self.state
            .borrow_mut()
            .binaries
            .extend(binaries.into_iter().map(str::to_string));
        self
    }

    pub fn with_arch(self, arch: &str) -> Self {
        self.state.borrow_mut().arch = arch.to_string();
        self
    }

    pub fn as_root(self) -> Self {
        self.state.borrow_mut().uid = "0".to_string();
        self
    }

    pub fn with_multiplexer_session(self, name: &str) -> Self {
        self.state
            .borrow_mut()
            .multiplexer_sessions
            .insert(name.to_string());
        self
    }

    /// `extract` will produce a credentials file of `len` bytes.
    pub fn with_login_credentials(self, len: usize) -> Self {
        self.state.borrow_mut().login_credentials = Some(len);
        self
    }

    pub fn failing_up(self) -> Self {
        self.state.borrow_mut().fail_up = true;
        self
    }

    /// `up` creates the container, which then exits, and reports failure.
    pub fn failing_up_after_create(self) -> Self {
        self.state.borrow_mut().fail_up_after_create = true;
        self
    }

    /// `up` fails as if `tool` were not installed on the host.
    pub fn without_host_tool(self, tool: &str) -> Self {
        self.state.borrow_mut().missing_tool = Some(tool.to_string());
        self
    }

    pub fn failing_exec(self) -> Self {
        self.state.borrow_mut().fail_exec = true;
        self
    }

    pub fn up_calls(&self) -> Vec<PathBuf> {
        self.state.borrow().up_calls.clone()
    }

    pub fn captured_commands(&self) -> Vec<Vec<String>> {
        self.state.borrow().captured.clone()
    }

    pub fn interactive_commands(&self) -> Vec<Vec<String>> {
        self.state.borrow().interactive.clone()
    }

    pub fn running(&self) -> Vec<LabeledContainer> {
        self.state.borrow().running.clone()
    }

    pub fn exited(&self) -> Vec<LabeledContainer> {
        self.state.borrow().exited.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.borrow().stopped.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.borrow().removed.clone()
    }

    pub fn has_binary(&self, name: &str) -> bool {
        self.state.borrow().binaries.contains(name)
    }

    pub fn multiplexer_sessions(&self) -> Vec<String> {
        self.state
            .borrow()
            .multiplexer_sessions
            .iter()
            .cloned()
            .collect()
    }

    fn exec_failure(command: &[&str]) -> CoworkError {
        CoworkError::CommandFailed {
            command: command.join(" "),
            details: "exec failed".to_string(),
        }
    }
}

impl ContainerRuntime for FakeRuntime {
    fn up(&self, dir: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.up_calls.push(dir.to_path_buf());
        if let Some(tool) = &state.missing_tool {
            return Err(CoworkError::MissingExternalTool {
                tool: tool.clone(),
                install_hint: format!("Install {}", tool),
            });
        }
        if state.fail_up {
            return Err(CoworkError::CommandFailed {
                command: "devcontainer up".to_string(),
                details: "image build failed".to_string(),
            });
        }
        let folder = canonicalize_path(dir);
        if state.fail_up_after_create {
            let id = format!("container-{}", state.next_id);
            state.next_id += 1;
            state.exited.push(LabeledContainer {
                id,
                local_folder: folder,
            });
            return Err(CoworkError::CommandFailed {
                command: "devcontainer up".to_string(),
                details: "postCreateCommand failed".to_string(),
            });
        }
        if !state.running.iter().any(|c| c.local_folder == folder) {
            let id = format!("container-{}", state.next_id);
            state.next_id += 1;
            state.running.push(LabeledContainer {
                id,
                local_folder: folder,
            });
        }
        Ok(())
    }

    fn exec_interactive(&self, _dir: &Path, command: &[&str]) -> Result<i32> {
        let mut state = self.state.borrow_mut();
        state.interactive.push(strings(command));
        if state.fail_exec {
            return Err(Self::exec_failure(command));
        }
        match command {
            ["tmux", "new-session", "-s", name] | ["zellij", "--session", name] => {
                state.multiplexer_sessions.insert(name.to_string());
            }
            _ => {}
        }
        Ok(0)
    }

    fn exec_capture(&self, _dir: &Path, command: &[&str]) -> Result<ExecOutput> {
        let mut state = self.state.borrow_mut();
        state.captured.push(strings(command));
        if state.fail_exec {
            return Err(Self::exec_failure(command));
        }

        let ok = |stdout: String| ExecOutput {
            status: 0,
            stdout,
            stderr: String::new(),
        };
        let failed = ExecOutput {
            status: 1,
            ..ExecOutput::default()
        };

        let output = match command {
            ["sh", "-c", script] if script.starts_with("command -v ") => {
                let binary = script.trim_start_matches("command -v ").trim();
                if state.binaries.contains(binary) {
                    ok(format!("/usr/bin/{}\n", binary))
                } else {
                    failed
                }
            }
            ["id", "-u"] => ok(format!("{}\n", state.uid)),
            ["uname", "-m"] => ok(format!("{}\n", state.arch)),
            ["tmux", "has-session", "-t", target] => {
                if state
                    .multiplexer_sessions
                    .contains(target.trim_start_matches('='))
                {
                    ok(String::new())
                } else {
                    failed
                }
            }
            ["zellij", "list-sessions", ..] => {
                let listing: Vec<String> = state.multiplexer_sessions.iter().cloned().collect();
                ok(listing.join("\n"))
            }
            _ => {
                // Any other command is an install step; the last word names
                // the installed binary.
                let installed = command
                    .last()
                    .and_then(|last| last.split_whitespace().last())
                    .and_then(|word| word.rsplit('/').next())
                    .map(str::to_string);
                if let Some(binary) = installed.filter(|b| b == "tmux" || b == "zellij") {
                    state.binaries.insert(binary);
                }
                ok(String::new())
            }
        };
        Ok(output)
    }

    fn list_running_by_label(&self, _label: &str) -> Result<Vec<LabeledContainer>> {
        Ok(self.state.borrow().running.clone())
    }

    fn list_by_label(&self, _label: &str) -> Result<Vec<LabeledContainer>> {
        let state = self.state.borrow();
        Ok(state.running.iter().chain(&state.exited).cloned().collect())
    }

    fn stop(&self, container_id: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if let Some(index) = state.running.iter().position(|c| c.id == container_id) {
            let container = state.running.remove(index);
            state.exited.push(container);
        }
        state.stopped.push(container_id.to_string());
        Ok(())
    }

    fn remove(&self, container_id: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.running.retain(|c| c.id != container_id);
        state.exited.retain(|c| c.id != container_id);
        state.removed.push(container_id.to_string());
        Ok(())
    }

    fn extract(
        &self,
        _dir: &Path,
        _container_path: &str,
        host_dir: &Path,
        _strip_components: usize,
    ) -> Result<()> {
        if let Some(len) = self.state.borrow().login_credentials {
            std::fs::create_dir_all(host_dir)
                .and_then(|_| std::fs::write(host_dir.join(CREDENTIALS_FILE), "x".repeat(len)))
                .map_err(|e| CoworkError::io("fake extract", e))?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Prompts
// ═══════════════════════════════════════════════════════════════════════════════

/// Answers questions from a fixed script; an exhausted script reads as end
/// of input.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPrompter {
    answers: Rc<RefCell<VecDeque<String>>>,
    questions: Rc<RefCell<Vec<String>>>,
    transcript: Rc<RefCell<Vec<String>>>,
}

impl ScriptedPrompter {
    pub fn new<S: Into<String>>(answers: impl IntoIterator<Item = S>) -> Self {
        Self {
            answers: Rc::new(RefCell::new(answers.into_iter().map(Into::into).collect())),
            ..Self::default()
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.borrow().len()
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.borrow().clone()
    }

    /// Everything passed to `say`, in order.
    pub fn transcript(&self) -> Vec<String> {
        self.transcript.borrow().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&self, question: &str) -> Result<Option<String>> {
        self.questions.borrow_mut().push(question.to_string());
        Ok(self.answers.borrow_mut().pop_front())
    }

    fn say(&self, message: &str) {
        self.transcript.borrow_mut().push(message.to_string());
    }
}
