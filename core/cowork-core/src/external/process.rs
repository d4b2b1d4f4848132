//! Subprocess helpers shared by the collaborator adapters.

use crate::error::{CoworkError, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs a command to completion and captures its output. A non-zero exit is
/// not an error here; only failing to spawn is.
pub(crate) fn run_capture<I, S>(program: &str, args: I) -> Result<ExecOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());
    debug!(command = ?command, "Running command");
    let output = command.output().map_err(|e| spawn_failed(program, e))?;
    Ok(ExecOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Like `run_capture`, but a non-zero exit becomes `CommandFailed`.
pub(crate) fn run_checked<I, S>(program: &str, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<S> = args.into_iter().collect();
    let rendered = render(program, &args);
    let output = run_capture(program, args)?;
    if !output.success() {
        return Err(CoworkError::CommandFailed {
            command: rendered,
            details: failure_details(&output),
        });
    }
    Ok(output.stdout)
}

/// Runs a command attached to the user's terminal and returns its exit code.
pub(crate) fn run_interactive<I, S>(program: &str, args: I) -> Result<i32>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args);
    debug!(command = ?command, "Running interactive command");
    let status = command.status().map_err(|e| spawn_failed(program, e))?;
    Ok(status.code().unwrap_or(-1))
}

/// Runs `producer | consumer`. The producer's stderr is drained on its own
/// thread so a noisy producer never stalls on a full pipe.
pub(crate) fn run_pipeline(mut producer: Command, mut consumer: Command) -> Result<()> {
    let (producer_program, consumer_program) = (program_name(&producer), program_name(&consumer));
    let producer_line = render_command(&producer);
    let consumer_line = render_command(&consumer);
    debug!(producer = %producer_line, consumer = %consumer_line, "Running pipeline");

    let mut upstream = producer
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_failed(&producer_program, e))?;

    let (Some(archive), Some(mut noise)) = (upstream.stdout.take(), upstream.stderr.take()) else {
        let _ = upstream.kill();
        let _ = upstream.wait();
        return Err(CoworkError::CommandFailed {
            command: producer_line,
            details: "output pipes unavailable".to_string(),
        });
    };
    let drain = thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = noise.read_to_end(&mut buffer);
        buffer
    });

    let downstream = consumer
        .stdin(Stdio::from(archive))
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn();
    let downstream = match downstream {
        Ok(child) => child,
        Err(e) => {
            let _ = upstream.kill();
            let _ = upstream.wait();
            let _ = drain.join();
            return Err(spawn_failed(&consumer_program, e));
        }
    };

    let consumed = downstream
        .wait_with_output()
        .map_err(|e| CoworkError::io(format!("waiting for {}", consumer_line), e))?;
    let produced = upstream
        .wait()
        .map_err(|e| CoworkError::io(format!("waiting for {}", producer_line), e))?;
    let producer_stderr = drain.join().unwrap_or_default();

    if !produced.success() {
        return Err(CoworkError::CommandFailed {
            command: producer_line,
            details: String::from_utf8_lossy(&producer_stderr).trim().to_string(),
        });
    }
    if !consumed.status.success() {
        return Err(CoworkError::CommandFailed {
            command: consumer_line,
            details: String::from_utf8_lossy(&consumed.stderr).trim().to_string(),
        });
    }
    Ok(())
}

fn program_name(command: &Command) -> String {
    command.get_program().to_string_lossy().to_string()
}

fn render_command(command: &Command) -> String {
    let args: Vec<&OsStr> = command.get_args().collect();
    render(&program_name(command), &args)
}

pub(crate) fn spawn_failed(program: &str, source: std::io::Error) -> CoworkError {
    if source.kind() == std::io::ErrorKind::NotFound {
        return missing_tool(program);
    }
    CoworkError::io(format!("spawning {}", program), source)
}

pub(crate) fn failure_details(output: &ExecOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("exit status {}", output.status)
    } else {
        format!("exit status {}: {}", output.status, stderr)
    }
}

fn render<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.as_ref().to_string_lossy());
    }
    rendered
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Searches `PATH` for an executable named `binary`.
pub fn which(binary: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

/// Fails with `MissingExternalTool` unless `binary` is on `PATH`.
pub fn require_tool(binary: &str) -> Result<PathBuf> {
    which(binary).ok_or_else(|| missing_tool(binary))
}

fn missing_tool(binary: &str) -> CoworkError {
    let install_hint = match binary {
        "git" => "Install git: https://git-scm.com/downloads",
        "docker" => "Install Docker: https://docs.docker.com/get-docker/",
        "devcontainer" => "Install the devcontainer CLI: npm install -g @devcontainers/cli",
        "tar" => "Install tar with your system package manager",
        _ => "Install it and make sure it is on PATH",
    };
    CoworkError::MissingExternalTool {
        tool: binary.to_string(),
        install_hint: install_hint.to_string(),
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
