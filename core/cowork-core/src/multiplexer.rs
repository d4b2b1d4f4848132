//! Terminal multiplexer selection and attach-or-create.
//!
//! Each connection runs `DetectPreference -> EnsureInstalled -> AttachOrCreate`
//! against one session environment. A cowork session maps to exactly one
//! multiplexer session of the same name, so reconnecting lands in the same
//! context instead of spawning a second one.

use crate::error::{CoworkError, Result};
use crate::external::ContainerRuntime;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Multiplexer {
    Tmux,
    Zellij,
    None,
}

impl Multiplexer {
    /// Order in which an environment is probed for an installed multiplexer.
    pub const PROBE_ORDER: [Multiplexer; 2] = [Multiplexer::Tmux, Multiplexer::Zellij];

    pub fn as_str(&self) -> &'static str {
        match self {
            Multiplexer::Tmux => "tmux",
            Multiplexer::Zellij => "zellij",
            Multiplexer::None => "none",
        }
    }

    fn binary(&self) -> Option<&'static str> {
        match self {
            Multiplexer::Tmux => Some("tmux"),
            Multiplexer::Zellij => Some("zellij"),
            Multiplexer::None => None,
        }
    }
}

impl fmt::Display for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Multiplexer {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tmux" => Ok(Multiplexer::Tmux),
            "zellij" => Ok(Multiplexer::Zellij),
            "none" => Ok(Multiplexer::None),
            other => Err(format!(
                "unknown multiplexer {:?}, expected tmux, zellij or none",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    Created,
    Shell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub multiplexer: Multiplexer,
    pub outcome: AttachOutcome,
    pub exit_status: i32,
}

/// Package managers in priority order.
const PACKAGE_MANAGERS: [&str; 5] = ["apt-get", "apk", "dnf", "yum", "pacman"];

const ZELLIJ_RELEASE_URL: &str = "https://github.com/zellij-org/zellij/releases/latest/download";
const ZELLIJ_INSTALL_PATH: &str = "/usr/local/bin/zellij";

const SHELL_COMMAND: [&str; 3] = ["sh", "-c", "exec \"${SHELL:-/bin/sh}\" -l"];

/// Drives one multiplexer connection inside the environment at `dir`.
pub struct MultiplexerController<'a> {
    runtime: &'a dyn ContainerRuntime,
    dir: &'a Path,
}

impl<'a> MultiplexerController<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, dir: &'a Path) -> Self {
        Self { runtime, dir }
    }

    /// Full connection: detect, install if needed, attach or create.
    pub fn connect(
        &self,
        requested: Option<Multiplexer>,
        configured: Option<Multiplexer>,
        session: &str,
    ) -> Result<Connection> {
        let multiplexer = self.detect(requested, configured);
        if multiplexer != Multiplexer::None {
            self.ensure_installed(multiplexer)?;
        }
        let (outcome, exit_status) = self.attach_or_create(multiplexer, session)?;
        Ok(Connection {
            multiplexer,
            outcome,
            exit_status,
        })
    }

    /// Per-invocation override, then configuration, then whatever is already
    /// installed. Probe failures degrade to `None`.
    pub fn detect(
        &self,
        requested: Option<Multiplexer>,
        configured: Option<Multiplexer>,
    ) -> Multiplexer {
        if let Some(choice) = requested.or(configured) {
            return choice;
        }
        match self.probe() {
            Ok(Some(found)) => {
                debug!(multiplexer = %found, "Detected installed multiplexer");
                found
            }
            Ok(None) => Multiplexer::None,
            Err(e) => {
                warn!(error = %e, "Multiplexer detection failed, using a plain shell");
                Multiplexer::None
            }
        }
    }

    pub fn probe(&self) -> Result<Option<Multiplexer>> {
        for candidate in Multiplexer::PROBE_ORDER {
            if let Some(binary) = candidate.binary() {
                if self.has_binary(binary)? {
                    return Ok(Some(candidate));
                }
            }
        }
        Ok(None)
    }

    pub fn ensure_installed(&self, multiplexer: Multiplexer) -> Result<()> {
        let Some(binary) = multiplexer.binary() else {
            return Ok(());
        };
        if self.has_binary(binary)? {
            return Ok(());
        }

        info!(multiplexer = %multiplexer, "Installing multiplexer in the environment");
        let sudo = self.privilege_prefix()?;
        match multiplexer {
            Multiplexer::Zellij => self.install_zellij(sudo)?,
            _ => self.install_package(binary, sudo)?,
        }

        if !self.has_binary(binary)? {
            return Err(CoworkError::CommandFailed {
                command: format!("install {}", binary),
                details: "binary still not found after installation".to_string(),
            });
        }
        Ok(())
    }

    /// Attaches to the session called `session`, creating it when absent.
    /// Returns how the connection was made and the exit status of the
    /// interactive command.
    pub fn attach_or_create(
        &self,
        multiplexer: Multiplexer,
        session: &str,
    ) -> Result<(AttachOutcome, i32)> {
        match multiplexer {
            Multiplexer::Tmux => {
                let target = format!("={}", tmux_session_name(session));
                let exists = self
                    .runtime
                    .exec_capture(self.dir, &["tmux", "has-session", "-t", &target])?
                    .success();
                if exists {
                    let status = self.interactive(&["tmux", "attach-session", "-t", &target])?;
                    Ok((AttachOutcome::Attached, status))
                } else {
                    let name = tmux_session_name(session);
                    let status = self.interactive(&["tmux", "new-session", "-s", &name])?;
                    Ok((AttachOutcome::Created, status))
                }
            }
            Multiplexer::Zellij => {
                let listing = self.runtime.exec_capture(
                    self.dir,
                    &["zellij", "list-sessions", "--short", "--no-formatting"],
                )?;
                let exists = listing.success()
                    && listing.stdout.lines().any(|line| line.trim() == session);
                if exists {
                    let status = self.interactive(&["zellij", "attach", session])?;
                    Ok((AttachOutcome::Attached, status))
                } else {
                    let status = self.interactive(&["zellij", "--session", session])?;
                    Ok((AttachOutcome::Created, status))
                }
            }
            Multiplexer::None => {
                let status = self.interactive(&SHELL_COMMAND)?;
                Ok((AttachOutcome::Shell, status))
            }
        }
    }

    fn interactive(&self, command: &[&str]) -> Result<i32> {
        debug!(command = ?command, "Entering environment");
        self.runtime.exec_interactive(self.dir, command)
    }

    fn has_binary(&self, binary: &str) -> Result<bool> {
        let script = format!("command -v {}", binary);
        Ok(self
            .runtime
            .exec_capture(self.dir, &["sh", "-c", &script])?
            .success())
    }

    /// `Some("sudo")` when not root and sudo exists.
    fn privilege_prefix(&self) -> Result<Option<&'static str>> {
        let uid = self.runtime.exec_capture(self.dir, &["id", "-u"])?;
        if uid.success() && uid.stdout.trim() == "0" {
            return Ok(None);
        }
        Ok(self.has_binary("sudo")?.then_some("sudo"))
    }

    fn package_manager(&self) -> Result<&'static str> {
        for manager in PACKAGE_MANAGERS {
            if self.has_binary(manager)? {
                return Ok(manager);
            }
        }
        Err(CoworkError::MissingExternalTool {
            tool: "package manager".to_string(),
            install_hint: format!(
                "The environment has none of {}. Install the multiplexer in the image, or connect with --none.",
                PACKAGE_MANAGERS.join(", ")
            ),
        })
    }

    fn install_package(&self, package: &str, sudo: Option<&str>) -> Result<()> {
        let manager = self.package_manager()?;
        let steps: Vec<Vec<&str>> = match manager {
            "apt-get" => vec![
                vec!["apt-get", "update"],
                vec!["apt-get", "install", "-y", package],
            ],
            "apk" => vec![vec!["apk", "add", "--no-cache", package]],
            "pacman" => vec![vec!["pacman", "-Sy", "--noconfirm", package]],
            other => vec![vec![other, "install", "-y", package]],
        };
        for step in steps {
            let command: Vec<&str> = sudo.into_iter().chain(step).collect();
            self.run_step(&command)?;
        }
        Ok(())
    }

    fn install_zellij(&self, sudo: Option<&str>) -> Result<()> {
        let arch = self.runtime.exec_capture(self.dir, &["uname", "-m"])?;
        let arch = arch.stdout.trim();
        let target = zellij_target(arch).ok_or_else(|| CoworkError::UnsupportedArchitecture {
            multiplexer: Multiplexer::Zellij.to_string(),
            arch: arch.to_string(),
        })?;

        let fetch = if self.has_binary("curl")? {
            "curl -fsSL"
        } else if self.has_binary("wget")? {
            "wget -qO-"
        } else {
            return Err(CoworkError::MissingExternalTool {
                tool: "curl or wget (inside the environment)".to_string(),
                install_hint: "Add curl to the image, or connect with --tmux or --none.".to_string(),
            });
        };

        let url = format!("{}/zellij-{}-unknown-linux-musl.tar.gz", ZELLIJ_RELEASE_URL, target);
        let script = format!(
            "set -e; {} {} | tar -xz -C /tmp zellij; {}install -m 0755 /tmp/zellij {}",
            fetch,
            url,
            sudo.map(|s| format!("{} ", s)).unwrap_or_default(),
            ZELLIJ_INSTALL_PATH
        );
        self.run_step(&["sh", "-c", &script])
    }

    fn run_step(&self, command: &[&str]) -> Result<()> {
        debug!(command = ?command, "Running install step");
        let output = self.runtime.exec_capture(self.dir, command)?;
        if output.success() {
            return Ok(());
        }
        Err(CoworkError::CommandFailed {
            command: command.join(" "),
            details: output.stderr.trim().to_string(),
        })
    }
}

/// Release target for `uname -m` output.
fn zellij_target(arch: &str) -> Option<&'static str> {
    match arch {
        "x86_64" | "amd64" => Some("x86_64"),
        "aarch64" | "arm64" => Some("aarch64"),
        _ => None,
    }
}

/// tmux treats `.` and `:` in targets as window and pane separators.
fn tmux_session_name(session: &str) -> String {
    session.replace(['.', ':'], "_")
}
