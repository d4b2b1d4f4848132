//! Devcontainer specification reconciliation.
//!
//! Every session environment must mount the canonical credential directory at
//! [`AUTH_MOUNT_TARGET`]. A project-authored `devcontainer.json` is never
//! rewritten without an explicit opt-in, and never without a backup.
//!
//! `ensure` only inspects; `resolve` carries out the user's decision.

use crate::error::{CoworkError, Result};
use crate::prompt::Prompter;
use crate::storage::write_atomic;
use chrono::Local;
use fs_err as fs;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SPEC_DIR: &str = ".devcontainer";
pub const SPEC_FILE: &str = "devcontainer.json";

/// Host side of the credential mount, as the devcontainer CLI expands it.
pub const AUTH_MOUNT_SOURCE: &str = "${localEnv:HOME}/.cowork/auth";
/// Where the credential bundle appears inside every session environment.
pub const AUTH_MOUNT_TARGET: &str = "/home/node/.claude";

pub const DEFAULT_IMAGE: &str = "mcr.microsoft.com/devcontainers/javascript-node:20";
pub const REMOTE_USER: &str = "node";
pub const CLI_INSTALL_COMMAND: &str = "npm install -g @anthropic-ai/claude-code";

/// Outcome of inspecting a session directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Ready,
    NeedsUserDecision(Decision),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A specification exists but does not mount the credential bundle.
    MissingMount,
    /// No specification exists.
    MissingSpecification,
}

/// What the environment will be able to do once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    WithoutCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched { backup: PathBuf },
    AlreadyPatched,
}

const MISSING_MOUNT_OPTIONS: [&str; 3] = [
    "Show me how to add the mount myself",
    "Patch devcontainer.json automatically (a backup is kept)",
    "Continue without credentials",
];

pub fn spec_path(session_dir: &Path) -> PathBuf {
    session_dir.join(SPEC_DIR).join(SPEC_FILE)
}

/// The mount entry added to every specification.
pub fn auth_mount() -> String {
    format!(
        "source={},target={},type=bind,consistency=cached",
        AUTH_MOUNT_SOURCE, AUTH_MOUNT_TARGET
    )
}

/// Inspects `session_dir` without modifying anything.
pub fn ensure(session_dir: &Path) -> Result<Reconciliation> {
    let path = spec_path(session_dir);
    if !path.exists() {
        return Ok(Reconciliation::NeedsUserDecision(
            Decision::MissingSpecification,
        ));
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| CoworkError::io(format!("reading {}", path.display()), e))?;
    let mounted = match parse_jsonc(&content) {
        Ok(spec) => has_auth_mount(&spec),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unparseable devcontainer.json, checking text");
            content.contains(".cowork/auth")
        }
    };

    if mounted {
        Ok(Reconciliation::Ready)
    } else {
        Ok(Reconciliation::NeedsUserDecision(Decision::MissingMount))
    }
}

/// Asks the user how to resolve `decision` and carries it out.
pub fn resolve(session_dir: &Path, decision: Decision, prompter: &dyn Prompter) -> Result<Readiness> {
    let path = spec_path(session_dir);
    match decision {
        Decision::MissingMount => {
            prompter.say(&format!(
                "{} does not mount the shared credentials ({}).",
                path.display(),
                AUTH_MOUNT_TARGET
            ));
            let choice = prompter.choose("How do you want to proceed?", &MISSING_MOUNT_OPTIONS)?;
            match choice {
                Some(0) => {
                    prompter.say(&manual_instructions(&path));
                    Ok(Readiness::WithoutCredentials)
                }
                Some(1) => {
                    match patch(&path)? {
                        PatchOutcome::Patched { backup } => prompter.say(&format!(
                            "Patched {} (backup: {})",
                            path.display(),
                            backup.display()
                        )),
                        PatchOutcome::AlreadyPatched => {
                            prompter.say("Credential mount already present.")
                        }
                    }
                    Ok(Readiness::Ready)
                }
                _ => {
                    warn!(path = %path.display(), "Continuing without credential mount");
                    Ok(Readiness::WithoutCredentials)
                }
            }
        }
        Decision::MissingSpecification => {
            prompter.say(&format!("No devcontainer specification at {}.", path.display()));
            if prompter.confirm("Generate a default devcontainer.json?")? {
                generate_default(session_dir)?;
                prompter.say(&format!("Created {}", path.display()));
                Ok(Readiness::Ready)
            } else {
                Err(CoworkError::MissingSpecification(path))
            }
        }
    }
}

/// `ensure` followed by `resolve` when a decision is needed.
pub fn reconcile(session_dir: &Path, prompter: &dyn Prompter) -> Result<Readiness> {
    match ensure(session_dir)? {
        Reconciliation::Ready => Ok(Readiness::Ready),
        Reconciliation::NeedsUserDecision(decision) => resolve(session_dir, decision, prompter),
    }
}

/// Appends the credential mount to `path`, after backing up the original.
/// Running it again on a patched file changes nothing.
pub fn patch(path: &Path) -> Result<PatchOutcome> {
    let content = fs::read_to_string(path)
        .map_err(|e| CoworkError::io(format!("reading {}", path.display()), e))?;
    let malformed = |details: String| CoworkError::SpecificationMalformed {
        path: path.to_path_buf(),
        details,
    };

    let mut spec = parse_jsonc(&content).map_err(|e| malformed(e.to_string()))?;
    if has_auth_mount(&spec) {
        return Ok(PatchOutcome::AlreadyPatched);
    }

    let root = spec
        .as_object_mut()
        .ok_or_else(|| malformed("top level is not an object".to_string()))?;
    let mounts = root
        .entry("mounts")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| malformed("\"mounts\" is not an array".to_string()))?;
    mounts.push(Value::String(auth_mount()));

    let backup = backup_path(path);
    fs::write(&backup, &content)
        .map_err(|e| CoworkError::io(format!("writing backup {}", backup.display()), e))?;

    write_spec(path, &spec)?;

    info!(path = %path.display(), backup = %backup.display(), "Patched devcontainer.json");
    Ok(PatchOutcome::Patched { backup })
}

/// Writes the default specification into `session_dir`. Refuses to replace
/// an existing file.
pub fn generate_default(session_dir: &Path) -> Result<PathBuf> {
    let path = spec_path(session_dir);
    if path.exists() {
        return Ok(path);
    }
    let name = session_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "cowork".to_string());
    write_spec(&path, &default_spec(&name))?;
    info!(path = %path.display(), "Generated default devcontainer.json");
    Ok(path)
}

pub(crate) fn write_spec(path: &Path, spec: &Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(spec).map_err(|e| CoworkError::Json {
        context: "serializing devcontainer.json".to_string(),
        source: e,
    })?;
    write_atomic(path, format!("{}\n", rendered).as_bytes())
        .map_err(|e| CoworkError::io(format!("writing {}", path.display()), e))
}

/// A minimal but complete environment: dev tooling, credential, SSH and git
/// identity mounts, the CLI installed after creation, editor customizations.
pub fn default_spec(name: &str) -> Value {
    json!({
        "name": name,
        "image": DEFAULT_IMAGE,
        "remoteUser": REMOTE_USER,
        "features": {
            "ghcr.io/devcontainers/features/common-utils:2": {},
            "ghcr.io/devcontainers/features/git:1": {},
            "ghcr.io/devcontainers/features/github-cli:1": {}
        },
        "mounts": [
            auth_mount(),
            format!("source=${{localEnv:HOME}}/.ssh,target=/home/{}/.ssh,type=bind,readonly", REMOTE_USER),
            format!("source=${{localEnv:HOME}}/.gitconfig,target=/home/{}/.gitconfig,type=bind,readonly", REMOTE_USER)
        ],
        "postCreateCommand": CLI_INSTALL_COMMAND,
        "customizations": {
            "vscode": {
                "extensions": [
                    "anthropic.claude-code",
                    "eamodio.gitlens",
                    "editorconfig.editorconfig"
                ],
                "settings": {
                    "terminal.integrated.defaultProfile.linux": "bash"
                }
            }
        }
    })
}

/// Specification of the throwaway environment used only to log in.
pub fn login_spec() -> Value {
    json!({
        "name": "cowork-auth",
        "image": DEFAULT_IMAGE,
        "remoteUser": REMOTE_USER,
        "postCreateCommand": CLI_INSTALL_COMMAND
    })
}

/// True when any `mounts` entry, string or object form, exposes the
/// credential directory.
pub fn has_auth_mount(spec: &Value) -> bool {
    let Some(mounts) = spec.get("mounts").and_then(Value::as_array) else {
        return false;
    };
    mounts.iter().any(|mount| match mount {
        Value::String(s) => {
            s.contains(".cowork/auth")
                || s.split(',').any(|part| {
                    matches!(
                        part.trim().split_once('='),
                        Some(("target" | "dst" | "destination", t)) if t == AUTH_MOUNT_TARGET
                    )
                })
        }
        Value::Object(map) => {
            let source_matches = map
                .get("source")
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(".cowork/auth"));
            let target_matches = map
                .get("target")
                .and_then(Value::as_str)
                .is_some_and(|t| t == AUTH_MOUNT_TARGET);
            source_matches || target_matches
        }
        _ => false,
    })
}

fn manual_instructions(path: &Path) -> String {
    format!(
        "Add this entry to the \"mounts\" array in {}:\n\n    \"{}\"\n\n\
         Then reconnect. Until then the session starts without shared credentials.",
        path.display(),
        auth_mount()
    )
}

fn backup_path(path: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| SPEC_FILE.to_string());
    path.with_file_name(format!("{}.backup-{}", file_name, stamp))
}

// ─────────────────────────────────────────────────────────────────────────────
// JSONC
// ─────────────────────────────────────────────────────────────────────────────

/// Parses JSON with comments and trailing commas, as devcontainer.json allows.
pub fn parse_jsonc(content: &str) -> std::result::Result<Value, serde_json::Error> {
    serde_json::from_str(&strip_trailing_commas(&strip_comments(content)))
}

fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = '\0';
                for skipped in chars.by_ref() {
                    if previous == '*' && skipped == '/' {
                        break;
                    }
                    if skipped == '\n' {
                        out.push('\n');
                    }
                    previous = skipped;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(&escaped) = chars.get(i + 1) {
                    out.push(escaped);
                    i += 1;
                }
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
            out.push(c);
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if !matches!(next, Some('}') | Some(']')) {
                out.push(c);
            }
        } else {
            out.push(c);
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPrompter;
    use tempfile::TempDir;

    fn session_with_spec(content: &str) -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("app-backend");
        let path = spec_path(&dir);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        (temp, dir)
    }

    fn backups(dir: &Path) -> usize {
        fs::read_dir(dir.join(SPEC_DIR))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".backup-"))
            .count()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_ensure_missing_specification() {
        let temp = TempDir::new().unwrap();
        assert_eq!(
            ensure(temp.path()).unwrap(),
            Reconciliation::NeedsUserDecision(Decision::MissingSpecification)
        );
    }

    #[test]
    fn test_ensure_ready_when_mount_declared() {
        let spec = format!(r#"{{"image": "x", "mounts": ["{}"]}}"#, auth_mount());
        let (_temp, dir) = session_with_spec(&spec);
        assert_eq!(ensure(&dir).unwrap(), Reconciliation::Ready);
    }

    #[test]
    fn test_ensure_flags_missing_mount() {
        let (_temp, dir) = session_with_spec(r#"{"image": "x"}"#);
        assert_eq!(
            ensure(&dir).unwrap(),
            Reconciliation::NeedsUserDecision(Decision::MissingMount)
        );
    }

    #[test]
    fn test_has_auth_mount_object_form() {
        let spec = json!({"mounts": [{"source": "/somewhere", "target": AUTH_MOUNT_TARGET, "type": "bind"}]});
        assert!(has_auth_mount(&spec));
        let other = json!({"mounts": [{"source": "/x", "target": "/y", "type": "bind"}]});
        assert!(!has_auth_mount(&other));
    }

    #[test]
    fn test_has_auth_mount_by_target_in_string_form() {
        let spec = json!({"mounts": ["type=bind,source=/creds,target=/home/node/.claude"]});
        assert!(has_auth_mount(&spec));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Patching
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_patch_appends_mount_and_keeps_backup() {
        let original = r#"{
            // project-authored
            "image": "rust:1",
            "mounts": ["source=/a,target=/b,type=bind"],
        }"#;
        let (_temp, dir) = session_with_spec(original);
        let path = spec_path(&dir);

        let outcome = patch(&path).unwrap();
        let PatchOutcome::Patched { backup } = outcome else {
            panic!("expected a patch");
        };

        assert_eq!(fs::read_to_string(&backup).unwrap(), original);
        let patched = parse_jsonc(&fs::read_to_string(&path).unwrap()).unwrap();
        let mounts = patched["mounts"].as_array().unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0], "source=/a,target=/b,type=bind");
        assert_eq!(mounts[1], auth_mount().as_str());
        assert_eq!(patched["image"], "rust:1");
    }

    #[test]
    fn test_patch_is_idempotent() {
        let (_temp, dir) = session_with_spec(r#"{"image": "x"}"#);
        let path = spec_path(&dir);

        assert!(matches!(patch(&path).unwrap(), PatchOutcome::Patched { .. }));
        let after_first = fs::read_to_string(&path).unwrap();

        assert_eq!(patch(&path).unwrap(), PatchOutcome::AlreadyPatched);
        assert_eq!(fs::read_to_string(&path).unwrap(), after_first);
        assert_eq!(backups(&dir), 1);
    }

    #[test]
    fn test_patch_rejects_non_array_mounts() {
        let (_temp, dir) = session_with_spec(r#"{"mounts": "nope"}"#);
        let err = patch(&spec_path(&dir)).unwrap_err();
        assert!(matches!(err, CoworkError::SpecificationMalformed { .. }));
        assert_eq!(backups(&dir), 0);
    }

    #[test]
    fn test_patch_rejects_invalid_json() {
        let (_temp, dir) = session_with_spec("{ not json");
        assert!(matches!(
            patch(&spec_path(&dir)).unwrap_err(),
            CoworkError::SpecificationMalformed { .. }
        ));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Resolution
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_resolve_missing_mount_auto_patch() {
        let (_temp, dir) = session_with_spec(r#"{"image": "x"}"#);
        let prompter = ScriptedPrompter::new(["2"]);
        let readiness = resolve(&dir, Decision::MissingMount, &prompter).unwrap();
        assert_eq!(readiness, Readiness::Ready);
        assert_eq!(ensure(&dir).unwrap(), Reconciliation::Ready);
    }

    #[test]
    fn test_resolve_missing_mount_manual_leaves_file() {
        let (_temp, dir) = session_with_spec(r#"{"image": "x"}"#);
        let prompter = ScriptedPrompter::new(["1"]);
        let readiness = resolve(&dir, Decision::MissingMount, &prompter).unwrap();
        assert_eq!(readiness, Readiness::WithoutCredentials);
        assert_eq!(fs::read_to_string(spec_path(&dir)).unwrap(), r#"{"image": "x"}"#);
        assert!(prompter
            .transcript()
            .iter()
            .any(|line| line.contains(AUTH_MOUNT_TARGET)));
    }

    #[test]
    fn test_resolve_missing_mount_continue_without() {
        let (_temp, dir) = session_with_spec(r#"{"image": "x"}"#);
        let prompter = ScriptedPrompter::new(["3"]);
        assert_eq!(
            resolve(&dir, Decision::MissingMount, &prompter).unwrap(),
            Readiness::WithoutCredentials
        );
        assert_eq!(backups(&dir), 0);
    }

    #[test]
    fn test_resolve_missing_spec_generates_default() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("app-frontend");
        fs::create_dir_all(&dir).unwrap();

        let readiness = reconcile(&dir, &ScriptedPrompter::new(["y"])).unwrap();

        assert_eq!(readiness, Readiness::Ready);
        let spec = parse_jsonc(&fs::read_to_string(spec_path(&dir)).unwrap()).unwrap();
        assert!(has_auth_mount(&spec));
        assert_eq!(spec["name"], "app-frontend");
        assert_eq!(spec["postCreateCommand"], CLI_INSTALL_COMMAND);
        assert_eq!(spec["mounts"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_resolve_missing_spec_declined() {
        let temp = TempDir::new().unwrap();
        let err = reconcile(temp.path(), &ScriptedPrompter::new(["n"])).unwrap_err();
        assert!(matches!(err, CoworkError::MissingSpecification(_)));
        assert!(!spec_path(temp.path()).exists());
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // JSONC
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_parse_jsonc_strips_comments_but_not_strings() {
        let input = r#"{
            // line comment
            "url": "https://example.com/path", /* block */
            "glob": "src/**/*.rs",
            "list": [1, 2,],
        }"#;
        let value = parse_jsonc(input).unwrap();
        assert_eq!(value["url"], "https://example.com/path");
        assert_eq!(value["glob"], "src/**/*.rs");
        assert_eq!(value["list"], json!([1, 2]));
    }

    #[test]
    fn test_parse_jsonc_keeps_commas_inside_strings() {
        let value = parse_jsonc(r#"{"a": "x, }", "b": "\", ]"}"#).unwrap();
        assert_eq!(value["a"], "x, }");
        assert_eq!(value["b"], "\", ]");
    }
}
