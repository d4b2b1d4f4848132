//! Layered configuration store.
//!
//! Two documents share one grammar: the user document (`~/.cowork/.cowork.conf`)
//! and the project document (`<repo>/.cowork/.cowork.conf`). Sources are applied
//! in the order given, so project values overwrite user values for the same key.
//! The session list is project-scoped; a `COWORK_SESSIONS` line in a user
//! document is ignored.
//!
//! ## File Format
//!
//! ```text
//! # comments and blank lines are ignored
//! COWORK_MULTIPLEXER="tmux"
//! COWORK_SESSIONS=(
//!   "backend"
//!   "frontend"
//! )
//! ```
//!
//! The grammar is deliberately a strict subset of shell assignments. Anything
//! that would execute when sourced (`$(...)`, backticks, `;`, `export`) is
//! rejected with [`CoworkError::ConfigMalformed`].
//!
//! The store rewrites only the keys it manages. Unknown `COWORK_*` keys are
//! carried through a load/save cycle untouched; keys outside that prefix are
//! ignored with a warning.

use crate::error::{CoworkError, Result};
use crate::multiplexer::Multiplexer;
use crate::patterns::{RE_BARE_VALUE, RE_CONFIG_KEY};
use crate::sessions::validate_session_name;
use crate::storage::write_atomic;
use fs_err as fs;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const KEY_PREFIX: &str = "COWORK_";
pub const KEY_MULTIPLEXER: &str = "COWORK_MULTIPLEXER";
pub const KEY_SESSIONS: &str = "COWORK_SESSIONS";

const FILE_HEADER: &str =
    "# cowork configuration. cowork rewrites the keys it manages; other COWORK_* keys are kept.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    User,
    Project,
}

/// A candidate config file and the layer it belongs to.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub scope: ConfigScope,
}

impl ConfigSource {
    pub fn user(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scope: ConfigScope::User,
        }
    }

    pub fn project(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scope: ConfigScope::Project,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Scalar(String),
    List(Vec<String>),
}

/// One parsed config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    pub multiplexer: Option<Multiplexer>,
    pub sessions: Vec<String>,
    /// Unmanaged `COWORK_*` keys, preserved verbatim.
    pub extra: BTreeMap<String, ConfigValue>,
}

impl ConfigDocument {
    /// Reads a document from disk. A missing file is an empty document.
    pub fn read(path: &Path, scope: ConfigScope) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file absent, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| CoworkError::io(format!("reading {}", path.display()), e))?;
        Self::parse(path, &content, scope)
    }

    pub fn parse(path: &Path, content: &str, scope: ConfigScope) -> Result<Self> {
        let mut doc = ConfigDocument::default();
        let mut lines = content.lines().enumerate();

        while let Some((index, raw)) = lines.next() {
            let line_no = index + 1;
            let malformed = |line: usize, details: String| CoworkError::ConfigMalformed {
                path: path.to_path_buf(),
                line,
                details,
            };

            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, rest) = line
                .split_once('=')
                .ok_or_else(|| malformed(line_no, "expected KEY=value".to_string()))?;
            if !RE_CONFIG_KEY.is_match(key) {
                return Err(malformed(line_no, format!("invalid key {:?}", key)));
            }

            let value = if let Some(list_body) = rest.strip_prefix('(') {
                let mut parsed = tokenize(list_body, true).map_err(|e| malformed(line_no, e))?;
                let mut items = std::mem::take(&mut parsed.values);
                while !parsed.closed {
                    let Some((next_index, next_raw)) = lines.next() else {
                        return Err(malformed(line_no, "unterminated list".to_string()));
                    };
                    parsed = tokenize(next_raw, true).map_err(|e| malformed(next_index + 1, e))?;
                    items.append(&mut parsed.values);
                }
                ConfigValue::List(items)
            } else {
                let parsed = tokenize(rest, false).map_err(|e| malformed(line_no, e))?;
                match parsed.values.len() {
                    0 => ConfigValue::Scalar(String::new()),
                    1 => ConfigValue::Scalar(parsed.values.into_iter().next().unwrap_or_default()),
                    _ => {
                        return Err(malformed(
                            line_no,
                            "scalar value has more than one word; quote it".to_string(),
                        ))
                    }
                }
            };

            match (key, value) {
                (KEY_MULTIPLEXER, ConfigValue::Scalar(raw)) => {
                    let choice = raw
                        .parse::<Multiplexer>()
                        .map_err(|e| malformed(line_no, e))?;
                    doc.multiplexer = Some(choice);
                }
                (KEY_SESSIONS, ConfigValue::List(names)) => {
                    if scope == ConfigScope::User {
                        warn!(path = %path.display(), "Ignoring session list in user config");
                    } else {
                        for name in &names {
                            validate_session_name(name)
                                .map_err(|e| malformed(line_no, e.to_string()))?;
                        }
                        doc.sessions = dedup_preserving_order(names);
                    }
                }
                (KEY_MULTIPLEXER, ConfigValue::List(_)) => {
                    return Err(malformed(line_no, format!("{} must be a scalar", key)));
                }
                (KEY_SESSIONS, ConfigValue::Scalar(_)) => {
                    return Err(malformed(line_no, format!("{} must be a list", key)));
                }
                (other, value) if other.starts_with(KEY_PREFIX) => {
                    doc.extra.insert(other.to_string(), value);
                }
                (other, _) => {
                    warn!(path = %path.display(), key = other, "Ignoring unknown config key");
                }
            }
        }

        Ok(doc)
    }

    /// Serializes the document. The session list is written for project
    /// documents only, always as an explicit block.
    pub fn render(&self, scope: ConfigScope) -> String {
        let mut out = String::new();
        out.push_str(FILE_HEADER);
        out.push('\n');

        if let Some(multiplexer) = self.multiplexer {
            out.push_str(&format!("{}={}\n", KEY_MULTIPLEXER, quote(multiplexer.as_str())));
        }

        for (key, value) in &self.extra {
            match value {
                ConfigValue::Scalar(v) => out.push_str(&format!("{}={}\n", key, quote(v))),
                ConfigValue::List(items) => render_list(&mut out, key, items),
            }
        }

        if scope == ConfigScope::Project {
            render_list(&mut out, KEY_SESSIONS, &dedup_preserving_order(self.sessions.clone()));
        }

        out
    }

    fn merge_from(&mut self, other: ConfigDocument) {
        if other.multiplexer.is_some() {
            self.multiplexer = other.multiplexer;
        }
        if !other.sessions.is_empty() {
            self.sessions = other.sessions;
        }
        self.extra.extend(other.extra);
    }
}

/// Layered configuration, passed by value into each operation.
#[derive(Debug, Clone, Default)]
pub struct Config {
    user: ConfigDocument,
    project: ConfigDocument,
    project_path: Option<PathBuf>,
}

impl Config {
    /// Loads sources in order. Later sources overwrite earlier ones key by key.
    pub fn load(sources: &[ConfigSource]) -> Result<Self> {
        let mut config = Config::default();
        for source in sources {
            let doc = ConfigDocument::read(&source.path, source.scope)?;
            match source.scope {
                ConfigScope::User => config.user.merge_from(doc),
                ConfigScope::Project => {
                    config.project.merge_from(doc);
                    config.project_path = Some(source.path.clone());
                }
            }
        }
        Ok(config)
    }

    /// Effective multiplexer preference: project first, then user.
    pub fn multiplexer(&self) -> Option<Multiplexer> {
        self.project.multiplexer.or(self.user.multiplexer)
    }

    /// Merged lookup of any key, project winning over user.
    pub fn value(&self, key: &str) -> Option<ConfigValue> {
        match key {
            KEY_MULTIPLEXER => self
                .multiplexer()
                .map(|m| ConfigValue::Scalar(m.as_str().to_string())),
            KEY_SESSIONS => Some(ConfigValue::List(self.project.sessions.clone())),
            other => self
                .project
                .extra
                .get(other)
                .or_else(|| self.user.extra.get(other))
                .cloned(),
        }
    }

    pub fn sessions(&self) -> &[String] {
        &self.project.sessions
    }

    pub fn project_path(&self) -> Option<&Path> {
        self.project_path.as_deref()
    }

    pub fn project_document(&self) -> &ConfigDocument {
        &self.project
    }

    /// Returns a config with `name` appended to the session list, unless
    /// already present.
    pub fn with_session(mut self, name: &str) -> Self {
        let mut names = std::mem::take(&mut self.project.sessions);
        names.push(name.to_string());
        self.project.sessions = dedup_preserving_order(names);
        self
    }

    pub fn without_sessions(mut self) -> Self {
        self.project.sessions.clear();
        self
    }

    /// Writes the project document back to the project config file.
    pub fn persist(&self) -> Result<()> {
        let path = self
            .project_path
            .as_deref()
            .ok_or_else(|| CoworkError::ConfigWriteFailed {
                path: PathBuf::new(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no project configuration path resolved",
                ),
            })?;
        save(path, &self.project, ConfigScope::Project)
    }
}

/// Atomically writes `doc` to `path` (temp file in the same directory, then rename).
pub fn save(path: &Path, doc: &ConfigDocument, scope: ConfigScope) -> Result<()> {
    write_atomic(path, doc.render(scope).as_bytes()).map_err(|source| {
        CoworkError::ConfigWriteFailed {
            path: path.to_path_buf(),
            source,
        }
    })?;
    debug!(path = %path.display(), sessions = doc.sessions.len(), "Config saved");
    Ok(())
}

/// Removes later duplicates, keeping each name at its first position.
pub fn dedup_preserving_order<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

fn render_list(out: &mut String, key: &str, items: &[String]) {
    if items.is_empty() {
        out.push_str(&format!("{}=()\n", key));
        return;
    }
    out.push_str(&format!("{}=(\n", key));
    for item in items {
        out.push_str(&format!("  {}\n", quote(item)));
    }
    out.push_str(")\n");
}

fn quote(value: &str) -> String {
    if value.contains(['"', '$', '`', '\\']) {
        format!("'{}'", value)
    } else {
        format!("\"{}\"", value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokenizer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Tokens {
    values: Vec<String>,
    /// An unquoted `)` was seen (list context only).
    closed: bool,
}

fn tokenize(input: &str, in_list: bool) -> std::result::Result<Tokens, String> {
    let mut tokens = Tokens::default();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '#' {
            break;
        }
        if tokens.closed {
            return Err("unexpected text after ')'".to_string());
        }
        if c == ')' {
            if !in_list {
                return Err("unexpected ')'".to_string());
            }
            chars.next();
            tokens.closed = true;
            continue;
        }

        let token = match c {
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(ch @ ('$' | '`' | '\\')) => {
                            return Err(format!("'{}' is not allowed in double quotes", ch))
                        }
                        Some(ch) => value.push(ch),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
                value
            }
            '\'' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => value.push(ch),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
                value
            }
            _ => {
                let mut value = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || (in_list && ch == ')') {
                        break;
                    }
                    value.push(ch);
                    chars.next();
                }
                if !RE_BARE_VALUE.is_match(&value) {
                    return Err(format!("unsupported characters in {:?}; quote the value", value));
                }
                value
            }
        };

        if let Some(&next) = chars.peek() {
            if !next.is_whitespace() && !(in_list && next == ')') {
                return Err(format!("unexpected {:?} after value", next));
            }
        }
        tokens.values.push(token);
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(content: &str, scope: ConfigScope) -> Result<ConfigDocument> {
        ConfigDocument::parse(Path::new("/tmp/.cowork.conf"), content, scope)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Parsing
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_parse_scalar_and_multiline_list() {
        let doc = parse(
            "# header\nCOWORK_MULTIPLEXER=\"zellij\"\n\nCOWORK_SESSIONS=(\n  \"a\"\n  b-c\n)\n",
            ConfigScope::Project,
        )
        .unwrap();
        assert_eq!(doc.multiplexer, Some(Multiplexer::Zellij));
        assert_eq!(doc.sessions, vec!["a", "b-c"]);
    }

    #[test]
    fn test_parse_inline_list() {
        let doc = parse("COWORK_SESSIONS=(\"x\" 'y' z) # trailing", ConfigScope::Project).unwrap();
        assert_eq!(doc.sessions, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_parse_empty_list() {
        let doc = parse("COWORK_SESSIONS=()", ConfigScope::Project).unwrap();
        assert!(doc.sessions.is_empty());
    }

    #[test]
    fn test_parse_dedups_session_list() {
        let doc = parse("COWORK_SESSIONS=(a b a c b)", ConfigScope::Project).unwrap();
        assert_eq!(doc.sessions, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_user_scope_ignores_session_list() {
        let doc = parse("COWORK_SESSIONS=(a b)", ConfigScope::User).unwrap();
        assert!(doc.sessions.is_empty());
    }

    #[test]
    fn test_unknown_prefixed_key_is_kept() {
        let doc = parse("COWORK_EDITOR=\"code\"\nOTHER=1\n", ConfigScope::User).unwrap();
        assert_eq!(
            doc.extra.get("COWORK_EDITOR"),
            Some(&ConfigValue::Scalar("code".to_string()))
        );
        assert!(!doc.extra.contains_key("OTHER"));
    }

    #[test]
    fn test_rejects_command_substitution() {
        let err = parse("COWORK_MULTIPLEXER=$(rm -rf ~)", ConfigScope::User).unwrap_err();
        assert!(matches!(err, CoworkError::ConfigMalformed { line: 1, .. }));
    }

    #[test]
    fn test_rejects_dollar_in_double_quotes() {
        assert!(parse("COWORK_X=\"$HOME\"", ConfigScope::User).is_err());
    }

    #[test]
    fn test_rejects_backticks_and_semicolons() {
        assert!(parse("COWORK_X=`id`", ConfigScope::User).is_err());
        assert!(parse("COWORK_X=a;b", ConfigScope::User).is_err());
        assert!(parse("COWORK_X=\"a\";reboot", ConfigScope::User).is_err());
    }

    #[test]
    fn test_bare_values_need_quotes_for_commas_and_equals() {
        assert!(parse("COWORK_X=a,b", ConfigScope::User).is_err());
        assert!(parse("COWORK_X=k=v", ConfigScope::User).is_err());
        let doc = parse("COWORK_X=\"a,b=c\"", ConfigScope::User).unwrap();
        assert_eq!(doc.extra.get("COWORK_X"), Some(&ConfigValue::Scalar("a,b=c".to_string())));
    }

    #[test]
    fn test_rejects_non_assignment_lines() {
        let err = parse("COWORK_X=1\nsource ~/.bashrc\n", ConfigScope::User).unwrap_err();
        assert!(matches!(err, CoworkError::ConfigMalformed { line: 2, .. }));
        assert!(parse("export COWORK_X=1", ConfigScope::User).is_err());
    }

    #[test]
    fn test_rejects_unterminated_list() {
        let err = parse("COWORK_SESSIONS=(\n  a\n", ConfigScope::Project).unwrap_err();
        assert!(matches!(err, CoworkError::ConfigMalformed { line: 1, .. }));
    }

    #[test]
    fn test_rejects_session_names_that_escape_the_sessions_dir() {
        let err = parse(
            "COWORK_SESSIONS=(\n  x\n  \"x/../../../precious\"\n)\n",
            ConfigScope::Project,
        )
        .unwrap_err();
        assert!(matches!(err, CoworkError::ConfigMalformed { line: 1, .. }));
        assert!(parse("COWORK_SESSIONS=(../up)", ConfigScope::Project).is_err());
        assert!(parse("COWORK_SESSIONS=(/abs/path)", ConfigScope::Project).is_err());
    }

    #[test]
    fn test_rejects_invalid_multiplexer() {
        assert!(parse("COWORK_MULTIPLEXER=screen", ConfigScope::User).is_err());
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Layering
    // ─────────────────────────────────────────────────────────────────────────────

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_user_only_key_appears_in_merged_result() {
        let temp = TempDir::new().unwrap();
        let user = write(&temp, "user.conf", "COWORK_MULTIPLEXER=tmux\nCOWORK_EDITOR=vim\n");
        let project = write(&temp, "project.conf", "COWORK_SESSIONS=(a)\n");

        let config =
            Config::load(&[ConfigSource::user(user), ConfigSource::project(project)]).unwrap();

        assert_eq!(config.multiplexer(), Some(Multiplexer::Tmux));
        assert_eq!(
            config.value("COWORK_EDITOR"),
            Some(ConfigValue::Scalar("vim".to_string()))
        );
    }

    #[test]
    fn test_project_value_wins_over_user() {
        let temp = TempDir::new().unwrap();
        let user = write(&temp, "user.conf", "COWORK_MULTIPLEXER=tmux\nCOWORK_EDITOR=vim\n");
        let project = write(&temp, "project.conf", "COWORK_MULTIPLEXER=none\nCOWORK_EDITOR=code\n");

        let config =
            Config::load(&[ConfigSource::user(user), ConfigSource::project(project)]).unwrap();

        assert_eq!(config.multiplexer(), Some(Multiplexer::None));
        assert_eq!(
            config.value("COWORK_EDITOR"),
            Some(ConfigValue::Scalar("code".to_string()))
        );
    }

    #[test]
    fn test_missing_files_load_as_defaults() {
        let temp = TempDir::new().unwrap();
        let config = Config::load(&[
            ConfigSource::user(temp.path().join("nope.conf")),
            ConfigSource::project(temp.path().join("nope2.conf")),
        ])
        .unwrap();
        assert_eq!(config.multiplexer(), None);
        assert!(config.sessions().is_empty());
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Saving
    // ─────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_save_then_load_round_trips_session_lists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".cowork").join(".cowork.conf");

        let cases: Vec<Vec<&str>> = vec![
            vec![],
            vec!["solo"],
            vec!["backend", "frontend", "fix-login-bug", "v2.1", "a_b"],
        ];
        for names in cases {
            let doc = ConfigDocument {
                sessions: names.iter().map(|s| s.to_string()).collect(),
                ..ConfigDocument::default()
            };
            save(&path, &doc, ConfigScope::Project).unwrap();
            let loaded = Config::load(&[ConfigSource::project(&path)]).unwrap();
            assert_eq!(loaded.sessions(), names.as_slice());
        }
    }

    #[test]
    fn test_save_preserves_foreign_prefixed_keys() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            "project.conf",
            "COWORK_IMAGE='my/image:1'\nCOWORK_TAGS=(x y)\nCOWORK_SESSIONS=(a)\n",
        );

        let config = Config::load(&[ConfigSource::project(&path)])
            .unwrap()
            .with_session("b");
        config.persist().unwrap();

        let reloaded = ConfigDocument::read(&path, ConfigScope::Project).unwrap();
        assert_eq!(reloaded.sessions, vec!["a", "b"]);
        assert_eq!(
            reloaded.extra.get("COWORK_IMAGE"),
            Some(&ConfigValue::Scalar("my/image:1".to_string()))
        );
        assert_eq!(
            reloaded.extra.get("COWORK_TAGS"),
            Some(&ConfigValue::List(vec!["x".to_string(), "y".to_string()]))
        );
    }

    #[test]
    fn test_user_render_never_writes_sessions() {
        let doc = ConfigDocument {
            multiplexer: Some(Multiplexer::Tmux),
            sessions: vec!["leak".to_string()],
            ..ConfigDocument::default()
        };
        let rendered = doc.render(ConfigScope::User);
        assert!(rendered.contains("COWORK_MULTIPLEXER=\"tmux\""));
        assert!(!rendered.contains(KEY_SESSIONS));
    }

    #[test]
    fn test_persist_without_project_path_fails() {
        let config = Config::default();
        assert!(matches!(
            config.persist(),
            Err(CoworkError::ConfigWriteFailed { .. })
        ));
    }

    #[test]
    fn test_with_session_keeps_first_occurrence() {
        let config = Config::default()
            .with_session("a")
            .with_session("b")
            .with_session("a");
        assert_eq!(config.sessions(), ["a", "b"]);
    }

    #[test]
    fn test_dedup_preserving_order() {
        let names = ["x", "y", "x", "z", "y"].iter().map(|s| s.to_string());
        assert_eq!(dedup_preserving_order(names), vec!["x", "y", "z"]);
    }
}
