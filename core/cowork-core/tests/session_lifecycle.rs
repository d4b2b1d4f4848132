//! End-to-end session lifecycle against fake git, runtime and terminal.

use cowork_core::config::{Config, ConfigSource};
use cowork_core::devcontainer::{auth_mount, spec_path};
use cowork_core::testing::{FakeRuntime, FakeVcs, ScriptedPrompter};
use cowork_core::{
    AttachOutcome, CleanOutcome, Cowork, CoworkError, CreateOutcome, Multiplexer, SessionStatus,
    StorageConfig,
};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

struct Harness {
    _temp: TempDir,
    repo: PathBuf,
    storage: StorageConfig,
    vcs: FakeVcs,
    runtime: FakeRuntime,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("widget-shop");
        fs::create_dir_all(&repo).unwrap();
        let storage =
            StorageConfig::with_roots(temp.path().join(".cowork"), temp.path().to_path_buf());
        let vcs = FakeVcs::with_repo(&repo, Some("https://example.com/acme/widget-shop.git"))
            .with_spec(&format!(r#"{{"image": "node:20", "mounts": ["{}"]}}"#, auth_mount()));
        Self {
            _temp: temp,
            repo,
            storage,
            vcs,
            runtime: FakeRuntime::new().with_binaries(["tmux"]),
        }
    }

    fn with_runtime(mut self, runtime: FakeRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    fn cowork(&self, answers: &[&str]) -> (Cowork, ScriptedPrompter) {
        let prompter = ScriptedPrompter::new(answers.iter().copied());
        let cowork = Cowork::with_collaborators(
            self.storage.clone(),
            self.repo.clone(),
            Box::new(self.vcs.clone()),
            Box::new(self.runtime.clone()),
            Box::new(prompter.clone()),
        );
        (cowork, prompter)
    }

    fn session_dir(&self, name: &str) -> PathBuf {
        self.storage.session_dir("widget-shop", name)
    }

    fn persisted_sessions(&self) -> Vec<String> {
        let root = fs::canonicalize(&self.repo).unwrap();
        let path = self.storage.project_config_file(&root);
        Config::load(&[ConfigSource::project(path)])
            .unwrap()
            .sessions()
            .to_vec()
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn install_credentials(&self) {
        let path = self.storage.auth_dir().join(".credentials.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "c".repeat(256)).unwrap();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// init
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_init_twice_creates_one_directory_and_entry() {
    let h = Harness::new();
    let (cowork, _) = h.cowork(&[]);

    let first = cowork.init(&Harness::names(&["backend"])).unwrap();
    let second = cowork.init(&Harness::names(&["backend"])).unwrap();

    assert!(matches!(first.entries[0].result, Ok(CreateOutcome::Created { .. })));
    assert!(matches!(second.entries[0].result, Ok(CreateOutcome::AlreadyExists)));
    assert_eq!(h.vcs.clones().len(), 1);
    assert_eq!(h.persisted_sessions(), ["backend"]);
    let session_dirs = fs::read_dir(h.storage.sessions_dir()).unwrap().count();
    assert_eq!(session_dirs, 1);
}

#[test]
fn test_init_duplicates_keep_first_occurrence_order() {
    let h = Harness::new();
    let (cowork, _) = h.cowork(&[]);

    let report = cowork
        .init(&Harness::names(&["b", "a", "b", "c", "a"]))
        .unwrap();

    assert_eq!(report.failures(), 0);
    assert_eq!(h.persisted_sessions(), ["b", "a", "c"]);
}

#[test]
fn test_init_backend_frontend_lists_both_stopped() {
    let h = Harness::new();
    let (cowork, _) = h.cowork(&[]);

    cowork.init(&Harness::names(&["backend", "frontend"])).unwrap();
    let listing = cowork.list().unwrap();

    assert!(h.session_dir("backend").is_dir());
    assert!(h.session_dir("frontend").is_dir());
    assert_eq!(h.vcs.branch_of(&h.session_dir("backend")).as_deref(), Some("backend"));
    assert_eq!(h.vcs.branch_of(&h.session_dir("frontend")).as_deref(), Some("frontend"));

    let summary: Vec<_> = listing
        .sessions
        .iter()
        .map(|s| (s.name.as_str(), s.status, s.branch.as_deref()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("backend", SessionStatus::Stopped, Some("backend")),
            ("frontend", SessionStatus::Stopped, Some("frontend")),
        ]
    );
}

#[test]
fn test_init_continues_after_a_failing_name() {
    let h = Harness::new();
    let (cowork, _) = h.cowork(&[]);

    let report = cowork.init(&Harness::names(&["ok-1", "bad name", "ok-2"])).unwrap();

    assert_eq!(report.failures(), 1);
    assert!(matches!(
        report.entries[1].error(),
        Some(CoworkError::InvalidSessionName { .. })
    ));
    assert_eq!(h.persisted_sessions(), ["ok-1", "ok-2"]);
}

#[test]
fn test_init_outside_repository_fails_up_front() {
    let h = Harness::new();
    let prompter = ScriptedPrompter::new(Vec::<&str>::new());
    let cowork = Cowork::with_collaborators(
        h.storage.clone(),
        PathBuf::from("/not/a/repo"),
        Box::new(h.vcs.clone()),
        Box::new(h.runtime.clone()),
        Box::new(prompter),
    );

    let err = cowork.init(&Harness::names(&["x"])).unwrap_err();
    assert!(matches!(err, CoworkError::NotARepository(_)));
    assert!(err.hint().is_some());
}

#[test]
fn test_init_generates_spec_when_project_has_none() {
    let mut h = Harness::new();
    h.vcs = FakeVcs::with_repo(&h.repo, Some("https://example.com/acme/widget-shop.git"));
    let (cowork, _) = h.cowork(&["y"]);

    cowork.init(&Harness::names(&["docs"])).unwrap();

    let spec = fs::read_to_string(spec_path(&h.session_dir("docs"))).unwrap();
    assert!(spec.contains("/home/node/.claude"));
}

// ─────────────────────────────────────────────────────────────────────────────
// connect
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_connect_twice_attaches_same_multiplexer_session() {
    let h = Harness::new();
    h.install_credentials();
    let (cowork, _) = h.cowork(&[]);
    cowork.init(&Harness::names(&["backend"])).unwrap();

    let first = cowork.connect("backend", None).unwrap();
    let second = cowork.connect("backend", None).unwrap();

    assert_eq!(first.connection.multiplexer, Multiplexer::Tmux);
    assert_eq!(first.connection.outcome, AttachOutcome::Created);
    assert_eq!(second.connection.outcome, AttachOutcome::Attached);
    assert_eq!(h.runtime.multiplexer_sessions(), ["backend"]);
    assert_eq!(h.runtime.running().len(), 1);

    let listing = cowork.list().unwrap();
    assert_eq!(listing.sessions[0].status, SessionStatus::Running);
}

#[test]
fn test_connect_unknown_session() {
    let h = Harness::new();
    let (cowork, _) = h.cowork(&[]);

    let err = cowork.connect("ghost", None).unwrap_err();
    assert!(matches!(err, CoworkError::SessionNotFound(ref n) if n == "ghost"));
    assert!(h.runtime.up_calls().is_empty());
}

#[test]
fn test_connect_bootstraps_missing_credentials() {
    let h = Harness::new();
    let h = {
        let runtime = FakeRuntime::new()
            .with_binaries(["tmux"])
            .with_login_credentials(300);
        h.with_runtime(runtime)
    };
    let (cowork, _) = h.cowork(&[]);
    cowork.init(&Harness::names(&["backend"])).unwrap();

    let report = cowork.connect("backend", Some(Multiplexer::None)).unwrap();

    assert_eq!(report.credentials.action, cowork_core::BrokerAction::Bootstrapped);
    assert!(h.storage.auth_dir().join(".credentials.json").is_file());
    // Login environment was removed; only the session environment remains.
    assert_eq!(h.runtime.removed().len(), 1);
    assert_eq!(h.runtime.running().len(), 1);
    assert_eq!(report.connection.outcome, AttachOutcome::Shell);
}

#[test]
fn test_connect_uses_configured_multiplexer() {
    let h = Harness::new()
        .with_runtime(FakeRuntime::new().with_binaries(["tmux", "zellij"]));
    h.install_credentials();
    fs::create_dir_all(h.storage.root()).unwrap();
    fs::write(h.storage.user_config_file(), "COWORK_MULTIPLEXER=zellij\n").unwrap();
    let (cowork, _) = h.cowork(&[]);
    cowork.init(&Harness::names(&["backend"])).unwrap();

    let report = cowork.connect("backend", None).unwrap();
    assert_eq!(report.connection.multiplexer, Multiplexer::Zellij);

    let report = cowork.connect("backend", Some(Multiplexer::Tmux)).unwrap();
    assert_eq!(report.connection.multiplexer, Multiplexer::Tmux);
}

#[test]
fn test_auth_without_runtime_tool_reports_missing_tool() {
    let h = Harness::new().with_runtime(FakeRuntime::new().without_host_tool("devcontainer"));
    let (cowork, _) = h.cowork(&[]);

    let err = cowork.auth().unwrap_err();

    assert!(matches!(err, CoworkError::MissingExternalTool { ref tool, .. } if tool == "devcontainer"));
    assert!(!err.hint().unwrap().contains("cowork auth"));
    assert!(h.runtime.interactive_commands().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// stop / clean / status
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_stop_stops_only_running_sessions() {
    let h = Harness::new();
    h.install_credentials();
    let (cowork, _) = h.cowork(&[]);
    cowork.init(&Harness::names(&["a", "b"])).unwrap();
    cowork.connect("b", None).unwrap();

    let stopped = cowork.stop().unwrap();

    assert_eq!(stopped, ["b"]);
    assert!(h.runtime.running().is_empty());
    assert!(cowork
        .list()
        .unwrap()
        .sessions
        .iter()
        .all(|s| s.status == SessionStatus::Stopped));
}

#[test]
fn test_clean_yes_removes_everything() {
    let h = Harness::new();
    h.install_credentials();
    let (cowork, _) = h.cowork(&["yes"]);
    cowork.init(&Harness::names(&["a", "b"])).unwrap();
    cowork.connect("a", None).unwrap();

    let outcome = cowork.clean().unwrap();

    let CleanOutcome::Cleaned(removal) = outcome else {
        panic!("expected clean to run, got {:?}", outcome);
    };
    assert_eq!(removal.stopped, ["a"]);
    assert_eq!(removal.removed.len(), 2);
    assert!(!h.session_dir("a").exists());
    assert!(!h.session_dir("b").exists());
    assert!(h.persisted_sessions().is_empty());
    assert!(h.runtime.running().is_empty());
}

#[test]
fn test_clean_anything_else_changes_nothing() {
    for answer in ["y", "YES please", "no", ""] {
        let h = Harness::new();
        let (cowork, prompter) = h.cowork(&[answer]);
        cowork.init(&Harness::names(&["a", "b"])).unwrap();

        assert_eq!(cowork.clean().unwrap(), CleanOutcome::Cancelled, "{answer:?}");
        assert!(h.session_dir("a").is_dir());
        assert!(h.session_dir("b").is_dir());
        assert_eq!(h.persisted_sessions(), ["a", "b"]);
        assert!(prompter
            .transcript()
            .iter()
            .any(|line| line.contains("widget-shop-a")));
    }
}

#[test]
fn test_clean_refuses_config_with_escaping_session_names() {
    let h = Harness::new();
    let (cowork, prompter) = h.cowork(&["yes"]);
    cowork.init(&Harness::names(&["x"])).unwrap();

    let victim = h.repo.parent().unwrap().join("precious");
    fs::create_dir_all(&victim).unwrap();
    let root = fs::canonicalize(&h.repo).unwrap();
    fs::write(
        h.storage.project_config_file(&root),
        "COWORK_SESSIONS=(\n  \"x/../../../precious\"\n  x\n)\n",
    )
    .unwrap();

    let err = cowork.clean().unwrap_err();

    assert!(matches!(err, CoworkError::ConfigMalformed { .. }));
    assert!(victim.is_dir());
    assert!(h.session_dir("x").is_dir());
    assert!(prompter.questions().is_empty());
}

#[test]
fn test_connect_rejects_path_like_names() {
    let h = Harness::new();
    h.install_credentials();
    let (cowork, _) = h.cowork(&[]);
    cowork.init(&Harness::names(&["x"])).unwrap();

    let err = cowork.connect("x/..", None).unwrap_err();
    assert!(matches!(err, CoworkError::InvalidSessionName { .. }));
    assert!(h.runtime.up_calls().is_empty());
}

#[test]
fn test_clean_with_no_sessions() {
    let h = Harness::new();
    let (cowork, prompter) = h.cowork(&[]);
    assert_eq!(cowork.clean().unwrap(), CleanOutcome::NothingToClean);
    assert!(prompter.questions().is_empty());
}

#[test]
fn test_status_counts_and_identity() {
    let h = Harness::new();
    h.install_credentials();
    let (cowork, _) = h.cowork(&[]);
    cowork.init(&Harness::names(&["a", "b"])).unwrap();
    cowork.connect("a", None).unwrap();
    fs::remove_dir_all(h.session_dir("b")).unwrap();

    let status = cowork.status().unwrap();

    assert_eq!(status.listing.identity.slug, "widget-shop");
    assert_eq!(status.listing.identity.hash.len(), 8);
    assert_eq!(status.listing.count(SessionStatus::Running), 1);
    assert_eq!(status.listing.count(SessionStatus::Missing), 1);
    assert!(matches!(
        status.credentials,
        cowork_core::CredentialState::Found { centralized: true, .. }
    ));
}
