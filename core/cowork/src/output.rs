//! Plain-text rendering of operation results.

use cowork_core::{
    BrokerAction, CleanOutcome, ConnectReport, CoworkError, CreateOutcome, CredentialReport,
    CredentialState, Health, InitReport, Readiness, Session, SessionListing, SessionStatus,
    StatusReport,
};

pub fn error(err: &CoworkError) {
    eprintln!("error: {}", err);
    if let Some(hint) = err.hint() {
        eprintln!("hint: {}", hint);
    }
}

pub fn auth(report: &CredentialReport) {
    match &report.action {
        BrokerAction::AlreadyCentral => println!("Credentials already in place."),
        BrokerAction::Centralized { from } => {
            println!("Copied credentials from {}", from.display())
        }
        BrokerAction::Bootstrapped => println!("Logged in and saved new credentials."),
    }
    println!("  location: {}", report.path.display());
    println!("  health:   {}", report.health);
    if let Health::Stale { .. } = report.health {
        println!("Run `cowork auth` after logging in again to refresh them.");
    }
}

pub fn init(report: &InitReport) {
    for entry in &report.entries {
        match &entry.result {
            Ok(CreateOutcome::Created { readiness, .. }) => {
                println!("created  {}", entry.name);
                if *readiness == Readiness::WithoutCredentials {
                    println!("         (environment has no credential mount)");
                }
            }
            Ok(CreateOutcome::AlreadyExists) => println!("exists   {} (skipped)", entry.name),
            Err(e) => println!("failed   {}: {}", entry.name, e),
        }
    }
    let failures = report.failures();
    if failures > 0 {
        eprintln!("{} of {} sessions failed", failures, report.entries.len());
    }
}

pub fn list(listing: &SessionListing) {
    if listing.sessions.is_empty() {
        println!("No sessions for {}. Create one with `cowork init <name>`.", listing.identity.name);
        return;
    }
    session_table(&listing.sessions);
}

pub fn connect(report: &ConnectReport) {
    println!(
        "Left session {} ({}, exit status {})",
        report.session, report.connection.multiplexer, report.connection.exit_status
    );
}

pub fn status(report: &StatusReport) {
    let identity = &report.listing.identity;
    println!("Project   {} ({})", identity.name, identity.slug);
    println!("  root    {}", identity.root.display());
    println!("  hash    {}", identity.hash);
    println!("  origin  {}", identity.origin_url);

    match &report.credentials {
        CredentialState::Absent => println!(
            "Credentials  none found (expected in {}); run `cowork auth`",
            report.auth_dir.display()
        ),
        CredentialState::Found {
            path,
            health,
            centralized,
        } => {
            println!("Credentials  {}", health);
            println!("  location  {}", path.display());
            if !centralized {
                println!("  not yet shared with sessions; run `cowork auth`");
            }
        }
    }

    match report.multiplexer {
        Some(m) => println!("Multiplexer  {}", m),
        None => println!("Multiplexer  auto-detect"),
    }

    let listing = &report.listing;
    println!(
        "Sessions  {} running, {} stopped, {} missing",
        listing.count(SessionStatus::Running),
        listing.count(SessionStatus::Stopped),
        listing.count(SessionStatus::Missing)
    );
    if !listing.sessions.is_empty() {
        session_table(&listing.sessions);
    }
}

pub fn stop(stopped: &[String]) {
    if stopped.is_empty() {
        println!("No running sessions.");
    } else {
        println!("Stopped {} session(s): {}", stopped.len(), stopped.join(", "));
    }
}

pub fn clean(outcome: &CleanOutcome) {
    match outcome {
        CleanOutcome::NothingToClean => println!("No sessions to remove."),
        CleanOutcome::Cancelled => println!("Nothing removed."),
        CleanOutcome::Cleaned(removal) => {
            if !removal.stopped.is_empty() {
                println!("Stopped {}", removal.stopped.join(", "));
            }
            println!("Removed {} session director(ies).", removal.removed.len());
        }
    }
}

fn session_table(sessions: &[Session]) {
    let name_width = sessions.iter().map(|s| s.name.len()).max().unwrap_or(0).max(4);
    let branch_width = sessions
        .iter()
        .map(|s| s.branch.as_deref().unwrap_or("-").len())
        .max()
        .unwrap_or(0)
        .max(6);

    println!(
        "{:<name_width$}  {:<7}  {:<branch_width$}  PATH",
        "NAME", "STATUS", "BRANCH"
    );
    for session in sessions {
        println!(
            "{:<name_width$}  {:<7}  {:<branch_width$}  {}",
            session.name,
            session.status.to_string(),
            session.branch.as_deref().unwrap_or("-"),
            session.dir.display()
        );
    }
}
