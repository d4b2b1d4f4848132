//! Compiled regex patterns for validating names and config lines.
//!
//! These patterns are compiled once on first use and reused throughout
//! the application.

use once_cell::sync::Lazy;
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════════════
// Config Grammar
// ═══════════════════════════════════════════════════════════════════════════════

/// Shell-style variable name on the left of `=`.
pub static RE_CONFIG_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").unwrap());

/// Characters allowed in an unquoted config value.
pub static RE_BARE_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._/:@+-]+$").unwrap());

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// A session name doubles as a branch name, directory suffix and multiplexer
/// session name, so it is kept to a conservative token.
pub static RE_SESSION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

/// Runs of characters that are not allowed in a project slug.
pub static RE_SLUG_INVALID: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
