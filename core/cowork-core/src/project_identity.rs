//! Project identity derived from the enclosing repository.
//!
//! The slug namespaces session directories (`{slug}-{session}`), so it must be
//! deterministic for a given repository. The hash is the first 8 hex digits of
//! the MD5 of the canonical repository root, which tells apart two checkouts
//! that share a directory name.

use crate::error::{CoworkError, Result};
use crate::external::Vcs;
use crate::patterns::RE_SLUG_INVALID;
use std::path::{Path, PathBuf};

const HASH_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIdentity {
    /// Repository directory name, as the user sees it.
    pub name: String,
    pub slug: String,
    pub hash: String,
    pub origin_url: String,
    pub root: PathBuf,
}

/// Resolves the identity of the repository enclosing `cwd`.
///
/// Fails with `NotARepository` outside a repository and with `NoRemote` when
/// the origin URL is missing or empty.
pub fn resolve_identity(vcs: &dyn Vcs, cwd: &Path) -> Result<ProjectIdentity> {
    let root = vcs
        .repository_root(cwd)
        .ok_or_else(|| CoworkError::NotARepository(cwd.to_path_buf()))?;
    let root = canonicalize_path(&root);

    let origin_url = vcs
        .remote_origin_url(&root)?
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| CoworkError::NoRemote(root.clone()))?;

    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string());

    Ok(ProjectIdentity {
        slug: slugify(&name),
        hash: path_hash(&root),
        name,
        origin_url,
        root,
    })
}

/// Lowercase `[a-z0-9-]`, runs of other characters collapsed to one dash,
/// no leading or trailing dashes. Falls back to `project` when nothing is left.
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    let slug = RE_SLUG_INVALID.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug.to_string()
    }
}

/// Short content hash of a repository root path.
pub fn path_hash(path: &Path) -> String {
    let digest = format!("{:x}", md5::compute(path.to_string_lossy().as_bytes()));
    digest[..HASH_LEN].to_string()
}

pub(crate) fn canonicalize_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeVcs;

    #[test]
    fn test_slugify_lowercases_and_collapses() {
        assert_eq!(slugify("My Project"), "my-project");
        assert_eq!(slugify("__Weird__Name!!"), "weird-name");
        assert_eq!(slugify("api.v2"), "api-v2");
        assert_eq!(slugify("already-fine"), "already-fine");
    }

    #[test]
    fn test_slugify_empty_falls_back() {
        assert_eq!(slugify("---"), "project");
        assert_eq!(slugify("日本"), "project");
    }

    #[test]
    fn test_path_hash_is_stable_and_short() {
        let a = path_hash(Path::new("/src/app"));
        assert_eq!(a.len(), 8);
        assert_eq!(a, path_hash(Path::new("/src/app")));
        assert_ne!(a, path_hash(Path::new("/src/app2")));
    }

    #[test]
    fn test_resolve_identity_outside_repository() {
        let vcs = FakeVcs::default();
        let err = resolve_identity(&vcs, Path::new("/nowhere")).unwrap_err();
        assert!(matches!(err, CoworkError::NotARepository(_)));
    }

    #[test]
    fn test_resolve_identity_requires_origin() {
        let temp = tempfile::TempDir::new().unwrap();
        let vcs = FakeVcs::with_repo(temp.path(), None);
        let err = resolve_identity(&vcs, temp.path()).unwrap_err();
        assert!(matches!(err, CoworkError::NoRemote(_)));

        let vcs = FakeVcs::with_repo(temp.path(), Some("   "));
        let err = resolve_identity(&vcs, temp.path()).unwrap_err();
        assert!(matches!(err, CoworkError::NoRemote(_)));
    }

    #[test]
    fn test_resolve_identity_derives_slug_from_root() {
        let temp = tempfile::TempDir::new().unwrap();
        let repo = temp.path().join("My_App");
        std::fs::create_dir_all(&repo).unwrap();
        let vcs = FakeVcs::with_repo(&repo, Some("git@example.com:me/my-app.git"));

        let identity = resolve_identity(&vcs, &repo).unwrap();

        assert_eq!(identity.name, "My_App");
        assert_eq!(identity.slug, "my-app");
        assert_eq!(identity.origin_url, "git@example.com:me/my-app.git");
        assert_eq!(identity.hash, path_hash(&canonicalize_path(&repo)));
    }
}
