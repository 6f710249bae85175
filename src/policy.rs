//! Directory whitelist and path authorization.
//!
//! An [`AccessPolicy`] is an immutable set of allowed directories, each with
//! its own deny patterns. It is built and validated once; reconfiguring means
//! building a complete new policy and swapping it into the [`PathValidator`]
//! in one step.
//!
//! # Authorization order
//!
//! 1. Control characters, percent-encoded dots/slashes, or any `..`
//!    component in the requested path → `PathTraversal`.
//! 2. Canonicalize: resolve `.`, `..` and symlinks for the deepest existing
//!    ancestor, then append the remaining components lexically.
//! 3. The canonical path must equal or descend from an allowed directory,
//!    compared component by component → otherwise `OutsideWhitelist`.
//! 4. Every component below that directory is matched against its deny
//!    patterns → `DeniedPattern`.
//! 5. The path must exist → otherwise `NotFound`.
//!
//! Only an [`Authorized`](Decision::Allowed) result yields an
//! [`AuthorizedPath`], and the loader only accepts that type, so nothing can
//! stat or read a path that has not been through this gate.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use docfence_core::events::{Event, ObservabilitySink};
use docfence_core::{DenialReason, Error, Result};

use crate::config::SecurityConfig;

/// A canonical path that passed authorization.
///
/// Only [`AccessPolicy::authorize`] constructs these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AuthorizedPath(PathBuf);

impl AuthorizedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Lossy UTF-8 rendering used as document identity.
    pub fn key(&self) -> String {
        self.0.to_string_lossy().into_owned()
    }
}

impl AsRef<Path> for AuthorizedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for AuthorizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Result of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed(AuthorizedPath),
    Denied(DenialReason),
}

impl Decision {
    /// Turn a denial into a typed error for `requested`.
    pub fn into_result(self, requested: &Path) -> Result<AuthorizedPath> {
        match self {
            Decision::Allowed(p) => Ok(p),
            Decision::Denied(reason) => Err(Error::Authorization {
                path: requested.display().to_string(),
                reason,
            }),
        }
    }
}

/// One whitelisted directory and its deny patterns.
#[derive(Debug)]
pub struct AllowedDirectory {
    root: PathBuf,
    patterns: Vec<String>,
    deny: GlobSet,
}

impl AllowedDirectory {
    /// Canonicalize `path` (which must exist and be a directory) and compile
    /// `deny` into a glob set matched against single path components.
    pub fn new(path: &Path, deny: &[String]) -> Result<Self> {
        let root = std::fs::canonicalize(path).map_err(|e| {
            Error::Config(format!("allowed directory {}: {}", path.display(), e))
        })?;
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "allowed directory {} is not a directory",
                root.display()
            )));
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in deny {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| Error::Config(format!("deny pattern '{}': {}", pattern, e)))?;
            builder.add(glob);
        }
        let deny_set = builder
            .build()
            .map_err(|e| Error::Config(format!("deny patterns: {}", e)))?;
        Ok(Self {
            root,
            patterns: deny.to_vec(),
            deny: deny_set,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether any component of `canonical` below the root is denied.
    fn denies(&self, canonical: &Path) -> bool {
        let Ok(relative) = canonical.strip_prefix(&self.root) else {
            return false;
        };
        relative.components().any(|c| match c {
            Component::Normal(name) => self.deny.is_match(Path::new(name)),
            _ => false,
        })
    }
}

/// Immutable whitelist of directories.
#[derive(Debug)]
pub struct AccessPolicy {
    allowed: Vec<AllowedDirectory>,
}

impl AccessPolicy {
    pub fn new(allowed: Vec<AllowedDirectory>) -> Result<Self> {
        if allowed.is_empty() {
            return Err(Error::Config(
                "access policy needs at least one allowed directory".to_string(),
            ));
        }
        Ok(Self { allowed })
    }

    /// Build a policy from the `[security]` section. Relative paths resolve
    /// against the current directory.
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        let dirs = config
            .allowed
            .iter()
            .map(|a| AllowedDirectory::new(&a.path, &a.deny))
            .collect::<Result<Vec<_>>>()?;
        Self::new(dirs)
    }

    pub fn allowed(&self) -> &[AllowedDirectory] {
        &self.allowed
    }

    /// Decide whether `path` may be touched.
    pub fn authorize(&self, path: &Path) -> Decision {
        if has_traversal(path) {
            return Decision::Denied(DenialReason::PathTraversal);
        }
        let canonical = match canonicalize_lenient(path) {
            Ok(p) => p,
            Err(_) => return Decision::Denied(DenialReason::NotFound),
        };

        // Prefer the most specific allowed directory.
        let Some(dir) = self
            .allowed
            .iter()
            .filter(|d| canonical.starts_with(&d.root))
            .max_by_key(|d| d.root.components().count())
        else {
            return Decision::Denied(DenialReason::OutsideWhitelist);
        };

        if dir.denies(&canonical) {
            return Decision::Denied(DenialReason::DeniedPattern);
        }
        if std::fs::symlink_metadata(&canonical).is_err() {
            return Decision::Denied(DenialReason::NotFound);
        }
        Decision::Allowed(AuthorizedPath(canonical))
    }
}

/// `..` components, control characters, or percent-encoded `.`/`/`/`\`.
fn has_traversal(path: &Path) -> bool {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return true;
    }
    let raw = path.to_string_lossy();
    if raw.chars().any(|c| c.is_control()) {
        return true;
    }
    let lower = raw.to_ascii_lowercase();
    ["%2e", "%2f", "%5c", "%00"].iter().any(|p| lower.contains(p))
}

/// Resolve `path` to an absolute canonical form without requiring it to
/// exist: the existing prefix is resolved through the filesystem (following
/// symlinks) and the missing suffix is appended lexically.
pub fn canonicalize_lenient(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut resolved = PathBuf::new();
    let mut existing = true;
    for component in absolute.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                resolved.push(name);
                if existing {
                    match std::fs::symlink_metadata(&resolved) {
                        Ok(_) => resolved = std::fs::canonicalize(&resolved)?,
                        Err(_) => existing = false,
                    }
                }
            }
        }
    }
    if resolved.as_os_str().is_empty() {
        return std::fs::canonicalize(&absolute);
    }
    Ok(resolved)
}

/// Authorizes paths against the current policy and reports every decision.
///
/// The policy can be replaced at runtime; each call reads one consistent
/// policy snapshot.
pub struct PathValidator {
    policy: ArcSwap<AccessPolicy>,
    sink: Arc<dyn ObservabilitySink>,
}

impl PathValidator {
    pub fn new(policy: AccessPolicy, sink: Arc<dyn ObservabilitySink>) -> Self {
        Self {
            policy: ArcSwap::from_pointee(policy),
            sink,
        }
    }

    /// The policy in force right now.
    pub fn policy(&self) -> Arc<AccessPolicy> {
        self.policy.load_full()
    }

    /// Swap in a complete, already validated policy.
    pub fn replace_policy(&self, policy: AccessPolicy) {
        self.policy.store(Arc::new(policy));
    }

    /// Authorize `path` and emit an audit event for the decision.
    pub fn authorize(&self, path: &Path) -> Decision {
        let decision = self.policy.load().authorize(path);
        let (allowed, reason) = match &decision {
            Decision::Allowed(_) => (true, None),
            Decision::Denied(r) => (false, Some(*r)),
        };
        self.sink.emit(Event::Authorization {
            path: path.display().to_string(),
            allowed,
            reason,
        });
        decision
    }

    /// Like [`authorize`](Self::authorize) but as a `Result`.
    pub fn require(&self, path: &Path) -> Result<AuthorizedPath> {
        self.authorize(path).into_result(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docfence_core::events::NullSink;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        fs::create_dir_all(docs.join(".hidden")).unwrap();
        fs::create_dir_all(docs.join("sub")).unwrap();
        fs::write(docs.join("a.txt"), "alpha").unwrap();
        fs::write(docs.join("sub/b.md"), "beta").unwrap();
        fs::write(docs.join(".hidden/c.txt"), "gamma").unwrap();
        fs::create_dir_all(tmp.path().join("docs-private")).unwrap();
        fs::write(tmp.path().join("docs-private/secret.txt"), "s").unwrap();
        fs::write(tmp.path().join("secret"), "s").unwrap();
        (tmp, docs)
    }

    fn policy(docs: &Path) -> AccessPolicy {
        AccessPolicy::new(vec![AllowedDirectory::new(docs, &[".*".to_string()]).unwrap()]).unwrap()
    }

    fn reason(d: Decision) -> Option<DenialReason> {
        match d {
            Decision::Denied(r) => Some(r),
            Decision::Allowed(_) => None,
        }
    }

    #[test]
    fn allows_files_inside_whitelist() {
        let (_tmp, docs) = setup();
        let p = policy(&docs);
        match p.authorize(&docs.join("sub/b.md")) {
            Decision::Allowed(path) => {
                assert!(path.as_path().is_absolute());
                assert!(path.as_path().ends_with("sub/b.md"));
            }
            other => panic!("expected allowed, got {:?}", other),
        }
        assert!(matches!(p.authorize(&docs), Decision::Allowed(_)));
    }

    #[test]
    fn parent_segments_are_traversal() {
        let (_tmp, docs) = setup();
        let p = policy(&docs);
        let escape = docs.join("../secret");
        assert_eq!(reason(p.authorize(&escape)), Some(DenialReason::PathTraversal));
        let inside = docs.join("sub/../a.txt");
        assert_eq!(reason(p.authorize(&inside)), Some(DenialReason::PathTraversal));
        assert_eq!(
            reason(p.authorize(Path::new("docs/../secret"))),
            Some(DenialReason::PathTraversal)
        );
    }

    #[test]
    fn encoded_and_control_characters_are_traversal() {
        let (_tmp, docs) = setup();
        let p = policy(&docs);
        let encoded = docs.join("%2e%2e").join("secret");
        assert_eq!(reason(p.authorize(&encoded)), Some(DenialReason::PathTraversal));
        let nul = docs.join("a\u{1}.txt");
        assert_eq!(reason(p.authorize(&nul)), Some(DenialReason::PathTraversal));
    }

    #[test]
    fn sibling_with_shared_prefix_is_outside() {
        let (tmp, docs) = setup();
        let p = policy(&docs);
        let sibling = tmp.path().join("docs-private/secret.txt");
        assert_eq!(reason(p.authorize(&sibling)), Some(DenialReason::OutsideWhitelist));
        assert_eq!(
            reason(p.authorize(&tmp.path().join("secret"))),
            Some(DenialReason::OutsideWhitelist)
        );
    }

    #[test]
    fn missing_paths_outside_are_outside_not_missing() {
        let (tmp, docs) = setup();
        let p = policy(&docs);
        assert_eq!(
            reason(p.authorize(&tmp.path().join("nope/x.txt"))),
            Some(DenialReason::OutsideWhitelist)
        );
        assert_eq!(
            reason(p.authorize(&docs.join("nope/x.txt"))),
            Some(DenialReason::NotFound)
        );
    }

    #[test]
    fn deny_pattern_applies_to_every_component() {
        let (_tmp, docs) = setup();
        let p = policy(&docs);
        assert_eq!(
            reason(p.authorize(&docs.join(".hidden"))),
            Some(DenialReason::DeniedPattern)
        );
        assert_eq!(
            reason(p.authorize(&docs.join(".hidden/c.txt"))),
            Some(DenialReason::DeniedPattern)
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_outside() {
        let (tmp, docs) = setup();
        std::os::unix::fs::symlink(tmp.path().join("docs-private"), docs.join("link")).unwrap();
        let p = policy(&docs);
        assert_eq!(
            reason(p.authorize(&docs.join("link/secret.txt"))),
            Some(DenialReason::OutsideWhitelist)
        );
    }

    #[test]
    fn lenient_canonicalize_keeps_missing_suffix() {
        let (_tmp, docs) = setup();
        let real = fs::canonicalize(&docs).unwrap();
        let c = canonicalize_lenient(&docs.join("./missing/deeper.txt")).unwrap();
        assert_eq!(c, real.join("missing/deeper.txt"));
    }

    #[test]
    fn validator_reports_and_swaps_policy() {
        let (tmp, docs) = setup();
        let v = PathValidator::new(policy(&docs), Arc::new(NullSink));
        let private = tmp.path().join("docs-private/secret.txt");
        assert!(v.require(&private).is_err());

        let widened = AccessPolicy::new(vec![
            AllowedDirectory::new(&docs, &[]).unwrap(),
            AllowedDirectory::new(&tmp.path().join("docs-private"), &[]).unwrap(),
        ])
        .unwrap();
        v.replace_policy(widened);
        assert!(v.require(&private).is_ok());
        assert_eq!(v.policy().allowed().len(), 2);
    }

    #[test]
    fn invalid_deny_pattern_is_config_error() {
        let (_tmp, docs) = setup();
        let err = AllowedDirectory::new(&docs, &["[".to_string()]).unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
