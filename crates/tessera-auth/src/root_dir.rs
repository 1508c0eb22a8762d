//! Root-directory containment for `file:` URIs.
//!
//! The root is normalized once at construction. Each check resolves the
//! target to its real path when it exists (following symlinks) or to a
//! lexically normalized absolute path when it does not, then requires
//! that path to be a descendant of the root.
//!
//! ```text
//! root  = /work/proj            (canonicalized if it exists)
//!
//! /work/proj/a.pkl              → allowed
//! /work/proj/sub/../a.pkl       → allowed   (lexical)
//! /work/proj/../other/a.pkl     → denied    (lexical)
//! /work/proj/link → /etc        → denied    (real path)
//! ```
//!
//! Comparison is per path component, so `/work/project2` is not inside
//! `/work/proj`.

use std::io;
use std::ops::Deref;
use std::path::{Component, Path, PathBuf};

/// A normalized root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootDir {
    path: PathBuf,
}

/// A path proven to lie under a [`RootDir`].
///
/// Only [`RootDir::contain`] produces one. For existing files it is the
/// real path, so later I/O does not follow unchecked symlinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurePath(PathBuf);

impl SecurePath {
    /// Returns the checked path.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl Deref for SecurePath {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for SecurePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl RootDir {
    /// Normalizes `path`: real path if it exists, else absolute and lexically normalized.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the root exists but cannot be canonicalized,
    /// or if the working directory is unavailable for a relative root.
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let path = if path.exists() {
            path.canonicalize()?
        } else {
            normalize_lexically(&std::path::absolute(path)?)
        };
        Ok(Self { path })
    }

    /// The normalized root path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves `target` and returns it if it lies under the root.
    ///
    /// `Ok(None)` means the target is outside the root.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the target exists but its real path
    /// cannot be determined.
    pub fn contain(&self, target: &Path) -> io::Result<Option<SecurePath>> {
        let resolved = if target.exists() {
            target.canonicalize()?
        } else {
            normalize_lexically(&std::path::absolute(target)?)
        };
        if resolved.starts_with(&self.path) {
            Ok(Some(SecurePath(resolved)))
        } else {
            Ok(None)
        }
    }
}

/// Removes `.` and resolves `..` without touching the filesystem.
///
/// `..` at the root stays at the root, matching how the OS treats `/..`.
#[must_use]
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir | Component::Prefix(_))
                );
                if !at_root {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_root() -> (tempfile::TempDir, RootDir) {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let root = RootDir::new(dir.path()).expect("should normalize root");
        (dir, root)
    }

    #[test]
    fn existing_root_is_canonicalized() {
        let (dir, root) = test_root();
        let canonical = dir.path().canonicalize().expect("should canonicalize");
        assert_eq!(root.path(), canonical);
    }

    #[test]
    fn missing_root_is_made_absolute() {
        let root = RootDir::new("does-not-exist/../also-missing").expect("should normalize");
        assert!(root.path().is_absolute());
        assert!(root.path().ends_with("also-missing"));
        assert!(!root.path().to_string_lossy().contains(".."));
    }

    #[test]
    fn existing_file_inside_root() {
        let (_dir, root) = test_root();
        let file = root.path().join("a.pkl");
        std::fs::write(&file, "x = 1").expect("should write");
        let secure = root.contain(&file).expect("should resolve");
        assert_eq!(secure.expect("should be inside").as_path(), file);
    }

    #[test]
    fn missing_file_inside_root_is_allowed() {
        let (_dir, root) = test_root();
        let target = root.path().join("sub/../new.pkl");
        let secure = root.contain(&target).expect("should resolve");
        assert_eq!(
            secure.expect("should be inside").as_path(),
            root.path().join("new.pkl")
        );
    }

    #[test]
    fn lexical_escape_is_outside() {
        let (_dir, root) = test_root();
        let target = root.path().join("../escape.pkl");
        assert!(root.contain(&target).expect("should resolve").is_none());
    }

    #[test]
    fn sibling_with_common_prefix_is_outside() {
        let (dir, _) = test_root();
        let inner = dir.path().join("proj");
        let sibling = dir.path().join("project2");
        std::fs::create_dir_all(&inner).expect("should create");
        std::fs::create_dir_all(&sibling).expect("should create");
        let root = RootDir::new(&inner).expect("should normalize");
        assert!(root
            .contain(&sibling.join("a.pkl"))
            .expect("should resolve")
            .is_none());
    }

    #[test]
    fn root_itself_is_inside() {
        let (_dir, root) = test_root();
        assert!(root.contain(root.path()).expect("should resolve").is_some());
    }

    #[test]
    fn normalize_keeps_parent_at_filesystem_root() {
        assert_eq!(
            normalize_lexically(Path::new("/../a/./b/../c")),
            PathBuf::from("/a/c")
        );
    }

    #[cfg(unix)]
    mod symlink_tests {
        use super::*;
        use std::os::unix::fs::symlink;

        #[test]
        fn symlink_escape_is_outside() {
            let (_dir, root) = test_root();
            let outside = tempfile::tempdir().expect("should create outside dir");
            let secret = outside.path().join("secret.pkl");
            std::fs::write(&secret, "password = 1").expect("should write");
            let link = root.path().join("link.pkl");
            symlink(&secret, &link).expect("should symlink");

            assert!(root.contain(&link).expect("should resolve").is_none());
        }

        #[test]
        fn symlink_to_inside_resolves_to_target() {
            let (_dir, root) = test_root();
            let real = root.path().join("real.pkl");
            std::fs::write(&real, "a = 1").expect("should write");
            let link = root.path().join("alias.pkl");
            symlink(&real, &link).expect("should symlink");

            let secure = root
                .contain(&link)
                .expect("should resolve")
                .expect("should be inside");
            assert_eq!(secure.as_path(), real);
        }

        #[test]
        fn symlinked_root_is_followed_once() {
            let (dir, _) = test_root();
            let real = dir.path().join("real-root");
            std::fs::create_dir_all(&real).expect("should create");
            let link = dir.path().join("link-root");
            symlink(&real, &link).expect("should symlink");
            let root = RootDir::new(&link).expect("should normalize");

            let file = real.join("a.pkl");
            std::fs::write(&file, "a = 1").expect("should write");
            assert!(root.contain(&link.join("a.pkl")).expect("should resolve").is_some());
        }
    }

    mod proptest_containment {
        use super::*;
        use proptest::prelude::*;

        fn segment() -> impl Strategy<Value = String> {
            "[a-z]{1,8}"
        }

        proptest! {
            #[test]
            fn plain_descendants_are_inside(segs in proptest::collection::vec(segment(), 1..5)) {
                let root = RootDir::new("/tessera-prop-root").expect("should normalize");
                let target = segs.iter().fold(root.path().to_path_buf(), |p, s| p.join(s));
                let secure = root.contain(&target).expect("should resolve");
                prop_assert!(secure.is_some());
            }

            #[test]
            fn climbing_above_depth_escapes(
                segs in proptest::collection::vec(segment(), 0..4),
                extra in 1usize..4,
            ) {
                let root = RootDir::new("/tessera-prop-root").expect("should normalize");
                let mut target = root.path().to_path_buf();
                for s in &segs {
                    target.push(s);
                }
                for _ in 0..(segs.len() + extra) {
                    target.push("..");
                }
                target.push("tessera-prop-elsewhere");
                let secure = root.contain(&target).expect("should resolve");
                prop_assert!(secure.is_none());
            }
        }
    }
}
