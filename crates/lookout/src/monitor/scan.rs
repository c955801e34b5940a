// Copyright (c) 2025 Lookout and contributors

// SPDX-License-Identifier: MIT
// Third-party contributions licensed under DCO

// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to
// deal in the Software without restriction, including without limitation the
// rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
// sell copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:

// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NON-INFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
// IN THE SOFTWARE.

// ----------------------------------------------------------------------------

//! Path discovery.

use std::fs;
use std::path::Path;
use tracing::debug;

use super::filter::FilterSet;

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Walk policy.
///
/// The walk policy bundles everything path discovery needs: whether to
/// descend beyond a root's immediate children, whether to follow symbolic
/// links, and the compiled filters gating every candidate path.
pub(crate) struct Walk<'a> {
    /// Whether to discover descendants beyond the immediate children.
    pub recursive: bool,
    /// Whether to follow symbolic links.
    pub follow_symlinks: bool,
    /// Compiled path filters.
    pub filters: &'a FilterSet,
}

// ----------------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------------

/// Walks the tree rooted at the given path.
///
/// The visitor is invoked with every discovered path and its metadata, and
/// returns whether discovery should descend below the path. Directories are
/// processed with an explicit work stack, so arbitrarily deep trees cannot
/// overflow the call stack.
///
/// A root that denotes a directory always has its immediate children
/// enumerated; descendants further down are discovered only when the policy
/// is recursive. Symbolic links are handled according to policy: when
/// following, discovery re-enters at the resolved target, which makes cycle
/// detection the visitor's responsibility; otherwise the link itself is
/// visited. Paths that fail to stat are skipped without aborting the walk,
/// which also covers roots that don't exist yet.
pub(crate) fn walk(
    root: &Path,
    policy: &Walk<'_>,
    visit: &mut dyn FnMut(&Path, &fs::Metadata) -> bool,
) {
    if !policy.filters.accept(root) {
        return;
    }
    let Ok(meta) = fs::symlink_metadata(root) else {
        debug!(path = %root.display(), "skipping path, stat failed");
        return;
    };

    // Following a symbolic link re-enters discovery at the resolved target;
    // the visitor guards against cycles by membership checks
    if meta.file_type().is_symlink() && policy.follow_symlinks {
        if let Ok(target) = fs::canonicalize(root) {
            walk(&target, policy, visit);
        }
        return;
    }
    if !visit(root, &meta) || !meta.is_dir() {
        return;
    }

    // Enumerate children, descending with an explicit work stack
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(path = %dir.display(), error = %err, "skipping directory");
                continue;
            }
        };

        for entry in entries.flatten() {
            let child = entry.path();
            if !policy.filters.accept(&child) {
                continue;
            }
            let Ok(meta) = fs::symlink_metadata(&child) else {
                continue;
            };

            if meta.file_type().is_symlink() && policy.follow_symlinks {
                if let Ok(target) = fs::canonicalize(&child) {
                    walk(&target, policy, visit);
                }
                continue;
            }
            if !visit(&child, &meta) {
                continue;
            }
            if policy.recursive && meta.is_dir() {
                stack.push(child);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn collect(root: &Path, policy: &Walk<'_>) -> BTreeSet<PathBuf> {
        let mut paths = BTreeSet::new();
        walk(root, policy, &mut |path, _| {
            paths.insert(path.to_path_buf());
            true
        });
        paths
    }

    #[test]
    fn test_root_and_children() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub/b.txt"), b"b").unwrap();

        let filters = FilterSet::default();
        let policy = Walk {
            recursive: false,
            follow_symlinks: false,
            filters: &filters,
        };

        // The immediate children are enumerated, but not the grandchildren
        let paths = collect(&root, &policy);
        assert!(paths.contains(&root));
        assert!(paths.contains(&root.join("a.txt")));
        assert!(paths.contains(&root.join("sub")));
        assert!(!paths.contains(&root.join("sub/b.txt")));
    }

    #[test]
    fn test_recursive_descends() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("sub/nested")).unwrap();
        fs::write(root.join("sub/nested/c.txt"), b"c").unwrap();

        let filters = FilterSet::default();
        let policy = Walk {
            recursive: true,
            follow_symlinks: false,
            filters: &filters,
        };

        let paths = collect(&root, &policy);
        assert!(paths.contains(&root.join("sub/nested/c.txt")));
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("does-not-exist");

        let filters = FilterSet::default();
        let policy = Walk {
            recursive: true,
            follow_symlinks: false,
            filters: &filters,
        };

        assert!(collect(&root, &policy).is_empty());
    }

    #[test]
    fn test_filters_gate_discovery() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("a.tmp"), b"a").unwrap();

        let filters = FilterSet::compile(&[
            super::super::filter::Filter::exclude(r"\.tmp$"),
        ])
        .unwrap();
        let policy = Walk {
            recursive: false,
            follow_symlinks: false,
            filters: &filters,
        };

        let paths = collect(&root, &policy);
        assert!(paths.contains(&root.join("a.txt")));
        assert!(!paths.contains(&root.join("a.tmp")));
    }

    #[test]
    fn test_non_directory_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let file = root.join("a.txt");
        fs::write(&file, b"a").unwrap();

        let filters = FilterSet::default();
        let policy = Walk {
            recursive: true,
            follow_symlinks: false,
            filters: &filters,
        };

        let paths = collect(&file, &policy);
        assert_eq!(paths.into_iter().collect::<Vec<_>>(), vec![file]);
    }

    #[test]
    fn test_visitor_stops_descent() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("sub/nested")).unwrap();

        let filters = FilterSet::default();
        let policy = Walk {
            recursive: true,
            follow_symlinks: false,
            filters: &filters,
        };

        // Rejecting the subdirectory must prune everything below it
        let sub = root.join("sub");
        let mut paths = BTreeSet::new();
        walk(&root, &policy, &mut |path, _| {
            paths.insert(path.to_path_buf());
            path != sub
        });
        assert!(paths.contains(&sub));
        assert!(!paths.contains(&root.join("sub/nested")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks() {
        use std::os::unix::fs::symlink;

        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir(root.join("target")).unwrap();
        fs::write(root.join("target/a.txt"), b"a").unwrap();
        symlink(root.join("target"), root.join("link")).unwrap();

        let filters = FilterSet::default();

        // Without following, the link itself is visited
        let policy = Walk {
            recursive: true,
            follow_symlinks: false,
            filters: &filters,
        };
        let paths = collect(&root, &policy);
        assert!(paths.contains(&root.join("link")));
        assert!(!paths.contains(&root.join("link/a.txt")));

        // With following, discovery re-enters at the resolved target, so the
        // target is reported instead of the link
        let policy = Walk {
            recursive: true,
            follow_symlinks: true,
            filters: &filters,
        };
        let paths = collect(&root, &policy);
        assert!(!paths.contains(&root.join("link")));
        assert!(paths.contains(&root.join("target/a.txt")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_is_guarded_by_visitor() {
        use std::os::unix::fs::symlink;

        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        symlink(&root, root.join("loop")).unwrap();

        let filters = FilterSet::default();
        let policy = Walk {
            recursive: true,
            follow_symlinks: true,
            filters: &filters,
        };

        // The visitor refuses already-seen paths, which terminates the walk
        let mut paths = BTreeSet::new();
        walk(&root, &policy, &mut |path, _| {
            paths.insert(path.to_path_buf())
        });
        assert!(paths.contains(&root));
    }
}
