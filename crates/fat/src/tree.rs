use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::owner::Owner;

/// Per-entry metadata for one path in the merged namespace.
///
/// A tombstone is represented in-band: `size_in_bytes < 0`. There is no
/// separate "deleted" flag — the data model in the distilled spec defines
/// deletion purely as a negative size, and that representation is kept here
/// rather than introducing a bool the wire format doesn't have room for.
#[derive(Debug, Clone, PartialEq)]
pub struct FileStat {
    pub basename: String,
    pub is_dir: bool,
    pub last_modified: i64,
    pub last_info_updated: i64,
    pub size_in_bytes: i64,
    pub file_mode: u32,
    pub owner: Owner,
}

impl FileStat {
    #[must_use]
    pub fn root() -> Self {
        FileStat {
            basename: String::new(),
            is_dir: true,
            last_modified: 0,
            last_info_updated: 0,
            size_in_bytes: 0,
            file_mode: 0o755,
            owner: Owner::Unknown,
        }
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.size_in_bytes < 0
    }
}

/// A minimal directory-listing capability set, satisfied directly by
/// [`FileStat`]. The HTML and FTP surfaces consume entries only through this
/// trait so neither one needs to know about ownership or merge internals.
pub trait ListingEntry {
    fn name(&self) -> &str;
    fn size(&self) -> i64;
    fn mode(&self) -> u32;
    fn mtime(&self) -> i64;
    fn is_dir(&self) -> bool;
    fn owner(&self) -> &str;
    fn group(&self) -> &str;
}

impl ListingEntry for FileStat {
    fn name(&self) -> &str {
        &self.basename
    }
    fn size(&self) -> i64 {
        self.size_in_bytes
    }
    fn mode(&self) -> u32 {
        self.file_mode
    }
    fn mtime(&self) -> i64 {
        self.last_modified
    }
    fn is_dir(&self) -> bool {
        self.is_dir
    }
    fn owner(&self) -> &str {
        self.owner.as_str()
    }
    fn group(&self) -> &str {
        // The original implementation hardcodes this display field; there is
        // no group concept in the data model, only ownership for routing.
        "dftp"
    }
}

pub(crate) struct NodeState {
    pub(crate) stat: FileStat,
    pub(crate) children: HashMap<String, Arc<TreeNode>>,
}

/// One node in the merged namespace tree.
///
/// The stat and children map share a single reader/writer lock, matching the
/// "per-node lock guards one struct" discipline from the concurrency model:
/// every read or mutation of this node's shape and metadata happens under
/// one lock acquisition, never two.
pub struct TreeNode {
    pub(crate) state: RwLock<NodeState>,
}

/// A shallow, point-in-time snapshot of one node: its stat plus a copy of
/// the child name -> node map. The children themselves are still live,
/// concurrently-updatable nodes; only the map binding them to names is
/// frozen.
pub struct TreeNodeReadonly {
    pub stat: FileStat,
    pub children: HashMap<String, Arc<TreeNode>>,
}

/// Returned by a [`TreeNode::walk`] visitor to prune a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    SkipDir,
}

impl TreeNode {
    #[must_use]
    pub fn new_root() -> Arc<Self> {
        Arc::new(TreeNode {
            state: RwLock::new(NodeState {
                stat: FileStat::root(),
                children: HashMap::new(),
            }),
        })
    }

    pub(crate) fn new_leaf(basename: &str) -> Arc<Self> {
        Arc::new(TreeNode {
            state: RwLock::new(NodeState {
                stat: FileStat {
                    basename: basename.to_string(),
                    is_dir: false,
                    last_modified: 0,
                    last_info_updated: i64::MIN,
                    size_in_bytes: 0,
                    file_mode: 0,
                    owner: Owner::Unknown,
                },
                children: HashMap::new(),
            }),
        })
    }

    /// Descends by "/"-split path segments, read-locking each level.
    /// Returns `None` if any segment is missing.
    #[must_use]
    pub fn seek(self: &Arc<Self>, path: &str) -> Option<Arc<TreeNode>> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Some(Arc::clone(self));
        }
        let mut current = Arc::clone(self);
        for part in path.split('/') {
            let next = {
                let guard = current.state.read().expect("fat lock poisoned");
                guard.children.get(part).cloned()
            };
            current = next?;
        }
        Some(current)
    }

    /// Takes a shallow snapshot of this node's stat and child map under a
    /// single read lock.
    #[must_use]
    pub fn readonly(&self) -> TreeNodeReadonly {
        let guard = self.state.read().expect("fat lock poisoned");
        TreeNodeReadonly {
            stat: guard.stat.clone(),
            children: guard.children.clone(),
        }
    }

    #[must_use]
    pub fn stat(&self) -> FileStat {
        self.state.read().expect("fat lock poisoned").stat.clone()
    }

    /// Pre-order depth-first walk. The root itself is never visited, only
    /// its children (and their descendants). `visitor` receives the
    /// "/"-joined path relative to the walked root and the node's stat; it
    /// may return [`WalkControl::SkipDir`] to prune a subtree.
    pub fn walk(self: &Arc<Self>, mut visitor: impl FnMut(&str, &FileStat) -> WalkControl) {
        self.walk_from(String::new(), &mut visitor);
    }

    fn walk_from(self: &Arc<Self>, base: String, visitor: &mut impl FnMut(&str, &FileStat) -> WalkControl) {
        let snapshot = self.readonly();
        if !base.is_empty() {
            if visitor(&base, &snapshot.stat) == WalkControl::SkipDir {
                return;
            }
        }
        for (name, child) in &snapshot.children {
            let child_path = if base.is_empty() {
                name.clone()
            } else {
                format!("{base}/{name}")
            };
            child.walk_from(child_path, visitor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::FileAnnouncement;

    #[test]
    fn seek_missing_segment_returns_none() {
        let root = TreeNode::new_root();
        assert!(root.seek("a/b/c").is_none());
    }

    #[test]
    fn seek_empty_path_returns_self() {
        let root = TreeNode::new_root();
        let found = root.seek("").unwrap();
        assert!(Arc::ptr_eq(&found, &root));
    }

    #[test]
    fn walk_visits_every_non_root_node_once() {
        let root = TreeNode::new_root();
        root.update(vec![
            FileAnnouncement::new("/a.txt", 1, 10, 100, "n1"),
            FileAnnouncement::new("/dir/b.txt", 1, 10, 100, "n1"),
        ]);
        let mut seen = Vec::new();
        root.walk(|path, _stat| {
            seen.push(path.to_string());
            WalkControl::Continue
        });
        seen.sort();
        assert_eq!(seen, vec!["a.txt", "dir", "dir/b.txt"]);
    }

    #[test]
    fn walk_honors_skip_dir() {
        let root = TreeNode::new_root();
        root.update(vec![
            FileAnnouncement::new("/dir/b.txt", 1, 10, 100, "n1"),
            FileAnnouncement::new("/other.txt", 1, 10, 100, "n1"),
        ]);
        let mut seen = Vec::new();
        root.walk(|path, stat| {
            seen.push(path.to_string());
            if stat.is_dir {
                WalkControl::SkipDir
            } else {
                WalkControl::Continue
            }
        });
        seen.sort();
        assert_eq!(seen, vec!["dir", "other.txt"]);
    }
}
