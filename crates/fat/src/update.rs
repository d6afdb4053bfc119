use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::owner::Owner;
use crate::tree::{FileStat, TreeNode};

/// Wire-level change record: one peer's claim about one path's current
/// state. Field names match the wire JSON shape in the management HTTP
/// surface exactly (`FullName`, `Deletion`, `Basename`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileAnnouncement {
    pub full_name: String,
    pub deletion: bool,
    pub basename: String,
    pub dir: bool,
    pub last_modified: i64,
    pub last_info_updated: i64,
    pub size_in_bytes: i64,
    pub file_mode: u32,
    pub owner_node: Owner,
}

impl FileAnnouncement {
    /// A live-file announcement, for tests and the local scanner.
    #[must_use]
    pub fn new(
        full_name: impl Into<String>,
        size_in_bytes: i64,
        last_modified: i64,
        last_info_updated: i64,
        owner_node: impl Into<String>,
    ) -> Self {
        let full_name = full_name.into();
        let basename = full_name.rsplit('/').next().unwrap_or_default().to_string();
        FileAnnouncement {
            full_name,
            deletion: false,
            basename,
            dir: false,
            last_modified,
            last_info_updated,
            size_in_bytes,
            file_mode: 0o644,
            owner_node: owner_node.into().into(),
        }
    }

    /// A tombstone announcement for the given path.
    #[must_use]
    pub fn tombstone(
        full_name: impl Into<String>,
        last_info_updated: i64,
        owner_node: impl Into<String>,
    ) -> Self {
        let mut ann = Self::new(full_name, -1, 0, last_info_updated, owner_node);
        ann.deletion = true;
        ann
    }

    #[must_use]
    pub fn stat(&self) -> FileStat {
        FileStat {
            basename: self.basename.clone(),
            is_dir: self.dir,
            last_modified: self.last_modified,
            last_info_updated: self.last_info_updated,
            size_in_bytes: if self.deletion { -1 } else { self.size_in_bytes },
            file_mode: self.file_mode,
            owner: self.owner_node.clone(),
        }
    }

    fn segments(&self) -> Vec<String> {
        self.full_name
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Groups a slice of (remaining-segments, announcement) pairs by their
/// first remaining segment. This is a stable adjacent-equal fold, exactly
/// as the merge algorithm specifies: callers may pre-sort for deterministic
/// tie-breaking, but grouping itself does not require a global sort — equal
/// names that are not adjacent simply form separate groups, each handled
/// correctly on its own.
fn group_by_first_segment(
    items: Vec<(Vec<String>, FileAnnouncement)>,
) -> Vec<(String, Vec<(Vec<String>, FileAnnouncement)>)> {
    let mut groups: Vec<(String, Vec<(Vec<String>, FileAnnouncement)>)> = Vec::new();
    for (segments, ann) in items {
        let name = segments[0].clone();
        match groups.last_mut() {
            Some((last_name, bucket)) if *last_name == name => bucket.push((segments, ann)),
            _ => groups.push((name, vec![(segments, ann)])),
        }
    }
    groups
}

impl TreeNode {
    /// Merges a batch of announcements into this node's subtree. See the
    /// module-level documentation for the algorithm.
    pub fn update(self: &Arc<Self>, announcements: Vec<FileAnnouncement>) {
        tracing::info!(count = announcements.len(), "FAT: update starting");
        let items: Vec<(Vec<String>, FileAnnouncement)> = announcements
            .into_iter()
            .map(|mut ann| {
                if ann.deletion {
                    ann.size_in_bytes = -1;
                }
                let segments = ann.segments();
                (segments, ann)
            })
            .filter(|(segments, _)| !segments.is_empty())
            .collect();
        let count = items.len();
        self.update_level(items);
        // update_level recomputes each *child* directory's owner right after
        // recursing into it (step 4 of the merge algorithm), but the root of
        // this call is never anyone's child, so nothing else recomputes it.
        self.recalculate_owner();
        tracing::info!(count, "FAT: update finished");
    }

    fn update_level(self: &Arc<Self>, items: Vec<(Vec<String>, FileAnnouncement)>) {
        for (name, group) in group_by_first_segment(items) {
            let child = self.ensure_child(&name);
            let mut nested = Vec::new();
            for (segments, ann) in group {
                if segments.len() > 1 {
                    if ann.deletion {
                        tracing::warn!(
                            path = %ann.full_name,
                            "FAT: deletion announcement for a non-leaf path has no tombstone \
                             representation in the data model; dropping rather than \
                             corrupting an ancestor's stat"
                        );
                        continue;
                    }
                    nested.push((segments[1..].to_vec(), ann));
                } else {
                    child.apply_leaf(&ann);
                }
            }
            if !nested.is_empty() {
                child.force_dir();
                child.update_level(nested);
                child.recalculate_owner();
            }
        }
    }

    /// Double-checked lookup/insert of a named child: read lock first, then
    /// write lock only if the child is actually missing.
    fn ensure_child(self: &Arc<Self>, name: &str) -> Arc<TreeNode> {
        {
            let guard = self.state.read().expect("fat lock poisoned");
            if let Some(existing) = guard.children.get(name) {
                return Arc::clone(existing);
            }
        }
        let mut guard = self.state.write().expect("fat lock poisoned");
        Arc::clone(
            guard
                .children
                .entry(name.to_string())
                .or_insert_with(|| TreeNode::new_leaf(name)),
        )
    }

    fn force_dir(self: &Arc<Self>) {
        let mut guard = self.state.write().expect("fat lock poisoned");
        guard.stat.is_dir = true;
        guard.stat.size_in_bytes = 0;
    }

    /// Applies a leaf-level announcement under this node's write lock:
    /// monotone replacement by `last_info_updated`, tie-broken by owner
    /// name for determinism, with the multi-owner-directory adjustment.
    ///
    /// The tie-break never un-tombstones: a stored tombstone only yields to
    /// an incoming announcement with a strictly newer timestamp, matching
    /// tombstone stability (equal timestamps must not revive a deleted leaf).
    fn apply_leaf(self: &Arc<Self>, ann: &FileAnnouncement) {
        let mut guard = self.state.write().expect("fat lock poisoned");
        let incoming = ann.stat();
        let newer = incoming.last_info_updated > guard.stat.last_info_updated;
        let tie = incoming.last_info_updated == guard.stat.last_info_updated
            && incoming.owner.as_str() > guard.stat.owner.as_str();
        let replace = newer || (tie && !(guard.stat.is_tombstone() && !incoming.is_tombstone()));
        if !replace {
            return;
        }
        let prev_owner = guard.stat.owner.clone();
        guard.stat = incoming;
        if guard.stat.is_dir && !prev_owner.is_empty() && prev_owner != guard.stat.owner {
            guard.stat.owner = Owner::Multiple;
        }
    }

    /// Recomputes this directory's owner from its direct children: the
    /// common owner if they agree, [`Owner::Multiple`] if at least two
    /// disagree, [`Owner::Unknown`] if none is set.
    fn recalculate_owner(self: &Arc<Self>) {
        let children: Vec<Arc<TreeNode>> = {
            let guard = self.state.read().expect("fat lock poisoned");
            if !guard.stat.is_dir {
                return;
            }
            guard.children.values().cloned().collect()
        };
        let mut owner = Owner::Unknown;
        for child in &children {
            let child_owner = child.stat().owner;
            if child_owner.is_empty() {
                continue;
            }
            owner = match owner {
                Owner::Unknown => child_owner,
                ref current if *current == child_owner => owner,
                _ => Owner::Multiple,
            };
        }
        let mut guard = self.state.write().expect("fat lock poisoned");
        guard.stat.owner = owner;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotone_replacement_max_of_two_timestamps() {
        for reversed in [false, true] {
            let root = TreeNode::new_root();
            let mut anns = vec![
                FileAnnouncement::new("/x", 5, 0, 100, "a"),
                FileAnnouncement::new("/x", 7, 0, 200, "b"),
            ];
            if reversed {
                anns.reverse();
            }
            root.update(anns);
            let leaf = root.seek("x").unwrap();
            let stat = leaf.stat();
            assert_eq!(stat.last_info_updated, 200);
            assert_eq!(stat.size_in_bytes, 7);
            assert_eq!(stat.owner.as_str(), "b");
        }
    }

    #[test]
    fn tombstone_stability_no_revert_without_newer_timestamp() {
        let root = TreeNode::new_root();
        root.update(vec![
            FileAnnouncement::new("/x", 5, 0, 10, "a"),
            FileAnnouncement::tombstone("/x", 20, "a"),
        ]);
        let leaf = root.seek("x").unwrap();
        assert_eq!(leaf.stat().size_in_bytes, -1);

        // A later-arriving announcement with an equal-or-older timestamp
        // must not revive the tombstone.
        root.update(vec![FileAnnouncement::new("/x", 5, 0, 20, "a")]);
        assert_eq!(root.seek("x").unwrap().stat().size_in_bytes, -1);
        root.update(vec![FileAnnouncement::new("/x", 5, 0, 15, "a")]);
        assert_eq!(root.seek("x").unwrap().stat().size_in_bytes, -1);
    }

    #[test]
    fn tie_break_never_revives_a_tombstone() {
        let root = TreeNode::new_root();
        root.update(vec![FileAnnouncement::tombstone("/x", 20, "a")]);
        // Same timestamp, lexicographically greater owner: would normally
        // win the tie-break, but must not resurrect a tombstoned leaf.
        root.update(vec![FileAnnouncement::new("/x", 5, 0, 20, "z")]);
        assert_eq!(root.seek("x").unwrap().stat().size_in_bytes, -1);

        // The tie-break still applies between two tombstones (no revival at
        // stake), so the owner of record can still change on a tie.
        root.update(vec![FileAnnouncement::tombstone("/x", 20, "z")]);
        assert_eq!(root.seek("x").unwrap().stat().owner.as_str(), "z");
    }

    #[test]
    fn merge_from_peer_creates_directory_and_multiple_owner_root() {
        let root = TreeNode::new_root();
        root.update(vec![FileAnnouncement::new("/a.txt", 10, 1000, 5000, "me")]);
        root.update(vec![FileAnnouncement::new("/b/c.txt", 20, 2000, 6000, "N2")]);

        let dir = root.seek("b").unwrap();
        assert!(dir.stat().is_dir);
        assert_eq!(dir.stat().owner.as_str(), "N2");

        let leaf = root.seek("b/c.txt").unwrap();
        assert_eq!(leaf.stat().size_in_bytes, 20);
        assert_eq!(leaf.stat().owner.as_str(), "N2");

        assert_eq!(root.stat().owner, Owner::Multiple);
    }

    #[test]
    fn owner_recomputation_matches_invariant() {
        let root = TreeNode::new_root();
        root.update(vec![
            FileAnnouncement::new("/shared/a.txt", 1, 0, 10, "n1"),
            FileAnnouncement::new("/shared/b.txt", 1, 0, 10, "n1"),
        ]);
        assert_eq!(root.seek("shared").unwrap().stat().owner, Owner::Single("n1".into()));

        root.update(vec![FileAnnouncement::new("/shared/c.txt", 1, 0, 11, "n2")]);
        assert_eq!(root.seek("shared").unwrap().stat().owner, Owner::Multiple);
    }

    #[test]
    fn non_leaf_deletion_is_dropped_not_misapplied() {
        let root = TreeNode::new_root();
        root.update(vec![FileAnnouncement::new("/a/b.txt", 5, 0, 10, "n1")]);
        root.update(vec![FileAnnouncement::tombstone("/a/b.txt/phantom", 20, "n1")]);
        // The phantom deletion must not have corrupted node "a" or created
        // a bogus "b.txt" tombstone child of it.
        let a = root.seek("a").unwrap();
        assert!(a.stat().is_dir);
        assert_eq!(root.seek("a/b.txt").unwrap().stat().size_in_bytes, 5);
    }

    #[test]
    fn listing_filters_tombstones() {
        let root = TreeNode::new_root();
        root.update(vec![
            FileAnnouncement::new("/x", 1, 0, 10, "n1"),
            FileAnnouncement::tombstone("/y", 20, "n1"),
        ]);
        let snapshot = root.readonly();
        let visible = snapshot
            .children
            .values()
            .map(|c| c.stat())
            .filter(|s| !s.is_tombstone())
            .count();
        assert_eq!(visible, 1);
    }
}
