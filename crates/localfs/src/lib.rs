//! Local directory scanner and local read path.
//!
//! This is the "local-disk scanner" and its sibling read path named as an
//! external collaborator in the system overview: in practice the read proxy
//! and the scheduler that drives the FAT tree both depend on it directly, so
//! it is real code here, not a stub.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use fat::FileAnnouncement;

#[derive(Debug, thiserror::Error)]
pub enum LocalFsError {
    #[error("local file not found")]
    NotFound,
    #[error("local io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("failed to read scan root {path}: {source}")]
pub struct ScanError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// The complete batch produced by one [`LocalFs::scan_once`] call.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub announcements: Vec<FileAnnouncement>,
    pub scan_time: i64,
    /// Entries that could not be stat'd; the scan as a whole still succeeds.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Manages one node's view of its own local disk: the root directory it
/// serves, the DFS mount point its paths are announced under, and the most
/// recent full scan (published for gossip to fetch).
pub struct LocalFs {
    local_root: PathBuf,
    dfs_mount_point: String,
    node_name: String,
    last_full_scan: RwLock<Option<(Vec<FileAnnouncement>, i64)>>,
}

impl LocalFs {
    #[must_use]
    pub fn new(
        local_root: impl Into<PathBuf>,
        dfs_mount_point: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        let dfs_mount_point = dfs_mount_point.into();
        LocalFs {
            local_root: local_root.into(),
            dfs_mount_point: dfs_mount_point.trim_start_matches('/').to_string(),
            node_name: node_name.into(),
            last_full_scan: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Opens a DFS path for reading, translating it to a local path by
    /// stripping the mount point prefix then joining the local root.
    pub fn open_read(&self, dfs_path: &str) -> Result<File, LocalFsError> {
        let relative = if self.dfs_mount_point.is_empty() {
            dfs_path.trim_start_matches('/')
        } else if let Some(stripped) = dfs_path
            .trim_start_matches('/')
            .strip_prefix(&self.dfs_mount_point)
        {
            stripped.trim_start_matches('/')
        } else {
            return Err(LocalFsError::NotFound);
        };
        let local_path = self.local_root.join(relative);
        File::open(local_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LocalFsError::NotFound
            } else {
                LocalFsError::Io(e)
            }
        })
    }

    /// Returns the most recently published scan batch, if any.
    #[must_use]
    pub fn last_full_scan(&self) -> Option<(Vec<FileAnnouncement>, i64)> {
        self.last_full_scan
            .read()
            .expect("localfs lock poisoned")
            .clone()
    }

    /// Walks the local root once, producing an announcement batch stamped
    /// with the wall-clock second the scan began — identical for every
    /// entry, so gossip has one clean freshness epoch per scan. Per-entry
    /// read errors (a broken symlink, a permission error) are logged and
    /// skipped; only an unreadable root itself is fatal.
    pub fn scan_once(&self) -> Result<ScanReport, ScanError> {
        let scan_time = now();
        tracing::info!(root = %self.local_root.display(), "scanner: starting local scan");

        if let Err(source) = std::fs::symlink_metadata(&self.local_root) {
            return Err(ScanError {
                path: self.local_root.clone(),
                source,
            });
        }

        let mut announcements = Vec::new();
        let mut skipped = Vec::new();

        for entry in walkdir::WalkDir::new(&self.local_root) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                    tracing::warn!(path = %path.display(), error = %e, "scanner: skipping unreadable entry");
                    skipped.push((path, e.to_string()));
                    continue;
                }
            };
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "scanner: skipping unreadable entry");
                    skipped.push((entry.path().to_path_buf(), e.to_string()));
                    continue;
                }
            };

            let relative = entry
                .path()
                .strip_prefix(&self.local_root)
                .unwrap_or(entry.path());
            let mut full_name = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
            if !self.dfs_mount_point.is_empty() {
                full_name = if full_name.is_empty() {
                    self.dfs_mount_point.clone()
                } else {
                    format!("{}/{}", self.dfs_mount_point, full_name)
                };
            }
            if full_name.is_empty() {
                // Denotes the scan root itself; never announced.
                continue;
            }

            let basename = entry
                .file_name()
                .to_string_lossy()
                .to_string();
            let last_modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            let size_in_bytes = if metadata.is_dir() { 0 } else { metadata.len() as i64 };

            let mut ann = FileAnnouncement::new(full_name, size_in_bytes, last_modified, scan_time, self.node_name.clone());
            ann.basename = basename;
            ann.dir = metadata.is_dir();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                ann.file_mode = metadata.permissions().mode();
            }
            announcements.push(ann);
        }

        tracing::info!(found = announcements.len(), "scanner: local scan finished");

        *self.last_full_scan.write().expect("localfs lock poisoned") =
            Some((announcements.clone(), scan_time));

        Ok(ScanReport {
            announcements,
            scan_time,
            skipped,
        })
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fat::TreeNode;

    #[test]
    fn single_node_scan_produces_expected_leaf() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();

        let lfs = LocalFs::new(dir.path(), "", "me");
        let report = lfs.scan_once().unwrap();

        let root = TreeNode::new_root();
        root.update(report.announcements.clone());

        let leaf = root.seek("a.txt").unwrap();
        let stat = leaf.stat();
        assert_eq!(stat.size_in_bytes, 10);
        assert_eq!(stat.owner.as_str(), "me");
        assert_eq!(stat.last_info_updated, report.scan_time);
    }

    #[test]
    fn mount_point_prefixes_announced_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        let lfs = LocalFs::new(dir.path(), "/mnt", "me");
        let report = lfs.scan_once().unwrap();
        assert!(report.announcements.iter().any(|a| a.full_name == "mnt/a.txt"));
    }

    #[test]
    fn open_read_strips_mount_point_and_rejects_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        let lfs = LocalFs::new(dir.path(), "mnt", "me");
        assert!(lfs.open_read("mnt/a.txt").is_ok());
        assert!(matches!(lfs.open_read("other/a.txt"), Err(LocalFsError::NotFound)));
    }
}
