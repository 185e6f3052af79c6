//! Full-scan discovery with the same noise filters the live watcher uses.

use rayon::prelude::*;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Recycle bins, NAS metadata dirs and fanart caches are never media.
const EXCLUDED_DIRS: [&str; 4] = ["@Recycle", "#recycle", "@eaDir", "extrafanart"];

/// Transient or hidden names (dotfiles cover `.fuse_hidden*` markers too).
pub fn is_excluded_name(name: &str) -> bool {
    name.starts_with('.') || EXCLUDED_DIRS.contains(&name)
}

/// True when any component of `path` below `root` is excluded. The root
/// itself is exempt so a mount under a dotted directory still scans.
pub fn is_excluded(path: &Path, root: &Path) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    for component in relative.components() {
        if let Component::Normal(part) = component {
            if is_excluded_name(&part.to_string_lossy()) {
                return true;
            }
        }
    }
    false
}

pub struct Scanner;

impl Scanner {
    /// Walk every root recursively, yielding `(root, file)` pairs for
    /// regular files that pass the exclusion filters. Roots scan in
    /// parallel; the result is sorted for deterministic ordering.
    pub fn scan_roots(roots: &[PathBuf]) -> Vec<(PathBuf, PathBuf)> {
        let files = Arc::new(Mutex::new(Vec::new()));

        roots.par_iter().for_each(|root| {
            if !root.exists() {
                warn!("Scan root {:?} does not exist, skipping", root);
                return;
            }
            info!("Scanning {:?}", root);
            let local = Self::scan_subtree(root)
                .into_iter()
                .map(|file| (root.clone(), file))
                .collect::<Vec<_>>();
            match files.lock() {
                Ok(mut guard) => guard.extend(local),
                Err(e) => error!("Failed to lock scan results: {}", e),
            }
        });

        let mut all = match files.lock() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                error!("Failed to lock scan results for finalize: {}", e);
                Vec::new()
            }
        };
        all.sort_by(|a, b| a.1.cmp(&b.1));
        info!("Found {} candidate files", all.len());
        all
    }

    /// Walk a single subtree with the exclusion filters applied.
    pub fn scan_subtree(root: &Path) -> Vec<PathBuf> {
        WalkDir::new(root)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !is_excluded_name(&entry.file_name().to_string_lossy())
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect()
    }

    /// The `limit` most recently modified immediate subdirectories of
    /// `dir`, newest first. Used for targeted "just the latest shows"
    /// re-syncs.
    pub fn latest_subdirs(dir: &Path, limit: usize) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            warn!("Cannot list {:?}", dir);
            return Vec::new();
        };

        let mut dirs: Vec<(PathBuf, SystemTime)> = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .map(|entry| {
                let mtime = entry
                    .metadata()
                    .and_then(|meta| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (entry.path(), mtime)
            })
            .collect();

        dirs.sort_by(|a, b| b.1.cmp(&a.1));
        dirs.truncate(limit);
        dirs.into_iter().map(|(path, _)| path).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_is_excluded_below_root() {
        let root = Path::new("/mnt/media");
        assert!(is_excluded(Path::new("/mnt/media/@Recycle/a.mkv"), root));
        assert!(is_excluded(Path::new("/mnt/media/#recycle/a.mkv"), root));
        assert!(is_excluded(Path::new("/mnt/media/@eaDir/a.mkv"), root));
        assert!(is_excluded(
            Path::new("/mnt/media/show/extrafanart/a.jpg"),
            root
        ));
        assert!(is_excluded(Path::new("/mnt/media/show/.hidden.mkv"), root));
        assert!(is_excluded(
            Path::new("/mnt/media/show/.fuse_hidden0001"),
            root
        ));
        assert!(!is_excluded(Path::new("/mnt/media/show/S01E01.mkv"), root));
    }

    #[test]
    fn test_dotted_root_is_exempt() {
        let root = Path::new("/tmp/.staging/media");
        assert!(!is_excluded(Path::new("/tmp/.staging/media/a.mkv"), root));
        assert!(is_excluded(Path::new("/tmp/.staging/media/.b.mkv"), root));
    }

    #[test]
    fn test_scan_subtree_filters_noise() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ShowX/extrafanart")).unwrap();
        fs::create_dir_all(dir.path().join("@Recycle")).unwrap();
        fs::write(dir.path().join("ShowX/S01E01.mkv"), "x").unwrap();
        fs::write(dir.path().join("ShowX/extrafanart/fan.jpg"), "x").unwrap();
        fs::write(dir.path().join("@Recycle/old.mkv"), "x").unwrap();
        fs::write(dir.path().join("ShowX/.fuse_hidden42"), "x").unwrap();

        let files = Scanner::scan_subtree(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("ShowX/S01E01.mkv"));
    }

    #[test]
    fn test_scan_roots_pairs_root() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/x.mkv"), "x").unwrap();

        let root = dir.path().to_path_buf();
        let found = Scanner::scan_roots(&[root.clone()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, root);
    }

    #[test]
    fn test_latest_subdirs_limit() {
        let dir = tempdir().unwrap();
        for name in ["one", "two", "three"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        let latest = Scanner::latest_subdirs(dir.path(), 2);
        assert_eq!(latest.len(), 2);
    }
}
