use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

use super::archive::list_archives;

/// What a retention pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub deleted: usize,
    pub failed: usize,
}

/// Keep the `keep` newest archives in `dir` and delete the rest.
///
/// Individual deletion failures are logged and counted; every candidate past
/// the cutoff is attempted. Only a failure to list the directory is an error.
pub fn prune(dir: &Path, keep: usize) -> io::Result<PruneSummary> {
    prune_with(dir, keep, |path| fs::remove_file(path))
}

fn prune_with(
    dir: &Path,
    keep: usize,
    mut remove: impl FnMut(&Path) -> io::Result<()>,
) -> io::Result<PruneSummary> {
    let archives = list_archives(dir)?;
    let mut summary = PruneSummary::default();

    if archives.len() <= keep {
        debug!(dir = %dir.display(), count = archives.len(), keep, "Nothing to prune");
        return Ok(summary);
    }

    for archive in archives.iter().skip(keep) {
        match remove(&archive.path) {
            Ok(()) => {
                info!(file = %archive.file_name(), "Deleted old archive");
                summary.deleted += 1;
            }
            Err(e) => {
                warn!(file = %archive.file_name(), error = %e, "Failed to delete old archive");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::tempdir;

    /// Create `count` archives one minute apart, oldest first.
    fn seed(dir: &Path, count: usize) -> Vec<String> {
        let base = 1_700_000_000;
        (0..count)
            .map(|i| {
                let name = format!("backup_20240309_10{:02}00.zip", i);
                let path = dir.join(&name);
                fs::write(&path, b"PK").unwrap();
                let mtime = FileTime::from_unix_time(base + 60 * i as i64, 0);
                filetime::set_file_mtime(&path, mtime).unwrap();
                name
            })
            .collect()
    }

    fn remaining(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_prune_keeps_newest() {
        let temp = tempdir().unwrap();
        let names = seed(temp.path(), 5);

        let summary = prune(temp.path(), 2).unwrap();

        assert_eq!(summary, PruneSummary { deleted: 3, failed: 0 });
        assert_eq!(remaining(temp.path()), names[3..].to_vec());
    }

    #[test]
    fn test_prune_is_idempotent() {
        let temp = tempdir().unwrap();
        seed(temp.path(), 4);

        assert_eq!(prune(temp.path(), 3).unwrap().deleted, 1);
        assert_eq!(prune(temp.path(), 3).unwrap().deleted, 0);
        assert_eq!(remaining(temp.path()).len(), 3);
    }

    #[test]
    fn test_prune_under_limit_is_noop() {
        let temp = tempdir().unwrap();
        seed(temp.path(), 2);

        assert_eq!(prune(temp.path(), 5).unwrap(), PruneSummary::default());
        assert_eq!(remaining(temp.path()).len(), 2);
    }

    #[test]
    fn test_prune_ignores_unrelated_files() {
        let temp = tempdir().unwrap();
        seed(temp.path(), 3);
        fs::write(temp.path().join("notes.txt"), b"keep me").unwrap();
        fs::write(temp.path().join("backup_20240309_110000.zip.part"), b"").unwrap();

        prune(temp.path(), 1).unwrap();

        let left = remaining(temp.path());
        assert_eq!(left.len(), 3);
        assert!(left.contains(&"notes.txt".to_string()));
        assert!(left.contains(&"backup_20240309_110000.zip.part".to_string()));
        assert!(left.contains(&"backup_20240309_100200.zip".to_string()));
    }

    #[test]
    fn test_prune_orders_by_mtime_before_name() {
        let temp = tempdir().unwrap();
        let names = seed(temp.path(), 3);
        // Touch the oldest-named archive so it is the most recently modified
        filetime::set_file_mtime(
            temp.path().join(&names[0]),
            FileTime::from_unix_time(1_800_000_000, 0),
        )
        .unwrap();

        prune(temp.path(), 1).unwrap();

        assert_eq!(remaining(temp.path()), vec![names[0].clone()]);
    }

    #[test]
    fn test_prune_equal_mtime_falls_back_to_name() {
        let temp = tempdir().unwrap();
        let mtime = FileTime::from_unix_time(1_700_000_000, 0);
        for name in [
            "backup_20240309_100000.zip",
            "backup_20240309_100000_1.zip",
            "backup_20240309_090000.zip",
        ] {
            let path = temp.path().join(name);
            fs::write(&path, b"PK").unwrap();
            filetime::set_file_mtime(&path, mtime).unwrap();
        }

        prune(temp.path(), 2).unwrap();

        assert_eq!(
            remaining(temp.path()),
            vec![
                "backup_20240309_100000.zip".to_string(),
                "backup_20240309_100000_1.zip".to_string(),
            ]
        );
    }

    #[test]
    fn test_prune_counts_failures_and_keeps_going() {
        let temp = tempdir().unwrap();
        let names = seed(temp.path(), 5);
        let stuck = temp.path().join(&names[2]);

        // Newest first, so names[2] is the first candidate past the cutoff
        let mut attempted = Vec::new();
        let summary = prune_with(temp.path(), 2, |path| {
            attempted.push(path.to_path_buf());
            if path == stuck {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            fs::remove_file(path)
        })
        .unwrap();

        assert_eq!(summary, PruneSummary { deleted: 2, failed: 1 });
        assert_eq!(attempted.len(), 3);
        assert_eq!(
            remaining(temp.path()),
            vec![names[2].clone(), names[3].clone(), names[4].clone()]
        );
    }

    #[test]
    fn test_prune_missing_dir() {
        let temp = tempdir().unwrap();
        let summary = prune(&temp.path().join("missing"), 2).unwrap();
        assert_eq!(summary, PruneSummary::default());
    }
}
