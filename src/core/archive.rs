//! Archive file naming and discovery.
//!
//! Archives live directly under a project directory and are named
//! `backup_<YYYYMMDD_HHMMSS>.zip`. When two archives would share a second,
//! later ones get a sequence suffix: `backup_<YYYYMMDD_HHMMSS>_<n>.zip`.
//! Anything else in the directory is ignored.

use chrono::{DateTime, TimeZone};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;
use tracing::warn;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Suffix of the temporary file a download is streamed into.
pub const PARTIAL_SUFFIX: &str = ".part";

static ARCHIVE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^backup_(\d{8}_\d{6})(?:_(\d+))?\.zip$").expect("archive pattern is valid")
});

/// Sort key parsed from an archive file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArchiveName {
    pub stamp: String,
    pub seq: u32,
}

impl ArchiveName {
    pub fn parse(file_name: &str) -> Option<Self> {
        let caps = ARCHIVE_NAME.captures(file_name)?;
        let seq = match caps.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        Some(Self {
            stamp: caps[1].to_string(),
            seq,
        })
    }

    pub fn file_name(&self) -> String {
        if self.seq == 0 {
            format!("backup_{}.zip", self.stamp)
        } else {
            format!("backup_{}_{}.zip", self.stamp, self.seq)
        }
    }
}

/// Pick the archive path for a download starting at `now`.
///
/// The first free name for that second wins; neither the archive nor its
/// partial file may already exist.
pub fn next_archive_path<Tz>(dir: &Path, now: DateTime<Tz>) -> PathBuf
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let stamp = now.format(TIMESTAMP_FORMAT).to_string();
    let mut seq = 0;
    loop {
        let name = ArchiveName {
            stamp: stamp.clone(),
            seq,
        }
        .file_name();
        let candidate = dir.join(&name);
        if !candidate.exists() && !partial_path(&candidate).exists() {
            return candidate;
        }
        seq += 1;
    }
}

pub fn partial_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// An archive found on disk.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub name: ArchiveName,
    pub size: u64,
    pub modified: SystemTime,
}

impl ArchiveEntry {
    pub fn file_name(&self) -> String {
        self.name.file_name()
    }

    /// Newest first: modification time, then the timestamp embedded in the name.
    fn newest_first(a: &Self, b: &Self) -> Ordering {
        b.modified
            .cmp(&a.modified)
            .then_with(|| b.name.cmp(&a.name))
    }
}

/// List archives in a project directory, newest first.
///
/// A missing directory has no archives. Entries whose metadata cannot be
/// read are skipped; only a failure to read the directory itself is an error.
pub fn list_archives(dir: &Path) -> io::Result<Vec<ArchiveEntry>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut archives = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str().and_then(ArchiveName::parse) else {
            continue;
        };

        let path = entry.path();
        let metadata = match fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            // Raced with a deletion
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable archive");
                continue;
            }
        };
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping archive without mtime");
                continue;
            }
        };

        archives.push(ArchiveEntry {
            path,
            name,
            size: metadata.len(),
            modified,
        });
    }

    archives.sort_by(ArchiveEntry::newest_first);
    Ok(archives)
}

/// Archive totals across every project directory under a destination root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveUsage {
    pub files: usize,
    pub bytes: u64,
}

pub fn usage(root: &Path) -> io::Result<ArchiveUsage> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ArchiveUsage::default()),
        Err(e) => return Err(e),
    };

    let mut usage = ArchiveUsage::default();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        for archive in list_archives(&entry.path())? {
            usage.files += 1;
            usage.bytes += archive.size;
        }
    }
    Ok(usage)
}
