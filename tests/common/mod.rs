//! Helpers for tests that talk to a mocked remote service.

#![allow(dead_code)]

use mockito::{Matcher, Mock, ServerGuard};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use olbd::config::Credential;
use olbd::core::{BackupConfig, Project};

pub const SESSION: &str = "overleaf_session2=s%3Atest";

/// A minimal zip: just the end-of-central-directory record.
pub const ZIP_BYTES: &[u8] = &[
    0x50, 0x4b, 0x05, 0x06, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

pub fn export_path(project_id: &str) -> String {
    format!("/project/{}/download/zip", project_id)
}

/// A successful zip export for `project_id`.
pub async fn zip_export(server: &mut ServerGuard, project_id: &str) -> Mock {
    server
        .mock("GET", export_path(project_id).as_str())
        .with_status(200)
        .with_header("content-type", "application/zip")
        .with_body(ZIP_BYTES)
        .create_async()
        .await
}

/// Fails the test on any request when asserted.
pub async fn no_requests(server: &mut ServerGuard) -> Mock {
    server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await
}

/// A zip export whose body breaks off after a few bytes.
pub async fn aborted_export(server: &mut ServerGuard, project_id: &str) -> Mock {
    server
        .mock("GET", export_path(project_id).as_str())
        .with_status(200)
        .with_header("content-type", "application/zip")
        .with_chunked_body(|w: &mut dyn Write| {
            w.write_all(&ZIP_BYTES[..4])?;
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection dropped",
            ))
        })
        .create_async()
        .await
}

/// A zip export that sends a few bytes, then goes quiet for `quiet`.
pub async fn stalled_export(server: &mut ServerGuard, project_id: &str, quiet: Duration) -> Mock {
    server
        .mock("GET", export_path(project_id).as_str())
        .with_status(200)
        .with_header("content-type", "application/zip")
        .with_chunked_body(move |w: &mut dyn Write| {
            w.write_all(&ZIP_BYTES[..4])?;
            w.flush()?;
            std::thread::sleep(quiet);
            w.write_all(&ZIP_BYTES[4..])
        })
        .create_async()
        .await
}

pub fn backup_config(base_url: &str, root: &Path, projects: Vec<Project>) -> BackupConfig {
    BackupConfig {
        base_url: base_url.to_string(),
        credential: Credential::new(SESSION),
        destination_root: root.to_path_buf(),
        retention_count: 5,
        request_timeout: Duration::from_secs(10),
        projects,
    }
}

/// File names in `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
