use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::models::{MediaType, TransferDestinations, TransferTask};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read source directory {}: {source}", path.display())]
    ReadRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("source {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("scan task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Walk `source_root` and build one task per photo or video file.
///
/// Files are flattened into the destination root chosen by media type.
/// Unreadable entries and subdirectories are skipped; only a root that
/// cannot be listed is an error.
pub async fn scan(
    source_root: &Path,
    destinations: &TransferDestinations,
) -> Result<Vec<TransferTask>, ScanError> {
    let source_root = source_root.to_path_buf();
    let destinations = destinations.clone();

    let tasks =
        tokio::task::spawn_blocking(move || scan_blocking(&source_root, &destinations)).await??;

    info!(tasks = tasks.len(), "Source scan complete");
    Ok(tasks)
}

fn scan_blocking(
    source_root: &Path,
    destinations: &TransferDestinations,
) -> Result<Vec<TransferTask>, ScanError> {
    let metadata = fs::metadata(source_root).map_err(|e| ScanError::ReadRoot {
        path: source_root.to_path_buf(),
        source: e,
    })?;
    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory(source_root.to_path_buf()));
    }

    let mut files = Vec::new();
    let root_entries = read_sorted(source_root).map_err(|e| ScanError::ReadRoot {
        path: source_root.to_path_buf(),
        source: e,
    })?;
    collect_files(root_entries, &mut files);

    let tasks = files
        .into_iter()
        .filter_map(|(path, size)| build_task(path, size, destinations))
        .collect();

    Ok(tasks)
}

fn read_sorted(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

fn collect_files(entries: Vec<PathBuf>, files: &mut Vec<(PathBuf, u64)>) {
    for path in entries {
        let link_metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if link_metadata.is_dir() {
            match read_sorted(&path) {
                Ok(children) => collect_files(children, files),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Skipping unreadable directory")
                }
            }
            continue;
        }

        // Follows symlinks; a broken link fails here and is skipped.
        match fs::metadata(&path) {
            Ok(m) if m.is_file() => files.push((path, m.len())),
            Ok(_) => {}
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable entry"),
        }
    }
}

/// Platform metadata that must never be ingested.
fn is_platform_metadata(name: &str) -> bool {
    name == ".DS_Store" || name.starts_with("._")
}

fn build_task(
    source: PathBuf,
    size: u64,
    destinations: &TransferDestinations,
) -> Option<TransferTask> {
    let file_name = source.file_name()?.to_owned();
    if is_platform_metadata(&file_name.to_string_lossy()) {
        return None;
    }

    let media_type = MediaType::from_path(&source)?;
    let destination = destinations.root_for(media_type).join(&file_name);

    Some(TransferTask {
        source,
        destination,
        size,
        media_type,
        enqueued_at: Utc::now(),
    })
}
