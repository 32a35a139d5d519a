//! The disk spill store: a flat directory of serialised payloads.
//!
//! Payloads land here in two situations: the producer-side overflow (queue
//! depth above the configured threshold) and worker shutdown with buffers
//! still queued. Each payload becomes one regular file holding the raw
//! bytes, named `YYYYMMDD-HHMMSS_NNNNNN` in the sender's local time zone so
//! that lexicographic order recovers chronological order on replay.

use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::Local;
use tokio::fs;

/// Upper bound accepted for the spill directory path.
pub(crate) const SPILL_PATH_MAX: usize = 4096;

/// Naming and listing for the spill directory.
///
/// The store never creates the directory: it must exist when the sender is
/// built, and the sender is its only writer.
pub(crate) struct SpillStore {
    dir: PathBuf,
}

impl SpillStore {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns a timestamp prefix for the filenames of one spill batch.
    pub(crate) fn stamp() -> String {
        Local::now().format("%Y%m%d-%H%M%S").to_string()
    }

    /// Picks the next unused filename for the given batch stamp.
    ///
    /// `counter` starts at zero per spill batch and advances on every probe,
    /// so repeated calls within the same second still yield distinct names;
    /// the final value carries over to the next buffer of the same batch.
    pub(crate) async fn unused_path(&self, stamp: &str, counter: &mut u32) -> PathBuf {
        loop {
            let path = self.dir.join(format!("{stamp}_{:06}", counter));
            *counter += 1;
            if fs::metadata(&path).await.is_err() {
                return path;
            }
        }
    }

    /// Lists the regular files awaiting replay, sorted lexicographically.
    ///
    /// Sorting recovers the chronological order the filename scheme encodes.
    /// Entries that are not regular files, and entries whose metadata cannot
    /// be read, are silently ignored.
    pub(crate) async fn scan(&self) -> io::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            match fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => files.push(path),
                _ => {}
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unused_path_probes_past_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpillStore::new(dir.path().to_path_buf());

        let stamp = SpillStore::stamp();
        let mut counter = 0;

        let first = store.unused_path(&stamp, &mut counter).await;
        assert!(first.ends_with(format!("{stamp}_000000")));
        fs::write(&first, b"a").await.unwrap();

        // The counter carried over, and the probe skips the taken name.
        let second = store.unused_path(&stamp, &mut counter).await;
        assert!(second.ends_with(format!("{stamp}_000001")));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_fresh_batch_probes_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpillStore::new(dir.path().to_path_buf());

        let stamp = SpillStore::stamp();
        let mut counter = 0;
        let first = store.unused_path(&stamp, &mut counter).await;
        fs::write(&first, b"a").await.unwrap();

        // A later batch within the same second restarts its counter and
        // probes until it clears the existing file.
        let mut counter = 0;
        let next = store.unused_path(&stamp, &mut counter).await;
        assert!(next.ends_with(format!("{stamp}_000001")));
    }

    #[tokio::test]
    async fn test_scan_sorts_and_skips_non_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpillStore::new(dir.path().to_path_buf());

        fs::write(dir.path().join("20240102-000000_000000"), b"b").await.unwrap();
        fs::write(dir.path().join("20240101-235959_000003"), b"a").await.unwrap();
        fs::write(dir.path().join("20240102-000000_000001"), b"c").await.unwrap();
        fs::create_dir(dir.path().join("subdir")).await.unwrap();

        let files = store.scan().await.unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(
            names,
            [
                "20240101-235959_000003",
                "20240102-000000_000000",
                "20240102-000000_000001",
            ]
        );
    }

    #[tokio::test]
    async fn test_scan_missing_directory_fails() {
        let store = SpillStore::new(PathBuf::from("/nonexistent/spool"));
        assert!(store.scan().await.is_err());
    }

    #[tokio::test]
    async fn test_scan_empty_directory_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = SpillStore::new(dir.path().to_path_buf());
        assert!(store.scan().await.unwrap().is_empty());
    }
}
