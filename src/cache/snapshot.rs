//! Crash-safe snapshot persistence for the cache.
//!
//! A snapshot is one JSON document written to a temporary file in the target
//! directory and renamed over the previous snapshot, so readers only ever
//! observe a complete file. Writes happen on a dedicated thread fed with
//! immutable documents over a channel; when several documents are queued only
//! the newest is written.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc::{self, UnboundedSender};

use super::entry::CacheEntry;
use crate::ReelResult;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Persisted form of the cache.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotDocument {
    /// Format version.
    pub version: u32,

    /// Moment the snapshot was taken.
    pub saved_at: DateTime<Utc>,

    /// Entries, least recently accessed first.
    pub entries: Vec<CacheEntry>,

    /// Order in which the store produced this document.
    #[serde(skip)]
    pub generation: u64,
}

impl SnapshotDocument {
    /// Creates a document from already-consistent entries.
    pub fn new(entries: Vec<CacheEntry>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            entries,
            generation: 0,
        }
    }

    /// Sets the generation.
    #[must_use]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }
}

/// Loose form used when reading, so one bad entry cannot spoil the rest.
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    version: u32,
    #[serde(default)]
    entries: Vec<Value>,
}

/// Reads the live entries of a snapshot file.
///
/// A missing, unreadable or malformed file yields an empty list. Entries that
/// fail to deserialize or are already expired are skipped. The result is
/// ordered least recently accessed first.
pub fn load_snapshot(path: &Path) -> Vec<CacheEntry> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "No cache snapshot found, starting empty");
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read cache snapshot");
            return Vec::new();
        }
    };

    let raw: RawSnapshot = match serde_json::from_slice(&content) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Corrupt cache snapshot ignored");
            return Vec::new();
        }
    };

    if raw.version != SNAPSHOT_VERSION {
        tracing::warn!(
            path = %path.display(),
            version = raw.version,
            expected = SNAPSHOT_VERSION,
            "Unsupported cache snapshot version ignored"
        );
        return Vec::new();
    }

    let now = Utc::now();
    let total = raw.entries.len();
    let mut entries: Vec<CacheEntry> = raw
        .entries
        .into_iter()
        .filter_map(|value| serde_json::from_value::<CacheEntry>(value).ok())
        .filter(|entry| !entry.is_expired_at(now))
        .collect();
    entries.sort_by_key(|entry| (entry.last_accessed, entry.created_at));

    tracing::debug!(
        path = %path.display(),
        loaded = entries.len(),
        skipped = total - entries.len(),
        "Cache snapshot loaded"
    );

    entries
}

/// Writes a snapshot atomically.
pub fn write_snapshot(path: &Path, document: &SnapshotDocument) -> ReelResult<()> {
    let bytes = serde_json::to_vec(document)?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cache.json".to_string());
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = write_and_sync(&temp_path, &bytes).and_then(|_| {
        std::fs::rename(&temp_path, path)?;
        Ok(())
    });

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }

    result
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> ReelResult<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Serializes writers of one snapshot file and refuses to go back in time.
#[derive(Debug, Clone)]
struct FileGuard {
    path: PathBuf,
    last_generation: Arc<Mutex<u64>>,
}

impl FileGuard {
    fn write(&self, document: &SnapshotDocument) -> ReelResult<bool> {
        let mut last = self.last_generation.lock().unwrap_or_else(|e| e.into_inner());
        if document.generation < *last {
            return Ok(false);
        }
        write_snapshot(&self.path, document)?;
        *last = document.generation;
        Ok(true)
    }
}

/// Background writer owning the snapshot file.
///
/// Dropping the writer flushes whatever is still queued before returning.
/// Inside a multi-threaded tokio runtime the wait goes through
/// [`tokio::task::block_in_place`], so the worker's other tasks move on.
pub struct SnapshotWriter {
    guard: FileGuard,
    sender: Option<UnboundedSender<SnapshotDocument>>,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotWriter {
    /// Starts the writer thread for `path`.
    pub fn spawn(path: impl Into<PathBuf>) -> ReelResult<Self> {
        let guard = FileGuard {
            path: path.into(),
            last_generation: Arc::new(Mutex::new(0)),
        };
        let (sender, mut receiver) = mpsc::unbounded_channel::<SnapshotDocument>();
        let thread_guard = guard.clone();

        let handle = std::thread::Builder::new()
            .name("reelsmith-snapshot".to_string())
            .spawn(move || {
                while let Some(mut document) = receiver.blocking_recv() {
                    while let Ok(newer) = receiver.try_recv() {
                        document = newer;
                    }

                    let path = thread_guard.path.display();
                    match thread_guard.write(&document) {
                        Ok(true) => tracing::trace!(
                            path = %path,
                            entries = document.entries.len(),
                            "Cache snapshot written"
                        ),
                        Ok(false) => tracing::trace!(path = %path, "Stale cache snapshot skipped"),
                        Err(e) => tracing::warn!(
                            path = %path,
                            error = %e,
                            "Failed to write cache snapshot"
                        ),
                    }
                }
            })?;

        Ok(Self {
            guard,
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.guard.path
    }

    /// Writes a document on the calling thread.
    ///
    /// A document older than one already on disk is skipped.
    pub fn write_now(&self, document: &SnapshotDocument) -> ReelResult<()> {
        self.guard.write(document).map(|_| ())
    }

    /// Queues a document for writing. Never blocks.
    pub fn schedule(&self, document: SnapshotDocument) {
        let sent = self
            .sender
            .as_ref()
            .map(|sender| sender.send(document).is_ok())
            .unwrap_or(false);

        if !sent {
            tracing::warn!(
                path = %self.path().display(),
                "Snapshot writer stopped, skipping persistence"
            );
        }
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        // Closing the channel lets the thread drain the queue and exit.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let join = move || handle.join().is_err();
            let panicked = match Handle::try_current() {
                Ok(runtime) if runtime.runtime_flavor() == RuntimeFlavor::MultiThread => {
                    tokio::task::block_in_place(join)
                }
                _ => join(),
            };
            if panicked {
                tracing::error!(path = %self.path().display(), "Snapshot writer panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn entry(key: &str, ttl: Duration) -> CacheEntry {
        CacheEntry::new(key, "theme", json!({"text": key}), ttl, 16)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_snapshot(&dir.path().join("nope.json")).is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(load_snapshot(&path).is_empty());
    }

    #[test]
    fn test_unknown_version_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, json!({"version": 99, "entries": []}).to_string()).unwrap();

        assert!(load_snapshot(&path).is_empty());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let document = SnapshotDocument::new(vec![
            entry("a", Duration::from_secs(60)),
            entry("b", Duration::from_secs(60)),
        ]);
        write_snapshot(&path, &document).unwrap();

        let loaded = load_snapshot(&path);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].value, json!({"text": "a"}));

        // No temporary files are left behind.
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_skips_bad_and_expired_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut expired = entry("old", Duration::from_secs(1));
        expired.created_at = Utc::now() - chrono::Duration::hours(1);
        let good = entry("good", Duration::from_secs(3600));

        let document = json!({
            "version": SNAPSHOT_VERSION,
            "saved_at": Utc::now(),
            "entries": [
                serde_json::to_value(&expired).unwrap(),
                {"key": "broken"},
                serde_json::to_value(&good).unwrap(),
            ]
        });
        std::fs::write(&path, document.to_string()).unwrap();

        let loaded = load_snapshot(&path);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key, "good");
    }

    #[test]
    fn test_writer_flushes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        {
            let writer = SnapshotWriter::spawn(&path).unwrap();
            writer.schedule(SnapshotDocument::new(vec![entry("a", Duration::from_secs(60))]));
            writer.schedule(SnapshotDocument::new(vec![
                entry("a", Duration::from_secs(60)),
                entry("b", Duration::from_secs(60)),
            ]));
        }

        let loaded = load_snapshot(&path);
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_writer_dropped_inside_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let writer = SnapshotWriter::spawn(&path).unwrap();
        tokio::spawn(async move {
            writer.schedule(SnapshotDocument::new(vec![entry("a", Duration::from_secs(60))]));
            drop(writer);
        })
        .await
        .unwrap();

        assert_eq!(load_snapshot(&path).len(), 1);
    }

    #[tokio::test]
    async fn test_writer_dropped_on_current_thread_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let writer = SnapshotWriter::spawn(&path).unwrap();
        writer.schedule(SnapshotDocument::new(vec![entry("a", Duration::from_secs(60))]));
        drop(writer);

        assert_eq!(load_snapshot(&path).len(), 1);
    }

    #[test]
    fn test_stale_generation_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let writer = SnapshotWriter::spawn(&path).unwrap();

        let newer = SnapshotDocument::new(vec![
            entry("a", Duration::from_secs(60)),
            entry("b", Duration::from_secs(60)),
        ])
        .with_generation(2);
        let older =
            SnapshotDocument::new(vec![entry("a", Duration::from_secs(60))]).with_generation(1);

        writer.write_now(&newer).unwrap();
        writer.write_now(&older).unwrap();

        assert_eq!(load_snapshot(&path).len(), 2);
    }
}
