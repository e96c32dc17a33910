//! Durable, append-only log of completed transforms.
//!
//! The log lives in a single JSON file. Every operation runs under one
//! store-wide lock covering the full read-modify-write cycle: the file is
//! loaded, changed in memory, and rewritten in full. Rewriting costs time
//! proportional to the log size on every append, which is fine for the log
//! sizes this server deals with.
//!
//! A missing file is an empty log. A file that does not parse is also treated
//! as an empty log and is overwritten by the next append, losing whatever it
//! held. Both cases are logged.

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, warn};

use crate::record::{TransformRecord, decode_log, encode_log};

/// Shared handle to the log file.
///
/// Wrap it in an `Arc` and hand a clone to each connection handler. No other
/// code should touch the backing file.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RecordStore {
    /// Creates a store backed by `path`. Nothing is read or created until the
    /// first operation.
    ///
    /// The lock lives in the returned value, not in the file system. Open each
    /// path once per process and share that store; two stores over the same
    /// path do not exclude each other and can lose appends.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record` and returns the new length of the log.
    ///
    /// Concurrent appends are serialized by the store lock, so `N` appends
    /// grow the log by exactly `N` records. Their order in the log is the
    /// order in which they acquired the lock.
    pub async fn append(&self, record: TransformRecord) -> Result<usize> {
        let _guard = self.lock.lock().await;

        let mut records = load(&self.path).await?;
        records.push(record);
        persist(&self.path, &records).await?;

        debug!(path = %self.path.display(), records = records.len(), "appended record");
        Ok(records.len())
    }

    /// Returns the whole log as currently persisted.
    pub async fn snapshot(&self) -> Result<Vec<TransformRecord>> {
        let _guard = self.lock.lock().await;
        load(&self.path).await
    }
}

async fn load(path: &Path) -> Result<Vec<TransformRecord>> {
    let raw = match fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    match decode_log(&raw) {
        Ok(records) => Ok(records),
        Err(error) => {
            warn!(path = %path.display(), %error, "log file is not valid JSON; treating it as empty");
            Ok(Vec::new())
        }
    }
}

/// Writes the full log next to `path` and renames it into place, so a crash
/// mid-write leaves either the previous log or the new one on disk.
async fn persist(path: &Path, records: &[TransformRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let encoded = encode_log(records).context("failed to encode log")?;
    let staging = staging_path(path);
    let mut file = fs::File::create(&staging)
        .await
        .with_context(|| format!("failed to open {} for writing", staging.display()))?;
    file.write_all(&encoded)
        .await
        .with_context(|| format!("failed to write {}", staging.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("failed to sync {}", staging.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&staging, path).await {
        let _ = fs::remove_file(&staging).await;
        return Err(err).with_context(|| format!("failed to replace {}", path.display()));
    }
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("log"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::transform::transform;

    fn record(text: &str) -> TransformRecord {
        TransformRecord::new(text.to_string(), transform(text), 0.001)
    }

    #[tokio::test]
    async fn snapshot_of_missing_file_is_empty_and_creates_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path().join("output.json"));

        assert!(store.snapshot().await.expect("snapshot").is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn append_creates_parent_directory_and_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path().join("data").join("output.json"));

        let len = store.append(record("banana")).await.expect("append");

        assert_eq!(len, 1);
        assert!(store.path().is_file());
        assert_eq!(store.snapshot().await.expect("snapshot"), vec![record("banana")]);
    }

    #[tokio::test]
    async fn appends_keep_insertion_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RecordStore::open(dir.path().join("output.json"));

        for text in ["one", "two", "three"] {
            store.append(record(text)).await.expect("append");
        }

        let texts: Vec<String> = store
            .snapshot()
            .await
            .expect("snapshot")
            .into_iter()
            .map(|record| record.received_text)
            .collect();
        assert_eq!(texts, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn concurrent_appends_lose_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(RecordStore::open(dir.path().join("output.json")));
        store.append(record("seed")).await.expect("seed append");

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.append(record(&format!("request-{i}"))).await })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("append");
        }

        let records = store.snapshot().await.expect("snapshot");
        assert_eq!(records.len(), 51);
        for i in 0..50 {
            let text = format!("request-{i}");
            let matches = records.iter().filter(|r| r.received_text == text).count();
            assert_eq!(matches, 1, "{text} should appear exactly once");
        }
    }

    // Known data-loss path: corrupt content is replaced by the next append.
    #[tokio::test]
    async fn corrupt_file_is_treated_as_empty_then_overwritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output.json");
        std::fs::write(&path, "[{\"stringa_ricevuta\": ").expect("write corrupt file");
        let store = RecordStore::open(&path);

        assert!(store.snapshot().await.expect("snapshot").is_empty());
        let on_disk = std::fs::read_to_string(&path).expect("read file");
        assert_eq!(on_disk, "[{\"stringa_ricevuta\": ", "snapshot must not rewrite");

        store.append(record("fresh")).await.expect("append");
        assert_eq!(store.snapshot().await.expect("snapshot"), vec![record("fresh")]);
    }

    #[tokio::test]
    async fn reopened_store_sees_previous_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output.json");

        {
            let store = RecordStore::open(&path);
            store.append(record("before restart")).await.expect("append");
        }

        let store = RecordStore::open(&path);
        assert_eq!(
            store.snapshot().await.expect("snapshot"),
            vec![record("before restart")]
        );
        store.append(record("after restart")).await.expect("append");
        assert_eq!(store.snapshot().await.expect("snapshot").len(), 2);
    }

    #[tokio::test]
    async fn reads_log_written_by_other_tools() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output.json");
        std::fs::write(
            &path,
            r#"[
    {
        "stringa_ricevuta": "banana",
        "stringa_bwt": "annb$aa",
        "tempo_secondi": 1.2e-05
    }
]"#,
        )
        .expect("write log");

        let store = RecordStore::open(&path);
        let records = store.snapshot().await.expect("snapshot");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].transformed_text, "annb$aa");
    }

    #[tokio::test]
    async fn append_leaves_no_staging_file_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output.json");
        std::fs::write(dir.path().join("output.json.tmp"), "half a log").expect("stale file");
        let store = RecordStore::open(&path);

        store.append(record("banana")).await.expect("append");

        assert!(!dir.path().join("output.json.tmp").exists());
        let on_disk = std::fs::read(&path).expect("read log");
        assert_eq!(decode_log(&on_disk).expect("valid log"), vec![record("banana")]);
    }

    #[tokio::test]
    async fn failed_append_keeps_existing_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output.json");
        let store = RecordStore::open(&path);
        store.append(record("kept")).await.expect("append");

        // A directory where the staging file should go makes the write fail.
        std::fs::create_dir(dir.path().join("output.json.tmp")).expect("block staging");
        assert!(store.append(record("lost")).await.is_err());

        assert_eq!(store.snapshot().await.expect("snapshot"), vec![record("kept")]);
    }

    #[test]
    fn staging_file_sits_next_to_the_log() {
        assert_eq!(
            staging_path(Path::new("/data/output.json")),
            PathBuf::from("/data/output.json.tmp")
        );
    }
}
