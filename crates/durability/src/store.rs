//! Durable snapshot store.
//!
//! On-disk layout is a single directory of timestamp-named files:
//!
//! - `snapshot.<millis>` — one full state capture, framed as
//!   `magic | codec-version | payload | crc32`
//! - `edits.<millis>` — edits appended since the snapshot of the same
//!   timestamp, as length-prefixed CRC-checked records
//!
//! Writes are single-owner; readers always resolve to an immutable,
//! fully-written file or fall back to an older one, so no locking is needed
//! across processes. Snapshot writes are atomic (temp file + rename) and
//! rotate the edit log *before* publishing the new snapshot: if rotation
//! fails, the previous snapshot plus its log remain authoritative.

use crate::codec::{CodecRegistry, SnapshotCodec};
use crate::snapshot_types::{TransactionEdit, TransactionSnapshot};
use palisade_core::{now_millis, Error, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SNAPSHOT_MAGIC: [u8; 4] = *b"PLSN";
const EDIT_LOG_MAGIC: [u8; 4] = *b"PLED";
const SNAPSHOT_PREFIX: &str = "snapshot.";
const EDIT_LOG_PREFIX: &str = "edits.";

/// Upper bound on a single edit record; anything larger is treated as a torn
/// or corrupt length prefix.
const MAX_EDIT_RECORD: usize = 64 * 1024 * 1024;

/// Metadata for one durable snapshot file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFileInfo {
    /// Timestamp encoded in the file name.
    pub timestamp_millis: u64,
    /// Full path to the file.
    pub path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// Append-only writer for one edit log file.
struct EditLogWriter {
    file: File,
    path: PathBuf,
    codec: Arc<dyn SnapshotCodec>,
}

impl EditLogWriter {
    fn create(path: &Path, codec: Arc<dyn SnapshotCodec>) -> Result<Self> {
        let mut file = File::create(path)?;
        file.write_all(&EDIT_LOG_MAGIC)?;
        file.write_all(&[codec.version()])?;
        file.sync_all()?;
        debug!(path = %path.display(), version = codec.version(), "Opened edit log");
        Ok(EditLogWriter {
            file,
            path: path.to_path_buf(),
            codec,
        })
    }

    fn append(&mut self, edit: &TransactionEdit) -> Result<()> {
        let payload = self.codec.encode_edit(edit)?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        let mut record = Vec::with_capacity(8 + payload.len());
        record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        record.extend_from_slice(&crc.to_le_bytes());
        record.extend_from_slice(&payload);

        self.file.write_all(&record)?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Durable, append-style persistence for transaction snapshots plus the
/// changes-since-snapshot edit log.
///
/// A store instance is the single writer for its directory; read-only
/// consumers (recovery of a fresh instance, the published-state cache) open
/// their own instance and only call the `read_*`/`list_*` methods.
pub struct SnapshotStore {
    dir: PathBuf,
    codecs: CodecRegistry,
    retain_count: usize,
    current_log: Option<EditLogWriter>,
}

impl SnapshotStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// `retain_count` is the number of newest snapshots kept by pruning;
    /// it is clamped to at least 1, and pruning additionally never deletes
    /// the second-newest snapshot so a concurrent reader mid-read always has
    /// a fallback.
    pub fn open(dir: impl Into<PathBuf>, codecs: CodecRegistry, retain_count: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(SnapshotStore {
            dir,
            codecs,
            retain_count: retain_count.max(1),
            current_log: None,
        })
    }

    /// The directory this store persists into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a snapshot durably and rotate the edit log to its timestamp.
    ///
    /// Old snapshots beyond the retention count, and edit logs older than the
    /// oldest retained snapshot, are pruned best-effort afterwards; pruning
    /// failures never fail the write.
    pub fn write_snapshot(&mut self, snapshot: &TransactionSnapshot) -> Result<SnapshotFileInfo> {
        let codec = Arc::clone(self.codecs.latest()?);
        let payload = codec.encode_snapshot(snapshot)?;
        // Two captures within one millisecond would target the same file
        // name; bump until free so the earlier snapshot is never clobbered.
        let mut ts = snapshot.timestamp_millis;
        while self.dir.join(format!("{SNAPSHOT_PREFIX}{ts}")).exists() {
            ts += 1;
        }
        let path = self.dir.join(format!("{SNAPSHOT_PREFIX}{ts}"));
        let temp_path = self.dir.join(format!("{SNAPSHOT_PREFIX}{ts}.tmp"));

        let mut framed = Vec::with_capacity(payload.len() + 9);
        framed.extend_from_slice(&SNAPSHOT_MAGIC);
        framed.push(codec.version());
        framed.extend_from_slice(&payload);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&framed);
        framed.extend_from_slice(&hasher.finalize().to_le_bytes());

        if temp_path.exists() {
            warn!(path = %temp_path.display(), "Removing stale temp file");
            let _ = fs::remove_file(&temp_path);
        }

        let write_result = (|| -> Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(&framed)?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(e) = write_result {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        // Rotate before publishing: if the new log cannot be opened, the
        // previous snapshot and its log stay authoritative.
        if let Err(e) = self.rotate_log(ts, Arc::clone(&codec)) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        let size_bytes = fs::metadata(&path)?.len();
        info!(
            path = %path.display(),
            timestamp_millis = ts,
            size_bytes,
            codec_version = codec.version(),
            "Snapshot written"
        );

        self.prune_old();

        Ok(SnapshotFileInfo {
            timestamp_millis: ts,
            path,
            size_bytes,
        })
    }

    /// Append one edit to the current edit log, opening one if necessary.
    pub fn append_edit(&mut self, edit: &TransactionEdit) -> Result<()> {
        self.ensure_log()?.append(edit)
    }

    /// Read the most recent recoverable state: the newest decodable snapshot
    /// with all subsequent edit logs replayed in order.
    ///
    /// A crash before the first checkpoint leaves edit logs with no snapshot
    /// file; those replay onto an empty base state, so fsynced edits are
    /// never lost. Unreadable files are skipped with a warning: a corrupt or
    /// unknown-codec latest snapshot falls back to the next older one, and a
    /// torn edit-log tail is truncated at the last intact record. Returns
    /// `Ok(None)` only when neither snapshots nor edit logs exist, and
    /// `RecoveryFailed` when snapshot files exist but none decodes.
    pub fn read_latest(&self) -> Result<Option<TransactionSnapshot>> {
        let (ts, mut snapshot) = match self.read_newest_decodable()? {
            Some(found) => found,
            None => {
                if self.list_edit_logs()?.is_empty() {
                    return Ok(None);
                }
                (0, TransactionSnapshot::default())
            }
        };

        let mut replayed = 0usize;
        for (log_ts, log_path) in self.list_edit_logs()? {
            if log_ts < ts {
                continue;
            }
            match self.read_edits(&log_path) {
                Ok(edits) => {
                    for edit in &edits {
                        snapshot.apply_edit(edit);
                    }
                    replayed += edits.len();
                }
                Err(e) => {
                    warn!(path = %log_path.display(), error = %e, "Skipping unreadable edit log");
                }
            }
        }

        info!(
            snapshot_millis = ts,
            replayed_edits = replayed,
            "Recovered transaction state"
        );
        Ok(Some(snapshot))
    }

    /// Read the newest decodable snapshot without replaying edits.
    ///
    /// This is the published-state view external consumers poll; they only
    /// ever need a durable point-in-time capture, not the exact live state.
    pub fn read_latest_snapshot(&self) -> Result<Option<TransactionSnapshot>> {
        Ok(self.read_newest_decodable()?.map(|(_, snapshot)| snapshot))
    }

    fn read_newest_decodable(&self) -> Result<Option<(u64, TransactionSnapshot)>> {
        let snapshots = self.list_snapshots()?;
        if snapshots.is_empty() {
            return Ok(None);
        }
        for info in &snapshots {
            match self.read_snapshot_file(&info.path) {
                Ok(snapshot) => return Ok(Some((info.timestamp_millis, snapshot))),
                Err(e) => {
                    warn!(path = %info.path.display(), error = %e, "Skipping unreadable snapshot");
                }
            }
        }
        Err(Error::RecoveryFailed(format!(
            "{} snapshot file(s) in {} but none decodable",
            snapshots.len(),
            self.dir.display()
        )))
    }

    /// Decode one snapshot file, verifying framing and checksum.
    pub fn read_snapshot_file(&self, path: &Path) -> Result<TransactionSnapshot> {
        let data = fs::read(path)?;
        if data.len() < SNAPSHOT_MAGIC.len() + 1 + 4 {
            return Err(Error::Corruption(format!(
                "snapshot file too short: {} bytes",
                data.len()
            )));
        }
        if data[..4] != SNAPSHOT_MAGIC {
            return Err(Error::Corruption("bad snapshot magic".to_string()));
        }

        let (content, crc_bytes) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(content);
        let computed = hasher.finalize();
        if stored != computed {
            return Err(Error::Corruption(format!(
                "snapshot checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }

        let codec = self.codecs.get(data[4])?;
        codec.decode_snapshot(&content[5..])
    }

    /// Read all intact edits from one log file.
    ///
    /// Stops at the first torn or corrupt record: a crash mid-append leaves
    /// at most one partial record at the tail, and everything before it is
    /// still usable.
    pub fn read_edits(&self, path: &Path) -> Result<Vec<TransactionEdit>> {
        let data = fs::read(path)?;
        if data.len() < EDIT_LOG_MAGIC.len() + 1 {
            return Err(Error::Corruption(format!(
                "edit log too short: {} bytes",
                data.len()
            )));
        }
        if data[..4] != EDIT_LOG_MAGIC {
            return Err(Error::Corruption("bad edit log magic".to_string()));
        }
        let codec = self.codecs.get(data[4])?;

        let mut edits = Vec::new();
        let mut offset = 5usize;
        while offset + 8 <= data.len() {
            let len = u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]) as usize;
            let crc = u32::from_le_bytes([
                data[offset + 4],
                data[offset + 5],
                data[offset + 6],
                data[offset + 7],
            ]);
            if len > MAX_EDIT_RECORD || offset + 8 + len > data.len() {
                warn!(path = %path.display(), offset, "Torn edit record at log tail, truncating");
                break;
            }
            let payload = &data[offset + 8..offset + 8 + len];
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(payload);
            if hasher.finalize() != crc {
                warn!(path = %path.display(), offset, "Edit record checksum mismatch, truncating");
                break;
            }
            match codec.decode_edit(payload) {
                Ok(edit) => edits.push(edit),
                Err(e) => {
                    warn!(path = %path.display(), offset, error = %e, "Undecodable edit record, truncating");
                    break;
                }
            }
            offset += 8 + len;
        }
        Ok(edits)
    }

    /// All snapshot files, newest first.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotFileInfo>> {
        let mut found = Vec::new();
        for (ts, path) in self.scan_files(SNAPSHOT_PREFIX)? {
            let size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            found.push(SnapshotFileInfo {
                timestamp_millis: ts,
                path,
                size_bytes,
            });
        }
        found.sort_by(|a, b| b.timestamp_millis.cmp(&a.timestamp_millis));
        Ok(found)
    }

    /// All edit log files, oldest first.
    pub fn list_edit_logs(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut found = self.scan_files(EDIT_LOG_PREFIX)?;
        found.sort_by_key(|(ts, _)| *ts);
        Ok(found)
    }

    fn scan_files(&self, prefix: &str) -> Result<Vec<(u64, PathBuf)>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(".tmp") {
                continue;
            }
            let Some(suffix) = name.strip_prefix(prefix) else {
                continue;
            };
            match suffix.parse::<u64>() {
                Ok(ts) => found.push((ts, entry.path())),
                Err(_) => debug!(name, "Ignoring file with non-numeric timestamp"),
            }
        }
        Ok(found)
    }

    fn ensure_log(&mut self) -> Result<&mut EditLogWriter> {
        if self.current_log.is_none() {
            let codec = Arc::clone(self.codecs.latest()?);
            let path = self.dir.join(format!("{EDIT_LOG_PREFIX}{}", now_millis()));
            self.current_log = Some(EditLogWriter::create(&path, codec)?);
        }
        match self.current_log.as_mut() {
            Some(writer) => Ok(writer),
            None => Err(Error::InvalidOperation("edit log unavailable".to_string())),
        }
    }

    fn rotate_log(&mut self, ts: u64, codec: Arc<dyn SnapshotCodec>) -> Result<()> {
        if let Some(old) = self.current_log.take() {
            debug!(path = %old.path.display(), "Closing edit log at rotation");
        }
        let path = self.dir.join(format!("{EDIT_LOG_PREFIX}{ts}"));
        self.current_log = Some(EditLogWriter::create(&path, codec)?);
        Ok(())
    }

    /// Best-effort retention pass. Deletion failures are logged, never
    /// propagated, and never block the snapshot write that triggered them.
    fn prune_old(&self) {
        let snapshots = match self.list_snapshots() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Retention listing failed");
                return;
            }
        };
        // Keep the newest retain_count, but always at least two when two
        // exist: a reader mid-read of the newest must have a fallback.
        let keep = self.retain_count.max(2).min(snapshots.len());
        if keep == snapshots.len() && snapshots.len() <= 1 {
            return;
        }

        for stale in &snapshots[keep..] {
            match fs::remove_file(&stale.path) {
                Ok(()) => debug!(path = %stale.path.display(), "Pruned old snapshot"),
                Err(e) => warn!(path = %stale.path.display(), error = %e, "Failed to prune snapshot"),
            }
        }

        let oldest_kept = snapshots[..keep]
            .iter()
            .map(|s| s.timestamp_millis)
            .min()
            .unwrap_or(0);
        match self.list_edit_logs() {
            Ok(logs) => {
                for (ts, path) in logs {
                    if ts < oldest_kept {
                        match fs::remove_file(&path) {
                            Ok(()) => debug!(path = %path.display(), "Pruned old edit log"),
                            Err(e) => {
                                warn!(path = %path.display(), error = %e, "Failed to prune edit log")
                            }
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "Edit log retention listing failed"),
        }
    }
}
