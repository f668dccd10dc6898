// src/store.rs
//! Single-file Store (§4.1, §6): fixed header, `bincode`-serialized root
//! body, atomic checkpoint-replace.
//!
//! Grounded on the teacher's `storage::file_storage` checkpoint-replace
//! routine (temp file + sync + rename); the teacher's WAL/recovery layer is
//! dropped entirely (§4.1 explicitly trades WAL-replay complexity for
//! checkpoint-granularity crash atomicity), so there is no log to replay on
//! open — loading just decodes the last checkpointed root.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::database::Root;
use crate::error::{MainyDbError, Result};
use crate::{log_debug, log_warn};

const MAGIC: &[u8; 8] = b"MAINYDB\0";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

/// Lightweight op-counter journal: tracks how many mutating operations have
/// happened since the last checkpoint, with no entry log to replay (§4.1).
#[derive(Default)]
pub struct Journal {
    ops_since_checkpoint: AtomicU64,
    last_checkpoint_unix: AtomicU64,
}

impl Journal {
    pub fn record_op(&self) -> u64 {
        self.ops_since_checkpoint.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn note_checkpoint(&self) {
        self.ops_since_checkpoint.store(0, Ordering::Relaxed);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        self.last_checkpoint_unix.store(now, Ordering::Relaxed);
    }

    pub fn ops_since_checkpoint(&self) -> u64 {
        self.ops_since_checkpoint.load(Ordering::Relaxed)
    }

    pub fn seconds_since_checkpoint(&self) -> u64 {
        let last = self.last_checkpoint_unix.load(Ordering::Relaxed);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        now.saturating_sub(last)
    }
}

pub struct Store {
    path: PathBuf,
    pub journal: Journal,
}

#[derive(Serialize, Deserialize)]
struct Body {
    root: Root,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Store {
            path: path.into(),
            journal: Journal::default(),
        }
    }

    /// Load the root from disk, creating a fresh empty root if the file does
    /// not exist yet.
    pub fn load(&self) -> Result<Root> {
        if !self.path.exists() {
            return Ok(Root::default());
        }
        let mut file = File::open(&self.path)?;
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header).map_err(|_| MainyDbError::CorruptFile("truncated header".into()))?;
        if &header[0..8] != MAGIC {
            return Err(MainyDbError::CorruptFile("bad magic".into()));
        }
        let version = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if version != FORMAT_VERSION {
            return Err(MainyDbError::CorruptFile(format!("unsupported format version {}", version)));
        }
        let mut rest = Vec::new();
        file.read_to_end(&mut rest)?;
        if rest.is_empty() {
            return Err(MainyDbError::CorruptFile("truncated body".into()));
        }
        let body: Body = bincode::deserialize(&rest)?;
        Ok(body.root)
    }

    /// Checkpoint: serialize to a temp file in the same directory, fsync,
    /// then atomically rename over the live file. A failure here is logged
    /// and reported, never silently dropped, but does not itself corrupt the
    /// prior checkpoint (§7: "checkpoint errors do not abort the caller's
    /// operation").
    pub fn checkpoint(&self, root: &Root) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let tmp_path = dir.join(format!(
            ".{}.tmp",
            self.path.file_name().and_then(|n| n.to_str()).unwrap_or("mainydb")
        ));

        let body = Body { root: root.clone() };
        let encoded = bincode::serialize(&body)?;

        let write_result: Result<()> = (|| {
            let mut tmp = OpenOptions::new().write(true).create(true).truncate(true).open(&tmp_path)?;
            tmp.write_all(MAGIC)?;
            tmp.write_all(&FORMAT_VERSION.to_le_bytes())?;
            tmp.write_all(&[0u8; 4])?; // reserved
            tmp.write_all(&encoded)?;
            tmp.sync_all()?;
            Ok(())
        })();
        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &self.path)?;
        self.journal.note_checkpoint();
        log_debug!("checkpoint written: {} bytes", encoded.len());
        Ok(())
    }

    /// Whether the journal's triggers (§4.1: op count or elapsed time) say a
    /// checkpoint is due.
    pub fn checkpoint_due(&self, opts: &crate::options::EngineOptions) -> bool {
        self.journal.ops_since_checkpoint() >= opts.checkpoint_ops
            || self.journal.seconds_since_checkpoint() >= opts.checkpoint_interval_secs
    }

    pub fn checkpoint_if_due(&self, root: &Root, opts: &crate::options::EngineOptions) -> Result<()> {
        if self.checkpoint_due(opts) {
            if let Err(e) = self.checkpoint(root) {
                log_warn!("checkpoint failed, in-memory state remains authoritative: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_preserves_structure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.mdb");
        let store = Store::new(&path);

        let mut root = Root::default();
        root.databases.insert("app".into(), Database::default());
        store.checkpoint(&root).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.databases.contains_key("app"));
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.mdb");
        let store = Store::new(&path);
        store.checkpoint(&Root::default()).unwrap();

        // scenario 7: truncate after the header
        let data = fs::read(&path).unwrap();
        fs::write(&path, &data[..HEADER_LEN]).unwrap();

        let store2 = Store::new(&path);
        assert!(matches!(store2.load(), Err(MainyDbError::CorruptFile(_))));
    }

    #[test]
    fn missing_file_yields_empty_root() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.mdb");
        let store = Store::new(&path);
        let root = store.load().unwrap();
        assert!(root.databases.is_empty());
    }
}
