//! Transactional state store
//!
//! The store owns three plain-text artifacts under its directory:
//! - `current.json`: the committed [`StateRecord`]
//! - `backups/`: superseded snapshots, newest kept, oldest evicted
//! - `audit.jsonl`: one line per commit
//!
//! **Write protocol** (one commit):
//! 1. Serialize the whole new record to `current.json.tmp`, fsync
//! 2. Rename over `current.json`, fsync the directory
//! 3. Snapshot the previous bytes into `backups/`
//! 4. Append the audit line
//!
//! Step 2 is the commit point. Anything failing before it leaves
//! `current.json` untouched; failures after it are logged but do not undo the
//! commit. Writers are serialized in-process by a mutex and across processes
//! by the lock file.

mod audit;
mod backup;
mod lock;

pub use audit::AuditEntry;
pub use lock::WriterLock;

use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::config::StoreConfig;
use crate::model::{ChunkId, StateRecord};
use crate::{Error, Result};

const CURRENT_FILE: &str = "current.json";
const TMP_FILE: &str = "current.json.tmp";
const BACKUP_DIR: &str = "backups";
const AUDIT_FILE: &str = "audit.jsonl";
const LOCK_FILE: &str = "writer.lock";

/// Result of reading the store
#[derive(Debug, Clone)]
pub struct LoadedState {
    pub record: StateRecord,
    /// Backup that was used because `current.json` did not parse
    pub restored_from: Option<PathBuf>,
}

/// Outcome of a successful commit
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub revision: u64,
    pub bytes: usize,
    pub backup: Option<PathBuf>,
}

/// Durable, transactional job record
pub struct StateStore {
    dir: PathBuf,
    config: StoreConfig,
    writers: Mutex<()>,
}

impl StateStore {
    /// Open (creating if needed) the store rooted at `dir`
    ///
    /// Opening never touches files a running writer may own; readers and
    /// writers can open the same directory concurrently.
    pub fn open(dir: impl Into<PathBuf>, config: StoreConfig) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(BACKUP_DIR))?;

        Ok(Self {
            dir,
            config,
            writers: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_FILE)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.dir.join(AUDIT_FILE)
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(TMP_FILE)
    }

    fn backup_dir(&self) -> PathBuf {
        self.dir.join(BACKUP_DIR)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    /// Whether any state (current or backup) exists
    pub fn exists(&self) -> bool {
        self.current_path().exists()
            || backup::list_newest_first(&self.backup_dir())
                .map(|b| !b.is_empty())
                .unwrap_or(false)
    }

    /// Read the committed record, falling back to backups newest-first
    pub fn read(&self) -> Result<LoadedState> {
        let current = self.current_path();
        let failure = match fs::read(&current) {
            Ok(bytes) => match serde_json::from_slice::<StateRecord>(&bytes) {
                Ok(record) => {
                    return Ok(LoadedState {
                        record,
                        restored_from: None,
                    })
                }
                Err(e) => format!("current state does not parse: {}", e),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => "current state missing".to_string(),
            Err(e) => return Err(e.into()),
        };

        let backups = backup::list_newest_first(&self.backup_dir())?;
        if backups.is_empty() && !current.exists() {
            return Err(Error::NotFound(format!(
                "no job state under {}",
                self.dir.display()
            )));
        }

        tracing::warn!(path = %current.display(), reason = %failure, "Attempting restore from backups");
        for candidate in &backups {
            let parsed = fs::read(candidate)
                .map_err(Error::from)
                .and_then(|bytes| serde_json::from_slice::<StateRecord>(&bytes).map_err(Error::from));
            match parsed {
                Ok(record) => {
                    tracing::warn!(
                        backup = %candidate.display(),
                        revision = record.metadata.revision,
                        "Restored job state from backup"
                    );
                    return Ok(LoadedState {
                        record,
                        restored_from: Some(candidate.clone()),
                    });
                }
                Err(e) => {
                    tracing::warn!(backup = %candidate.display(), error = %e, "Backup unusable")
                }
            }
        }

        Err(Error::StateCorrupt {
            path: current,
            detail: format!("{}; {} backup(s) tried", failure, backups.len()),
        })
    }

    /// Raw bytes of `current.json`
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        Ok(fs::read(self.current_path())?)
    }

    /// Backup snapshots, newest first
    pub fn backups(&self) -> Result<Vec<PathBuf>> {
        backup::list_newest_first(&self.backup_dir())
    }

    /// All audit entries in commit order
    pub fn audit_entries(&self) -> Result<Vec<AuditEntry>> {
        audit::read_all(&self.audit_path())
    }

    fn lock_writers(&self) -> Result<(MutexGuard<'_, ()>, WriterLock)> {
        // A panicking writer never reached its rename, so the guarded data
        // (nothing) cannot be inconsistent.
        let guard = self.writers.lock().unwrap_or_else(|p| p.into_inner());
        let lock = WriterLock::acquire(
            &self.lock_path(),
            "transaction",
            self.config.lock_timeout(),
            self.config.lock_stale_after(),
            self.config.lock_poll_interval(),
        )?;
        self.discard_leftover_tmp()?;
        Ok((guard, lock))
    }

    /// Remove the residue of a write that never reached its rename
    ///
    /// Only called with the writer lock held.
    fn discard_leftover_tmp(&self) -> Result<()> {
        let tmp = self.tmp_path();
        match fs::remove_file(&tmp) {
            Ok(()) => {
                tracing::warn!(path = %tmp.display(), "Discarded uncommitted state write");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the first record of a job
    ///
    /// Fails if state already exists; resume goes through transactions.
    pub fn initialize(&self, mut record: StateRecord) -> Result<CommitReceipt> {
        let (_guard, _lock) = self.lock_writers()?;
        if self.exists() {
            return Err(Error::InvalidInput(format!(
                "job state already exists under {}",
                self.dir.display()
            )));
        }
        let touched = record.chunks.keys().copied().collect();
        self.write_record(&mut record, None, "initialize", touched)
    }

    /// Start a transaction against the latest committed record
    pub fn begin_transaction(&self, operation: &str) -> Result<Transaction<'_>> {
        let (guard, lock) = self.lock_writers()?;
        let loaded = self.read()?;
        let previous = match loaded.restored_from {
            // The damaged current file is not worth snapshotting
            Some(_) => None,
            None => Some(self.read_bytes()?),
        };
        Ok(Transaction {
            store: self,
            _guard: guard,
            _lock: lock,
            record: loaded.record,
            previous,
            operation: operation.to_string(),
            touched: BTreeSet::new(),
        })
    }

    /// Run `f` inside a transaction, committing only if it returns `Ok`
    pub fn transact<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut StateRecord) -> Result<T>,
    {
        let mut tx = self.begin_transaction(operation)?;
        let value = f(tx.record_mut())?;
        tx.commit()?;
        Ok(value)
    }

    /// Return failed chunks to pending in one transaction
    ///
    /// Unknown ids or chunks that are not failed abort the whole reset.
    pub fn reset_chunks(&self, ids: &[ChunkId]) -> Result<CommitReceipt> {
        let mut tx = self.begin_transaction("reset")?;
        for &id in ids {
            let chunk = tx
                .record_mut()
                .chunk_mut(id)
                .ok_or_else(|| Error::NotFound(format!("chunk {}", id)))?;
            chunk.reset()?;
            tx.touch(id);
        }
        tracing::info!(chunks = ids.len(), "Reset failed chunks to pending");
        tx.commit()
    }

    fn write_record(
        &self,
        record: &mut StateRecord,
        previous: Option<&[u8]>,
        operation: &str,
        touched: Vec<ChunkId>,
    ) -> Result<CommitReceipt> {
        record.metadata.revision += 1;
        record.metadata.updated_at = chrono::Utc::now();
        record.recompute_stats();

        let mut bytes = serde_json::to_vec_pretty(record)?;
        bytes.push(b'\n');

        let tmp = self.tmp_path();
        let staged = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(e) = staged {
            let _ = fs::remove_file(&tmp);
            record.metadata.revision -= 1;
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&tmp, self.current_path()) {
            let _ = fs::remove_file(&tmp);
            record.metadata.revision -= 1;
            return Err(e.into());
        }
        sync_dir(&self.dir);

        // Committed. Post-commit bookkeeping failures only reduce history.
        let revision = record.metadata.revision;
        let backup = match previous {
            Some(prev) => match backup::write_snapshot(
                &self.backup_dir(),
                prev,
                revision - 1,
                self.config.backup_count,
            ) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, revision, "Failed to write state backup");
                    None
                }
            },
            None => None,
        };

        let entry = audit::AuditEntry::new(
            revision,
            operation,
            touched,
            &bytes,
            backup
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
        );
        if let Err(e) = audit::append(&self.audit_path(), &entry) {
            tracing::warn!(error = %e, revision, "Failed to append audit entry");
        }

        tracing::debug!(revision, operation, bytes = bytes.len(), "State committed");
        Ok(CommitReceipt {
            revision,
            bytes: bytes.len(),
            backup,
        })
    }
}

/// Proposed mutation of the state record
///
/// Holds the writer lock for its lifetime. Dropping without [`commit`]
/// discards the mutation.
///
/// [`commit`]: Transaction::commit
pub struct Transaction<'a> {
    store: &'a StateStore,
    _guard: MutexGuard<'a, ()>,
    _lock: WriterLock,
    record: StateRecord,
    previous: Option<Vec<u8>>,
    operation: String,
    touched: BTreeSet<ChunkId>,
}

impl<'a> Transaction<'a> {
    pub fn record(&self) -> &StateRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut StateRecord {
        &mut self.record
    }

    /// Declare a chunk as modified (recorded in the audit log)
    pub fn touch(&mut self, id: ChunkId) {
        self.touched.insert(id);
    }

    /// Apply the mutation; on error the current file is unchanged
    pub fn commit(mut self) -> Result<CommitReceipt> {
        let touched = self.touched.iter().copied().collect();
        let previous = self.previous.take();
        let operation = std::mem::take(&mut self.operation);
        self.store
            .write_record(&mut self.record, previous.as_deref(), &operation, touched)
    }

    /// Discard the mutation (same as dropping)
    pub fn rollback(self) {
        tracing::debug!(operation = %self.operation, "Transaction rolled back");
    }
}

fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
            tracing::debug!(dir = %dir.display(), error = %e, "Directory fsync failed");
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkDescriptor, ChunkStatus};
    use tempfile::TempDir;

    fn record_with(n: u32) -> StateRecord {
        let mut record = StateRecord::new("kokoro");
        let descriptors: Vec<_> = (1..=n)
            .map(|i| ChunkDescriptor {
                chunk_id: ChunkId(i),
                text: format!("Line {}.", i),
                voice: None,
                engine: None,
            })
            .collect();
        record.merge_descriptors(&descriptors, |_| 1.0).unwrap();
        record
    }

    #[test]
    fn test_initialize_then_read() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path(), StoreConfig::default()).unwrap();

        let receipt = store.initialize(record_with(2)).unwrap();
        assert_eq!(receipt.revision, 1);
        assert!(receipt.backup.is_none());

        let loaded = store.read().unwrap();
        assert!(loaded.restored_from.is_none());
        assert_eq!(loaded.record.chunks.len(), 2);
        assert!(store.initialize(record_with(1)).is_err());
    }

    #[test]
    fn test_read_without_state_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path(), StoreConfig::default()).unwrap();
        assert!(matches!(store.read(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_dropped_transaction_discards_changes() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path(), StoreConfig::default()).unwrap();
        store.initialize(record_with(1)).unwrap();

        {
            let mut tx = store.begin_transaction("abandon").unwrap();
            tx.record_mut().chunk_mut(ChunkId(1)).unwrap().status = ChunkStatus::Failed;
        }

        let loaded = store.read().unwrap();
        assert_eq!(loaded.record.chunk(ChunkId(1)).unwrap().status, ChunkStatus::Pending);
        assert_eq!(loaded.record.metadata.revision, 1);
    }

    #[test]
    fn test_commit_writes_backup_and_audit() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path(), StoreConfig::default()).unwrap();
        store.initialize(record_with(1)).unwrap();

        let mut tx = store.begin_transaction("mark").unwrap();
        tx.record_mut().chunk_mut(ChunkId(1)).unwrap().status = ChunkStatus::Failed;
        tx.touch(ChunkId(1));
        let receipt = tx.commit().unwrap();

        assert_eq!(receipt.revision, 2);
        assert_eq!(store.backups().unwrap().len(), 1);

        let audit = store.audit_entries().unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[1].operation, "mark");
        assert_eq!(audit[1].chunk_ids, vec![ChunkId(1)]);
    }

    #[test]
    fn test_open_leaves_another_writers_tmp_alone() {
        let dir = TempDir::new().unwrap();
        let writer = StateStore::open(dir.path(), StoreConfig::default()).unwrap();
        writer.initialize(record_with(1)).unwrap();

        // Staged by a writer that has fsynced but not yet renamed
        let tmp = dir.path().join(TMP_FILE);
        fs::write(&tmp, writer.read_bytes().unwrap()).unwrap();

        let reader = StateStore::open(dir.path(), StoreConfig::default()).unwrap();
        assert!(tmp.exists());
        assert_eq!(reader.read().unwrap().record.metadata.revision, 1);
    }

    #[test]
    fn test_leftover_tmp_is_discarded_by_next_writer() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(dir.path(), StoreConfig::default()).unwrap();
        store.initialize(record_with(1)).unwrap();
        fs::write(dir.path().join(TMP_FILE), b"{\"metadata\": {\"torn").unwrap();

        let tx = store.begin_transaction("noop").unwrap();
        assert!(!dir.path().join(TMP_FILE).exists());
        tx.rollback();
        assert_eq!(store.read().unwrap().record.metadata.revision, 1);
    }
}
