//! Append-only commit log (diagnostics only, never read for recovery)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::model::ChunkId;
use crate::Result;

/// One committed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub revision: u64,
    pub committed_at: DateTime<Utc>,
    pub operation: String,
    /// Chunks the transaction declared as touched
    pub chunk_ids: Vec<ChunkId>,
    pub bytes: usize,
    pub sha256: String,
    /// Backup written for the superseded state, if any
    #[serde(default)]
    pub backup: Option<String>,
}

impl AuditEntry {
    pub(crate) fn new(
        revision: u64,
        operation: &str,
        chunk_ids: Vec<ChunkId>,
        committed: &[u8],
        backup: Option<String>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(committed);
        Self {
            revision,
            committed_at: Utc::now(),
            operation: operation.to_string(),
            chunk_ids,
            bytes: committed.len(),
            sha256: format!("{:x}", hasher.finalize()),
            backup,
        }
    }
}

pub(crate) fn append(path: &Path, entry: &AuditEntry) -> Result<()> {
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.sync_data()?;
    Ok(())
}

/// Read all entries, skipping lines torn by a crash mid-append
pub(crate) fn read_all(path: &Path) -> Result<Vec<AuditEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(fs::File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable audit line"),
        }
    }
    Ok(entries)
}
