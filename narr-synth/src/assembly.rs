//! Assembly manifest for the downstream mixdown
//!
//! Entries are ordered by `chunk_id`, never by completion order.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use narr_common::model::{ChunkId, ChunkStatus, StateRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SynthResult;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub chunk_id: ChunkId,
    /// Relative to the job root
    pub audio_path: PathBuf,
    pub duration_secs: f64,
    /// Offset of this chunk in the assembled audio
    pub start_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyManifest {
    pub job_id: Uuid,
    /// State revision the manifest was built from
    pub revision: u64,
    pub generated_at: DateTime<Utc>,
    pub total_duration_secs: f64,
    pub entries: Vec<ManifestEntry>,
    /// Chunks not yet terminal
    pub missing: Vec<ChunkId>,
    pub failed: Vec<ChunkId>,
}

impl AssemblyManifest {
    /// Every chunk succeeded
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.failed.is_empty()
    }
}

/// Build the manifest from committed state
pub fn build_manifest(record: &StateRecord) -> AssemblyManifest {
    let mut succeeded: Vec<_> = record
        .chunks
        .values()
        .filter(|c| c.status == ChunkStatus::Succeeded)
        .filter_map(|c| {
            let path = c.audio_path.clone()?;
            Some((c.chunk_id, path, c.audio_duration_secs.unwrap_or(0.0)))
        })
        .collect();
    succeeded.sort_by_key(|(id, _, _)| *id);

    let mut offset = 0.0;
    let entries = succeeded
        .into_iter()
        .map(|(chunk_id, audio_path, duration_secs)| {
            let entry = ManifestEntry {
                chunk_id,
                audio_path,
                duration_secs,
                start_secs: offset,
            };
            offset += duration_secs;
            entry
        })
        .collect();

    let ids_with = |status: fn(ChunkStatus) -> bool| -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = record
            .chunks
            .values()
            .filter(|c| status(c.status))
            .map(|c| c.chunk_id)
            .collect();
        ids.sort();
        ids
    };

    AssemblyManifest {
        job_id: record.metadata.job_id,
        revision: record.metadata.revision,
        generated_at: Utc::now(),
        total_duration_secs: offset,
        entries,
        missing: ids_with(|s| !s.is_terminal()),
        failed: ids_with(|s| s == ChunkStatus::Failed),
    }
}

/// Write `manifest.json` under `root` via temp file and rename
pub fn write_manifest(root: &Path, manifest: &AssemblyManifest) -> SynthResult<PathBuf> {
    fs::create_dir_all(root)?;
    let path = root.join(MANIFEST_FILE);
    let tmp = root.join(format!("{}.tmp", MANIFEST_FILE));
    let mut bytes = serde_json::to_vec_pretty(manifest).map_err(narr_common::Error::from)?;
    bytes.push(b'\n');
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &path)?;
    tracing::debug!(path = %path.display(), entries = manifest.entries.len(), "Manifest written");
    Ok(path)
}
