//! Timestamped snapshots of superseded state files

use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::Result;

const PREFIX: &str = "state-";
const SUFFIX: &str = ".json";

/// Write `bytes` as a new snapshot and evict the oldest beyond `keep`
///
/// At least one snapshot is always kept, so the one just written survives.
///
/// Snapshot names are `state-<stamp>-r<revision>.json`; the fixed-width stamp
/// makes lexical order equal chronological order.
pub(crate) fn write_snapshot(dir: &Path, bytes: &[u8], revision: u64, keep: usize) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let name = format!(
        "{}{}-r{:010}{}",
        PREFIX,
        crate::time::file_stamp(Utc::now()),
        revision,
        SUFFIX
    );
    let path = dir.join(name);
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &path)?;

    evict(dir, keep.max(1))?;
    Ok(path)
}

/// Snapshot paths, newest first
pub(crate) fn list_newest_first(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| {
                    let n = n.to_string_lossy();
                    n.starts_with(PREFIX) && n.ends_with(SUFFIX)
                })
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    paths.reverse();
    Ok(paths)
}

fn evict(dir: &Path, keep: usize) -> Result<()> {
    let snapshots = list_newest_first(dir)?;
    for old in snapshots.iter().skip(keep) {
        tracing::debug!(path = %old.display(), "Evicting old state backup");
        fs::remove_file(old)?;
    }
    Ok(())
}
