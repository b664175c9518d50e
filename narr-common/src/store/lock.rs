//! Single-writer lock file
//!
//! The lock is a file created with `create_new`, holding the owner's pid,
//! creation time and a per-acquisition token. A lock whose owner is gone, or
//! that is older than the stale threshold, is archived next to the live lock
//! and replaced. Waiting is a bounded poll; running out of time fails the
//! caller instead of blocking.
//!
//! Takeover and release never delete by path alone. The file is first moved
//! to a private name, then its token is checked; a lock that turns out to
//! belong to someone else is linked back into place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    created_at: DateTime<Utc>,
    operation: String,
    #[serde(default)]
    token: Option<Uuid>,
}

/// Held writer lock; released on drop
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
    token: Uuid,
    released: bool,
}

/// What a claimed lock file turned out to contain
enum Claim {
    /// The expected contents were moved aside
    Taken,
    /// The path was already gone
    Vanished,
    /// Someone else's lock was moved and has been put back (or lost to a
    /// newer lock at the same path)
    Foreign,
}

impl WriterLock {
    /// Acquire the lock at `path`, polling until `timeout` elapses
    pub fn acquire(
        path: &Path,
        operation: &str,
        timeout: Duration,
        stale_after: Duration,
        poll: Duration,
    ) -> Result<Self> {
        let started = Instant::now();
        let mut logged_wait = false;

        loop {
            match Self::try_create(path, operation) {
                Ok(lock) => return Ok(lock),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            match fs::read_to_string(path) {
                Ok(contents) => match serde_json::from_str::<LockInfo>(&contents) {
                    Ok(info) if is_stale(&info, stale_after) => {
                        tracing::warn!(
                            path = %path.display(),
                            holder_pid = info.pid,
                            operation = %info.operation,
                            "Archiving stale writer lock"
                        );
                        archive(path, "stale", &contents)?;
                        continue;
                    }
                    Ok(info) => {
                        if !logged_wait {
                            tracing::debug!(
                                path = %path.display(),
                                holder_pid = info.pid,
                                operation = %info.operation,
                                "Waiting for writer lock"
                            );
                            logged_wait = true;
                        }
                    }
                    // A holder may be between create and write; only archive
                    // unreadable locks once they are old enough to be abandoned.
                    Err(_) if lock_file_age(path) > poll.max(Duration::from_millis(500)) => {
                        archive(path, "corrupt", &contents)?;
                        continue;
                    }
                    Err(_) => {}
                },
                // Released between our create attempt and read
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            if started.elapsed() >= timeout {
                tracing::error!(
                    path = %path.display(),
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Writer lock acquisition timed out"
                );
                return Err(Error::LockTimeout {
                    path: path.to_path_buf(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            std::thread::sleep(poll);
        }
    }

    fn try_create(path: &Path, operation: &str) -> std::io::Result<Self> {
        let token = Uuid::new_v4();
        let info = serde_json::to_string(&LockInfo {
            pid: std::process::id(),
            created_at: Utc::now(),
            operation: operation.to_owned(),
            token: Some(token),
        })?;
        let mut file = OpenOptions::new().create_new(true).write(true).open(path)?;
        // Nobody else can own the path yet, so a half-written lock is ours to remove
        if let Err(e) = file.write_all(info.as_bytes()).and_then(|()| file.sync_all()) {
            let _ = fs::remove_file(path);
            return Err(e);
        }
        Ok(Self {
            path: path.to_path_buf(),
            token,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly, surfacing removal errors
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let aside = private_name(&self.path, "release");
        let token = self.token;
        match claim(&self.path, &aside, |contents| {
            serde_json::from_str::<LockInfo>(contents)
                .map(|info| info.token == Some(token))
                .unwrap_or(false)
        })? {
            Claim::Taken => {
                fs::remove_file(&aside)?;
                Ok(())
            }
            Claim::Vanished => Ok(()),
            Claim::Foreign => {
                tracing::warn!(
                    path = %self.path.display(),
                    "Writer lock was taken over while held; leaving the new owner's lock"
                );
                Ok(())
            }
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove writer lock");
        }
    }
}

fn is_stale(info: &LockInfo, stale_after: Duration) -> bool {
    if !pid_is_alive(info.pid) {
        return true;
    }
    let age = Utc::now().signed_duration_since(info.created_at);
    age.to_std().map(|a| a > stale_after).unwrap_or(false)
}

fn lock_file_age(path: &Path) -> Duration {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
        .unwrap_or_default()
}

/// `<lock name>.<tag>.<millis>.<random>` next to the lock
fn private_name(path: &Path, tag: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "writer.lock".to_string());
    path.with_file_name(format!(
        "{}.{}.{}.{}",
        file_name,
        tag,
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    ))
}

/// Move the lock at `path` to `aside` and check it is the one expected
///
/// A lock that fails `expected` is hard-linked back, which fails rather than
/// overwrite if a newer lock already took the path.
fn claim(path: &Path, aside: &Path, expected: impl Fn(&str) -> bool) -> Result<Claim> {
    match fs::rename(path, aside) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Claim::Vanished),
        Err(e) => return Err(e.into()),
    }
    let contents = fs::read_to_string(aside)?;
    if expected(&contents) {
        return Ok(Claim::Taken);
    }
    match fs::hard_link(aside, path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            tracing::warn!(path = %path.display(), "Could not restore writer lock; a newer lock holds the path");
        }
        Err(e) => return Err(e.into()),
    }
    fs::remove_file(aside)?;
    Ok(Claim::Foreign)
}

/// Archive the lock only if it still holds the contents judged stale
fn archive(path: &Path, reason: &str, judged: &str) -> Result<()> {
    let archived = private_name(path, reason);
    // Vanished or Foreign: another waiter got there first
    claim(path, &archived, |contents| contents == judged)?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn pid_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}
