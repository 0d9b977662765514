//! Cross-process exclusion for relayer runs
//!
//! [`ExclusiveLease`] is the seam; [`FileLease`] is the local implementation,
//! a marker file created with `O_EXCL` semantics that records who holds it
//! and since when. A marker older than the TTL belongs to a crashed run and
//! is taken over.

use eyre::{Result, WrapErr};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::types::now_millis;

/// Default staleness threshold
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(300);

/// A lock that at most one relayer run holds at a time
pub trait ExclusiveLease: Send + Sync {
    /// Try to take the lease. `Ok(false)` means another live holder has it.
    fn acquire(&self, ttl: Duration) -> Result<bool>;

    /// Give the lease up. Best-effort and idempotent.
    fn release(&self);
}

/// Contents of the marker file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseMarker {
    pub pid: u32,
    pub host: String,
    /// Random value identifying this holder
    pub token: u64,
    pub acquired_at_ms: i64,
}

/// Marker-file lease on the local filesystem
#[derive(Debug)]
pub struct FileLease {
    path: PathBuf,
    token: u64,
    held: AtomicBool,
}

impl FileLease {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            token: rand::thread_rng().gen(),
            held: AtomicBool::new(false),
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    fn marker(&self) -> LeaseMarker {
        LeaseMarker {
            pid: std::process::id(),
            host: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_default(),
            token: self.token,
            acquired_at_ms: now_millis(),
        }
    }

    /// Create the marker if no file exists. Returns false when one does.
    fn try_create(&self) -> Result<bool> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(e).wrap_err_with(|| {
                    format!("Failed to create lease file {}", self.path.display())
                })
            }
        };

        let body = serde_json::to_vec(&self.marker()).wrap_err("Failed to encode lease marker")?;
        file.write_all(&body)
            .and_then(|_| file.sync_all())
            .wrap_err_with(|| format!("Failed to write lease file {}", self.path.display()))?;
        Ok(true)
    }

    fn tomb_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(format!(".stale-{}-{:x}", std::process::id(), self.token));
        PathBuf::from(name)
    }
}

impl ExclusiveLease for FileLease {
    fn acquire(&self, ttl: Duration) -> Result<bool> {
        if self.try_create()? {
            self.held.store(true, Ordering::SeqCst);
            debug!(path = %self.path.display(), "Lease acquired");
            return Ok(true);
        }

        match marker_age(&self.path) {
            Some(age) if age < ttl => {
                debug!(
                    path = %self.path.display(),
                    age_secs = age.as_secs(),
                    "Lease held by another run"
                );
                return Ok(false);
            }
            // Removed between our create and our read; one more try below
            None if !self.path.exists() => {}
            _ => {
                // Move the stale marker aside so only one contender wins
                // the takeover, then make sure what we moved is still stale.
                let tomb = self.tomb_path();
                match fs::rename(&self.path, &tomb) {
                    Ok(()) => {
                        if matches!(marker_age(&tomb), Some(age) if age < ttl) {
                            restore_marker(&tomb, &self.path);
                            return Ok(false);
                        }
                        let _ = fs::remove_file(&tomb);
                        warn!(
                            path = %self.path.display(),
                            ttl_secs = ttl.as_secs(),
                            "Took over stale lease left by an abandoned run"
                        );
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(e).wrap_err_with(|| {
                            format!("Failed to clear stale lease {}", self.path.display())
                        })
                    }
                }
            }
        }

        let acquired = self.try_create()?;
        if acquired {
            self.held.store(true, Ordering::SeqCst);
            debug!(path = %self.path.display(), "Lease acquired");
        }
        Ok(acquired)
    }

    fn release(&self) {
        if !self.held.swap(false, Ordering::SeqCst) {
            return;
        }

        match read_marker(&self.path) {
            Some(marker) if marker.token == self.token => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove lease file");
                } else {
                    debug!(path = %self.path.display(), "Lease released");
                }
            }
            _ => {
                warn!(
                    path = %self.path.display(),
                    "Lease file no longer ours, leaving it in place"
                );
            }
        }
    }
}

/// Put a marker moved aside by mistake back at `path`. A marker created at
/// `path` in the meantime is never overwritten.
fn restore_marker(tomb: &Path, path: &Path) {
    match fs::hard_link(tomb, path) {
        Ok(()) => debug!(path = %path.display(), "Restored live lease marker"),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            warn!(
                path = %path.display(),
                "Lease was re-created while restoring a live marker, keeping the new one"
            );
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to restore live lease marker");
            return;
        }
    }
    if let Err(e) = fs::remove_file(tomb) {
        warn!(path = %tomb.display(), error = %e, "Failed to remove moved lease marker");
    }
}

fn read_marker(path: &Path) -> Option<LeaseMarker> {
    let body = fs::read(path).ok()?;
    serde_json::from_slice(&body).ok()
}

/// Age of the marker at `path`, from its recorded timestamp or, when the body
/// is unreadable, from the file's modification time
fn marker_age(path: &Path) -> Option<Duration> {
    if let Some(marker) = read_marker(path) {
        let age_ms = now_millis().saturating_sub(marker.acquired_at_ms).max(0);
        return Some(Duration::from_millis(age_ms as u64));
    }

    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    )
}

/// Holds a lease for its lifetime and releases it on drop, including on
/// error and panic unwinding
pub struct LeaseGuard<L: ExclusiveLease> {
    lease: L,
}

impl<L: ExclusiveLease> LeaseGuard<L> {
    /// Acquire `lease`, returning `None` when another run holds it
    pub fn acquire(lease: L, ttl: Duration) -> Result<Option<Self>> {
        if lease.acquire(ttl)? {
            info!("Run lease acquired");
            Ok(Some(Self { lease }))
        } else {
            Ok(None)
        }
    }
}

impl<L: ExclusiveLease> Drop for LeaseGuard<L> {
    fn drop(&mut self) {
        self.lease.release();
    }
}
