//! Repository locking for the process pipeline.
//!
//! The engine assumes a single writer per repository. Event appends can
//! safely race, but a full `process()` run (sweep, allocate, purge) must
//! not overlap another — an advisory file lock (`flock(2)` on Unix, via
//! the `fs2` crate) enforces that. The OS releases the lock when the
//! holding process dies, so no stale-lock cleanup is needed.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{GtmError, GtmResult};

/// Name of the lock file inside `.gtm/`.
const LOCK_FILE: &str = "gtm.lock";

/// An exclusive lock on a project's `.gtm/` directory.
///
/// Held for the lifetime of the value; released on drop.
pub struct GtmLock {
    _file: File,
}

impl GtmLock {
    /// Acquire an exclusive lock, polling until acquired or `timeout` expires.
    pub fn acquire(gtm_dir: &Path, timeout: Duration) -> GtmResult<Self> {
        let lock_path = gtm_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        let start = Instant::now();
        let poll_interval = Duration::from_millis(10);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(GtmLock { _file: file }),
                Err(_) if start.elapsed() >= timeout => {
                    return Err(GtmError::LockTimeout);
                }
                Err(_) => std::thread::sleep(poll_interval),
            }
        }
    }
}
