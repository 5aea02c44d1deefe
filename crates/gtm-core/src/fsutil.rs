//! Filesystem helpers for the `.gtm/` data directory.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::GtmResult;

/// Write data to a file atomically using temp-file-then-rename.
///
/// On POSIX, `rename()` within the same filesystem is atomic: either the
/// old file or the new file is visible, never a partial write. We fsync
/// the temp file before renaming so the data is durable on disk.
pub fn atomic_write(path: &Path, data: &[u8]) -> GtmResult<()> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_data()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Append a single line to a file, creating it on first write.
///
/// Event logs rely on the filesystem's `O_APPEND` semantics: two writers
/// appending short lines to the same epoch file interleave at line
/// granularity, which is all the sweep reader needs.
pub fn append_line(path: &Path, line: &str) -> GtmResult<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}
