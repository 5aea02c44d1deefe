//! Activity event log — append-only pings sharded by epoch window.
//!
//! Each editor save, focus change, or terminal ping appends one line (the
//! workdir-relative source path) to `<.gtm>/<epoch>.event`. Multiplicity
//! within a window is meaningful: it is the relative-activity signal the
//! allocator consumes. The sweep collapses every closed window into
//! per-file counts and, in consuming mode, deletes the folded files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::epoch;
use crate::error::{GtmError, GtmResult};
use crate::fsutil;
use crate::project;

/// Synthetic event sources live inside `.gtm/` and need not exist on disk:
/// application events (`<app>.app`, `<app>.run`, `<app>.build`) and the
/// terminal sentinel.
pub static APP_EVENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.gtm[\\/](?P<app>[^\\/]+)\.(?P<event>app|run|build)$").unwrap());

/// Name of the terminal sentinel file inside `.gtm/`.
pub const TERMINAL_APP: &str = "terminal.app";

/// `epoch → (source path → ping count)` for every swept window.
pub type EpochEventMap = BTreeMap<i64, BTreeMap<String, u32>>;

/// Record an activity ping for a file.
///
/// The project is resolved from the file's own directory, so plugins can
/// invoke this from any working directory. The path is stored relative to
/// the working-tree root with forward slashes.
pub fn record(file: &Path) -> GtmResult<()> {
    let given = file.to_string_lossy().to_string();
    if given.trim().is_empty() {
        return Err(GtmError::FileNotFound(given));
    }

    let abs = if file.is_absolute() {
        file.to_path_buf()
    } else {
        std::env::current_dir()?.join(file)
    };

    let synthetic = APP_EVENT_RE.is_match(&abs.to_string_lossy())
        || abs.file_name().is_some_and(|n| n == TERMINAL_APP);
    if !abs.exists() && !synthetic {
        return Err(GtmError::FileNotFound(given));
    }

    let start_dir = abs.parent().map(Path::to_path_buf).unwrap_or(abs.clone());
    let (work_dir, gtm_dir) = project::paths(Some(&start_dir))?;

    let rel = relative_to(&abs, &work_dir)?;
    let event_file = gtm_dir.join(format!("{}.event", epoch::current_window()));
    fsutil::append_line(&event_file, &rel)
}

/// Record a terminal ping.
///
/// Requires the `terminal.app` sentinel written by `init --terminal`;
/// without it terminal recording is disabled for the project.
pub fn record_terminal(cwd: Option<&Path>) -> GtmResult<()> {
    let (_, gtm_dir) = project::paths(cwd)?;
    let sentinel = gtm_dir.join(TERMINAL_APP);
    if !sentinel.exists() {
        return Err(GtmError::FileNotFound(sentinel.to_string_lossy().into_owned()));
    }
    record(&sentinel)
}

/// Sweep closed epoch windows into an [`EpochEventMap`].
///
/// The currently open window is always skipped. With `consume = true`
/// each folded event file is deleted after reading; with `consume = false`
/// (status preview) the log is left untouched.
pub fn sweep(gtm_dir: &Path, consume: bool) -> GtmResult<EpochEventMap> {
    let current = epoch::current_window();
    let mut map = EpochEventMap::new();

    for entry in fs::read_dir(gtm_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(stem) = name.strip_suffix(".event") else {
            continue;
        };
        let Ok(ep) = stem.parse::<i64>() else {
            continue;
        };
        if ep >= current {
            continue;
        }

        let content = fs::read_to_string(entry.path())?;
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            *counts.entry(line.to_string()).or_insert(0) += 1;
        }
        if !counts.is_empty() {
            map.insert(ep, counts);
        }

        if consume {
            fs::remove_file(entry.path())?;
        }
    }

    Ok(map)
}

/// Express `abs` relative to `work_dir`, normalised to forward slashes.
fn relative_to(abs: &Path, work_dir: &Path) -> GtmResult<String> {
    let abs_c = abs.canonicalize().unwrap_or_else(|_| clean_path(abs));
    let wd_c = work_dir
        .canonicalize()
        .unwrap_or_else(|_| work_dir.to_path_buf());

    let rel = abs_c.strip_prefix(&wd_c).map_err(|_| {
        GtmError::Other(format!(
            "{} is outside the working tree {}",
            abs.display(),
            work_dir.display()
        ))
    })?;
    Ok(rel.to_string_lossy().replace('\\', "/"))
}

/// Lexically normalise a path that may not exist (synthetic sources).
fn clean_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
