//! Per-file time accumulators and the epoch allocator.
//!
//! Each tracked burst of activity ends up in a [`FileMetric`]: total
//! seconds plus a per-epoch timeline. Records persist as one small text
//! file per source path (`<.gtm>/<FileId>.metric`, contents
//! `"<source_path>,<seconds>"`); the disk copy is the source of truth and
//! in-memory copies are discarded after each command.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::epoch;
use crate::error::{GtmError, GtmResult};
use crate::fsutil;
use crate::hash;
use crate::scm;

/// In-memory metric store: FileId → accumulator.
pub type MetricMap = BTreeMap<String, FileMetric>;

/// Accumulated time for one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetric {
    /// Workdir-relative source path.
    pub source_file: String,
    /// Total allocated seconds.
    pub time_spent: i64,
    /// Seconds allocated per epoch window during this run.
    pub timeline: BTreeMap<i64, i64>,
    /// True iff the record carries unsaved additions.
    pub updated: bool,
}

impl FileMetric {
    pub fn new(source_file: String, time_spent: i64, updated: bool) -> Self {
        FileMetric {
            source_file,
            time_spent,
            timeline: BTreeMap::new(),
            updated,
        }
    }

    /// Add allocated seconds for an epoch and mark the record dirty.
    pub fn add_time(&mut self, ep: i64, seconds: i64) {
        self.updated = true;
        self.time_spent += seconds;
        *self.timeline.entry(ep).or_insert(0) += seconds;
    }

    /// Is the source file in the git index? SCM errors are squashed to
    /// `false` — a broken lookup must not abort a commit hook.
    pub fn git_tracked(&self, repo_path: &Path) -> bool {
        match scm::tracked(&self.source_file, repo_path) {
            Ok(tracked) => tracked,
            Err(e) => {
                log::warn!("tracked lookup failed for {}: {e}", self.source_file);
                false
            }
        }
    }

    /// Has the source file been modified? SCM errors squash to `false`.
    pub fn git_modified(&self, staged: bool, repo_path: &Path) -> bool {
        match scm::modified(&self.source_file, staged, repo_path) {
            Ok(modified) => modified,
            Err(e) => {
                log::warn!("modified lookup failed for {}: {e}", self.source_file);
                false
            }
        }
    }
}

/// Distribute one epoch window's budget across the files active in it.
///
/// Each file receives `floor(count / total * WINDOW_SIZE)` seconds; the
/// rounding leftover goes to the last file in iteration order, so the
/// window always sums to exactly [`epoch::WINDOW_SIZE`].
pub fn allocate_time(ep: i64, metric_map: &mut MetricMap, counts: &BTreeMap<String, u32>) {
    let total: i64 = counts.values().map(|c| i64::from(*c)).sum();
    if total == 0 {
        return;
    }

    let mut allocated: i64 = 0;
    let mut last_file_id = None;

    for (file, count) in counts {
        let seconds = i64::from(*count) * epoch::WINDOW_SIZE / total;
        let file_id = hash::file_id(file);

        metric_map
            .entry(file_id.clone())
            .or_insert_with(|| FileMetric::new(file.clone(), 0, true))
            .add_time(ep, seconds);

        allocated += seconds;
        last_file_id = Some(file_id);
    }

    // Assign the floor-division remainder so the window sums exactly.
    if let Some(file_id) = last_file_id {
        if allocated < epoch::WINDOW_SIZE {
            if let Some(fm) = metric_map.get_mut(&file_id) {
                fm.add_time(ep, epoch::WINDOW_SIZE - allocated);
            }
        }
    }
}

/// Load every parseable `.metric` record under `gtm_dir`.
///
/// Malformed records are skipped; the corrupt file stays on disk for
/// inspection and must never block a commit hook.
pub fn load_metrics(gtm_dir: &Path) -> GtmResult<MetricMap> {
    let mut metrics = MetricMap::new();

    for entry in fs::read_dir(gtm_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(file_id) = name.strip_suffix(".metric") else {
            continue;
        };

        match read_metric_file(&entry.path()) {
            Ok(fm) => {
                metrics.insert(file_id.to_string(), fm);
            }
            Err(_) => continue,
        }
    }

    Ok(metrics)
}

fn read_metric_file(path: &Path) -> GtmResult<FileMetric> {
    let content = fs::read_to_string(path)?;
    let line = content.trim_end_matches('\n');

    let (source_file, seconds) = line
        .rsplit_once(',')
        .ok_or_else(|| GtmError::InvalidMetric(path.display().to_string()))?;
    let seconds: i64 = seconds
        .trim()
        .parse()
        .map_err(|_| GtmError::InvalidMetric(path.display().to_string()))?;
    if source_file.is_empty() || seconds < 0 {
        return Err(GtmError::InvalidMetric(path.display().to_string()));
    }

    Ok(FileMetric::new(source_file.to_string(), seconds, false))
}

/// Persist one record as `<FileId>.metric`.
pub fn write_metric_file(gtm_dir: &Path, fm: &FileMetric) -> GtmResult<()> {
    let path = gtm_dir.join(format!("{}.metric", hash::file_id(&fm.source_file)));
    let contents = format!("{},{}", fm.source_file, fm.time_spent);
    fsutil::atomic_write(&path, contents.as_bytes())
}

/// Delete a record's `.metric` file if present.
pub fn remove_metric_file(gtm_dir: &Path, file_id: &str) -> GtmResult<()> {
    let path = gtm_dir.join(format!("{file_id}.metric"));
    if !path.exists() {
        return Ok(());
    }
    fs::remove_file(path)?;
    Ok(())
}

/// Commit-time settlement of the store.
///
/// Records in the commit set are deleted (their time now lives in the
/// note), as are tracked-and-unmodified carry-forwards. Everything else
/// is kept, rewritten to disk when dirty.
pub fn save_and_purge(
    gtm_dir: &Path,
    repo_path: &Path,
    metric_map: &MetricMap,
    commit_map: &MetricMap,
) -> GtmResult<()> {
    for (file_id, fm) in metric_map {
        if commit_map.contains_key(file_id) {
            remove_metric_file(gtm_dir, file_id)?;
            continue;
        }
        if fm.git_tracked(repo_path) && !fm.git_modified(false, repo_path) {
            remove_metric_file(gtm_dir, file_id)?;
            continue;
        }
        if fm.updated {
            write_metric_file(gtm_dir, fm)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestRepo;

    fn counts(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
        pairs.iter().map(|(f, c)| (f.to_string(), *c)).collect()
    }

    fn time_for(map: &MetricMap, file: &str) -> i64 {
        map[&hash::file_id(file)].time_spent
    }

    #[test]
    fn test_allocate_single_file_gets_full_window() {
        let mut map = MetricMap::new();
        allocate_time(1585861200, &mut map, &counts(&[("a.txt", 3)]));
        assert_eq!(time_for(&map, "a.txt"), 60);
    }

    #[test]
    fn test_allocate_proportional_split() {
        let mut map = MetricMap::new();
        allocate_time(1585861200, &mut map, &counts(&[("a.txt", 3), ("b.txt", 1)]));
        assert_eq!(time_for(&map, "a.txt"), 45);
        assert_eq!(time_for(&map, "b.txt"), 15);
    }

    #[test]
    fn test_allocate_exact_thirds() {
        let mut map = MetricMap::new();
        allocate_time(
            1585861200,
            &mut map,
            &counts(&[("a.txt", 2), ("b.txt", 1), ("c.txt", 1)]),
        );
        assert_eq!(time_for(&map, "a.txt"), 30);
        assert_eq!(time_for(&map, "b.txt"), 15);
        assert_eq!(time_for(&map, "c.txt"), 15);
    }

    #[test]
    fn test_allocate_remainder_sums_to_window() {
        // 3/2/2 of 7 pings: floors 25+17+17 = 59; one leftover second
        // lands on some file so the window still sums to 60.
        let mut map = MetricMap::new();
        allocate_time(
            1585861200,
            &mut map,
            &counts(&[("a.txt", 3), ("b.txt", 2), ("c.txt", 2)]),
        );
        let total: i64 = map.values().map(|fm| fm.time_spent).sum();
        assert_eq!(total, 60);
    }

    #[test]
    fn test_allocate_heavy_epoch_still_sums_to_window() {
        // More pings than seconds in the window.
        let mut map = MetricMap::new();
        allocate_time(
            1585861200,
            &mut map,
            &counts(&[("a.txt", 100), ("b.txt", 71)]),
        );
        let total: i64 = map.values().map(|fm| fm.time_spent).sum();
        assert_eq!(total, 60);
    }

    #[test]
    fn test_allocate_accumulates_across_epochs() {
        let mut map = MetricMap::new();
        allocate_time(1585861200, &mut map, &counts(&[("a.txt", 1)]));
        allocate_time(1585861260, &mut map, &counts(&[("a.txt", 1)]));

        let fm = &map[&hash::file_id("a.txt")];
        assert_eq!(fm.time_spent, 120);
        assert_eq!(fm.timeline[&1585861200], 60);
        assert_eq!(fm.timeline[&1585861260], 60);
        assert!(fm.updated);
    }

    #[test]
    fn test_add_time_is_monotonic() {
        let mut fm = FileMetric::new("a.txt".to_string(), 10, false);
        fm.add_time(1585861200, 5);
        fm.add_time(1585861260, 0);
        assert_eq!(fm.time_spent, 15);
        assert!(fm.updated);
    }

    #[test]
    fn test_metric_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fm = FileMetric::new("src/main.rs".to_string(), 300, true);

        write_metric_file(dir.path(), &fm).unwrap();
        let loaded = load_metrics(dir.path()).unwrap();

        let got = &loaded[&hash::file_id("src/main.rs")];
        assert_eq!(got.source_file, "src/main.rs");
        assert_eq!(got.time_spent, 300);
        assert!(!got.updated);
    }

    #[test]
    fn test_load_skips_malformed_records() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("deadbeef.metric"), "no-comma-here").unwrap();
        fs::write(dir.path().join("cafebabe.metric"), "a.txt,not-a-number").unwrap();
        write_metric_file(
            dir.path(),
            &FileMetric::new("good.txt".to_string(), 12, true),
        )
        .unwrap();

        let loaded = load_metrics(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        // Corrupt files stay on disk for inspection.
        assert!(dir.path().join("deadbeef.metric").exists());
    }

    #[test]
    fn test_load_parses_path_with_comma() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("feedface.metric"), "notes, drafts/a.txt,30").unwrap();

        let loaded = load_metrics(dir.path()).unwrap();
        let fm = &loaded["feedface"];
        assert_eq!(fm.source_file, "notes, drafts/a.txt");
        assert_eq!(fm.time_spent, 30);
    }

    #[test]
    fn test_distinct_paths_distinct_metric_files() {
        let dir = tempfile::tempdir().unwrap();
        write_metric_file(dir.path(), &FileMetric::new("a.txt".to_string(), 1, true)).unwrap();
        write_metric_file(dir.path(), &FileMetric::new("b.txt".to_string(), 2, true)).unwrap();

        let count = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".metric"))
            .count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_save_and_purge_commit_set_removed() {
        let repo = TestRepo::new();
        let gtm_dir = repo.gtm_dir();
        repo.commit_file("a.txt", "one", "initial");

        let fm = FileMetric::new("a.txt".to_string(), 50, true);
        write_metric_file(&gtm_dir, &fm).unwrap();

        let mut metric_map = MetricMap::new();
        metric_map.insert(hash::file_id("a.txt"), fm.clone());
        let mut commit_map = MetricMap::new();
        commit_map.insert(hash::file_id("a.txt"), fm);

        save_and_purge(&gtm_dir, &repo.repo_path(), &metric_map, &commit_map).unwrap();
        assert!(!gtm_dir
            .join(format!("{}.metric", hash::file_id("a.txt")))
            .exists());
    }

    #[test]
    fn test_save_and_purge_carry_forward_removed() {
        let repo = TestRepo::new();
        let gtm_dir = repo.gtm_dir();
        repo.commit_file("b.txt", "clean", "initial");

        // Tracked, unmodified, not in the commit set — its time was carried
        // into the note, so the record is settled.
        let fm = FileMetric::new("b.txt".to_string(), 10, true);
        write_metric_file(&gtm_dir, &fm).unwrap();

        let mut metric_map = MetricMap::new();
        metric_map.insert(hash::file_id("b.txt"), fm);

        save_and_purge(&gtm_dir, &repo.repo_path(), &metric_map, &MetricMap::new()).unwrap();
        assert!(!gtm_dir
            .join(format!("{}.metric", hash::file_id("b.txt")))
            .exists());
    }

    #[test]
    fn test_save_and_purge_keeps_modified_and_untracked() {
        let repo = TestRepo::new();
        let gtm_dir = repo.gtm_dir();
        repo.commit_file("c.txt", "one", "initial");
        repo.write_file("c.txt", "dirty");
        repo.write_file("scratch.txt", "never tracked");

        let mut metric_map = MetricMap::new();
        metric_map.insert(
            hash::file_id("c.txt"),
            FileMetric::new("c.txt".to_string(), 20, true),
        );
        metric_map.insert(
            hash::file_id("scratch.txt"),
            FileMetric::new("scratch.txt".to_string(), 5, true),
        );

        save_and_purge(&gtm_dir, &repo.repo_path(), &metric_map, &MetricMap::new()).unwrap();

        assert!(gtm_dir
            .join(format!("{}.metric", hash::file_id("c.txt")))
            .exists());
        assert!(gtm_dir
            .join(format!("{}.metric", hash::file_id("scratch.txt")))
            .exists());
    }
}
