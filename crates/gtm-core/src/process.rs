//! The top-level pipeline: sweep events, allocate time, pick commit
//! files, compose the note, and settle the store.

use std::path::Path;
use std::time::Duration;

use crate::error::GtmResult;
use crate::event;
use crate::hash;
use crate::lock::GtmLock;
use crate::metric::{self, MetricMap};
use crate::note::{CommitNote, FileDetail, NoteStatus};
use crate::project;
use crate::scm;

/// Which git state triggered the pipeline.
///
/// `Working` and `Staging` are read-only previews; only `Committed`
/// consumes the event log, attaches the note, and purges the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitState {
    Working,
    Staging,
    Committed,
}

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the pipeline for the project containing `cwd` (or the process cwd).
///
/// Returns the note text: the preview in `Working`/`Staging`, the
/// attached note in `Committed`. With `debug` the swept event map and
/// both metric maps are appended.
pub fn process(state: GitState, debug: bool, cwd: Option<&Path>) -> GtmResult<String> {
    let (work_dir, gtm_dir) = project::paths(cwd)?;
    let repo_path = scm::repo_path(Some(&work_dir))?;

    let _lock = GtmLock::acquire(&gtm_dir, LOCK_TIMEOUT)?;

    let mut metric_map = metric::load_metrics(&gtm_dir)?;

    let consume = state == GitState::Committed;
    let event_map = event::sweep(&gtm_dir, consume)?;

    for (ep, counts) in &event_map {
        metric::allocate_time(*ep, &mut metric_map, counts);
    }

    let commit_map = build_commit_map(&metric_map, state, &repo_path)?;
    let note = compose_note(
        &metric_map,
        &commit_map,
        state == GitState::Staging,
        &repo_path,
    );

    let mut msg = note.marshal();
    if state == GitState::Committed {
        scm::add_note(&msg, project::NOTE_NAMESPACE, &repo_path)?;
        metric::save_and_purge(&gtm_dir, &repo_path, &metric_map, &commit_map)?;
    }

    if debug {
        msg.push_str(&format!("\nEventMap:\n{event_map:#?}\n"));
        msg.push_str(&format!("\nMetricMap:\n{metric_map:#?}\n"));
        msg.push_str(&format!("\nCommitMap:\n{commit_map:#?}\n"));
    }

    Ok(msg)
}

/// Select the records that belong to the current commit.
///
/// In `Committed` state: the intersection of the last commit's paths with
/// the store. Otherwise: every tracked record whose source is modified
/// (against the index for `Working`, against HEAD for `Staging`).
fn build_commit_map(
    metric_map: &MetricMap,
    state: GitState,
    repo_path: &Path,
) -> GtmResult<MetricMap> {
    let mut commit_map = MetricMap::new();

    if state == GitState::Committed {
        let msg = scm::last_log(repo_path)?;
        let (_, _, commit_files) = scm::parse_message(&msg);
        for file in commit_files {
            let file_id = hash::file_id(&file);
            if let Some(fm) = metric_map.get(&file_id) {
                commit_map.insert(file_id, fm.clone());
            }
        }
    } else {
        let staged = state == GitState::Staging;
        for (file_id, fm) in metric_map {
            if fm.git_tracked(repo_path) && fm.git_modified(staged, repo_path) {
                commit_map.insert(file_id.clone(), fm.clone());
            }
        }
    }

    Ok(commit_map)
}

/// Build the note: commit files as `m`, then every tracked-and-unmodified
/// record outside the commit set as an `r` carry-forward.
fn compose_note(
    metric_map: &MetricMap,
    commit_map: &MetricMap,
    staged: bool,
    repo_path: &Path,
) -> CommitNote {
    let mut files = Vec::new();

    for fm in commit_map.values() {
        files.push(FileDetail {
            source_file: fm.source_file.clone(),
            time_spent: fm.time_spent,
            timeline: fm.timeline.clone(),
            status: NoteStatus::Modified,
        });
    }

    for (file_id, fm) in metric_map {
        if commit_map.contains_key(file_id) {
            continue;
        }
        if fm.git_tracked(repo_path) && !fm.git_modified(staged, repo_path) {
            files.push(FileDetail {
                source_file: fm.source_file.clone(),
                time_spent: fm.time_spent,
                timeline: fm.timeline.clone(),
                status: NoteStatus::ReadOnly,
            });
        }
    }

    CommitNote { files }
}
