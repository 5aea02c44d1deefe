//! Commit note wire format.
//!
//! The externally visible artifact: a line-oriented UTF-8 text attached
//! to a commit on `refs/notes/gtm-data`.
//!
//! ```text
//! total:150
//! src/main.rs:120,1585861200-60,1585861260-60,m
//! docs/usage.md:30,r
//! ```
//!
//! The first line carries the total; each body line carries a source
//! path, its seconds, an optional per-epoch breakdown, and a status
//! marker (`m` for files in the commit, `r` for tracked-and-unmodified
//! carry-forwards). Lines are ordered by descending seconds, ties broken
//! by path. The header total always equals the body sum.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{GtmError, GtmResult};

/// Why a file appears in the note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    /// Part of the commit.
    Modified,
    /// Tracked and unmodified carry-forward.
    ReadOnly,
}

impl NoteStatus {
    fn marker(self) -> char {
        match self {
            NoteStatus::Modified => 'm',
            NoteStatus::ReadOnly => 'r',
        }
    }

    fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "m" => Some(NoteStatus::Modified),
            "r" => Some(NoteStatus::ReadOnly),
            _ => None,
        }
    }
}

/// One file's share of a commit note.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDetail {
    pub source_file: String,
    pub time_spent: i64,
    /// Seconds per epoch window, for the windows allocated in this run.
    pub timeline: BTreeMap<i64, i64>,
    pub status: NoteStatus,
}

/// A complete commit note.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommitNote {
    pub files: Vec<FileDetail>,
}

impl CommitNote {
    /// Sum of per-file seconds — by construction equal to the marshalled
    /// `total:` header.
    pub fn total(&self) -> i64 {
        self.files.iter().map(|f| f.time_spent).sum()
    }

    /// Render the note text.
    pub fn marshal(&self) -> String {
        let mut files = self.files.clone();
        files.sort_by(|a, b| {
            b.time_spent
                .cmp(&a.time_spent)
                .then_with(|| a.source_file.cmp(&b.source_file))
        });

        let mut out = format!("total:{}\n", self.total());
        for detail in &files {
            out.push_str(&detail.source_file);
            out.push(':');
            out.push_str(&detail.time_spent.to_string());
            for (ep, seconds) in &detail.timeline {
                out.push_str(&format!(",{ep}-{seconds}"));
            }
            out.push(',');
            out.push(detail.status.marker());
            out.push('\n');
        }
        out
    }

    /// Parse a note text, asserting the total invariant.
    pub fn unmarshal(text: &str) -> GtmResult<CommitNote> {
        let mut lines = text.lines();
        let header = lines
            .next()
            .ok_or_else(|| GtmError::Other("empty commit note".to_string()))?;
        let total: i64 = header
            .strip_prefix("total:")
            .and_then(|t| t.trim().parse().ok())
            .ok_or_else(|| GtmError::Other(format!("invalid note header: {header}")))?;

        let mut files = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            files.push(parse_detail(line)?);
        }

        let note = CommitNote { files };
        if note.total() != total {
            return Err(GtmError::Other(format!(
                "note total {total} does not match body sum {}",
                note.total()
            )));
        }
        Ok(note)
    }
}

fn parse_detail(line: &str) -> GtmResult<FileDetail> {
    let bad = || GtmError::Other(format!("invalid note line: {line}"));

    let mut fields = line.split(',');
    let head = fields.next().ok_or_else(bad)?;
    let (source_file, seconds) = head.rsplit_once(':').ok_or_else(bad)?;
    let time_spent: i64 = seconds.trim().parse().map_err(|_| bad())?;

    let mut timeline = BTreeMap::new();
    let mut status = NoteStatus::Modified;

    for field in fields {
        let field = field.trim();
        if let Some(parsed) = NoteStatus::from_marker(field) {
            status = parsed;
            continue;
        }
        let (ep, seconds) = field.split_once('-').ok_or_else(bad)?;
        let ep: i64 = ep.parse().map_err(|_| bad())?;
        let seconds: i64 = seconds.parse().map_err(|_| bad())?;
        timeline.insert(ep, seconds);
    }

    Ok(FileDetail {
        source_file: source_file.to_string(),
        time_spent,
        timeline,
        status,
    })
}
