//! SCM boundary — every git interaction the engine consumes.
//!
//! Backed by libgit2 via the `git2` crate. The engine only ever asks a
//! small set of questions (where is the repo, is this file tracked or
//! modified, what did the last commit touch) and performs a small set of
//! mutations (notes, hooks, config, ignore rules, fetch refspecs). All
//! functions take explicit paths; nothing reads process-global state
//! beyond the optional working-directory default.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use git2::{ErrorCode, Repository, Signature, Status};
use regex::Regex;

use crate::error::{GtmError, GtmResult};

/// A git hook managed by gtm.
///
/// `re` recognises a previously installed command line so that an existing
/// hook file is amended in place, never clobbered and never duplicated.
#[derive(Debug, Clone)]
pub struct GitHook {
    pub exe: &'static str,
    pub command: &'static str,
    pub re: &'static Regex,
}

/// Locate the `.git` directory governing `wd` (or the process cwd).
pub fn repo_path(wd: Option<&Path>) -> GtmResult<PathBuf> {
    let start = match wd {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let repo = Repository::discover(&start)?;
    Ok(repo.path().to_path_buf())
}

/// The working-tree root for a repository at `repo_path`.
pub fn work_dir(repo_path: &Path) -> GtmResult<PathBuf> {
    let repo = Repository::open(repo_path)?;
    repo.workdir()
        .map(Path::to_path_buf)
        .ok_or_else(|| GtmError::Other(format!("bare repository at {}", repo_path.display())))
}

fn open(repo_path: &Path) -> GtmResult<Repository> {
    Ok(Repository::open(repo_path)?)
}

/// Is the file (workdir-relative) in the git index?
pub fn tracked(file: &str, repo_path: &Path) -> GtmResult<bool> {
    let repo = open(repo_path)?;
    let index = repo.index()?;
    Ok(index.get_path(Path::new(file), 0).is_some())
}

/// Has the file (workdir-relative) been modified?
///
/// `staged = false` compares the working tree against the index;
/// `staged = true` compares the index against HEAD.
pub fn modified(file: &str, staged: bool, repo_path: &Path) -> GtmResult<bool> {
    let repo = open(repo_path)?;
    let status = repo.status_file(Path::new(file))?;
    let mask = if staged {
        Status::INDEX_NEW
            | Status::INDEX_MODIFIED
            | Status::INDEX_DELETED
            | Status::INDEX_RENAMED
            | Status::INDEX_TYPECHANGE
    } else {
        Status::WT_MODIFIED | Status::WT_DELETED | Status::WT_RENAMED | Status::WT_TYPECHANGE
    };
    Ok(status.intersects(mask))
}

/// Render the most recent commit as a parseable message:
/// subject line, body lines, a blank separator, then one touched path
/// per line. Consumed by [`parse_message`].
pub fn last_log(repo_path: &Path) -> GtmResult<String> {
    let repo = open(repo_path)?;
    let head = repo.head()?.peel_to_commit()?;

    let message = head.message().unwrap_or("");
    let mut lines = message.lines();
    let subject = lines.next().unwrap_or("").to_string();
    let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();

    let tree = head.tree()?;
    let parent_tree = head.parent(0).ok().and_then(|p| p.tree().ok());
    let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

    let mut files = Vec::new();
    for delta in diff.deltas() {
        if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
            files.push(path.to_string_lossy().replace('\\', "/"));
        }
    }
    files.sort();
    files.dedup();

    Ok(format!("{subject}\n{body}\n\n{}", files.join("\n")))
}

/// Split a [`last_log`] message into `(subject, body, files)`.
///
/// The file list follows the last blank line; everything between the
/// subject and that separator is the body.
pub fn parse_message(msg: &str) -> (String, String, Vec<String>) {
    let lines: Vec<&str> = msg.lines().collect();
    let subject = lines.first().copied().unwrap_or("").to_string();

    match lines.iter().rposition(|l| l.trim().is_empty()) {
        Some(i) if i > 0 => {
            let body = lines[1..i].join("\n").trim().to_string();
            let files = lines[i + 1..]
                .iter()
                .filter(|l| !l.trim().is_empty())
                .map(|l| l.to_string())
                .collect();
            (subject, body, files)
        }
        _ => {
            let body = lines.get(1..).unwrap_or(&[]).join("\n").trim().to_string();
            (subject, body, Vec::new())
        }
    }
}

fn signature(repo: &Repository) -> GtmResult<Signature<'static>> {
    match repo.signature() {
        Ok(sig) => Ok(sig),
        // No user.name/email configured — fall back to a fixed identity so
        // a post-commit hook still lands its note.
        Err(_) => Ok(Signature::now("Git Time Metric", "gtm@localhost")?),
    }
}

fn notes_ref(namespace: &str) -> String {
    format!("refs/notes/{namespace}")
}

/// Attach `text` as a note on HEAD in the given namespace.
///
/// If a note already exists the new text is concatenated after it,
/// matching git's `notes.rewriteMode = concatenate` policy.
pub fn add_note(text: &str, namespace: &str, repo_path: &Path) -> GtmResult<()> {
    let repo = open(repo_path)?;
    let oid = repo.head()?.peel_to_commit()?.id();
    attach_note(&repo, oid, text, namespace)
}

fn attach_note(repo: &Repository, oid: git2::Oid, text: &str, namespace: &str) -> GtmResult<()> {
    let sig = signature(repo)?;
    let ns = notes_ref(namespace);

    match repo.note(&sig, &sig, Some(&ns), oid, text, false) {
        Ok(_) => Ok(()),
        Err(e) if e.code() == ErrorCode::Exists => {
            let existing = repo
                .find_note(Some(&ns), oid)
                .ok()
                .and_then(|n| n.message().map(String::from))
                .unwrap_or_default();
            let merged = format!("{existing}\n{text}");
            repo.note(&sig, &sig, Some(&ns), oid, &merged, true)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Carry the note from a rewritten commit to its replacement.
///
/// A commit without a note is not an error — history rewrites touch
/// plenty of commits gtm never annotated.
pub fn rewrite_note(
    old_hash: &str,
    new_hash: &str,
    namespace: &str,
    repo_path: &Path,
) -> GtmResult<()> {
    let repo = open(repo_path)?;
    let old_oid = git2::Oid::from_str(old_hash)?;
    let new_oid = git2::Oid::from_str(new_hash)?;

    let ns = notes_ref(namespace);
    let note = match repo.find_note(Some(&ns), old_oid) {
        Ok(n) => n,
        Err(_) => return Ok(()),
    };
    let Some(text) = note.message().map(String::from) else {
        return Ok(());
    };
    attach_note(&repo, new_oid, &text, namespace)
}

/// Install managed hooks, amending existing hook files rather than
/// replacing them. Re-running is a no-op for hooks already present.
pub fn set_hooks(hooks: &BTreeMap<&str, GitHook>, repo_path: &Path) -> GtmResult<()> {
    let hooks_dir = repo_path.join("hooks");
    if !hooks_dir.exists() {
        fs::create_dir_all(&hooks_dir)?;
    }

    for (name, hook) in hooks {
        let path = hooks_dir.join(name);
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let updated = if hook.re.is_match(&content) {
                // NoExpand: hook commands may contain `$1` literally.
                hook.re
                    .replace_all(&content, regex::NoExpand(hook.command))
                    .into_owned()
            } else {
                format!("{}\n{}\n", content.trim_end(), hook.command)
            };
            if updated != content {
                fs::write(&path, updated)?;
            }
        } else {
            fs::write(&path, format!("#!/bin/sh\n{}\n", hook.command))?;
        }
        set_executable(&path)?;
    }
    Ok(())
}

/// Remove managed hook lines; files gtm did not create are left in place.
pub fn remove_hooks(hooks: &BTreeMap<&str, GitHook>, repo_path: &Path) -> GtmResult<()> {
    let hooks_dir = repo_path.join("hooks");
    for (name, hook) in hooks {
        let path = hooks_dir.join(name);
        if !path.exists() {
            continue;
        }
        let content = fs::read_to_string(&path)?;
        if hook.re.is_match(&content) {
            let stripped = hook.re.replace_all(&content, "").into_owned();
            fs::write(&path, stripped)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_executable(path: &Path) -> GtmResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> GtmResult<()> {
    Ok(())
}

/// Set local git config entries.
pub fn config_set(settings: &BTreeMap<&str, &str>, repo_path: &Path) -> GtmResult<()> {
    let repo = open(repo_path)?;
    let mut config = repo.config()?;
    for (key, value) in settings {
        config.set_str(key, value)?;
    }
    Ok(())
}

/// Remove local git config entries; absent keys are skipped.
pub fn config_remove(settings: &BTreeMap<&str, &str>, repo_path: &Path) -> GtmResult<()> {
    let repo = open(repo_path)?;
    let mut config = repo.config()?;
    for key in settings.keys() {
        match config.remove(key) {
            Ok(()) => {}
            Err(e) if e.code() == ErrorCode::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Append an ignore pattern to the working tree's `.gitignore` unless
/// an identical line is already present.
pub fn ignore_set(pattern: &str, work_dir: &Path) -> GtmResult<()> {
    let path = work_dir.join(".gitignore");
    if path.exists() {
        let content = fs::read_to_string(&path)?;
        if content.lines().any(|l| l.trim() == pattern) {
            return Ok(());
        }
        let mut updated = content;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(pattern);
        updated.push('\n');
        fs::write(&path, updated)?;
    } else {
        fs::write(&path, format!("{pattern}\n"))?;
    }
    Ok(())
}

/// Drop an ignore pattern from `.gitignore` if present.
pub fn ignore_remove(pattern: &str, work_dir: &Path) -> GtmResult<()> {
    let path = work_dir.join(".gitignore");
    if !path.exists() {
        return Ok(());
    }
    let content = fs::read_to_string(&path)?;
    if !content.lines().any(|l| l.trim() == pattern) {
        return Ok(());
    }
    let kept: Vec<&str> = content.lines().filter(|l| l.trim() != pattern).collect();
    let mut updated = kept.join("\n");
    if !updated.is_empty() {
        updated.push('\n');
    }
    fs::write(&path, updated)?;
    Ok(())
}

/// Add fetch refspecs to every configured remote (skipping remotes that
/// already carry them).
pub fn fetch_refspecs_add(specs: &[&str], repo_path: &Path) -> GtmResult<()> {
    let repo = open(repo_path)?;
    let remotes = repo.remotes()?;
    for name in remotes.iter().flatten() {
        let remote = repo.find_remote(name)?;
        let existing: Vec<String> = remote
            .fetch_refspecs()?
            .iter()
            .flatten()
            .map(String::from)
            .collect();
        for spec in specs {
            if !existing.iter().any(|s| s == spec) {
                repo.remote_add_fetch(name, spec)?;
            }
        }
    }
    Ok(())
}

/// Remove fetch refspecs from every configured remote.
pub fn fetch_refspecs_remove(specs: &[&str], repo_path: &Path) -> GtmResult<()> {
    let repo = open(repo_path)?;
    let names: Vec<String> = repo.remotes()?.iter().flatten().map(String::from).collect();
    let mut config = repo.config()?;
    for name in names {
        for spec in specs {
            let key = format!("remote.{name}.fetch");
            match config.remove_multivar(&key, &regex::escape(spec)) {
                Ok(()) => {}
                Err(e) if e.code() == ErrorCode::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestRepo;
    use std::sync::LazyLock;

    static HOOK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"gtm\s+commit\s+--yes").unwrap());

    fn test_hook() -> GitHook {
        GitHook {
            exe: "gtm",
            command: "gtm commit --yes",
            re: &HOOK_RE,
        }
    }

    #[test]
    fn test_repo_discovery_from_subdir() {
        let repo = TestRepo::new();
        let sub = repo.work_dir().join("src");
        fs::create_dir_all(&sub).unwrap();

        let discovered = repo_path(Some(&sub)).unwrap();
        assert_eq!(
            discovered.canonicalize().unwrap(),
            repo.repo_path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_work_dir_resolution() {
        let repo = TestRepo::new();
        let wd = work_dir(&repo.repo_path()).unwrap();
        assert_eq!(
            wd.canonicalize().unwrap(),
            repo.work_dir().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_tracked_and_untracked() {
        let repo = TestRepo::new();
        repo.commit_file("README.md", "# readme", "initial");
        repo.write_file("scratch.txt", "untracked");

        assert!(tracked("README.md", &repo.repo_path()).unwrap());
        assert!(!tracked("scratch.txt", &repo.repo_path()).unwrap());
    }

    #[test]
    fn test_modified_worktree_vs_index() {
        let repo = TestRepo::new();
        repo.commit_file("a.txt", "one", "initial");

        assert!(!modified("a.txt", false, &repo.repo_path()).unwrap());
        repo.write_file("a.txt", "two");
        assert!(modified("a.txt", false, &repo.repo_path()).unwrap());
        assert!(!modified("a.txt", true, &repo.repo_path()).unwrap());
    }

    #[test]
    fn test_modified_staged() {
        let repo = TestRepo::new();
        repo.commit_file("a.txt", "one", "initial");
        repo.write_file("a.txt", "two");
        repo.stage_file("a.txt");

        assert!(modified("a.txt", true, &repo.repo_path()).unwrap());
        assert!(!modified("a.txt", false, &repo.repo_path()).unwrap());
    }

    #[test]
    fn test_last_log_and_parse() {
        let repo = TestRepo::new();
        repo.commit_file("a.txt", "one", "add a\n\nlonger description");

        let msg = last_log(&repo.repo_path()).unwrap();
        let (subject, body, files) = parse_message(&msg);
        assert_eq!(subject, "add a");
        assert_eq!(body, "longer description");
        assert_eq!(files, vec!["a.txt".to_string()]);
    }

    #[test]
    fn test_parse_message_no_body() {
        let repo = TestRepo::new();
        repo.commit_file("b.txt", "two", "add b");

        let (subject, body, files) = parse_message(&last_log(&repo.repo_path()).unwrap());
        assert_eq!(subject, "add b");
        assert!(body.is_empty());
        assert_eq!(files, vec!["b.txt".to_string()]);
    }

    #[test]
    fn test_add_note_and_concatenate() {
        let repo = TestRepo::new();
        repo.commit_file("a.txt", "one", "initial");

        add_note("total:60", "gtm-data", &repo.repo_path()).unwrap();
        add_note("total:30", "gtm-data", &repo.repo_path()).unwrap();

        let git = Repository::open(repo.repo_path()).unwrap();
        let oid = git.head().unwrap().peel_to_commit().unwrap().id();
        let note = git.find_note(Some("refs/notes/gtm-data"), oid).unwrap();
        let text = note.message().unwrap();
        assert!(text.contains("total:60"));
        assert!(text.contains("total:30"));
    }

    #[test]
    fn test_rewrite_note_moves_annotation() {
        let repo = TestRepo::new();
        let first = repo.commit_file("a.txt", "one", "first");
        add_note("total:60", "gtm-data", &repo.repo_path()).unwrap();
        let second = repo.commit_file("b.txt", "two", "second");

        rewrite_note(
            &first.to_string(),
            &second.to_string(),
            "gtm-data",
            &repo.repo_path(),
        )
        .unwrap();

        let git = Repository::open(repo.repo_path()).unwrap();
        let note = git.find_note(Some("refs/notes/gtm-data"), second).unwrap();
        assert!(note.message().unwrap().contains("total:60"));
    }

    #[test]
    fn test_rewrite_note_without_source_is_noop() {
        let repo = TestRepo::new();
        let first = repo.commit_file("a.txt", "one", "first");
        let second = repo.commit_file("b.txt", "two", "second");

        rewrite_note(
            &first.to_string(),
            &second.to_string(),
            "gtm-data",
            &repo.repo_path(),
        )
        .unwrap();
    }

    #[test]
    fn test_set_hooks_creates_file() {
        let repo = TestRepo::new();
        let mut hooks = BTreeMap::new();
        hooks.insert("post-commit", test_hook());

        set_hooks(&hooks, &repo.repo_path()).unwrap();

        let content =
            fs::read_to_string(repo.repo_path().join("hooks").join("post-commit")).unwrap();
        assert!(content.starts_with("#!/bin/sh"));
        assert!(content.contains("gtm commit --yes"));
    }

    #[test]
    fn test_set_hooks_amends_existing() {
        let repo = TestRepo::new();
        let hook_path = repo.repo_path().join("hooks").join("post-commit");
        fs::create_dir_all(hook_path.parent().unwrap()).unwrap();
        fs::write(&hook_path, "#!/bin/sh\nmake lint\n").unwrap();

        let mut hooks = BTreeMap::new();
        hooks.insert("post-commit", test_hook());
        set_hooks(&hooks, &repo.repo_path()).unwrap();

        let content = fs::read_to_string(&hook_path).unwrap();
        assert!(content.contains("make lint"));
        assert!(content.contains("gtm commit --yes"));
    }

    #[test]
    fn test_set_hooks_idempotent() {
        let repo = TestRepo::new();
        let mut hooks = BTreeMap::new();
        hooks.insert("post-commit", test_hook());

        set_hooks(&hooks, &repo.repo_path()).unwrap();
        set_hooks(&hooks, &repo.repo_path()).unwrap();

        let content =
            fs::read_to_string(repo.repo_path().join("hooks").join("post-commit")).unwrap();
        assert_eq!(content.matches("gtm commit --yes").count(), 1);
    }

    #[test]
    fn test_remove_hooks_strips_command() {
        let repo = TestRepo::new();
        let mut hooks = BTreeMap::new();
        hooks.insert("post-commit", test_hook());
        set_hooks(&hooks, &repo.repo_path()).unwrap();
        remove_hooks(&hooks, &repo.repo_path()).unwrap();

        let content =
            fs::read_to_string(repo.repo_path().join("hooks").join("post-commit")).unwrap();
        assert!(!content.contains("gtm commit --yes"));
    }

    #[test]
    fn test_config_set_and_remove() {
        let repo = TestRepo::new();
        let mut settings = BTreeMap::new();
        settings.insert("alias.pushgtm", "push origin refs/notes/gtm-data");

        config_set(&settings, &repo.repo_path()).unwrap();
        let git = Repository::open(repo.repo_path()).unwrap();
        let value = git
            .config()
            .unwrap()
            .get_string("alias.pushgtm")
            .unwrap();
        assert_eq!(value, "push origin refs/notes/gtm-data");

        config_remove(&settings, &repo.repo_path()).unwrap();
        // Removing again must not fail.
        config_remove(&settings, &repo.repo_path()).unwrap();
    }

    #[test]
    fn test_ignore_set_appends_once() {
        let repo = TestRepo::new();
        repo.write_file(".gitignore", "target/\n");

        ignore_set("/.gtm/", &repo.work_dir()).unwrap();
        ignore_set("/.gtm/", &repo.work_dir()).unwrap();

        let content = fs::read_to_string(repo.work_dir().join(".gitignore")).unwrap();
        assert!(content.contains("target/"));
        assert_eq!(content.matches("/.gtm/").count(), 1);
    }

    #[test]
    fn test_ignore_remove_keeps_other_lines() {
        let repo = TestRepo::new();
        repo.write_file(".gitignore", "target/\n/.gtm/\n*.tmp\n");

        ignore_remove("/.gtm/", &repo.work_dir()).unwrap();

        let content = fs::read_to_string(repo.work_dir().join(".gitignore")).unwrap();
        assert!(content.contains("target/"));
        assert!(content.contains("*.tmp"));
        assert!(!content.contains("/.gtm/"));
    }
}
