//! Project lifecycle: path resolution, initialize, uninitialize, clean.
//!
//! Initialization installs everything gtm needs inside the host git
//! repository: hooks, config aliases, note-rewrite settings, an ignore
//! rule for `.gtm/`, tag markers, the terminal sentinel, and an entry in
//! the global project registry. Uninitialize reverses each step. Both
//! are idempotent: detect-and-skip on the way in, detect-and-remove on
//! the way out.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::SystemTime;

use regex::Regex;

use crate::error::{GtmError, GtmResult};
use crate::event::{APP_EVENT_RE, TERMINAL_APP};
use crate::registry::ProjectRegistry;
use crate::scm::{self, GitHook};

/// The gtm git note namespace.
pub const NOTE_NAMESPACE: &str = "gtm-data";
/// The private data directory inside the working tree.
pub const GTM_DIR: &str = ".gtm";

const GIT_IGNORE: &str = "/.gtm/";
const GIT_FETCH_REFS: &[&str] = &["+refs/notes/gtm-data:refs/notes/gtm-data"];

static POST_COMMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"gtm(\.exe)?\s+commit\s+--yes").unwrap());
static PRE_PUSH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"git\s+push\s+origin\s+refs/notes/gtm-data\s+--no-verify").unwrap()
});
static GITLAB_MSG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"gtm(\.exe)?\s+status\s+--auto-log\s+gitlab\s+>>\s+\$1").unwrap()
});
static JIRA_MSG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"gtm(\.exe)?\s+status\s+--auto-log\s+jira\s+>>\s+\$1").unwrap()
});

/// Platforms whose commit messages gtm can auto-annotate with logged time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoLog {
    Gitlab,
    Jira,
}

impl AutoLog {
    pub fn as_str(self) -> &'static str {
        match self {
            AutoLog::Gitlab => "gitlab",
            AutoLog::Jira => "jira",
        }
    }
}

impl FromStr for AutoLog {
    type Err = GtmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gitlab" => Ok(AutoLog::Gitlab),
            "jira" => Ok(AutoLog::Jira),
            other => Err(GtmError::Other(format!(
                "unknown auto-log platform '{other}' (expected gitlab or jira)"
            ))),
        }
    }
}

fn base_hooks() -> BTreeMap<&'static str, GitHook> {
    let mut hooks = BTreeMap::new();
    hooks.insert(
        "post-commit",
        GitHook {
            exe: "gtm",
            command: "gtm commit --yes",
            re: &POST_COMMIT_RE,
        },
    );
    hooks
}

fn push_hooks() -> BTreeMap<&'static str, GitHook> {
    let mut hooks = BTreeMap::new();
    hooks.insert(
        "pre-push",
        GitHook {
            exe: "git",
            command: "git push origin refs/notes/gtm-data --no-verify",
            re: &PRE_PUSH_RE,
        },
    );
    hooks
}

fn auto_log_hooks(platform: AutoLog) -> BTreeMap<&'static str, GitHook> {
    let mut hooks = BTreeMap::new();
    let hook = match platform {
        AutoLog::Gitlab => GitHook {
            exe: "gtm",
            command: "gtm status --auto-log gitlab >> $1",
            re: &GITLAB_MSG_RE,
        },
        AutoLog::Jira => GitHook {
            exe: "gtm",
            command: "gtm status --auto-log jira >> $1",
            re: &JIRA_MSG_RE,
        },
    };
    hooks.insert("prepare-commit-msg", hook);
    hooks
}

fn git_config() -> BTreeMap<&'static str, &'static str> {
    let mut config = BTreeMap::new();
    config.insert("alias.pushgtm", "push origin refs/notes/gtm-data");
    config.insert(
        "alias.fetchgtm",
        "fetch origin refs/notes/gtm-data:refs/notes/gtm-data",
    );
    config.insert("notes.rewriteRef", "refs/notes/gtm-data");
    config.insert("notes.rewriteMode", "concatenate");
    config.insert("notes.rewrite.rebase", "true");
    config.insert("notes.rewrite.amend", "true");
    config
}

/// Resolve `(work_dir, gtm_dir)` for an initialized project.
///
/// Fails with [`GtmError::NotInitialized`] when no git repository is
/// found or `.gtm/` is absent under its working tree.
pub fn paths(wd: Option<&Path>) -> GtmResult<(PathBuf, PathBuf)> {
    let repo_path = scm::repo_path(wd).map_err(|_| GtmError::NotInitialized)?;
    let work_dir = scm::work_dir(&repo_path).map_err(|_| GtmError::NotInitialized)?;
    let gtm_dir = work_dir.join(GTM_DIR);
    if !gtm_dir.exists() {
        return Err(GtmError::NotInitialized);
    }
    Ok((work_dir, gtm_dir))
}

/// Options for [`initialize`].
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Write the terminal sentinel, enabling terminal-ping recording.
    pub terminal: bool,
    /// Tags to mark the project with.
    pub tags: Vec<String>,
    /// Remove all existing tag markers first.
    pub clear_tags: bool,
    /// Install a prepare-commit-msg hook for this platform.
    pub auto_log: Option<AutoLog>,
    /// Local-only: skip the pre-push hook and fetch refspecs.
    pub local: bool,
    /// Resolve the repository from here instead of the process cwd.
    pub cwd: Option<PathBuf>,
}

impl Default for InitOptions {
    fn default() -> Self {
        InitOptions {
            terminal: true,
            tags: Vec::new(),
            clear_tags: false,
            auto_log: None,
            local: false,
            cwd: None,
        }
    }
}

/// Initialize a git repository for time tracking. Returns a banner
/// describing everything that was installed.
pub fn initialize(opts: &InitOptions) -> GtmResult<String> {
    let repo_path = scm::repo_path(opts.cwd.as_deref()).map_err(|_| {
        GtmError::Other("unable to initialize Git Time Metric, git repository not found".into())
    })?;
    let work_dir = scm::work_dir(&repo_path)?;

    let gtm_dir = work_dir.join(GTM_DIR);
    if !gtm_dir.exists() {
        fs::create_dir_all(&gtm_dir)?;
        set_private(&gtm_dir)?;
    }

    if opts.clear_tags {
        remove_tags(&gtm_dir)?;
    }
    save_tags(&opts.tags, &gtm_dir)?;
    let tags = load_tags(&gtm_dir)?;

    let sentinel = gtm_dir.join(TERMINAL_APP);
    if opts.terminal {
        fs::write(&sentinel, "")?;
    } else {
        // May not exist; that is fine.
        let _ = fs::remove_file(&sentinel);
    }

    let mut hooks = base_hooks();
    if !opts.local {
        scm::fetch_refspecs_add(GIT_FETCH_REFS, &repo_path)?;
        hooks.extend(push_hooks());
    }
    if let Some(platform) = opts.auto_log {
        hooks.extend(auto_log_hooks(platform));
    }
    scm::set_hooks(&hooks, &repo_path)?;
    scm::config_set(&git_config(), &repo_path)?;
    scm::ignore_set(GIT_IGNORE, &work_dir)?;

    register_project(&work_dir, true);

    let mut banner = format!(
        "Git Time Metric initialized for {}\n\n",
        work_dir.display()
    );
    for (name, hook) in &hooks {
        banner.push_str(&format!("{:>20}: {}\n", name, hook.command));
    }
    for (key, value) in &git_config() {
        banner.push_str(&format!("{key:>20}: {value}\n"));
    }
    if !opts.local {
        for spec in GIT_FETCH_REFS {
            banner.push_str(&format!("{:>20}: {spec}\n", "add fetch ref"));
        }
    }
    banner.push_str(&format!("{:>20}: {}\n", "terminal", opts.terminal));
    banner.push_str(&format!("{:>20}: {GIT_IGNORE}\n", ".gitignore"));
    banner.push_str(&format!("{:>20}: {}\n", "tags", tags.join(" ")));

    Ok(banner)
}

/// Remove gtm tracking from a repository. Returns a banner listing what
/// was removed.
pub fn uninitialize(cwd: Option<&Path>) -> GtmResult<String> {
    let (work_dir, gtm_dir) = paths(cwd)?;
    let repo_path = scm::repo_path(Some(&work_dir))?;

    scm::remove_hooks(&base_hooks(), &repo_path)?;
    scm::remove_hooks(&push_hooks(), &repo_path)?;
    scm::remove_hooks(&auto_log_hooks(AutoLog::Gitlab), &repo_path)?;
    scm::remove_hooks(&auto_log_hooks(AutoLog::Jira), &repo_path)?;
    scm::config_remove(&git_config(), &repo_path)?;
    scm::fetch_refspecs_remove(GIT_FETCH_REFS, &repo_path)?;
    scm::ignore_remove(GIT_IGNORE, &work_dir)?;
    fs::remove_dir_all(&gtm_dir)?;

    register_project(&work_dir, false);

    let mut banner = format!(
        "Git Time Metric uninitialized for {}\n\nThe following items have been removed.\n\n",
        work_dir.display()
    );
    for (name, hook) in base_hooks().iter().chain(push_hooks().iter()) {
        banner.push_str(&format!("{:>20}: {}\n", name, hook.command));
    }
    for (key, value) in &git_config() {
        banner.push_str(&format!("{key:>20}: {value}\n"));
    }
    banner.push_str(&format!("{:>20}: {GIT_IGNORE}\n", ".gitignore"));

    Ok(banner)
}

/// Add or drop the registry entry for a working tree. Best-effort: a
/// missing or unwritable home directory must not fail init.
fn register_project(work_dir: &Path, add: bool) {
    let result = (|| -> GtmResult<()> {
        let path = ProjectRegistry::default_path()?;
        let mut registry = ProjectRegistry::load(&path)?;
        let key = work_dir.to_string_lossy().to_string();
        if add {
            registry.touch(&key);
        } else {
            registry.remove(&key);
        }
        registry.save(&path)
    })();
    if let Err(e) = result {
        log::warn!("project registry update failed: {e}");
    }
}

#[cfg(unix)]
fn set_private(dir: &Path) -> GtmResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_private(_dir: &Path) -> GtmResult<()> {
    Ok(())
}

/// Options for [`clean`].
#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    /// Only remove data files modified within the last N days.
    pub days: Option<u64>,
    /// Only remove event files referencing the terminal sentinel.
    pub only_terminal: bool,
    /// Only remove event files referencing synthetic app events.
    pub only_app: bool,
}

/// Delete pending event and metric data. Returns the removed file names.
pub fn clean(opts: &CleanOptions, cwd: Option<&Path>) -> GtmResult<Vec<String>> {
    let (_, gtm_dir) = paths(cwd)?;
    let cutoff = opts
        .days
        .map(|days| SystemTime::now() - std::time::Duration::from_secs(days * 86_400));

    let mut removed = Vec::new();
    for entry in fs::read_dir(&gtm_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let is_event = name.ends_with(".event");
        let is_metric = name.ends_with(".metric");
        if !is_event && !is_metric {
            continue;
        }

        if let Some(cutoff) = cutoff {
            let modified = entry.metadata()?.modified()?;
            if modified < cutoff {
                continue;
            }
        }

        if opts.only_terminal || opts.only_app {
            // Content filters restrict the clean to event files.
            if !is_event {
                continue;
            }
            let content = fs::read_to_string(entry.path())?;
            if opts.only_terminal && !content.contains(TERMINAL_APP) {
                continue;
            }
            if opts.only_app && !APP_EVENT_RE.is_match(&content) {
                continue;
            }
        }

        fs::remove_file(entry.path())?;
        removed.push(name);
    }

    removed.sort();
    Ok(removed)
}

/// Remove every tag marker.
pub fn remove_tags(gtm_dir: &Path) -> GtmResult<()> {
    for entry in fs::read_dir(gtm_dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().ends_with(".tag") {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// The project's tags, read from its `.tag` markers.
pub fn load_tags(gtm_dir: &Path) -> GtmResult<Vec<String>> {
    let mut tags = Vec::new();
    for entry in fs::read_dir(gtm_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(tag) = name.strip_suffix(".tag") {
            tags.push(tag.to_string());
        }
    }
    tags.sort();
    Ok(tags)
}

/// Write tag markers; blank tags are skipped.
pub fn save_tags(tags: &[String], gtm_dir: &Path) -> GtmResult<()> {
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        fs::write(gtm_dir.join(format!("{tag}.tag")), "")?;
    }
    Ok(())
}
