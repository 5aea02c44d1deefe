//! gtm CLI — the human (and plugin) interface to Git Time Metric.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use gtm_core::epoch::format_duration;
use gtm_core::note::CommitNote;
use gtm_core::project::{self, AutoLog, CleanOptions, InitOptions};
use gtm_core::scm;
use gtm_core::{event, GitState, GtmError};

#[derive(Parser)]
#[command(name = "gtm", about = "Git Time Metric — seamless time tracking for git", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a git repository for time tracking.
    Init {
        /// Enable time tracking for the terminal (requires the terminal plug-in).
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        terminal: bool,

        /// Enable automatic logging to commit messages for a platform.
        #[arg(long, value_name = "gitlab|jira")]
        auto_log: Option<String>,

        /// Initialize locally: no push/fetch hooks or refspecs are added.
        #[arg(long)]
        local: bool,

        /// Tags for the project (comma-separated, appends to existing).
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,

        /// Remove all existing tags first.
        #[arg(long)]
        clear_tags: bool,

        /// Initialize the repository containing this directory.
        #[arg(long)]
        cwd: Option<PathBuf>,
    },

    /// Remove time tracking from the current git repository.
    Uninit {
        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },

    /// Record an activity event for a file.
    Record {
        /// File that was touched.
        file: Option<PathBuf>,

        /// Record a terminal ping instead of a file event.
        #[arg(long)]
        terminal: bool,

        /// Print the total pending time after recording.
        #[arg(long)]
        status: bool,
    },

    /// Show pending time as a note preview. Never mutates state.
    Status {
        /// Print only the formatted total.
        #[arg(long)]
        total_only: bool,

        /// Emit a platform time-log line (for prepare-commit-msg hooks).
        #[arg(long, value_name = "gitlab|jira")]
        auto_log: Option<String>,

        /// Output format: "note" (default) or "json".
        #[arg(long, default_value = "note")]
        format: String,
    },

    /// Attach pending time to the most recent commit. Called by the
    /// post-commit hook.
    Commit {
        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },

    /// Delete pending time data for the current git repository.
    Clean {
        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,

        /// Only remove data from the last N days.
        #[arg(long)]
        days: Option<u64>,

        /// Only remove terminal events.
        #[arg(long)]
        only_terminal: bool,

        /// Only remove application events.
        #[arg(long)]
        only_app: bool,
    },

    /// Move notes across a history rewrite. Reads "<old> <new>" hash
    /// pairs from stdin; called from git's post-rewrite plumbing.
    Rewrite,

    /// Check the gtm version against a constraint, e.g. ">= 1.0.0".
    Verify {
        /// Version constraint: an operator (>=, <=, >, <, =) and a version.
        constraint: String,
    },
}

fn main() {
    env_logger::init();

    // Usage errors exit 1, matching the plugin protocol; --help and
    // --version stay successful.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp
                | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            process::exit(code);
        }
    };

    let result = match cli.command {
        Commands::Init {
            terminal,
            auto_log,
            local,
            tags,
            clear_tags,
            cwd,
        } => cmd_init(terminal, auto_log, local, tags, clear_tags, cwd),
        Commands::Uninit { yes } => cmd_uninit(yes),
        Commands::Record {
            file,
            terminal,
            status,
        } => cmd_record(file, terminal, status),
        Commands::Status {
            total_only,
            auto_log,
            format,
        } => cmd_status(total_only, auto_log, &format),
        Commands::Commit { yes } => cmd_commit(yes),
        Commands::Clean {
            yes,
            days,
            only_terminal,
            only_app,
        } => cmd_clean(yes, days, only_terminal, only_app),
        Commands::Rewrite => cmd_rewrite(),
        Commands::Verify { constraint } => cmd_verify(&constraint),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

type CmdResult = Result<(), Box<dyn std::error::Error>>;

fn cmd_init(
    terminal: bool,
    auto_log: Option<String>,
    local: bool,
    tags: Option<Vec<String>>,
    clear_tags: bool,
    cwd: Option<PathBuf>,
) -> CmdResult {
    let auto_log = auto_log.map(|s| s.parse::<AutoLog>()).transpose()?;
    let opts = InitOptions {
        terminal,
        tags: tags.unwrap_or_default(),
        clear_tags,
        auto_log,
        local,
        cwd,
    };
    let banner = project::initialize(&opts)?;
    println!("{banner}");
    Ok(())
}

fn cmd_uninit(yes: bool) -> CmdResult {
    if !yes && !confirm("Remove Git Time Metric tracking for this repository (y/n)?")? {
        return Ok(());
    }
    let banner = project::uninitialize(None)?;
    println!("{banner}");
    Ok(())
}

fn cmd_record(file: Option<PathBuf>, terminal: bool, status: bool) -> CmdResult {
    let result = if terminal {
        event::record_terminal(None)
    } else {
        match file {
            Some(ref f) => event::record(f),
            None => return Err("nothing to record: provide a file or --terminal".into()),
        }
    };

    match result {
        Ok(()) => {}
        // Recording is best-effort: a vanished file must not fail an
        // editor save hook.
        Err(GtmError::FileNotFound(_)) => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    if status {
        let preview = gtm_core::process(GitState::Working, false, None)?;
        let note = CommitNote::unmarshal(&preview)?;
        print!("{}", format_duration(note.total()));
        io::stdout().flush()?;
    }
    Ok(())
}

fn cmd_status(total_only: bool, auto_log: Option<String>, format: &str) -> CmdResult {
    let preview = gtm_core::process(GitState::Working, false, None)?;
    let note = CommitNote::unmarshal(&preview)?;

    if let Some(platform) = auto_log {
        // Emit nothing when no time is pending so hooks stay quiet.
        if note.total() > 0 {
            match platform.parse::<AutoLog>()? {
                AutoLog::Gitlab => println!("/spend {}", format_duration(note.total())),
                AutoLog::Jira => println!("#time {}", format_duration(note.total())),
            }
        }
        return Ok(());
    }

    if total_only {
        println!("{}", format_duration(note.total()));
        return Ok(());
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&note)?),
        _ => print!("{preview}"),
    }
    Ok(())
}

fn cmd_commit(yes: bool) -> CmdResult {
    if !yes && !confirm("Save time for last commit (y/n)?")? {
        return Ok(());
    }
    gtm_core::process(GitState::Committed, false, None)?;
    Ok(())
}

fn cmd_clean(yes: bool, days: Option<u64>, only_terminal: bool, only_app: bool) -> CmdResult {
    if !yes && !confirm("Delete pending time data (y/n)?")? {
        return Ok(());
    }
    let opts = CleanOptions {
        days,
        only_terminal,
        only_app,
    };
    let removed = project::clean(&opts, None)?;
    for name in removed {
        println!("removed {name}");
    }
    Ok(())
}

fn cmd_rewrite() -> CmdResult {
    let (work_dir, _) = project::paths(None)?;
    let repo_path = scm::repo_path(Some(&work_dir))?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut hashes = trimmed.split_whitespace();
        let (Some(old), Some(new)) = (hashes.next(), hashes.next()) else {
            return Err(format!("unexpected rewrite input: {trimmed}").into());
        };
        if let Err(e) = scm::rewrite_note(old, new, project::NOTE_NAMESPACE, &repo_path) {
            // A rebase touches commits gtm never annotated; keep going.
            eprintln!("warning: could not move note {old} -> {new}: {e}");
        }
    }
    Ok(())
}

fn cmd_verify(constraint: &str) -> CmdResult {
    let valid = check_version(constraint, env!("CARGO_PKG_VERSION"))?;
    print!("{valid}");
    io::stdout().flush()?;
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool, io::Error> {
    print!("{prompt} ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Evaluate a version constraint like ">= 1.0.0" against `version`.
fn check_version(constraint: &str, version: &str) -> Result<bool, Box<dyn std::error::Error>> {
    let mut parts = constraint.split_whitespace();
    let (op, wanted) = match (parts.next(), parts.next()) {
        (Some(op), Some(v)) if matches!(op, ">=" | "<=" | ">" | "<" | "=" | "==") => (op, v),
        _ => return Err(format!("invalid version constraint: {constraint}").into()),
    };

    let ours = parse_version(version)?;
    let wanted = parse_version(wanted)?;
    let ordering = ours.cmp(&wanted);

    Ok(match op {
        ">=" => ordering.is_ge(),
        "<=" => ordering.is_le(),
        ">" => ordering.is_gt(),
        "<" => ordering.is_lt(),
        _ => ordering.is_eq(),
    })
}

/// A parsed version: numeric release segments plus an optional
/// pre-release tag. A release compares greater than its pre-releases.
#[derive(Debug, PartialEq, Eq)]
struct Version {
    release: Vec<u64>,
    pre: Option<String>,
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).copied().unwrap_or(0);
            let b = other.release.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                std::cmp::Ordering::Equal => {}
                other => return other,
            }
        }
        match (&self.pre, &other.pre) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (Some(_), None) => std::cmp::Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn parse_version(version: &str) -> Result<Version, Box<dyn std::error::Error>> {
    let stripped = version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version);
    let (main, pre) = match stripped.split_once('-') {
        Some((main, pre)) => (main, Some(pre.to_string())),
        None => (stripped, None),
    };

    let mut release = Vec::new();
    for segment in main.split('.') {
        let n: u64 = segment
            .parse()
            .map_err(|_| format!("invalid version: {version}"))?;
        release.push(n);
    }
    Ok(Version { release, pre })
}
