//! Global registry of gtm-tracked repositories.
//!
//! A small JSON map of absolute working-tree path → last-touched
//! timestamp, kept at `~/.config/gtm/project.json`. It is fully loaded,
//! mutated in memory, and written back whole — the map is tiny.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{GtmError, GtmResult};
use crate::fsutil::atomic_write;
use crate::project;

/// Known projects and when they were last touched.
#[derive(Debug, Default, Clone)]
pub struct ProjectRegistry {
    pub projects: BTreeMap<String, DateTime<Utc>>,
}

impl ProjectRegistry {
    /// The registry's canonical location: `~/.config/gtm/project.json`.
    pub fn default_path() -> GtmResult<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| GtmError::Other("could not determine home directory".to_string()))?;
        Ok(home.join(".config").join("gtm").join("project.json"))
    }

    /// Load the registry, or start empty when the file does not exist.
    pub fn load(path: &Path) -> GtmResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let projects: BTreeMap<String, DateTime<Utc>> = serde_json::from_str(&raw)?;
        Ok(ProjectRegistry { projects })
    }

    /// Write the registry back, creating `~/.config/gtm` (mode 0700) on
    /// first use.
    pub fn save(&self, path: &Path) -> GtmResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
                set_private(parent)?;
            }
        }
        let json = serde_json::to_string(&self.projects)?;
        atomic_write(path, json.as_bytes())
    }

    /// Insert or refresh a project entry with the current time.
    pub fn touch(&mut self, project_path: &str) {
        self.projects.insert(project_path.to_string(), Utc::now());
    }

    /// Drop a project entry.
    pub fn remove(&mut self, project_path: &str) {
        self.projects.remove(project_path);
    }

    /// Known project roots, sorted.
    pub fn project_paths(&self) -> Vec<String> {
        self.projects.keys().cloned().collect()
    }

    /// Find project roots: all of them, those carrying one of `tags`, or
    /// the project containing `cwd`. Stale entries (repositories no
    /// longer initialized) are dropped from the lookup result.
    pub fn get(&mut self, tags: &[String], all: bool, cwd: Option<&Path>) -> GtmResult<Vec<String>> {
        if all {
            self.drop_stale();
            return Ok(self.project_paths());
        }

        if !tags.is_empty() {
            self.drop_stale();
            let mut found = Vec::new();
            for path in self.project_paths() {
                let project_tags =
                    project::load_tags(&Path::new(&path).join(project::GTM_DIR)).unwrap_or_default();
                if project_tags.iter().any(|t| tags.contains(t)) {
                    found.push(path);
                }
            }
            return Ok(found);
        }

        let (work_dir, _) = project::paths(cwd)?;
        let key = work_dir.to_string_lossy().to_string();
        if !self.projects.contains_key(&key) {
            self.touch(&key);
        }
        Ok(vec![key])
    }

    /// Remove entries whose repositories are no longer initialized.
    fn drop_stale(&mut self) {
        self.projects
            .retain(|path, _| project::paths(Some(Path::new(path))).is_ok());
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
