//! Test fixtures: throwaway git repositories.

use std::fs;
use std::path::{Path, PathBuf};

use git2::{Oid, Repository, Signature};
use tempfile::TempDir;

/// A temporary git repository that disappears on drop.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let repo = Repository::init(dir.path()).expect("init git repo");
        let mut config = repo.config().expect("open git config");
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        TestRepo { dir }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn repo_path(&self) -> PathBuf {
        self.dir.path().join(".git")
    }

    /// The `.gtm/` directory, created on first use.
    pub fn gtm_dir(&self) -> PathBuf {
        let path = self.dir.path().join(".gtm");
        if !path.exists() {
            fs::create_dir_all(&path).expect("create .gtm");
        }
        path
    }

    pub fn write_file(&self, rel: &str, content: &str) {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(path, content).expect("write file");
    }

    pub fn stage_file(&self, rel: &str) {
        let repo = Repository::open(self.dir.path()).expect("open repo");
        let mut index = repo.index().expect("open index");
        index.add_path(Path::new(rel)).expect("stage file");
        index.write().expect("write index");
    }

    /// Write, stage, and commit a file. Returns the commit id.
    pub fn commit_file(&self, rel: &str, content: &str, message: &str) -> Oid {
        self.write_file(rel, content);
        self.stage_file(rel);
        self.commit_staged(message)
    }

    /// Commit whatever is currently staged.
    pub fn commit_staged(&self, message: &str) -> Oid {
        let repo = Repository::open(self.dir.path()).expect("open repo");
        let mut index = repo.index().expect("open index");
        let tree_id = index.write_tree().expect("write tree");
        let tree = repo.find_tree(tree_id).expect("find tree");
        let sig = Signature::now("Test User", "test@example.com").expect("signature");

        let parent = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .expect("commit")
    }
}
