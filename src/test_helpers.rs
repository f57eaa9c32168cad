/// Shared test utilities for git repository testing.
///
/// Provides a clean API for creating and manipulating test repositories,
/// reducing boilerplate in test code.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use git2::{BranchType, Repository, Signature};
use tempfile::TempDir;

/// Serializes tests that change the process working directory.
static CWD_LOCK: Mutex<()> = Mutex::new(());

/// A test repository wrapper with convenient helper methods.
pub struct TestRepo {
    pub repo: Repository,
    _dir: TempDir,
}

impl TestRepo {
    /// Create a test repository with a remote (bare repo) and a feature
    /// branch tracking it.
    ///
    /// Sets up:
    /// - A bare "remote" repository at remote.git with an initial commit
    /// - A cloned working repository
    /// - A `feature` branch tracking origin/main, checked out
    ///
    /// This mimics a feature branch forked from an integration branch.
    pub fn new_with_remote() -> Self {
        Self::new_with_remote_files(&[])
    }

    /// Like [`TestRepo::new_with_remote`], but the remote's initial commit
    /// already tracks the given files. Lines of those files blame to a
    /// commit below the merge base, i.e. outside the branch scope.
    pub fn new_with_remote_files(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let remote_path = dir.path().join("remote.git");
        let remote_repo = Repository::init_bare(&remote_path).unwrap();
        {
            let sig = Self::sig();
            let mut builder = remote_repo.treebuilder(None).unwrap();
            for (name, content) in files {
                let blob = remote_repo.blob(content.as_bytes()).unwrap();
                builder.insert(name, blob, 0o100644).unwrap();
            }
            let tree = remote_repo.find_tree(builder.write().unwrap()).unwrap();
            remote_repo
                .commit(Some("refs/heads/main"), &sig, &sig, "Initial", &tree, &[])
                .unwrap();
            remote_repo.set_head("refs/heads/main").unwrap();
        }

        let work_path = dir.path().join("work");
        let repo = Repository::clone(remote_path.to_str().unwrap(), &work_path).unwrap();

        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Test").unwrap();
            config.set_str("user.email", "test@test.com").unwrap();

            let head_commit = repo.head().unwrap().peel_to_commit().unwrap();
            repo.branch("feature", &head_commit, false).unwrap();
            repo.set_head("refs/heads/feature").unwrap();
            let mut feature = repo.find_branch("feature", BranchType::Local).unwrap();
            feature.set_upstream(Some("origin/main")).unwrap();
        }

        TestRepo { repo, _dir: dir }
    }

    fn sig() -> Signature<'static> {
        Signature::now("Test", "test@test.com").unwrap()
    }

    /// Create a commit writing `content` into `filename`.
    pub fn commit_file(&self, filename: &str, content: &str, message: &str) -> git2::Oid {
        let path = self.workdir().join(filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();

        let mut index = self.repo.index().unwrap();
        index.add_path(Path::new(filename)).unwrap();
        index.write().unwrap();

        let tree_id = index.write_tree().unwrap();
        let tree = self.repo.find_tree(tree_id).unwrap();
        let sig = Self::sig();

        let parent = self.repo.head().unwrap().peel_to_commit().unwrap();
        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
            .unwrap()
    }

    /// Create a commit with a file whose content is the message.
    pub fn commit(&self, message: &str, filename: &str) -> git2::Oid {
        self.commit_file(filename, message, message)
    }

    /// Write content to a file in the working directory (without committing).
    pub fn write_file(&self, filename: &str, content: &str) {
        let path = self.workdir().join(filename);
        fs::write(path, content).unwrap();
    }

    /// Read content from a file in the working directory.
    pub fn read_file(&self, filename: &str) -> String {
        let path = self.workdir().join(filename);
        fs::read_to_string(path).unwrap()
    }

    /// Get the path to the working directory.
    pub fn workdir(&self) -> PathBuf {
        self.repo.workdir().unwrap().to_path_buf()
    }

    /// Get the current HEAD commit OID.
    pub fn head_oid(&self) -> git2::Oid {
        self.repo.head().unwrap().target().unwrap()
    }

    /// Get the commit message at a position relative to HEAD.
    pub fn get_message(&self, steps_back: usize) -> String {
        let mut commit = self.repo.head().unwrap().peel_to_commit().unwrap();
        for _ in 0..steps_back {
            commit = commit.parent(0).unwrap();
        }
        commit.message().unwrap().trim().to_string()
    }

    /// Content of `filename` in the commit `steps_back` commits behind HEAD.
    pub fn file_at(&self, steps_back: usize, filename: &str) -> String {
        let mut commit = self.repo.head().unwrap().peel_to_commit().unwrap();
        for _ in 0..steps_back {
            commit = commit.parent(0).unwrap();
        }
        let tree = commit.tree().unwrap();
        let entry = tree.get_path(Path::new(filename)).unwrap();
        let blob = self.repo.find_blob(entry.id()).unwrap();
        String::from_utf8(blob.content().to_vec()).unwrap()
    }

    /// Number of commits reachable from HEAD.
    pub fn commit_count(&self) -> usize {
        let mut revwalk = self.repo.revwalk().unwrap();
        revwalk.push_head().unwrap();
        revwalk.count()
    }

    /// Run a closure with the process working directory set to this repo.
    ///
    /// Commands under test discover the repository from the current
    /// directory; a global lock keeps parallel tests from interleaving.
    pub fn in_dir<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = CWD_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let old = std::env::current_dir().unwrap();
        std::env::set_current_dir(self.workdir()).unwrap();
        let result = f();
        std::env::set_current_dir(old).unwrap();
        result
    }
}
