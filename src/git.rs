use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use git2::{BranchType, Oid, Repository, RepositoryState, StatusOptions};

use crate::error::Error;

/// Open the repository containing the current directory.
pub fn open_repo() -> Result<Repository> {
    Repository::discover(".").map_err(|_| {
        Error::Precondition("not a git repository (or any parent directory)".to_string()).into()
    })
}

/// Get the working directory of the repository, or fail for bare repos.
pub fn require_workdir<'a>(repo: &'a Repository, operation: &str) -> Result<&'a Path> {
    repo.workdir()
        .ok_or_else(|| anyhow!("Cannot {} in a bare repository", operation))
}

/// Get the OID that HEAD points to.
pub fn head_oid(repo: &Repository) -> Result<Oid> {
    repo.head()?
        .target()
        .ok_or_else(|| anyhow!("HEAD does not point to a commit"))
}

/// The staged/unstaged shape of the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingTreeStatus {
    Clean,
    StagedOnly,
    UnstagedOnly,
    Mixed,
}

/// Classify the working tree into clean / staged-only / unstaged-only / mixed.
/// Untracked files are ignored: they carry no history to squash into.
pub fn working_tree_status(repo: &Repository) -> Result<WorkingTreeStatus> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(false);

    let statuses = repo.statuses(Some(&mut opts))?;
    let mut staged = false;
    let mut unstaged = false;

    for entry in statuses.iter() {
        let status = entry.status();
        if status.is_index_new()
            || status.is_index_modified()
            || status.is_index_deleted()
            || status.is_index_renamed()
            || status.is_index_typechange()
        {
            staged = true;
        }
        if status.is_wt_modified() || status.is_wt_deleted() || status.is_wt_typechange() {
            unstaged = true;
        }
    }

    Ok(match (staged, unstaged) {
        (false, false) => WorkingTreeStatus::Clean,
        (true, false) => WorkingTreeStatus::StagedOnly,
        (false, true) => WorkingTreeStatus::UnstagedOnly,
        (true, true) => WorkingTreeStatus::Mixed,
    })
}

/// Name of the git operation already in progress in this repository, if any.
/// Mutating history while one is running would corrupt both.
pub fn operation_in_progress(repo: &Repository) -> Option<&'static str> {
    match repo.state() {
        RepositoryState::Clean => None,
        RepositoryState::Merge => Some("merge"),
        RepositoryState::Revert | RepositoryState::RevertSequence => Some("revert"),
        RepositoryState::CherryPick | RepositoryState::CherryPickSequence => Some("cherry-pick"),
        RepositoryState::Bisect => Some("bisect"),
        RepositoryState::Rebase
        | RepositoryState::RebaseInteractive
        | RepositoryState::RebaseMerge => Some("rebase"),
        RepositoryState::ApplyMailbox | RepositoryState::ApplyMailboxOrRebase => Some("am"),
    }
}

/// Cached metadata for one commit in the branch scope.
#[derive(Debug, Clone)]
pub struct CommitMeta {
    pub oid: Oid,
    /// Abbreviated hash respecting the repo's core.abbrev setting.
    pub short_hash: String,
    /// First line of the commit message.
    pub subject: String,
    /// Author timestamp, seconds since epoch. Used for ranking tie-breaks.
    pub author_time: i64,
}

/// The commits this invocation is allowed to rewrite: everything reachable
/// from HEAD but not from the merge base with the integration branch.
#[derive(Debug)]
pub struct BranchScope {
    /// The merge base with the upstream integration branch.
    pub merge_base: Oid,
    /// Non-merge commits in `merge_base..HEAD`, newest first, metadata
    /// preloaded in a single walk.
    pub commits: Vec<CommitMeta>,
    /// Current branch shorthand (e.g. "feature/foo").
    pub branch_name: String,
    /// Full name of the upstream ref (e.g. "origin/main").
    pub upstream_label: String,
    /// Whether `merge_base..HEAD` contains merge commits. Rewriting such a
    /// branch with a linear todo would flatten it, so callers refuse.
    pub contains_merges: bool,
}

impl BranchScope {
    pub fn contains(&self, oid: Oid) -> bool {
        self.commits.iter().any(|c| c.oid == oid)
    }

    pub fn meta(&self, oid: Oid) -> Option<&CommitMeta> {
        self.commits.iter().find(|c| c.oid == oid)
    }

    /// Whether HEAD is a feature branch with at least one commit of its own.
    pub fn is_feature_branch(&self) -> bool {
        !self.commits.is_empty()
    }
}

/// Compute the branch scope: resolve the upstream tracking branch, find the
/// merge base, and walk `merge_base..HEAD` once, loading all commit metadata
/// in that single pass.
pub fn branch_scope(repo: &Repository) -> Result<BranchScope> {
    let head = repo.head()?;
    if !head.is_branch() {
        return Err(Error::Precondition(
            "HEAD is detached. git-autosquash requires being on a branch.".to_string(),
        )
        .into());
    }

    let head_target = head
        .target()
        .ok_or_else(|| anyhow!("HEAD does not point to a commit"))?;
    let branch_name = head.shorthand().unwrap_or("HEAD").to_string();

    let local_branch = repo.find_branch(&branch_name, BranchType::Local).map_err(|_| {
        Error::Precondition(format!(
            "branch '{}' not found — are you on a branch?",
            branch_name
        ))
    })?;

    let upstream = local_branch.upstream().map_err(|_| {
        Error::Precondition(format!(
            "branch '{}' has no upstream tracking branch.\n\
             Set one with: git branch --set-upstream-to=origin/main {}",
            branch_name, branch_name
        ))
    })?;
    let upstream_label = upstream.name()?.unwrap_or("upstream").to_string();
    let upstream_oid = upstream
        .get()
        .target()
        .ok_or_else(|| anyhow!("upstream does not point to a commit"))?;

    let merge_base = repo.merge_base(head_target, upstream_oid)?;

    let mut revwalk = repo.revwalk()?;
    revwalk.push(head_target)?;
    revwalk.hide(merge_base)?;
    revwalk.set_sorting(git2::Sort::TOPOLOGICAL)?;

    let mut commits = Vec::new();
    let mut contains_merges = false;
    for oid_result in revwalk {
        let oid = oid_result?;
        let commit = repo.find_commit(oid)?;
        // Merge commits are never squash targets
        if commit.parent_count() > 1 {
            contains_merges = true;
            continue;
        }
        commits.push(commit_meta(&commit)?);
    }

    Ok(BranchScope {
        merge_base,
        commits,
        branch_name,
        upstream_label,
        contains_merges,
    })
}

fn commit_meta(commit: &git2::Commit) -> Result<CommitMeta> {
    let short_hash = commit
        .as_object()
        .short_id()?
        .as_str()
        .context("short_id is not valid UTF-8")?
        .to_string();
    Ok(CommitMeta {
        oid: commit.id(),
        short_hash,
        subject: commit.summary().unwrap_or("").to_string(),
        author_time: commit.author().when().seconds(),
    })
}

/// Blame several pre-image line ranges of one file in a single libgit2 pass.
///
/// The blame is computed once over the span covering every requested range,
/// then sliced per range, so N hunks in a file cost one blame, not N.
/// Returns, per range, the `(line, commit)` pairs blame could attribute.
pub fn blame_ranges(
    repo: &Repository,
    path: &str,
    ranges: &[(usize, usize)],
    newest: Oid,
) -> Result<Vec<Vec<(usize, Oid)>>> {
    if ranges.is_empty() {
        return Ok(Vec::new());
    }
    let min_line = ranges.iter().map(|&(start, _)| start).min().unwrap_or(1).max(1);
    let max_line = ranges
        .iter()
        .map(|&(start, len)| start + len.saturating_sub(1))
        .max()
        .unwrap_or(1);

    let mut opts = git2::BlameOptions::new();
    opts.min_line(min_line)
        .max_line(max_line)
        .newest_commit(newest);

    let blame = repo.blame_file(Path::new(path), Some(&mut opts))?;

    let mut results = Vec::with_capacity(ranges.len());
    for &(start, len) in ranges {
        let mut lines = Vec::new();
        for line in start..start + len.max(1) {
            if let Some(hunk) = blame.get_line(line) {
                lines.push((line, hunk.final_commit_id()));
            }
        }
        results.push(lines);
    }
    Ok(results)
}

/// Load the content of `path` as it exists in `rev`'s tree.
///
/// Returns `Ok(None)` when the file does not exist at that revision, and an
/// error for binary or non-UTF-8 content (the pipeline only retargets text).
pub fn file_at_rev(repo: &Repository, rev: Oid, path: &str) -> Result<Option<String>> {
    let commit = repo.find_commit(rev)?;
    let tree = commit.tree()?;
    let entry = match tree.get_path(Path::new(path)) {
        Ok(entry) => entry,
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let blob = repo.find_blob(entry.id())?;
    if blob.is_binary() {
        bail!("{} is binary at {}", path, rev);
    }
    let content = std::str::from_utf8(blob.content())
        .with_context(|| format!("{} is not valid UTF-8 at {}", path, rev))?;
    Ok(Some(content.to_string()))
}

/// In-scope commits that touched `path`, newest first.
///
/// Walks the already-loaded scope once, comparing each commit's tree entry
/// for the path against its parent's.
pub fn commits_touching_file(
    repo: &Repository,
    scope: &BranchScope,
    path: &str,
) -> Result<Vec<Oid>> {
    let mut touching = Vec::new();
    for meta in &scope.commits {
        let commit = repo.find_commit(meta.oid)?;
        let entry_id = tree_entry_id(&commit, path)?;
        let parent_entry_id = match commit.parent(0) {
            Ok(parent) => tree_entry_id(&parent, path)?,
            Err(_) => None,
        };
        if entry_id != parent_entry_id {
            touching.push(meta.oid);
        }
    }
    Ok(touching)
}

fn tree_entry_id(commit: &git2::Commit, path: &str) -> Result<Option<Oid>> {
    let tree = commit.tree()?;
    match tree.get_path(Path::new(path)) {
        Ok(entry) => Ok(Some(entry.id())),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "git_test.rs"]
mod tests;
