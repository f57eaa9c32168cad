use git2::Oid;

use super::*;
use crate::git::{BranchScope, CommitMeta};

fn oid(hex_digit: char) -> Oid {
    Oid::from_str(&hex_digit.to_string().repeat(40)).unwrap()
}

fn scope_of(commits: &[(Oid, i64)]) -> BranchScope {
    BranchScope {
        merge_base: oid('0'),
        commits: commits
            .iter()
            .map(|&(commit, author_time)| CommitMeta {
                oid: commit,
                short_hash: commit.to_string()[..7].to_string(),
                subject: String::new(),
                author_time,
            })
            .collect(),
        branch_name: "feature".to_string(),
        upstream_label: "origin/main".to_string(),
        contains_merges: false,
    }
}

#[test]
fn unanimous_single_commit_is_high_confidence() {
    let a = oid('a');
    let scope = scope_of(&[(a, 100)]);
    let lines = vec![(1, a), (2, a), (3, a)];

    let target = rank_candidates(&scope, &lines).unwrap();
    assert_eq!(target.commit, a);
    assert_eq!(target.confidence, Confidence::High);
}

#[test]
fn clear_majority_is_medium_confidence() {
    let a = oid('a');
    let b = oid('b');
    let scope = scope_of(&[(a, 100), (b, 200)]);
    let lines = vec![(1, a), (2, a), (3, b)];

    let target = rank_candidates(&scope, &lines).unwrap();
    assert_eq!(target.commit, a);
    assert_eq!(target.confidence, Confidence::Medium);
}

#[test]
fn single_in_scope_commit_with_foreign_lines_is_medium() {
    let a = oid('a');
    let foreign = oid('f');
    let scope = scope_of(&[(a, 100)]);
    let lines = vec![(1, a), (2, foreign)];

    let target = rank_candidates(&scope, &lines).unwrap();
    assert_eq!(target.commit, a);
    assert_eq!(target.confidence, Confidence::Medium);
}

#[test]
fn even_split_is_low_confidence_and_prefers_recent() {
    let a = oid('a');
    let b = oid('b');
    let scope = scope_of(&[(a, 100), (b, 200)]);
    let lines = vec![(1, a), (2, b)];

    let target = rank_candidates(&scope, &lines).unwrap();
    // tie broken by most recent author time
    assert_eq!(target.commit, b);
    assert_eq!(target.confidence, Confidence::Low);
}

#[test]
fn out_of_scope_commits_are_filtered_before_ranking() {
    let a = oid('a');
    let foreign = oid('f');
    let scope = scope_of(&[(a, 100)]);
    // the foreign commit owns more lines, but it is not rewritable
    let lines = vec![(1, foreign), (2, foreign), (3, foreign), (4, a)];

    let target = rank_candidates(&scope, &lines).unwrap();
    assert_eq!(target.commit, a);
}

#[test]
fn empty_histogram_yields_no_target() {
    let foreign = oid('f');
    let scope = scope_of(&[(oid('a'), 100)]);
    let lines = vec![(1, foreign), (2, foreign)];

    assert!(rank_candidates(&scope, &lines).is_none());
}

// ── Against a real repository ────────────────────────────────────────

mod repo {
    use super::*;
    use crate::context::{Context, Settings, StrategyChoice};
    use crate::diff::parse_diff;
    use crate::test_helpers::TestRepo;

    fn test_context() -> Context {
        let settings = Settings {
            line_by_line: false,
            auto_accept: true,
            dry_run: false,
            strategy: StrategyChoice::Auto,
        };
        Context::new(settings, slog::Logger::root(slog::Discard, slog::o!()))
    }

    #[test]
    fn blames_modified_line_to_the_introducing_commit() {
        let repo = TestRepo::new_with_remote();
        let c1 = repo.commit_file("a.txt", "alpha\nbeta\ngamma\n", "Add a.txt");
        repo.write_file("a.txt", "alpha\nBETA\ngamma\n");

        let ctx = test_context();
        let scope = crate::git::branch_scope(&repo.repo).unwrap();
        let diff = crate::git_commands::diff_head(&repo.workdir()).unwrap();
        let hunks = parse_diff(&diff).unwrap();
        let hunk_refs: Vec<&crate::diff::Hunk> = hunks.iter().collect();

        let targets = blame_file_hunks(&ctx, &repo.repo, &scope, "a.txt", &hunk_refs).unwrap();
        assert_eq!(targets.len(), 1);
        let target = targets[0].unwrap();
        assert_eq!(target.commit, c1);
        assert_eq!(target.confidence, Confidence::High);
    }

    #[test]
    fn upstream_owned_lines_produce_no_target() {
        let repo = TestRepo::new_with_remote_files(&[("base.txt", "one\ntwo\nthree\n")]);
        // a feature commit exists but never touches base.txt
        repo.commit_file("other.txt", "unrelated\n", "Feature work");
        repo.write_file("base.txt", "one\nTWO\nthree\n");

        let ctx = test_context();
        let scope = crate::git::branch_scope(&repo.repo).unwrap();
        let diff = crate::git_commands::diff_head(&repo.workdir()).unwrap();
        let hunks = parse_diff(&diff).unwrap();
        let hunk_refs: Vec<&crate::diff::Hunk> = hunks.iter().collect();

        let targets = blame_file_hunks(&ctx, &repo.repo, &scope, "base.txt", &hunk_refs).unwrap();
        assert_eq!(targets.len(), 1);
        assert!(targets[0].is_none());
    }
}
