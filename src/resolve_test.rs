use super::*;
use crate::blame::Confidence;
use crate::context::{Context, Settings, StrategyChoice};
use crate::diff::parse_diff;
use crate::git_commands::{self, git_commit};
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

fn twenty_lines() -> String {
    (1..=20).map(|i| format!("row{}\n", i)).collect()
}

#[test]
fn blame_evidence_wins_and_seeds_consistency() {
    let repo = TestRepo::new_with_remote_files(&[("a.c", &twenty_lines())]);

    // feature commit X rewrites row1 only
    let mut content = twenty_lines();
    content = content.replace("row1\n", "ROW1\n");
    let x = repo.commit_file("a.c", &content, "Rework row1");

    // working tree touches X's line plus two upstream-owned lines
    let dirty = content
        .replace("ROW1\n", "ROW1 again\n")
        .replace("row10\n", "ROW10\n")
        .replace("row20\n", "ROW20\n");
    repo.write_file("a.c", &dirty);

    let ctx = test_context();
    let scope = crate::git::branch_scope(&repo.repo).unwrap();
    let diff = git_commands::diff_head(&repo.workdir()).unwrap();
    let hunks = parse_diff(&diff).unwrap();
    assert_eq!(hunks.len(), 3, "expected three separate hunks");

    let resolution = resolve_hunks(&ctx, &repo.repo, &scope, &hunks).unwrap();
    assert_eq!(resolution.mappings.len(), 3);
    assert!(resolution.skipped.is_empty());

    let first = &resolution.mappings[0];
    assert_eq!(first.target, x);
    assert_eq!(first.source, MappingSource::BlameMatch);
    assert_eq!(first.confidence, Confidence::High);
    assert!(!first.needs_user_confirmation);

    // upstream-owned lines fall back to the consistency target
    let second = &resolution.mappings[1];
    assert_eq!(second.target, x);
    assert_eq!(second.source, MappingSource::FallbackConsistency);
    assert_eq!(second.confidence, Confidence::Medium);
    assert!(second.needs_user_confirmation);

    // confidence drops after the first consistency reuse
    let third = &resolution.mappings[2];
    assert_eq!(third.target, x);
    assert_eq!(third.source, MappingSource::FallbackConsistency);
    assert_eq!(third.confidence, Confidence::Low);
    assert!(third.needs_user_confirmation);
}

#[test]
fn out_of_scope_blame_falls_back_to_file_history() {
    let repo = TestRepo::new_with_remote_files(&[("b.txt", &twenty_lines())]);

    // X touches b.txt far away from the edited line
    let content = twenty_lines().replace("row15\n", "ROW15\n");
    let x = repo.commit_file("b.txt", &content, "Touch b.txt");

    // edit an upstream-owned line
    repo.write_file("b.txt", &content.replace("row1\n", "ROW1\n"));

    let ctx = test_context();
    let scope = crate::git::branch_scope(&repo.repo).unwrap();
    let diff = git_commands::diff_head(&repo.workdir()).unwrap();
    let hunks = parse_diff(&diff).unwrap();

    let resolution = resolve_hunks(&ctx, &repo.repo, &scope, &hunks).unwrap();
    assert_eq!(resolution.mappings.len(), 1);

    let mapping = &resolution.mappings[0];
    assert_eq!(mapping.target, x);
    assert_eq!(mapping.source, MappingSource::FallbackFileHistory);
    assert_eq!(mapping.confidence, Confidence::Low);
    assert!(mapping.needs_user_confirmation);
}

#[test]
fn untouched_file_falls_back_to_recent_commits() {
    let repo = TestRepo::new_with_remote_files(&[("c.txt", &twenty_lines())]);

    // the branch has commits, none touching c.txt
    repo.commit_file("other.txt", "one\n", "First feature commit");
    let newest = repo.commit_file("other.txt", "one\ntwo\n", "Second feature commit");

    repo.write_file("c.txt", &twenty_lines().replace("row1\n", "ROW1\n"));

    let ctx = test_context();
    let scope = crate::git::branch_scope(&repo.repo).unwrap();
    let diff = git_commands::diff_head(&repo.workdir()).unwrap();
    let hunks: Vec<_> = parse_diff(&diff)
        .unwrap()
        .into_iter()
        .filter(|h| h.path == "c.txt")
        .collect();

    let resolution = resolve_hunks(&ctx, &repo.repo, &scope, &hunks).unwrap();
    assert_eq!(resolution.mappings.len(), 1);

    let mapping = &resolution.mappings[0];
    assert_eq!(mapping.source, MappingSource::FallbackRecent);
    assert_eq!(mapping.target, newest, "recent commits are offered newest first");
    assert!(!mapping.alternatives.is_empty());
}

#[test]
fn staged_new_file_is_offered_recent_commits() {
    let repo = TestRepo::new_with_remote();
    repo.commit_file("existing.txt", "content\n", "Feature commit");

    repo.write_file("fresh.txt", "brand new\n");
    git_commit::stage_files(&repo.workdir(), &["fresh.txt"]).unwrap();

    let ctx = test_context();
    let scope = crate::git::branch_scope(&repo.repo).unwrap();
    let diff = git_commands::diff_head(&repo.workdir()).unwrap();
    let hunks = parse_diff(&diff).unwrap();
    assert_eq!(hunks[0].kind, crate::diff::HunkKind::NewFile);

    let resolution = resolve_hunks(&ctx, &repo.repo, &scope, &hunks).unwrap();
    assert_eq!(resolution.mappings.len(), 1);
    assert_eq!(resolution.mappings[0].source, MappingSource::FallbackRecent);
    assert!(resolution.mappings[0].needs_user_confirmation);
}

#[test]
fn binary_hunks_are_skipped_with_reason() {
    let repo = TestRepo::new_with_remote();
    repo.commit_file("f.txt", "text\n", "Add f.txt");

    let diff = "\
diff --git a/img.png b/img.png
Binary files a/img.png and b/img.png differ
";
    let hunks = parse_diff(diff).unwrap();

    let ctx = test_context();
    let scope = crate::git::branch_scope(&repo.repo).unwrap();
    let resolution = resolve_hunks(&ctx, &repo.repo, &scope, &hunks).unwrap();

    assert!(resolution.mappings.is_empty());
    assert_eq!(resolution.skipped.len(), 1);
    assert_eq!(resolution.skipped[0].1, "binary file");
}

#[test]
fn repeated_resolution_proposes_identical_mappings() {
    let repo = TestRepo::new_with_remote_files(&[("a.c", &twenty_lines())]);
    let content = twenty_lines().replace("row1\n", "ROW1\n");
    repo.commit_file("a.c", &content, "Rework row1");
    repo.write_file("a.c", &content.replace("ROW1\n", "ROW1 again\n"));

    let ctx = test_context();
    let scope = crate::git::branch_scope(&repo.repo).unwrap();
    let diff = git_commands::diff_head(&repo.workdir()).unwrap();
    let hunks = parse_diff(&diff).unwrap();

    let render = |resolution: &Resolution| {
        resolution
            .mappings
            .iter()
            .map(|m| format!("{}:{} -> {} ({:?})", m.hunk.path, m.hunk.old_start, m.target, m.source))
            .collect::<Vec<_>>()
    };

    let first = resolve_hunks(&ctx, &repo.repo, &scope, &hunks).unwrap();
    let second = resolve_hunks(&ctx, &repo.repo, &scope, &hunks).unwrap();
    assert_eq!(render(&first), render(&second));
}
