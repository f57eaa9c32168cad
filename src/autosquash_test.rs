use super::*;
use crate::context::{Context, Settings, StrategyChoice};
use crate::test_helpers::TestRepo;

fn test_context(auto_accept: bool, dry_run: bool) -> Context {
    let settings = Settings {
        line_by_line: false,
        auto_accept,
        dry_run,
        strategy: StrategyChoice::Auto,
    };
    Context::new(settings, slog::Logger::root(slog::Discard, slog::o!()))
}

#[test]
fn auto_accept_squashes_high_confidence_change() {
    let repo = TestRepo::new_with_remote();
    repo.commit_file("file1.txt", "alpha\nbeta\ngamma\n", "Add file1");
    repo.write_file("file1.txt", "alpha\nBETA\ngamma\n");

    let ctx = test_context(true, false);
    repo.in_dir(|| run(&ctx)).unwrap();

    assert_eq!(repo.get_message(0), "Add file1");
    assert!(repo.file_at(0, "file1.txt").contains("BETA"));
    let diff = git_commands::diff_head(&repo.workdir()).unwrap();
    assert_eq!(diff.trim(), "", "working tree should be clean after squashing");
}

#[test]
fn auto_accept_leaves_low_confidence_changes_in_tree() {
    // both lines were introduced by different commits, so editing both in
    // one hunk yields a non-high-confidence mapping
    let repo = TestRepo::new_with_remote();
    repo.commit_file("f.txt", "one\n", "First");
    repo.commit_file("f.txt", "one\ntwo\n", "Second");
    repo.write_file("f.txt", "ONE\nTWO\n");

    let ctx = test_context(true, false);
    let head_before = repo.in_dir(|| {
        let head = repo.head_oid();
        run(&ctx).unwrap();
        head
    });

    assert_eq!(repo.head_oid(), head_before, "nothing high-confidence to apply");
    assert_eq!(repo.read_file("f.txt"), "ONE\nTWO\n");
}

#[test]
fn clean_tree_is_a_noop() {
    let repo = TestRepo::new_with_remote();
    repo.commit_file("f.txt", "content\n", "Add f");
    let head_before = repo.head_oid();

    let ctx = test_context(true, false);
    repo.in_dir(|| run(&ctx)).unwrap();

    assert_eq!(repo.head_oid(), head_before);
}

#[test]
fn dry_run_changes_nothing() {
    let repo = TestRepo::new_with_remote();
    repo.commit_file("file1.txt", "alpha\nbeta\n", "Add file1");
    repo.write_file("file1.txt", "ALPHA\nbeta\n");
    let head_before = repo.head_oid();

    let ctx = test_context(true, true);
    repo.in_dir(|| run(&ctx)).unwrap();

    assert_eq!(repo.head_oid(), head_before);
    assert_eq!(repo.read_file("file1.txt"), "ALPHA\nbeta\n");
}

#[test]
fn mixed_state_is_refused() {
    let repo = TestRepo::new_with_remote();
    repo.commit_file("a.txt", "one\n", "Add a");
    repo.commit_file("b.txt", "two\n", "Add b");

    repo.write_file("a.txt", "staged change\n");
    git_commands::git_commit::stage_files(&repo.workdir(), &["a.txt"]).unwrap();
    repo.write_file("b.txt", "unstaged change\n");

    let ctx = test_context(true, false);
    let err = repo.in_dir(|| run(&ctx)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::Precondition(_))
    ));
}

#[test]
fn in_progress_merge_is_refused() {
    let repo = TestRepo::new_with_remote();
    repo.commit_file("a.txt", "one\n", "Add a");
    repo.write_file("a.txt", "dirty\n");

    // simulate an interrupted merge
    let git_dir = repo.workdir().join(".git");
    std::fs::write(git_dir.join("MERGE_HEAD"), format!("{}\n", repo.head_oid())).unwrap();
    std::fs::write(git_dir.join("MERGE_MSG"), "merge in flight\n").unwrap();

    let ctx = test_context(true, false);
    let err = repo.in_dir(|| run(&ctx)).unwrap_err();
    match err.downcast_ref::<Error>() {
        Some(Error::Precondition(reason)) => assert!(reason.contains("merge")),
        other => panic!("expected precondition, got {:?}", other),
    }
}

#[test]
fn no_commits_above_merge_base_is_refused() {
    let repo = TestRepo::new_with_remote();
    repo.write_file("loose.txt", "something\n");

    let ctx = test_context(true, false);
    let err = repo.in_dir(|| run(&ctx)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::Precondition(_))
    ));
}

#[test]
fn two_hunks_into_two_commits() {
    let repo = TestRepo::new_with_remote();
    repo.commit_file("a.txt", "alpha one\nalpha two\n", "Add a");
    repo.commit_file("b.txt", "beta one\nbeta two\n", "Add b");

    repo.write_file("a.txt", "alpha ONE\nalpha two\n");
    repo.write_file("b.txt", "beta one\nbeta TWO\n");

    let ctx = test_context(true, false);
    repo.in_dir(|| run(&ctx)).unwrap();

    assert!(repo.file_at(1, "a.txt").contains("alpha ONE"));
    assert!(repo.file_at(0, "b.txt").contains("beta TWO"));
    assert_eq!(repo.get_message(0), "Add b");
    assert_eq!(repo.get_message(1), "Add a");
    let diff = git_commands::diff_head(&repo.workdir()).unwrap();
    assert_eq!(diff.trim(), "");
}
