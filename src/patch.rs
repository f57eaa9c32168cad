use std::collections::BTreeSet;

use anyhow::Result;
use git2::{Oid, Repository};

use crate::diff::{Hunk, HunkKind, LineKind};
use crate::error::Error;
use crate::git;
use crate::git_commands::short_hash;

/// Context lines emitted around every rewritten line.
const CONTEXT: usize = 3;

/// All approved hunks destined for one `(file, target commit)` pair.
#[derive(Debug)]
pub struct PatchGroup<'a> {
    pub path: String,
    pub target: Oid,
    pub hunks: Vec<&'a Hunk>,
}

/// A unified diff that applies cleanly against the target commit's tree.
#[derive(Debug)]
pub struct GeneratedPatch {
    pub path: String,
    pub target: Oid,
    pub diff: String,
}

/// The atomic unit of retargeting: one removed line with its replacement,
/// one pure insertion run, or one pure removal, extracted from a hunk.
#[derive(Debug)]
enum Change {
    Replace { removed: String, added: Vec<String> },
    Delete { removed: String },
    Insert { anchor: Option<String>, added: Vec<String> },
}

/// A placed change: an edit pinned to a line of the target file.
#[derive(Debug)]
enum EditOp {
    /// Replace the line with one or more lines.
    Replace { line: usize, added: Vec<String> },
    /// Remove the line.
    Delete { line: usize },
    /// Insert lines after the line (0 means at the top of the file).
    InsertAfter { line: usize, added: Vec<String> },
}

impl EditOp {
    fn line(&self) -> usize {
        match self {
            EditOp::Replace { line, .. }
            | EditOp::Delete { line }
            | EditOp::InsertAfter { line, .. } => *line,
        }
    }
}

/// Generate one patch per `(file, target)` group.
///
/// Runs entirely before any repository mutation, so an unplaceable change
/// aborts the run with nothing to roll back.
pub fn generate_patches(repo: &Repository, groups: &[PatchGroup]) -> Result<Vec<GeneratedPatch>> {
    groups
        .iter()
        .map(|group| generate_for_group(repo, group))
        .collect()
}

fn generate_for_group(repo: &Repository, group: &PatchGroup) -> Result<GeneratedPatch> {
    // whole-file shapes pass through without line matching
    if let Some(first) = group.hunks.first() {
        match first.kind {
            HunkKind::NewFile => return Ok(render_new_file(group)),
            HunkKind::DeletedFile => return render_deleted_file(repo, group),
            _ => {}
        }
    }

    let content = git::file_at_rev(repo, group.target, &group.path)?.ok_or_else(|| {
        Error::UnplaceableChange {
            file: group.path.clone(),
            line: "<file missing>".to_string(),
            target: short_target(group.target),
        }
    })?;
    let file_lines: Vec<&str> = content.lines().collect();

    let mut used_lines: BTreeSet<usize> = BTreeSet::new();
    let mut ops = Vec::new();

    for hunk in &group.hunks {
        for change in expand_changes(hunk) {
            ops.push(place_change(
                &group.path,
                group.target,
                &file_lines,
                &mut used_lines,
                change,
            )?);
        }
    }

    ops.sort_by_key(|op| op.line());

    let diff = render_diff(&group.path, &file_lines, &ops);
    Ok(GeneratedPatch {
        path: group.path.clone(),
        target: group.target,
        diff,
    })
}

/// Expand a hunk into its constituent changes, in source order.
///
/// A run of removals followed by additions pairs up positionally; surplus
/// additions ride on the last pair, surplus removals become deletions, and
/// addition-only runs become one insertion anchored on the nearest context
/// line above.
fn expand_changes(hunk: &Hunk) -> Vec<Change> {
    let mut changes = Vec::new();
    let mut last_context: Option<String> = None;

    let lines = &hunk.lines;
    let mut i = 0;
    while i < lines.len() {
        match lines[i].kind {
            LineKind::Context => {
                last_context = Some(lines[i].text.clone());
                i += 1;
            }
            _ => {
                let mut removed = Vec::new();
                let mut added = Vec::new();
                while i < lines.len() && lines[i].kind == LineKind::Removed {
                    removed.push(lines[i].text.clone());
                    i += 1;
                }
                while i < lines.len() && lines[i].kind == LineKind::Added {
                    added.push(lines[i].text.clone());
                    i += 1;
                }

                if removed.is_empty() {
                    changes.push(Change::Insert {
                        anchor: last_context.clone(),
                        added,
                    });
                    continue;
                }

                let pairs = removed.len().min(added.len());
                for (k, removed_line) in removed.iter().enumerate() {
                    if k < pairs {
                        let replacement = if k + 1 == pairs {
                            added[k..].to_vec()
                        } else {
                            vec![added[k].clone()]
                        };
                        changes.push(Change::Replace {
                            removed: removed_line.clone(),
                            added: replacement,
                        });
                    } else {
                        changes.push(Change::Delete {
                            removed: removed_line.clone(),
                        });
                    }
                }
            }
        }
    }

    changes
}

/// Comparison used to locate a source line in the target file: the trailing
/// newline and surrounding horizontal whitespace are insignificant,
/// internal whitespace is significant.
fn strips_equal(a: &str, b: &str) -> bool {
    let trim = |s: &str| s.trim_matches([' ', '\t']).to_string();
    trim(a) == trim(b)
}

/// Bind one change to a concrete, still-unclaimed line of the target file.
///
/// Lowest matching line number wins; the chosen line enters `used_lines`
/// so an identical textual change later in the group resolves to the next
/// occurrence instead of colliding here.
fn place_change(
    path: &str,
    target: Oid,
    file_lines: &[&str],
    used_lines: &mut BTreeSet<usize>,
    change: Change,
) -> Result<EditOp> {
    let claim = |needle: &str, used: &mut BTreeSet<usize>| -> Option<usize> {
        let chosen = (1..=file_lines.len())
            .find(|line| !used.contains(line) && strips_equal(file_lines[line - 1], needle))?;
        used.insert(chosen);
        Some(chosen)
    };

    match change {
        Change::Replace { removed, added } => match claim(&removed, used_lines) {
            Some(line) => Ok(EditOp::Replace { line, added }),
            None => Err(unplaceable(path, target, &removed)),
        },
        Change::Delete { removed } => match claim(&removed, used_lines) {
            Some(line) => Ok(EditOp::Delete { line }),
            None => Err(unplaceable(path, target, &removed)),
        },
        Change::Insert { anchor, added } => match anchor {
            Some(anchor_line) => match claim(&anchor_line, used_lines) {
                Some(line) => Ok(EditOp::InsertAfter { line, added }),
                None => Err(unplaceable(path, target, &anchor_line)),
            },
            // insertion at the very top of the file
            None => Ok(EditOp::InsertAfter { line: 0, added }),
        },
    }
}

fn unplaceable(path: &str, target: Oid, line: &str) -> anyhow::Error {
    Error::UnplaceableChange {
        file: path.to_string(),
        line: line.to_string(),
        target: short_target(target),
    }
    .into()
}

fn short_target(target: Oid) -> String {
    let full = target.to_string();
    short_hash(&full).to_string()
}

/// Render placed edits as a unified diff against the target file content.
///
/// Edits whose 3-line context windows overlap or abut merge into a single
/// patch hunk; hunks are ordered by line number and new-side coordinates
/// carry the cumulative offset of the hunks above them.
fn render_diff(path: &str, file_lines: &[&str], ops: &[EditOp]) -> String {
    let mut out = String::new();
    out.push_str(&format!("diff --git a/{} b/{}\n", path, path));
    out.push_str(&format!("--- a/{}\n", path));
    out.push_str(&format!("+++ b/{}\n", path));

    // group ops into hunks by context-window proximity
    let mut groups: Vec<Vec<&EditOp>> = Vec::new();
    for op in ops {
        match groups.last_mut() {
            Some(group)
                if op.line().max(1) - group.last().expect("group non-empty").line().max(1)
                    <= 2 * CONTEXT + 1 =>
            {
                group.push(op);
            }
            _ => groups.push(vec![op]),
        }
    }

    let mut offset: isize = 0;
    for group in groups {
        let first_line = group.first().expect("group non-empty").line().max(1);
        let last_line = group.last().expect("group non-empty").line().max(1);
        let lo = first_line.saturating_sub(CONTEXT).max(1);
        let hi = (last_line + CONTEXT).min(file_lines.len());

        let mut body = String::new();
        let mut old_len = 0usize;
        let mut new_len = 0usize;

        // insertions before the first line of the file
        for op in &group {
            if let EditOp::InsertAfter { line: 0, added } = op {
                for text in added {
                    body.push_str(&format!("+{}\n", text));
                    new_len += 1;
                }
            }
        }

        for line in lo..=hi.max(lo.saturating_sub(1)) {
            if line > file_lines.len() {
                break;
            }
            let text = file_lines[line - 1];
            let edit = group.iter().find(|op| {
                op.line() == line && !matches!(op, EditOp::InsertAfter { .. })
            });
            match edit {
                Some(EditOp::Replace { added, .. }) => {
                    body.push_str(&format!("-{}\n", text));
                    old_len += 1;
                    for added_line in added {
                        body.push_str(&format!("+{}\n", added_line));
                        new_len += 1;
                    }
                }
                Some(EditOp::Delete { .. }) => {
                    body.push_str(&format!("-{}\n", text));
                    old_len += 1;
                }
                _ => {
                    body.push_str(&format!(" {}\n", text));
                    old_len += 1;
                    new_len += 1;
                }
            }
            for op in &group {
                if let EditOp::InsertAfter { line: at, added } = op
                    && *at == line
                {
                    for added_line in added {
                        body.push_str(&format!("+{}\n", added_line));
                        new_len += 1;
                    }
                }
            }
        }

        let old_start = if old_len == 0 { 0 } else { lo };
        let new_start = if new_len == 0 {
            0
        } else {
            (lo as isize + offset).max(1) as usize
        };
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            old_start, old_len, new_start, new_len
        ));
        out.push_str(&body);
        offset += new_len as isize - old_len as isize;
    }

    out
}

/// A brand-new file: the source hunks already are the whole patch.
fn render_new_file(group: &PatchGroup) -> GeneratedPatch {
    let path = &group.path;
    let mode = group
        .hunks
        .first()
        .and_then(|h| h.mode.clone())
        .unwrap_or_else(|| "100644".to_string());

    let mut diff = String::new();
    diff.push_str(&format!("diff --git a/{} b/{}\n", path, path));
    diff.push_str(&format!("new file mode {}\n", mode));
    diff.push_str(&format!("--- /dev/null\n+++ b/{}\n", path));
    for hunk in &group.hunks {
        diff.push_str(&format!(
            "@@ -0,0 +{},{} @@\n",
            hunk.new_start, hunk.new_len
        ));
        for line in &hunk.lines {
            if line.kind == LineKind::Added {
                diff.push_str(&format!("+{}\n", line.text));
            }
        }
    }

    GeneratedPatch {
        path: path.clone(),
        target: group.target,
        diff,
    }
}

/// A deleted file: regenerate the removal from the file as it exists at
/// the target commit, so the patch applies no matter how the content
/// drifted afterwards.
fn render_deleted_file(repo: &Repository, group: &PatchGroup) -> Result<GeneratedPatch> {
    let path = &group.path;
    let content = git::file_at_rev(repo, group.target, path)?.ok_or_else(|| {
        Error::UnplaceableChange {
            file: path.clone(),
            line: "<file missing>".to_string(),
            target: short_target(group.target),
        }
    })?;
    let lines: Vec<&str> = content.lines().collect();

    let mode = target_mode(repo, group.target, path)
        .or_else(|| group.hunks.first().and_then(|h| h.mode.clone()))
        .unwrap_or_else(|| "100644".to_string());

    let mut diff = String::new();
    diff.push_str(&format!("diff --git a/{} b/{}\n", path, path));
    diff.push_str(&format!("deleted file mode {}\n", mode));
    diff.push_str(&format!("--- a/{}\n+++ /dev/null\n", path));
    diff.push_str(&format!("@@ -1,{} +0,0 @@\n", lines.len()));
    for line in &lines {
        diff.push_str(&format!("-{}\n", line));
    }

    Ok(GeneratedPatch {
        path: path.clone(),
        target: group.target,
        diff,
    })
}

fn target_mode(repo: &Repository, target: Oid, path: &str) -> Option<String> {
    let commit = repo.find_commit(target).ok()?;
    let tree = commit.tree().ok()?;
    let entry = tree.get_path(std::path::Path::new(path)).ok()?;
    Some(format!("{:06o}", entry.filemode()))
}

#[cfg(test)]
#[path = "patch_test.rs"]
mod tests;
