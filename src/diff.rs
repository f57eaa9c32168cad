use anyhow::{Result, bail};

/// What a hunk represents. Text hunks flow through the whole pipeline;
/// the other kinds are recognized so they can be reported and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HunkKind {
    Text,
    Binary,
    NewFile,
    DeletedFile,
    ModeOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Context,
    Removed,
    Added,
}

/// One line of a hunk body, without its trailing newline.
#[derive(Debug, Clone)]
pub struct DiffLine {
    pub kind: LineKind,
    pub text: String,
}

/// A contiguous change region in one file of a unified diff.
///
/// `old_start`/`new_start` are 1-based line numbers in the pre- and
/// post-image; a zero start with zero length marks an absent side (new or
/// deleted file, or an insertion at the top of the file).
#[derive(Debug, Clone)]
pub struct Hunk {
    pub path: String,
    pub kind: HunkKind,
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<DiffLine>,
    /// File mode from a `new file mode` / `deleted file mode` header.
    pub mode: Option<String>,
}

impl Hunk {
    /// Absolute pre-image positions of the removed lines.
    pub fn removed_positions(&self) -> Vec<usize> {
        let mut positions = Vec::new();
        let mut old_line = self.old_start;
        for line in &self.lines {
            match line.kind {
                LineKind::Removed => {
                    positions.push(old_line);
                    old_line += 1;
                }
                LineKind::Context => old_line += 1,
                LineKind::Added => {}
            }
        }
        positions
    }

    /// The tight range blame evidence is drawn from: the span of removed
    /// lines, or the anchor line for a pure insertion. Context lines carry
    /// no evidence about who owns the change.
    pub fn blame_range(&self) -> (usize, usize) {
        let removed = self.removed_positions();
        match (removed.first(), removed.last()) {
            (Some(&first), Some(&last)) => (first, last - first + 1),
            _ => {
                // anchor on the context line right before the insertion
                let mut old_line = self.old_start;
                let mut anchor = self.old_start.max(1);
                for line in &self.lines {
                    match line.kind {
                        LineKind::Context => {
                            anchor = old_line;
                            old_line += 1;
                        }
                        LineKind::Added => break,
                        LineKind::Removed => old_line += 1,
                    }
                }
                (anchor.max(1), 1)
            }
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == HunkKind::Text
    }

    fn count(&self, kind: LineKind) -> usize {
        self.lines.iter().filter(|l| l.kind == kind).count()
    }
}

/// Parse unified diff text (as produced by `git diff`) into hunks.
///
/// Binary files, new/deleted files and mode-only changes are emitted as
/// single tagged hunks so callers can report them; rename detection is
/// expected to be disabled on the diff side.
pub fn parse_diff(text: &str) -> Result<Vec<Hunk>> {
    let mut hunks = Vec::new();
    let mut file = FileHeader::default();

    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            file.flush_mode_only(&mut hunks);
            file = FileHeader::from_diff_line(rest);
        } else if let Some(mode) = line.strip_prefix("new file mode ") {
            file.new_file = true;
            file.mode = Some(mode.trim().to_string());
        } else if let Some(mode) = line.strip_prefix("deleted file mode ") {
            file.deleted_file = true;
            file.mode = Some(mode.trim().to_string());
        } else if line.starts_with("old mode") || line.starts_with("new mode") {
            file.mode_change = true;
        } else if line.starts_with("Binary files ") || line == "GIT binary patch" {
            hunks.push(Hunk {
                path: file.path().to_string(),
                kind: HunkKind::Binary,
                old_start: 0,
                old_len: 0,
                new_start: 0,
                new_len: 0,
                lines: Vec::new(),
                mode: file.mode.clone(),
            });
            file.emitted = true;
        } else if let Some(rest) = line.strip_prefix("--- ") {
            if rest != "/dev/null" {
                file.old_path = Some(strip_prefix(rest).to_string());
            }
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            if rest != "/dev/null" {
                file.new_path = Some(strip_prefix(rest).to_string());
            }
        } else if line.starts_with("@@ ") {
            let (old_start, old_len, new_start, new_len) = parse_hunk_header(line)
                .ok_or_else(|| anyhow::anyhow!("malformed hunk header: {}", line))?;

            let mut body = Vec::new();
            let mut old_seen = 0;
            let mut new_seen = 0;
            while old_seen < old_len || new_seen < new_len {
                let Some(&body_line) = lines.peek() else { break };
                let (kind, text) = if let Some(text) = body_line.strip_prefix('+') {
                    new_seen += 1;
                    (LineKind::Added, text)
                } else if let Some(text) = body_line.strip_prefix('-') {
                    old_seen += 1;
                    (LineKind::Removed, text)
                } else if let Some(text) = body_line.strip_prefix(' ') {
                    old_seen += 1;
                    new_seen += 1;
                    (LineKind::Context, text)
                } else if body_line.starts_with('\\') {
                    // "\ No newline at end of file" consumes no image line
                    lines.next();
                    continue;
                } else if body_line.is_empty() {
                    // some diffs drop the space on blank context lines
                    old_seen += 1;
                    new_seen += 1;
                    (LineKind::Context, "")
                } else {
                    break;
                };
                lines.next();
                body.push(DiffLine {
                    kind,
                    text: text.to_string(),
                });
            }

            let kind = if file.new_file {
                HunkKind::NewFile
            } else if file.deleted_file {
                HunkKind::DeletedFile
            } else {
                HunkKind::Text
            };
            let hunk = Hunk {
                path: file.path().to_string(),
                kind,
                old_start,
                old_len,
                new_start,
                new_len,
                lines: body,
                mode: file.mode.clone(),
            };
            validate_hunk(&hunk)?;
            hunks.push(hunk);
            file.emitted = true;
        }
    }
    file.flush_mode_only(&mut hunks);

    Ok(hunks)
}

/// Per-file state while walking the diff headers.
#[derive(Default)]
struct FileHeader {
    old_path: Option<String>,
    new_path: Option<String>,
    new_file: bool,
    deleted_file: bool,
    mode_change: bool,
    mode: Option<String>,
    emitted: bool,
}

impl FileHeader {
    /// Parse `a/<old> b/<new>` from a `diff --git` line.
    fn from_diff_line(rest: &str) -> Self {
        let mut header = FileHeader::default();
        if let Some((old, new)) = rest.split_once(" b/") {
            header.old_path = Some(old.strip_prefix("a/").unwrap_or(old).to_string());
            header.new_path = Some(new.to_string());
        }
        header
    }

    fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("")
    }

    /// A file entry that ended with mode lines but no content becomes a
    /// single ModeOnly hunk.
    fn flush_mode_only(&mut self, hunks: &mut Vec<Hunk>) {
        if self.mode_change && !self.emitted && !self.path().is_empty() {
            hunks.push(Hunk {
                path: self.path().to_string(),
                kind: HunkKind::ModeOnly,
                old_start: 0,
                old_len: 0,
                new_start: 0,
                new_len: 0,
                lines: Vec::new(),
                mode: None,
            });
            self.emitted = true;
        }
    }
}

fn strip_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

/// Parse `@@ -start[,len] +start[,len] @@`.
fn parse_hunk_header(line: &str) -> Option<(usize, usize, usize, usize)> {
    let rest = line.strip_prefix("@@ -")?;
    let (old_part, rest) = rest.split_once(" +")?;
    let (new_part, _) = rest.split_once(" @@")?;

    let parse_side = |part: &str| -> Option<(usize, usize)> {
        match part.split_once(',') {
            Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
            None => Some((part.parse().ok()?, 1)),
        }
    };

    let (old_start, old_len) = parse_side(old_part)?;
    let (new_start, new_len) = parse_side(new_part)?;
    Some((old_start, old_len, new_start, new_len))
}

fn validate_hunk(hunk: &Hunk) -> Result<()> {
    let context = hunk.count(LineKind::Context);
    let removed = hunk.count(LineKind::Removed);
    let added = hunk.count(LineKind::Added);

    if removed + context != hunk.old_len || added + context != hunk.new_len {
        bail!(
            "hunk body does not match header in {} (@@ -{},{} +{},{})",
            hunk.path,
            hunk.old_start,
            hunk.old_len,
            hunk.new_start,
            hunk.new_len
        );
    }
    if hunk.kind == HunkKind::Text && removed == 0 && added == 0 {
        bail!("hunk without any change in {}", hunk.path);
    }
    Ok(())
}

/// Split every text hunk into single-change hunks: one removed/added pair,
/// one pure insertion, or one pure removal each, with one line of
/// surrounding context kept as the anchor.
///
/// Coordinates stay in the coordinate space of the whole diff, so the
/// split hunks remain mutually consistent.
pub fn split_line_by_line(hunks: Vec<Hunk>) -> Vec<Hunk> {
    let mut out = Vec::new();
    for hunk in hunks {
        if !hunk.is_text() {
            out.push(hunk);
            continue;
        }
        split_hunk(&hunk, &mut out);
    }
    out
}

fn split_hunk(hunk: &Hunk, out: &mut Vec<Hunk>) {
    let lines = &hunk.lines;
    let mut old_line = hunk.old_start;
    let mut new_line = hunk.new_start;
    let mut prev_context: Option<(String, usize, usize)> = None;

    let mut i = 0;
    while i < lines.len() {
        match lines[i].kind {
            LineKind::Context => {
                prev_context = Some((lines[i].text.clone(), old_line, new_line));
                old_line += 1;
                new_line += 1;
                i += 1;
            }
            _ => {
                // gather the run of removals then additions
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
                let next_context = lines.get(i).filter(|l| l.kind == LineKind::Context);

                // One unit per removed line, each carrying its paired
                // addition (the last pair also carries any surplus
                // additions); an addition-only run stays one unit so the
                // whole insertion keeps its anchor.
                let pairs = removed.len().min(added.len());
                let mut units: Vec<(Option<String>, Vec<String>)> = Vec::new();
                if removed.is_empty() {
                    units.push((None, added.clone()));
                } else {
                    for (k, removed_line) in removed.iter().enumerate() {
                        let adds = if k + 1 == pairs {
                            added[k..].to_vec()
                        } else if k < pairs {
                            vec![added[k].clone()]
                        } else {
                            Vec::new()
                        };
                        units.push((Some(removed_line.clone()), adds));
                    }
                }

                let unit_count = units.len();
                let mut new_consumed = 0;
                for (u, (rem, adds)) in units.into_iter().enumerate() {
                    let mut body = Vec::new();

                    // A present side sits at its absolute position; an
                    // absent side is a zero-length range anchored on the
                    // line before the insertion/removal point.
                    let (mut old_start, mut old_len) = match rem {
                        Some(_) => (old_line + u, 1),
                        None => ((old_line + removed.len()).saturating_sub(1), 0),
                    };
                    let (mut new_start, mut new_len) = if adds.is_empty() {
                        ((new_line + added.len()).saturating_sub(1), 0)
                    } else {
                        (new_line + new_consumed, adds.len())
                    };
                    new_consumed += adds.len();

                    // anchor on the previous context line for the first
                    // change of the run, so pure insertions stay placeable
                    if u == 0 && let Some((text, ctx_old, ctx_new)) = &prev_context {
                        body.push(DiffLine {
                            kind: LineKind::Context,
                            text: text.clone(),
                        });
                        old_start = *ctx_old;
                        new_start = *ctx_new;
                        old_len += 1;
                        new_len += 1;
                    }
                    if let Some(text) = rem {
                        body.push(DiffLine {
                            kind: LineKind::Removed,
                            text,
                        });
                    }
                    for text in adds {
                        body.push(DiffLine {
                            kind: LineKind::Added,
                            text,
                        });
                    }
                    if u + 1 == unit_count && let Some(ctx) = next_context {
                        body.push(DiffLine {
                            kind: LineKind::Context,
                            text: ctx.text.clone(),
                        });
                        old_len += 1;
                        new_len += 1;
                    }

                    out.push(Hunk {
                        path: hunk.path.clone(),
                        kind: hunk.kind,
                        old_start,
                        old_len,
                        new_start,
                        new_len,
                        lines: body,
                        mode: hunk.mode.clone(),
                    });
                }

                old_line += removed.len();
                new_line += added.len();
            }
        }
    }
}

#[cfg(test)]
#[path = "diff_test.rs"]
mod tests;
