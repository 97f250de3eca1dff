//! Unified diff generation and application.
//!
//! Lines are compared including their terminators, and a missing final
//! newline is marked with `\ No newline at end of file`, so applying a
//! generated diff to the original reproduces the new text byte for byte.

use crate::error::{Error, Result};

const CONTEXT: usize = 3;

/// Largest middle section (old lines × new lines) diffed with the LCS table.
/// Beyond this the middle is emitted as one replacement.
const MAX_LCS_CELLS: usize = 4_000_000;

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Equal,
    Delete,
    Insert,
}

/// One edit step; `old` and `new` are the cursors before the step.
#[derive(Debug, Clone, Copy)]
struct Op {
    kind: OpKind,
    old: usize,
    new: usize,
}

/// Render a unified diff of `old` → `new`. Identical inputs give an empty
/// string.
pub fn unified_diff(old: &str, new: &str, old_label: &str, new_label: &str) -> String {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let ops = edit_script(&old_lines, &new_lines);

    if ops.iter().all(|op| op.kind == OpKind::Equal) {
        return String::new();
    }

    let mut out = format!("--- {old_label}\n+++ {new_label}\n");
    for range in hunk_ranges(&ops) {
        let hunk = &ops[range];
        let old_count = hunk.iter().filter(|op| op.kind != OpKind::Insert).count();
        let new_count = hunk.iter().filter(|op| op.kind != OpKind::Delete).count();
        let old_start = hunk[0].old + usize::from(old_count > 0);
        let new_start = hunk[0].new + usize::from(new_count > 0);
        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            format_range(old_start, old_count),
            format_range(new_start, new_count)
        ));

        for op in hunk {
            let (prefix, line) = match op.kind {
                OpKind::Equal => (' ', old_lines[op.old]),
                OpKind::Delete => ('-', old_lines[op.old]),
                OpKind::Insert => ('+', new_lines[op.new]),
            };
            out.push(prefix);
            match line.strip_suffix('\n') {
                Some(body) => {
                    out.push_str(body);
                    out.push('\n');
                }
                None => {
                    out.push_str(line);
                    out.push('\n');
                    out.push_str(NO_NEWLINE_MARKER);
                    out.push('\n');
                }
            }
        }
    }
    out
}

/// Apply a unified diff produced by [`unified_diff`] to `original`.
pub fn apply_unified_diff(original: &str, diff: &str) -> Result<String> {
    let old_lines = split_lines(original);
    let hunks = parse_hunks(diff)?;

    let mut out = String::with_capacity(original.len());
    let mut cursor = 0usize;

    for hunk in hunks {
        let position = if hunk.old_count == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        if position < cursor || position > old_lines.len() {
            return Err(Error::Diff(format!(
                "hunk at line {} is out of order or past end of file",
                hunk.old_start
            )));
        }
        for line in &old_lines[cursor..position] {
            out.push_str(line);
        }
        cursor = position;

        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) | HunkLine::Delete(text) => {
                    let actual = old_lines.get(cursor).copied().unwrap_or_default();
                    if actual != text.as_str() {
                        return Err(Error::Diff(format!(
                            "context mismatch at line {}: expected {:?}, found {:?}",
                            cursor + 1,
                            text,
                            actual
                        )));
                    }
                    if matches!(line, HunkLine::Context(_)) {
                        out.push_str(text);
                    }
                    cursor += 1;
                }
                HunkLine::Insert(text) => out.push_str(text),
            }
        }
    }

    for line in &old_lines[cursor..] {
        out.push_str(line);
    }
    Ok(out)
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn format_range(start: usize, count: usize) -> String {
    if count == 1 {
        start.to_string()
    } else {
        format!("{start},{count}")
    }
}

fn edit_script(old: &[&str], new: &[&str]) -> Vec<Op> {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut kinds = Vec::with_capacity(old.len() + new.len());
    kinds.extend(std::iter::repeat_n(OpKind::Equal, prefix));
    if old_mid.len().saturating_mul(new_mid.len()) <= MAX_LCS_CELLS {
        kinds.extend(lcs_kinds(old_mid, new_mid));
    } else {
        kinds.extend(std::iter::repeat_n(OpKind::Delete, old_mid.len()));
        kinds.extend(std::iter::repeat_n(OpKind::Insert, new_mid.len()));
    }
    kinds.extend(std::iter::repeat_n(OpKind::Equal, suffix));

    let (mut o, mut n) = (0, 0);
    kinds
        .into_iter()
        .map(|kind| {
            let op = Op { kind, old: o, new: n };
            match kind {
                OpKind::Equal => {
                    o += 1;
                    n += 1;
                }
                OpKind::Delete => o += 1,
                OpKind::Insert => n += 1,
            }
            op
        })
        .collect()
}

fn lcs_kinds(old: &[&str], new: &[&str]) -> Vec<OpKind> {
    let (n, m) = (old.len(), new.len());
    let width = m + 1;
    // table[i][j] = LCS length of old[i..] and new[j..]
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if old[i] == new[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut kinds = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            kinds.push(OpKind::Equal);
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            kinds.push(OpKind::Delete);
            i += 1;
        } else {
            kinds.push(OpKind::Insert);
            j += 1;
        }
    }
    kinds.extend(std::iter::repeat_n(OpKind::Delete, n - i));
    kinds.extend(std::iter::repeat_n(OpKind::Insert, m - j));
    kinds
}

/// Group ops into hunks with `CONTEXT` lines around each change, merging
/// changes separated by at most `2 * CONTEXT` equal lines.
fn hunk_ranges(ops: &[Op]) -> Vec<std::ops::Range<usize>> {
    let is_change = |i: usize| ops[i].kind != OpKind::Equal;
    let mut ranges = Vec::new();
    let mut i = 0;

    while i < ops.len() {
        if !is_change(i) {
            i += 1;
            continue;
        }
        let start = i.saturating_sub(CONTEXT);
        let mut j = i;
        let last_change_end = loop {
            while j < ops.len() && is_change(j) {
                j += 1;
            }
            let mut k = j;
            while k < ops.len() && !is_change(k) {
                k += 1;
            }
            if k < ops.len() && k - j <= 2 * CONTEXT {
                j = k;
            } else {
                break j;
            }
        };
        let end = (last_change_end + CONTEXT).min(ops.len());
        ranges.push(start..end);
        i = end;
    }
    ranges
}

#[derive(Debug)]
enum HunkLine {
    Context(String),
    Delete(String),
    Insert(String),
}

#[derive(Debug)]
struct Hunk {
    old_start: usize,
    old_count: usize,
    lines: Vec<HunkLine>,
}

fn parse_hunks(diff: &str) -> Result<Vec<Hunk>> {
    let mut hunks: Vec<Hunk> = Vec::new();

    for raw in diff.split_inclusive('\n') {
        let line = raw.strip_suffix('\n').unwrap_or(raw);

        if line.starts_with("@@ ") {
            let (old_start, old_count) = parse_hunk_header(line)?;
            hunks.push(Hunk {
                old_start,
                old_count,
                lines: Vec::new(),
            });
            continue;
        }

        let Some(hunk) = hunks.last_mut() else {
            // File headers before the first hunk.
            continue;
        };

        if line == NO_NEWLINE_MARKER {
            match hunk.lines.last_mut() {
                Some(HunkLine::Context(t) | HunkLine::Delete(t) | HunkLine::Insert(t)) => {
                    if t.ends_with('\n') {
                        t.pop();
                    }
                }
                None => return Err(Error::Diff("newline marker before any hunk line".into())),
            }
            continue;
        }

        let (tag, body) = match line.chars().next() {
            Some(c @ (' ' | '-' | '+')) => (c, &line[1..]),
            _ => return Err(Error::Diff(format!("unexpected diff line: {line:?}"))),
        };
        let text = format!("{body}\n");
        hunk.lines.push(match tag {
            ' ' => HunkLine::Context(text),
            '-' => HunkLine::Delete(text),
            _ => HunkLine::Insert(text),
        });
    }

    Ok(hunks)
}

fn parse_hunk_header(line: &str) -> Result<(usize, usize)> {
    let old_range = line
        .split_whitespace()
        .nth(1)
        .and_then(|r| r.strip_prefix('-'))
        .ok_or_else(|| Error::Diff(format!("invalid hunk header: {line}")))?;

    let parse = |s: &str| {
        s.parse::<usize>()
            .map_err(|_| Error::Diff(format!("invalid hunk header: {line}")))
    };
    match old_range.split_once(',') {
        Some((start, count)) => Ok((parse(start)?, parse(count)?)),
        None => Ok((parse(old_range)?, 1)),
    }
}
