// src/patch/diff.rs

//! Splitting multi-file unified diffs
//!
//! `git format-patch` output carries mail headers, `diff --git` lines, index
//! lines and a trailing signature around the actual diffs. This splits such
//! input into one clean `---`/`+++`/`@@` section per file, consuming exactly
//! the number of lines each hunk header announces so trailing noise is never
//! mistaken for hunk content.

/// The diff of a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDiff {
    /// Path on the `---` side, `None` for `/dev/null`
    pub old_path: Option<String>,
    /// Path on the `+++` side, `None` for `/dev/null`
    pub new_path: Option<String>,
    /// Normalized unified diff for this file alone
    ///
    /// Kept as bytes: patched files (latin-1 ChangeLogs, binary-ish
    /// fixtures) need not be UTF-8.
    pub text: Vec<u8>,
}

pub fn split_unified_diff(input: &[u8]) -> Result<Vec<FileDiff>, String> {
    let lines: Vec<&[u8]> = input.split_inclusive(|b| *b == b'\n').collect();
    let mut diffs = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let is_header = lines[i].starts_with(b"--- ")
            && lines.get(i + 1).is_some_and(|next| next.starts_with(b"+++ "));
        if !is_header {
            i += 1;
            continue;
        }

        let old_path = parse_path(&lines[i][4..]);
        let new_path = parse_path(&lines[i + 1][4..]);
        let mut text = format!(
            "--- {}\n+++ {}\n",
            old_path.as_deref().unwrap_or("/dev/null"),
            new_path.as_deref().unwrap_or("/dev/null")
        )
        .into_bytes();
        i += 2;

        let mut hunks = 0;
        while i < lines.len() && lines[i].starts_with(b"@@ ") {
            let header = String::from_utf8_lossy(lines[i]);
            let (mut old_left, mut new_left) = parse_hunk_header(&header)
                .ok_or_else(|| format!("bad hunk header: {}", header.trim_end()))?;
            push_line(&mut text, lines[i]);
            i += 1;
            hunks += 1;

            while old_left > 0 || new_left > 0 {
                let Some(line) = lines.get(i) else {
                    return Err(format!(
                        "hunk #{} of {} is truncated",
                        hunks,
                        new_path.as_deref().or(old_path.as_deref()).unwrap_or("?")
                    ));
                };
                match line.first() {
                    Some(b' ') => {
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                        push_line(&mut text, line);
                    }
                    // Blank context lines lose their leading space in some editors
                    Some(b'\n') | Some(b'\r') => {
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                        text.push(b' ');
                        push_line(&mut text, line);
                    }
                    Some(b'-') => {
                        old_left = old_left.saturating_sub(1);
                        push_line(&mut text, line);
                    }
                    Some(b'+') => {
                        new_left = new_left.saturating_sub(1);
                        push_line(&mut text, line);
                    }
                    Some(b'\\') => push_line(&mut text, line),
                    _ => {
                        return Err(format!(
                            "unexpected line in hunk #{}: {}",
                            hunks,
                            String::from_utf8_lossy(line).trim_end()
                        ));
                    }
                }
                i += 1;
            }

            if lines.get(i).is_some_and(|l| l.starts_with(b"\\")) {
                push_line(&mut text, lines[i]);
                i += 1;
            }
        }

        if hunks == 0 {
            return Err(format!(
                "no hunks for {}",
                new_path.as_deref().or(old_path.as_deref()).unwrap_or("?")
            ));
        }

        diffs.push(FileDiff {
            old_path,
            new_path,
            text,
        });
    }

    Ok(diffs)
}

fn push_line(text: &mut Vec<u8>, line: &[u8]) {
    text.extend_from_slice(line);
    if !line.ends_with(b"\n") {
        text.push(b'\n');
    }
}

/// Path from a `---`/`+++` line, without timestamp or quotes
fn parse_path(rest: &[u8]) -> Option<String> {
    let rest = String::from_utf8_lossy(rest);
    let path = rest.trim_end_matches(['\n', '\r']);
    let path = path.split('\t').next().unwrap_or(path).trim();
    let path = path
        .strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path);
    if path == "/dev/null" || path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// Line counts from `@@ -a[,b] +c[,d] @@`
fn parse_hunk_header(line: &str) -> Option<(usize, usize)> {
    let body = line.strip_prefix("@@ ")?;
    let end = body.find(" @@")?;
    let mut ranges = body[..end].split_whitespace();
    let old = ranges.next()?.strip_prefix('-')?;
    let new = ranges.next()?.strip_prefix('+')?;
    Some((range_len(old)?, range_len(new)?))
}

fn range_len(range: &str) -> Option<usize> {
    match range.split_once(',') {
        Some((_, len)) => len.parse().ok(),
        None => range.parse::<usize>().ok().map(|_| 1),
    }
}
