//! Exact and whitespace-tolerant text matching for `search_replace`.
//!
//! Fuzzy matching is line-wise: runs of whitespace collapse to one space and
//! typographic quotes/dashes canonicalise, so an edit survives formatting
//! drift. A fuzzy match only applies when it is unique.

/// Count non-overlapping exact occurrences of `needle` in `haystack`.
pub fn exact_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.match_indices(needle).count()
}

/// Unique whitespace-tolerant match of `needle_lines` inside `lines`.
/// `Ok(Some(idx))` on a unique match at line `idx`, `Ok(None)` when absent,
/// `Err(count)` when ambiguous.
pub fn find_fuzzy_unique(lines: &[&str], needle_lines: &[&str]) -> Result<Option<usize>, usize> {
    if needle_lines.is_empty() || needle_lines.len() > lines.len() {
        return Ok(None);
    }

    let normalized: Vec<String> = lines.iter().map(|l| normalize_line(l)).collect();
    let needle: Vec<String> = needle_lines.iter().map(|l| normalize_line(l)).collect();

    let mut matches = Vec::new();
    let limit = normalized.len() - needle.len();
    for idx in 0..=limit {
        if normalized[idx..idx + needle.len()] == needle[..] {
            matches.push(idx);
            if matches.len() > 32 {
                break;
            }
        }
    }

    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches[0])),
        n => Err(n),
    }
}

/// Collapse whitespace runs and canonicalise typographic punctuation.
pub fn normalize_line(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut saw_whitespace = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            saw_whitespace = true;
            continue;
        }
        if saw_whitespace && !result.is_empty() {
            result.push(' ');
        }
        saw_whitespace = false;
        result.push(canonical_char(ch));
    }
    result
}

fn canonical_char(ch: char) -> char {
    match ch {
        '\u{2018}' | '\u{2019}' | '\u{02BC}' => '\'',
        '\u{201C}' | '\u{201D}' => '"',
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2212}' => '-',
        _ => ch,
    }
}

/// Closest window to the needle, for the no-match report: returns the
/// 1-based start line, the window text, and a per-line diff.
pub fn closest_match(lines: &[&str], needle_lines: &[&str]) -> Option<(usize, String, String)> {
    if lines.is_empty() || needle_lines.is_empty() {
        return None;
    }
    let window_len = needle_lines.len().min(lines.len());
    let normalized: Vec<String> = lines.iter().map(|l| normalize_line(l)).collect();
    let needle: Vec<String> = needle_lines.iter().map(|l| normalize_line(l)).collect();

    let mut best_idx = 0usize;
    let mut best_score = usize::MAX;
    for idx in 0..=(lines.len() - window_len) {
        let score: usize = needle
            .iter()
            .zip(&normalized[idx..idx + window_len])
            .map(|(a, b)| line_distance(a, b))
            .sum();
        if score < best_score {
            best_score = score;
            best_idx = idx;
        }
    }

    let window = lines[best_idx..best_idx + window_len].join("\n");
    let mut diff = String::new();
    for (expected, actual) in needle_lines.iter().zip(&lines[best_idx..best_idx + window_len]) {
        if normalize_line(expected) == normalize_line(actual) {
            diff.push_str(&format!("  {expected}\n"));
        } else {
            diff.push_str(&format!("- {expected}\n+ {actual}\n"));
        }
    }
    Some((best_idx + 1, window, diff))
}

/// Cheap per-line distance: positional character mismatches plus the length
/// difference. Good enough to rank candidate windows.
fn line_distance(a: &str, b: &str) -> usize {
    let mismatches = a
        .chars()
        .zip(b.chars())
        .filter(|(x, y)| x != y)
        .count();
    mismatches + a.chars().count().abs_diff(b.chars().count())
}
