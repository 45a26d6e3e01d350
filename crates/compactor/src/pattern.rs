//! File name patterns: shell-style globs and positional masks.
//!
//! A glob supports:
//! - `*` matches zero or more characters
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]` match one character from the set or range
//! - `[!abc]` / `[^abc]` match one character NOT in the set
//!
//! A mask is a glob in which the placeholder `#` marks the positions that vary between the
//! fragments of one recording, e.g. `fc2_save_????-??-??-??????-####.avi`. For selection each
//! `#` behaves like `?`; for grouping the same positions are blanked out of the file name.

use crate::config::MASK_PLACEHOLDER;

/// Match a file name against a glob pattern. The whole name must match.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = name.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    // Position of the last `*` seen and the text position it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pat.len() {
            match pat[p] {
                '*' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, len)) = match_class(&pat[p..], text[t]) {
                        if matched {
                            p += len;
                            t += 1;
                            continue;
                        }
                    } else if text[t] == '[' {
                        // Unterminated class: treat `[` literally
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
                c if c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }

        match backtrack {
            Some((star, start)) => {
                p = star + 1;
                t = start + 1;
                backtrack = Some((star, start + 1));
            }
            None => return false,
        }
    }

    pat[p..].iter().all(|&c| c == '*')
}

/// Evaluate a `[...]` class at the start of `pattern` against `ch`.
///
/// Returns `(matched, consumed)` or `None` if the class is not terminated.
fn match_class(pattern: &[char], ch: char) -> Option<(bool, usize)> {
    let mut idx = 1;
    let negate = matches!(pattern.get(idx), Some(&'!') | Some(&'^'));
    if negate {
        idx += 1;
    }

    let first = idx;
    let mut matched = false;
    while idx < pattern.len() {
        let c = pattern[idx];
        if c == ']' && idx > first {
            return Some((matched != negate, idx + 1));
        }
        if idx + 2 < pattern.len() && pattern[idx + 1] == '-' && pattern[idx + 2] != ']' {
            if (c..=pattern[idx + 2]).contains(&ch) {
                matched = true;
            }
            idx += 3;
        } else {
            if c == ch {
                matched = true;
            }
            idx += 1;
        }
    }
    None
}

/// Glob used to select the files covered by a mask (`#` becomes `?`).
pub fn mask_to_glob(mask: &str) -> String {
    mask.chars()
        .map(|c| if c == MASK_PLACEHOLDER { '?' } else { c })
        .collect()
}

/// Replace every position of `name` that is a placeholder in `mask` with the placeholder.
///
/// Positions are compared character by character; characters past the end of the mask are
/// kept unchanged.
pub fn apply_mask(mask: &str, name: &str) -> String {
    let mut mask_chars = mask.chars();
    name.chars()
        .map(|c| match mask_chars.next() {
            Some(MASK_PLACEHOLDER) => MASK_PLACEHOLDER,
            _ => c,
        })
        .collect()
}
