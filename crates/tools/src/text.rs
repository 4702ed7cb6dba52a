//! Output shaping helpers.
//!
//! Pure functions: filtering by regex and keeping the last N lines.

use regex_lite::RegexBuilder;
use tracing::warn;

/// Keep only the lines matching `pattern` (case-insensitive).
///
/// An empty pattern leaves the text untouched; an invalid one is logged and
/// also leaves it untouched.
pub fn apply_filter(text: &str, pattern: &str) -> String {
    if pattern.is_empty() {
        return text.to_string();
    }

    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => text
            .split('\n')
            .filter(|line| regex.is_match(line))
            .collect::<Vec<_>>()
            .join("\n"),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Invalid filter regex, output left unfiltered");
            text.to_string()
        }
    }
}

/// Keep the last `lines` lines. Zero means "no limit".
pub fn tail_lines(text: &str, lines: usize) -> String {
    if lines == 0 {
        return text.to_string();
    }
    let all: Vec<&str> = text.split('\n').collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
