//! Post-processing: deterministic cleanup of model-generated descriptions.
//!
//! Vision models sometimes wrap a plain answer in code fences, answer with
//! Windows line endings or leave zero-width characters behind. None of that
//! belongs inside a Markdown blockquote, so every successful answer passes
//! through [`clean_description`] before refusal detection and persistence.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so the fence pattern sees `\n` only;
//! invisible characters go before the final trim so a trailing BOM or
//! zero-width space does not survive it.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to a raw model answer.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip outer code fences (` ``` `, ` ```markdown `, ` ```text `)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 1
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 6. Trim leading and trailing whitespace
///
/// An answer made only of whitespace and fences cleans to `""`, which the
/// Describe stage treats as a refusal.
pub fn clean_description(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_outer_fences(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1 ───────────────────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2 ───────────────────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md|text)?[ \t]*\n(.*?)\n?```\s*$")
        .unwrap_or_else(|e| panic!("invalid fence pattern: {e}"))
});

fn strip_outer_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 3 ───────────────────────────────────────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4 ───────────────────────────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\n{3,}").unwrap_or_else(|e| panic!("invalid blank-line pattern: {e}"))
});

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 5 ───────────────────────────────────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}
