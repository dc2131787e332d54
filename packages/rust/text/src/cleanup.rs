//! Whitespace cleanup pipeline for extracted page text.
//!
//! Each pass is a function `&str -> String` applied in sequence. The
//! extractor emits blank lines around headings and after paragraphs; these
//! passes flatten everything else while keeping those boundaries.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on raw extracted text.
pub fn collapse_whitespace(text: &str) -> String {
    let mut result = text.to_string();

    result = normalize_line_whitespace(&result);
    result = clean_blank_lines(&result);
    result = trim_ends(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Collapse whitespace inside each line
// ---------------------------------------------------------------------------

/// Collapse runs of spaces, tabs and other non-newline whitespace to one space
/// and trim every line.
fn normalize_line_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Collapse blank-line runs
// ---------------------------------------------------------------------------

/// Collapse runs of 2+ blank lines into exactly one.
fn clean_blank_lines(text: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(text, "\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 3: Trim
// ---------------------------------------------------------------------------

fn trim_ends(text: &str) -> String {
    text.trim().to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
