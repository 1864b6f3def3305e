//! Line-level change highlighting between two revisions of a role's output
//!
//! Lines only in the current revision are wrapped in an "added" marker, lines
//! only in the previous revision are dropped, and common lines pass through.
//! Alignment is a longest-common-subsequence diff over lines.

use serde::{Deserialize, Serialize};
use similar::{Algorithm, DiffTag, capture_diff_slices};
use tracing::debug;

/// Default background for inserted lines in HTML output
pub const DEFAULT_HTML_COLOR: &str = "#d4fcbc";

/// Output style selected in config
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkupStyle {
    /// `{+line+}` markers, original line endings kept
    #[default]
    Plain,
    /// `<span>` wrapped insertions, `<br>` line separators
    Html,
}

/// Renderer for highlighted output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Markup {
    #[default]
    Plain,
    Html { color: String },
}

impl Markup {
    /// Build a markup for a style, using `color` for HTML insertions
    pub fn new(style: MarkupStyle, color: Option<&str>) -> Self {
        match style {
            MarkupStyle::Plain => Markup::Plain,
            MarkupStyle::Html => Markup::Html {
                color: color.unwrap_or(DEFAULT_HTML_COLOR).to_string(),
            },
        }
    }

    fn push_unchanged(&self, out: &mut String, line: &str) {
        match self {
            Markup::Plain => out.push_str(line),
            Markup::Html { .. } => {
                let (body, _) = split_line_ending(line);
                out.push_str(body);
                out.push_str("<br>");
            }
        }
    }

    fn push_inserted(&self, out: &mut String, line: &str) {
        let (body, ending) = split_line_ending(line);
        match self {
            Markup::Plain => {
                out.push_str("{+");
                out.push_str(body);
                out.push_str("+}");
                out.push_str(ending);
            }
            Markup::Html { color } => {
                out.push_str("<span style='background-color:");
                out.push_str(color);
                out.push_str("'>");
                out.push_str(body);
                out.push_str("</span><br>");
            }
        }
    }
}

/// Highlight `current` against `previous` with plain markers
pub fn highlight(previous: &str, current: &str) -> String {
    highlight_with(previous, current, &Markup::Plain)
}

/// Highlight `current` against `previous` with the given markup
///
/// An empty `previous` (first round) or identical texts return `current`
/// unchanged; an empty `current` returns an empty string.
pub fn highlight_with(previous: &str, current: &str, markup: &Markup) -> String {
    debug!(
        previous_len = previous.len(),
        current_len = current.len(),
        ?markup,
        "highlight_with: called"
    );
    if current.is_empty() {
        return String::new();
    }
    if previous.is_empty() || previous == current {
        debug!("highlight_with: nothing to diff against");
        return current.to_string();
    }

    // Compare line bodies so a missing final newline is not a change
    let current_lines: Vec<&str> = current.split_inclusive('\n').collect();
    let old: Vec<&str> = previous.split_inclusive('\n').map(|l| split_line_ending(l).0).collect();
    let new: Vec<&str> = current_lines.iter().map(|l| split_line_ending(l).0).collect();

    let mut out = String::with_capacity(current.len() + current.len() / 4);
    let mut inserted = 0usize;
    for op in capture_diff_slices(Algorithm::Lcs, &old, &new) {
        let (tag, _, new_range) = op.as_tag_tuple();
        for line in &current_lines[new_range] {
            match tag {
                DiffTag::Delete => {}
                DiffTag::Equal => markup.push_unchanged(&mut out, line),
                DiffTag::Insert | DiffTag::Replace => {
                    inserted += 1;
                    markup.push_inserted(&mut out, line);
                }
            }
        }
    }
    debug!(inserted, "highlight_with: done");
    out
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_round_passes_through() {
        assert_eq!(highlight("", "# Title\nBody"), "# Title\nBody");
    }

    #[test]
    fn test_empty_current() {
        assert_eq!(highlight("old text", ""), "");
    }

    #[test]
    fn test_identical_has_no_markers() {
        let text = "line one\nline two\n";
        assert_eq!(highlight(text, text), text);
    }

    #[test]
    fn test_appended_line_marked() {
        assert_eq!(highlight("a\nb\n", "a\nb\nc\n"), "a\nb\n{+c+}\n");
    }

    #[test]
    fn test_deleted_lines_dropped() {
        assert_eq!(highlight("a\nb\nc", "a\nc"), "a\nc");
    }

    #[test]
    fn test_modified_line_marked() {
        assert_eq!(highlight("a\nold\nc", "a\nnew\nc"), "a\n{+new+}\nc");
    }

    #[test]
    fn test_html_markup() {
        let markup = Markup::new(MarkupStyle::Html, None);
        assert_eq!(
            highlight_with("a\nb", "a\nc", &markup),
            "a<br><span style='background-color:#d4fcbc'>c</span><br>"
        );
    }

    #[test]
    fn test_html_custom_color() {
        let markup = Markup::new(MarkupStyle::Html, Some("#fce0d4"));
        let out = highlight_with("x", "y", &markup);
        assert_eq!(out, "<span style='background-color:#fce0d4'>y</span><br>");
    }

    #[test]
    fn test_missing_final_newline_is_not_a_change() {
        assert_eq!(highlight("a", "a\nb"), "a\n{+b+}");
    }

    #[test]
    fn test_crlf_preserved_in_plain() {
        assert_eq!(highlight("a\r\n", "a\r\nb\r\n"), "a\r\n{+b+}\r\n");
    }

    proptest! {
        #[test]
        fn prop_empty_previous_is_identity(text in "(?s).{0,200}") {
            prop_assert_eq!(highlight("", &text), text);
        }

        #[test]
        fn prop_identical_is_identity(text in "[a-z \n]{0,200}") {
            let out = highlight(&text, &text);
            let marked = out.contains("{+");
            prop_assert!(!marked);
            prop_assert_eq!(out, text);
        }
    }
}
