//! Deterministic clean-up applied to every synthesized answer.

use std::sync::OnceLock;

use regex::Regex;

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn source_mention() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, r"\[[^\[\]\n]{2,80}\]")
}

fn glued_heading() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, r"([.:!?])[ \t]*(#{1,6}[ \t]+\S)")
}

fn glued_list_item() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(
        &PATTERN,
        r"(\D:[ \t]*|[.!?][ \t]+)((?:\d+[.)]|[-*•+])[ \t]+\S)",
    )
}

fn bullet_marker() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, r"^(\s*)[*•+-][ \t]+")
}

fn ordered_marker() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, r"^(\s*)(\d+)[.)][ \t]+")
}

fn heading() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    compiled(&PATTERN, r"^#{1,6}[ \t]+\S")
}

/// Removes bracketed source references such as `[Home Care User Guide - Step 3]`.
///
/// Spans followed by `(` are Markdown links and are kept. Removing an inner
/// span can expose an outer one, so passes repeat until nothing changes.
pub fn strip_source_mentions(text: &str) -> String {
    let Some(pattern) = source_mention() else {
        return text.to_string();
    };

    let mut current = strip_pass(pattern, text);
    loop {
        let next = strip_pass(pattern, &current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_pass(pattern: &Regex, text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;

    for found in pattern.find_iter(text) {
        let rest = text.get(found.end()..).unwrap_or_default();
        if rest.starts_with('(') {
            continue;
        }

        output.push_str(text.get(cursor..found.start()).unwrap_or_default());
        cursor = found.end();

        if closes_clause(rest.chars().next()) && output.ends_with(' ') {
            output.pop();
        }
    }

    output.push_str(text.get(cursor..).unwrap_or_default());
    output
}

fn closes_clause(next: Option<char>) -> bool {
    next.map_or(true, |c| {
        matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')' | '\n' | '\r')
    })
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

/// Collapses runs of spaces to one, leaving each line's leading indentation
/// and fenced code alone.
pub fn collapse_double_spaces(text: &str) -> String {
    let mut in_fence = false;
    text.split('\n')
        .map(|line| {
            if is_fence(line) {
                in_fence = !in_fence;
                return line.to_string();
            }
            if in_fence {
                return line.to_string();
            }

            let body_start = line.len() - line.trim_start_matches([' ', '\t']).len();
            let (indent, body) = line.split_at(body_start);

            let mut collapsed = String::with_capacity(line.len());
            collapsed.push_str(indent);
            let mut previous_space = false;
            for c in body.chars() {
                if c == ' ' {
                    if !previous_space {
                        collapsed.push(c);
                    }
                    previous_space = true;
                } else {
                    collapsed.push(c);
                    previous_space = false;
                }
            }
            collapsed
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn split_glued(line: &str) -> Vec<String> {
    let mut split = line.to_string();
    if let Some(pattern) = glued_heading() {
        split = pattern.replace_all(&split, "$1\n\n$2").into_owned();
    }
    if let Some(pattern) = glued_list_item() {
        split = pattern.replace_all(&split, "$1\n$2").into_owned();
    }
    split.split('\n').map(str::to_string).collect()
}

fn normalize_markers(line: &str) -> String {
    if let Some(pattern) = ordered_marker() {
        if pattern.is_match(line) {
            return pattern.replace(line, "$1$2. ").into_owned();
        }
    }
    if let Some(pattern) = bullet_marker() {
        // `**bold**` at the start of a line is emphasis, not a bullet.
        if pattern.is_match(line) && !line.trim_start().starts_with("**") {
            return pattern.replace(line, "$1- ").into_owned();
        }
    }
    line.to_string()
}

fn is_heading(line: &str) -> bool {
    heading().is_some_and(|pattern| pattern.is_match(line))
}

struct Lines {
    out: Vec<String>,
    blank_after_heading: bool,
}

impl Lines {
    fn blank(&mut self) {
        if self.out.last().is_some_and(|last| !last.is_empty()) {
            self.out.push(String::new());
        }
    }

    fn push(&mut self, line: String) {
        if line.is_empty() {
            self.blank();
            return;
        }
        if self.blank_after_heading {
            self.blank();
            self.blank_after_heading = false;
        }
        if is_heading(&line) {
            self.blank();
            self.blank_after_heading = true;
        }
        self.out.push(line);
    }
}

/// Normalizes Markdown structure. Applying it twice gives the same result as once.
///
/// Headings and list items glued to preceding prose start on their own line,
/// bullets become `- ` and ordered markers `N. `, headings get exactly one blank
/// line around them, and blank-line runs collapse to one. Fenced code is untouched.
pub fn normalize_markdown(text: &str) -> String {
    let mut lines = Lines {
        out: Vec::new(),
        blank_after_heading: false,
    };
    let mut in_fence = false;

    for raw in text.lines() {
        let line = raw.trim_end();

        if is_fence(line) {
            if !in_fence {
                lines.push(String::new());
            }
            lines.blank_after_heading = false;
            lines.out.push(line.to_string());
            in_fence = !in_fence;
            continue;
        }

        if in_fence {
            lines.out.push(line.to_string());
            continue;
        }

        for piece in split_glued(line) {
            lines.push(normalize_markers(piece.trim_end()));
        }
    }

    while lines.out.last().is_some_and(String::is_empty) {
        lines.out.pop();
    }
    lines.out.join("\n")
}

/// Full post-processing chain for model output.
pub fn post_process(text: &str) -> String {
    normalize_markdown(&collapse_double_spaces(&strip_source_mentions(text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bracketed_guide_references() {
        let cleaned = post_process("See [Home Care Package Guide - Step 3] for details");
        assert_eq!(cleaned, "See for details");
        assert!(source_mention().expect("pattern").find(&cleaned).is_none());
    }

    #[test]
    fn strip_removes_space_before_punctuation() {
        assert_eq!(
            strip_source_mentions("Open the page [Home Care User Guide]."),
            "Open the page."
        );
    }

    #[test]
    fn keeps_markdown_links_and_short_brackets() {
        let text = "Go to [the compare page](/homecare/compare) and tick [x] twice.";
        assert_eq!(strip_source_mentions(text), text);
    }

    #[test]
    fn strips_nested_bracket_spans() {
        let cleaned = post_process("See [the [Home Care Guide] steps] here");
        assert_eq!(cleaned, "See here");
        assert!(source_mention().expect("pattern").find(&cleaned).is_none());
    }

    #[test]
    fn nested_strip_still_keeps_links() {
        assert_eq!(
            strip_source_mentions("Use [the [compare](/homecare/compare) page] now"),
            "Use [the [compare](/homecare/compare) page] now"
        );
    }

    #[test]
    fn post_process_keeps_spacing_inside_fences() {
        let processed = post_process("Example:\n\n```\nlet  x =  1;\n    indented   call();\n```\nAfter  that");
        assert_eq!(
            processed,
            "Example:\n\n```\nlet  x =  1;\n    indented   call();\n```\nAfter that"
        );
    }

    #[test]
    fn collapse_keeps_indentation() {
        assert_eq!(
            collapse_double_spaces("    - nested  item\nA  B"),
            "    - nested item\nA B"
        );
    }

    #[test]
    fn splits_glued_headings_and_lists() {
        let normalized =
            normalize_markdown("Here is how it works.## Steps\nFollow these: 1. Open the page. 2. Pick providers.");
        assert_eq!(
            normalized,
            "Here is how it works.\n\n## Steps\n\nFollow these:\n1. Open the page.\n2. Pick providers."
        );
    }

    #[test]
    fn normalizes_markers_and_blank_lines() {
        let normalized = normalize_markdown("* one\n• two\n+ three\n1) first\n\n\n\n\nEnd\n**Bold** text");
        assert_eq!(
            normalized,
            "- one\n- two\n- three\n1. first\n\nEnd\n**Bold** text"
        );
    }

    #[test]
    fn headings_get_single_blank_lines() {
        let normalized = normalize_markdown("Intro\n# Title\nBody\n\n\n## Next\n\n\n\nMore");
        assert_eq!(normalized, "Intro\n\n# Title\n\nBody\n\n## Next\n\nMore");
    }

    #[test]
    fn fenced_code_is_untouched() {
        let text = "Run:\n\n```\n* not a bullet\n\n\n\nx  y\n```\nDone";
        let normalized = normalize_markdown(text);
        assert!(normalized.contains("```\n* not a bullet\n\n\n\nx  y\n```"));
    }

    #[test]
    fn normalizer_is_idempotent() {
        let samples = [
            "Here is how it works.## Steps\nFollow these: 1. Open the page. 2. Pick providers.",
            "* one\n• two\n\n\n\n# Heading\ntext  with  spaces\n1) first\n2) second",
            "## Already\n\nclean\n\n- list\n- items",
            "Intro: - glued bullet. - another\n### Deep heading\n\n\n\n```\ncode\n```\ntrailing   ",
            "",
        ];
        for sample in samples {
            let once = normalize_markdown(sample);
            assert_eq!(normalize_markdown(&once), once, "not idempotent for {sample:?}");
            let processed = post_process(sample);
            assert_eq!(post_process(&processed), processed);
        }
    }
}
