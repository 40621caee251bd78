//! Outbound scrubbing of reasoning tags.
//!
//! Some models leak their internal deliberation wrapped in XML-like tags.
//! The outbound path strips paired tags and both unbalanced variants (an
//! unclosed opener swallows to the end; a stray closer swallows from the
//! start) before anything reaches a user.

use std::sync::OnceLock;

use regex::Regex;

/// Tag name treated as reasoning.
pub const REASONING_TAG: &str = "think";

fn paired() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?s)<{t}>.*?</{t}>", t = REASONING_TAG)).unwrap()
    })
}

fn stray_closer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!(r"(?s)^.*</{t}>", t = REASONING_TAG)).unwrap())
}

fn unclosed_opener() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!(r"(?s)<{t}>.*$", t = REASONING_TAG)).unwrap())
}

/// Strip reasoning tags (balanced and unbalanced) and trim the result.
pub fn strip_reasoning_tags(text: &str) -> String {
    let out = paired().replace_all(text, "");
    let out = stray_closer().replace(&out, "");
    let out = unclosed_opener().replace(&out, "");
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(strip_reasoning_tags("Hello there"), "Hello there");
    }

    #[test]
    fn test_paired_tags_removed() {
        let input = "<think>let me ponder</think>The answer is 4.";
        assert_eq!(strip_reasoning_tags(input), "The answer is 4.");
    }

    #[test]
    fn test_multiline_reasoning_removed() {
        let input = "<think>\nstep 1\nstep 2\n</think>\nDone.";
        assert_eq!(strip_reasoning_tags(input), "Done.");
    }

    #[test]
    fn test_multiple_blocks_removed() {
        let input = "<think>a</think>one<think>b</think> two";
        assert_eq!(strip_reasoning_tags(input), "one two");
    }

    #[test]
    fn test_unclosed_opener_swallows_tail() {
        let input = "Here you go.<think>but actually";
        assert_eq!(strip_reasoning_tags(input), "Here you go.");
    }

    #[test]
    fn test_stray_closer_swallows_head() {
        let input = "leaked deliberation</think>The real reply.";
        assert_eq!(strip_reasoning_tags(input), "The real reply.");
    }

    #[test]
    fn test_only_reasoning_leaves_empty() {
        assert_eq!(strip_reasoning_tags("<think>all private</think>"), "");
    }

    #[test]
    fn test_other_tags_untouched() {
        let input = "<b>bold</b> stays";
        assert_eq!(strip_reasoning_tags(input), "<b>bold</b> stays");
    }
}
