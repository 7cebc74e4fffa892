//! Post-processing for MedGemma replies.
//!
//! The model echoes prompts, wraps answers in code fences or `\boxed{}`, appends
//! exam-style "Final Answer" blocks and sometimes loops on the same sentence.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::text::split_sentences;

static LEADING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^```(?:markdown)?\s*").expect("valid regex"));
static BOXED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\$?\\?boxed\{(.+?)\}\$?").expect("valid regex"));
static LEADING_NOISE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\W_]+").expect("valid regex"));
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").expect("valid regex"));

const SENTENCE_KEY_CHARS: usize = 60;
pub const MAX_COMMENTARY_SENTENCES: usize = 6;

/// Drops `prompt` when the reply starts by repeating it.
pub fn strip_echo<'a>(reply: &'a str, prompt: &str) -> &'a str {
    reply.strip_prefix(prompt).unwrap_or(reply).trim()
}

/// Commentary cleanup: echo, fences and `\boxed{}` removed, then sentences
/// deduplicated on their first 60 lowercase characters and capped at six.
pub fn clean_commentary(raw: &str, prompt: &str) -> String {
    let text = strip_echo(raw.trim(), prompt);
    let text = LEADING_FENCE.replace(text, "");
    let text = text.trim().strip_suffix("```").unwrap_or(text.trim()).trim();
    let text = BOXED.replace_all(text, "$1");

    let mut seen = HashSet::new();
    let mut kept: Vec<&str> = Vec::new();
    for sentence in split_sentences(text.trim()) {
        let sentence = sentence.trim();
        let key: String = sentence.to_lowercase().chars().take(SENTENCE_KEY_CHARS).collect();
        if seen.insert(key) {
            kept.push(sentence);
        }
        if kept.len() >= MAX_COMMENTARY_SENTENCES {
            break;
        }
    }
    kept.join(" ")
}

/// Conversational reply cleanup.
///
/// Keeps what follows the last occurrence of the first marker found, cuts
/// everything from "Final Answer" on, unwraps `\boxed{`, trims leading
/// punctuation, and drops lines that repeat an earlier line modulo case and
/// punctuation. Lines are rejoined as paragraphs.
pub fn clean_reply(raw: &str, markers: &[&str]) -> String {
    let mut text = raw.trim();
    if let Some(marker) = markers.iter().find(|m| !m.is_empty() && text.contains(*m)) {
        text = text.rsplit(marker).next().unwrap_or(text).trim();
    }
    if let Some((head, _)) = text.split_once("Final Answer") {
        text = head.trim();
    }

    let unboxed = text.replace("\\boxed{", "");
    let mut text = unboxed.as_str();
    if let Some(stripped) = text.strip_suffix('}') {
        text = stripped.trim();
    }
    let text = LEADING_NOISE.replace(text, "");

    let mut seen = HashSet::new();
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(NON_WORD.replace_all(&line.to_lowercase(), "").into_owned()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commentary_strips_echo_and_fences() {
        let prompt = "Describe the film.";
        let raw = "Describe the film.```markdown\nThere is **consolidation** in the right lower lobe.\n```";
        assert_eq!(
            clean_commentary(raw, prompt),
            "There is **consolidation** in the right lower lobe."
        );
    }

    #[test]
    fn test_commentary_unwraps_boxed() {
        let raw = r"$\boxed{The opacity matches the twin.}$";
        assert_eq!(clean_commentary(raw, ""), "The opacity matches the twin.");
    }

    #[test]
    fn test_commentary_dedups_and_caps() {
        let raw = "A is seen. A is seen. B. C. D. E. F. G.";
        assert_eq!(clean_commentary(raw, ""), "A is seen. B. C. D. E. F.");
    }

    #[test]
    fn test_reply_takes_text_after_marker() {
        let raw = "prompt text\nExpert Answer: The **effusion** is larger.\nFinal Answer: \\boxed{yes}";
        assert_eq!(
            clean_reply(raw, &["Expert Answer:"]),
            "The **effusion** is larger."
        );
    }

    #[test]
    fn test_reply_dedups_stuttered_lines() {
        let raw = "* Same point.\n* same point!\n\n* Different point.";
        assert_eq!(clean_reply(raw, &[]), "Same point.\n\n* Different point.");
    }

    #[test]
    fn test_reply_strips_boxed_wrapper() {
        assert_eq!(clean_reply("\\boxed{Likely pneumonia.}", &[]), "Likely pneumonia.");
    }

    #[test]
    fn test_reply_empty_stays_empty() {
        assert_eq!(clean_reply("  Final Answer: 42", &[]), "");
    }
}
