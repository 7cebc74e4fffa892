//! Character-safe clipping and sentence splitting for model prompts and replies.

/// The first `max` characters of `text`.
pub fn clip_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

/// Like `clip_chars`, appending `...` when something was cut.
pub fn clip_with_ellipsis(text: &str, max: usize) -> String {
    let clipped = clip_chars(text, max);
    if clipped.len() < text.len() {
        format!("{clipped}...")
    } else {
        clipped.to_string()
    }
}

/// Splits after `.`, `!` or `?` when followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut after_terminal = false;
    let mut in_gap = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() && (after_terminal || in_gap) {
            if !in_gap {
                sentences.push(&text[start..i]);
                in_gap = true;
            }
            start = i + c.len_utf8();
            after_terminal = false;
            continue;
        }
        in_gap = false;
        after_terminal = matches!(c, '.' | '!' | '?');
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

/// The first `n` sentences joined by single spaces.
pub fn first_sentences(text: &str, n: usize) -> String {
    split_sentences(text)
        .into_iter()
        .take(n)
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}
