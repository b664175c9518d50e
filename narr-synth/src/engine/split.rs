//! Length-bounded text splitting
//!
//! Splits never drop characters other than the whitespace at the cut.

/// Split `text` into parts of at most `max_chars` characters
///
/// Cuts prefer sentence ends, then word boundaries; a single word longer
/// than the limit is cut mid-word.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return if text.is_empty() { Vec::new() } else { vec![text.to_string()] };
    }

    let mut parts = Vec::new();
    let mut current = String::new();

    for sentence in sentences(text) {
        if fits(&current, sentence, max_chars) {
            push_joined(&mut current, sentence);
            continue;
        }
        if !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        if sentence.chars().count() <= max_chars {
            current.push_str(sentence);
            continue;
        }
        for word in sentence.split_whitespace() {
            if fits(&current, word, max_chars) {
                push_joined(&mut current, word);
                continue;
            }
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            let mut rest: Vec<char> = word.chars().collect();
            while rest.len() > max_chars {
                let tail = rest.split_off(max_chars);
                parts.push(rest.into_iter().collect());
                rest = tail;
            }
            current = rest.into_iter().collect();
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn fits(current: &str, next: &str, max_chars: usize) -> bool {
    let sep = usize::from(!current.is_empty());
    current.chars().count() + sep + next.chars().count() <= max_chars
}

fn push_joined(current: &mut String, next: &str) {
    if !current.is_empty() {
        current.push(' ');
    }
    current.push_str(next);
}

/// Sentences with their terminal punctuation, trimmed
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?' | ';') {
            let next_is_space = chars.peek().map(|(_, n)| n.is_whitespace()).unwrap_or(true);
            if next_is_space {
                let end = i + c.len_utf8();
                let s = text[start..end].trim();
                if !s.is_empty() {
                    out.push(s);
                }
                start = end;
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}
