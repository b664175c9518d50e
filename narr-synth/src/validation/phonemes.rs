//! Spoken-duration estimate from text
//!
//! A grapheme heuristic, not a pronunciation model: letters count as
//! phonemes, common digraphs count once, a silent final `e` is dropped, and
//! digits are expanded to the rough length of their spoken form.

use crate::config::ValidationConfig;

const DIGRAPHS: &[&str] = &[
    "th", "sh", "ch", "ph", "wh", "gh", "ng", "ck", "qu", "ee", "oo", "ea", "ai", "ay", "oa", "ou",
    "ie", "oi", "oy", "au", "aw",
];

/// Phonemes in a single word
fn word_phonemes(word: &str) -> usize {
    let lower = word.to_lowercase();
    let letters: String = lower.chars().filter(|c| c.is_alphabetic()).collect();
    let digits = lower.chars().filter(|c| c.is_ascii_digit()).count();

    let mut count = letters.chars().count();
    for digraph in DIGRAPHS {
        count = count.saturating_sub(letters.matches(digraph).count());
    }
    if letters.len() > 3 && letters.ends_with('e') && !letters.ends_with("ee") && !letters.ends_with("le") {
        count = count.saturating_sub(1);
    }
    // "seven" ≈ 5, "one" ≈ 3
    count += digits * 4;

    if count == 0 && (!letters.is_empty() || digits > 0) {
        1
    } else {
        count
    }
}

/// Estimated phoneme count of `text`
pub fn estimate_phonemes(text: &str) -> usize {
    text.split_whitespace().map(word_phonemes).sum()
}

/// Expected spoken duration in seconds
pub fn estimate_duration_secs(text: &str, config: &ValidationConfig) -> f64 {
    let phonemes = estimate_phonemes(text) as f64;
    let mut pauses = 0.0;
    for c in text.chars() {
        match c {
            ',' | ';' | ':' | '—' | '–' => pauses += config.comma_pause_secs,
            '.' | '!' | '?' => pauses += config.sentence_pause_secs,
            _ => {}
        }
    }
    phonemes / config.phonemes_per_sec + pauses
}
