//! Transcript comparison for Tier 2 and Tier 3
//!
//! Texts are normalized to lowercase words with punctuation removed before
//! any comparison. Checks run in order: engine error phrase, repetition,
//! truncation, word error rate.

use std::collections::HashMap;

use narr_common::model::{Evidence, FailureReason, ValidationResult, ValidationTier};

use super::tier1::find_error_pattern;
use crate::config::Thresholds;

/// Lowercase words with surrounding punctuation stripped
pub fn normalize_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '\'')
                .collect::<String>()
                .to_lowercase()
        })
        .map(|w| w.trim_matches('\'').to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Word-level edit distance divided by reference length
///
/// An empty reference gives 0.0 for an empty hypothesis and 1.0 otherwise.
pub fn word_error_rate(reference: &[String], hypothesis: &[String]) -> f64 {
    if reference.is_empty() {
        return if hypothesis.is_empty() { 0.0 } else { 1.0 };
    }
    let distance = strsim::generic_levenshtein(&reference.to_vec(), &hypothesis.to_vec());
    distance as f64 / reference.len() as f64
}

fn ngram_counts(words: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if n == 0 || words.len() < n {
        return counts;
    }
    for gram in words.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

/// Most over-repeated n-gram in the hypothesis, if any exceeds the
/// reference count by at least `min_excess`
pub fn excess_repetition(
    reference: &[String],
    hypothesis: &[String],
    n: usize,
    min_excess: usize,
) -> Option<(String, usize)> {
    let expected = ngram_counts(reference, n);
    ngram_counts(hypothesis, n)
        .into_iter()
        .filter_map(|(gram, count)| {
            let excess = count.saturating_sub(expected.get(gram).copied().unwrap_or(0));
            (excess >= min_excess.max(1)).then(|| (gram.join(" "), excess))
        })
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
}

/// Compare a transcript against the source text
pub fn check_transcript(
    tier: ValidationTier,
    source_text: &str,
    transcript: &str,
    thresholds: &Thresholds,
    error_patterns: &[String],
) -> ValidationResult {
    let reference = normalize_words(source_text);
    let hypothesis = normalize_words(transcript);
    let wer = word_error_rate(&reference, &hypothesis);
    let ratio = if reference.is_empty() {
        1.0
    } else {
        hypothesis.len() as f64 / reference.len() as f64
    };

    let mut evidence = Evidence {
        word_error_rate: Some(wer),
        transcript_word_ratio: Some(ratio),
        ..Default::default()
    };

    if let Some(pattern) = find_error_pattern(error_patterns, [transcript], source_text) {
        evidence.matched_pattern = Some(pattern.clone());
        return ValidationResult::fail(
            tier,
            FailureReason::EngineErrorUtterance,
            evidence,
            format!("transcript contains '{}'", pattern),
        );
    }

    if let Some((gram, excess)) = excess_repetition(
        &reference,
        &hypothesis,
        thresholds.repetition_ngram,
        thresholds.repetition_min_excess,
    ) {
        evidence.repeated_ngram = Some(gram.clone());
        return ValidationResult::fail(
            tier,
            FailureReason::Repetition,
            evidence,
            format!("'{}' repeated {} more time(s) than in the source", gram, excess),
        );
    }

    if ratio < thresholds.min_transcript_ratio {
        return ValidationResult::fail(
            tier,
            FailureReason::Truncation,
            evidence,
            format!(
                "transcript has {} of {} words ({:.2} < {:.2})",
                hypothesis.len(),
                reference.len(),
                ratio,
                thresholds.min_transcript_ratio
            ),
        );
    }

    if wer > thresholds.max_wer {
        return ValidationResult::fail(
            tier,
            FailureReason::HighWer,
            evidence,
            format!("word error rate {:.3} above {:.3}", wer, thresholds.max_wer),
        );
    }

    ValidationResult::pass(tier, evidence)
}
