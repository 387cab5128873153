//! Character n-gram similarity for the cascade's last tier
//!
//! Dice coefficient over character bigram sets, case-folded and
//! whitespace-normalised. Bigrams keep single-character typos from sinking
//! a near-miss below practical thresholds the way trigrams do.

use std::collections::HashSet;

const NGRAM_SIZE: usize = 2;

fn ngrams(text: &str) -> HashSet<Vec<char>> {
    let normalised: Vec<char> = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .collect();
    normalised
        .windows(NGRAM_SIZE)
        .map(<[char]>::to_vec)
        .collect()
}

/// Dice coefficient of the two texts' bigram sets, in `[0, 1]`
#[must_use]
pub fn dice_similarity(a: &str, b: &str) -> f32 {
    let grams_a = ngrams(a);
    let grams_b = ngrams(b);
    if grams_a.is_empty() && grams_b.is_empty() {
        // Both too short for a bigram: fall back to equality
        return if a.trim().to_lowercase() == b.trim().to_lowercase() {
            1.0
        } else {
            0.0
        };
    }
    if grams_a.is_empty() || grams_b.is_empty() {
        return 0.0;
    }
    let common = grams_a.intersection(&grams_b).count();
    #[allow(clippy::cast_precision_loss)]
    {
        (2 * common) as f32 / (grams_a.len() + grams_b.len()) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_is_one() {
        assert!((dice_similarity("quick brown fox", "quick brown fox") - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_near_miss_scores_high() {
        // One dropped vowel stays above a 0.85 threshold
        let score = dice_similarity("quick brown fox", "quick brwn fox");
        assert!(score >= 0.85, "score was {score}");
    }

    #[test]
    fn test_unrelated_scores_low() {
        let score = dice_similarity("quick brown fox", "database migration");
        assert!(score < 0.3, "score was {score}");
    }

    #[test]
    fn test_case_and_whitespace_folding() {
        let score = dice_similarity("Quick  Brown\tFox", "quick brown fox");
        assert!((score - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_single_char_inputs() {
        assert!((dice_similarity("a", "a") - 1.0).abs() < f32::EPSILON);
        assert!(dice_similarity("a", "b").abs() < f32::EPSILON);
        assert!(dice_similarity("", "anything").abs() < f32::EPSILON);
    }
}
