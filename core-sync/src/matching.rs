//! Name similarity used by fuzzy resolution.
//!
//! Inputs are expected to be normalized with
//! [`core_library::models::normalize_name`] first.

use std::ops::RangeInclusive;

/// Normalized Levenshtein similarity in `[0.0, 1.0]`, measured over chars.
///
/// ```
/// use core_sync::matching::similarity;
///
/// assert_eq!(similarity("radiohead", "radiohead"), 1.0);
/// assert_eq!(similarity("", "radiohead"), 0.0);
/// assert!(similarity("radiohead", "radioheed") > 0.85);
/// ```
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let distance = levenshtein(a, b);
    let max_len = a.chars().count().max(b.chars().count());

    1.0 - (distance as f64 / max_len as f64)
}

/// Lengths, in chars, a name may have and still reach `threshold` against a
/// name of `len` chars.
///
/// The edit distance is at least the length difference, so a similarity of
/// `threshold` needs `threshold * len <= other <= len / threshold`.
pub fn length_window(len: usize, threshold: f64) -> RangeInclusive<usize> {
    if !(threshold > 0.0) {
        return 0..=usize::MAX;
    }
    let threshold = threshold.min(1.0);
    let len = len as f64;
    // float to int casts saturate
    let shortest = (len * threshold).ceil() as usize;
    let longest = (len / threshold).floor() as usize;
    shortest..=longest
}

/// Edit distance counting single-char insertions, deletions and substitutions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    // Two rolling rows instead of the full matrix
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0usize; b_chars.len() + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        current[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert_eq!(levenshtein("sigur rós", "sigur ros"), 1);
    }

    #[test]
    fn test_similarity_bounds() {
        assert_eq!(similarity("abc", "abc"), 1.0);
        assert_eq!(similarity("", ""), 0.0);
        assert_eq!(similarity("abc", ""), 0.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let pairs = [("ok computer", "ok computr"), ("kid a", "kid b"), ("amnesiac", "amnesia")];
        for (a, b) in pairs {
            assert_eq!(similarity(a, b), similarity(b, a));
        }
    }

    #[test]
    fn test_similarity_counts_chars_not_bytes() {
        // One substitution over five chars, even though "é" is two bytes
        assert!((similarity("élan1", "elan1") - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_one_edit_in_ten_is_exactly_point_nine() {
        assert!((similarity("abcdefghij", "abcdefghix") - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_length_window_keeps_every_reachable_length() {
        let tolerance = 1e-9;
        for threshold in [0.5, 0.8, 0.9, 1.0] {
            for len in 1..30 {
                let window = length_window(len, threshold - tolerance);
                let name = "a".repeat(len);
                for other in 0..70 {
                    // identical chars, so the distance is exactly the length gap
                    let reachable = similarity(&name, &"a".repeat(other)) + tolerance >= threshold;
                    assert_eq!(
                        window.contains(&other),
                        reachable,
                        "len {} other {} threshold {}",
                        len,
                        other,
                        threshold
                    );
                }
            }
        }
    }

    #[test]
    fn test_length_window_bounds() {
        assert_eq!(length_window(9, 0.9 - 1e-9), 9..=10);
        assert_eq!(length_window(10, 0.9 - 1e-9), 9..=11);
        assert_eq!(length_window(4, 0.0), 0..=usize::MAX);
    }
}
