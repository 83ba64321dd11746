//! Fuzzy string matching utilities using Levenshtein distance
//!
//! Scores how close a transcript is to a command phrase so that partial or
//! noisy recognitions still resolve. Lengths are counted in characters, which
//! keeps CJK phrases on the same scale as ASCII ones.

/// Normalised similarity in `[0, 1]`: `1 - distance / longer_len`
///
/// Two empty strings are identical and score 1.0.
#[hotpath::measure]
pub fn similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

/// Calculate Levenshtein distance between two strings
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0; b.len() + 1]; a.len() + 1];

    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=b.len() {
        dp[0][j] = j;
    }

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            dp[i][j] = (dp[i - 1][j] + 1)
                .min(dp[i][j - 1] + 1)
                .min(dp[i - 1][j - 1] + cost);
        }
    }
    dp[a.len()][b.len()]
}

/// Clean text for matching: lowercase, drop punctuation and whitespace
///
/// Recognisers tend to append "。" or "！" and pad with spaces; none of that
/// carries meaning for a command phrase.
pub fn clean_for_matching(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}
