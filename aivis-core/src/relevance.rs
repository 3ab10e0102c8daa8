//! Relevance weights from historical search impressions.

use crate::models::SearchQueryStat;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z0-9]+").expect("token regex"))
}

/// Lowercase alphanumeric tokens, in order, repeats kept.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    token_re()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Sum impressions per token across the given rows.
pub fn weights_from_rows(rows: &[SearchQueryStat]) -> HashMap<String, i64> {
    let mut weights: HashMap<String, i64> = HashMap::new();
    for row in rows {
        let impressions = row.impressions.max(0);
        for token in tokenize(&row.query) {
            *weights.entry(token).or_insert(0) += impressions;
        }
    }
    weights
}

/// Sum of weights over the distinct tokens of `query`.
pub fn score_query(query: &str, weights: &HashMap<String, i64>) -> i64 {
    if weights.is_empty() {
        return 0;
    }
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .filter_map(|t| weights.get(&t).copied())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(query: &str, impressions: i64) -> SearchQueryStat {
        SearchQueryStat {
            query: query.to_string(),
            impressions,
        }
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Best NFL odds, 2024!"), vec!["best", "nfl", "odds", "2024"]);
    }

    #[test]
    fn test_weights_sum_per_token() {
        let weights = weights_from_rows(&[stat("nfl odds", 100), stat("NFL picks", 50)]);
        assert_eq!(weights["nfl"], 150);
        assert_eq!(weights["odds"], 100);
        assert_eq!(weights["picks"], 50);
    }

    #[test]
    fn test_score_counts_each_token_once() {
        let weights = weights_from_rows(&[stat("nfl odds", 100)]);
        assert_eq!(score_query("nfl nfl odds", &weights), 200);
        assert_eq!(score_query("nba lines", &weights), 0);
    }

    #[test]
    fn test_score_without_weights_is_zero() {
        assert_eq!(score_query("nfl odds", &HashMap::new()), 0);
    }
}
