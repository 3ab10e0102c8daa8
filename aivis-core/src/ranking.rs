//! Ranking and cross-provider selection of generated search queries.

use crate::brands::{has_token, BrandTokens};
use crate::normalize;
use crate::relevance::score_query;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Structured reply expected from a generation provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQueries {
    #[serde(default)]
    pub generic: Vec<String>,
    #[serde(default)]
    pub branded: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedQuery {
    pub text: String,
    pub normalized: String,
    pub branded: bool,
    pub weight: i64,
    pub provider: String,
}

impl RankedQuery {
    /// `{provider}-{generic|branded}`
    pub fn source_tag(&self) -> String {
        let kind = if self.branded { "branded" } else { "generic" };
        format!("{}-{}", self.provider, kind)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RankingLimits {
    pub per_provider_cap: usize,
    pub min_branded: usize,
    pub branded_bonus: i64,
}

/// Trim, drop empties and normalized duplicates, and move queries to the list
/// their own-brand token content says they belong to. Without an own brand the
/// lists are only cleaned.
pub fn sanitize(raw: GeneratedQueries, tokens: &BrandTokens) -> GeneratedQueries {
    let mut seen = HashSet::new();
    let mut out = GeneratedQueries::default();
    let tagged = raw
        .generic
        .into_iter()
        .map(|q| (q, false))
        .chain(raw.branded.into_iter().map(|q| (q, true)));

    for (query, claimed_branded) in tagged {
        let text = query.trim().to_string();
        if text.is_empty() {
            continue;
        }
        if !seen.insert(normalize::normalize(&text)) {
            continue;
        }
        let branded = if tokens.has_brand() {
            has_token(&text, &tokens.brand)
        } else {
            claimed_branded
        };
        if branded {
            out.branded.push(text);
        } else {
            out.generic.push(text);
        }
    }
    out
}

/// Weight, sort and cap one provider's output.
pub fn rank_provider_output(
    provider: &str,
    queries: &GeneratedQueries,
    has_brand: bool,
    weights: &HashMap<String, i64>,
    limits: RankingLimits,
) -> Vec<RankedQuery> {
    let rank = |text: &String, branded: bool| {
        let score = score_query(text, weights);
        RankedQuery {
            text: text.clone(),
            normalized: normalize::normalize(text),
            branded,
            weight: if branded { score + limits.branded_bonus } else { score },
            provider: provider.to_string(),
        }
    };

    let mut ranked: Vec<RankedQuery> = queries
        .generic
        .iter()
        .map(|q| rank(q, false))
        .chain(queries.branded.iter().map(|q| rank(q, true)))
        .collect();
    sort_by_weight(&mut ranked);

    if has_brand {
        let branded_cap = limits
            .min_branded
            .max(limits.per_provider_cap * 2 / 5);
        let (branded, generic): (Vec<_>, Vec<_>) = ranked.into_iter().partition(|q| q.branded);
        ranked = branded
            .into_iter()
            .take(branded_cap)
            .chain(generic.into_iter().take(limits.per_provider_cap))
            .collect();
        sort_by_weight(&mut ranked);
    }

    ranked.truncate(limits.per_provider_cap);
    ranked
}

/// Stable descending sort by weight.
fn sort_by_weight(queries: &mut [RankedQuery]) {
    queries.sort_by(|a, b| b.weight.cmp(&a.weight));
}

/// Per-provider quotas: `total_cap / n` each, the remainder one each to the
/// first providers.
pub fn provider_quotas(total_cap: usize, providers: usize) -> Vec<usize> {
    if providers == 0 {
        return Vec::new();
    }
    let base = total_cap / providers;
    let remainder = total_cap % providers;
    (0..providers).map(|i| base + usize::from(i < remainder)).collect()
}

/// Balanced, normalized-unique selection across provider queues.
///
/// Quotas are split only over non-empty queues. With an own brand, one
/// branded query per provider is preseeded and counts against that
/// provider's quota. The result never exceeds `total_cap`.
pub fn select_across_providers(
    queues: Vec<Vec<RankedQuery>>,
    total_cap: usize,
    has_brand: bool,
) -> Vec<RankedQuery> {
    let queues: Vec<Vec<RankedQuery>> = queues.into_iter().filter(|q| !q.is_empty()).collect();
    let mut quotas = provider_quotas(total_cap, queues.len());
    let mut queues: Vec<Vec<Option<RankedQuery>>> = queues
        .into_iter()
        .map(|q| q.into_iter().map(Some).collect())
        .collect();
    let mut selected_norms: HashSet<String> = HashSet::new();
    let mut selected = Vec::new();

    if has_brand {
        for (queue, quota) in queues.iter_mut().zip(quotas.iter_mut()) {
            if *quota == 0 {
                continue;
            }
            let pick = queue.iter_mut().find(|slot| {
                slot.as_ref()
                    .is_some_and(|q| q.branded && !selected_norms.contains(&q.normalized))
            });
            if let Some(query) = pick.and_then(Option::take) {
                selected_norms.insert(query.normalized.clone());
                selected.push(query);
                *quota -= 1;
            }
        }
    }

    for (queue, quota) in queues.into_iter().zip(quotas) {
        let mut taken = 0;
        for query in queue.into_iter().flatten() {
            if taken >= quota {
                break;
            }
            if selected_norms.insert(query.normalized.clone()) {
                selected.push(query);
                taken += 1;
            }
        }
    }

    sort_by_weight(&mut selected);
    selected
}

/// Deterministic `score_auto` for a suggestion.
pub fn suggestion_score(weight: i64) -> i32 {
    let w = weight.max(0) as f64;
    let raw = (60.0 + w.ln_1p()).round() as i64;
    raw.clamp(30, 99) as i32
}

/// PAA filter: questions from a branded seed must name the brand and no
/// competitor; questions from a generic seed must not name the brand.
pub fn accept_paa_question(question: &str, seed_branded: bool, tokens: &BrandTokens) -> bool {
    if seed_branded {
        has_token(question, &tokens.brand) && !has_token(question, &tokens.competitors)
    } else {
        !has_token(question, &tokens.brand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: RankingLimits = RankingLimits {
        per_provider_cap: 12,
        min_branded: 2,
        branded_bonus: 150,
    };

    fn tokens() -> BrandTokens {
        BrandTokens {
            brand: vec!["acme".to_string()],
            competitors: vec!["globex".to_string()],
        }
    }

    fn provider_output(prefix: &str) -> GeneratedQueries {
        GeneratedQueries {
            generic: (0..10).map(|i| format!("{prefix} generic query {i}")).collect(),
            branded: (0..10).map(|i| format!("acme {prefix} branded query {i}")).collect(),
        }
    }

    #[test]
    fn test_sanitize_reclassifies_and_dedups() {
        let raw = GeneratedQueries {
            generic: vec![
                "  best odds today ".to_string(),
                "acme promo code".to_string(),
                "Best odds today!".to_string(),
                "".to_string(),
            ],
            branded: vec!["globex login".to_string()],
        };
        let clean = sanitize(raw, &tokens());
        assert_eq!(clean.generic, vec!["best odds today", "globex login"]);
        assert_eq!(clean.branded, vec!["acme promo code"]);
    }

    #[test]
    fn test_sanitize_without_brand_keeps_claims() {
        let raw = GeneratedQueries {
            generic: vec!["a".to_string()],
            branded: vec!["b".to_string()],
        };
        let clean = sanitize(raw.clone(), &BrandTokens::default());
        assert_eq!(clean, raw);
    }

    #[test]
    fn test_branded_bonus_and_caps() {
        let ranked = rank_provider_output("openai", &provider_output("x"), true, &HashMap::new(), LIMITS);
        assert_eq!(ranked.len(), 12);
        // max(2, floor(12 * 0.4)) = 4 branded, all ahead thanks to the bonus.
        assert_eq!(ranked.iter().filter(|q| q.branded).count(), 4);
        assert!(ranked[..4].iter().all(|q| q.branded && q.weight == 150));
        assert_eq!(ranked[0].source_tag(), "openai-branded");
    }

    #[test]
    fn test_rank_without_brand_truncates() {
        let ranked = rank_provider_output("gemini", &provider_output("x"), false, &HashMap::new(), LIMITS);
        assert_eq!(ranked.len(), 12);
        assert!(ranked[..10].iter().all(|q| q.branded));
    }

    #[test]
    fn test_relevance_orders_generic_queries() {
        let weights = HashMap::from([("nfl".to_string(), 500_i64)]);
        let queries = GeneratedQueries {
            generic: vec!["nba lines".to_string(), "nfl lines".to_string()],
            branded: vec![],
        };
        let ranked = rank_provider_output("openai", &queries, false, &weights, LIMITS);
        assert_eq!(ranked[0].text, "nfl lines");
        assert_eq!(ranked[0].weight, 500);
    }

    #[test]
    fn test_quotas() {
        assert_eq!(provider_quotas(16, 2), vec![8, 8]);
        assert_eq!(provider_quotas(10, 3), vec![4, 3, 3]);
        assert_eq!(provider_quotas(1, 2), vec![1, 0]);
        assert!(provider_quotas(5, 0).is_empty());
    }

    #[test]
    fn test_selection_balance_with_brand() {
        let a = rank_provider_output("openai", &provider_output("a"), true, &HashMap::new(), LIMITS);
        let b = rank_provider_output("gemini", &provider_output("b"), true, &HashMap::new(), LIMITS);
        let selected = select_across_providers(vec![a, b], 10, true);

        assert!(selected.len() <= 10);
        for provider in ["openai", "gemini"] {
            assert!(selected.iter().any(|q| q.provider == provider && q.branded));
        }
        let norms: HashSet<&str> = selected.iter().map(|q| q.normalized.as_str()).collect();
        assert_eq!(norms.len(), selected.len());
        assert!(selected.windows(2).all(|w| w[0].weight >= w[1].weight));
    }

    #[test]
    fn test_selection_dedups_overlapping_providers() {
        let same = provider_output("same");
        let a = rank_provider_output("openai", &same, true, &HashMap::new(), LIMITS);
        let b = rank_provider_output("gemini", &same, true, &HashMap::new(), LIMITS);
        let selected = select_across_providers(vec![a, b], 16, true);

        let norms: HashSet<&str> = selected.iter().map(|q| q.normalized.as_str()).collect();
        assert_eq!(norms.len(), selected.len());
        assert!(selected.len() <= 16);
    }

    #[test]
    fn test_selection_never_exceeds_tiny_cap() {
        let a = rank_provider_output("openai", &provider_output("a"), true, &HashMap::new(), LIMITS);
        let b = rank_provider_output("gemini", &provider_output("b"), true, &HashMap::new(), LIMITS);
        let selected = select_across_providers(vec![a, b], 1, true);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].provider, "openai");
    }

    #[test]
    fn test_empty_queue_gets_no_quota() {
        let b = rank_provider_output("gemini", &provider_output("b"), false, &HashMap::new(), LIMITS);
        let selected = select_across_providers(vec![Vec::new(), b], 10, false);
        assert_eq!(selected.len(), 10);
        assert!(selected.iter().all(|q| q.provider == "gemini"));
    }

    #[test]
    fn test_suggestion_score() {
        assert_eq!(suggestion_score(0), 60);
        assert_eq!(suggestion_score(-50), 60);
        assert_eq!(suggestion_score(150), 65);
        assert_eq!(suggestion_score(i64::MAX), 99);
    }

    #[test]
    fn test_paa_filter() {
        let t = tokens();
        assert!(accept_paa_question("is acme legit", true, &t));
        assert!(!accept_paa_question("acme vs globex which is better", true, &t));
        assert!(!accept_paa_question("what is the best sportsbook", true, &t));
        assert!(accept_paa_question("what is the best sportsbook", false, &t));
        assert!(!accept_paa_question("is acme legit", false, &t));
    }
}
