//! Brand mention detection over the visible text of a response.

use crate::models::BrandCatalog;
use crate::text;
use regex::Regex;

/// One brand hit: the first alias (in stored order) that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedMention {
    pub brand_id: String,
    pub found_alias: String,
    /// Byte offset of the match inside the text-only content.
    pub offset: usize,
}

struct AliasPattern {
    alias: String,
    re: Regex,
}

struct BrandPatterns {
    brand_id: String,
    aliases: Vec<AliasPattern>,
}

/// Word-bounded, case-insensitive alias patterns compiled once per run.
pub struct MentionMatcher {
    brands: Vec<BrandPatterns>,
}

impl MentionMatcher {
    pub fn new(catalog: &BrandCatalog) -> Self {
        let brands = catalog
            .brands()
            .iter()
            .map(|brand| {
                let mut names: Vec<&str> = brand.aliases.iter().map(String::as_str).collect();
                if names.is_empty() {
                    names.push(brand.name.as_str());
                }
                let aliases = names
                    .into_iter()
                    .filter(|a| !a.trim().is_empty())
                    .filter_map(|alias| match alias_regex(alias) {
                        Ok(re) => Some(AliasPattern {
                            alias: alias.to_string(),
                            re,
                        }),
                        Err(e) => {
                            tracing::warn!(brand = %brand.id, alias, error = %e, "Skipping unusable alias");
                            None
                        }
                    })
                    .collect();
                BrandPatterns {
                    brand_id: brand.id.clone(),
                    aliases,
                }
            })
            .collect();
        Self { brands }
    }

    /// Detect at most one mention per brand in `raw_answer`. URLs and
    /// markdown links are removed before matching.
    pub fn detect(&self, raw_answer: &str) -> (String, Vec<DetectedMention>) {
        let visible = text::text_only(raw_answer);
        let mut found = Vec::new();
        for brand in &self.brands {
            for pattern in &brand.aliases {
                if let Some(caps) = pattern.re.captures(&visible) {
                    let offset = caps.get(1).map(|m| m.start()).unwrap_or(0);
                    found.push(DetectedMention {
                        brand_id: brand.brand_id.clone(),
                        found_alias: pattern.alias.clone(),
                        offset,
                    });
                    break;
                }
            }
        }
        (visible, found)
    }
}

fn alias_regex(alias: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r"(?i)(?:^|[^\p{{L}}\p{{N}}_])({})(?:[^\p{{L}}\p{{N}}_]|$)",
        regex::escape(alias.trim())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Brand;

    fn catalog() -> BrandCatalog {
        BrandCatalog::new(vec![
            Brand {
                id: "draftkings".to_string(),
                name: "DraftKings".to_string(),
                aliases: vec!["draftkings".to_string(), "draft kings".to_string()],
            },
            Brand {
                id: "fanduel".to_string(),
                name: "FanDuel".to_string(),
                aliases: vec!["fanduel".to_string(), "fan duel".to_string()],
            },
            Brand {
                id: "bet365".to_string(),
                name: "bet365".to_string(),
                aliases: vec!["bet365".to_string()],
            },
        ])
    }

    fn brand_ids(mentions: &[DetectedMention]) -> Vec<&str> {
        mentions.iter().map(|m| m.brand_id.as_str()).collect()
    }

    #[test]
    fn test_markdown_link_brand_is_excluded() {
        let matcher = MentionMatcher::new(&catalog());
        let (_, found) =
            matcher.detect("Check [DraftKings](https://draftkings.com) today. FanDuel is also good.");
        assert_eq!(brand_ids(&found), vec!["fanduel"]);
    }

    #[test]
    fn test_bare_url_brand_is_excluded() {
        let matcher = MentionMatcher::new(&catalog());
        let (_, found) = matcher.detect("FanDuel is great, unlike http://draftkings.com");
        assert_eq!(brand_ids(&found), vec!["fanduel"]);
        assert_eq!(found[0].found_alias, "fanduel");
    }

    #[test]
    fn test_one_mention_per_brand_first_alias_wins() {
        let matcher = MentionMatcher::new(&catalog());
        let (_, found) = matcher.detect("Fan Duel, also written FanDuel, leads the market.");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].brand_id, "fanduel");
        assert_eq!(found[0].found_alias, "fanduel", "stored alias order decides, not text order");
    }

    #[test]
    fn test_later_alias_matches_when_first_absent() {
        let matcher = MentionMatcher::new(&catalog());
        let (_, found) = matcher.detect("Many users like Draft Kings for props.");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].found_alias, "draft kings");
    }

    #[test]
    fn test_match_is_word_bounded() {
        let matcher = MentionMatcher::new(&catalog());
        let (_, found) = matcher.detect("superfanduelx is not a brand; bet3650 neither");
        assert!(found.is_empty());
    }

    #[test]
    fn test_match_is_case_insensitive_and_reports_offset() {
        let matcher = MentionMatcher::new(&catalog());
        let (visible, found) = matcher.detect("Try BET365.");
        assert_eq!(found.len(), 1);
        assert_eq!(&visible[found[0].offset..found[0].offset + 6], "BET365");
    }

    #[test]
    fn test_brand_without_aliases_falls_back_to_name() {
        let catalog = BrandCatalog::new(vec![Brand {
            id: "caesars".to_string(),
            name: "Caesars".to_string(),
            aliases: vec![],
        }]);
        let matcher = MentionMatcher::new(&catalog);
        let (_, found) = matcher.detect("Caesars Sportsbook has good odds");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].found_alias, "Caesars");
    }
}
