//! Own-brand vs competitor token sets for query generation and PAA filtering.

use crate::models::BrandCatalog;

/// Lowercased, deduplicated tokens in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrandTokens {
    pub brand: Vec<String>,
    pub competitors: Vec<String>,
}

impl BrandTokens {
    pub fn has_brand(&self) -> bool {
        !self.brand.is_empty()
    }
}

/// Split the catalog into the target brand's tokens (id, name, aliases) and
/// every other brand's tokens. `None` or an unknown id leaves `brand` empty.
pub fn brand_tokens(catalog: &BrandCatalog, brand_id: Option<&str>) -> BrandTokens {
    let mut tokens = BrandTokens::default();
    for brand in catalog.brands() {
        let target = brand_id.is_some_and(|id| id == brand.id);
        let bucket = if target {
            &mut tokens.brand
        } else {
            &mut tokens.competitors
        };
        let candidates = std::iter::once(brand.id.as_str())
            .chain(std::iter::once(brand.name.as_str()))
            .chain(brand.aliases.iter().map(String::as_str));
        for candidate in candidates {
            let token = candidate.trim().to_lowercase();
            if !token.is_empty() && !bucket.contains(&token) {
                bucket.push(token);
            }
        }
    }
    // A token shared with the target brand is never a competitor signal.
    let own = tokens.brand.clone();
    tokens.competitors.retain(|t| !own.contains(t));
    tokens
}

/// Space-padded containment: `" {token} "` inside `" {text} "`, case-insensitive.
///
/// This is looser than the word-bounded regex used for mention detection
/// (punctuation next to a token defeats it, and multi-word tokens only match
/// on single spaces). Kept that way so PAA filtering stays comparable with
/// historical suggestion data.
pub fn has_token(text: &str, tokens: &[String]) -> bool {
    let haystack = format!(" {} ", text.to_lowercase());
    tokens
        .iter()
        .filter(|t| !t.is_empty())
        .any(|t| haystack.contains(&format!(" {} ", t.to_lowercase())))
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
                aliases: vec!["draftkings".to_string(), "Draft Kings".to_string()],
            },
            Brand {
                id: "fanduel".to_string(),
                name: "FanDuel".to_string(),
                aliases: vec!["fanduel".to_string()],
            },
        ])
    }

    #[test]
    fn test_tokens_partitioned_and_deduplicated() {
        let tokens = brand_tokens(&catalog(), Some("draftkings"));
        assert_eq!(tokens.brand, vec!["draftkings", "draft kings"]);
        assert_eq!(tokens.competitors, vec!["fanduel"]);
        assert!(tokens.has_brand());
    }

    #[test]
    fn test_no_brand_puts_everything_in_competitors() {
        let tokens = brand_tokens(&catalog(), None);
        assert!(tokens.brand.is_empty());
        assert_eq!(tokens.competitors, vec!["draftkings", "draft kings", "fanduel"]);
    }

    #[test]
    fn test_unknown_brand_is_empty() {
        let tokens = brand_tokens(&catalog(), Some("caesars"));
        assert!(!tokens.has_brand());
    }

    #[test]
    fn test_has_token_is_space_padded() {
        let tokens = vec!["fanduel".to_string()];
        assert!(has_token("is FanDuel legal in ohio", &tokens));
        assert!(has_token("fanduel", &tokens));
        assert!(!has_token("fanduelsportsbook promo", &tokens));
    }

    #[test]
    fn test_has_token_misses_punctuated_tokens() {
        // Space padding does not treat punctuation as a boundary.
        let tokens = vec!["fanduel".to_string()];
        assert!(!has_token("is fanduel?", &tokens));
    }
}
