//! Citation link extraction for a response.

use crate::models::LinkRecord;
use crate::text;
use std::collections::HashSet;

/// Structured citations first, then markdown links, then bare URLs.
/// Deduplicated by URL; the first occurrence keeps its anchor and source.
pub fn extract_links(raw_answer: &str, structured: &[LinkRecord]) -> Vec<LinkRecord> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut push = |link: LinkRecord| {
        if !link.url.is_empty() && seen.insert(link.url.clone()) {
            out.push(link);
        }
    };

    for link in structured {
        let url = text::trim_url(link.url.trim()).to_string();
        push(LinkRecord { url, ..link.clone() });
    }

    for caps in text::markdown_link_re().captures_iter(raw_answer) {
        let anchor = caps
            .get(1)
            .map(|m| m.as_str().trim())
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        if let Some(url) = caps.get(2) {
            push(LinkRecord {
                url: text::trim_url(url.as_str()).to_string(),
                anchor,
                source: Some("markdown".to_string()),
            });
        }
    }

    for m in text::bare_url_re().find_iter(raw_answer) {
        let mut url = text::trim_url(m.as_str()).to_string();
        if url.to_lowercase().starts_with("www.") {
            url = format!("https://{url}");
        }
        push(LinkRecord {
            url,
            anchor: None,
            source: Some("text".to_string()),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_and_bare_duplicate_collapse() {
        let links = extract_links(
            "See [FanDuel](https://fanduel.com) or https://fanduel.com.",
            &[],
        );
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://fanduel.com");
        assert_eq!(links[0].anchor.as_deref(), Some("FanDuel"));
        assert_eq!(links[0].source.as_deref(), Some("markdown"));
    }

    #[test]
    fn test_structured_citation_wins() {
        let structured = vec![LinkRecord {
            url: "https://draftkings.com".to_string(),
            anchor: Some("DK".to_string()),
            source: Some("citation".to_string()),
        }];
        let links = extract_links("Visit https://draftkings.com and www.bet365.com", &structured);
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://draftkings.com", "https://www.bet365.com"]);
        assert_eq!(links[0].source.as_deref(), Some("citation"));
    }

    #[test]
    fn test_no_links() {
        assert!(extract_links("plain text", &[]).is_empty());
    }
}
