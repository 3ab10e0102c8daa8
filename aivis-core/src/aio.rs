//! AI-overview block tree parsing.
//!
//! SerpAPI returns the overview as loosely shaped JSON. Known node shapes are
//! parsed into `Block` by recursive descent; anything else becomes
//! `Block::Unknown` and contributes nothing.

use crate::models::LinkRecord;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

pub const NO_PARSABLE_TEXT: &str = "(no parsable text)";
pub const NO_OVERVIEW: &str = "(no AI overview was returned for this query)";

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Paragraph(String),
    Heading(String),
    List(Vec<ListItem>),
    Video { title: Option<String>, link: String },
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListItem {
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub children: Vec<Block>,
}

/// Parsed overview text and links.
#[derive(Debug, Clone, PartialEq)]
pub struct Overview {
    pub text: String,
    pub links: Vec<LinkRecord>,
}

/// What a `google` search response says about the overview.
#[derive(Debug, Clone, PartialEq)]
pub enum OverviewOutcome {
    Parsed(Overview),
    /// Blocks must be fetched with a follow-up `google_ai_overview` request.
    PageToken(String),
    /// Readable sentinel for error payloads and untriggered overviews.
    Sentinel(String),
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("blank line regex"))
}

fn non_empty(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Parsing
// ============================================================================

pub fn parse_blocks(value: &Value) -> Vec<Block> {
    value
        .as_array()
        .map(|items| items.iter().map(parse_block).collect())
        .unwrap_or_default()
}

pub fn parse_block(value: &Value) -> Block {
    let Some(obj) = value.as_object() else {
        return match non_empty(value) {
            Some(text) => Block::Paragraph(text),
            None => Block::Unknown,
        };
    };

    let kind = obj.get("type").and_then(Value::as_str).unwrap_or("");
    let snippet = obj.get("snippet").and_then(non_empty);

    match kind {
        "heading" => snippet.map(Block::Heading).unwrap_or(Block::Unknown),
        "list" => Block::List(parse_list_items(obj.get("list").unwrap_or(&Value::Null))),
        "video" => match obj.get("link").and_then(non_empty) {
            Some(link) => Block::Video {
                title: obj.get("title").and_then(non_empty),
                link,
            },
            None => Block::Unknown,
        },
        "expandable" | "table" => {
            // Expandable sections nest their own text_blocks.
            let children = parse_blocks(obj.get("text_blocks").unwrap_or(&Value::Null));
            if children.is_empty() {
                snippet.map(Block::Paragraph).unwrap_or(Block::Unknown)
            } else {
                Block::List(vec![ListItem {
                    title: obj.get("title").and_then(non_empty),
                    snippet,
                    children,
                }])
            }
        }
        _ => {
            if let Some(list) = obj.get("list") {
                Block::List(parse_list_items(list))
            } else if let Some(text) = snippet {
                Block::Paragraph(text)
            } else {
                Block::Unknown
            }
        }
    }
}

fn parse_list_items(value: &Value) -> Vec<ListItem> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            if let Some(text) = non_empty(item) {
                return Some(ListItem {
                    snippet: Some(text),
                    ..ListItem::default()
                });
            }
            let obj = item.as_object()?;
            let mut children = Vec::new();
            if let Some(nested) = obj.get("list") {
                let nested = parse_list_items(nested);
                if !nested.is_empty() {
                    children.push(Block::List(nested));
                }
            }
            if let Some(blocks) = obj.get("text_blocks") {
                children.extend(parse_blocks(blocks));
            }
            let entry = ListItem {
                title: obj.get("title").and_then(non_empty),
                snippet: obj.get("snippet").and_then(non_empty),
                children,
            };
            (entry.title.is_some() || entry.snippet.is_some() || !entry.children.is_empty())
                .then_some(entry)
        })
        .collect()
}

// ============================================================================
// Flattening
// ============================================================================

/// Render blocks as plain text: list items become `- ` bullets (indented per
/// nesting level) and runs of 3+ newlines collapse to one blank line.
pub fn flatten(blocks: &[Block]) -> String {
    let mut out = String::new();
    render(blocks, 0, &mut out);
    let collapsed = blank_lines_re().replace_all(&out, "\n\n");
    collapsed.trim().to_string()
}

fn render(blocks: &[Block], depth: usize, out: &mut String) {
    for block in blocks {
        match block {
            Block::Paragraph(text) | Block::Heading(text) => {
                if depth == 0 {
                    out.push_str(text);
                    out.push_str("\n\n");
                } else {
                    push_bullet(out, depth, text);
                }
            }
            Block::List(items) => {
                for item in items {
                    let line = match (&item.title, &item.snippet) {
                        (Some(t), Some(s)) => format!("{t}: {s}"),
                        (Some(t), None) => t.clone(),
                        (None, Some(s)) => s.clone(),
                        (None, None) => String::new(),
                    };
                    if !line.is_empty() {
                        push_bullet(out, depth, &line);
                    }
                    render(&item.children, depth + 1, out);
                }
                if depth == 0 {
                    out.push('\n');
                }
            }
            Block::Video { .. } | Block::Unknown => {}
        }
    }
}

fn push_bullet(out: &mut String, depth: usize, text: &str) {
    out.push_str(&"  ".repeat(depth));
    out.push_str("- ");
    out.push_str(text);
    out.push('\n');
}

// ============================================================================
// Links
// ============================================================================

/// Video links embedded anywhere in the tree.
pub fn block_links(blocks: &[Block], out: &mut Vec<LinkRecord>) {
    for block in blocks {
        match block {
            Block::Video { title, link } => out.push(LinkRecord {
                url: link.clone(),
                anchor: title.clone(),
                source: Some("aio-video".to_string()),
            }),
            Block::List(items) => {
                for item in items {
                    block_links(&item.children, out);
                }
            }
            _ => {}
        }
    }
}

/// Top-level `references` / `citations` entries.
pub fn reference_links(overview: &Value) -> Vec<LinkRecord> {
    ["references", "citations"]
        .iter()
        .filter_map(|key| overview.get(*key).and_then(Value::as_array))
        .flatten()
        .filter_map(|entry| {
            let url = entry
                .get("link")
                .or_else(|| entry.get("url"))
                .and_then(non_empty)?;
            Some(LinkRecord {
                url,
                anchor: entry.get("title").and_then(non_empty),
                source: entry
                    .get("source")
                    .and_then(non_empty)
                    .or_else(|| Some("aio-reference".to_string())),
            })
        })
        .collect()
}

// ============================================================================
// Whole-response interpretation
// ============================================================================

/// Interpret the `ai_overview` object of a search (or follow-up) response.
pub fn parse_overview(overview: &Value) -> OverviewOutcome {
    if let Some(err) = overview.get("error").and_then(non_empty) {
        return OverviewOutcome::Sentinel(format!("(AI overview error: {err})"));
    }

    let mut links = Vec::new();
    let blocks = parse_blocks(overview.get("text_blocks").unwrap_or(&Value::Null));
    block_links(&blocks, &mut links);
    links.extend(reference_links(overview));

    let flat = ["answer", "summary"]
        .iter()
        .find_map(|key| overview.get(*key).and_then(non_empty));

    let text = match flat {
        Some(text) => text,
        None => {
            let flat = flatten(&blocks);
            if !flat.is_empty() {
                flat
            } else if let Some(token) = overview.get("page_token").and_then(non_empty) {
                return OverviewOutcome::PageToken(token);
            } else {
                NO_PARSABLE_TEXT.to_string()
            }
        }
    };

    OverviewOutcome::Parsed(Overview { text, links })
}

/// Interpret a full `search.json` response body.
pub fn parse_search_response(body: &Value) -> OverviewOutcome {
    if let Some(err) = body.get("error").and_then(non_empty) {
        return OverviewOutcome::Sentinel(format!("(AI overview error: {err})"));
    }
    match body.get("ai_overview") {
        Some(overview) if overview.is_object() => parse_overview(overview),
        _ => OverviewOutcome::Sentinel(NO_OVERVIEW.to_string()),
    }
}
