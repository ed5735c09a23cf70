//! Resolution of the polymorphic block content into text, and the reflow
//! of free text into display HTML.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::arena::model::{Block, BlockContent};

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static BLANK_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").expect("valid regex"));

fn non_empty(s: &String) -> bool {
    !s.is_empty()
}

/// Plain-text reading of a block, used where the content is parsed rather
/// than displayed (Order, Tags). Structured content prefers `plain` over
/// `markdown` and never falls through to `content_html`; a bare-string
/// content is used as-is; otherwise `content_html` is stripped of tags.
pub fn plain_text(block: &Block) -> String {
    match &block.content {
        BlockContent::Structured { plain, markdown, .. } => plain
            .clone()
            .filter(non_empty)
            .or_else(|| markdown.clone())
            .unwrap_or_default()
            .trim()
            .to_string(),
        BlockContent::Plain(text) => text.trim().to_string(),
        _ => block
            .content_html
            .as_deref()
            .map(strip_tags)
            .unwrap_or_default(),
    }
}

/// Displayable HTML for a block, used for the about text and project
/// descriptions. Structured content prefers `html`, then `plain`, then
/// `markdown`; otherwise `content_html`, a bare-string content, and
/// finally the `description` field (same inner precedence). Free text
/// that is not already HTML is reflowed into paragraphs.
pub fn display_html(block: &Block) -> String {
    let mut from_structured_html = false;
    let text = match &block.content {
        BlockContent::Structured { plain, markdown, html } => {
            let html = html.clone().filter(non_empty);
            if html.is_some() {
                from_structured_html = true;
            }
            html.or_else(|| plain.clone().filter(non_empty))
                .or_else(|| markdown.clone().filter(non_empty))
                .unwrap_or_default()
        }
        other => block
            .content_html
            .clone()
            .filter(non_empty)
            .or_else(|| match other {
                BlockContent::Plain(text) if !text.is_empty() => Some(text.clone()),
                _ => None,
            })
            .or_else(|| resolve_description(&block.description))
            .unwrap_or_default(),
    };

    if text.is_empty() || text.starts_with('<') || from_structured_html {
        return text;
    }
    reflow(&text)
}

fn resolve_description(description: &BlockContent) -> Option<String> {
    match description {
        BlockContent::Plain(text) => Some(text.clone()).filter(non_empty),
        BlockContent::Structured { plain, markdown, html } => html
            .clone()
            .filter(non_empty)
            .or_else(|| plain.clone().filter(non_empty))
            .or_else(|| markdown.clone().filter(non_empty)),
        _ => None,
    }
}

/// Reflow free text into HTML: blank-line-delimited segments each become a
/// paragraph tag; text without blank-line breaks keeps its single-paragraph
/// shape with newlines turned into line breaks.
pub fn reflow(text: &str) -> String {
    let segments: Vec<&str> = BLANK_LINE_RE
        .split(text)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect();
    if segments.len() > 1 {
        segments
            .iter()
            .map(|segment| format!("<p>{}</p>", segment))
            .collect()
    } else {
        text.trim().replace('\n', "<br>")
    }
}

pub fn strip_tags(html: &str) -> String {
    TAG_RE.replace_all(html, "").trim().to_string()
}
