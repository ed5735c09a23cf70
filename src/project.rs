//! Synthesis of presentable projects from a channel and its role-tagged
//! blocks.
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::arena::model::{Block, Channel};
use crate::content::{display_html, plain_text};

static PROJECT_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^project\s*/\s*").expect("valid regex"));

/// Derived record for one portfolio project. Never persisted remotely;
/// synthesized fresh from a channel plus its blocks on each uncached read.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Project {
    pub id: Option<i64>,
    pub slug: String,
    pub display_name: String,
    pub cover_image: Option<String>,
    /// Explicit ordering from the "Order" block; `None` sorts last.
    pub order: Option<i64>,
    pub tags: Vec<String>,
    pub description_html: String,
    pub year: Option<String>,
    pub medium: Option<String>,
    pub dimensions: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Project {
    pub fn created_millis(&self) -> i64 {
        self.created_at.map(|d| d.timestamp_millis()).unwrap_or(0)
    }
}

/// The role a block plays, read from its title (falling back to the
/// generated title), lowercased and trimmed.
pub fn role_title(block: &Block) -> String {
    block
        .title
        .as_deref()
        .filter(|t| !t.is_empty())
        .or(block.generated_title.as_deref())
        .unwrap_or("")
        .trim()
        .to_lowercase()
}

/// First block whose role title matches `title` (already lowercase).
pub fn find_titled<'a>(blocks: &'a [Block], title: &str) -> Option<&'a Block> {
    blocks.iter().find(|b| role_title(b) == title)
}

/// Best available image URL on a block: large, then medium, then the bare
/// src, then small.
pub fn image_url(block: &Block) -> Option<String> {
    let image = block.image.as_ref()?;
    image
        .large
        .as_ref()
        .and_then(|s| s.src.clone())
        .or_else(|| image.medium.as_ref().and_then(|s| s.src.clone()))
        .or_else(|| image.src.clone())
        .or_else(|| image.small.as_ref().and_then(|s| s.src.clone()))
}

/// Leading-integer parse: optional sign, then digits, trailing text
/// ignored. Existing Order blocks in the wild carry trailing text, so a
/// strict parse would drop them.
pub fn parse_leading_int(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    let (sign, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok().map(|n| sign * n)
}

pub fn split_tags(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Channel title with the leading "Project / " prefix stripped, falling
/// back to the raw title and then the slug when stripping yields nothing.
pub fn display_name(channel: &Channel) -> String {
    let raw = channel.title_or_slug().to_string();
    let stripped = PROJECT_PREFIX_RE.replace(&raw, "").trim().to_string();
    if stripped.is_empty() {
        raw
    } else {
        stripped
    }
}

/// Channels whose title (or slug) starts with "Project" hold portfolio
/// projects; everything else in the group is auxiliary.
pub fn is_project_channel(channel: &Channel) -> bool {
    channel.title_or_slug().starts_with("Project")
}

/// Derive a project from a channel and its block list. At most one block
/// per role is honored, first match in list order.
pub fn synthesize(channel: &Channel, blocks: &[Block]) -> Project {
    let cover_image = find_titled(blocks, "cover").and_then(image_url);
    let order = find_titled(blocks, "order")
        .map(plain_text)
        .and_then(|text| parse_leading_int(&text));
    let tags = find_titled(blocks, "tags")
        .map(plain_text)
        .map(|text| split_tags(&text))
        .unwrap_or_default();
    let description_html = find_titled(blocks, "description")
        .map(display_html)
        .unwrap_or_default();
    let text_role = |role: &str| {
        find_titled(blocks, role)
            .map(plain_text)
            .filter(|t| !t.is_empty())
    };

    Project {
        id: channel.id,
        slug: channel.slug.clone().unwrap_or_default(),
        display_name: display_name(channel),
        cover_image,
        order,
        tags,
        description_html,
        year: text_role("year"),
        medium: text_role("medium"),
        dimensions: text_role("dimensions"),
        created_at: channel.created_at,
    }
}

/// Ascending by explicit order then creation time; projects without a
/// parsable order always sort last. Stable, so API order breaks remaining
/// ties.
pub fn sort_projects(projects: &mut [Project]) {
    projects.sort_by_key(|p| (p.order.unwrap_or(i64::MAX), p.created_millis()));
}

/// Image blocks in display order for a project detail page: every block
/// with a resolvable image, with the cover moved to the front.
pub fn ordered_image_blocks(blocks: &[Block]) -> Vec<&Block> {
    let mut with_images: Vec<&Block> = blocks.iter().filter(|b| image_url(b).is_some()).collect();
    if let Some(pos) = with_images.iter().position(|b| role_title(b) == "cover") {
        if pos > 0 {
            let cover = with_images.remove(pos);
            with_images.insert(0, cover);
        }
    }
    with_images
}
