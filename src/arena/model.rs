use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A remote container entity: one project or one semantic grouping
/// (e.g. "About"). The client only ever holds read-through copies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: Option<i64>,
    pub slug: Option<String>,
    pub title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(alias = "status")]
    pub visibility: Option<String>,
}

impl Channel {
    /// Title with the slug as fallback, trimmed.
    pub fn title_or_slug(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(self.slug.as_deref())
            .unwrap_or("")
            .trim()
    }

    pub fn created_millis(&self) -> i64 {
        self.created_at.map(|d| d.timestamp_millis()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: Option<i64>,
    pub slug: Option<String>,
    pub title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// The polymorphic `content` field of a block. The remote API returns it
/// absent, as a bare string, or as an object carrying rich-text variants;
/// anything else (arrays have been observed) is kept opaque.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BlockContent {
    Structured {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plain: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        markdown: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        html: Option<String>,
    },
    Plain(String),
    #[default]
    Empty,
    Other(Value),
}

impl BlockContent {
    pub fn is_empty(&self) -> bool {
        matches!(self, BlockContent::Empty)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageSource {
    pub src: Option<String>,
}

/// Image descriptor with nested size variants. Any of the sizes (or the
/// bare `src`) may be missing on a given block.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageDescriptor {
    pub src: Option<String>,
    pub small: Option<ImageSource>,
    pub medium: Option<ImageSource>,
    pub large: Option<ImageSource>,
}

/// A remote content item belonging to a channel. All project metadata
/// (cover, order, tags, ...) is a block whose title acts as a semantic tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub generated_title: Option<String>,
    #[serde(default)]
    pub content: BlockContent,
    pub content_html: Option<String>,
    #[serde(default)]
    pub description: BlockContent,
    pub image: Option<ImageDescriptor>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Block {
    pub fn created_millis(&self) -> i64 {
        self.created_at.map(|d| d.timestamp_millis()).unwrap_or(0)
    }
}

/// A block paired with its parent channel when the caller asked for the
/// read-only denormalization (`include_channel_meta`).
#[derive(Debug, Clone, Serialize)]
pub struct GroupBlock {
    pub block: Block,
    pub channel: Option<Channel>,
}

/// Signed upload policy from the legacy v2 endpoint. Field names follow
/// the policy document as S3 expects them.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadPolicy {
    pub key: String,
    #[serde(rename = "AWSAccessKeyId")]
    pub aws_access_key_id: String,
    pub acl: String,
    pub success_action_status: String,
    pub policy: String,
    pub signature: String,
    pub bucket: String,
}
