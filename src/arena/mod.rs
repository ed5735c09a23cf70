//! Client for the Are.na API: transport, response normalization,
//! pagination and the domain operations the site needs.
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Method, Url};
use serde_json::{json, Map, Value};
use std::cmp::Reverse;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::arena::model::{Block, Channel, Group, GroupBlock, UploadPolicy};

pub mod model;

const API_BASE_V3: &str = "https://api.are.na/v3/";
const API_BASE_V2: &str = "https://api.are.na/v2/";
const CACHE_BUST_PARAM: &str = "_cb";

#[derive(Debug, Error)]
pub enum ArenaError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("invalid endpoint \"{0}\"")]
    Endpoint(String),
    #[error("are.na request to \"{endpoint}\" failed ({status}). {detail}")]
    Http {
        endpoint: String,
        status: u16,
        detail: String,
    },
    #[error("storage upload failed ({status})")]
    Upload { status: u16 },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid response JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ArenaError>;

/// Which API surface a request targets. The upload policy lives on the
/// legacy v2 base, everything else on v3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiBase {
    V3,
    V2,
}

/// Multipart form submitted directly to object storage.
#[derive(Debug, Clone)]
pub struct UploadForm {
    pub fields: Vec<(String, String)>,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Raw response from the storage provider. The body is XML, not JSON.
#[derive(Debug, Clone)]
pub struct StorageResponse {
    pub status: u16,
    pub body: String,
}

/// Seam between the domain operations and the wire. The real
/// implementation is [`HttpTransport`]; tests substitute recording fakes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        base: ApiBase,
        endpoint: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value>;

    async fn submit_form(&self, url: &str, form: UploadForm) -> Result<StorageResponse>;
}

pub struct HttpTransport {
    http: Client,
    v3: Url,
    v2: Url,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(token: Option<String>) -> Self {
        let v3 = Url::parse(API_BASE_V3).expect("valid default are.na URL");
        let v2 = Url::parse(API_BASE_V2).expect("valid default are.na URL");
        Self::with_base_urls(token, v3, v2)
    }

    pub fn with_base_urls(token: Option<String>, v3: Url, v2: Url) -> Self {
        let http = Client::builder()
            .user_agent("arena-folio/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            v3,
            v2,
            token,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: Method,
        base: ApiBase,
        endpoint: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let base = match base {
            ApiBase::V3 => &self.v3,
            ApiBase::V2 => &self.v2,
        };
        let mut url = base
            .join(endpoint)
            .map_err(|_| ArenaError::Endpoint(endpoint.to_string()))?;
        for (key, value) in query {
            if value.is_empty() {
                continue;
            }
            url.query_pairs_mut().append_pair(key, value);
        }

        let mut req = self
            .http
            .request(method, url)
            .header("Accept", "application/json");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        if let Some(body) = body {
            req = req.header("Content-Type", "application/json").json(body);
        }

        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            let detail = match res.json::<Value>().await {
                Ok(err_body) => extract_error_detail(&err_body),
                Err(_) => String::new(),
            };
            return Err(ArenaError::Http {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                detail,
            });
        }
        Ok(res.json().await?)
    }

    async fn submit_form(&self, url: &str, form: UploadForm) -> Result<StorageResponse> {
        let mut multipart = reqwest::multipart::Form::new();
        for (key, value) in form.fields {
            multipart = multipart.text(key, value);
        }
        multipart = multipart.part(
            "file",
            reqwest::multipart::Part::bytes(form.bytes)
                .file_name(form.file_name)
                .mime_str(&form.content_type)?,
        );

        let res = self.http.post(url).multipart(multipart).send().await?;
        Ok(StorageResponse {
            status: res.status().as_u16(),
            body: res.text().await.unwrap_or_default(),
        })
    }
}

/// Pull the human-readable detail out of a structured error body. The API
/// returns either an `errors` list or a bare `title`.
fn extract_error_detail(body: &Value) -> String {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        return errors
            .iter()
            .filter_map(|e| e.get("message").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("; ");
    }
    body.get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Extract the entity list from a payload regardless of how the endpoint
/// wrapped it. First match wins; callers never see the wrapper shape.
pub fn normalize_items(payload: &Value) -> Vec<Value> {
    if let Some(items) = payload.as_array() {
        return items.clone();
    }
    if let Some(data) = payload.get("data").filter(|d| !d.is_null()) {
        return data.as_array().cloned().unwrap_or_default();
    }
    for key in ["channels", "contents", "blocks"] {
        if let Some(items) = payload.get(key).and_then(Value::as_array) {
            if !items.is_empty() {
                return items.clone();
            }
        }
    }
    Vec::new()
}

#[derive(Debug, Clone)]
pub struct ChannelContentsOptions {
    pub per: usize,
    pub page: usize,
    pub cache_bust: bool,
    pub extra: Vec<(String, String)>,
}

impl Default for ChannelContentsOptions {
    fn default() -> Self {
        Self {
            per: 12,
            page: 1,
            cache_bust: true,
            extra: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupChannelsOptions {
    pub per: usize,
    pub max_pages: usize,
}

impl Default for GroupChannelsOptions {
    fn default() -> Self {
        Self {
            per: 100,
            max_pages: 10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupContentsOptions {
    pub per: Option<usize>,
    pub max_pages: Option<usize>,
    pub entity_type: Option<String>,
    pub sort: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GroupBlocksOptions {
    pub channel_per: usize,
    pub channel_max_pages: usize,
    pub block_per: usize,
    pub block_page: usize,
    pub include_channel_meta: bool,
}

impl Default for GroupBlocksOptions {
    fn default() -> Self {
        Self {
            channel_per: 50,
            channel_max_pages: 5,
            block_per: 12,
            block_page: 1,
            include_channel_meta: false,
        }
    }
}

/// Group association for a newly created channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelGroup {
    /// Attach the configured default group.
    #[default]
    Default,
    /// Explicitly suppress any group association.
    None,
    Id(i64),
}

#[derive(Debug, Clone)]
pub struct CreateChannelOptions {
    pub group: ChannelGroup,
    pub visibility: String,
}

impl Default for CreateChannelOptions {
    fn default() -> Self {
        Self {
            group: ChannelGroup::Default,
            visibility: "private".into(),
        }
    }
}

/// Partial update for a block; only the provided fields are sent.
#[derive(Debug, Clone, Default)]
pub struct BlockPatch {
    pub content: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

pub struct ArenaClient<T = HttpTransport> {
    transport: T,
    default_group_id: Option<i64>,
}

impl ArenaClient<HttpTransport> {
    pub fn new(token: Option<String>, default_group_id: Option<i64>) -> Self {
        Self::with_transport(HttpTransport::new(token), default_group_id)
    }
}

impl<T: Transport> ArenaClient<T> {
    pub fn with_transport(transport: T, default_group_id: Option<i64>) -> Self {
        Self {
            transport,
            default_group_id,
        }
    }

    async fn get(&self, base: ApiBase, endpoint: &str, query: &[(String, String)]) -> Result<Value> {
        self.transport
            .request(Method::GET, base, endpoint, query, None)
            .await
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        self.transport
            .request(Method::POST, ApiBase::V3, endpoint, &[], Some(body))
            .await
    }

    async fn put(&self, endpoint: &str, body: &Value) -> Result<Value> {
        self.transport
            .request(Method::PUT, ApiBase::V3, endpoint, &[], Some(body))
            .await
    }

    /// Fetch pages of `endpoint` until the API runs out or the ceiling is
    /// hit. `max_pages` is a safety bound, not a correctness guarantee;
    /// hitting it logs a warning because items beyond it are dropped.
    async fn fetch_paginated(
        &self,
        endpoint: &str,
        params: Vec<(String, String)>,
        per: usize,
        max_pages: usize,
    ) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut page = 1;
        while page <= max_pages {
            let mut query = params.clone();
            query.push(("per".into(), per.to_string()));
            query.push(("page".into(), page.to_string()));
            let payload = self.get(ApiBase::V3, endpoint, &query).await?;

            let batch = normalize_items(&payload);
            if batch.is_empty() {
                return Ok(items);
            }
            let batch_len = batch.len();
            items.extend(batch);

            match payload.get("meta").filter(|m| !m.is_null()) {
                Some(meta) => {
                    let has_more = meta
                        .get("has_more_pages")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if !has_more {
                        return Ok(items);
                    }
                }
                None => {
                    if batch_len < per {
                        return Ok(items);
                    }
                }
            }
            page += 1;
        }
        warn!(endpoint, max_pages, "pagination truncated at page ceiling");
        Ok(items)
    }

    /// Single-page fetch of a channel's blocks, default page size 12.
    pub async fn get_channel_contents(
        &self,
        slug: &str,
        opts: ChannelContentsOptions,
    ) -> Result<Vec<Block>> {
        if slug.trim().is_empty() {
            return Err(ArenaError::Validation(
                "channel slug is required to fetch contents",
            ));
        }
        let mut query = vec![
            ("per".to_string(), opts.per.to_string()),
            ("page".to_string(), opts.page.to_string()),
        ];
        query.extend(opts.extra);
        if opts.cache_bust && !query.iter().any(|(k, _)| k == CACHE_BUST_PARAM) {
            query.push(cache_bust_pair());
        }
        let endpoint = format!("channels/{}/contents", encode_segment(slug));
        let payload = self.get(ApiBase::V3, &endpoint, &query).await?;
        collect_entities(normalize_items(&payload))
    }

    pub async fn get_channel(&self, slug: &str) -> Result<Channel> {
        if slug.trim().is_empty() {
            return Err(ArenaError::Validation(
                "channel slug is required to fetch channel info",
            ));
        }
        let endpoint = format!("channels/{}", encode_segment(slug));
        let payload = self
            .get(ApiBase::V3, &endpoint, &[cache_bust_pair()])
            .await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Paginated list of a group's channels, filtered server-side to
    /// entity type "Channel".
    pub async fn get_group_channels(
        &self,
        group_slug: &str,
        opts: GroupChannelsOptions,
    ) -> Result<Vec<Channel>> {
        if group_slug.trim().is_empty() {
            return Err(ArenaError::Validation(
                "group slug is required to fetch group channels",
            ));
        }
        let endpoint = format!("groups/{}/contents", encode_segment(group_slug));
        let params = vec![("type".to_string(), "Channel".to_string()), cache_bust_pair()];
        let items = self
            .fetch_paginated(&endpoint, params, opts.per, opts.max_pages)
            .await?;
        collect_entities(items)
    }

    pub async fn get_group(&self, group_slug: &str) -> Result<Group> {
        if group_slug.trim().is_empty() {
            return Err(ArenaError::Validation(
                "group slug is required to fetch group info",
            ));
        }
        let endpoint = format!("groups/{}", encode_segment(group_slug));
        let payload = self
            .get(ApiBase::V3, &endpoint, &[cache_bust_pair()])
            .await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Paginated list of a group's contents with optional type/sort
    /// filters. Entities are heterogeneous, so they stay raw JSON.
    pub async fn get_group_contents(
        &self,
        group_slug: &str,
        opts: GroupContentsOptions,
    ) -> Result<Vec<Value>> {
        if group_slug.trim().is_empty() {
            return Err(ArenaError::Validation(
                "group slug is required to fetch group contents",
            ));
        }
        let endpoint = format!("groups/{}/contents", encode_segment(group_slug));
        let mut params = vec![cache_bust_pair()];
        if let Some(entity_type) = opts.entity_type {
            params.push(("type".to_string(), entity_type));
        }
        if let Some(sort) = opts.sort {
            params.push(("sort".to_string(), sort));
        }
        self.fetch_paginated(
            &endpoint,
            params,
            opts.per.unwrap_or(50),
            opts.max_pages.unwrap_or(10),
        )
        .await
    }

    /// All blocks across a group's channels: one single-page content fetch
    /// per channel, issued concurrently, flattened and sorted newest
    /// first. Any single fetch failing fails the whole operation.
    pub async fn get_group_blocks(
        &self,
        group_slug: &str,
        opts: GroupBlocksOptions,
    ) -> Result<Vec<GroupBlock>> {
        if group_slug.trim().is_empty() {
            return Err(ArenaError::Validation(
                "group slug is required to fetch group blocks",
            ));
        }
        let channels: Vec<Channel> = self
            .get_group_channels(
                group_slug,
                GroupChannelsOptions {
                    per: opts.channel_per,
                    max_pages: opts.channel_max_pages,
                },
            )
            .await?
            .into_iter()
            .filter(|ch| ch.slug.as_deref().is_some_and(|s| !s.is_empty()))
            .collect();
        if channels.is_empty() {
            return Ok(Vec::new());
        }

        let fetches = channels.iter().map(|channel| {
            let slug = channel.slug.clone().unwrap_or_default();
            let contents_opts = ChannelContentsOptions {
                per: opts.block_per,
                page: opts.block_page,
                ..Default::default()
            };
            async move { self.get_channel_contents(&slug, contents_opts).await }
        });
        let results = join_all(fetches).await;

        let mut blocks = Vec::new();
        for (channel, result) in channels.iter().zip(results) {
            for block in result? {
                blocks.push(GroupBlock {
                    block,
                    channel: opts.include_channel_meta.then(|| channel.clone()),
                });
            }
        }
        blocks.sort_by_key(|gb| Reverse(gb.block.created_millis()));
        Ok(blocks)
    }

    pub async fn create_channel(
        &self,
        title: &str,
        opts: CreateChannelOptions,
    ) -> Result<Channel> {
        if title.trim().is_empty() {
            return Err(ArenaError::Validation("channel title is required"));
        }
        let mut body = Map::new();
        body.insert("title".into(), json!(title));
        body.insert("visibility".into(), json!(opts.visibility));
        let group_id = match opts.group {
            ChannelGroup::Default => self.default_group_id,
            ChannelGroup::None => None,
            ChannelGroup::Id(id) => Some(id),
        };
        if let Some(id) = group_id {
            body.insert("group_id".into(), json!(id));
        }
        let payload = self.post("channels", &Value::Object(body)).await?;
        Ok(serde_json::from_value(payload)?)
    }

    pub async fn create_block(
        &self,
        channel_id: i64,
        value: &str,
        title: Option<&str>,
    ) -> Result<Block> {
        if channel_id <= 0 {
            return Err(ArenaError::Validation(
                "channel id is required to create a block",
            ));
        }
        if value.is_empty() {
            return Err(ArenaError::Validation("block value is required"));
        }
        let mut body = Map::new();
        body.insert("value".into(), json!(value));
        body.insert("channel_ids".into(), json!([channel_id]));
        if let Some(title) = title {
            body.insert("title".into(), json!(title));
        }
        let payload = self.post("blocks", &Value::Object(body)).await?;
        Ok(serde_json::from_value(payload)?)
    }

    pub async fn update_block(&self, block_id: i64, patch: BlockPatch) -> Result<Block> {
        if block_id <= 0 {
            return Err(ArenaError::Validation(
                "block id is required to update a block",
            ));
        }
        let mut body = Map::new();
        if let Some(content) = patch.content {
            body.insert("content".into(), json!(content));
        }
        if let Some(title) = patch.title {
            body.insert("title".into(), json!(title));
        }
        if let Some(description) = patch.description {
            body.insert("description".into(), json!(description));
        }
        let endpoint = format!("blocks/{}", block_id);
        let payload = self.put(&endpoint, &Value::Object(body)).await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Time-limited signed upload policy from the legacy v2 endpoint.
    pub async fn get_upload_policy(&self) -> Result<UploadPolicy> {
        let payload = self.get(ApiBase::V2, "uploads/policy", &[]).await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Upload a local file to object storage via the signed policy and
    /// return its public URL.
    pub async fn upload_file(&self, path: &Path) -> Result<String> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(ArenaError::Validation("file has no usable name"))?
            .to_string();
        let bytes = fs::read(path).await?;

        let policy = self.get_upload_policy().await?;
        let key = policy
            .key
            .replace(":uuid", &Uuid::new_v4().to_string())
            .replace("${filename}", &file_name);
        let content_type = content_type_for(path);

        let fields = vec![
            ("key".to_string(), key.clone()),
            ("AWSAccessKeyId".to_string(), policy.aws_access_key_id),
            ("acl".to_string(), policy.acl),
            (
                "success_action_status".to_string(),
                policy.success_action_status,
            ),
            ("policy".to_string(), policy.policy),
            ("signature".to_string(), policy.signature),
            ("Content-Type".to_string(), content_type.to_string()),
        ];
        let form = UploadForm {
            fields,
            file_name: file_name.clone(),
            content_type: content_type.to_string(),
            bytes,
        };

        let res = self.transport.submit_form(&policy.bucket, form).await?;
        if !(200..300).contains(&res.status) {
            return Err(ArenaError::Upload { status: res.status });
        }
        info!(file = %file_name, "uploaded file to storage");

        static LOCATION_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"<Location>(.*?)</Location>").expect("valid regex"));
        if let Some(caps) = LOCATION_RE.captures(&res.body) {
            return Ok(percent_decode(&caps[1]));
        }
        Ok(format!("{}{}", policy.bucket, key))
    }
}

fn cache_bust_pair() -> (String, String) {
    (
        CACHE_BUST_PARAM.to_string(),
        Utc::now().timestamp_millis().to_string(),
    )
}

fn collect_entities<E: serde::de::DeserializeOwned>(items: Vec<Value>) -> Result<Vec<E>> {
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(ArenaError::from))
        .collect()
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_ascii_lowercase())
    {
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "gif" => "image/gif",
        Some(ext) if ext == "webp" => "image/webp",
        Some(ext) if ext == "svg" => "image/svg+xml",
        Some(ext) if ext == "mp4" => "video/mp4",
        Some(ext) if ext == "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// Percent-encode one path segment (slugs come from user input).
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Decode the percent-encoded URL inside the storage `<Location>` element.
fn percent_decode(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 3 <= bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            if let Ok(value) = u8::from_str_radix(&encoded[i + 1..i + 3], 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_handles_bare_array() {
        let payload = json!([{ "id": 1 }, { "id": 2 }]);
        assert_eq!(normalize_items(&payload).len(), 2);
    }

    #[test]
    fn normalize_prefers_data_even_when_other_keys_present() {
        let payload = json!({ "data": [{ "id": 1 }], "channels": [{ "id": 9 }] });
        let items = normalize_items(&payload);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], 1);
    }

    #[test]
    fn normalize_non_array_data_is_empty() {
        let payload = json!({ "data": { "id": 1 } });
        assert!(normalize_items(&payload).is_empty());
    }

    #[test]
    fn normalize_skips_empty_wrappers() {
        let payload = json!({ "channels": [], "contents": [{ "id": 3 }] });
        let items = normalize_items(&payload);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], 3);
    }

    #[test]
    fn normalize_blocks_wrapper() {
        let payload = json!({ "blocks": [{ "id": 4 }] });
        assert_eq!(normalize_items(&payload).len(), 1);
    }

    #[test]
    fn normalize_unmatched_object_is_empty() {
        assert!(normalize_items(&json!({ "meta": {} })).is_empty());
        assert!(normalize_items(&json!("nope")).is_empty());
    }

    #[test]
    fn error_detail_joins_messages() {
        let body = json!({ "errors": [{ "message": "a" }, { "message": "b" }] });
        assert_eq!(extract_error_detail(&body), "a; b");
    }

    #[test]
    fn error_detail_falls_back_to_title() {
        assert_eq!(extract_error_detail(&json!({ "title": "Unauthorized" })), "Unauthorized");
        assert_eq!(extract_error_detail(&json!({})), "");
    }

    #[test]
    fn encode_segment_escapes_reserved_characters() {
        assert_eq!(encode_segment("my-slug_1.2~x"), "my-slug_1.2~x");
        assert_eq!(encode_segment("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn percent_decode_round_trips() {
        assert_eq!(
            percent_decode("https%3A%2F%2Fx%2Fimg%20name.png"),
            "https://x/img name.png"
        );
        assert_eq!(percent_decode("plain"), "plain");
        assert_eq!(percent_decode("bad%2"), "bad%2");
    }

    #[test]
    fn content_type_covers_common_extensions() {
        assert_eq!(content_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("a.png")), "image/png");
        assert_eq!(content_type_for(Path::new("a.bin")), "application/octet-stream");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }
}
