//! Composition of the client, synthesizer and cache into the operations
//! the site's pages call.
use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::arena::model::{Channel, GroupBlock};
use crate::arena::{
    ArenaClient, BlockPatch, ChannelContentsOptions, CreateChannelOptions, GroupBlocksOptions,
    GroupChannelsOptions, HttpTransport, Transport,
};
use crate::cache::ProjectsCache;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::content::display_html;
use crate::project::{
    display_name, find_titled, image_url, is_project_channel, ordered_image_blocks, role_title,
    sort_projects, synthesize, Project,
};
use std::path::PathBuf;

const PROJECT_BLOCKS_PER: usize = 100;

/// Detail view of one project: every image block's URL (cover first) plus
/// the description resolved to HTML.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectView {
    pub display_name: String,
    pub description_html: String,
    pub image_urls: Vec<String>,
}

/// Input for the submission flow.
#[derive(Debug, Clone, Default)]
pub struct ProjectDraft {
    pub name: String,
    pub description: Option<String>,
    pub cover: Option<PathBuf>,
    pub images: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct OrderEntry {
    pub channel_slug: String,
    pub order: i64,
}

/// Per-entry outcome of a reorder save. Failed entries name their error so
/// the caller can retry exactly those; succeeded writes are not rolled
/// back when a sibling fails.
#[derive(Debug)]
pub struct OrderSaveOutcome {
    pub channel_slug: String,
    pub result: std::result::Result<(), String>,
}

#[derive(Debug, Default)]
pub struct OrderSaveReport {
    pub outcomes: Vec<OrderSaveOutcome>,
}

impl OrderSaveReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn any_succeeded(&self) -> bool {
        self.outcomes.iter().any(|o| o.result.is_ok())
    }
}

pub struct Site<T: Transport = HttpTransport> {
    client: ArenaClient<T>,
    cache: ProjectsCache,
    group_slug: String,
}

impl Site<HttpTransport> {
    pub fn new(cfg: &Config) -> Self {
        Self::with_client(
            ArenaClient::new(cfg.token(), cfg.arena.group_id),
            ProjectsCache::new(cfg.cache_ttl()),
            cfg.arena.group_slug.clone(),
        )
    }
}

impl<T: Transport> Site<T> {
    pub fn with_client(client: ArenaClient<T>, cache: ProjectsCache, group_slug: String) -> Self {
        Self {
            client,
            cache,
            group_slug,
        }
    }

    pub fn cache(&self) -> &ProjectsCache {
        &self.cache
    }

    async fn project_channels(&self) -> Result<Vec<Channel>> {
        let channels = self
            .client
            .get_group_channels(
                &self.group_slug,
                GroupChannelsOptions {
                    per: 100,
                    max_pages: 5,
                },
            )
            .await
            .context("failed to list group channels")?;
        Ok(channels.into_iter().filter(is_project_channel).collect())
    }

    /// The presentable project list: cache read-through, then one
    /// concurrent content fetch per project channel, synthesis, cover
    /// filter and sort. Returns `None` when the token was cancelled
    /// mid-flight; a cancelled load never touches the cache.
    #[instrument(skip_all)]
    pub async fn load_projects(&self, token: &CancelToken) -> Result<Option<Vec<Project>>> {
        if let Some(cached) = self.cache.get() {
            return Ok(Some(cached));
        }

        let channels = self.project_channels().await?;
        if token.is_cancelled() {
            return Ok(None);
        }

        let fetches = channels.iter().map(|channel| {
            let slug = channel.slug.clone().unwrap_or_default();
            async move {
                self.client
                    .get_channel_contents(
                        &slug,
                        ChannelContentsOptions {
                            per: PROJECT_BLOCKS_PER,
                            ..Default::default()
                        },
                    )
                    .await
            }
        });
        let results = join_all(fetches).await;
        if token.is_cancelled() {
            return Ok(None);
        }

        let mut projects = Vec::new();
        for (channel, result) in channels.iter().zip(results) {
            let blocks = result.with_context(|| {
                format!(
                    "failed to fetch contents of channel {:?}",
                    channel.slug.as_deref().unwrap_or("")
                )
            })?;
            let project = synthesize(channel, &blocks);
            // A channel without a resolvable cover is not presentable.
            if project.cover_image.is_some() {
                projects.push(project);
            }
        }
        sort_projects(&mut projects);

        self.cache.set(projects.clone());
        info!(count = projects.len(), "synthesized project list");
        Ok(Some(projects))
    }

    /// About text as display HTML. An absent About channel or block yields
    /// an empty string, not an error.
    #[instrument(skip_all)]
    pub async fn about_html(&self, token: &CancelToken) -> Result<Option<String>> {
        let channels = self
            .client
            .get_group_channels(
                &self.group_slug,
                GroupChannelsOptions {
                    per: 100,
                    max_pages: 5,
                },
            )
            .await
            .context("failed to list group channels")?;
        if token.is_cancelled() {
            return Ok(None);
        }

        let Some(about) = channels
            .into_iter()
            .find(|ch| ch.title_or_slug().eq_ignore_ascii_case("about"))
        else {
            return Ok(Some(String::new()));
        };
        let slug = about.slug.clone().unwrap_or_default();

        let blocks = self
            .client
            .get_channel_contents(
                &slug,
                ChannelContentsOptions {
                    per: PROJECT_BLOCKS_PER,
                    ..Default::default()
                },
            )
            .await
            .context("failed to fetch about channel contents")?;
        if token.is_cancelled() {
            return Ok(None);
        }

        // The about block is matched on its exact (trimmed) title.
        let text = blocks
            .iter()
            .find(|b| {
                b.title
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .or(b.generated_title.as_deref())
                    .unwrap_or("")
                    .trim()
                    == "About Text"
            })
            .map(display_html)
            .unwrap_or_default();
        Ok(Some(text))
    }

    /// Every tag used across project channels, de-duplicated and sorted
    /// case-insensitively. A non-critical enrichment: any failure degrades
    /// to an empty list instead of propagating.
    #[instrument(skip_all)]
    pub async fn collect_tags(&self, token: &CancelToken) -> Option<Vec<String>> {
        match self.try_collect_tags(token).await {
            Ok(result) => result,
            Err(err) => {
                warn!(%err, "tag collection failed");
                Some(Vec::new())
            }
        }
    }

    async fn try_collect_tags(&self, token: &CancelToken) -> Result<Option<Vec<String>>> {
        let channels = self.project_channels().await?;
        if token.is_cancelled() {
            return Ok(None);
        }

        let fetches = channels.iter().map(|channel| {
            let slug = channel.slug.clone().unwrap_or_default();
            async move {
                self.client
                    .get_channel_contents(
                        &slug,
                        ChannelContentsOptions {
                            per: PROJECT_BLOCKS_PER,
                            ..Default::default()
                        },
                    )
                    .await
            }
        });
        let results = join_all(fetches).await;
        if token.is_cancelled() {
            return Ok(None);
        }

        let mut tags: Vec<String> = Vec::new();
        for result in results {
            let blocks = result?;
            if let Some(tags_block) = find_titled(&blocks, "tags") {
                for tag in crate::project::split_tags(&crate::content::plain_text(tags_block)) {
                    if !tags.contains(&tag) {
                        tags.push(tag);
                    }
                }
            }
        }
        tags.sort_by_key(|t| t.to_lowercase());
        Ok(Some(tags))
    }

    /// Project channels for navigation. Informational only: failures log
    /// and degrade to an empty list.
    pub async fn list_project_channels(&self) -> Vec<Channel> {
        match self.project_channels().await {
            Ok(channels) => channels,
            Err(err) => {
                warn!(%err, "failed to list project channels");
                Vec::new()
            }
        }
    }

    /// Most recent blocks across the whole group, newest first, each with
    /// its parent channel attached.
    pub async fn group_feed(&self, limit: usize) -> Result<Vec<GroupBlock>> {
        let mut blocks = self
            .client
            .get_group_blocks(
                &self.group_slug,
                GroupBlocksOptions {
                    include_channel_meta: true,
                    ..Default::default()
                },
            )
            .await
            .context("failed to fetch group blocks")?;
        blocks.truncate(limit);
        Ok(blocks)
    }

    /// One project's detail view: channel metadata and contents fetched
    /// jointly, images ordered cover-first, description resolved to HTML.
    #[instrument(skip_all, fields(slug = %slug))]
    pub async fn project_detail(
        &self,
        slug: &str,
        token: &CancelToken,
    ) -> Result<Option<ProjectView>> {
        let (channel, blocks) = futures::try_join!(
            self.client.get_channel(slug),
            self.client.get_channel_contents(
                slug,
                ChannelContentsOptions {
                    per: PROJECT_BLOCKS_PER,
                    ..Default::default()
                },
            )
        )
        .with_context(|| format!("failed to fetch project {:?}", slug))?;
        if token.is_cancelled() {
            return Ok(None);
        }

        let name = {
            let derived = display_name(&channel);
            if derived.is_empty() {
                slug.to_string()
            } else {
                derived
            }
        };
        let description_html = find_titled(&blocks, "description")
            .map(display_html)
            .unwrap_or_default();
        let image_urls = ordered_image_blocks(&blocks)
            .into_iter()
            .filter_map(image_url)
            .collect();

        Ok(Some(ProjectView {
            display_name: name,
            description_html,
            image_urls,
        }))
    }

    /// Submission flow: create the channel, then the optional description
    /// block, then upload cover and images and attach one block each.
    /// Sequential; a failure mid-way leaves earlier blocks in place.
    #[instrument(skip_all, fields(name = %draft.name))]
    pub async fn submit_project(&self, draft: &ProjectDraft) -> Result<Channel> {
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(anyhow!("project name is required"));
        }
        let title = format!("Project / {}", name);

        info!(%title, "creating channel");
        let channel = self
            .client
            .create_channel(&title, CreateChannelOptions::default())
            .await
            .context("failed to create channel")?;
        let channel_id = channel
            .id
            .ok_or_else(|| anyhow!("created channel carries no id"))?;

        if let Some(description) = draft
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
        {
            info!("adding description block");
            self.client
                .create_block(channel_id, description, Some("Description"))
                .await
                .context("failed to create description block")?;
        }

        if let Some(cover) = &draft.cover {
            info!(path = %cover.display(), "uploading cover image");
            let url = self
                .client
                .upload_file(cover)
                .await
                .context("failed to upload cover image")?;
            self.client
                .create_block(channel_id, &url, Some("Cover"))
                .await
                .context("failed to create cover block")?;
        }

        for (index, image) in draft.images.iter().enumerate() {
            info!(current = index + 1, total = draft.images.len(), "uploading image");
            let url = self
                .client
                .upload_file(image)
                .await
                .with_context(|| format!("failed to upload {}", image.display()))?;
            self.client
                .create_block(channel_id, &url, None)
                .await
                .context("failed to create image block")?;
        }

        self.cache.invalidate();
        Ok(channel)
    }

    /// Persist explicit ordering: per entry, update the existing Order
    /// block or create one. Entries run concurrently; the report lists
    /// which succeeded and which failed. Nothing is rolled back.
    #[instrument(skip_all)]
    pub async fn save_order(&self, entries: &[OrderEntry]) -> OrderSaveReport {
        let tasks = entries.iter().map(|entry| async move {
            let result = self.apply_order(entry).await;
            if let Err(err) = &result {
                warn!(slug = %entry.channel_slug, %err, "order save failed for entry");
            }
            OrderSaveOutcome {
                channel_slug: entry.channel_slug.clone(),
                result: result.map_err(|e| format!("{:#}", e)),
            }
        });
        let report = OrderSaveReport {
            outcomes: join_all(tasks).await,
        };
        if report.any_succeeded() {
            self.cache.invalidate();
        }
        report
    }

    async fn apply_order(&self, entry: &OrderEntry) -> Result<()> {
        let blocks = self
            .client
            .get_channel_contents(
                &entry.channel_slug,
                ChannelContentsOptions {
                    per: PROJECT_BLOCKS_PER,
                    ..Default::default()
                },
            )
            .await?;

        if let Some(order_block) = blocks.iter().find(|b| role_title(b) == "order") {
            let block_id = order_block
                .id
                .ok_or_else(|| anyhow!("order block carries no id"))?;
            self.client
                .update_block(
                    block_id,
                    BlockPatch {
                        content: Some(entry.order.to_string()),
                        ..Default::default()
                    },
                )
                .await?;
        } else {
            let channel = self.client.get_channel(&entry.channel_slug).await?;
            let channel_id = channel
                .id
                .ok_or_else(|| anyhow!("channel carries no id"))?;
            self.client
                .create_block(channel_id, &entry.order.to_string(), Some("Order"))
                .await?;
        }
        Ok(())
    }
}
