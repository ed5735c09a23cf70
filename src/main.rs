use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use arena_folio::cancel::CancelToken;
use arena_folio::config;
use arena_folio::site::{OrderEntry, ProjectDraft, Site};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the presentable projects as JSON
    Projects,
    /// Print the about text as HTML
    About,
    /// List every tag used across project channels
    Tags,
    /// Recent blocks across the whole group, newest first
    Feed {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one project's detail view
    Show { slug: String },
    /// Create a project channel from local files
    Submit {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        cover: Option<PathBuf>,
        /// May be passed multiple times; each file becomes one block
        #[arg(long = "image")]
        images: Vec<PathBuf>,
    },
    /// Save explicit ordering, given as slug=order pairs
    Reorder { entries: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let site = Site::new(&cfg);
    let token = CancelToken::new();

    match args.command {
        Command::Projects => {
            let projects = site.load_projects(&token).await?.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&projects)?);
        }
        Command::About => {
            let html = site.about_html(&token).await?.unwrap_or_default();
            println!("{}", html);
        }
        Command::Tags => {
            for tag in site.collect_tags(&token).await.unwrap_or_default() {
                println!("{}", tag);
            }
        }
        Command::Feed { limit } => {
            let blocks = site.group_feed(limit).await?;
            println!("{}", serde_json::to_string_pretty(&blocks)?);
        }
        Command::Show { slug } => {
            let view = site
                .project_detail(&slug, &token)
                .await?
                .ok_or_else(|| anyhow!("fetch was cancelled"))?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::Submit {
            name,
            description,
            cover,
            images,
        } => {
            let draft = ProjectDraft {
                name,
                description,
                cover,
                images,
            };
            let channel = site.submit_project(&draft).await?;
            println!(
                "created {} ({})",
                channel.title.as_deref().unwrap_or(""),
                channel.slug.as_deref().unwrap_or("")
            );
        }
        Command::Reorder { entries } => {
            let entries = entries
                .iter()
                .map(|raw| parse_order_entry(raw))
                .collect::<Result<Vec<_>>>()?;
            if entries.is_empty() {
                bail!("no slug=order pairs given");
            }
            let report = site.save_order(&entries).await;
            for outcome in &report.outcomes {
                match &outcome.result {
                    Ok(()) => println!("{}: ok", outcome.channel_slug),
                    Err(err) => println!("{}: failed ({})", outcome.channel_slug, err),
                }
            }
            if !report.all_succeeded() {
                bail!("some entries failed; successful writes were kept");
            }
        }
    }

    Ok(())
}

fn parse_order_entry(raw: &str) -> Result<OrderEntry> {
    let (slug, order) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected slug=order, got {:?}", raw))?;
    Ok(OrderEntry {
        channel_slug: slug.trim().to_string(),
        order: order
            .trim()
            .parse()
            .map_err(|_| anyhow!("invalid order in {:?}", raw))?,
    })
}
