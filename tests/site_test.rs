use std::io::Write;
use std::time::Duration;

use reqwest::Method;
use serde_json::json;

use arena_folio::arena::ArenaClient;
use arena_folio::cache::ProjectsCache;
use arena_folio::cancel::CancelToken;
use arena_folio::site::{OrderEntry, ProjectDraft, Site};

mod common;
use common::FakeTransport;

const GROUP_ENDPOINT: &str = "groups/numan-studio/contents";

fn site(transport: FakeTransport) -> Site<FakeTransport> {
    Site::with_client(
        ArenaClient::with_transport(transport, Some(36176)),
        ProjectsCache::new(Duration::from_secs(300)),
        "numan-studio".to_string(),
    )
}

fn teapot_channel() -> serde_json::Value {
    json!({
        "id": 7,
        "slug": "teapot",
        "title": "Project / Teapot",
        "created_at": "2024-01-01T00:00:00Z"
    })
}

fn teapot_blocks() -> serde_json::Value {
    json!({ "contents": [
        { "id": 1, "title": "Cover", "image": { "medium": { "src": "https://x/img.png" } } },
        { "id": 2, "title": "Order", "content": "2" },
        { "id": 3, "title": "Tags", "content": "glaze, ceramic" }
    ] })
}

#[tokio::test]
async fn synthesizes_a_project_from_role_tagged_blocks() {
    let transport = FakeTransport::new();
    transport.respond(GROUP_ENDPOINT, json!({ "channels": [teapot_channel()] }));
    transport.respond("channels/teapot/contents", teapot_blocks());

    let site = site(transport);
    let projects = site
        .load_projects(&CancelToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(projects.len(), 1);
    let project = &projects[0];
    assert_eq!(project.display_name, "Teapot");
    assert_eq!(project.cover_image.as_deref(), Some("https://x/img.png"));
    assert_eq!(project.order, Some(2));
    assert_eq!(project.tags, vec!["glaze", "ceramic"]);
    assert_eq!(project.slug, "teapot");
}

#[tokio::test]
async fn coverless_channels_are_excluded_and_non_projects_never_fetched() {
    let transport = FakeTransport::new();
    transport.respond(
        GROUP_ENDPOINT,
        json!({ "channels": [
            teapot_channel(),
            { "id": 8, "slug": "vessel", "title": "Project / Vessel" },
            { "id": 9, "slug": "about", "title": "About" }
        ] }),
    );
    transport.respond("channels/teapot/contents", teapot_blocks());
    // Vessel has metadata but no cover block.
    transport.respond(
        "channels/vessel/contents",
        json!({ "contents": [
            { "id": 20, "title": "Order", "content": "1" },
            { "id": 21, "title": "Tags", "content": "wood" }
        ] }),
    );

    let site = site(transport.clone());
    let projects = site
        .load_projects(&CancelToken::new())
        .await
        .unwrap()
        .unwrap();

    let slugs: Vec<&str> = projects.iter().map(|p| p.slug.as_str()).collect();
    assert_eq!(slugs, vec!["teapot"]);
    assert!(transport.requests_for("channels/about/contents").is_empty());
}

#[tokio::test]
async fn second_load_within_window_is_served_from_cache() {
    let transport = FakeTransport::new();
    transport.respond(GROUP_ENDPOINT, json!({ "channels": [teapot_channel()] }));
    transport.respond("channels/teapot/contents", teapot_blocks());

    let site = site(transport.clone());
    let token = CancelToken::new();
    let first = site.load_projects(&token).await.unwrap().unwrap();
    let fetched = transport.request_count();

    let second = site.load_projects(&token).await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(transport.request_count(), fetched);
}

#[tokio::test]
async fn cancelled_load_discards_results_and_leaves_cache_untouched() {
    let transport = FakeTransport::new();
    transport.respond(GROUP_ENDPOINT, json!({ "channels": [teapot_channel()] }));

    let site = site(transport);
    let token = CancelToken::new();
    token.cancel();

    let result = site.load_projects(&token).await.unwrap();
    assert!(result.is_none());
    assert!(site.cache().get().is_none());
}

#[tokio::test]
async fn about_text_is_reflowed_into_paragraphs() {
    let transport = FakeTransport::new();
    transport.respond(
        GROUP_ENDPOINT,
        json!({ "channels": [
            teapot_channel(),
            { "id": 9, "slug": "about", "title": "About" }
        ] }),
    );
    transport.respond(
        "channels/about/contents",
        json!({ "contents": [
            { "id": 30, "title": "about text", "content": "wrong case, skipped" },
            { "id": 31, "title": "About Text", "content": "We are a studio.\n\nBased nowhere." }
        ] }),
    );

    let html = site(transport)
        .about_html(&CancelToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(html, "<p>We are a studio.</p><p>Based nowhere.</p>");
}

#[tokio::test]
async fn missing_about_channel_yields_empty_text() {
    let transport = FakeTransport::new();
    transport.respond(GROUP_ENDPOINT, json!({ "channels": [teapot_channel()] }));

    let html = site(transport)
        .about_html(&CancelToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(html, "");
}

#[tokio::test]
async fn tags_are_deduplicated_and_sorted_case_insensitively() {
    let transport = FakeTransport::new();
    transport.respond(
        GROUP_ENDPOINT,
        json!({ "channels": [
            { "id": 1, "slug": "a", "title": "Project / A" },
            { "id": 2, "slug": "b", "title": "Project / B" }
        ] }),
    );
    transport.respond(
        "channels/a/contents",
        json!({ "contents": [{ "id": 10, "title": "Tags", "content": "Brass, ash" }] }),
    );
    transport.respond(
        "channels/b/contents",
        json!({ "contents": [{ "id": 11, "title": "Tags", "content": "ash, ceramic" }] }),
    );

    let tags = site(transport)
        .collect_tags(&CancelToken::new())
        .await
        .unwrap();
    assert_eq!(tags, vec!["ash", "Brass", "ceramic"]);
}

#[tokio::test]
async fn tag_collection_degrades_to_empty_on_failure() {
    let transport = FakeTransport::new();
    transport.respond(
        GROUP_ENDPOINT,
        json!({ "channels": [{ "id": 1, "slug": "a", "title": "Project / A" }] }),
    );
    transport.respond_err("channels/a/contents", 500, "boom");

    let tags = site(transport)
        .collect_tags(&CancelToken::new())
        .await
        .unwrap();
    assert!(tags.is_empty());
}

#[tokio::test]
async fn project_detail_orders_images_cover_first() {
    let transport = FakeTransport::new();
    transport.respond("channels/teapot", teapot_channel());
    transport.respond(
        "channels/teapot/contents",
        json!({ "contents": [
            { "id": 1, "image": { "src": "first.png" } },
            { "id": 2, "title": "Cover", "image": { "large": { "src": "cover.png" } } },
            { "id": 3, "title": "Description", "content": "A teapot.\nHand built." }
        ] }),
    );

    let view = site(transport)
        .project_detail("teapot", &CancelToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(view.display_name, "Teapot");
    assert_eq!(view.image_urls, vec!["cover.png", "first.png"]);
    assert_eq!(view.description_html, "A teapot.<br>Hand built.");
}

#[tokio::test]
async fn group_feed_sorts_newest_first_and_attaches_channels() {
    let transport = FakeTransport::new();
    transport.respond(
        GROUP_ENDPOINT,
        json!({ "channels": [
            { "id": 1, "slug": "a", "title": "Project / A" },
            { "id": 2, "slug": "b", "title": "Project / B" }
        ] }),
    );
    transport.respond(
        "channels/a/contents",
        json!({ "contents": [
            { "id": 10, "created_at": "2024-01-01T00:00:00Z" },
            { "id": 11, "created_at": "2024-03-01T00:00:00Z" }
        ] }),
    );
    transport.respond(
        "channels/b/contents",
        json!({ "contents": [
            { "id": 12, "created_at": "2024-02-01T00:00:00Z" },
            { "id": 13 }
        ] }),
    );

    let feed = site(transport).group_feed(3).await.unwrap();
    let ids: Vec<Option<i64>> = feed.iter().map(|gb| gb.block.id).collect();
    // Newest first; the undated block sorts as epoch and falls off the limit.
    assert_eq!(ids, vec![Some(11), Some(12), Some(10)]);
    assert_eq!(
        feed[0].channel.as_ref().and_then(|c| c.slug.as_deref()),
        Some("a")
    );
}

#[tokio::test]
async fn submit_with_two_images_creates_exactly_two_untitled_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let img1 = dir.path().join("img1.png");
    let img2 = dir.path().join("img2.png");
    for path in [&img1, &img2] {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(b"not a real png").unwrap();
    }

    let policy = json!({
        "key": "uploads/:uuid/${filename}",
        "AWSAccessKeyId": "AK",
        "acl": "public-read",
        "success_action_status": "201",
        "policy": "pol",
        "signature": "sig",
        "bucket": "https://s3.example/bucket/"
    });

    let transport = FakeTransport::new();
    transport.respond(
        "channels",
        json!({ "id": 11, "slug": "project-x", "title": "Project / X" }),
    );
    transport.respond("uploads/policy", policy.clone());
    transport.respond("uploads/policy", policy);
    transport.respond_storage(
        201,
        "<PostResponse><Location>https%3A%2F%2Fs3.example%2Fbucket%2Fuploads%2Fabc%2Fimg1.png</Location></PostResponse>",
    );
    transport.respond_storage(201, "");
    transport.respond("blocks", json!({ "id": 100 }));
    transport.respond("blocks", json!({ "id": 101 }));

    let site = site(transport.clone());
    site.cache().set(Vec::new());

    let draft = ProjectDraft {
        name: "X".into(),
        description: None,
        cover: None,
        images: vec![img1, img2],
    };
    let channel = site.submit_project(&draft).await.unwrap();
    assert_eq!(channel.slug.as_deref(), Some("project-x"));

    let channel_posts = transport.requests_for("channels");
    assert_eq!(channel_posts.len(), 1);
    assert_eq!(channel_posts[0].method, Method::POST);
    let body = channel_posts[0].body.as_ref().unwrap();
    assert_eq!(body["title"], "Project / X");
    assert_eq!(body["group_id"], 36176);

    let block_posts = transport.requests_for("blocks");
    assert_eq!(block_posts.len(), 2, "no Cover or Description block");
    for post in &block_posts {
        let body = post.body.as_ref().unwrap();
        assert!(body.get("title").is_none(), "image blocks are untitled");
        assert_eq!(body["channel_ids"], json!([11]));
    }
    // First URL parsed from the storage Location, second rebuilt from the policy.
    assert_eq!(
        block_posts[0].body.as_ref().unwrap()["value"],
        "https://s3.example/bucket/uploads/abc/img1.png"
    );
    let second_value = block_posts[1].body.as_ref().unwrap()["value"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(second_value.starts_with("https://s3.example/bucket/uploads/"));
    assert!(second_value.ends_with("/img2.png"));
    assert!(!second_value.contains(":uuid"));

    let forms = transport.submitted_forms();
    assert_eq!(forms.len(), 2);
    assert_eq!(forms[0].0, "https://s3.example/bucket/");
    assert_eq!(forms[0].1.content_type, "image/png");
    assert!(forms[0]
        .1
        .fields
        .iter()
        .any(|(k, v)| k == "key" && v.ends_with("/img1.png") && !v.contains(":uuid")));

    // The write invalidated the cache.
    assert!(site.cache().get().is_none());
}

#[tokio::test]
async fn submit_requires_a_name() {
    let site = site(FakeTransport::new());
    let err = site
        .submit_project(&ProjectDraft {
            name: "   ".into(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("name is required"));
}

#[tokio::test]
async fn save_order_reports_per_entry_outcomes_without_rollback() {
    let transport = FakeTransport::new();
    // alpha has an Order block already; beta's fetch fails.
    transport.respond(
        "channels/alpha/contents",
        json!({ "contents": [{ "id": 42, "title": "Order", "content": "9" }] }),
    );
    transport.respond("blocks/42", json!({ "id": 42 }));
    transport.respond_err("channels/beta/contents", 500, "boom");

    let site = site(transport.clone());
    site.cache().set(Vec::new());

    let report = site
        .save_order(&[
            OrderEntry {
                channel_slug: "alpha".into(),
                order: 1,
            },
            OrderEntry {
                channel_slug: "beta".into(),
                order: 2,
            },
        ])
        .await;

    assert!(!report.all_succeeded());
    assert!(report.any_succeeded());
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].channel_slug, "alpha");
    assert!(report.outcomes[0].result.is_ok());
    assert_eq!(report.outcomes[1].channel_slug, "beta");
    assert!(report.outcomes[1].result.is_err());

    // The successful update went out as a partial PUT body.
    let puts = transport.requests_for("blocks/42");
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].method, Method::PUT);
    let body = puts[0].body.as_ref().unwrap();
    assert_eq!(body["content"], "1");
    assert!(body.get("title").is_none());

    // Any success invalidates the cache.
    assert!(site.cache().get().is_none());
}

#[tokio::test]
async fn save_order_creates_an_order_block_when_none_exists() {
    let transport = FakeTransport::new();
    transport.respond("channels/gamma/contents", json!({ "contents": [] }));
    transport.respond("channels/gamma", json!({ "id": 9, "slug": "gamma" }));
    transport.respond("blocks", json!({ "id": 200 }));

    let site = site(transport.clone());
    let report = site
        .save_order(&[OrderEntry {
            channel_slug: "gamma".into(),
            order: 3,
        }])
        .await;

    assert!(report.all_succeeded());
    let posts = transport.requests_for("blocks");
    assert_eq!(posts.len(), 1);
    let body = posts[0].body.as_ref().unwrap();
    assert_eq!(body["value"], "3");
    assert_eq!(body["title"], "Order");
    assert_eq!(body["channel_ids"], json!([9]));
}
