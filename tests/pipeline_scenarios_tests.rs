//! End-to-end harvest runs against a scripted backend
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use artist_harvester_lib::crawling::mock_transport::{ScriptedReply, ScriptedTransport};
use artist_harvester_lib::crawling::{Harvester, RunSummary};
use artist_harvester_lib::domain::Seed;
use artist_harvester_lib::infrastructure::HarvestConfig;
use artist_harvester_lib::infrastructure::config::CursorMode;
use rstest::rstest;
use serde_json::{Value, json};
use tempfile::TempDir;

const API: &str = "https://api-v2.soundcloud.com";

fn test_config(dir: &TempDir) -> HarvestConfig {
    let mut config = HarvestConfig::default();
    config.backend.client_id = Some("test-client".into());
    config.backend.page_size = 10;
    config.crawl.max_items_per_seed = None;
    config.rate_limit.requests_per_second = 0;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 10;
    config.retry.jitter_ms = 0;
    config.export.output_path = dir.path().join("artists.json");
    config
}

fn user(id: u64) -> Value {
    json!({
        "id": id,
        "kind": "user",
        "username": format!("artist-{id}"),
        "permalink_url": format!("https://soundcloud.com/artist-{id}"),
        "followers_count": id * 10,
    })
}

fn page(ids: impl IntoIterator<Item = u64>, next: Option<String>) -> ScriptedReply {
    let collection: Vec<Value> = ids.into_iter().map(user).collect();
    ScriptedReply::json(200, json!({ "collection": collection, "next_href": next }))
}

fn next(path: &str) -> Option<String> {
    Some(format!("{API}{path}"))
}

async fn run(config: HarvestConfig, transport: Arc<ScriptedTransport>, seeds: Vec<Seed>) -> RunSummary {
    Harvester::new(config, transport).run(seeds).await.unwrap()
}

fn output(path: &Path) -> Vec<Value> {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn ids(entries: &[Value]) -> Vec<u64> {
    entries.iter().map(|e| e["id"].as_u64().unwrap()).collect()
}

#[tokio::test]
async fn keyword_listing_is_harvested_in_backend_order() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.on("q=lofi", vec![page(1..=10, next("/search/users/page-2"))]);
    transport.on("/page-2", vec![page(11..=20, None)]);

    let config = test_config(&dir);
    let out = config.export.output_path.clone();
    let summary = run(config, transport.clone(), vec![Seed::Keyword("lofi".into())]).await;

    assert_eq!(summary.records_emitted, 20);
    assert_eq!(summary.pages_fetched, 2);
    assert_eq!(ids(&output(&out)), (1..=20).collect::<Vec<_>>());
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn rate_limited_first_attempt_is_retried() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.on(
        "q=lofi",
        vec![ScriptedReply::status(429), page(1..=5, None)],
    );

    let config = test_config(&dir);
    let out = config.export.output_path.clone();
    let summary = run(config, transport, vec![Seed::Keyword("lofi".into())]).await;

    assert_eq!(ids(&output(&out)), vec![1, 2, 3, 4, 5]);
    assert_eq!(summary.requests.attempts, 2);
    assert_eq!(summary.requests.failed_attempts, 1);
    assert_eq!(summary.rate_limit_permits, 2);
}

#[tokio::test]
async fn id_seen_from_two_seeds_is_written_once() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.on("q=lofi", vec![page([7, 8], None)]);
    transport.on("/users/7", vec![ScriptedReply::json(200, user(7))]);

    let config = test_config(&dir);
    let out = config.export.output_path.clone();
    let summary = run(
        config,
        transport,
        vec![Seed::Keyword("lofi".into()), Seed::ProfileId(7)],
    )
    .await;

    let written = ids(&output(&out));
    assert_eq!(written.iter().filter(|&&id| id == 7).count(), 1);
    assert_eq!(written.len(), 2);
    assert_eq!(summary.duplicates_skipped, 1);
}

#[rstest]
#[case(1, 1)]
#[case(12, 2)]
#[case(20, 2)]
#[case(25, 3)]
#[tokio::test]
async fn per_seed_cap_yields_exactly_that_many(#[case] max_items: u32, #[case] pages: u64) {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.on("q=deep", vec![page(1..=10, next("/p2"))]);
    transport.on("/p2", vec![page(11..=20, next("/p3"))]);
    transport.on("/p3", vec![page(21..=30, None)]);

    let mut config = test_config(&dir);
    config.crawl.max_items_per_seed = Some(max_items);
    let out = config.export.output_path.clone();
    let summary = run(config, transport, vec![Seed::Keyword("deep".into())]).await;

    assert_eq!(output(&out).len(), max_items as usize);
    assert_eq!(summary.pages_fetched, pages);
    assert_eq!(summary.seeds[0].stop_reason, "max_items");
}

#[tokio::test]
async fn fatal_seed_does_not_disturb_its_sibling() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.on("/users/404", vec![ScriptedReply::status(404)]);
    transport.on("q=ambient", vec![page(1..=3, None)]);

    let mut config = test_config(&dir);
    config.crawl.concurrency = 2;
    let out = config.export.output_path.clone();
    let summary = run(
        config,
        transport,
        vec![Seed::ProfileId(404), Seed::Keyword("ambient".into())],
    )
    .await;

    assert_eq!(ids(&output(&out)), vec![1, 2, 3]);
    assert_eq!(summary.seeds_failed, 1);
    assert!(!summary.aborted);
    let failed = &summary.seeds[0];
    assert_eq!(failed.stop_reason, "failed:request_fatal");
    assert!(failed.error.as_deref().unwrap().contains("404"));
    assert!(summary.seeds[1].error.is_none());
}

#[tokio::test]
async fn repeating_cursor_bounds_the_fetch_count() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.on("q=loop", vec![page(1..=10, next("/loop-a"))]);
    transport.on("/loop-a", vec![page(11..=20, next("/loop-b"))]);
    // page three points back at page two's cursor
    transport.on("/loop-b", vec![page(21..=30, next("/loop-a"))]);

    let config = test_config(&dir);
    let summary = run(config, transport.clone(), vec![Seed::Keyword("loop".into())]).await;

    assert_eq!(transport.call_count(), 3);
    assert_eq!(summary.records_emitted, 30);
    assert_eq!(summary.seeds[0].stop_reason, "repeated_cursor");
}

#[tokio::test]
async fn overlapping_concurrent_seeds_never_duplicate_ids() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    let keywords = ["a", "b", "c", "d", "e", "f"];
    for (i, keyword) in keywords.iter().enumerate() {
        let start = i as u64 * 5;
        transport.on(format!("q={keyword}&"), vec![page(start..start + 15, None)]);
    }

    let mut config = test_config(&dir);
    config.crawl.concurrency = 4;
    let out = config.export.output_path.clone();
    let seeds = keywords.iter().map(|k| Seed::Keyword((*k).to_string())).collect();
    let summary = run(config, transport, seeds).await;

    let written = ids(&output(&out));
    let unique: HashSet<_> = written.iter().copied().collect();
    assert_eq!(unique.len(), written.len());
    assert_eq!(unique, (0..40).collect::<HashSet<_>>());
    assert_eq!(summary.records_emitted + summary.duplicates_skipped, 90);
}

#[tokio::test]
async fn every_output_entry_has_the_full_field_set() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.on(
        "q=sparse",
        vec![ScriptedReply::json(
            200,
            json!({
                "collection": [
                    {"id": 1, "kind": "user"},
                    {"id": 2, "kind": "user", "followers_count": -3, "badges": {"pro": true}},
                    {"kind": "user", "username": "no id"},
                    {"id": 4, "kind": "playlist"}
                ],
                "next_href": null
            }),
        )],
    );

    let config = test_config(&dir);
    let out = config.export.output_path.clone();
    let summary = run(config, transport, vec![Seed::Keyword("sparse".into())]).await;

    let entries = output(&out);
    assert_eq!(ids(&entries), vec![1, 2]);
    assert_eq!(summary.normalization_errors, 1);
    for entry in &entries {
        for field in [
            "followers_count", "followings_count", "likes_count",
            "playlist_count", "reposts_count", "track_count",
        ] {
            assert!(entry[field].as_u64().is_some(), "{field} must be a non-negative number");
        }
        for badge in ["pro", "pro_unlimited", "verified"] {
            assert!(entry["badges"][badge].is_boolean());
        }
        assert!(entry["city"].is_null());
        assert!(entry["visuals"].is_array());
    }
    assert_eq!(entries[1]["badges"]["pro"], json!(true));
    assert_eq!(entries[1]["followers_count"], json!(0));
}

#[tokio::test]
async fn profile_pages_without_client_id_use_hydration() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    let html = format!(
        "<html><script>window.__sc_hydration = [{{\"hydratable\":\"user\",\"data\":{}}}];</script></html>",
        user(99)
    );
    transport.on("soundcloud.com/artist-99", vec![ScriptedReply::body(200, html)]);

    let mut config = test_config(&dir);
    config.backend.client_id = None;
    let out = config.export.output_path.clone();
    run(config, transport.clone(), vec![Seed::ProfileUrl("/artist-99".into())]).await;

    let entries = output(&out);
    assert_eq!(ids(&entries), vec![99]);
    assert_eq!(entries[0]["username"], json!("artist-99"));
    assert_eq!(transport.calls()[0].url, "https://soundcloud.com/artist-99");
}

#[tokio::test]
async fn blocked_proxy_does_not_fail_the_seed() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.on("/users/7", vec![ScriptedReply::status(403), ScriptedReply::json(200, user(7))]);

    let mut config = test_config(&dir);
    config.network.proxies = vec!["http://p0:1".into(), "http://p1:1".into()];
    config.network.proxy_rng_seed = Some(1);
    let out = config.export.output_path.clone();
    let summary = run(config, transport.clone(), vec![Seed::ProfileId(7)]).await;

    assert_eq!(ids(&output(&out)), vec![7]);
    assert_eq!(summary.seeds_failed, 0);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn sparse_public_search_is_completed_from_creator_links() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    let search = format!(
        "<script>window.__sc_hydration = [{{\"hydratable\":\"search\",\"data\":{{\"collection\":[{}]}}}}];</script>\
         <div><a href=\"/artist-1\">1</a><a href=\"/artist-2\">2</a><a href=\"/artist-3\">3</a></div>",
        user(1)
    );
    transport.on("search/people", vec![ScriptedReply::body(200, search)]);
    for id in [2, 3] {
        let page = format!(
            "<script>window.__sc_hydration = [{{\"hydratable\":\"user\",\"data\":{}}}];</script>",
            user(id)
        );
        transport.on(format!("soundcloud.com/artist-{id}"), vec![ScriptedReply::body(200, page)]);
    }

    let mut config = test_config(&dir);
    config.backend.client_id = None;
    config.backend.cursor_mode = CursorMode::Offset;
    config.crawl.max_items_per_seed = Some(20);
    let out = config.export.output_path.clone();
    let summary = run(config, transport.clone(), vec![Seed::Keyword("lofi".into())]).await;

    assert_eq!(ids(&output(&out)), vec![1, 2, 3]);
    assert_eq!(summary.seeds[0].stop_reason, "exhausted");
    assert_eq!(transport.calls_matching("search/people"), 1);
    assert_eq!(transport.calls_matching("artist-1"), 0);
}
