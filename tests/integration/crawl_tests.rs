//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and run complete
//! sessions against a temporary SQLite database.

use serde_json::{json, Value};
use std::sync::Arc;
use sumi_trawl::config::{parse_config_str, Config, ConfigFormat};
use sumi_trawl::crawler::run_crawl;
use sumi_trawl::state::AccessStatus;
use sumi_trawl::storage::{
    open_storage, AccessStore, DocumentStore, QueueStore, SessionStatus, SessionStore,
    SqliteStorage,
};
use tempfile::TempDir;
use wiremock::matchers::{header_exists, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CATALOG: &str = r#"<html><head><title>Catalog</title></head><body>
    <ul>
      <li><a href="/item/1">One</a></li>
      <li><a href="/item/2">Two</a></li>
      <li><a href="/item/3#reviews">Three</a></li>
    </ul>
</body></html>"#;

const LAST_MODIFIED: &str = "Wed, 01 May 2024 12:00:00 GMT";

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "text/html; charset=utf-8")
}

fn item_page() -> ResponseTemplate {
    html("<html><body><h1>An item</h1></body></html>")
}

/// Builds a configuration for the mock server with catalog and item rules
fn catalog_config(server: &MockServer, extra: Value) -> Config {
    let mut config = json!({
        "name": "catalog",
        "urls": [format!("{}/", server.uri())],
        "num_of_thread": 2,
        "interval": 0,
        "target": [
            {
                "name": "catalog",
                "pattern": {"url": ".*/"},
                "properties": {
                    "title": {"text": "title"},
                    "[]items.name": {"text": "ul li a"},
                    "[]items.link": {"abs_url": "ul li a", "args": "href", "is_child_url": true}
                }
            },
            {
                "name": "item",
                "pattern": {"url": ".*/item/\\d+"},
                "properties": {"name": {"text": "h1"}}
            }
        ]
    });
    merge(&mut config, extra);
    parse_config_str(&config.to_string(), ConfigFormat::Json).unwrap()
}

/// Builds a configuration that only reads the title of the seed page
fn title_config(server: &MockServer, extra: Value) -> Config {
    let mut config = json!({
        "urls": [format!("{}/", server.uri())],
        "num_of_thread": 1,
        "interval": 0,
        "target": [{"pattern": {"url": ".*"}, "properties": {"title": {"text": "title"}}}]
    });
    merge(&mut config, extra);
    parse_config_str(&config.to_string(), ConfigFormat::Json).unwrap()
}

fn merge(config: &mut Value, extra: Value) {
    if let (Some(config), Value::Object(extra)) = (config.as_object_mut(), extra) {
        for (key, value) in extra {
            config.insert(key, value);
        }
    }
}

fn temp_storage() -> (TempDir, Arc<SqliteStorage>) {
    let dir = tempfile::tempdir().unwrap();
    let storage = open_storage(&dir.path().join("trawl.db")).unwrap();
    (dir, Arc::new(storage))
}

async fn crawl(config: Config, storage: &Arc<SqliteStorage>, session_id: &str) {
    let summary = run_crawl(config, storage.clone(), Some(session_id.to_string()), "hash".into())
        .await
        .unwrap();
    assert_eq!(summary.session_id, session_id);
}

async fn mount_catalog(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(CATALOG))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/item/\d+$"))
        .respond_with(item_page())
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_crawl_expands_arrays_and_follows_children() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let (_dir, storage) = temp_storage();

    crawl(catalog_config(&server, json!({})), &storage, "s1").await;

    let root = format!("{}/", server.uri());
    let catalog_docs = storage.find_by_url("web", &root).unwrap();
    assert_eq!(catalog_docs.len(), 3);
    let names = ["One", "Two", "Three"];
    for doc in &catalog_docs {
        let position = doc.body["position"].as_u64().unwrap() as usize;
        assert_eq!(doc.body["title"], "Catalog");
        assert_eq!(doc.body["items"]["name"], names[position]);
        assert!(doc.body.contains_key("@timestamp"));
        assert_eq!(doc.session_id, "s1");
    }

    let item = format!("{}/item/3", server.uri());
    let item_docs = storage.find_by_url("web", &item).unwrap();
    assert_eq!(item_docs.len(), 1);
    assert_eq!(item_docs[0].body["name"], "An item");
    assert_eq!(item_docs[0].body["parent_url"], root.as_str());

    assert_eq!(storage.count_session_documents("web", "s1").unwrap(), 6);

    let records = storage.session_access_records("s1").unwrap();
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.status == AccessStatus::Processed));
    let item_record = records.iter().find(|r| r.url == item).unwrap();
    assert_eq!(item_record.rule.as_deref(), Some("item"));
    assert_eq!(item_record.document_count, 1);

    let session = storage.get_session("s1").unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.config_name, "catalog");
    assert_eq!(storage.count_queue_entries("s1").unwrap(), 0);
}

#[tokio::test]
async fn test_max_depth_stops_following() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let (_dir, storage) = temp_storage();

    crawl(catalog_config(&server, json!({"max_depth": 0})), &storage, "s1").await;

    let records = storage.session_access_records("s1").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(storage.count_session_documents("web", "s1").unwrap(), 3);
}

#[tokio::test]
async fn test_exclude_urls() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let (_dir, storage) = temp_storage();

    let config = catalog_config(&server, json!({"exclude_urls": [".*/item/[23]"]}));
    crawl(config, &storage, "s1").await;

    let urls: Vec<String> = storage
        .session_access_records("s1")
        .unwrap()
        .into_iter()
        .map(|r| r.url)
        .collect();
    assert_eq!(urls.len(), 2);
    assert!(urls.contains(&format!("{}/item/1", server.uri())));
}

#[tokio::test]
async fn test_max_access_count() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let (_dir, storage) = temp_storage();

    let config = catalog_config(&server, json!({"max_access_count": 2, "cleanup": false}));
    let summary = run_crawl(config, storage.clone(), Some("s1".into()), String::new())
        .await
        .unwrap();

    assert_eq!(summary.claimed, 2);
    assert_eq!(storage.session_access_records("s1").unwrap().len(), 2);
    assert_eq!(summary.pending, 2);
    assert_eq!(storage.count_queue_entries("s1").unwrap(), 2);
}

#[tokio::test]
async fn test_failed_fetch_drops_entry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(CATALOG))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/item/1"))
        .respond_with(item_page())
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/item/2"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    // /item/3 is unmatched and answers 404
    let (_dir, storage) = temp_storage();

    crawl(catalog_config(&server, json!({})), &storage, "s1").await;

    let records = storage.session_access_records("s1").unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(storage.get_session("s1").unwrap().status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_unmatched_page_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<html><title>Home</title></html>"))
        .mount(&server)
        .await;
    let (_dir, storage) = temp_storage();

    let config = title_config(
        &server,
        json!({"target": [{"pattern": {"url": ".*/nothing"}, "properties": {"t": {"text": "title"}}}]}),
    );
    crawl(config, &storage, "s1").await;

    let records = storage.session_access_records("s1").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AccessStatus::Skipped);
    assert_eq!(storage.count_documents("web").unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_utf8_fails_extraction() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![b'<', b'p', b'>', 0xff, 0xfe, b'<', b'/', b'p', b'>'])
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;
    let (_dir, storage) = temp_storage();

    crawl(title_config(&server, json!({})), &storage, "s1").await;

    let records = storage.session_access_records("s1").unwrap();
    assert_eq!(records[0].status, AccessStatus::ExtractionFailed);
    assert_eq!(storage.count_documents("web").unwrap(), 0);
}

#[tokio::test]
async fn test_overwrite_replaces_documents() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let root = format!("{}/", server.uri());

    let (_dir, storage) = temp_storage();
    let config = catalog_config(&server, json!({"max_depth": 0, "overwrite": true}));
    crawl(config.clone(), &storage, "s1").await;
    crawl(config, &storage, "s2").await;

    let docs = storage.find_by_url("web", &root).unwrap();
    assert_eq!(docs.len(), 3);
    assert!(docs.iter().all(|d| d.session_id == "s2"));
}

#[tokio::test]
async fn test_without_overwrite_documents_accumulate() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let root = format!("{}/", server.uri());

    let (_dir, storage) = temp_storage();
    let config = catalog_config(&server, json!({"max_depth": 0}));
    crawl(config.clone(), &storage, "s1").await;
    crawl(config, &storage, "s2").await;

    assert_eq!(storage.find_by_url("web", &root).unwrap().len(), 6);
}

#[tokio::test]
async fn test_incremental_not_modified_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<title>Home</title>").insert_header("last-modified", LAST_MODIFIED))
        .mount(&server)
        .await;
    let (_dir, storage) = temp_storage();
    let config = title_config(&server, json!({"incremental": true}));

    crawl(config.clone(), &storage, "s1").await;
    assert_eq!(storage.count_documents("web").unwrap(), 1);

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header_exists("if-modified-since"))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    crawl(config, &storage, "s2").await;

    let records = storage.session_access_records("s2").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AccessStatus::NotModified);
    assert_eq!(records[0].http_status_code, 304);
    assert!(records[0].last_modified.is_some());
    assert_eq!(storage.count_documents("web").unwrap(), 1);
}

#[tokio::test]
async fn test_incremental_unchanged_last_modified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<title>Home</title>").insert_header("last-modified", LAST_MODIFIED))
        .mount(&server)
        .await;
    let (_dir, storage) = temp_storage();
    let config = title_config(&server, json!({"incremental": true}));

    crawl(config.clone(), &storage, "s1").await;
    crawl(config, &storage, "s2").await;

    let records = storage.session_access_records("s2").unwrap();
    assert_eq!(records[0].status, AccessStatus::NotModified);
    assert_eq!(storage.count_documents("web").unwrap(), 1);
}

#[tokio::test]
async fn test_incremental_newer_page_is_extracted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<title>Home</title>").insert_header("last-modified", LAST_MODIFIED))
        .mount(&server)
        .await;
    let (_dir, storage) = temp_storage();
    let config = title_config(&server, json!({"incremental": true}));
    crawl(config.clone(), &storage, "s1").await;

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            html("<title>Home v2</title>")
                .insert_header("last-modified", "Thu, 02 May 2024 12:00:00 GMT"),
        )
        .mount(&server)
        .await;
    crawl(config, &storage, "s2").await;

    let records = storage.session_access_records("s2").unwrap();
    assert_eq!(records[0].status, AccessStatus::Processed);
    assert_eq!(storage.count_documents("web").unwrap(), 2);
}

#[tokio::test]
async fn test_session_hooks_run() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    let (dir, storage) = temp_storage();

    let script = dir.path().join("finish.lua");
    std::fs::write(&script, "log.info('finished ' .. session_id .. ' with ' .. documents)").unwrap();

    let config = title_config(
        &server,
        json!({"script": {"script_type": "file", "finish": script.to_string_lossy()}}),
    );
    let summary = run_crawl(config, storage, Some("s1".into()), String::new())
        .await
        .unwrap();
    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(summary.documents, 1);
}
