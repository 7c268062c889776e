//! Integration tests for rule-based extraction
//!
//! These tests load configuration files from disk and run pages through
//! the public extraction API, including stored scripts.

use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use sumi_trawl::config::{load_config, load_config_with_hash, parse_config_str, ConfigFormat};
use sumi_trawl::extract::{Extractor, PageDescriptor};
use sumi_trawl::script::ScriptRunner;
use sumi_trawl::storage::{ScriptStore, SqliteStorage};
use sumi_trawl::ConfigError;
use tempfile::NamedTempFile;

const ARTICLE_LIST: &str = r#"<html>
<head><title>News</title><script>var tracking = 1;</script></head>
<body>
  <div class="story"><h2>  First   story </h2><a href="/s/1">more</a><span class="tag">a</span><span class="tag">b</span></div>
  <div class="story"><h2>Second story</h2><a href="/s/2">more</a></div>
  <div class="story"><h2>Third story</h2><a href="/s/3">more</a></div>
  <div class="story"><h2>Fourth story</h2><a href="/s/1">more</a></div>
</body>
</html>"#;

fn config_file(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn html_page(url: &str, body: &str) -> PageDescriptor {
    let mut page = PageDescriptor::new("s1", url, body);
    page.mime_type = Some("text/html".to_string());
    page.http_status_code = 200;
    page
}

fn extractor_for(targets: Value) -> Extractor {
    let config = parse_config_str(
        &json!({"urls": ["https://news.example/"], "target": targets}).to_string(),
        ConfigFormat::Json,
    )
    .unwrap();
    Extractor::from_config(&config, Arc::new(ScriptRunner::new())).unwrap()
}

#[test]
fn test_toml_config_end_to_end() {
    let file = config_file(
        ".toml",
        r#"
name = "news"
urls = ["https://news.example/"]
type = "article"

[[target]]
name = "front-page"
pattern = { url = "https://news\\.example/", mime_type = "text/html" }

[target.properties]
"title" = { text = "title" }
"[]story.headline" = { text = [".story", "h2"] }
"[]story.link" = { abs_url = [".story", "a"], args = ["href"], is_child_url = true }
"#,
    );

    let (config, hash) = load_config_with_hash(file.path()).unwrap();
    assert_eq!(hash.len(), 64);
    assert_eq!(config.doc_type.as_deref(), Some("article"));

    let extractor = Extractor::from_config(&config, Arc::new(ScriptRunner::new())).unwrap();
    let extraction = extractor
        .process(&html_page("https://news.example/", ARTICLE_LIST))
        .unwrap()
        .unwrap();

    assert_eq!(extraction.rule, "front-page");
    assert_eq!(extraction.documents.len(), 4);
    assert_eq!(extraction.documents[0]["story"]["headline"], "First story");
    assert_eq!(extraction.documents[3]["story"]["link"], "https://news.example/s/1");
    assert_eq!(extraction.documents[2]["position"], 2);
    assert_eq!(extraction.documents[2]["http_status_code"], 200);

    // Duplicate child URLs are reported once, in discovery order
    assert_eq!(
        extraction.child_urls,
        vec![
            "https://news.example/s/1",
            "https://news.example/s/2",
            "https://news.example/s/3"
        ]
    );

    let stamped = extraction.stamped_documents(chrono::Utc::now(), config.doc_type.as_deref());
    assert!(stamped.iter().all(|d| d["_type"] == "article"));
}

#[test]
fn test_json_config_keeps_property_order() {
    let file = config_file(
        ".json",
        r#"{
            "urls": ["https://news.example/"],
            "target": [{
                "pattern": {"url": ".*"},
                "properties": {"zeta": {"value": "z"}, "alpha": {"value": "a"}, "mid": {"value": "m"}}
            }]
        }"#,
    );

    let config = load_config(file.path()).unwrap();
    let extractor = Extractor::from_config(&config, Arc::new(ScriptRunner::new())).unwrap();
    let properties: Vec<&str> = extractor.rules()[0]
        .properties()
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();
    assert_eq!(properties, vec!["zeta", "alpha", "mid"]);
}

#[test]
fn test_missing_config_file() {
    let result = load_config(std::path::Path::new("/nonexistent/news.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
fn test_invalid_targets_are_dropped() {
    let extractor = extractor_for(json!([
        {"pattern": {"url": "(unclosed"}, "properties": {"t": {"text": "title"}}},
        {"pattern": {"url": ".*"}},
        {"name": "good", "pattern": {"url": ".*"}, "properties": {"t": {"text": "title"}}}
    ]));
    assert_eq!(extractor.rules().len(), 1);
    assert_eq!(extractor.rules()[0].name, "good");
}

#[test]
fn test_all_targets_invalid() {
    let config = parse_config_str(
        &json!({
            "urls": ["https://news.example/"],
            "target": [{"pattern": {"url": ".*"}, "properties": {"t": {"text": "div:eq(x"}}}]
        })
        .to_string(),
        ConfigFormat::Json,
    )
    .unwrap();
    let result = Extractor::from_config(&config, Arc::new(ScriptRunner::new()));
    assert!(matches!(result, Err(ConfigError::EmptyTargets)));
}

#[test]
fn test_positional_filters() {
    let extractor = extractor_for(json!([{
        "pattern": {"url": ".*"},
        "properties": {
            "after_first": {"text": ".story:gt(0) h2", "is_array": true},
            "first_two": {"text": ".story:lt(2) h2", "is_array": true},
            "second_tag": {"text": [".story:eq(0)", ".tag:eq(1)"]},
            "first_tags": {"text": ".story:eq(0) > span", "is_array": true}
        }
    }]));

    let doc = &extractor
        .process(&html_page("https://news.example/", ARTICLE_LIST))
        .unwrap()
        .unwrap()
        .documents[0];
    assert_eq!(
        doc["after_first"],
        json!(["Second story", "Third story", "Fourth story"])
    );
    assert_eq!(doc["first_two"], json!(["First story", "Second story"]));
    assert_eq!(doc["second_tag"], "b");
    assert_eq!(doc["first_tags"], json!(["a", "b"]));
}

#[test]
fn test_placeholders_keep_positions_aligned() {
    let extractor = extractor_for(json!([{
        "pattern": {"url": ".*"},
        "properties": {
            "[]headline": {"text": [".story", "h2"]},
            "[]first_tag": {"text": [".story", ".tag:eq(0)"]}
        }
    }]));

    let docs = extractor
        .process(&html_page("https://news.example/", ARTICLE_LIST))
        .unwrap()
        .unwrap()
        .documents;
    assert_eq!(docs.len(), 4);
    assert_eq!(docs[0]["first_tag"], "a");
    assert_eq!(docs[1]["first_tag"], Value::Null);
    assert_eq!(docs[3]["headline"], "Fourth story");
}

#[test]
fn test_raw_types_land_at_first_position() {
    let extractor = extractor_for(json!([{
        "pattern": {"url": ".*"},
        "properties": {
            "[]headline": {"text": [".story", "h2"]},
            "[]raw": {"type": "source"},
            "script_data": {"data": "head script"}
        }
    }]));

    let docs = extractor
        .process(&html_page("https://news.example/", ARTICLE_LIST))
        .unwrap()
        .unwrap()
        .documents;
    assert_eq!(docs.len(), 4);
    assert_eq!(docs[0]["raw"], ARTICLE_LIST);
    assert!(docs[1..].iter().all(|d| !d.contains_key("raw")));
    assert_eq!(docs[2]["script_data"], "var tracking = 1;");
}

#[test]
fn test_rule_matches_descriptor_fields() {
    let extractor = extractor_for(json!([
        {"name": "pdf", "pattern": {"mimeType": "application/pdf"}, "properties": {"file": {"type": "attachment"}}},
        {"name": "html", "pattern": {"url": ".*", "mime_type": "text/.*"}, "properties": {"t": {"text": "title"}}}
    ]));

    let mut pdf = PageDescriptor::new("s1", "https://news.example/a.pdf", vec![0x25, 0x50, 0x44, 0x46]);
    pdf.mime_type = Some("application/pdf".to_string());
    let extraction = extractor.process(&pdf).unwrap().unwrap();
    assert_eq!(extraction.rule, "pdf");
    assert_eq!(extraction.documents[0]["file"], "JVBERg==");

    let html = html_page("https://news.example/", ARTICLE_LIST);
    assert_eq!(extractor.process(&html).unwrap().unwrap().rule, "html");

    let mut image = PageDescriptor::new("s1", "https://news.example/a.png", vec![0x89]);
    image.mime_type = Some("image/png".to_string());
    assert!(extractor.process(&image).unwrap().is_none());
}

#[test]
fn test_indexed_script_from_store() {
    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    storage
        .put_script("shout", "lua", "return string.upper(value)")
        .unwrap();
    let scripts = Arc::new(ScriptRunner::new().with_store(storage));

    let config = parse_config_str(
        &json!({
            "urls": ["https://news.example/"],
            "target": [{
                "pattern": {"url": ".*"},
                "properties": {
                    "title": {"text": "title", "script": {"script_type": "indexed", "source": "shout"}},
                    "missing": {"text": "title", "script": {"script_type": "indexed", "source": "nope"}}
                }
            }]
        })
        .to_string(),
        ConfigFormat::Json,
    )
    .unwrap();
    let extractor = Extractor::from_config(&config, scripts).unwrap();

    let doc = &extractor
        .process(&html_page("https://news.example/", ARTICLE_LIST))
        .unwrap()
        .unwrap()
        .documents[0];
    assert_eq!(doc["title"], "NEWS");
    assert!(!doc.contains_key("missing"));
}

#[test]
fn test_malformed_body_fails_page() {
    let extractor = extractor_for(json!([{
        "pattern": {"url": ".*"},
        "properties": {"t": {"text": "title"}, "v": {"value": "x"}}
    }]));

    let page = PageDescriptor::new("s1", "https://news.example/", vec![0xc3, 0x28]);
    assert!(extractor.process(&page).is_err());

    let mut latin1 = PageDescriptor::new("s1", "https://news.example/", vec![b'<', b't', b'i', b't', b'l', b'e', b'>', 0xe9, b'<', b'/', b't', b'i', b't', b'l', b'e', b'>']);
    latin1.charset = Some("iso-8859-1".to_string());
    let doc = &extractor.process(&latin1).unwrap().unwrap().documents[0];
    assert_eq!(doc["v"], "x");
}
