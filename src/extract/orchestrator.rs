//! Extraction orchestrator
//!
//! Runs one page through rule matching, property resolution, scripts,
//! path building and array expansion. Everything a page needs while it is
//! processed lives in a [`PageContext`] that is dropped with the page.

use crate::config::Config;
use crate::extract::descriptor::PageDescriptor;
use crate::extract::expand::{distinct, expand};
use crate::extract::path::{is_array_path, set_path, strip_array_marker};
use crate::extract::rule::{compile_rules, match_rule, ExtractionSpec, ScrapingRule, ValueType};
use crate::extract::selector::{collapse_whitespace, select_nodes, AccessContext};
use crate::extract::ExtractError;
use crate::script::ScriptRunner;
use crate::ConfigError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use scraper::Html;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Result of extracting one page
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Name of the matched rule
    pub rule: String,
    /// Output documents, without timestamp
    pub documents: Vec<Map<String, Value>>,
    /// Child URLs in discovery order, without duplicates
    pub child_urls: Vec<String>,
    /// Replace earlier documents of the same URL
    pub overwrite: bool,
}

impl Extraction {
    /// Documents ready for the index: `@timestamp` and, if set, `_type`
    pub fn stamped_documents(
        &self,
        now: DateTime<Utc>,
        doc_type: Option<&str>,
    ) -> Vec<Map<String, Value>> {
        let timestamp = Value::String(now.to_rfc3339());
        self.documents
            .iter()
            .map(|doc| {
                let mut doc = doc.clone();
                doc.insert("@timestamp".to_string(), timestamp.clone());
                if let Some(doc_type) = doc_type {
                    doc.insert("_type".to_string(), Value::String(doc_type.to_string()));
                }
                doc
            })
            .collect()
    }
}

/// A resolved property before shaping
enum Resolved {
    /// One value that is never split into positions
    Scalar(String),
    /// Per-node values, `None` for placeholders and failed accessors
    Cells(Vec<Option<String>>),
    /// No page value; the script alone produces the property
    ScriptOnly,
}

struct PageContext<'a> {
    page: &'a PageDescriptor,
    rule: &'a ScrapingRule,
    tree: Option<Html>,
    child_urls: Vec<String>,
    seen_child_urls: HashSet<String>,
}

impl PageContext<'_> {
    fn add_child_url(&mut self, url: &str) {
        let url = url.trim();
        if !url.is_empty() && self.seen_child_urls.insert(url.to_string()) {
            self.child_urls.push(url.to_string());
        }
    }

    fn collect_child_urls(&mut self, value: &Value) {
        match value {
            Value::String(s) => self.add_child_url(s),
            Value::Array(items) => {
                for item in items {
                    if let Value::String(s) = item {
                        self.add_child_url(s);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Extracts documents from fetched pages
pub struct Extractor {
    rules: Vec<ScrapingRule>,
    scripts: Arc<ScriptRunner>,
}

impl Extractor {
    pub fn new(rules: Vec<ScrapingRule>, scripts: Arc<ScriptRunner>) -> Self {
        Self { rules, scripts }
    }

    /// Compiles the configuration's targets into an extractor
    pub fn from_config(config: &Config, scripts: Arc<ScriptRunner>) -> Result<Self, ConfigError> {
        Ok(Self::new(compile_rules(config)?, scripts))
    }

    pub fn rules(&self) -> &[ScrapingRule] {
        &self.rules
    }

    /// Processes one page
    ///
    /// Returns `Ok(None)` if no rule matches. A body that cannot be turned
    /// into a tree fails the page; every other problem is logged and
    /// recovered within the affected property.
    pub fn process(&self, page: &PageDescriptor) -> Result<Option<Extraction>, ExtractError> {
        let rule = match match_rule(page, &self.rules) {
            Some(rule) => rule,
            None => {
                tracing::debug!("No scraping rule matches {}", page.url);
                return Ok(None);
            }
        };
        tracing::debug!("Rule {} matches {}", rule.name, page.url);

        let tree = if rule.settings.parse_html && rule.needs_tree() {
            Some(Html::parse_document(&page.decode_body()?))
        } else {
            None
        };

        let mut ctx = PageContext {
            page,
            rule,
            tree,
            child_urls: Vec::new(),
            seen_child_urls: HashSet::new(),
        };

        let mut scalar = page.seed_record();
        let mut arrays = Map::new();

        for (path, spec) in rule.properties() {
            let array_shaped = is_array_path(path);
            let value = match self.property_value(&ctx, path, spec, array_shaped) {
                Some(value) => value,
                None => continue,
            };

            if spec.is_child_url {
                ctx.collect_child_urls(&value);
            }

            if array_shaped {
                set_path(&mut arrays, strip_array_marker(path), value);
            } else {
                set_path(&mut scalar, path, value);
            }
        }

        let documents = expand(&scalar, &arrays);
        tracing::debug!(
            "Extracted {} document(s) and {} child URL(s) from {}",
            documents.len(),
            ctx.child_urls.len(),
            page.url
        );

        Ok(Some(Extraction {
            rule: rule.name.clone(),
            documents,
            child_urls: ctx.child_urls,
            overwrite: rule.settings.overwrite,
        }))
    }

    /// Resolves, de-duplicates, scripts and shapes one property
    ///
    /// `None` leaves the property out of the record.
    fn property_value(
        &self,
        ctx: &PageContext<'_>,
        path: &str,
        spec: &ExtractionSpec,
        array_shaped: bool,
    ) -> Option<Value> {
        let resolved = resolve(ctx, path, spec, array_shaped)?;
        let list_valued = spec.is_array || array_shaped;

        match resolved {
            Resolved::ScriptOnly => self.run_script_only(ctx, path, spec, list_valued),
            Resolved::Scalar(value) => match &spec.script {
                Some(_) => self.run_scalar_script(ctx, path, spec, value),
                None => Some(Value::String(value)),
            },
            Resolved::Cells(cells) => {
                let cells = if spec.is_distinct {
                    distinct(cells, spec.trim_spaces)
                } else {
                    cells
                };

                if list_valued {
                    match &spec.script {
                        Some(_) => self.run_array_script(ctx, path, spec, &cells),
                        None => Some(Value::Array(
                            cells
                                .into_iter()
                                .map(|cell| cell.map(Value::String).unwrap_or(Value::Null))
                                .collect(),
                        )),
                    }
                } else {
                    let joined = cells.into_iter().flatten().collect::<Vec<_>>().join(" ");
                    match &spec.script {
                        Some(_) => self.run_scalar_script(ctx, path, spec, joined),
                        None => Some(Value::String(joined)),
                    }
                }
            }
        }
    }

    fn script_variables(ctx: &PageContext<'_>, path: &str, value: Value) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert("value".to_string(), value);
        vars.insert("property".to_string(), Value::String(path.to_string()));
        vars.insert("url".to_string(), Value::String(ctx.page.url.clone()));
        vars.insert(
            "session_id".to_string(),
            Value::String(ctx.page.session_id.clone()),
        );
        vars
    }

    fn run_scalar_script(
        &self,
        ctx: &PageContext<'_>,
        path: &str,
        spec: &ExtractionSpec,
        value: String,
    ) -> Option<Value> {
        let script = spec.script.as_ref()?;
        let vars = Self::script_variables(ctx, path, Value::String(value));
        match self.scripts.run(script, path, vars) {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(
                    "Script for property {} of rule {} failed on {}: {} (source: {})",
                    path,
                    ctx.rule.name,
                    ctx.page.url,
                    e,
                    script.source
                );
                None
            }
        }
    }

    // Runs once with a nil value. A list-valued property also sees index 0
    // and an empty array; the result is kept as returned.
    fn run_script_only(
        &self,
        ctx: &PageContext<'_>,
        path: &str,
        spec: &ExtractionSpec,
        list_valued: bool,
    ) -> Option<Value> {
        let script = spec.script.as_ref()?;
        let mut vars = Self::script_variables(ctx, path, Value::Null);
        if list_valued {
            vars.insert("index".to_string(), Value::from(0));
            vars.insert("array".to_string(), Value::Array(Vec::new()));
        }
        match self.scripts.run(script, path, vars) {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(
                    "Script for property {} of rule {} failed on {}: {} (source: {})",
                    path,
                    ctx.rule.name,
                    ctx.page.url,
                    e,
                    script.source
                );
                None
            }
        }
    }

    // One call per element; a nil result keeps its slot as null.
    fn run_array_script(
        &self,
        ctx: &PageContext<'_>,
        path: &str,
        spec: &ExtractionSpec,
        cells: &[Option<String>],
    ) -> Option<Value> {
        let script = spec.script.as_ref()?;
        let array: Vec<Value> = cells
            .iter()
            .map(|cell| cell.clone().map(Value::String).unwrap_or(Value::Null))
            .collect();

        let mut results = Vec::with_capacity(array.len());
        for (index, value) in array.iter().enumerate() {
            let mut vars = Self::script_variables(ctx, path, value.clone());
            vars.insert("index".to_string(), Value::from(index));
            vars.insert("array".to_string(), Value::Array(array.clone()));

            match self.scripts.run(script, path, vars) {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!(
                        "Script for property {}[{}] of rule {} failed on {}: {} (source: {})",
                        path,
                        index,
                        ctx.rule.name,
                        ctx.page.url,
                        e,
                        script.source
                    );
                    return None;
                }
            }
        }
        Some(Value::Array(results))
    }
}

/// Reads a property's raw value from the page
fn resolve(
    ctx: &PageContext<'_>,
    path: &str,
    spec: &ExtractionSpec,
    array_shaped: bool,
) -> Option<Resolved> {
    if let Some(literal) = &spec.literal {
        return Some(Resolved::Cells(match literal {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            Value::String(s) => vec![Some(s.clone())],
            other => vec![Some(other.to_string())],
        }));
    }

    match spec.value_type {
        Some(ValueType::Data) | Some(ValueType::Attachment) => {
            return Some(Resolved::Scalar(BASE64.encode(&ctx.page.body)));
        }
        Some(ValueType::Source) => return Some(Resolved::Scalar(ctx.page.source_text())),
        None => {}
    }

    let query = match &spec.query {
        Some(query) => query,
        None => return Some(Resolved::ScriptOnly),
    };

    let tree = match &ctx.tree {
        Some(tree) => tree,
        None => {
            tracing::debug!(
                "Rule {} does not parse HTML; skipping property {}",
                ctx.rule.name,
                path
            );
            return None;
        }
    };

    let access = AccessContext {
        args: &spec.args,
        page_url: &ctx.page.url,
    };
    let nodes = select_nodes(tree.root_element(), &query.queries, array_shaped);
    let cells = nodes
        .into_iter()
        .map(|node| {
            let node = node?;
            match (query.accessor)(node, &access) {
                Ok(value) if spec.trim_spaces => Some(collapse_whitespace(&value)),
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("Property {} on {}: {}", path, ctx.page.url, e);
                    None
                }
            }
        })
        .collect();

    Some(Resolved::Cells(cells))
}
