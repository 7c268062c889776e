//! Selector engine: positional queries and named accessors
//!
//! A query is CSS selector text with optional positional filters
//! `:eq(n)`, `:lt(n)` and `:gt(n)`. The query is scanned left to right; the
//! fragment before each filter selects candidates under every node of the
//! working set, and the filter keeps candidates by index within each
//! node's own candidate list. A fragment after the last filter is a plain
//! selection. An empty fragment selects a node's child elements, so
//! `li:eq(1)` picks the second `li` under each node while `:eq(1)` picks
//! each node's second child. A fragment that starts with `>`, `+` or `~`
//! is relative to the working node, so `ul:eq(0) > li` picks the direct
//! `li` children of the first list.
//!
//! Each selected node is then turned into a string by one accessor from
//! [`ACCESSORS`], looked up by name.

use crate::ConfigError;
use regex::Regex;
use scraper::{ElementRef, Selector};
use thiserror::Error;
use url::Url;

/// Per-node filter applied to a candidate list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Positional {
    /// Keep index `n` only
    Eq(usize),
    /// Keep indices `[0, n)`
    Lt(usize),
    /// Keep indices `(n, end)`
    Gt(usize),
}

impl Positional {
    fn apply<T>(self, candidates: Vec<T>) -> Vec<T> {
        match self {
            Self::Eq(n) => candidates.into_iter().nth(n).into_iter().collect(),
            Self::Lt(n) => candidates.into_iter().take(n).collect(),
            Self::Gt(n) => candidates.into_iter().skip(n.saturating_add(1)).collect(),
        }
    }
}

#[derive(Debug, Clone)]
enum Fragment {
    /// Child elements
    Children,
    /// Elements under the node, matched with the node as `:scope`
    Within(Selector),
    /// Siblings after the node (and their descendants), matched with the
    /// node as `:scope`
    Following(Selector),
}

impl Fragment {
    fn candidates<'a>(&self, node: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        match self {
            Self::Children => node.children().filter_map(ElementRef::wrap).collect(),
            Self::Within(selector) => node.select(selector).collect(),
            Self::Following(selector) => match node.parent().and_then(ElementRef::wrap) {
                Some(parent) => parent
                    .descendants()
                    .filter_map(ElementRef::wrap)
                    .filter(|el| selector.matches_with_scope(el, Some(node)))
                    .collect(),
                None => Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct Step {
    fragment: Fragment,
    filter: Option<Positional>,
}

/// A compiled positional query
#[derive(Debug, Clone)]
pub struct Query {
    source: String,
    steps: Vec<Step>,
}

const POSITIONAL_PATTERN: &str = r":(eq|lt|gt)\((\d+)\)";

fn compile_fragment(fragment: &str) -> Result<Fragment, ConfigError> {
    let fragment = fragment.trim();
    let (text, siblings) = match fragment.chars().next() {
        None => return Ok(Fragment::Children),
        Some('>') => (format!(":scope {}", fragment), false),
        Some('+') | Some('~') => (format!(":scope {}", fragment), true),
        Some(_) => (fragment.to_string(), false),
    };
    let selector = Selector::parse(&text)
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", fragment, e)))?;
    Ok(if siblings {
        Fragment::Following(selector)
    } else {
        Fragment::Within(selector)
    })
}

impl Query {
    /// Compiles a query string
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let positional = Regex::new(POSITIONAL_PATTERN)
            .map_err(|e| ConfigError::InvalidPattern(e.to_string()))?;

        let mut steps = Vec::new();
        let mut last = 0;
        for caps in positional.captures_iter(source) {
            let whole = match caps.get(0) {
                Some(m) => m,
                None => continue,
            };
            let n: usize = caps[2].parse().map_err(|_| {
                ConfigError::InvalidSelector(format!("'{}': index out of range", source))
            })?;
            let filter = match &caps[1] {
                "eq" => Positional::Eq(n),
                "lt" => Positional::Lt(n),
                _ => Positional::Gt(n),
            };
            steps.push(Step {
                fragment: compile_fragment(&source[last..whole.start()])?,
                filter: Some(filter),
            });
            last = whole.end();
        }

        if !source[last..].trim().is_empty() {
            steps.push(Step {
                fragment: compile_fragment(&source[last..])?,
                filter: None,
            });
        }

        if steps.is_empty() {
            return Err(ConfigError::InvalidSelector(format!(
                "'{}': empty query",
                source
            )));
        }

        Ok(Self {
            source: source.to_string(),
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Applies the query to a working set, keeping document order per node
    pub fn apply<'a>(&self, nodes: Vec<ElementRef<'a>>) -> Vec<ElementRef<'a>> {
        self.steps.iter().fold(nodes, |working, step| {
            working
                .into_iter()
                .flat_map(|node| {
                    let candidates = step.fragment.candidates(node);
                    match step.filter {
                        Some(filter) => filter.apply(candidates),
                        None => candidates,
                    }
                })
                .collect()
        })
    }
}

/// Runs a query chain from `root`
///
/// The first query selects from the root. Each later query runs on every
/// node the first one found, one node at a time. When `placeholders` is
/// set, a node whose chain finds nothing yields `None` so positions stay
/// aligned with the first query's result.
pub fn select_nodes<'a>(
    root: ElementRef<'a>,
    queries: &[Query],
    placeholders: bool,
) -> Vec<Option<ElementRef<'a>>> {
    let (first, rest) = match queries.split_first() {
        Some(split) => split,
        None => return Vec::new(),
    };

    let heads = first.apply(vec![root]);
    if rest.is_empty() {
        return heads.into_iter().map(Some).collect();
    }

    let mut out = Vec::new();
    for head in heads {
        let found = rest
            .iter()
            .fold(vec![head], |working, query| query.apply(working));
        if found.is_empty() {
            if placeholders {
                out.push(None);
            }
        } else {
            out.extend(found.into_iter().map(Some));
        }
    }
    out
}

/// Failure of one accessor call on one node
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("accessor '{accessor}' requires argument {index}")]
    MissingArgument { accessor: &'static str, index: usize },
}

/// What an accessor can see besides the node
#[derive(Debug, Clone, Copy)]
pub struct AccessContext<'a> {
    pub args: &'a [String],
    pub page_url: &'a str,
}

impl AccessContext<'_> {
    fn arg(&self, accessor: &'static str, index: usize) -> Result<&str, AccessError> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or(AccessError::MissingArgument { accessor, index })
    }
}

pub type AccessorFn = fn(ElementRef<'_>, &AccessContext<'_>) -> Result<String, AccessError>;

/// Accessors in priority order; a property uses the first one it names
pub static ACCESSORS: [(&str, AccessorFn); 13] = [
    ("class", access_class),
    ("data", access_data),
    ("html", access_html),
    ("id", access_id),
    ("own_text", access_own_text),
    ("tag_name", access_tag_name),
    ("text", access_text),
    ("val", access_val),
    ("node_name", access_node_name),
    ("outer_html", access_outer_html),
    ("attr", access_attr),
    ("base_uri", access_base_uri),
    ("abs_url", access_abs_url),
];

/// Looks up an accessor by name
pub fn accessor(name: &str) -> Option<(&'static str, AccessorFn)> {
    ACCESSORS.iter().find(|(n, _)| *n == name).copied()
}

/// Collapses whitespace runs to one space and trims the ends
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn attr_or_empty(node: ElementRef<'_>, name: &str) -> String {
    node.value().attr(name).unwrap_or_default().to_string()
}

fn access_class(node: ElementRef<'_>, _: &AccessContext<'_>) -> Result<String, AccessError> {
    Ok(attr_or_empty(node, "class"))
}

fn access_data(node: ElementRef<'_>, _: &AccessContext<'_>) -> Result<String, AccessError> {
    Ok(node
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| matches!(e.value().name(), "script" | "style"))
        .flat_map(|e| e.text())
        .collect())
}

fn access_html(node: ElementRef<'_>, _: &AccessContext<'_>) -> Result<String, AccessError> {
    Ok(node.inner_html())
}

fn access_id(node: ElementRef<'_>, _: &AccessContext<'_>) -> Result<String, AccessError> {
    Ok(attr_or_empty(node, "id"))
}

fn access_own_text(node: ElementRef<'_>, _: &AccessContext<'_>) -> Result<String, AccessError> {
    let own: String = node
        .children()
        .filter_map(|child| child.value().as_text().map(|t| t.to_string()))
        .collect();
    Ok(collapse_whitespace(&own))
}

fn access_tag_name(node: ElementRef<'_>, _: &AccessContext<'_>) -> Result<String, AccessError> {
    Ok(node.value().name().to_string())
}

fn access_text(node: ElementRef<'_>, _: &AccessContext<'_>) -> Result<String, AccessError> {
    Ok(collapse_whitespace(&node.text().collect::<String>()))
}

fn access_val(node: ElementRef<'_>, _: &AccessContext<'_>) -> Result<String, AccessError> {
    if node.value().name() == "textarea" {
        Ok(node.text().collect())
    } else {
        Ok(attr_or_empty(node, "value"))
    }
}

fn access_node_name(node: ElementRef<'_>, _: &AccessContext<'_>) -> Result<String, AccessError> {
    Ok(node.value().name().to_string())
}

fn access_outer_html(node: ElementRef<'_>, _: &AccessContext<'_>) -> Result<String, AccessError> {
    Ok(node.html())
}

fn access_attr(node: ElementRef<'_>, ctx: &AccessContext<'_>) -> Result<String, AccessError> {
    let name = ctx.arg("attr", 0)?;
    Ok(attr_or_empty(node, name))
}

fn access_base_uri(_: ElementRef<'_>, ctx: &AccessContext<'_>) -> Result<String, AccessError> {
    Ok(ctx.page_url.to_string())
}

fn access_abs_url(node: ElementRef<'_>, ctx: &AccessContext<'_>) -> Result<String, AccessError> {
    let name = ctx.arg("abs_url", 0)?;
    let value = match node.value().attr(name) {
        Some(value) => value.trim(),
        None => return Ok(String::new()),
    };
    let resolved = Url::parse(ctx.page_url)
        .and_then(|base| base.join(value))
        .map(|url| url.to_string())
        .unwrap_or_default();
    Ok(resolved)
}
