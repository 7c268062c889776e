//! Scraping rules and rule matching
//!
//! Each configured `target` compiles into a [`ScrapingRule`]: anchored
//! field patterns, rule settings and the ordered property map. Rules are
//! built once per session and never change afterwards.

use crate::config::{Config, TargetConfig};
use crate::extract::descriptor::{is_known_field, PageDescriptor};
use crate::extract::selector::{AccessorFn, Query, ACCESSORS};
use crate::script::{ScriptKind, ScriptSpec};
use crate::ConfigError;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;

/// Raw body value types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Body bytes, base64 encoded
    Data,
    /// Same as `Data`
    Attachment,
    /// Body text
    Source,
}

impl ValueType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "data" => Some(Self::Data),
            "attachment" => Some(Self::Attachment),
            "source" => Some(Self::Source),
            _ => None,
        }
    }

    /// Returns true for the base64 body types
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Data | Self::Attachment)
    }
}

/// The accessor and query chain of a property
#[derive(Clone)]
pub struct AccessorQuery {
    pub name: &'static str,
    pub(crate) accessor: AccessorFn,
    pub queries: Vec<Query>,
}

impl fmt::Debug for AccessorQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessorQuery")
            .field("name", &self.name)
            .field("queries", &self.queries)
            .finish()
    }
}

/// How one property gets its value
#[derive(Debug, Clone)]
pub struct ExtractionSpec {
    /// Literal string or list; wins over every other source
    pub literal: Option<Value>,
    pub value_type: Option<ValueType>,
    pub query: Option<AccessorQuery>,
    pub args: Vec<String>,
    pub is_array: bool,
    pub is_distinct: bool,
    pub is_child_url: bool,
    pub trim_spaces: bool,
    pub script: Option<ScriptSpec>,
}

fn invalid(property: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidProperty {
        property: property.to_string(),
        message: message.into(),
    }
}

fn bool_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_list(property: &str, key: &str, value: &Value) -> Result<Vec<String>, ConfigError> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(property, format!("'{}' entries must be strings", key)))
            })
            .collect(),
        _ => Err(invalid(
            property,
            format!("'{}' must be a string or a list of strings", key),
        )),
    }
}

fn parse_script(property: &str, value: &Value) -> Result<ScriptSpec, ConfigError> {
    match value {
        Value::String(source) => Ok(ScriptSpec::inline_lua(source.clone())),
        Value::Object(map) => {
            let lang = map
                .get("lang")
                .and_then(Value::as_str)
                .unwrap_or("lua")
                .to_string();
            let kind_name = map
                .get("script_type")
                .and_then(Value::as_str)
                .unwrap_or("inline");
            let kind = ScriptKind::parse(kind_name)
                .ok_or_else(|| invalid(property, format!("unknown script_type '{}'", kind_name)))?;
            let source = map
                .get("source")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid(property, "script.source is required"))?
                .to_string();
            Ok(ScriptSpec { lang, kind, source })
        }
        _ => Err(invalid(property, "script must be a string or an object")),
    }
}

impl ExtractionSpec {
    /// Parses one property specification
    ///
    /// `default_trim` is the rule's `trim_spaces` setting.
    pub fn parse(property: &str, value: &Value, default_trim: bool) -> Result<Self, ConfigError> {
        let spec = value
            .as_object()
            .ok_or_else(|| invalid(property, "specification must be an object"))?;

        let literal = match spec.get("value") {
            None | Some(Value::Null) => None,
            Some(v @ Value::String(_)) | Some(v @ Value::Array(_)) => Some(v.clone()),
            Some(_) => return Err(invalid(property, "'value' must be a string or a list")),
        };

        let value_type = match spec.get("type").and_then(Value::as_str) {
            Some(name) => Some(
                ValueType::parse(name)
                    .ok_or_else(|| invalid(property, format!("unknown type '{}'", name)))?,
            ),
            None => None,
        };

        let query = match ACCESSORS.iter().find(|(name, _)| spec.contains_key(*name)) {
            Some((name, accessor)) => {
                let queries = string_list(property, name, &spec[*name])?
                    .iter()
                    .map(|q| Query::parse(q))
                    .collect::<Result<Vec<_>, _>>()?;
                Some(AccessorQuery {
                    name: *name,
                    accessor: *accessor,
                    queries,
                })
            }
            None => None,
        };

        let args = match spec.get("args") {
            Some(v) => string_list(property, "args", v)?,
            None => Vec::new(),
        };

        let script = match spec.get("script") {
            Some(v) => Some(parse_script(property, v)?),
            None => None,
        };

        if literal.is_none() && value_type.is_none() && query.is_none() && script.is_none() {
            return Err(invalid(property, "no value source (value, type, accessor or script)"));
        }

        let flag = |key: &str| spec.get(key).and_then(bool_value).unwrap_or(false);
        let mut parsed = Self {
            literal,
            value_type,
            query,
            args,
            is_array: flag("is_array"),
            is_distinct: flag("is_distinct"),
            is_child_url: flag("is_child_url"),
            trim_spaces: spec
                .get("trim_spaces")
                .and_then(bool_value)
                .unwrap_or(default_trim),
            script,
        };

        if parsed.value_type.map_or(false, |t| t.is_binary()) {
            parsed.is_array = false;
            parsed.is_child_url = false;
            parsed.is_distinct = false;
        }

        Ok(parsed)
    }

    /// Returns true if the value comes from the parsed page tree
    pub fn needs_tree(&self) -> bool {
        self.literal.is_none() && self.value_type.is_none() && self.query.is_some()
    }
}

/// Rule settings
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSettings {
    /// Parse the body into a tree; without it only literal and raw values work
    pub parse_html: bool,
    /// Delete previous documents of the URL before writing
    pub overwrite: bool,
    /// Default `trim_spaces` for the rule's properties
    pub trim_spaces: bool,
    /// Every configured setting, including unrecognized ones
    pub raw: Map<String, Value>,
}

/// A compiled scraping target
#[derive(Debug, Clone)]
pub struct ScrapingRule {
    pub name: String,
    field_patterns: Vec<(String, Regex)>,
    pub settings: RuleSettings,
    properties: Vec<(String, ExtractionSpec)>,
}

impl ScrapingRule {
    /// Compiles a configured target
    ///
    /// `overwrite_default` is the configuration's `overwrite` flag, used when
    /// the target has no `overwrite` setting.
    pub fn from_target(
        index: usize,
        target: &TargetConfig,
        overwrite_default: bool,
    ) -> Result<Self, ConfigError> {
        let name = target
            .name
            .clone()
            .unwrap_or_else(|| format!("rule-{}", index));

        let mut field_patterns = Vec::with_capacity(target.pattern.len());
        for (field, pattern) in &target.pattern {
            let pattern = pattern.as_str().ok_or_else(|| {
                ConfigError::InvalidPattern(format!("{}: pattern for '{}' must be a string", name, field))
            })?;
            if !is_known_field(field) {
                tracing::warn!("Rule {} matches on unknown page field '{}'", name, field);
            }
            let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                ConfigError::InvalidPattern(format!("{}: '{}': {}", name, pattern, e))
            })?;
            field_patterns.push((field.clone(), regex));
        }

        let setting = |key: &str| target.settings.get(key).and_then(bool_value);
        let settings = RuleSettings {
            parse_html: setting("parse_html").unwrap_or(true),
            overwrite: setting("overwrite").unwrap_or(overwrite_default),
            trim_spaces: setting("trim_spaces").unwrap_or(false),
            raw: target.settings.clone(),
        };

        let configured = target.properties.as_ref().ok_or_else(|| ConfigError::InvalidProperty {
            property: name.clone(),
            message: "target has no properties".to_string(),
        })?;

        let properties = configured
            .iter()
            .map(|(path, spec)| {
                ExtractionSpec::parse(path, spec, settings.trim_spaces).map(|s| (path.clone(), s))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name,
            field_patterns,
            settings,
            properties,
        })
    }

    /// Returns true if every field pattern fully matches the page
    ///
    /// A rule without patterns never matches.
    pub fn matches(&self, page: &PageDescriptor) -> bool {
        !self.field_patterns.is_empty()
            && self.field_patterns.iter().all(|(field, regex)| {
                page.field(field)
                    .map(|value| regex.is_match(&value.as_match_string()))
                    .unwrap_or(false)
            })
    }

    /// Properties in configured order
    pub fn properties(&self) -> &[(String, ExtractionSpec)] {
        &self.properties
    }

    /// Field names the rule matches on
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.field_patterns.iter().map(|(field, _)| field.as_str())
    }

    /// Returns true if any property needs the page tree
    pub fn needs_tree(&self) -> bool {
        self.properties.iter().any(|(_, spec)| spec.needs_tree())
    }
}

/// Returns the first rule that matches the page
pub fn match_rule<'a>(page: &PageDescriptor, rules: &'a [ScrapingRule]) -> Option<&'a ScrapingRule> {
    rules.iter().find(|rule| rule.matches(page))
}

/// Compiles every target of a configuration
///
/// A target that fails to compile is logged and left out. The result is
/// an error only if no rule remains.
pub fn compile_rules(config: &Config) -> Result<Vec<ScrapingRule>, ConfigError> {
    let mut rules = Vec::with_capacity(config.target.len());
    for (index, target) in config.target.iter().enumerate() {
        match ScrapingRule::from_target(index, target, config.overwrite) {
            Ok(rule) => rules.push(rule),
            Err(e) => tracing::warn!("Dropping target {}: {}", index, e),
        }
    }

    if rules.is_empty() {
        return Err(ConfigError::EmptyTargets);
    }

    Ok(rules)
}
