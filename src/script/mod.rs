//! Script evaluation for property post-processing and session hooks
//!
//! A property may carry a script that rewrites its extracted value, and a
//! configuration may run scripts when a session starts (`execute`) and ends
//! (`finish`). Scripts are dispatched by language to a [`ScriptEngine`];
//! Lua is registered by default.
//!
//! Script sources come in three kinds:
//!
//! | kind | `source` holds |
//! |------|----------------|
//! | `inline` | the script text |
//! | `file` | a path to read the script from |
//! | `indexed` | the ID of a script kept in a [`ScriptStore`] |

mod lua;

pub use lua::LuaEngine;

use crate::storage::{ScriptStore, StorageError};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while resolving or running a script
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("No script engine registered for language '{0}'")]
    UnknownLanguage(String),

    #[error("Script source not found: {0}")]
    SourceNotFound(String),

    #[error("Failed to read script file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to load stored script: {0}")]
    Store(#[from] StorageError),

    #[error("{lang} script failed: {message}")]
    Execution { lang: String, message: String },
}

/// Where a script's text comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Inline,
    File,
    Indexed,
}

impl ScriptKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inline" => Some(Self::Inline),
            "file" => Some(Self::File),
            "indexed" => Some(Self::Indexed),
            _ => None,
        }
    }
}

/// A script reference: language, source kind and source
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptSpec {
    pub lang: String,
    pub kind: ScriptKind,
    pub source: String,
}

impl ScriptSpec {
    /// Creates an inline Lua script
    pub fn inline_lua(source: impl Into<String>) -> Self {
        Self {
            lang: "lua".to_string(),
            kind: ScriptKind::Inline,
            source: source.into(),
        }
    }
}

/// Logger handed to scripts; every message becomes a tracing event
#[derive(Debug, Clone)]
pub struct ScriptLogger {
    name: String,
}

impl ScriptLogger {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(target: "sumi_trawl::script", script = %self.name, "{}", message);
    }

    pub fn info(&self, message: &str) {
        tracing::info!(target: "sumi_trawl::script", script = %self.name, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(target: "sumi_trawl::script", script = %self.name, "{}", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(target: "sumi_trawl::script", script = %self.name, "{}", message);
    }
}

/// Variables and logger visible to one script call
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub variables: Map<String, Value>,
    pub logger: ScriptLogger,
}

impl ScriptContext {
    pub fn new(name: &str, variables: Map<String, Value>) -> Self {
        Self {
            variables,
            logger: ScriptLogger::new(name),
        }
    }
}

/// Evaluates script text in one language
pub trait ScriptEngine: Send + Sync {
    /// Runs `source` with the context's variables bound as globals and
    /// returns the script's result (`Value::Null` for no result)
    fn execute(&self, name: &str, source: &str, ctx: &ScriptContext) -> Result<Value, ScriptError>;
}

/// Resolves script sources and dispatches them to engines by language
pub struct ScriptRunner {
    engines: HashMap<String, Arc<dyn ScriptEngine>>,
    store: Option<Arc<dyn ScriptStore>>,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptRunner {
    /// Creates a runner with the Lua engine registered
    pub fn new() -> Self {
        let mut runner = Self {
            engines: HashMap::new(),
            store: None,
        };
        runner.register("lua", Arc::new(LuaEngine::new()));
        runner
    }

    /// Attaches the store used for `indexed` scripts
    pub fn with_store(mut self, store: Arc<dyn ScriptStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Registers (or replaces) the engine for a language
    pub fn register(&mut self, lang: &str, engine: Arc<dyn ScriptEngine>) {
        self.engines.insert(lang.to_lowercase(), engine);
    }

    /// Resolves the script source and runs it
    pub fn run(
        &self,
        spec: &ScriptSpec,
        name: &str,
        variables: Map<String, Value>,
    ) -> Result<Value, ScriptError> {
        let (lang, source) = self.resolve(spec)?;
        let engine = self
            .engines
            .get(&lang.to_lowercase())
            .ok_or_else(|| ScriptError::UnknownLanguage(lang.clone()))?;

        let ctx = ScriptContext::new(name, variables);
        engine.execute(name, &source, &ctx)
    }

    fn resolve(&self, spec: &ScriptSpec) -> Result<(String, String), ScriptError> {
        match spec.kind {
            ScriptKind::Inline => Ok((spec.lang.clone(), spec.source.clone())),
            ScriptKind::File => {
                let source = std::fs::read_to_string(&spec.source)?;
                Ok((spec.lang.clone(), source))
            }
            ScriptKind::Indexed => {
                let store = self
                    .store
                    .as_ref()
                    .ok_or_else(|| ScriptError::SourceNotFound(spec.source.clone()))?;
                store
                    .get_script(&spec.source)?
                    .ok_or_else(|| ScriptError::SourceNotFound(spec.source.clone()))
            }
        }
    }
}
