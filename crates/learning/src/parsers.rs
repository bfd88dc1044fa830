//! Output parsers declared on executors.
//!
//! An executor lists `ParserSpec { module, mappings }`; the registry looks
//! up each module by name and hands it the output plus the mappings. Every
//! mapping turns matched output into a fact whose trait is `source` and,
//! when present, a second fact whose trait is `target`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redline_core::error::LearningError;
use redline_core::{Fact, Link, LinkParser, Operation, ParserMapping};
use tracing::warn;

/// A named output parser module.
pub trait OutputParser: Send + Sync {
    fn module(&self) -> &str;

    /// Extract `(trait, value)` pairs from `output` according to `mappings`.
    fn parse(
        &self,
        output: &str,
        mappings: &[ParserMapping],
    ) -> Result<Vec<(String, String)>, LearningError>;
}

/// Every non-empty line becomes a `source` fact.
pub struct LineParser;

impl OutputParser for LineParser {
    fn module(&self) -> &str {
        "line"
    }

    fn parse(
        &self,
        output: &str,
        mappings: &[ParserMapping],
    ) -> Result<Vec<(String, String)>, LearningError> {
        let mut pairs = Vec::new();
        for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            for mapping in mappings {
                pairs.push((mapping.source.clone(), line.to_string()));
            }
        }
        Ok(pairs)
    }
}

/// `key=value` or `key: value` lines. A mapping selects the key through its
/// `edge` (falling back to `source`); `target` receives the same value.
pub struct KeyValueParser;

impl OutputParser for KeyValueParser {
    fn module(&self) -> &str {
        "key_value"
    }

    fn parse(
        &self,
        output: &str,
        mappings: &[ParserMapping],
    ) -> Result<Vec<(String, String)>, LearningError> {
        let mut pairs = Vec::new();
        for line in output.lines() {
            let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if value.is_empty() {
                continue;
            }
            for mapping in mappings {
                let wanted = mapping.edge.as_deref().unwrap_or(&mapping.source);
                if key.eq_ignore_ascii_case(wanted) {
                    pairs.push((mapping.source.clone(), value.to_string()));
                    if let Some(target) = &mapping.target {
                        pairs.push((target.clone(), value.to_string()));
                    }
                }
            }
        }
        Ok(pairs)
    }
}

/// JSON output: an object or an array of objects. `edge` (or `source`)
/// names the field read for the source fact; `target` names a second
/// field read from the same object.
pub struct JsonParser;

impl JsonParser {
    fn scalar(value: &serde_json::Value) -> Option<String> {
        match value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl OutputParser for JsonParser {
    fn module(&self) -> &str {
        "json"
    }

    fn parse(
        &self,
        output: &str,
        mappings: &[ParserMapping],
    ) -> Result<Vec<(String, String)>, LearningError> {
        let document: serde_json::Value =
            serde_json::from_str(output.trim()).map_err(|e| LearningError::ParseFailed {
                module: self.module().into(),
                reason: e.to_string(),
            })?;
        let objects: Vec<&serde_json::Value> = match &document {
            serde_json::Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let mut pairs = Vec::new();
        for object in objects {
            for mapping in mappings {
                let field = mapping.edge.as_deref().unwrap_or(&mapping.source);
                if let Some(value) = object.get(field).and_then(Self::scalar) {
                    pairs.push((mapping.source.clone(), value));
                }
                if let Some(target) = &mapping.target
                    && let Some(value) = object.get(target).and_then(Self::scalar)
                {
                    pairs.push((target.clone(), value));
                }
            }
        }
        Ok(pairs)
    }
}

/// Parser modules by name.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn OutputParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the `line`, `key_value` and `json` parsers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LineParser));
        registry.register(Arc::new(KeyValueParser));
        registry.register(Arc::new(JsonParser));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn OutputParser>) {
        self.parsers.insert(parser.module().to_string(), parser);
    }

    pub fn get(&self, module: &str) -> Option<&Arc<dyn OutputParser>> {
        self.parsers.get(module)
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("modules", &self.list())
            .finish()
    }
}

#[async_trait]
impl LinkParser for ParserRegistry {
    async fn parse(
        &self,
        link: &Link,
        output: &str,
        operation: Option<&Operation>,
    ) -> Result<Vec<Fact>, LearningError> {
        let mut facts: Vec<Fact> = Vec::new();
        for spec in &link.executor.parsers {
            let Some(parser) = self.get(&spec.module) else {
                warn!(link_id = %link.id, module = %spec.module, "Unknown parser module, skipping");
                continue;
            };
            for (trait_name, value) in parser.parse(output, &spec.mappings)? {
                let fact = Fact::new(trait_name, value).from_link(&link.id, &link.paw);
                let seeded = operation.is_some_and(|op| op.source.iter().any(|f| f.same_as(&fact)));
                if !seeded && !facts.iter().any(|f| f.same_as(&fact)) {
                    facts.push(fact);
                }
            }
        }
        Ok(facts)
    }
}
