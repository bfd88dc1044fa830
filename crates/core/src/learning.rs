//! Downstream consumers of command output: fact learning, parsing, and
//! per-ability output hooks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{HookError, LearningError};
use crate::fact::Fact;
use crate::link::Link;
use crate::operation::Operation;

/// Learns facts from free-form output. `facts` is what is already known;
/// only new facts are returned.
#[async_trait]
pub trait FactLearner: Send + Sync {
    async fn learn(
        &self,
        facts: &[Fact],
        link: &Link,
        output: &str,
        operation: Option<&Operation>,
    ) -> Result<Vec<Fact>, LearningError>;
}

/// Runs the output parsers an ability's executor declares.
#[async_trait]
pub trait LinkParser: Send + Sync {
    async fn parse(
        &self,
        link: &Link,
        output: &str,
        operation: Option<&Operation>,
    ) -> Result<Vec<Fact>, LearningError>;
}

/// Rewrites raw output before it is stored, e.g. to decrypt or unpack it.
pub trait OutputHook: Send + Sync {
    fn postprocess(&self, raw: &[u8]) -> Result<Vec<u8>, HookError>;
}

/// Output hooks keyed by ability, then executor name.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: HashMap<String, HashMap<String, Arc<dyn OutputHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ability_id: &str, executor: &str, hook: Arc<dyn OutputHook>) {
        self.hooks
            .entry(ability_id.to_string())
            .or_default()
            .insert(executor.to_string(), hook);
    }

    pub fn get(&self, ability_id: &str, executor: &str) -> Option<&Arc<dyn OutputHook>> {
        self.hooks.get(ability_id)?.get(executor)
    }

    pub fn len(&self) -> usize {
        self.hooks.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry").field("hooks", &self.len()).finish()
    }
}
