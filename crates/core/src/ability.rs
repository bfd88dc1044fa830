//! Abilities and their per-platform executors.
//!
//! An ability is a single adversary technique; each executor is one way of
//! running it (a shell on a platform). Content is loaded as plain data; this
//! crate does not author or validate ability libraries.

use serde::{Deserialize, Serialize};

/// Default number of seconds an agent lets a command run.
pub const DEFAULT_EXECUTOR_TIMEOUT: u64 = 60;

/// Default visibility score for abilities and operations.
pub const DEFAULT_VISIBILITY: u32 = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ability {
    pub ability_id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tactic: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub technique: String,

    #[serde(default)]
    pub executors: Vec<Executor>,

    /// Ask the agent to remove downloaded payloads once the command ran.
    #[serde(default)]
    pub delete_payload: bool,

    /// How noisy the ability is. Operations refuse to run abilities above
    /// their own visibility without operator approval.
    #[serde(default = "default_visibility")]
    pub visibility: u32,
}

fn default_visibility() -> u32 {
    DEFAULT_VISIBILITY
}

fn default_timeout() -> u64 {
    DEFAULT_EXECUTOR_TIMEOUT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Executor {
    /// Executor name as advertised by agents (`sh`, `psh`, `cmd`, ...).
    pub name: String,

    pub platform: String,

    #[serde(default)]
    pub command: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payloads: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uploads: Vec<String>,

    /// Commands that undo this executor's side effects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parsers: Vec<ParserSpec>,
}

/// A parser attached to an executor: which module reads the output and how
/// matches map onto fact traits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserSpec {
    pub module: String,

    #[serde(default)]
    pub mappings: Vec<ParserMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserMapping {
    /// Fact trait assigned to each extracted value.
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Ability {
    /// Pick the executor an agent should use: the first of the agent's
    /// executors (in preference order) that this ability supports on the
    /// agent's platform.
    pub fn executor_for(&self, platform: &str, preferred: &[String]) -> Option<&Executor> {
        preferred.iter().find_map(|name| {
            self.executors
                .iter()
                .find(|e| e.platform == platform && &e.name == name)
        })
    }

    pub fn has_parsers(&self, executor: &str) -> bool {
        self.executors
            .iter()
            .any(|e| e.name == executor && !e.parsers.is_empty())
    }
}
