//! Facts learned from command output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    #[serde(rename = "trait")]
    pub trait_name: String,

    pub value: String,

    #[serde(default = "default_score")]
    pub score: i32,

    /// Link whose output produced this fact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_link: Option<String>,

    /// Paw of the agent that reported the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_by: Option<String>,

    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
}

fn default_score() -> i32 {
    1
}

impl Fact {
    pub fn new(trait_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            trait_name: trait_name.into(),
            value: value.into(),
            score: default_score(),
            source_link: None,
            collected_by: None,
            created: Utc::now(),
        }
    }

    pub fn from_link(mut self, link_id: &str, paw: &str) -> Self {
        self.source_link = Some(link_id.to_string());
        self.collected_by = Some(paw.to_string());
        self
    }

    /// Same trait and value, regardless of provenance.
    pub fn same_as(&self, other: &Fact) -> bool {
        self.trait_name == other.trait_name && self.value == other.value
    }
}
