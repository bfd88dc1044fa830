//! Regex-driven fact learner.

use async_trait::async_trait;
use redline_config::PatternConfig;
use redline_core::error::LearningError;
use redline_core::{Fact, FactLearner, Link, Operation};
use regex_lite::Regex;
use tracing::debug;

/// Learns one fact per distinct regex match in the output.
#[derive(Debug)]
pub struct PatternLearner {
    patterns: Vec<(String, Regex)>,
}

impl PatternLearner {
    /// Compile every pattern up front; one bad regex rejects the whole set.
    pub fn new(patterns: &[PatternConfig]) -> Result<Self, LearningError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&p.regex)
                    .map(|re| (p.trait_name.clone(), re))
                    .map_err(|e| LearningError::InvalidPattern {
                        trait_name: p.trait_name.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[async_trait]
impl FactLearner for PatternLearner {
    async fn learn(
        &self,
        facts: &[Fact],
        link: &Link,
        output: &str,
        _operation: Option<&Operation>,
    ) -> Result<Vec<Fact>, LearningError> {
        let mut learned: Vec<Fact> = Vec::new();
        for (trait_name, regex) in &self.patterns {
            for m in regex.find_iter(output) {
                let candidate = Fact::new(trait_name.as_str(), m.as_str()).from_link(&link.id, &link.paw);
                let known = facts.iter().chain(learned.iter()).any(|f| f.same_as(&candidate));
                if !known {
                    learned.push(candidate);
                }
            }
        }
        debug!(link_id = %link.id, learned = learned.len(), "Learned facts from output");
        Ok(learned)
    }
}
