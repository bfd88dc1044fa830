//! Planners decide which links an operation runs next.
//!
//! The atomic planner advances each agent by at most one link per pass,
//! always the candidate whose ability sits earliest in the adversary's
//! ordering. A pass with no candidate for any agent ends the operation.

use async_trait::async_trait;
use redline_core::error::StoreError;
use redline_core::{Agent, Link, Operation};
use tracing::debug;

use crate::planning::PlanningService;

/// A link chosen for an agent in the current pass.
#[derive(Debug, Clone)]
pub struct Decision {
    pub agent: Agent,
    pub link: Link,
}

#[async_trait]
pub trait Planner: Send + Sync {
    fn name(&self) -> &str;

    /// The next bucket of links to apply, or `None` when the operation has
    /// nothing left to run.
    async fn next_bucket(&self, operation: &Operation) -> Result<Option<Vec<Decision>>, StoreError>;
}

pub struct AtomicPlanner {
    planning: PlanningService,
}

impl AtomicPlanner {
    pub fn new(planning: PlanningService) -> Self {
        Self { planning }
    }

    /// The candidate whose ability occurs earliest in the adversary's
    /// ordering. Abilities outside the ordering are never picked.
    pub async fn next_atomic_link(
        &self,
        operation: &Operation,
        agent: &Agent,
    ) -> Result<Option<Link>, StoreError> {
        let candidates = self.planning.get_links(operation, agent).await?;
        Ok(select_earliest(operation, candidates))
    }

    /// Agents attached to the operation that still match its group.
    async fn live_agents(&self, operation: &Operation) -> Result<Vec<Agent>, StoreError> {
        let mut agents = Vec::new();
        for paw in &operation.agents {
            if let Some(agent) = self.planning.store().find_agent(paw).await?
                && operation.includes_agent(&agent)
            {
                agents.push(agent);
            }
        }
        Ok(agents)
    }
}

fn select_earliest(operation: &Operation, candidates: Vec<Link>) -> Option<Link> {
    candidates
        .into_iter()
        .filter_map(|link| {
            operation
                .adversary
                .position(link.ability_id())
                .map(|position| (position, link))
        })
        .min_by_key(|(position, _)| *position)
        .map(|(_, link)| link)
}

#[async_trait]
impl Planner for AtomicPlanner {
    fn name(&self) -> &str {
        "atomic"
    }

    async fn next_bucket(&self, operation: &Operation) -> Result<Option<Vec<Decision>>, StoreError> {
        let mut bucket = Vec::new();
        for agent in self.live_agents(operation).await? {
            if let Some(link) = self.next_atomic_link(operation, &agent).await? {
                debug!(
                    operation = %operation.name,
                    paw = %agent.paw,
                    ability = %link.ability_id(),
                    "Atomic link selected"
                );
                bucket.push(Decision { agent, link });
            }
        }
        Ok((!bucket.is_empty()).then_some(bucket))
    }
}
