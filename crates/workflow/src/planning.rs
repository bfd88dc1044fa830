//! Planning service: link generation, application and completion waits.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use redline_core::error::StoreError;
use redline_core::{Agent, DataStore, Link, Operation, OperationState};
use tokio::time::Instant;
use tracing::debug;

/// How a completion wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every link is done.
    Completed,
    /// The operation was finished from outside while waiting.
    Stopped,
    /// The deadline passed first.
    TimedOut,
}

#[derive(Clone)]
pub struct PlanningService {
    store: Arc<dyn DataStore>,
    poll_interval: Duration,
}

impl PlanningService {
    pub fn new(store: Arc<dyn DataStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    /// Candidate links for `agent`: one per ability in the adversary's
    /// ordering that the agent can execute and has not already been handed
    /// in this operation. Commands are rendered against the agent.
    pub async fn get_links(&self, operation: &Operation, agent: &Agent) -> Result<Vec<Link>, StoreError> {
        let chain = self.store.links(&operation.chain).await?;
        let attempted = |ability_id: &str| {
            chain
                .iter()
                .any(|l| !l.cleanup && l.paw == agent.paw && l.ability_id() == ability_id)
        };

        let mut links = Vec::new();
        for ability_id in &operation.adversary.atomic_ordering {
            if attempted(ability_id.as_str()) {
                continue;
            }
            let Some(ability) = self.store.find_ability(ability_id).await? else {
                debug!(operation = %operation.name, ability = %ability_id, "Ability not loaded, skipping");
                continue;
            };
            let Some(executor) = ability.executor_for(&agent.platform, &agent.executors).cloned() else {
                continue;
            };
            let mut link = Link::for_agent(agent, ability, executor);
            link.operation = Some(operation.id.clone());
            links.push(link);
        }
        Ok(links)
    }

    /// Decide a link: stamp it, gate it by operation policy and append it
    /// to the chain.
    pub async fn apply(&self, operation: &Operation, agent: &Agent, mut link: Link) -> Result<Link, StoreError> {
        link.operation = Some(operation.id.clone());
        link.decide = Some(Utc::now());
        link.status = operation.link_status_for(agent, &link.ability);

        let link = self.store.store_link(link).await?;
        let id = link.id.clone();
        self.store
            .modify_operation(&operation.id, &mut |op| op.chain.push(id.clone()))
            .await?;
        debug!(
            operation = %operation.name,
            paw = %link.paw,
            ability = %link.ability.name,
            status = %link.status,
            "Link applied"
        );
        Ok(link)
    }

    /// Block until every link in `link_ids` is done (see [`Link::is_done`]).
    ///
    /// Woken early by link changes; otherwise re-checks every poll interval.
    pub async fn wait_for_links_completion(
        &self,
        operation_id: &str,
        link_ids: &[String],
        require_result: bool,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome, StoreError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let changes = self.store.link_changes();

        loop {
            let notified = changes.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let links = self.store.links(link_ids).await?;
            if links.iter().all(|l| l.is_done(require_result)) {
                return Ok(WaitOutcome::Completed);
            }
            match self.store.find_operation(operation_id).await? {
                Some(op) if op.is_open() && op.state != OperationState::Finished => {}
                _ => return Ok(WaitOutcome::Stopped),
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(WaitOutcome::TimedOut);
            }

            tokio::select! {
                _ = notified.as_mut() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
