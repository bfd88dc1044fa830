//! Operation run loop.
//!
//! One task per open operation: plan a bucket, apply it, wait for the
//! bucket to complete, repeat until the planner has nothing left. Then
//! queue cleanup commands for successful links, wait for those (bounded),
//! and close the operation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use redline_config::PlannerConfig;
use redline_core::error::StoreError;
use redline_core::{DataStore, DomainEvent, EventBus, Link, LinkStatus, Operation, OperationState};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::planner::{AtomicPlanner, Planner};
use crate::planning::{PlanningService, WaitOutcome};

/// What a finished run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub passes: usize,
    pub links: usize,
    pub cleanup_links: usize,
}

pub struct OperationRunner {
    store: Arc<dyn DataStore>,
    events: Arc<EventBus>,
    planning: PlanningService,
    config: PlannerConfig,
}

impl OperationRunner {
    pub fn new(store: Arc<dyn DataStore>, events: Arc<EventBus>, config: PlannerConfig) -> Self {
        let planning = PlanningService::new(
            store.clone(),
            Duration::from_millis(config.poll_interval_ms.max(1)),
        );
        Self {
            store,
            events,
            planning,
            config,
        }
    }

    /// Run the operation on its own task. Errors are logged.
    pub fn spawn(self: Arc<Self>, operation_id: String) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run(&operation_id).await {
                error!(operation = %operation_id, error = %e, "Operation run loop failed");
            }
        })
    }

    fn planner_for(&self, operation: &Operation) -> Box<dyn Planner> {
        if operation.planner != "atomic" {
            warn!(operation = %operation.name, planner = %operation.planner, "Unknown planner, using atomic");
        }
        Box::new(AtomicPlanner::new(self.planning.clone()))
    }

    pub async fn run(&self, operation_id: &str) -> Result<RunSummary, StoreError> {
        let operation = self.load(operation_id).await?;
        let planner = self.planner_for(&operation);
        info!(operation = %operation.name, planner = planner.name(), "Operation started");
        self.events.fire_event(DomainEvent::OperationStarted {
            operation_id: operation.id.clone(),
            name: operation.name.clone(),
            timestamp: Utc::now(),
        });

        let mut summary = RunSummary::default();
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let mut stopped = false;

        loop {
            let operation = self.load(operation_id).await?;
            match operation.state {
                OperationState::Finished => {
                    stopped = true;
                    break;
                }
                OperationState::Paused => {
                    tokio::time::sleep(poll).await;
                    continue;
                }
                OperationState::Running => {}
            }
            if !operation.is_open() {
                stopped = true;
                break;
            }

            let Some(bucket) = planner.next_bucket(&operation).await? else {
                debug!(operation = %operation.name, "Planner has no further links");
                break;
            };

            let mut ids = Vec::with_capacity(bucket.len());
            for decision in bucket {
                let link = self
                    .planning
                    .apply(&operation, &decision.agent, decision.link)
                    .await?;
                ids.push(link.id);
            }
            summary.passes += 1;
            summary.links += ids.len();

            let outcome = self
                .planning
                .wait_for_links_completion(operation_id, &ids, self.config.wait_for_result, None)
                .await?;
            if outcome == WaitOutcome::Stopped {
                stopped = true;
                break;
            }
        }

        if !stopped {
            summary.cleanup_links = self.cleanup(operation_id).await?;
        }
        self.close(operation_id, summary.links + summary.cleanup_links)
            .await?;
        Ok(summary)
    }

    async fn load(&self, operation_id: &str) -> Result<Operation, StoreError> {
        self.store
            .find_operation(operation_id)
            .await?
            .ok_or_else(|| StoreError::not_found("operation", operation_id))
    }

    /// Queue every cleanup command of every successful link, then wait for
    /// them up to the cleanup timeout.
    async fn cleanup(&self, operation_id: &str) -> Result<usize, StoreError> {
        let operation = self.load(operation_id).await?;
        let chain = self.store.links(&operation.chain).await?;

        let mut ids = Vec::new();
        for link in chain
            .iter()
            .filter(|l| !l.cleanup && l.status == LinkStatus::Success)
        {
            if link.executor.cleanup.is_empty() {
                continue;
            }
            let Some(agent) = self.store.find_agent(&link.paw).await? else {
                continue;
            };
            for command in &link.executor.cleanup {
                let mut executor = link.executor.clone();
                executor.command = command.clone();
                let mut cleanup = Link::for_agent(&agent, link.ability.clone(), executor);
                cleanup.cleanup = true;
                let cleanup = self.planning.apply(&operation, &agent, cleanup).await?;
                ids.push(cleanup.id);
            }
        }

        if ids.is_empty() {
            return Ok(0);
        }
        info!(operation = %operation.name, count = ids.len(), "Cleanup links queued");
        let timeout = Duration::from_secs(self.config.cleanup_timeout_secs);
        let outcome = self
            .planning
            .wait_for_links_completion(operation_id, &ids, self.config.wait_for_result, Some(timeout))
            .await?;
        if outcome == WaitOutcome::TimedOut {
            warn!(operation = %operation.name, "Cleanup did not complete before the timeout");
        }
        Ok(ids.len())
    }

    async fn close(&self, operation_id: &str, links: usize) -> Result<(), StoreError> {
        let now = Utc::now();
        let operation = self
            .store
            .modify_operation(operation_id, &mut |op| {
                op.state = OperationState::Finished;
                if op.finish.is_none() {
                    op.finish = Some(now);
                }
            })
            .await?;
        info!(operation = %operation.name, links, "Operation finished");
        self.events.fire_event(DomainEvent::OperationFinished {
            operation_id: operation.id,
            name: operation.name,
            links,
            timestamp: now,
        });
        Ok(())
    }
}
