//! Contact service: the beacon orchestrator.
//!
//! `handle_heartbeat` is the single entry point every contact calls with a
//! decoded profile. Heartbeats for the same paw are serialized through a
//! per-paw lock; heartbeats for different agents run concurrently. Each
//! sub-step (registry, results, instructions) fails independently: only a
//! registry failure aborts the beacon, because without an agent there is
//! nothing to reply to.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use redline_config::AgentsConfig;
use redline_core::encoding;
use redline_core::error::StoreError;
use redline_core::{
    Agent, AgentProfile, DataStore, DomainEvent, EventBus, ExecutorChange, Instruction, Link,
    LinkResult, LinkStatus,
};
use redline_security::{BeaconReport, sanitize_paw};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::results::{ApplyOutcome, ResultProcessor};

/// Attempts at drawing an unused paw before giving up.
const PAW_ATTEMPTS: usize = 5;

pub struct ContactService {
    store: Arc<dyn DataStore>,
    results: ResultProcessor,
    events: Arc<EventBus>,
    report: Arc<BeaconReport>,
    agents: AgentsConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ContactService {
    pub fn new(
        store: Arc<dyn DataStore>,
        results: ResultProcessor,
        events: Arc<EventBus>,
        report: Arc<BeaconReport>,
        agents: AgentsConfig,
    ) -> Self {
        Self {
            store,
            results,
            events,
            report,
            agents,
            locks: DashMap::new(),
        }
    }

    pub fn report(&self) -> &Arc<BeaconReport> {
        &self.report
    }

    /// Handle one beacon: register or refresh the agent, ingest `results`,
    /// and return the instructions the agent should run next.
    ///
    /// An agent reporting results gets no new work in the same round trip.
    pub async fn handle_heartbeat(
        &self,
        mut profile: AgentProfile,
        results: Vec<LinkResult>,
    ) -> redline_core::Result<(Agent, Vec<Instruction>)> {
        if let Some(paw) = profile.paw.as_mut() {
            *paw = sanitize_paw(paw);
        }
        let claimed = profile.paw.clone().filter(|p| !p.is_empty());
        let Some(paw) = claimed else {
            return self.heartbeat(profile, None, results).await;
        };

        let lock = self.lock_for(&paw);
        let outcome = {
            let _guard = lock.lock().await;
            self.heartbeat(profile, Some(paw.as_str()), results).await
        };
        drop(lock);
        self.release_lock(&paw);
        outcome
    }

    async fn heartbeat(
        &self,
        profile: AgentProfile,
        claimed: Option<&str>,
        results: Vec<LinkResult>,
    ) -> redline_core::Result<(Agent, Vec<Instruction>)> {
        let existing = match claimed {
            Some(paw) => self.store.find_agent(paw).await?,
            None => None,
        };
        let agent = match existing {
            Some(agent) => {
                debug!(paw = %agent.paw, results = results.len(), "Beacon from known agent");
                let agent = self
                    .store
                    .modify_agent(&agent.paw, &mut |a| a.heartbeat_modification(&profile))
                    .await?;
                self.add_agent_to_operations(&agent).await;
                agent
            }
            None => self.register_agent(&profile).await?,
        };

        if !results.is_empty() {
            for result in results {
                let link_id = result.id.clone();
                if let ApplyOutcome::Applied { link, access } =
                    self.results.apply(result, &agent.paw).await
                {
                    self.events.fire_event(DomainEvent::LinkCompleted {
                        paw: agent.paw.clone(),
                        link_id,
                        pid: link.pid.unwrap_or_default(),
                        status: link.status.code(),
                        access,
                        timestamp: Utc::now(),
                    });
                }
            }
            debug!(paw = %agent.paw, "Results received, returning no instructions");
            self.record(&agent, &[]);
            return Ok((agent, Vec::new()));
        }

        let instructions = match self.get_instructions(&agent).await {
            Ok(instructions) => instructions,
            Err(e) => {
                error!(paw = %agent.paw, error = %e, "Instruction computation failed");
                Vec::new()
            }
        };
        debug!(paw = %agent.paw, count = instructions.len(), "Returning instructions");
        self.record(&agent, &instructions);
        Ok((agent, instructions))
    }

    /// Collect every instructable link for `agent`: EXECUTE links in open
    /// operations (chain order), then links attached to the agent itself.
    /// Each link is stamped collected before it is returned, so it is
    /// delivered at most once.
    pub async fn get_instructions(&self, agent: &Agent) -> Result<Vec<Instruction>, StoreError> {
        let mut candidates: Vec<(String, bool)> = Vec::new();
        for op in self.store.open_operations().await? {
            for link in self.store.links(&op.chain).await? {
                if link.paw == agent.paw && link.is_instructable() {
                    candidates.push((link.id, true));
                }
            }
        }
        for link in self.store.links(&agent.links).await? {
            if link.collect.is_none() {
                candidates.push((link.id, false));
            }
        }

        let mut instructions = Vec::with_capacity(candidates.len());
        for (link_id, in_operation) in candidates {
            match self.collect(&link_id, &agent.paw, in_operation).await {
                Ok(Some(link)) => {
                    debug!(paw = %agent.paw, link_id = %link.id, ability = %link.ability.name, "Link collected");
                    instructions.push(Instruction::from_link(&link));
                }
                Ok(None) => {}
                Err(e) => warn!(link_id = %link_id, error = %e, "Could not collect link"),
            }
        }
        Ok(instructions)
    }

    /// Take the agent's queued executor change, delivering it once.
    pub async fn take_executor_change(&self, paw: &str) -> Option<ExecutorChange> {
        let mut change = None;
        let outcome = self
            .store
            .modify_agent(paw, &mut |a| {
                if change.is_none() {
                    change = a.assign_pending_executor_change();
                }
            })
            .await;
        if let Err(e) = outcome {
            warn!(paw, error = %e, "Could not read pending executor change");
        }
        change
    }

    /// Stamp `collect` unless another beacon got there first.
    async fn collect(
        &self,
        link_id: &str,
        paw: &str,
        in_operation: bool,
    ) -> Result<Option<Link>, StoreError> {
        let now = Utc::now();
        self.store
            .modify_link(link_id, &mut |l| {
                let eligible = l.paw == paw
                    && l.collect.is_none()
                    && (!in_operation || l.status == LinkStatus::Execute);
                if eligible {
                    l.collect = Some(now);
                }
                eligible
            })
            .await
    }

    async fn register_agent(&self, profile: &AgentProfile) -> Result<Agent, StoreError> {
        let mut agent = self.store_new_agent(profile).await?;
        info!(paw = %agent.paw, host = %agent.host, group = %agent.group, contact = %agent.contact, "New agent");

        self.add_agent_to_operations(&agent).await;

        let mut seeded = self
            .seed_links(&agent, &self.agents.bootstrap_abilities, false)
            .await;
        if agent.deadman_enabled {
            debug!(paw = %agent.paw, "Agent accepts deadman abilities");
            seeded.extend(
                self.seed_links(&agent, &self.agents.deadman_abilities, true)
                    .await,
            );
        }
        if !seeded.is_empty() {
            agent = self
                .store
                .modify_agent(&agent.paw, &mut |a| a.links.extend(seeded.iter().cloned()))
                .await?;
        }

        self.events.fire_event(DomainEvent::AgentAdded {
            paw: agent.paw.clone(),
            host: agent.host.clone(),
            group: agent.group.clone(),
            contact: agent.contact.clone(),
            timestamp: Utc::now(),
        });
        Ok(agent)
    }

    async fn store_new_agent(&self, profile: &AgentProfile) -> Result<Agent, StoreError> {
        let mut last = None;
        for _ in 0..PAW_ATTEMPTS {
            let agent = Agent::from_profile(profile, self.agents.defaults());
            match self.store.store_agent(agent).await {
                Ok(agent) => return Ok(agent),
                Err(e @ StoreError::Conflict { .. }) => last = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| StoreError::Storage("could not allocate a paw".into())))
    }

    /// Create agent-attached links for `ability_ids`. Abilities with no
    /// executor usable by the agent are skipped.
    async fn seed_links(&self, agent: &Agent, ability_ids: &[String], deadman: bool) -> Vec<String> {
        let mut ids = Vec::new();
        for ability_id in ability_ids {
            let ability = match self.store.find_ability(ability_id).await {
                Ok(Some(ability)) => ability,
                Ok(None) => {
                    warn!(ability = %ability_id, "Seed ability not found");
                    continue;
                }
                Err(e) => {
                    error!(ability = %ability_id, error = %e, "Seed ability lookup failed");
                    continue;
                }
            };
            let Some(executor) = ability.executor_for(&agent.platform, &agent.executors).cloned()
            else {
                debug!(paw = %agent.paw, ability = %ability_id, "No usable executor for seed ability");
                continue;
            };
            let mut link = Link::for_agent(agent, ability, executor);
            link.deadman = deadman;
            match self.store.store_link(link).await {
                Ok(link) => ids.push(link.id),
                Err(e) => error!(paw = %agent.paw, error = %e, "Failed to store seed link"),
            }
        }
        ids
    }

    /// Attach the agent to every open operation whose group matches.
    /// Runs on every heartbeat so late joiners and regrouped agents are
    /// picked up by operations already in flight.
    pub async fn add_agent_to_operations(&self, agent: &Agent) {
        let operations = match self.store.open_operations().await {
            Ok(ops) => ops,
            Err(e) => {
                error!(paw = %agent.paw, error = %e, "Could not list operations");
                return;
            }
        };
        for op in operations {
            if !op.includes_agent(agent) || op.agents.contains(&agent.paw) {
                continue;
            }
            let attached = self
                .store
                .modify_operation(&op.id, &mut |o| {
                    o.add_agent(&agent.paw);
                })
                .await;
            match attached {
                Ok(_) => debug!(paw = %agent.paw, operation = %op.name, "Agent attached to operation"),
                Err(e) => warn!(paw = %agent.paw, operation = %op.id, error = %e, "Failed to attach agent"),
            }
        }
    }

    fn lock_for(&self, paw: &str) -> Arc<Mutex<()>> {
        self.locks.entry(paw.to_string()).or_default().clone()
    }

    /// Drop the paw's lock once no other beacon holds or awaits it.
    fn release_lock(&self, paw: &str) {
        self.locks.remove_if(paw, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.len()
    }

    fn record(&self, agent: &Agent, instructions: &[Instruction]) {
        let commands = instructions
            .iter()
            .map(|i| encoding::decode_bytes(&i.command).unwrap_or_default())
            .collect();
        self.report.record(&agent.contact, &agent.paw, commands);
    }
}
