//! Storage traits: the data store for agents, operations and links, and
//! the blob store for command results.
//!
//! Mutations go through `modify_*` closures so an implementation can apply
//! them atomically per key (per paw, per link id, per operation id) without
//! a global lock.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::ability::Ability;
use crate::agent::Agent;
use crate::error::{ResultStoreError, StoreError};
use crate::fact::Fact;
use crate::link::Link;
use crate::operation::{Adversary, Operation};

/// Closure applied to a stored agent under its per-key lock.
pub type AgentEdit<'a> = &'a mut (dyn FnMut(&mut Agent) + Send);

/// Closure applied to a stored operation under its per-key lock.
pub type OperationEdit<'a> = &'a mut (dyn FnMut(&mut Operation) + Send);

/// Closure applied to a stored link under its per-key lock. Returns whether
/// it changed anything.
pub type LinkEdit<'a> = &'a mut (dyn FnMut(&mut Link) -> bool + Send);

#[async_trait]
pub trait DataStore: Send + Sync {
    /// The backend name (e.g., "memory").
    fn name(&self) -> &str;

    // --- Agents ---

    async fn find_agent(&self, paw: &str) -> Result<Option<Agent>, StoreError>;

    /// Insert a new agent. Fails with `Conflict` if the paw is taken.
    async fn store_agent(&self, agent: Agent) -> Result<Agent, StoreError>;

    /// Apply `edit` atomically and return the updated agent.
    async fn modify_agent(&self, paw: &str, edit: AgentEdit<'_>) -> Result<Agent, StoreError>;

    /// All agents, oldest first.
    async fn agents(&self) -> Result<Vec<Agent>, StoreError>;

    // --- Abilities & adversaries ---

    async fn store_ability(&self, ability: Ability) -> Result<(), StoreError>;

    async fn find_ability(&self, ability_id: &str) -> Result<Option<Ability>, StoreError>;

    async fn abilities(&self) -> Result<Vec<Ability>, StoreError>;

    async fn store_adversary(&self, adversary: Adversary) -> Result<(), StoreError>;

    async fn find_adversary(&self, adversary_id: &str) -> Result<Option<Adversary>, StoreError>;

    async fn adversaries(&self) -> Result<Vec<Adversary>, StoreError>;

    // --- Operations ---

    async fn store_operation(&self, operation: Operation) -> Result<Operation, StoreError>;

    async fn find_operation(&self, id: &str) -> Result<Option<Operation>, StoreError>;

    async fn modify_operation(
        &self,
        id: &str,
        edit: OperationEdit<'_>,
    ) -> Result<Operation, StoreError>;

    /// All operations, oldest first.
    async fn operations(&self) -> Result<Vec<Operation>, StoreError>;

    /// Operations with no finish timestamp, oldest first.
    async fn open_operations(&self) -> Result<Vec<Operation>, StoreError> {
        Ok(self
            .operations()
            .await?
            .into_iter()
            .filter(Operation::is_open)
            .collect())
    }

    // --- Links ---

    async fn store_link(&self, link: Link) -> Result<Link, StoreError>;

    async fn find_link(&self, id: &str) -> Result<Option<Link>, StoreError>;

    /// Apply `edit` atomically. Returns the updated link when the edit
    /// reported a change, `None` when it declined.
    async fn modify_link(&self, id: &str, edit: LinkEdit<'_>) -> Result<Option<Link>, StoreError>;

    /// Fetch links by id, preserving the order of `ids`. Unknown ids are skipped.
    async fn links(&self, ids: &[String]) -> Result<Vec<Link>, StoreError>;

    /// Every stored link (operation and agent-attached).
    async fn all_links(&self) -> Result<Vec<Link>, StoreError>;

    /// Signalled whenever a link is stored or modified.
    fn link_changes(&self) -> Arc<Notify>;

    // --- Facts ---

    async fn store_facts(&self, facts: Vec<Fact>) -> Result<usize, StoreError>;

    async fn facts_by_agent(&self, paw: &str) -> Result<Vec<Fact>, StoreError>;

    async fn facts_by_links(&self, link_ids: &[String]) -> Result<Vec<Fact>, StoreError>;

    /// An operation's seed facts followed by every fact its chain produced.
    async fn all_facts(&self, operation: &Operation) -> Result<Vec<Fact>, StoreError> {
        let mut facts = operation.source.clone();
        facts.extend(self.facts_by_links(&operation.chain).await?);
        Ok(facts)
    }
}

/// Durable command-result blobs, keyed by link id. Append-only per id.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn write_result_file(&self, link_id: &str, blob: &str) -> Result<(), ResultStoreError>;

    /// Fails with `NotFound` if nothing was written for `link_id`.
    async fn read_result_file(&self, link_id: &str) -> Result<String, ResultStoreError>;
}
