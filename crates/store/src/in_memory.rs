//! In-memory data store.
//!
//! Each collection is a sharded `DashMap`, so edits to one agent or link
//! only contend with edits that hash to the same shard; there is no global
//! lock on the beacon path. Insertion order is tracked with a sequence
//! number so listings are stable (oldest first).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use redline_core::error::StoreError;
use redline_core::store::{AgentEdit, DataStore, LinkEdit, OperationEdit};
use redline_core::{Ability, Adversary, Agent, Fact, Link, Operation};
use tokio::sync::{Notify, RwLock};
use tracing::debug;

struct Sequenced<T> {
    seq: u64,
    value: T,
}

/// A keyed collection that remembers insertion order.
struct Table<T> {
    kind: &'static str,
    rows: DashMap<String, Sequenced<T>>,
    next_seq: AtomicU64,
}

impl<T: Clone> Table<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            rows: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    fn insert(&self, key: String, value: T) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.rows.insert(key, Sequenced { seq, value });
    }

    fn insert_new(&self, key: String, value: T) -> Result<(), StoreError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match self.rows.entry(key) {
            Entry::Occupied(e) => Err(StoreError::Conflict {
                kind: self.kind,
                id: e.key().clone(),
            }),
            Entry::Vacant(e) => {
                e.insert(Sequenced { seq, value });
                Ok(())
            }
        }
    }

    fn get(&self, key: &str) -> Option<T> {
        self.rows.get(key).map(|row| row.value.clone())
    }

    /// Run `edit` while holding the row's shard lock.
    fn modify<R>(&self, key: &str, edit: impl FnOnce(&mut T) -> R) -> Result<(R, T), StoreError> {
        let mut row = self
            .rows
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(self.kind, key))?;
        let outcome = edit(&mut row.value);
        Ok((outcome, row.value.clone()))
    }

    fn ordered(&self) -> Vec<T> {
        let mut rows: Vec<(u64, T)> = self
            .rows
            .iter()
            .map(|row| (row.seq, row.value.clone()))
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, v)| v).collect()
    }
}

/// Process-local store for agents, content, operations, links and facts.
pub struct InMemoryStore {
    agents: Table<Agent>,
    abilities: Table<Ability>,
    adversaries: Table<Adversary>,
    operations: Table<Operation>,
    links: Table<Link>,
    facts: RwLock<Vec<Fact>>,
    link_changes: Arc<Notify>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            agents: Table::new("agent"),
            abilities: Table::new("ability"),
            adversaries: Table::new("adversary"),
            operations: Table::new("operation"),
            links: Table::new("link"),
            facts: RwLock::new(Vec::new()),
            link_changes: Arc::new(Notify::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find_agent(&self, paw: &str) -> Result<Option<Agent>, StoreError> {
        Ok(self.agents.get(paw))
    }

    async fn store_agent(&self, agent: Agent) -> Result<Agent, StoreError> {
        self.agents.insert_new(agent.paw.clone(), agent.clone())?;
        debug!(paw = %agent.paw, "Agent stored");
        Ok(agent)
    }

    async fn modify_agent(&self, paw: &str, edit: AgentEdit<'_>) -> Result<Agent, StoreError> {
        let ((), agent) = self.agents.modify(paw, |a| edit(a))?;
        Ok(agent)
    }

    async fn agents(&self) -> Result<Vec<Agent>, StoreError> {
        Ok(self.agents.ordered())
    }

    async fn store_ability(&self, ability: Ability) -> Result<(), StoreError> {
        self.abilities.insert(ability.ability_id.clone(), ability);
        Ok(())
    }

    async fn find_ability(&self, ability_id: &str) -> Result<Option<Ability>, StoreError> {
        Ok(self.abilities.get(ability_id))
    }

    async fn abilities(&self) -> Result<Vec<Ability>, StoreError> {
        Ok(self.abilities.ordered())
    }

    async fn store_adversary(&self, adversary: Adversary) -> Result<(), StoreError> {
        self.adversaries.insert(adversary.adversary_id.clone(), adversary);
        Ok(())
    }

    async fn find_adversary(&self, adversary_id: &str) -> Result<Option<Adversary>, StoreError> {
        Ok(self.adversaries.get(adversary_id))
    }

    async fn adversaries(&self) -> Result<Vec<Adversary>, StoreError> {
        Ok(self.adversaries.ordered())
    }

    async fn store_operation(&self, operation: Operation) -> Result<Operation, StoreError> {
        self.operations
            .insert_new(operation.id.clone(), operation.clone())?;
        Ok(operation)
    }

    async fn find_operation(&self, id: &str) -> Result<Option<Operation>, StoreError> {
        Ok(self.operations.get(id))
    }

    async fn modify_operation(
        &self,
        id: &str,
        edit: OperationEdit<'_>,
    ) -> Result<Operation, StoreError> {
        let ((), operation) = self.operations.modify(id, |op| edit(op))?;
        Ok(operation)
    }

    async fn operations(&self) -> Result<Vec<Operation>, StoreError> {
        Ok(self.operations.ordered())
    }

    async fn store_link(&self, link: Link) -> Result<Link, StoreError> {
        self.links.insert_new(link.id.clone(), link.clone())?;
        self.link_changes.notify_waiters();
        Ok(link)
    }

    async fn find_link(&self, id: &str) -> Result<Option<Link>, StoreError> {
        Ok(self.links.get(id))
    }

    async fn modify_link(&self, id: &str, edit: LinkEdit<'_>) -> Result<Option<Link>, StoreError> {
        let (changed, link) = self.links.modify(id, |l| edit(l))?;
        if changed {
            self.link_changes.notify_waiters();
            Ok(Some(link))
        } else {
            Ok(None)
        }
    }

    async fn links(&self, ids: &[String]) -> Result<Vec<Link>, StoreError> {
        Ok(ids.iter().filter_map(|id| self.links.get(id)).collect())
    }

    async fn all_links(&self) -> Result<Vec<Link>, StoreError> {
        Ok(self.links.ordered())
    }

    fn link_changes(&self) -> Arc<Notify> {
        self.link_changes.clone()
    }

    async fn store_facts(&self, facts: Vec<Fact>) -> Result<usize, StoreError> {
        let mut stored = self.facts.write().await;
        let mut added = 0;
        for fact in facts {
            let duplicate = stored
                .iter()
                .any(|f| f.same_as(&fact) && f.source_link == fact.source_link);
            if !duplicate {
                stored.push(fact);
                added += 1;
            }
        }
        Ok(added)
    }

    async fn facts_by_agent(&self, paw: &str) -> Result<Vec<Fact>, StoreError> {
        let facts = self.facts.read().await;
        Ok(facts
            .iter()
            .filter(|f| f.collected_by.as_deref() == Some(paw))
            .cloned()
            .collect())
    }

    async fn facts_by_links(&self, link_ids: &[String]) -> Result<Vec<Fact>, StoreError> {
        let facts = self.facts.read().await;
        Ok(facts
            .iter()
            .filter(|f| {
                f.source_link
                    .as_ref()
                    .is_some_and(|id| link_ids.contains(id))
            })
            .cloned()
            .collect())
    }
}
