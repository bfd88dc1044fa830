//! Operations: bounded execution contexts driven by an adversary profile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ability::{Ability, DEFAULT_VISIBILITY};
use crate::agent::Agent;
use crate::fact::Fact;
use crate::link::LinkStatus;

/// An adversary profile: the authored order in which abilities should run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adversary {
    pub adversary_id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default)]
    pub atomic_ordering: Vec<String>,
}

impl Adversary {
    /// Position of an ability in the atomic ordering.
    pub fn position(&self, ability_id: &str) -> Option<usize> {
        self.atomic_ordering.iter().position(|id| id == ability_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Running,
    Paused,
    Finished,
}

/// Which side an operation plays for; carried on completion events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    #[default]
    Red,
    Blue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub name: String,
    pub adversary: Adversary,
    /// Agent group this operation targets; empty targets every agent.
    pub group: String,
    #[serde(default = "default_planner")]
    pub planner: String,
    pub state: OperationState,
    #[serde(default = "default_true")]
    pub autonomous: bool,
    #[serde(default = "default_visibility")]
    pub visibility: u32,
    #[serde(default = "default_true")]
    pub use_learning_parsers: bool,
    #[serde(default)]
    pub access: Access,
    /// Seed facts available to every link in the operation.
    #[serde(default)]
    pub source: Vec<Fact>,
    /// Paws of agents attached to this operation, in attachment order.
    #[serde(default)]
    pub agents: Vec<String>,
    /// Link ids in decision order.
    #[serde(default)]
    pub chain: Vec<String>,
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<DateTime<Utc>>,
}

fn default_planner() -> String {
    "atomic".into()
}
fn default_true() -> bool {
    true
}
fn default_visibility() -> u32 {
    DEFAULT_VISIBILITY
}

impl Operation {
    pub fn new(name: impl Into<String>, adversary: Adversary, group: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            adversary,
            group: group.into(),
            planner: default_planner(),
            state: OperationState::Running,
            autonomous: true,
            visibility: DEFAULT_VISIBILITY,
            use_learning_parsers: true,
            access: Access::default(),
            source: Vec::new(),
            agents: Vec::new(),
            chain: Vec::new(),
            start: Utc::now(),
            finish: None,
        }
    }

    /// Open while no finish timestamp has been recorded.
    pub fn is_open(&self) -> bool {
        self.finish.is_none()
    }

    pub fn includes_agent(&self, agent: &Agent) -> bool {
        agent.matches_group(&self.group)
    }

    /// Attach an agent, keeping attachment order. Returns `true` if newly added.
    pub fn add_agent(&mut self, paw: &str) -> bool {
        if self.agents.iter().any(|p| p == paw) {
            return false;
        }
        self.agents.push(paw.to_string());
        true
    }

    /// The status a freshly decided link starts in.
    ///
    /// Untrusted agents and abilities louder than the operation allows are
    /// gated; manual operations hold every link for approval.
    pub fn link_status_for(&self, agent: &Agent, ability: &Ability) -> LinkStatus {
        if !agent.trusted {
            LinkStatus::Untrusted
        } else if ability.visibility > self.visibility {
            LinkStatus::HighViz
        } else if !self.autonomous {
            LinkStatus::Pause
        } else {
            LinkStatus::Execute
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentDefaults, AgentProfile};

    fn ability(visibility: u32) -> Ability {
        Ability {
            ability_id: "a".into(),
            name: "a".into(),
            tactic: String::new(),
            technique: String::new(),
            executors: vec![],
            delete_payload: false,
            visibility,
        }
    }

    fn adversary() -> Adversary {
        Adversary {
            adversary_id: "adv".into(),
            name: "adv".into(),
            description: String::new(),
            atomic_ordering: vec!["a1".into(), "a2".into(), "a3".into()],
        }
    }

    #[test]
    fn gate_policy() {
        let mut op = Operation::new("op", adversary(), "red");
        let mut agent = Agent::from_profile(&AgentProfile::default(), AgentDefaults::default());

        assert_eq!(op.link_status_for(&agent, &ability(50)), LinkStatus::Execute);
        assert_eq!(op.link_status_for(&agent, &ability(90)), LinkStatus::HighViz);

        op.autonomous = false;
        assert_eq!(op.link_status_for(&agent, &ability(50)), LinkStatus::Pause);

        agent.trusted = false;
        assert_eq!(op.link_status_for(&agent, &ability(50)), LinkStatus::Untrusted);
    }

    #[test]
    fn agents_attach_once_in_order() {
        let mut op = Operation::new("op", adversary(), "");
        assert!(op.add_agent("b"));
        assert!(op.add_agent("a"));
        assert!(!op.add_agent("b"));
        assert_eq!(op.agents, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn ordering_positions() {
        let adv = adversary();
        assert_eq!(adv.position("a2"), Some(1));
        assert_eq!(adv.position("zz"), None);
    }
}
