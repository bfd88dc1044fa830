//! Links, one (agent, ability, command) unit of work each, and the state
//! machine that governs them.
//!
//! ```text
//!            ┌──────── PAUSE / HIGH_VIZ / UNTRUSTED ───────┐
//!  decide ──►│                                              ├──► DISCARD
//!            └──────────────► EXECUTE ──── collected ───────┘
//!                                │
//!                  result / watchdog
//!                                ▼
//!                 SUCCESS(0) · ERROR(1) · TIMEOUT(124)
//! ```
//!
//! Terminal statuses are sticky: once a link reaches one, no transition
//! leaves it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ability::{Ability, Executor};
use crate::agent::Agent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum LinkStatus {
    Pause,
    Execute,
    Discard,
    Untrusted,
    HighViz,
    Success,
    Error,
    Timeout,
}

impl LinkStatus {
    pub const fn code(self) -> i32 {
        match self {
            LinkStatus::Pause => -1,
            LinkStatus::Discard => -2,
            LinkStatus::Execute => -3,
            LinkStatus::Untrusted => -4,
            LinkStatus::HighViz => -5,
            LinkStatus::Success => 0,
            LinkStatus::Error => 1,
            LinkStatus::Timeout => 124,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => LinkStatus::Pause,
            -2 => LinkStatus::Discard,
            -3 => LinkStatus::Execute,
            -4 => LinkStatus::Untrusted,
            -5 => LinkStatus::HighViz,
            0 => LinkStatus::Success,
            1 => LinkStatus::Error,
            124 => LinkStatus::Timeout,
            _ => return None,
        })
    }

    /// Map a process exit status reported by an agent onto a terminal status.
    pub fn from_reported(status: i64) -> Self {
        match status {
            0 => LinkStatus::Success,
            124 => LinkStatus::Timeout,
            _ => LinkStatus::Error,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, LinkStatus::Success | LinkStatus::Error | LinkStatus::Timeout)
    }

    /// Gate states that will never be handed to an agent unless an operator
    /// intervenes; the planner does not wait on them.
    pub const fn can_ignore(self) -> bool {
        matches!(self, LinkStatus::Discard | LinkStatus::Untrusted | LinkStatus::HighViz)
    }

    pub fn name(self) -> &'static str {
        match self {
            LinkStatus::Pause => "PAUSE",
            LinkStatus::Execute => "EXECUTE",
            LinkStatus::Discard => "DISCARD",
            LinkStatus::Untrusted => "UNTRUSTED",
            LinkStatus::HighViz => "HIGH_VIZ",
            LinkStatus::Success => "SUCCESS",
            LinkStatus::Error => "ERROR",
            LinkStatus::Timeout => "TIMEOUT",
        }
    }
}

impl From<LinkStatus> for i32 {
    fn from(status: LinkStatus) -> i32 {
        status.code()
    }
}

impl TryFrom<i32> for LinkStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, String> {
        LinkStatus::from_code(code).ok_or_else(|| format!("unknown link status {code}"))
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

/// One scheduled unit of work.
///
/// Output is never stored inline: `output` only records that a result blob
/// exists in the result store under this link's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: String,

    /// Owning operation; `None` for agent-attached links (bootstrap, deadman).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    pub paw: String,

    pub ability: Ability,

    pub executor: Executor,

    /// Rendered command, plaintext.
    pub command: String,

    pub status: LinkStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decide: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_reported_time: Option<DateTime<Utc>>,

    /// Seconds the agent should sleep before running the command.
    #[serde(default)]
    pub jitter: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,

    #[serde(default)]
    pub output: bool,

    #[serde(default)]
    pub cleanup: bool,

    #[serde(default)]
    pub deadman: bool,
}

impl Link {
    pub fn new(paw: &str, ability: Ability, executor: Executor, command: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation: None,
            paw: paw.to_string(),
            ability,
            executor,
            command,
            status: LinkStatus::Execute,
            decide: Some(Utc::now()),
            collect: None,
            finish: None,
            agent_reported_time: None,
            jitter: 0,
            pid: None,
            output: false,
            cleanup: false,
            deadman: false,
        }
    }

    /// A link for `agent` with the executor's command rendered against it.
    pub fn for_agent(agent: &Agent, ability: Ability, executor: Executor) -> Self {
        let command = agent.render_command(&executor.command);
        Self::new(&agent.paw, ability, executor, command)
    }

    pub fn ability_id(&self) -> &str {
        &self.ability.ability_id
    }

    /// Eligible to be handed to its agent.
    pub fn is_instructable(&self) -> bool {
        self.status == LinkStatus::Execute && self.collect.is_none()
    }

    /// Nothing more will happen to this link without a result or an operator.
    pub fn is_done(&self, require_result: bool) -> bool {
        self.status.is_terminal()
            || self.status.can_ignore()
            || (!require_result && self.collect.is_some())
    }
}
