//! Agents: remote execution endpoints identified by a paw.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::encoding::lenient;
use crate::result::LinkResult;

/// Group assigned to agents that do not declare one.
pub const DEFAULT_GROUP: &str = "red";

const PAW_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const PAW_LEN: usize = 6;

/// Server-side defaults applied to newly registered agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDefaults {
    pub sleep_min: u32,
    pub sleep_max: u32,
    pub watchdog: u32,
    /// `exe_name` for agents that do not report one.
    pub implant_name: String,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            sleep_min: 30,
            sleep_max: 60,
            watchdog: 0,
            implant_name: "splunkd".into(),
        }
    }
}

/// An executor reassignment queued by an operator and delivered on the
/// agent's next beacon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorChange {
    pub action: String,
    pub executor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// The decoded beacon body: what an agent says about itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentProfile {
    #[serde(default)]
    pub paw: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub executors: Option<Vec<String>>,
    #[serde(default)]
    pub privilege: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub exe_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub pid: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub ppid: Option<i64>,
    #[serde(default)]
    pub deadman_enabled: Option<bool>,
    #[serde(default)]
    pub results: Vec<LinkResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub paw: String,
    pub host: String,
    pub platform: String,
    /// Targeting scope; empty matches every operation.
    pub group: String,
    pub privilege: String,
    pub contact: String,
    /// Channel the agent has been asked to migrate to. Equal to `contact`
    /// when no migration is pending.
    pub pending_contact: String,
    /// Executors in the agent's preference order.
    #[serde(default)]
    pub executors: Vec<String>,
    pub sleep_min: u32,
    pub sleep_max: u32,
    pub watchdog: u32,
    pub trusted: bool,
    /// Set when the watchdog, not an operator, revoked trust. The next
    /// beacon restores it.
    #[serde(default)]
    pub silenced: bool,
    /// Links run outside any operation (bootstrap, deadman).
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid: Option<i64>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub exe_name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub deadman_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_executor_change: Option<ExecutorChange>,
    pub created: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Agent {
    /// Register a new agent. The paw is always server-assigned; whatever the
    /// caller put in `profile.paw` is ignored.
    pub fn from_profile(profile: &AgentProfile, defaults: AgentDefaults) -> Self {
        let now = Utc::now();
        let contact = profile.contact.clone().unwrap_or_default();
        Self {
            paw: generate_paw(),
            host: profile.host.clone().unwrap_or_default(),
            platform: profile.platform.clone().unwrap_or_default(),
            group: profile.group.clone().unwrap_or_else(|| DEFAULT_GROUP.into()),
            privilege: profile.privilege.clone().unwrap_or_else(|| "User".into()),
            pending_contact: contact.clone(),
            contact,
            executors: profile.executors.clone().unwrap_or_default(),
            sleep_min: defaults.sleep_min,
            sleep_max: defaults.sleep_max,
            watchdog: defaults.watchdog,
            trusted: true,
            silenced: false,
            links: Vec::new(),
            pid: profile.pid,
            ppid: profile.ppid,
            username: profile.username.clone().unwrap_or_default(),
            architecture: profile.architecture.clone().unwrap_or_default(),
            exe_name: profile
                .exe_name
                .clone()
                .unwrap_or(defaults.implant_name),
            location: profile.location.clone().unwrap_or_default(),
            server: profile.server.clone().unwrap_or_default(),
            deadman_enabled: profile.deadman_enabled.unwrap_or(false),
            pending_executor_change: None,
            created: now,
            last_seen: now,
        }
    }

    /// Refresh liveness and any metadata the agent supplied.
    pub fn heartbeat_modification(&mut self, profile: &AgentProfile) {
        self.last_seen = Utc::now();
        if self.silenced {
            self.trusted = true;
            self.silenced = false;
        }

        fn refresh(field: &mut String, value: &Option<String>) {
            if let Some(v) = value {
                field.clone_from(v);
            }
        }

        refresh(&mut self.host, &profile.host);
        refresh(&mut self.platform, &profile.platform);
        refresh(&mut self.group, &profile.group);
        refresh(&mut self.privilege, &profile.privilege);
        refresh(&mut self.username, &profile.username);
        refresh(&mut self.architecture, &profile.architecture);
        refresh(&mut self.exe_name, &profile.exe_name);
        refresh(&mut self.location, &profile.location);
        refresh(&mut self.server, &profile.server);

        if let Some(contact) = &profile.contact {
            // A beacon over the pending channel completes the migration.
            let migrating = self.pending_contact == self.contact || self.pending_contact == *contact;
            self.contact.clone_from(contact);
            if migrating {
                self.pending_contact.clone_from(contact);
            }
        }
        if let Some(executors) = &profile.executors {
            self.executors.clone_from(executors);
        }
        if profile.pid.is_some() {
            self.pid = profile.pid;
        }
        if profile.ppid.is_some() {
            self.ppid = profile.ppid;
        }
        if let Some(deadman) = profile.deadman_enabled {
            self.deadman_enabled = deadman;
        }
    }

    /// Sleep interval for the next beacon, uniform in `[sleep_min, sleep_max]`.
    pub fn calculate_sleep(&self) -> u32 {
        let (lo, hi) = if self.sleep_min <= self.sleep_max {
            (self.sleep_min, self.sleep_max)
        } else {
            (self.sleep_max, self.sleep_min)
        };
        rand::rng().random_range(lo..=hi)
    }

    /// Take the queued executor change, if any. Delivered exactly once.
    pub fn assign_pending_executor_change(&mut self) -> Option<ExecutorChange> {
        self.pending_executor_change.take()
    }

    pub fn has_pending_contact(&self) -> bool {
        self.pending_contact != self.contact
    }

    /// Substitute `#{paw}`, `#{group}`, `#{server}`, `#{location}`,
    /// `#{exe_name}` and `#{platform}` in a command template.
    pub fn render_command(&self, template: &str) -> String {
        [
            ("#{paw}", self.paw.as_str()),
            ("#{group}", self.group.as_str()),
            ("#{server}", self.server.as_str()),
            ("#{location}", self.location.as_str()),
            ("#{exe_name}", self.exe_name.as_str()),
            ("#{platform}", self.platform.as_str()),
        ]
        .iter()
        .fold(template.to_string(), |command, (variable, value)| {
            command.replace(variable, value)
        })
    }

    /// Operation group matching: equal groups, or either side is the wildcard.
    pub fn matches_group(&self, operation_group: &str) -> bool {
        operation_group == self.group || operation_group.is_empty() || self.group.is_empty()
    }
}

fn generate_paw() -> String {
    let mut rng = rand::rng();
    (0..PAW_LEN)
        .map(|_| PAW_ALPHABET[rng.random_range(0..PAW_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> AgentProfile {
        AgentProfile {
            paw: Some("chosen-by-caller".into()),
            platform: Some("linux".into()),
            host: Some("web-01".into()),
            contact: Some("http".into()),
            executors: Some(vec!["sh".into()]),
            ..AgentProfile::default()
        }
    }

    #[test]
    fn new_agent_gets_server_assigned_paw() {
        let agent = Agent::from_profile(&profile(), AgentDefaults::default());
        assert_ne!(agent.paw, "chosen-by-caller");
        assert_eq!(agent.paw.len(), PAW_LEN);
        assert_eq!(agent.group, DEFAULT_GROUP);
        assert_eq!(agent.pending_contact, "http");
        assert!(agent.trusted);
    }

    #[test]
    fn heartbeat_refreshes_supplied_fields_only() {
        let mut agent = Agent::from_profile(&profile(), AgentDefaults::default());
        let update = AgentProfile {
            group: Some("blue".into()),
            ..AgentProfile::default()
        };
        agent.heartbeat_modification(&update);
        assert_eq!(agent.group, "blue");
        assert_eq!(agent.host, "web-01");
        assert_eq!(agent.executors, vec!["sh".to_string()]);
    }

    #[test]
    fn beacon_over_pending_contact_completes_migration() {
        let mut agent = Agent::from_profile(&profile(), AgentDefaults::default());
        agent.pending_contact = "dns".into();
        assert!(agent.has_pending_contact());

        agent.heartbeat_modification(&AgentProfile {
            contact: Some("http".into()),
            ..AgentProfile::default()
        });
        assert!(agent.has_pending_contact());

        agent.heartbeat_modification(&AgentProfile {
            contact: Some("dns".into()),
            ..AgentProfile::default()
        });
        assert!(!agent.has_pending_contact());
        assert_eq!(agent.contact, "dns");
    }

    #[test]
    fn sleep_within_bounds() {
        let agent = Agent::from_profile(
            &profile(),
            AgentDefaults {
                sleep_min: 5,
                sleep_max: 9,
                ..AgentDefaults::default()
            },
        );
        for _ in 0..100 {
            let s = agent.calculate_sleep();
            assert!((5..=9).contains(&s));
        }
    }

    #[test]
    fn executor_change_delivered_once() {
        let mut agent = Agent::from_profile(&profile(), AgentDefaults::default());
        agent.pending_executor_change = Some(ExecutorChange {
            action: "remove".into(),
            executor: "sh".into(),
            value: None,
        });
        assert!(agent.assign_pending_executor_change().is_some());
        assert!(agent.assign_pending_executor_change().is_none());
    }

    #[test]
    fn renders_agent_variables() {
        let mut agent = Agent::from_profile(&profile(), AgentDefaults::default());
        agent.server = "http://10.0.0.1:8888".into();
        let rendered = agent.render_command("curl #{server}/file -H 'paw: #{paw}' #{unknown}");
        assert_eq!(
            rendered,
            format!("curl http://10.0.0.1:8888/file -H 'paw: {}' #{{unknown}}", agent.paw)
        );
    }

    #[test]
    fn exe_name_falls_back_to_implant_name() {
        let agent = Agent::from_profile(&profile(), AgentDefaults::default());
        assert_eq!(agent.render_command("#{exe_name} -v"), "splunkd -v");

        let named = AgentProfile {
            exe_name: Some("sandcat.go".into()),
            ..profile()
        };
        let defaults = AgentDefaults {
            implant_name: "beacond".into(),
            ..AgentDefaults::default()
        };
        assert_eq!(Agent::from_profile(&named, defaults.clone()).exe_name, "sandcat.go");
        assert_eq!(Agent::from_profile(&profile(), defaults).exe_name, "beacond");
    }

    #[test]
    fn beacon_restores_trust_revoked_for_silence() {
        let mut agent = Agent::from_profile(&profile(), AgentDefaults::default());
        agent.trusted = false;
        agent.silenced = true;
        agent.heartbeat_modification(&AgentProfile::default());
        assert!(agent.trusted);
        assert!(!agent.silenced);
    }

    #[test]
    fn operator_untrust_survives_beacons() {
        let mut agent = Agent::from_profile(&profile(), AgentDefaults::default());
        agent.trusted = false;
        agent.heartbeat_modification(&AgentProfile::default());
        assert!(!agent.trusted);
    }

    #[test]
    fn group_wildcards() {
        let mut agent = Agent::from_profile(&profile(), AgentDefaults::default());
        agent.group = "red".into();
        assert!(agent.matches_group("red"));
        assert!(agent.matches_group(""));
        assert!(!agent.matches_group("blue"));
        agent.group = String::new();
        assert!(agent.matches_group("blue"));
    }
}
