//! Beacon audit report: which agent was handed which commands, per contact.
//!
//! Recording never blocks a heartbeat for longer than a short critical
//! section and never fails. Each contact keeps at most `capacity` entries;
//! the oldest are dropped first.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One beacon's worth of delivered work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconLog {
    pub paw: String,
    /// Decoded command text of every instruction handed out.
    pub instructions: Vec<String>,
    pub date: DateTime<Utc>,
}

/// Where beacon logs are forwarded besides the in-memory report.
pub trait AuditSink: Send + Sync {
    fn record(&self, contact: &str, entry: &BeaconLog);
}

/// Per-contact beacon log, keyed by the upper-cased contact name.
pub struct BeaconReport {
    capacity: usize,
    entries: Mutex<HashMap<String, VecDeque<BeaconLog>>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for BeaconReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let contacts = self.lock().len();
        f.debug_struct("BeaconReport")
            .field("contact_count", &contacts)
            .field("capacity", &self.capacity)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for BeaconReport {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl BeaconReport {
    pub fn new(capacity: usize) -> Self {
        Self::with_sinks(capacity, Vec::new())
    }

    pub fn with_sinks(capacity: usize, sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
            sinks,
        }
    }

    // A poisoned lock only means another recorder panicked mid-push; the
    // deque itself is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<BeaconLog>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a beacon that handed `instructions` to `paw` over `contact`.
    pub fn record(&self, contact: &str, paw: &str, instructions: Vec<String>) {
        let key = contact.to_uppercase();
        let entry = BeaconLog {
            paw: paw.to_string(),
            instructions,
            date: Utc::now(),
        };

        {
            let mut entries = self.lock();
            let log = entries.entry(key.clone()).or_default();
            if log.len() >= self.capacity {
                log.pop_front();
            }
            log.push_back(entry.clone());
        }

        for sink in &self.sinks {
            sink.record(&key, &entry);
        }
    }

    /// Entries for one contact, oldest first. Lookup is case-insensitive.
    pub fn entries(&self, contact: &str) -> Vec<BeaconLog> {
        self.lock()
            .get(&contact.to_uppercase())
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Contacts that have at least one entry.
    pub fn contacts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }
}

/// Forwards beacon logs to `tracing` at debug level.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, contact: &str, entry: &BeaconLog) {
        tracing::debug!(
            contact = %contact,
            paw = %entry.paw,
            instructions = entry.instructions.len(),
            "BEACON"
        );
    }
}
