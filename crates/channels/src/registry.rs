//! Contact registry: every channel agents can beacon through.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use redline_core::Contact;
use redline_core::error::ContactError;
use tracing::{debug, error, warn};

/// Registered contacts, keyed by name.
pub struct ContactRegistry {
    contacts: HashMap<String, Arc<dyn Contact>>,
}

impl Default for ContactRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactRegistry {
    pub fn new() -> Self {
        Self {
            contacts: HashMap::new(),
        }
    }

    /// Register a contact. A later registration under the same name wins.
    pub fn register(&mut self, contact: Arc<dyn Contact>) {
        let name = contact.name().to_string();
        debug!(contact = %name, "Registered contact");
        self.contacts.insert(name, contact);
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn Contact>, ContactError> {
        self.contacts
            .get(name)
            .ok_or_else(|| ContactError::NotRegistered(name.to_string()))
    }

    /// Registered contact names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.contacts.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Start every contact concurrently. A contact that fails to start is
    /// logged and skipped; the names of those that started are returned.
    pub async fn start_all(&self) -> Vec<String> {
        let starts = self.contacts.iter().map(|(name, contact)| async move {
            (name.clone(), contact.start().await)
        });

        let mut started = Vec::new();
        for (name, outcome) in join_all(starts).await {
            match outcome {
                Ok(()) => started.push(name),
                Err(e) => error!(contact = %name, error = %e, "Failed to start contact"),
            }
        }
        started.sort();
        started
    }

    pub async fn stop_all(&self) {
        for (name, contact) in &self.contacts {
            if let Err(e) = contact.stop().await {
                warn!(contact = %name, error = %e, "Failed to stop contact");
            }
        }
    }
}
