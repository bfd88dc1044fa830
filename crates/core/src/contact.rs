//! Contact trait: the abstraction over beacon transports.
//!
//! A contact is a channel agents beacon through (HTTP, DNS, ...). Every
//! contact decodes its own wire envelope and hands the profile to the
//! contact service; the service never sees transport details.

use async_trait::async_trait;

use crate::error::ContactError;

#[async_trait]
pub trait Contact: Send + Sync {
    /// Channel name agents report in their `contact` field (e.g., "http").
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Begin accepting beacons.
    async fn start(&self) -> Result<(), ContactError>;

    /// Stop accepting beacons.
    async fn stop(&self) -> Result<(), ContactError> {
        Ok(())
    }
}
