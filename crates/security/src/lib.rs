//! Security module for redline: agent identifier hygiene and beacon auditing.
//!
//! Provides:
//! - **Paw sanitizing**: strip untrusted identifiers to a safe alphabet
//! - **Beacon report**: per-contact log of what each agent was handed

pub mod audit;
pub mod sanitize;

pub use audit::{AuditSink, BeaconLog, BeaconReport, TracingSink};
pub use sanitize::sanitize_paw;
