//! # redline core
//!
//! Domain types, traits, and error definitions for the redline C2 server.
//! This crate has **no framework dependencies**; it defines the domain
//! model (agents, operations, links) that the other crates implement against.
//!
//! Collaborators the core consumes (data store, result store, fact learning,
//! output hooks, contacts) are traits here; implementations live in their
//! own crates.

pub mod ability;
pub mod agent;
pub mod contact;
pub mod encoding;
pub mod error;
pub mod event;
pub mod fact;
pub mod instruction;
pub mod learning;
pub mod link;
pub mod operation;
pub mod result;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use ability::{Ability, Executor, ParserMapping, ParserSpec};
pub use agent::{Agent, AgentDefaults, AgentProfile, ExecutorChange};
pub use contact::Contact;
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use fact::Fact;
pub use instruction::Instruction;
pub use learning::{FactLearner, HookRegistry, LinkParser, OutputHook};
pub use link::{Link, LinkStatus};
pub use operation::{Access, Adversary, Operation, OperationState};
pub use result::{CommandResults, LinkResult};
pub use store::{DataStore, ResultStore};
