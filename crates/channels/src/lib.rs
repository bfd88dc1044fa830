//! Contact handling for redline.
//!
//! Everything between a decoded beacon and the reply an agent receives:
//!
//! - **Service** (`handle_heartbeat`): agent registry, group reconciliation,
//!   result ingestion and instruction computation
//! - **Results**: applies reported results to links, stores output blobs,
//!   dispatches fact learning
//! - **Registry**: the set of contact channels agents can beacon through

pub mod registry;
pub mod results;
pub mod service;

pub use registry::ContactRegistry;
pub use results::{ApplyOutcome, ResultProcessor};
pub use service::ContactService;
