//! Operation workflow: planning, the per-operation run loop, and the
//! background watchdog that times out abandoned links.
//!
//! - [`planning::PlanningService`] generates candidate links for an agent,
//!   applies decisions to an operation's chain, and waits for completion.
//! - [`planner::AtomicPlanner`] picks at most one link per agent per pass.
//! - [`runner::OperationRunner`] drives an operation from start to finish.
//! - [`watchdog::Watchdog`] sweeps for overdue links and silent agents.

pub mod planner;
pub mod planning;
pub mod runner;
pub mod watchdog;

pub use planner::{AtomicPlanner, Decision, Planner};
pub use planning::{PlanningService, WaitOutcome};
pub use runner::{OperationRunner, RunSummary};
pub use watchdog::{SweepReport, Watchdog};
