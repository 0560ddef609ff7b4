//! Orchestration of the plugin lifecycle.
//!
//! The [`Bootstrapper`] moves through
//! `Idle -> WaitingForOwner -> Bootstrapping -> Running -> ShuttingDown -> Idle`,
//! composing the session, catalog, container and time-sliced batches.

mod bootstrapper;
mod host;
mod state;

pub use bootstrapper::Bootstrapper;
pub use host::{ErrorSink, ErrorSinkFactory, HostServices};
pub use state::{OrchestratorState, RuntimeReport, SessionSummary};
