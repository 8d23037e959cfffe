//! History cataloging orchestration for Archivist.
//!
//! Owns the per-channel job status registry, the history command decision
//! protocol, the worker contract, and a paged reference worker.

pub mod history_command;
pub mod history_job_orchestrator;
pub mod history_job_registry;
pub mod history_reply;
pub mod history_worker;
pub mod paged_history_worker;

pub use history_command::*;
pub use history_job_orchestrator::*;
pub use history_job_registry::*;
pub use history_reply::*;
pub use history_worker::*;
pub use paged_history_worker::*;
