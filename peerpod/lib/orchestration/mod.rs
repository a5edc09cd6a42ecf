//! The sandbox lifecycle orchestrator.
//!
//! [`Orchestrator`] owns one record per sandbox and moves it through
//! `creating → created → starting → ready → stopping → stopped`, with `failed` reachable from a
//! failed start. CreateVM, StartVM and StopVM live in their own files as `impl Orchestrator`
//! blocks.

mod create;
mod orchestrator;
mod report;
mod sandbox;
mod start;
mod status;
mod stop;
mod utils;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use create::{CreateVmRequest, CreateVmResponse};
pub use orchestrator::*;
pub use report::*;
pub use sandbox::{SandboxState, SandboxStatus};
