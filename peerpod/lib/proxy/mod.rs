//! The per-sandbox agent proxy.
//!
//! An agent proxy listens on a local socket and forwards every connection to the agent running in
//! the sandbox's instance. The orchestrator runs [`AgentProxy::start`] in the background, waits for
//! its [`Readiness`] to fire, and calls [`AgentProxy::shutdown`] exactly once when the sandbox goes
//! away.

mod agent;
mod readiness;
mod socket;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use agent::*;
pub use readiness::*;
pub use socket::*;
