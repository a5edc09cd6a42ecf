//! Configuration types and helpers.

mod defaults;
mod orchestrator;
mod validate;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use orchestrator::*;
