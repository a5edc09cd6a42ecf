//! Cloud provider contract and the guest configuration handed to new instances.

mod cloudinit;
mod daemon;
mod provider;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cloudinit::*;
pub use daemon::*;
pub use provider::*;
