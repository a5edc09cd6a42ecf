//! Secure communications between the worker node and the guest.
//!
//! The tunnel itself is provided by a [`SecureComms`] implementation. This module holds its
//! contract, the forwarding rules it is configured with and the key material it needs.

mod kbs;
mod rules;
mod secrets;
mod tunnel;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use kbs::*;
pub use rules::*;
pub use secrets::*;
pub use tunnel::*;
