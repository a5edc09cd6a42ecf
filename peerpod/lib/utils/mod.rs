//! Utility functions and types.

mod annotations;
mod naming;
mod path;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use annotations::*;
pub use naming::*;
pub use path::*;
