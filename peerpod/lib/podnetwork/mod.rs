//! Pod network tunneler contract.
//!
//! The worker node owns the data path between a pod network namespace and the instance that backs
//! the pod. The orchestrator only inspects, sets up and tears down that path; the encapsulation
//! itself lives behind [`WorkerNode`].

mod tunneler;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use tunneler::*;
