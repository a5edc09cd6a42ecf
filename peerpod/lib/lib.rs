//! `peerpod` orchestrates the lifecycle of the confidential cloud VMs that back container sandboxes.
//!
//! # Overview
//!
//! Every pod sandbox is backed by a cloud instance instead of a local VM. For each sandbox,
//! peerpod:
//! - provisions the instance through a pluggable cloud provider
//! - plumbs the pod network namespace to the instance through a tunnel
//! - starts a local agent proxy that forwards a unix socket to the in-VM agent
//! - optionally establishes an end-to-end encrypted SSH tunnel for agent traffic, keyed from a key broker
//!
//! # Architecture
//!
//! The [`orchestration::Orchestrator`] owns one record per sandbox ID and sequences
//! `create_vm` → `start_vm` → `stop_vm` against four collaborators, each behind a trait:
//!
//! - [`cloud::CloudProvider`]: instance creation, deletion and sizing
//! - [`proxy::ProxyFactory`] / [`proxy::AgentProxy`]: the per-sandbox agent proxy
//! - [`podnetwork::WorkerNode`]: pod network tunnel inspection, setup and teardown
//! - [`securecomms::SecureComms`] / [`securecomms::KeyBroker`]: the secure tunnel and its key material
//!
//! Lifecycle calls on one sandbox are mutually exclusive; different sandboxes proceed in parallel.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use peerpod::{
//!     cloud::CloudProvider,
//!     config::OrchestratorConfig,
//!     orchestration::{Collaborators, CreateVmRequest, Orchestrator},
//!     podnetwork::WorkerNode,
//!     proxy::SocketProxyFactory,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! async fn run(
//!     provider: Arc<dyn CloudProvider>,
//!     worker_node: Arc<dyn WorkerNode>,
//! ) -> peerpod::PeerpodResult<()> {
//!     let config = OrchestratorConfig::builder().pods_dir("/run/peerpod/pods").build();
//!     let collaborators = Collaborators::builder()
//!         .provider(provider)
//!         .proxy_factory(Arc::new(SocketProxyFactory::default()))
//!         .worker_node(worker_node)
//!         .build();
//!
//!     let orchestrator = Orchestrator::new(collaborators, config)?;
//!     let request = CreateVmRequest::builder().id("123").build();
//!     let created = orchestrator.create_vm(request, CancellationToken::new()).await?;
//!     println!("agent socket: {}", created.get_agent_socket_path().display());
//!
//!     orchestrator.start_vm("123", CancellationToken::new()).await?;
//!     orchestrator.stop_vm("123").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cloud`] - Cloud provider contract and guest configuration
//! - [`config`] - Orchestrator configuration, loading and validation
//! - [`orchestration`] - The sandbox lifecycle orchestrator
//! - [`podnetwork`] - Pod network tunneler contract
//! - [`proxy`] - Agent proxy contract, readiness signaling and the unix socket proxy
//! - [`securecomms`] - Secure tunnel contract, forwarding rules and key material
//! - [`utils`] - Paths, naming and annotation helpers

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cloud;
pub mod config;
pub mod orchestration;
pub mod podnetwork;
pub mod proxy;
pub mod securecomms;
pub mod utils;

pub use error::*;
