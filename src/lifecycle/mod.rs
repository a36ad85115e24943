//! Component lifecycle management.
//!
//! This module provides the orchestration layer of the harness:
//! - Registries of live services (keyed by name, shard and context) and web servers
//! - Readiness probes (RPC echo for services, TCP connect for servers)
//! - Start / restart / shutdown sequences and whole-run teardown
//!
//! # Overview
//!
//! The [`LifecycleManager`] owns every component it starts. A service is only
//! registered once it has answered an `echo` probe; it leaves the registry
//! after it has been asked to quit and its process has exited. Anything still
//! tracked when the manager is dropped is killed.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use conductor::{HarnessSettings, LifecycleManager, ServiceMap};
//!
//! let map = ServiceMap::load(Path::new("deploy/services.json"))?;
//! let mut manager = LifecycleManager::new(map, HarnessSettings::default());
//!
//! manager.start_service("Worker", 0, None)?;
//! manager.start_server("AdminWebServer", None)?;
//!
//! // ... drive the system under test ...
//!
//! let report = manager.shutdown_services();
//! println!("{}", report.summary());
//! # Ok::<(), conductor::Error>(())
//! ```

mod manager;
mod probe;
mod registry;
mod state;
mod stats;

pub use manager::LifecycleManager;
pub use probe::{poll_until, Probe, ProbeOutcome};
pub use registry::{
    Registry, ServerHandle, ServerRegistry, ServiceHandle, ServiceKey, ServiceRegistry,
};
pub use state::ComponentState;
pub use stats::ShutdownReport;
