//! Service lifecycle manager for multi-process test harnesses.
//!
//! The harness spawns backend services and web servers, waits for them to
//! answer a liveness probe, talks to them over a length-prefixed JSON wire
//! protocol, and tears everything down again, killing whatever does not go
//! quietly.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod process;
pub mod protocol;
pub mod rpc;

pub use config::{Endpoint, HarnessSettings, ProbePolicy, ServiceMap};
pub use error::{Error, ErrorKind, Phase, Result};
pub use lifecycle::{ComponentState, LifecycleManager, ServiceKey, ShutdownReport};
pub use process::{CommandLine, Launcher, ProcessGuard, Spawner};
pub use rpc::{Dispatch, RpcClient, RpcServer};
