//! Synchronous request/response calls over the harness wire protocol.
//!
//! [`RpcClient`] opens a fresh TCP connection for every call: connect, write
//! one request frame, read one response frame, close. There is no pooling,
//! no pipelining and no retry; retrying is up to the caller.
//!
//! [`RpcServer`] is the matching responder used by stub components. It
//! serves one connection at a time.

mod client;
mod server;

pub use client::RpcClient;
pub use server::{
    service_dispatch, Dispatch, RpcServer, CONNECTION_TIMEOUT, MAX_ACCEPT_FAILURES,
};

/// Method every managed service answers once it is ready.
pub const ECHO_METHOD: &str = "echo";

/// Method asking a service to exit.
pub const QUIT_METHOD: &str = "quit";

/// String sent by readiness probes.
pub const PROBE_STRING: &str = "hello";

/// Reason given to services stopped by the harness.
pub const QUIT_REASON: &str = "from test harness";
