//! Readiness probing.

use std::net::TcpStream;

use crate::config::{Endpoint, ProbePolicy};
use crate::error::{Error, Phase, Result};
use crate::rpc::{RpcClient, PROBE_STRING};

/// Liveness check for a freshly spawned component.
#[derive(Debug, Clone)]
pub enum Probe {
    /// `echo` RPC whose reply must repeat [`PROBE_STRING`].
    Echo(RpcClient),
    /// Plain TCP connect.
    TcpConnect(Endpoint),
}

impl Probe {
    /// One attempt. `Ok(false)` means the peer answered but wrongly.
    pub fn attempt(&self) -> Result<bool> {
        match self {
            Probe::Echo(client) => client.echo(PROBE_STRING),
            Probe::TcpConnect(endpoint) => {
                TcpStream::connect((endpoint.address.as_str(), endpoint.port))
                    .map(|_stream| true)
                    .map_err(|err| Error::transport(endpoint, Phase::Connect, err))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready { attempts: u32 },
    Exhausted { attempts: u32, last_error: Option<String> },
}

/// Runs `attempt` until it reports success or the budget is spent, pausing
/// `policy.interval()` after every failure but the last.
pub fn poll_until<F>(policy: &ProbePolicy, mut attempt: F) -> ProbeOutcome
where
    F: FnMut() -> Result<bool>,
{
    let mut last_error = None;
    for n in 1..=policy.attempts {
        match attempt() {
            Ok(true) => return ProbeOutcome::Ready { attempts: n },
            Ok(false) => last_error = Some("unexpected probe reply".to_string()),
            Err(err) => last_error = Some(err.to_string()),
        }
        if n < policy.attempts {
            std::thread::sleep(policy.interval());
        }
    }
    ProbeOutcome::Exhausted {
        attempts: policy.attempts,
        last_error,
    }
}
