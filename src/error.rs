use std::fmt;

use crate::config::Endpoint;

/// Stage of an RPC exchange in which a transport failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Send,
    Receive,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Connect => f.write_str("connect"),
            Phase::Send => f.write_str("send"),
            Phase::Receive => f.write_str("receive"),
        }
    }
}

/// Coarse classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Protocol,
    StartupTimeout,
    Lookup,
    Process,
    Config,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{phase} failed for {endpoint}: {source}")]
    Transport {
        endpoint: Endpoint,
        phase: Phase,
        #[source]
        source: std::io::Error,
    },
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("undecodable json payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to bring up {component} after {attempts} attempts")]
    StartupTimeout { component: String, attempts: u32 },
    #[error("{0} is not registered")]
    NotRegistered(String),
    #[error("{0} is already registered")]
    AlreadyRegistered(String),
    #[error("unknown service {0}")]
    UnknownService(String),
    #[error("service {name} has no shard {shard}")]
    UnknownShard { name: String, shard: usize },
    #[error("configuration has no {0}")]
    MissingKey(&'static str),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Protocol(_) | Error::Json(_) => ErrorKind::Protocol,
            Error::StartupTimeout { .. } => ErrorKind::StartupTimeout,
            Error::NotRegistered(_)
            | Error::AlreadyRegistered(_)
            | Error::UnknownService(_)
            | Error::UnknownShard { .. }
            | Error::MissingKey(_) => ErrorKind::Lookup,
            Error::Spawn { .. } | Error::Io(_) => ErrorKind::Process,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn transport(endpoint: &Endpoint, phase: Phase, source: std::io::Error) -> Self {
        Error::Transport {
            endpoint: endpoint.clone(),
            phase,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let endpoint = Endpoint::new("127.0.0.1", 1);
        let err = Error::transport(
            &endpoint,
            Phase::Connect,
            std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        );
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(Error::Protocol("x".into()).kind(), ErrorKind::Protocol);
        assert_eq!(
            Error::NotRegistered("Worker/0".into()).kind(),
            ErrorKind::Lookup
        );
        assert_eq!(
            Error::StartupTimeout {
                component: "Worker/0".into(),
                attempts: 10
            }
            .kind(),
            ErrorKind::StartupTimeout
        );
    }

    #[test]
    fn transport_message_names_phase_and_endpoint() {
        let endpoint = Endpoint::new("127.0.0.1", 9000);
        let err = Error::transport(
            &endpoint,
            Phase::Receive,
            std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("receive failed for 127.0.0.1:9000"), "{msg}");
    }
}
