//! Harness configuration.
//!
//! Two documents feed the harness. The [`ServiceMap`] is the deployment's own
//! configuration (where every service shard listens); the harness only reads
//! it. [`HarnessSettings`] describes how the harness itself behaves: where the
//! component executables live, how they are launched, and how long to wait
//! for them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Server whose readiness is probed on `admin_listen_port`.
pub const ADMIN_SERVER: &str = "AdminWebServer";

/// Address every server readiness probe connects to.
pub const SERVER_PROBE_HOST: &str = "127.0.0.1";

/// A host/port pair. Serialized as `[address, port]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, u16)", into = "(String, u16)")]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl From<(String, u16)> for Endpoint {
    fn from((address, port): (String, u16)) -> Self {
        Self { address, port }
    }
}

impl From<Endpoint> for (String, u16) {
    fn from(endpoint: Endpoint) -> Self {
        (endpoint.address, endpoint.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// The deployment configuration document.
///
/// ```json
/// {
///   "core_services": { "Worker": [["127.0.0.1", 9000], ["127.0.0.1", 9001]] },
///   "admin_listen_port": 8889,
///   "contest_listen_port": [8888]
/// }
/// ```
///
/// Keys the harness does not use are kept in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceMap {
    #[serde(default)]
    pub core_services: BTreeMap<String, Vec<Endpoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_listen_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contest_listen_port: Vec<u16>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ServiceMap {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        Self::from_json(&text).map_err(|err| match err {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|err| Error::Config(err.to_string()))
    }

    /// Endpoint of shard `shard` of service `name`.
    pub fn endpoint(&self, name: &str, shard: usize) -> Result<Endpoint> {
        let shards = self
            .core_services
            .get(name)
            .ok_or_else(|| Error::UnknownService(name.to_string()))?;
        shards.get(shard).cloned().ok_or_else(|| Error::UnknownShard {
            name: name.to_string(),
            shard,
        })
    }

    /// Port the named web server listens on.
    pub fn server_port(&self, name: &str) -> Result<u16> {
        if name == ADMIN_SERVER {
            self.admin_listen_port
                .ok_or(Error::MissingKey("admin_listen_port"))
        } else {
            self.contest_listen_port
                .first()
                .copied()
                .ok_or(Error::MissingKey("contest_listen_port"))
        }
    }
}

/// Readiness probe budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbePolicy {
    /// Number of probe attempts before giving up.
    /// Default: 10
    pub attempts: u32,

    /// Pause after a failed attempt, in milliseconds.
    /// Default: 500
    pub interval_ms: u64,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval_ms: 500,
        }
    }
}

impl ProbePolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Where component executables live.
///
/// Services resolve to `<root>/<service_dir>/<name>`, servers to
/// `<root>/<server_dir>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramLayout {
    pub root: PathBuf,
    pub service_dir: String,
    pub server_dir: String,
}

impl Default for ProgramLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            service_dir: "service".to_string(),
            server_dir: "server".to_string(),
        }
    }
}

impl ProgramLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn service_program(&self, name: &str) -> PathBuf {
        self.root.join(&self.service_dir).join(name)
    }

    pub fn server_program(&self, name: &str) -> PathBuf {
        self.root.join(&self.server_dir).join(name)
    }
}

/// How child processes are started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Prepended to every command line, e.g. a coverage or tracing wrapper.
    pub wrapper: Vec<String>,

    /// Extra environment variables for every child.
    pub env: BTreeMap<String, String>,
}

/// Settings for one harness run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    pub layout: ProgramLayout,
    pub launcher: LauncherConfig,
    pub probe: ProbePolicy,

    /// Connect/read/write timeout for RPC calls, in milliseconds.
    /// Default: none (calls block as long as the OS lets them)
    pub rpc_timeout_ms: Option<u64>,
}

impl HarnessSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))
    }

    pub fn rpc_timeout(&self) -> Option<Duration> {
        self.rpc_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const SAMPLE: &str = r#"{
        "core_services": {
            "Worker": [["127.0.0.1", 9000], ["127.0.0.1", 9001]],
            "Checker": [["localhost", 9100]]
        },
        "admin_listen_port": 8889,
        "contest_listen_port": [8888, 8887],
        "database": "postgresql://localhost/test"
    }"#;

    #[test]
    fn endpoint_lookup_by_shard() {
        let map = ServiceMap::from_json(SAMPLE).unwrap();
        assert_eq!(map.endpoint("Worker", 0).unwrap(), Endpoint::new("127.0.0.1", 9000));
        assert_eq!(map.endpoint("Worker", 1).unwrap(), Endpoint::new("127.0.0.1", 9001));
        assert_eq!(map.endpoint("Checker", 0).unwrap().to_string(), "localhost:9100");
    }

    #[test]
    fn missing_service_or_shard_is_lookup_error() {
        let map = ServiceMap::from_json(SAMPLE).unwrap();
        let err = map.endpoint("Scorer", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lookup);
        let err = map.endpoint("Worker", 2).unwrap_err();
        assert!(matches!(err, Error::UnknownShard { shard: 2, .. }));
    }

    #[test]
    fn server_ports() {
        let map = ServiceMap::from_json(SAMPLE).unwrap();
        assert_eq!(map.server_port(ADMIN_SERVER).unwrap(), 8889);
        assert_eq!(map.server_port("ContestWebServer").unwrap(), 8888);

        let empty = ServiceMap::from_json("{}").unwrap();
        let err = empty.server_port(ADMIN_SERVER).unwrap_err();
        assert!(matches!(err, Error::MissingKey("admin_listen_port")));
    }

    #[test]
    fn unknown_keys_are_kept() {
        let map = ServiceMap::from_json(SAMPLE).unwrap();
        assert_eq!(
            map.extra.get("database").and_then(|v| v.as_str()),
            Some("postgresql://localhost/test")
        );
    }

    #[test]
    fn malformed_document_is_config_error() {
        let err = ServiceMap::from_json(r#"{"core_services": {"Worker": [["x"]]}}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn settings_defaults() {
        let settings: HarnessSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, HarnessSettings::default());
        assert_eq!(settings.probe.attempts, 10);
        assert_eq!(settings.probe.interval(), Duration::from_millis(500));
        assert_eq!(settings.rpc_timeout(), None);
        assert_eq!(
            settings.layout.service_program("Worker"),
            PathBuf::from("./service/Worker")
        );
    }

    #[test]
    fn settings_partial_override() {
        let settings: HarnessSettings = serde_json::from_str(
            r#"{"probe": {"interval_ms": 20}, "launcher": {"wrapper": ["coverage", "run"]}}"#,
        )
        .unwrap();
        assert_eq!(settings.probe.attempts, 10);
        assert_eq!(settings.probe.interval_ms, 20);
        assert_eq!(settings.launcher.wrapper, vec!["coverage", "run"]);
    }
}
