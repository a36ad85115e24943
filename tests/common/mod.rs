#![allow(dead_code)]

use std::net::TcpListener;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use conductor::config::{ProbePolicy, ProgramLayout};
use conductor::{Endpoint, HarnessSettings, ServiceMap};
use tempfile::TempDir;

pub const STUB: &str = env!("CARGO_BIN_EXE_conductor-stub");

/// A deployment directory with stub executables and a matching service map.
pub struct Deployment {
    pub dir: TempDir,
    pub config_path: PathBuf,
    pub service_map: ServiceMap,
}

pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral");
    listener.local_addr().expect("local addr").port()
}

fn install(root: &Path, dir: &str, name: &str) {
    let dir = root.join(dir);
    std::fs::create_dir_all(&dir).expect("mkdir");
    symlink(STUB, dir.join(name)).expect("symlink stub");
}

/// Two Worker shards, one Checker and an AdminWebServer.
pub fn deployment() -> Deployment {
    let dir = tempfile::tempdir().expect("tempdir");
    install(dir.path(), "service", "Worker");
    install(dir.path(), "service", "Checker");
    install(dir.path(), "server", "AdminWebServer");

    let mut service_map = ServiceMap::default();
    service_map.core_services.insert(
        "Worker".into(),
        vec![
            Endpoint::new("127.0.0.1", free_port()),
            Endpoint::new("127.0.0.1", free_port()),
        ],
    );
    service_map
        .core_services
        .insert("Checker".into(), vec![Endpoint::new("127.0.0.1", free_port())]);
    service_map.admin_listen_port = Some(free_port());
    service_map.contest_listen_port = vec![free_port()];

    let config_path = dir.path().join("services.json");
    let text = serde_json::to_string_pretty(&service_map).expect("serialize map");
    std::fs::write(&config_path, text).expect("write services.json");

    Deployment {
        dir,
        config_path,
        service_map,
    }
}

impl Deployment {
    pub fn settings(&self) -> HarnessSettings {
        let mut settings = HarnessSettings::default();
        settings.layout = ProgramLayout::new(self.dir.path());
        settings.launcher.env.insert(
            "CONDUCTOR_CONFIG".into(),
            self.config_path.display().to_string(),
        );
        settings.probe = ProbePolicy {
            attempts: 25,
            interval_ms: 200,
        };
        settings.rpc_timeout_ms = Some(2_000);
        settings
    }
}

pub fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
