//! Stand-in component for end-to-end harness runs.
//!
//! Install (or symlink) it as `<root>/service/<Name>` or
//! `<root>/server/<Name>`. Under `service/` it answers `echo` on its
//! configured endpoint and exits after `quit`; under `server/` it accepts
//! connections on its listen port until interrupted.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::info;

use conductor::config::SERVER_PROBE_HOST;
use conductor::rpc::{service_dispatch, MAX_ACCEPT_FAILURES};
use conductor::{RpcServer, ServiceMap};

const CONFIG_ENV: &str = "CONDUCTOR_CONFIG";

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Role {
    Service,
    Server,
}

#[derive(Parser, Debug)]
#[command(name = "conductor-stub", about = "Stub component speaking the harness protocol")]
struct Args {
    /// Shard index
    #[arg(default_value_t = 0)]
    shard: usize,

    /// Context id
    #[arg(short = 'c')]
    context: Option<u64>,

    /// Component name (default: executable file name)
    #[arg(long)]
    name: Option<String>,

    /// Role (default: name of the directory holding the executable)
    #[arg(long, value_enum)]
    role: Option<Role>,

    /// Deployment configuration (default: $CONDUCTOR_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let invoked_as = std::env::args_os()
        .next()
        .map(PathBuf::from)
        .context("no argv[0]")?;
    let name = match &args.name {
        Some(name) => name.clone(),
        None => file_name(&invoked_as)?,
    };
    let role = match args.role {
        Some(role) => role,
        None => role_from_path(&invoked_as)?,
    };
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .with_context(|| format!("--config not given and {CONFIG_ENV} not set"))?,
    };
    let service_map = ServiceMap::load(&config_path)?;

    match role {
        Role::Service => run_service(&service_map, &name, args.shard, args.context),
        Role::Server => run_server(&service_map, &name),
    }
}

fn run_service(map: &ServiceMap, name: &str, shard: usize, context: Option<u64>) -> Result<()> {
    let endpoint = map.endpoint(name, shard)?;
    let server = RpcServer::bind(&endpoint)
        .with_context(|| format!("failed to bind {endpoint}"))?;
    info!(
        "{name}/{shard} listening on {} (context {:?})",
        server.local_endpoint(),
        context
    );
    let served = server.serve(service_dispatch)?;
    info!("{name}/{shard} exiting after {served} call(s)");
    Ok(())
}

fn run_server(map: &ServiceMap, name: &str) -> Result<()> {
    let port = map.server_port(name)?;
    let listener = TcpListener::bind((SERVER_PROBE_HOST, port))
        .with_context(|| format!("failed to bind {SERVER_PROBE_HOST}:{port}"))?;
    info!("{name} listening on {SERVER_PROBE_HOST}:{port}");
    let mut failures = 0u32;
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                failures = 0;
                drop(stream);
            }
            Err(err) => {
                failures += 1;
                if failures >= MAX_ACCEPT_FAILURES {
                    bail!("{name}: {failures} failed accepts in a row, last: {err}");
                }
                log::warn!("accept failed: {err}");
                thread::sleep(Duration::from_millis(50) * failures);
            }
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => Ok(name.to_string()),
        None => bail!("cannot derive a component name from {}", path.display()),
    }
}

fn role_from_path(path: &Path) -> Result<Role> {
    let dir = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str());
    match dir {
        Some("service") => Ok(Role::Service),
        Some("server") => Ok(Role::Server),
        _ => bail!(
            "{} is not under service/ or server/; pass --role",
            path.display()
        ),
    }
}
