use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use conductor::config::ProgramLayout;
use conductor::rpc::PROBE_STRING;
use conductor::{HarnessSettings, LifecycleManager, RpcClient, ServiceMap};

#[derive(Parser, Debug)]
#[command(name = "conductor", version, about = "Start, probe and stop harness components")]
struct Cli {
    /// Deployment configuration with service endpoints and listen ports
    #[arg(long, global = true, default_value = "services.json")]
    config: PathBuf,

    /// Harness settings (JSON); defaults apply when omitted
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Perform one RPC call and print the reply document
    Call {
        service: String,
        method: String,
        /// JSON payload sent as __data
        #[arg(default_value = "{}")]
        data: String,
        #[arg(long, default_value_t = 0)]
        shard: usize,
        /// Connect/read/write timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Send a single echo probe
    Ping {
        service: String,
        #[arg(long, default_value_t = 0)]
        shard: usize,
    },
    /// Start components, wait for Enter on stdin, then tear everything down
    Up {
        /// Directory holding service/ and server/ executables
        #[arg(long)]
        root: Option<PathBuf>,
        /// Service to start, as NAME or NAME:SHARD (repeatable)
        #[arg(long = "service")]
        services: Vec<String>,
        /// Web server to start (repeatable)
        #[arg(long = "server")]
        servers: Vec<String>,
        /// Context id passed to every component
        #[arg(long)]
        context: Option<u64>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let service_map = ServiceMap::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let settings = match &cli.settings {
        Some(path) => HarnessSettings::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => HarnessSettings::default(),
    };

    match cli.command {
        Commands::Call {
            service,
            method,
            data,
            shard,
            timeout_ms,
        } => {
            let data: serde_json::Value =
                serde_json::from_str(&data).context("payload is not valid JSON")?;
            let timeout = timeout_ms.map(Duration::from_millis).or(settings.rpc_timeout());
            let client = RpcClient::new(service_map.endpoint(&service, shard)?).with_timeout(timeout);
            let reply = client.call(&method, &data)?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Commands::Ping { service, shard } => {
            let client = RpcClient::new(service_map.endpoint(&service, shard)?)
                .with_timeout(settings.rpc_timeout());
            if !client.echo(PROBE_STRING)? {
                bail!("{service}/{shard} answered echo with the wrong string");
            }
            println!("{service}/{shard} at {} is alive", client.endpoint());
        }
        Commands::Up {
            root,
            services,
            servers,
            context,
        } => {
            let mut settings = settings;
            if let Some(root) = root {
                settings.layout = ProgramLayout {
                    root,
                    ..settings.layout
                };
            }
            cmd_up(service_map, settings, &services, &servers, context)?;
        }
    }
    Ok(())
}

fn cmd_up(
    service_map: ServiceMap,
    settings: HarnessSettings,
    services: &[String],
    servers: &[String],
    context: Option<u64>,
) -> Result<()> {
    let mut manager = LifecycleManager::new(service_map, settings);

    for spec in services {
        let (name, shard) = parse_service_spec(spec)?;
        manager.start_service(name, shard, context)?;
    }
    for name in servers {
        manager.start_server(name, context)?;
    }

    info!(
        "{} service(s) and {} server(s) running",
        manager.services().len(),
        manager.servers().len()
    );
    print!("Press Enter to shut down... ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    let report = manager.shutdown_services();
    println!("{}", report.summary());
    if report.has_errors() {
        for err in &report.errors {
            eprintln!("  {err}");
        }
        bail!("{} component(s) did not shut down cleanly", report.error_count);
    }
    Ok(())
}

fn parse_service_spec(spec: &str) -> Result<(&str, usize)> {
    match spec.split_once(':') {
        None => Ok((spec, 0)),
        Some((name, shard)) => {
            let shard = shard
                .parse()
                .with_context(|| format!("invalid shard in {spec:?}"))?;
            Ok((name, shard))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_spec_parsing() {
        assert_eq!(parse_service_spec("Worker").unwrap(), ("Worker", 0));
        assert_eq!(parse_service_spec("Worker:3").unwrap(), ("Worker", 3));
        assert!(parse_service_spec("Worker:x").is_err());
    }
}
