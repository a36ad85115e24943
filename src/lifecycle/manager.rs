//! Component lifecycle manager.

use std::collections::HashMap;
use std::time::Instant;

use crate::config::{Endpoint, HarnessSettings, ServiceMap, SERVER_PROBE_HOST};
use crate::error::{Error, Phase, Result};
use crate::lifecycle::probe::{poll_until, Probe, ProbeOutcome};
use crate::lifecycle::{
    ComponentState, ServerHandle, ServerRegistry, ServiceHandle, ServiceKey, ServiceRegistry,
    ShutdownReport,
};
use crate::process::{CommandLine, Launcher, ProcessGuard, Spawner};
use crate::rpc::{RpcClient, QUIT_REASON};

/// Starts, tracks and stops the components of one harness run.
///
/// All calls block. Components still tracked when the manager is dropped are
/// killed.
pub struct LifecycleManager {
    service_map: ServiceMap,
    settings: HarnessSettings,
    spawner: Box<dyn Spawner>,
    services: ServiceRegistry,
    servers: ServerRegistry,
    service_states: HashMap<ServiceKey, ComponentState>,
    server_states: HashMap<String, ComponentState>,
    /// Children whose startup probe never succeeded.
    orphans: Vec<ProcessGuard>,
    next_generation: u64,
}

impl LifecycleManager {
    pub fn new(service_map: ServiceMap, settings: HarnessSettings) -> Self {
        let launcher = Launcher::new(settings.launcher.clone());
        Self::with_spawner(service_map, settings, Box::new(launcher))
    }

    pub fn with_spawner(
        service_map: ServiceMap,
        settings: HarnessSettings,
        spawner: Box<dyn Spawner>,
    ) -> Self {
        Self {
            service_map,
            settings,
            spawner,
            services: ServiceRegistry::new(),
            servers: ServerRegistry::new(),
            service_states: HashMap::new(),
            server_states: HashMap::new(),
            orphans: Vec::new(),
            next_generation: 0,
        }
    }

    pub fn service_map(&self) -> &ServiceMap {
        &self.service_map
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn servers(&self) -> &ServerRegistry {
        &self.servers
    }

    pub fn service(&self, key: &ServiceKey) -> Option<&ServiceHandle> {
        self.services.get(key)
    }

    /// RPC client of a running service.
    pub fn client(&self, key: &ServiceKey) -> Result<&RpcClient> {
        self.services
            .get(key)
            .map(|handle| &handle.client)
            .ok_or_else(|| Error::NotRegistered(key.to_string()))
    }

    pub fn state(&self, key: &ServiceKey) -> ComponentState {
        self.service_states.get(key).copied().unwrap_or_default()
    }

    pub fn server_state(&self, name: &str) -> ComponentState {
        self.server_states.get(name).copied().unwrap_or_default()
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Spawns a service and waits for it to answer `echo`.
    ///
    /// Returns the pid of the new process. If the probe budget runs out the
    /// process is left running until teardown and a startup timeout is
    /// returned.
    pub fn start_service(&mut self, name: &str, shard: usize, context: Option<u64>) -> Result<u32> {
        let key = ServiceKey::new(name, shard, context);
        if self.services.contains(&key) {
            return Err(Error::AlreadyRegistered(key.to_string()));
        }

        log::info!("==> Starting {name}.");
        let endpoint = self.service_map.endpoint(name, shard)?;
        let program = self.settings.layout.service_program(name);
        let process = self
            .spawner
            .spawn(&CommandLine::component(&program, shard, context))?;
        self.service_states.insert(key.clone(), ComponentState::Starting);

        let client = RpcClient::new(endpoint).with_timeout(self.settings.rpc_timeout());
        let probe = Probe::Echo(client.clone());
        let attempts = match poll_until(&self.settings.probe, || probe.attempt()) {
            ProbeOutcome::Ready { attempts } => attempts,
            ProbeOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                log::error!(
                    "Failed to bring up service {key}: {}",
                    last_error.as_deref().unwrap_or("no reply")
                );
                self.orphans.push(process);
                return Err(Error::StartupTimeout {
                    component: key.to_string(),
                    attempts,
                });
            }
        };
        log::debug!("{key} ready after {attempts} probe(s)");

        let pid = process.pid();
        let handle = ServiceHandle {
            client,
            process,
            generation: self.bump_generation(),
            started_at: Instant::now(),
        };
        self.services.insert(key.clone(), handle)?;
        self.service_states.insert(key, ComponentState::Running);
        Ok(pid)
    }

    /// Spawns a web server and waits until its port accepts connections.
    pub fn start_server(&mut self, name: &str, context: Option<u64>) -> Result<u32> {
        if self.servers.contains(&name.to_string()) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }

        log::info!("==> Starting {name}.");
        let port = self.service_map.server_port(name)?;
        let program = self.settings.layout.server_program(name);
        let process = self
            .spawner
            .spawn(&CommandLine::component(&program, 0, context))?;
        self.server_states
            .insert(name.to_string(), ComponentState::Starting);

        let probe = Probe::TcpConnect(Endpoint::new(SERVER_PROBE_HOST, port));
        if let ProbeOutcome::Exhausted {
            attempts,
            last_error,
        } = poll_until(&self.settings.probe, || probe.attempt())
        {
            log::error!(
                "Failed to bring up server {name}: {}",
                last_error.as_deref().unwrap_or("no connection")
            );
            self.orphans.push(process);
            return Err(Error::StartupTimeout {
                component: name.to_string(),
                attempts,
            });
        }

        self.register_server(name, process)
    }

    /// Spawns a server from an explicit command line and registers it
    /// without probing, for servers whose readiness the harness cannot see.
    pub fn launch_server(&mut self, name: &str, command: &CommandLine) -> Result<u32> {
        if self.servers.contains(&name.to_string()) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }
        log::info!("==> Starting {name}.");
        let process = self.spawner.spawn(command)?;
        self.register_server(name, process)
    }

    /// Shuts a service down and starts it again. Not atomic: a failure in
    /// either half is returned as is.
    pub fn restart_service(&mut self, name: &str, shard: usize, context: Option<u64>) -> Result<u32> {
        self.shutdown_service(name, shard, context)?;
        self.start_service(name, shard, context)
    }

    /// Asks a running service to quit and waits for its process to exit.
    ///
    /// A key that is not registered is an error. A quit call that cannot be
    /// delivered is tolerated only if the process has already exited.
    pub fn shutdown_service(&mut self, name: &str, shard: usize, context: Option<u64>) -> Result<()> {
        let key = ServiceKey::new(name, shard, context);
        let handle = self
            .services
            .get_mut(&key)
            .ok_or_else(|| Error::NotRegistered(key.to_string()))?;

        log::info!("==> Asking {name}/{shard} to terminate...");
        self.service_states
            .insert(key.clone(), ComponentState::ShuttingDown);

        match handle.client.quit(QUIT_REASON) {
            Ok(_) => {}
            Err(err) if is_reply_failure(&err) => {
                log::debug!("{key} gave no usable reply to quit: {err}");
            }
            Err(err) => {
                if handle.process.is_running() {
                    log::error!("could not ask {key} to quit: {err}");
                    self.service_states.insert(key, ComponentState::Running);
                    return Err(err);
                }
                log::debug!("{key} had already exited: {err}");
            }
        }

        let mut handle = self.services.remove(&key)?;
        let status = handle.process.wait()?;
        log::debug!(
            "{key} exited with {status} after {:?}",
            handle.started_at.elapsed()
        );
        self.service_states.insert(key, ComponentState::Stopped);
        Ok(())
    }

    /// Interrupts a server and waits for it to exit.
    pub fn shutdown_server(&mut self, name: &str) -> Result<()> {
        let mut handle = self.servers.remove(&name.to_string())?;
        log::info!("==> Terminating {name}.");
        self.server_states
            .insert(name.to_string(), ComponentState::ShuttingDown);

        handle.process.interrupt()?;
        let status = handle.process.wait()?;
        log::debug!(
            "{name} exited with {status} after {:?}",
            handle.started_at.elapsed()
        );
        self.server_states
            .insert(name.to_string(), ComponentState::Stopped);
        Ok(())
    }

    /// Stops every service, then every server, then kills leftover children
    /// of failed startups.
    ///
    /// Best effort: a component that does not stop gracefully is killed and
    /// the failure recorded. Both registries are empty afterwards.
    pub fn shutdown_services(&mut self) -> ShutdownReport {
        let start = Instant::now();
        let mut report = ShutdownReport::new();

        for key in self.services.keys() {
            match self.shutdown_service(&key.name, key.shard, key.context) {
                Ok(()) => report.record_service(),
                Err(err) => {
                    log::error!("killing {key}: {err}");
                    if let Ok(mut handle) = self.services.remove(&key) {
                        force_stop(&mut handle.process);
                    }
                    self.service_states.insert(key.clone(), ComponentState::Stopped);
                    report.record_killed(format!("{key}: {err}"));
                }
            }
        }

        for name in self.servers.keys() {
            match self.shutdown_server(&name) {
                Ok(()) => report.record_server(),
                Err(err) => {
                    log::error!("killing {name}: {err}");
                    if let Ok(mut handle) = self.servers.remove(&name) {
                        force_stop(&mut handle.process);
                    }
                    self.server_states.insert(name.clone(), ComponentState::Stopped);
                    report.record_killed(format!("{name}: {err}"));
                }
            }
        }

        for mut orphan in self.orphans.drain(..) {
            log::info!("==> Killing {} (pid {}).", orphan.label(), orphan.pid());
            force_stop(&mut orphan);
            report.orphans_killed += 1;
        }

        report.duration = start.elapsed();
        log::info!("==> Teardown finished. {}", report.summary());
        report
    }

    fn register_server(&mut self, name: &str, process: ProcessGuard) -> Result<u32> {
        let pid = process.pid();
        let handle = ServerHandle {
            name: name.to_string(),
            process,
            started_at: Instant::now(),
        };
        self.servers.insert(name.to_string(), handle)?;
        self.server_states
            .insert(name.to_string(), ComponentState::Running);
        Ok(pid)
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        let leftover = self.services.len() + self.servers.len() + self.orphans.len();
        if leftover > 0 {
            log::warn!("harness exiting with {leftover} component(s) still tracked; killing them");
        }
    }
}

/// The quit request went out but its reply was missing or unreadable.
fn is_reply_failure(err: &Error) -> bool {
    match err {
        Error::Transport { phase, .. } => *phase == Phase::Receive,
        Error::Protocol(_) | Error::Json(_) => true,
        _ => false,
    }
}

fn force_stop(process: &mut ProcessGuard) {
    if let Err(err) = process.kill() {
        log::warn!("kill of pid {} failed: {err}", process.pid());
    }
    if let Err(err) = process.wait() {
        log::warn!("wait on pid {} failed: {err}", process.pid());
    }
}
