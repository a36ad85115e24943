//! Outcome of a bulk shutdown.

use std::time::Duration;

/// Statistics from a [`shutdown_services`](super::LifecycleManager::shutdown_services) run.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Services that quit and exited.
    pub services_stopped: usize,

    /// Servers that exited after an interrupt.
    pub servers_stopped: usize,

    /// Components that had to be killed instead.
    pub killed_count: usize,

    /// Processes left over from failed startups, killed during teardown.
    pub orphans_killed: usize,

    /// Number of errors encountered.
    pub error_count: usize,

    /// Errors encountered during the run.
    pub errors: Vec<String>,

    /// Time taken for the run.
    pub duration: Duration,
}

impl ShutdownReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_service(&mut self) {
        self.services_stopped += 1;
    }

    pub fn record_server(&mut self) {
        self.servers_stopped += 1;
    }

    /// Record a component that failed graceful shutdown and was killed.
    pub fn record_killed(&mut self, error: String) {
        self.killed_count += 1;
        self.record_error(error);
    }

    pub fn record_error(&mut self, error: String) {
        self.error_count += 1;
        self.errors.push(error);
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn summary(&self) -> String {
        format!(
            "Services: {}, Servers: {}, Killed: {}, Orphans: {}, Errors: {}, Duration: {:?}",
            self.services_stopped,
            self.servers_stopped,
            self.killed_count,
            self.orphans_killed,
            self.error_count,
            self.duration
        )
    }
}
