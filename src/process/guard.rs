use std::process::{Child, ExitStatus};

use crate::error::Result;

/// Owning handle to a spawned child.
///
/// The exit status is cached once observed. If the guard is dropped before
/// the child has been reaped, the child is killed and reaped.
#[derive(Debug)]
pub struct ProcessGuard {
    label: String,
    child: Child,
    status: Option<ExitStatus>,
}

impl ProcessGuard {
    pub fn new(label: impl Into<String>, child: Child) -> Self {
        Self {
            label: label.into(),
            child,
            status: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// The command line this process was started with.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Exit status if the child has exited, without blocking.
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.try_status(), Ok(None))
    }

    /// Blocks until the child exits.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(status)
    }

    /// Sends SIGINT. A child that has already exited is left alone.
    pub fn interrupt(&mut self) -> Result<()> {
        if self.try_status()?.is_some() {
            return Ok(());
        }
        self.send_interrupt()
    }

    #[cfg(unix)]
    fn send_interrupt(&mut self) -> Result<()> {
        let pid = self.child.id() as libc::pid_t;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let res = unsafe { libc::kill(pid, libc::SIGINT) };
        if res == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Ok(()),
            _ => Err(err.into()),
        }
    }

    #[cfg(not(unix))]
    fn send_interrupt(&mut self) -> Result<()> {
        self.kill()
    }

    /// Kills the child. A child that has already exited is left alone.
    pub fn kill(&mut self) -> Result<()> {
        if self.try_status()?.is_some() {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        match self.try_status() {
            Ok(Some(_)) => return,
            Ok(None) => log::warn!("killing leftover process {} ({})", self.pid(), self.label),
            Err(err) => log::warn!(
                "status of process {} ({}) unknown: {err}; killing it",
                self.pid(),
                self.label
            ),
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
