//! Launching component processes.
//!
//! Every managed component is an executable invoked as
//! `<program> <shard> [-c <context>]`. The [`Launcher`] prepends an optional
//! wrapper (coverage runner, tracer) and returns a [`ProcessGuard`] that kills
//! the child if it is dropped while still running.

mod guard;

use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::LauncherConfig;
use crate::error::{Error, Result};

pub use guard::ProcessGuard;

/// Flag introducing the context id on a component command line.
pub const CONTEXT_FLAG: &str = "-c";

/// An ordered program + arguments list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `<program> <shard> [-c <context>]`. Any `Some` context is passed,
    /// including `Some(0)`; only `None` leaves the flag out.
    pub fn component(program: &Path, shard: usize, context: Option<u64>) -> Self {
        let mut command = Self::new(program.to_string_lossy()).arg(shard.to_string());
        if let Some(context) = context {
            command = command.arg(CONTEXT_FLAG).arg(context.to_string());
        }
        command
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Starts processes for the lifecycle manager.
pub trait Spawner {
    /// Starts `command` without waiting for it to become ready.
    fn spawn(&self, command: &CommandLine) -> Result<ProcessGuard>;
}

/// Spawns real OS processes.
#[derive(Debug, Clone, Default)]
pub struct Launcher {
    config: LauncherConfig,
}

impl Launcher {
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }
}

impl Spawner for Launcher {
    fn spawn(&self, command: &CommandLine) -> Result<ProcessGuard> {
        log::info!("$ {command}");
        let argv: Vec<String> = self
            .config
            .wrapper
            .iter()
            .cloned()
            .chain(command.argv())
            .collect();

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .envs(&self.config.env)
            .stdin(Stdio::null());
        let child = cmd.spawn().map_err(|source| Error::Spawn {
            program: argv[0].clone(),
            source,
        })?;
        log::debug!("spawned pid {} for {}", child.id(), command.program());
        Ok(ProcessGuard::new(command.to_string(), child))
    }
}
