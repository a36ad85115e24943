use std::fmt;

/// Where a managed component is in its lifecycle.
///
/// `NotStarted -> Starting -> Running -> ShuttingDown -> Stopped`. A failed
/// startup stays in `Starting`; its process is kept until teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ComponentState {
    #[default]
    NotStarted,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl ComponentState {
    pub fn is_running(self) -> bool {
        matches!(self, ComponentState::Running)
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentState::NotStarted => "not started",
            ComponentState::Starting => "starting",
            ComponentState::Running => "running",
            ComponentState::ShuttingDown => "shutting down",
            ComponentState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
