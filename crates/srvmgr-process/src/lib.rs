use std::fmt;

/// How the managed server is launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// File-watching runner over the server sources.
    Development,
    /// Prebuilt artifact, built on demand when missing.
    #[default]
    Production,
}

impl LaunchMode {
    pub fn from_dev_flag(dev: bool) -> Self {
        if dev {
            Self::Development
        } else {
            Self::Production
        }
    }
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => f.write_str("development"),
            Self::Production => f.write_str("production"),
        }
    }
}

/// Logical state of the single managed slot, derived from the PID record and
/// the OS process table. Nothing beyond the PID itself is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Running { pid: u32 },
    /// PID record present but the process is gone. Reconciles to `Stopped`.
    Stale { pid: u32 },
}

impl ProcessState {
    pub fn classify(tracked: Option<u32>, alive: impl FnOnce(u32) -> bool) -> Self {
        match tracked {
            Some(pid) if alive(pid) => Self::Running { pid },
            Some(pid) => Self::Stale { pid },
            None => Self::Stopped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OperationResult {
    AlreadyRunning {
        pid: u32,
    },
    Started {
        pid: u32,
        mode: LaunchMode,
        /// `None` when readiness was not requested.
        #[serde(skip_serializing_if = "Option::is_none")]
        ready: Option<bool>,
    },
    Stopped {
        killed: Vec<u32>,
    },
    NotRunning,
}

impl OperationResult {
    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::AlreadyRunning { pid } | Self::Started { pid, .. } => Some(*pid),
            Self::Stopped { .. } | Self::NotRunning => None,
        }
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning { pid } => write!(f, "Server already running (PID {pid})."),
            Self::Started { pid, ready, .. } => match ready {
                Some(false) => write!(f, "Server started (PID {pid}), but the port did not respond in time."),
                _ => write!(f, "Server started (PID {pid})."),
            },
            Self::Stopped { .. } => f.write_str("Server stopped."),
            Self::NotRunning => f.write_str("No running server found."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub state: ProcessState,
    pub port: u16,
    /// PIDs currently listening on `port`; may include untracked processes.
    pub listeners: Vec<u32>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            ProcessState::Running { pid } => write!(f, "Server running (PID {pid})")?,
            ProcessState::Stale { pid } => write!(f, "Server not running (stale PID {pid})")?,
            ProcessState::Stopped => f.write_str("Server not running")?,
        }
        if self.listeners.is_empty() {
            write!(f, "; nothing listening on port {}.", self.port)
        } else {
            let pids: Vec<String> = self.listeners.iter().map(|p| p.to_string()).collect();
            write!(f, "; port {} held by PID {}.", self.port, pids.join(", "))
        }
    }
}
