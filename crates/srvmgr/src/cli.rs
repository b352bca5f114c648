use std::path::PathBuf;

use clap::Parser;
use srvmgr_process::LaunchMode;

pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Parser)]
#[command(name = "srvmgr", version, about = "Manage the local development server")]
pub struct Cli {
    /// Start the server
    #[arg(long)]
    pub start: bool,

    /// Stop the server (falls back to whatever listens on --port)
    #[arg(long)]
    pub stop: bool,

    /// Restart the server
    #[arg(long)]
    pub restart: bool,

    /// Report whether the server is running
    #[arg(long)]
    pub status: bool,

    /// Port to serve on, probe, and kill by
    #[arg(long, env = "SRVMGR_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Run the file-watching dev runner instead of the built artifact
    #[arg(long)]
    pub dev: bool,

    /// Block until the port accepts connections (or the timeout passes)
    #[arg(long)]
    pub wait: bool,

    /// Project root containing server/ (defaults to the current directory)
    #[arg(long, env = "SRVMGR_ROOT")]
    pub root: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Stop,
    Restart,
    Status,
}

impl Cli {
    /// First requested operation in start, stop, restart, status order.
    pub fn operation(&self) -> Option<Operation> {
        if self.start {
            Some(Operation::Start)
        } else if self.stop {
            Some(Operation::Stop)
        } else if self.restart {
            Some(Operation::Restart)
        } else if self.status {
            Some(Operation::Status)
        } else {
            None
        }
    }

    pub fn mode(&self) -> LaunchMode {
        LaunchMode::from_dev_flag(self.dev)
    }
}
