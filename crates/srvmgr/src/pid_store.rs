use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::Context;

/// Persistence for the single tracked PID.
///
/// `read` and `clear` never fail: an unreadable record is an absent one.
pub trait PidStore: Send + Sync {
    fn write(&self, pid: u32) -> anyhow::Result<()>;

    fn read(&self) -> Option<u32>;

    fn clear(&self);
}

#[derive(Debug, Clone)]
pub struct FilePidStore {
    path: PathBuf,
}

impl FilePidStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl PidStore for FilePidStore {
    fn write(&self, pid: u32) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("pid.tmp");
        let mut f = std::fs::File::create(&tmp)
            .with_context(|| format!("create {}", tmp.display()))?;
        writeln!(f, "{pid}").with_context(|| format!("write {}", tmp.display()))?;
        f.sync_all()
            .with_context(|| format!("sync {}", tmp.display()))?;
        drop(f);
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("persist {}", self.path.display()))?;
        tracing::debug!(pid, path = %self.path.display(), "wrote pid file");
        Ok(())
    }

    fn read(&self) -> Option<u32> {
        let s = std::fs::read_to_string(&self.path).ok()?;
        parse_pid(&s)
    }

    fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed pid file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove pid file")
            }
        }
    }
}

fn parse_pid(s: &str) -> Option<u32> {
    s.trim().parse::<u32>().ok().filter(|&pid| pid != 0)
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryPidStore {
    pid: std::sync::Mutex<Option<u32>>,
}

#[cfg(test)]
impl MemoryPidStore {
    pub fn with_pid(pid: u32) -> Self {
        Self {
            pid: std::sync::Mutex::new(Some(pid)),
        }
    }
}

#[cfg(test)]
impl PidStore for MemoryPidStore {
    fn write(&self, pid: u32) -> anyhow::Result<()> {
        *self.pid.lock().unwrap_or_else(|e| e.into_inner()) = Some(pid);
        Ok(())
    }

    fn read(&self) -> Option<u32> {
        *self.pid.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn clear(&self) {
        *self.pid.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
