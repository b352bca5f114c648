use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    process::Stdio,
};

pub fn rotated_path(log_path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.old", log_path.display()))
}

/// Move the current log aside to `<log>.old`, replacing the previous
/// generation. Failures are logged and otherwise ignored.
pub fn rotate(log_path: &Path) {
    if !log_path.exists() {
        return;
    }
    let old = rotated_path(log_path);
    // Windows refuses to rename over an existing file.
    if old.exists()
        && let Err(e) = std::fs::remove_file(&old)
    {
        tracing::warn!(path = %old.display(), error = %e, "could not remove old log");
    }
    if let Err(e) = std::fs::rename(log_path, &old) {
        tracing::warn!(path = %log_path.display(), error = %e, "log rotation failed");
    }
}

pub fn open_append(log_path: &Path) -> Option<File> {
    if let Some(parent) = log_path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        tracing::warn!(path = %parent.display(), error = %e, "could not create log directory");
    }
    match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(f) => Some(f),
        Err(e) => {
            tracing::warn!(path = %log_path.display(), error = %e, "could not open log; child output will be discarded");
            None
        }
    }
}

/// Stdout and stderr handles for a child, both appending to the same file.
pub fn child_stdio(log: Option<&File>) -> (Stdio, Stdio) {
    let Some(f) = log else {
        return (Stdio::null(), Stdio::null());
    };
    match (f.try_clone(), f.try_clone()) {
        (Ok(out), Ok(err)) => (Stdio::from(out), Stdio::from(err)),
        _ => (Stdio::null(), Stdio::null()),
    }
}
