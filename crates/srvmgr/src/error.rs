use std::path::PathBuf;

const MAX_MESSAGE_BYTES: usize = 8 * 1024;

/// Failures that prevent a start from being attempted at all. These are the
/// only errors that reach the caller.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to run build command {program}")]
    BuildSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("build command exited with {status}")]
    BuildFailed { status: std::process::ExitStatus },
    #[error("build artifact not found at {}", path.display())]
    ArtifactMissing { path: PathBuf },
}

impl LaunchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn_failed",
            Self::BuildSpawn { .. } => "build_spawn_failed",
            Self::BuildFailed { .. } => "build_failed",
            Self::ArtifactMissing { .. } => "artifact_missing",
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::Spawn { .. } | Self::BuildSpawn { .. } => {
                "Ensure node/npm are installed and on PATH (or set SRVMGR_NODE / SRVMGR_NPM)."
            }
            Self::BuildFailed { .. } => "See the server log for the build output.",
            Self::ArtifactMissing { .. } => {
                "The build finished but produced no artifact; check the server build script."
            }
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorPayload {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let launch = err.chain().find_map(|c| c.downcast_ref::<LaunchError>());
        Self {
            code: launch.map(LaunchError::code).unwrap_or("internal").to_string(),
            message: truncate_utf8(&format_error_chain(err), MAX_MESSAGE_BYTES),
            hint: launch.map(|e| e.hint().to_string()),
        }
    }
}

/// `a: b: c` from an error chain, skipping empty and repeated links.
pub fn format_error_chain(err: &anyhow::Error) -> String {
    let mut parts = Vec::<String>::new();
    for cause in err.chain() {
        let s = cause.to_string();
        if s.is_empty() {
            continue;
        }
        if parts.last() == Some(&s) {
            continue;
        }
        parts.push(s);
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(": ")
    }
}

fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let suffix = "...(truncated)";
    let keep = max_bytes.saturating_sub(suffix.len()).max(1);
    let mut end = keep.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    let mut out = s[..end].to_string();
    out.push_str(suffix);
    out
}
