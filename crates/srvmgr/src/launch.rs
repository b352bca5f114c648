use std::{
    collections::BTreeMap,
    path::PathBuf,
    process::Stdio,
};

use srvmgr_process::LaunchMode;
use tokio::process::Command;

use crate::{error::LaunchError, log_sink, settings::ServerLayout};

/// Fully resolved child command. Built fresh for every start; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Combined stdout/stderr sink.
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub log_path: PathBuf,
    /// Expected output; the build is only run when this is missing.
    pub artifact: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub node: String,
    pub npm: String,
}

impl Toolchain {
    pub fn from_env() -> Self {
        Self {
            node: crate::settings::node_program(),
            npm: crate::settings::npm_program(),
        }
    }
}

pub fn plan_launch(
    layout: &ServerLayout,
    toolchain: &Toolchain,
    mode: LaunchMode,
    port: u16,
) -> LaunchSpec {
    let mut env = BTreeMap::new();
    env.insert("PORT".to_string(), port.to_string());

    let (program, args) = match mode {
        LaunchMode::Development => {
            env.insert("NODE_ENV".to_string(), "development".to_string());
            let runner = layout.dev_runner();
            // Run the watcher through node directly; going through npm means a
            // shell wrapper on some platforms.
            if runner.exists() {
                (
                    toolchain.node.clone(),
                    vec![
                        runner.display().to_string(),
                        "watch".to_string(),
                        layout.dev_entry().display().to_string(),
                    ],
                )
            } else {
                (
                    toolchain.npm.clone(),
                    vec!["run".to_string(), "server:dev".to_string()],
                )
            }
        }
        LaunchMode::Production => {
            env.insert("NODE_ENV".to_string(), "production".to_string());
            (
                toolchain.node.clone(),
                vec![layout.artifact().display().to_string()],
            )
        }
    };

    LaunchSpec {
        program,
        args,
        cwd: layout.root.clone(),
        env,
        log_path: layout.log_file(),
    }
}

pub fn plan_build(layout: &ServerLayout, toolchain: &Toolchain) -> BuildSpec {
    BuildSpec {
        program: toolchain.npm.clone(),
        args: vec![
            "run".to_string(),
            "build".to_string(),
            "--workspace".to_string(),
            "server".to_string(),
        ],
        cwd: layout.root.clone(),
        log_path: layout.log_file(),
        artifact: layout.artifact(),
    }
}

/// Runs the external build and spawns the server child.
#[async_trait::async_trait]
pub trait Launcher: Send + Sync {
    /// Run the build to completion.
    async fn build(&self, spec: &BuildSpec) -> Result<(), LaunchError>;

    /// Spawn detached and return the child's PID without waiting on it.
    async fn spawn(&self, spec: &LaunchSpec) -> Result<u32, LaunchError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

#[async_trait::async_trait]
impl Launcher for CommandLauncher {
    async fn build(&self, spec: &BuildSpec) -> Result<(), LaunchError> {
        tracing::info!(
            program = %spec.program,
            args = ?spec.args,
            cwd = %spec.cwd.display(),
            "artifact missing; running build"
        );
        let log = log_sink::open_append(&spec.log_path);
        let (stdout, stderr) = log_sink::child_stdio(log.as_ref());

        let status = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .await
            .map_err(|source| LaunchError::BuildSpawn {
                program: spec.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(LaunchError::BuildFailed { status });
        }
        Ok(())
    }

    async fn spawn(&self, spec: &LaunchSpec) -> Result<u32, LaunchError> {
        let log = log_sink::open_append(&spec.log_path);
        let (stdout, stderr) = log_sink::child_stdio(log.as_ref());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(false);

        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    // New session: no controlling terminal, and the child leads
                    // its own process group so the tree can be signalled as one.
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        #[cfg(windows)]
        {
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
        }

        tracing::info!(
            program = %spec.program,
            args = ?spec.args,
            cwd = %spec.cwd.display(),
            log = %spec.log_path.display(),
            "exec"
        );

        let spawn_err = |source| LaunchError::Spawn {
            program: spec.program.clone(),
            source,
        };
        let child = cmd.spawn().map_err(spawn_err)?;
        let pid = child.id().ok_or_else(|| {
            spawn_err(std::io::Error::other("child exited before its pid was read"))
        })?;
        // Dropping the handle neither waits on nor signals the child.
        drop(child);
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pid_store::tests::temp_dir_for;

    fn toolchain() -> Toolchain {
        Toolchain {
            node: "node".to_string(),
            npm: "npm".to_string(),
        }
    }

    #[test]
    fn production_runs_artifact_with_port() {
        let layout = ServerLayout::new("/app");
        let spec = plan_launch(&layout, &toolchain(), LaunchMode::Production, 5000);
        assert_eq!(spec.program, "node");
        assert_eq!(spec.args, vec!["/app/server/dist/index.js".to_string()]);
        assert_eq!(spec.cwd, PathBuf::from("/app"));
        assert_eq!(spec.env.get("PORT").map(String::as_str), Some("5000"));
        assert_eq!(spec.env.get("NODE_ENV").map(String::as_str), Some("production"));
        assert_eq!(spec.log_path, PathBuf::from("/app/server/server.log"));
    }

    #[test]
    fn development_falls_back_to_workspace_script() {
        let layout = ServerLayout::new(temp_dir_for("plan-dev-fallback"));
        let spec = plan_launch(&layout, &toolchain(), LaunchMode::Development, 5173);
        assert_eq!(spec.program, "npm");
        assert_eq!(spec.args, vec!["run".to_string(), "server:dev".to_string()]);
        assert_eq!(spec.env.get("PORT").map(String::as_str), Some("5173"));
    }

    #[test]
    fn development_prefers_direct_runner() {
        let dir = temp_dir_for("plan-dev-direct");
        let layout = ServerLayout::new(&dir);
        let runner = layout.dev_runner();
        std::fs::create_dir_all(runner.parent().unwrap()).unwrap();
        std::fs::write(&runner, "").unwrap();

        let spec = plan_launch(&layout, &toolchain(), LaunchMode::Development, 5000);
        assert_eq!(spec.program, "node");
        assert_eq!(spec.args[0], runner.display().to_string());
        assert_eq!(&spec.args[1..], &["watch".to_string(), "server/src/index.ts".to_string()]);
        assert_eq!(spec.env.get("NODE_ENV").map(String::as_str), Some("development"));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn build_targets_server_workspace() {
        let layout = ServerLayout::new("/app");
        let b = plan_build(&layout, &toolchain());
        assert_eq!(b.program, "npm");
        assert_eq!(b.args.join(" "), "run build --workspace server");
        assert_eq!(b.artifact, PathBuf::from("/app/server/dist/index.js"));
    }

    #[tokio::test]
    async fn spawn_reports_missing_program() {
        let dir = temp_dir_for("spawn-missing");
        std::fs::create_dir_all(&dir).unwrap();
        let spec = LaunchSpec {
            program: "srvmgr-definitely-not-a-real-program".to_string(),
            args: Vec::new(),
            cwd: dir.clone(),
            env: BTreeMap::new(),
            log_path: dir.join("server.log"),
        };
        let err = CommandLauncher.spawn(&spec).await.unwrap_err();
        assert_eq!(err.code(), "spawn_failed");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_child_is_detached_and_logs_to_sink() {
        use crate::probe::{ProcessProbe, SystemProbe};

        let dir = temp_dir_for("spawn-detached");
        std::fs::create_dir_all(&dir).unwrap();
        let spec = LaunchSpec {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "echo port=$PORT; exec sleep 30".to_string()],
            cwd: dir.clone(),
            env: BTreeMap::from([("PORT".to_string(), "5000".to_string())]),
            log_path: dir.join("server.log"),
        };
        let pid = CommandLauncher.spawn(&spec).await.unwrap();
        assert!(SystemProbe.is_alive(pid));

        let pgid = unsafe { libc::getpgid(pid as i32) };
        assert_eq!(pgid, pid as i32);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut log = String::new();
        while std::time::Instant::now() < deadline {
            log = std::fs::read_to_string(&spec.log_path).unwrap_or_default();
            if log.contains("port=5000") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(log.contains("port=5000"), "{log:?}");

        SystemProbe.kill_tree(pid);
        let _ = std::fs::remove_dir_all(dir);
    }
}
