use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::readiness::{ReadinessStrategy, ReadinessWaiter};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CONNECT_POLL_MS: u64 = 200;
const DEFAULT_LISTENER_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_LISTENER_POLL_MS: u64 = 250;
const DEFAULT_RESTART_PAUSE_MS: u64 = 500;

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn lookup_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    lookup(name).and_then(|v| v.trim().parse::<u64>().ok())
}

fn lookup_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn readiness_strategy_from(lookup: &impl Fn(&str) -> Option<String>) -> ReadinessStrategy {
    match lookup_string(lookup, "SRVMGR_READY_STRATEGY")
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("listener") | Some("listen") | Some("netstat") => ReadinessStrategy::Listener,
        _ => ReadinessStrategy::Connect,
    }
}

pub fn readiness_waiter() -> ReadinessWaiter {
    readiness_waiter_from(env_var)
}

fn readiness_waiter_from(lookup: impl Fn(&str) -> Option<String>) -> ReadinessWaiter {
    let strategy = readiness_strategy_from(&lookup);
    let (default_timeout, default_poll) = match strategy {
        ReadinessStrategy::Connect => (DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_CONNECT_POLL_MS),
        ReadinessStrategy::Listener => (DEFAULT_LISTENER_TIMEOUT_MS, DEFAULT_LISTENER_POLL_MS),
    };
    let timeout = lookup_u64(&lookup, "SRVMGR_READY_TIMEOUT_MS")
        .map(|v| v.clamp(200, 10 * 60 * 1000))
        .unwrap_or(default_timeout);
    let poll = lookup_u64(&lookup, "SRVMGR_READY_POLL_MS")
        .map(|v| v.clamp(20, 5000))
        .unwrap_or(default_poll);

    ReadinessWaiter {
        timeout: Duration::from_millis(timeout),
        poll_interval: Duration::from_millis(poll),
        strategy,
    }
}

pub fn restart_pause() -> Duration {
    restart_pause_from(env_var)
}

fn restart_pause_from(lookup: impl Fn(&str) -> Option<String>) -> Duration {
    Duration::from_millis(
        lookup_u64(&lookup, "SRVMGR_RESTART_PAUSE_MS")
            .map(|v| v.clamp(0, 10_000))
            .unwrap_or(DEFAULT_RESTART_PAUSE_MS),
    )
}

pub fn node_program() -> String {
    lookup_string(&env_var, "SRVMGR_NODE").unwrap_or_else(|| "node".to_string())
}

pub fn npm_program() -> String {
    lookup_string(&env_var, "SRVMGR_NPM").unwrap_or_else(|| {
        if cfg!(windows) {
            "npm.cmd".to_string()
        } else {
            "npm".to_string()
        }
    })
}

/// Every on-disk location the supervisor touches, derived from the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLayout {
    pub root: PathBuf,
}

impl ServerLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn server_dir(&self) -> PathBuf {
        self.root.join("server")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.server_dir().join(".server.pid")
    }

    pub fn log_file(&self) -> PathBuf {
        self.server_dir().join("server.log")
    }

    pub fn dev_runner(&self) -> PathBuf {
        self.server_dir()
            .join("node_modules")
            .join("tsx")
            .join("dist")
            .join("cli.js")
    }

    /// Dev entry, relative to the root since the runner is started from there.
    pub fn dev_entry(&self) -> &'static Path {
        Path::new("server/src/index.ts")
    }

    pub fn artifact(&self) -> PathBuf {
        self.server_dir().join("dist").join("index.js")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn readiness_defaults_depend_on_strategy() {
        let connect = readiness_waiter_from(vars(&[]));
        assert_eq!(connect.strategy, ReadinessStrategy::Connect);
        assert_eq!(connect.timeout, Duration::from_millis(10_000));
        assert_eq!(connect.poll_interval, Duration::from_millis(200));

        let listener = readiness_waiter_from(vars(&[("SRVMGR_READY_STRATEGY", "listener")]));
        assert_eq!(listener.strategy, ReadinessStrategy::Listener);
        assert_eq!(listener.timeout, Duration::from_millis(5_000));
        assert_eq!(listener.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn strategy_aliases_are_case_insensitive() {
        for value in ["listener", "listen", "netstat", " LISTENER "] {
            let w = readiness_waiter_from(vars(&[("SRVMGR_READY_STRATEGY", value)]));
            assert_eq!(w.strategy, ReadinessStrategy::Listener, "{value:?}");
        }
        for value in ["connect", "tcp", ""] {
            let w = readiness_waiter_from(vars(&[("SRVMGR_READY_STRATEGY", value)]));
            assert_eq!(w.strategy, ReadinessStrategy::Connect, "{value:?}");
        }
    }

    #[test]
    fn readiness_values_are_clamped() {
        let low = readiness_waiter_from(vars(&[
            ("SRVMGR_READY_TIMEOUT_MS", "1"),
            ("SRVMGR_READY_POLL_MS", "1"),
        ]));
        assert_eq!(low.timeout, Duration::from_millis(200));
        assert_eq!(low.poll_interval, Duration::from_millis(20));

        let high = readiness_waiter_from(vars(&[
            ("SRVMGR_READY_TIMEOUT_MS", "99999999"),
            ("SRVMGR_READY_POLL_MS", "999999"),
        ]));
        assert_eq!(high.timeout, Duration::from_millis(600_000));
        assert_eq!(high.poll_interval, Duration::from_millis(5_000));

        let exact = readiness_waiter_from(vars(&[
            ("SRVMGR_READY_TIMEOUT_MS", " 3000 "),
            ("SRVMGR_READY_POLL_MS", "50"),
        ]));
        assert_eq!(exact.timeout, Duration::from_millis(3_000));
        assert_eq!(exact.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let w = readiness_waiter_from(vars(&[
            ("SRVMGR_READY_STRATEGY", "listen"),
            ("SRVMGR_READY_TIMEOUT_MS", "abc"),
            ("SRVMGR_READY_POLL_MS", "-5"),
        ]));
        assert_eq!(w.timeout, Duration::from_millis(5_000));
        assert_eq!(w.poll_interval, Duration::from_millis(250));
        assert_eq!(
            restart_pause_from(vars(&[("SRVMGR_RESTART_PAUSE_MS", "soon")])),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn restart_pause_is_clamped() {
        assert_eq!(restart_pause_from(vars(&[])), Duration::from_millis(500));
        assert_eq!(
            restart_pause_from(vars(&[("SRVMGR_RESTART_PAUSE_MS", "0")])),
            Duration::ZERO
        );
        assert_eq!(
            restart_pause_from(vars(&[("SRVMGR_RESTART_PAUSE_MS", "99999")])),
            Duration::from_millis(10_000)
        );
    }

    #[test]
    fn layout_places_state_next_to_server_sources() {
        let layout = ServerLayout::new("/work/app");
        assert_eq!(layout.pid_file(), PathBuf::from("/work/app/server/.server.pid"));
        assert_eq!(layout.log_file(), PathBuf::from("/work/app/server/server.log"));
        assert_eq!(
            layout.dev_runner(),
            PathBuf::from("/work/app/server/node_modules/tsx/dist/cli.js")
        );
        assert_eq!(layout.artifact(), PathBuf::from("/work/app/server/dist/index.js"));
    }
}
