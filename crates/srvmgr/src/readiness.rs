use std::time::Duration;

use crate::probe::ProcessProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessStrategy {
    /// Ready once `127.0.0.1:<port>` accepts a TCP connection.
    Connect,
    /// Ready once any process owns a listener on the port.
    Listener,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadinessWaiter {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub strategy: ReadinessStrategy,
}

impl ReadinessWaiter {
    pub async fn wait<P: ProcessProbe>(&self, port: u16, probe: &P) -> bool {
        match self.strategy {
            ReadinessStrategy::Connect => {
                wait_for_listening(port, self.timeout, self.poll_interval).await
            }
            ReadinessStrategy::Listener => {
                poll_until(self.timeout, self.poll_interval, move || async move {
                    !probe.listening_pids(port).is_empty()
                })
                .await
            }
        }
    }
}

pub async fn wait_for_listening(port: u16, timeout: Duration, poll_interval: Duration) -> bool {
    poll_until(timeout, poll_interval, move || async move {
        connect_once(port, poll_interval).await
    })
    .await
}

async fn connect_once(port: u16, limit: Duration) -> bool {
    matches!(
        tokio::time::timeout(limit, tokio::net::TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

/// Check, then sleep, until `check` passes or `timeout` runs out. Never sleeps
/// past the deadline.
async fn poll_until<F, Fut>(timeout: Duration, poll_interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn free_port() -> u16 {
        let l = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        l.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn returns_true_promptly_when_port_is_open() {
        let l = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = l.local_addr().unwrap().port();

        let started = Instant::now();
        assert!(wait_for_listening(port, Duration::from_secs(5), Duration::from_millis(200)).await);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn gives_up_within_one_interval_of_timeout() {
        let port = free_port();
        let timeout = Duration::from_millis(600);
        let interval = Duration::from_millis(100);

        let started = Instant::now();
        assert!(!wait_for_listening(port, timeout, interval).await);
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout - interval, "{elapsed:?}");
        // One probe past the deadline at most, plus scheduling slack.
        assert!(elapsed <= timeout + interval + Duration::from_millis(300), "{elapsed:?}");
    }

    #[tokio::test]
    async fn detects_server_that_binds_late() {
        let port = free_port();
        let binder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let l = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(l);
        });

        assert!(wait_for_listening(port, Duration::from_secs(3), Duration::from_millis(50)).await);
        binder.abort();
    }

    struct CountingProbe {
        calls: AtomicU32,
        ready_after: u32,
    }

    impl ProcessProbe for CountingProbe {
        fn is_alive(&self, _pid: u32) -> bool {
            false
        }

        fn listening_pids(&self, _port: u16) -> BTreeSet<u32> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.ready_after {
                BTreeSet::from([77])
            } else {
                BTreeSet::new()
            }
        }

        fn kill_tree(&self, _pid: u32) {}
    }

    #[tokio::test]
    async fn listener_strategy_stops_polling_once_owner_appears() {
        let probe = CountingProbe {
            calls: AtomicU32::new(0),
            ready_after: 3,
        };
        let waiter = ReadinessWaiter {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            strategy: ReadinessStrategy::Listener,
        };
        assert!(waiter.wait(5000, &probe).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn listener_strategy_times_out() {
        let probe = CountingProbe {
            calls: AtomicU32::new(0),
            ready_after: u32::MAX,
        };
        let waiter = ReadinessWaiter {
            timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(25),
            strategy: ReadinessStrategy::Listener,
        };
        assert!(!waiter.wait(5000, &probe).await);
        assert!(probe.calls.load(Ordering::SeqCst) >= 4);
    }
}
