use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Shared run/stop switch for the reader threads and the bridge loop.
///
/// Starts out running and can only be stopped, once.
#[derive(Clone, Debug)]
pub struct RunningFlag {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    running: AtomicBool,
    stopped: Notify,
}

impl Default for RunningFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningFlag {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                running: AtomicBool::new(true),
                stopped: Notify::new(),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Requests shutdown. Returns true only for the call that flipped the flag.
    pub fn stop(&self) -> bool {
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        if was_running {
            self.inner.stopped.notify_waiters();
        }
        was_running
    }

    /// Resolves once [`RunningFlag::stop`] has been called.
    pub async fn stopped(&self) {
        loop {
            // Register before checking so a concurrent stop() cannot be missed.
            let notified = self.inner.stopped.notified();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_stop_transitions_once() {
        let flag = RunningFlag::new();
        assert!(flag.is_running());
        assert!(flag.stop());
        assert!(!flag.is_running());
        assert!(!flag.stop());
        assert!(!flag.is_running());
    }

    #[test]
    fn test_clones_share_state() {
        let flag = RunningFlag::new();
        let other = flag.clone();
        other.stop();
        assert!(!flag.is_running());
    }

    #[tokio::test]
    async fn test_stopped_wakes_waiters() -> anyhow::Result<()> {
        let flag = RunningFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.stopped().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        flag.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter).await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_stopped_returns_immediately_when_already_stopped() -> anyhow::Result<()> {
        let flag = RunningFlag::new();
        flag.stop();
        tokio::time::timeout(Duration::from_millis(100), flag.stopped()).await?;
        Ok(())
    }
}
