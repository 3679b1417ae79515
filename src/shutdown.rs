use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

/// A clonable handle used to coordinate graceful shutdown.
///
/// Long running tasks watch the handle and finish their in-flight work when
/// shutdown begins. `timeout` bounds how long the process waits for tasks to
/// exit; `delay` gives cancelled tasks a chance to reach an await point.
#[derive(Clone)]
pub struct Shutdown {
    sender: Arc<watch::Sender<bool>>,
    timeout: Duration,
    delay: Duration,
}

impl Shutdown {
    #[must_use]
    pub fn new(timeout: Duration, delay: Duration) -> Self {
        let (sender, _receiver) = watch::channel(false);

        Self {
            sender: Arc::new(sender),
            timeout,
            delay,
        }
    }

    /// Create a handle and start listening for SIGINT/SIGTERM.
    #[must_use]
    pub fn spawn(timeout: Duration, delay: Duration) -> Self {
        let shutdown = Self::new(timeout, delay);

        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                if let Err(error) = signal_shutdown().await {
                    tracing::error!(?error, "Error listening for shutdown signals");
                }
                shutdown.shutdown();
            }
        });

        shutdown
    }

    /// Send the signal to shut the program down.
    pub fn shutdown(&self) {
        // Does not fail because the sender is never dropped while a handle
        // exists.
        self.sender.send(true).unwrap();
    }

    /// Are we currently shutting down?
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait for shutdown to begin.
    ///
    /// Resolves immediately if the program is already shutting down. The
    /// resulting future is safe to cancel by dropping.
    pub async fn await_shutdown_begin(&self) {
        let mut watch = self.sender.subscribe();
        if *watch.borrow_and_update() {
            return;
        }
        // Does not fail because the sender outlives the subscription.
        watch.changed().await.unwrap();
    }

    /// Wait out the configured shutdown delay.
    pub async fn await_shutdown_delay(&self) {
        tokio::time::sleep(self.delay).await;
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(unix)]
async fn signal_shutdown() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let sigint = signal(SignalKind::interrupt())?;
    let sigterm = signal(SignalKind::terminate())?;
    tokio::pin!(sigint);
    tokio::pin!(sigterm);
    tokio::select! {
        _ = sigint.recv() => { info!("SIGINT received, shutting down"); }
        _ = sigterm.recv() => { info!("SIGTERM received, shutting down"); }
    };
    Ok(())
}

#[cfg(not(unix))]
async fn signal_shutdown() -> anyhow::Result<()> {
    use tokio::signal::ctrl_c;

    ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::time::{sleep, Duration};

    use super::*;

    #[tokio::test]
    async fn shutdown_signal() {
        let start = tokio::time::Instant::now();
        let shutdown = Shutdown::new(Duration::from_secs(30), Duration::from_secs(1));

        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                sleep(Duration::from_millis(100)).await;
                shutdown.shutdown();
            }
        });

        shutdown.await_shutdown_begin().await;

        let elapsed = start.elapsed();

        assert!(elapsed > Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(200));
        assert!(shutdown.is_shutting_down());
    }

    #[tokio::test]
    async fn await_resolves_immediately_when_already_down() {
        let shutdown = Shutdown::new(Duration::from_secs(30), Duration::from_secs(1));
        shutdown.shutdown();
        shutdown.await_shutdown_begin().await;
    }
}
