//! Shutdown coordination.
//!
//! The accept loop, every connection task and the demotion ticker subscribe
//! to one [`Shutdown`] flag owned by the server.

use tokio::sync::watch;

/// A one-way flag: once triggered it stays triggered.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Raises the flag. Safe to call more than once.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Tasks still holding a receiver.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once `rx` reports the flag raised, or its sender is gone.
pub async fn wait(rx: &mut watch::Receiver<bool>) {
    // wait_for checks the current value first
    let _ = rx.wait_for(|stopped| *stopped).await;
}

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both SIGTERM (sent by orchestrators such as
/// Kubernetes) and SIGINT (Ctrl-C). Elsewhere only Ctrl-C is available. If
/// a handler cannot be installed the failure is logged and that signal is
/// never delivered.
pub async fn os_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn trigger_wakes_every_subscriber() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();
        assert_eq!(shutdown.receiver_count(), 2);

        let waiter = tokio::spawn(async move { wait(&mut a).await });
        shutdown.trigger();
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        // late waiters see the raised flag immediately
        wait(&mut b).await;
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn dropped_sender_releases_waiters() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        drop(shutdown);
        wait(&mut rx).await;
    }
}
