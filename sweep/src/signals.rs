//! One-shot phase signal.
//!
//! A run has phases that tasks outside the core pipeline care about, chiefly
//! "every uploader has drained". The mechanism here has two halves: a single
//! `Broadcaster` that announces the phase and any number of `Watcher`
//! instances waiting for it. A `Watcher` acknowledges the signal by being
//! dropped, which lets the `Broadcaster` optionally wait for every peer to
//! finish its last bit of work.

use std::time::Duration;

use tokio::{sync::watch, time};
use tracing::{debug, warn};

/// Construct a `Watcher` and `Broadcaster` pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    let (sender, receiver) = watch::channel(false);
    (Watcher { receiver }, Broadcaster { sender })
}

#[derive(Debug)]
/// Mechanism to notify `Watcher` instances that a phase has been reached.
pub struct Broadcaster {
    sender: watch::Sender<bool>,
}

impl Broadcaster {
    /// Send the signal to every `Watcher`.
    ///
    /// Function will NOT wait for peers to acknowledge the signal.
    pub fn signal(self) {
        self.sender.send_replace(true);
    }

    /// Send the signal to every `Watcher` and wait, at most `grace`, for all
    /// of them to drop off.
    ///
    /// Returns true if every peer acknowledged within `grace`.
    pub async fn signal_and_wait(self, grace: Duration) -> bool {
        self.sender.send_replace(true);
        let peers = self.sender.receiver_count();
        if peers == 0 {
            return true;
        }
        debug!("Waiting for {peers} peers");
        if time::timeout(grace, self.sender.closed()).await.is_ok() {
            true
        } else {
            warn!(
                "{peers} peers did not acknowledge within {grace:?}",
                peers = self.sender.receiver_count()
            );
            false
        }
    }
}

#[derive(Debug, Clone)]
/// Mechanism to wait for a phase change.
pub struct Watcher {
    receiver: watch::Receiver<bool>,
}

impl Watcher {
    /// Wait for the signal. Returns immediately if it has already been sent.
    ///
    /// The signal is considered sent if the `Broadcaster` is dropped without
    /// signaling, so a crashed broadcaster never strands its peers.
    pub async fn recv(&mut self) {
        // An Err means the sender is gone, which counts as the signal.
        let _ = self.receiver.wait_for(|reached| *reached).await;
    }

    /// Check without blocking whether the signal has been sent.
    #[must_use]
    pub fn try_recv(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watcher_observes_signal() {
        let (mut watcher, broadcaster) = signal();
        assert!(!watcher.try_recv());
        broadcaster.signal();
        watcher.recv().await;
        assert!(watcher.try_recv());
    }

    #[tokio::test]
    async fn dropped_broadcaster_releases_watchers() {
        let (mut watcher, broadcaster) = signal();
        drop(broadcaster);
        watcher.recv().await;
        assert!(watcher.try_recv());
    }

    #[tokio::test]
    async fn signal_and_wait_returns_once_peers_drop() {
        let (watcher, broadcaster) = signal();
        let peer = tokio::spawn({
            let mut watcher = watcher.clone();
            async move { watcher.recv().await }
        });
        drop(watcher);
        assert!(broadcaster.signal_and_wait(Duration::from_secs(5)).await);
        peer.await.expect("peer task panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn signal_and_wait_gives_up_after_grace() {
        let (_watcher, broadcaster) = signal();
        assert!(
            !broadcaster
                .signal_and_wait(Duration::from_millis(100))
                .await
        );
    }
}
