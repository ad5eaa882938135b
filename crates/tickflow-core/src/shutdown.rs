//! Process-wide cancellation signal built on `tokio::sync::watch`.

use tokio::sync::watch;

/// Sending half; dropping it without triggering never cancels anyone.
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

/// Receiving half, cloned into every run.
#[derive(Debug, Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, Shutdown { receiver })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown is triggered.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|triggered| *triggered).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn trigger_reaches_every_subscriber() {
        let (trigger, shutdown) = channel();
        let other = trigger.subscribe();
        assert!(!shutdown.is_triggered());

        trigger.trigger();
        shutdown.cancelled().await;
        other.cancelled().await;
        assert!(other.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trigger_never_cancels() {
        let (trigger, shutdown) = channel();
        drop(trigger);

        let waited = tokio::time::timeout(Duration::from_secs(3600), shutdown.cancelled()).await;
        assert!(waited.is_err());
    }
}
