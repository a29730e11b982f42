//! One-shot startup gate.
//!
//! The system signals once, after every bus is configured. Dispatch waits for
//! it before its first request and the master pollers skip their reads until
//! it fires. Nothing resets it.

use tokio::sync::watch;

/// Sending half, owned by whoever finishes startup
#[derive(Debug)]
pub struct Readiness {
    tx: watch::Sender<bool>,
}

/// Receiving half; clone freely
#[derive(Debug, Clone)]
pub struct ReadyWaiter {
    rx: watch::Receiver<bool>,
}

pub fn readiness() -> (Readiness, ReadyWaiter) {
    let (tx, rx) = watch::channel(false);
    (Readiness { tx }, ReadyWaiter { rx })
}

impl Readiness {
    pub fn signal(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn waiter(&self) -> ReadyWaiter {
        ReadyWaiter {
            rx: self.tx.subscribe(),
        }
    }
}

impl ReadyWaiter {
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves `true` once signalled, or `false` if the sender went away first.
    pub async fn wait(&mut self) -> bool {
        self.rx.wait_for(|ready| *ready).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_signal() {
        let (ready, mut waiter) = readiness();
        assert!(!waiter.is_ready());

        let handle = tokio::spawn(async move { waiter.wait().await });
        tokio::time::sleep(Duration::from_millis(1)).await;
        ready.signal();

        assert!(handle.await.unwrap());
        assert!(ready.is_ready());
    }

    #[tokio::test]
    async fn test_late_waiter_sees_signal() {
        let (ready, _) = readiness();
        ready.signal();
        let mut late = ready.waiter();
        assert!(late.wait().await);
    }

    #[tokio::test]
    async fn test_dropped_sender_releases_waiters() {
        let (ready, mut waiter) = readiness();
        drop(ready);
        assert!(!waiter.wait().await);
    }
}
