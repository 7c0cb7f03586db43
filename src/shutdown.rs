use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

/// Process-wide shutdown flag. Cloned into everything that can end the
/// process or must stop when it ends.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Triggers after `delay` without blocking the caller.
    pub fn trigger_after(&self, delay: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.trigger();
        });
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in `self`, so this only errors if every clone is
        // gone, and then nobody can trigger anyway.
        let _ = rx.wait_for(|stop| *stop).await;
    }
}
