use std::sync::Arc;

use tokio::sync::watch;

/// Run-scoped cancellation signal, cloned into every task of the run.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        // no-op if already cancelled
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            // sender lives as long as any clone of self
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// RUST_LOG=debug cargo test --package fleet-ops --lib -- cancel::test_cancellation --exact --show-output
#[tokio::test]
async fn test_cancellation() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cancel = Cancellation::new();
    assert!(!cancel.is_cancelled());

    let cloned = cancel.clone();
    let waiter = tokio::spawn(async move {
        cloned.cancelled().await;
        cloned.is_cancelled()
    });

    tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
    cancel.cancel();
    assert!(waiter.await.unwrap());
    assert!(cancel.is_cancelled());

    // already cancelled resolves immediately
    cancel.cancelled().await;
    cancel.cancel();
    assert!(cancel.is_cancelled());
}
