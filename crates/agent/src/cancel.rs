//! Cooperative stop signalling.
//!
//! [`StopHandle::stop`] flips a `watch` flag; every suspension point in the
//! loop (delays, settle polling, capture, the decision request) races
//! [`StopSignal::stopped`]. Device actions are never raced.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Create a connected handle/signal pair.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

/// Requests a stop. Cheap to clone; hand one to the Ctrl-C handler.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observes stop requests.
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    /// A signal with no handle; it never fires.
    pub fn never() -> Self {
        stop_channel().1
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            // Every handle is gone, so no stop can ever arrive.
            std::future::pending::<()>().await;
        }
    }

    /// Sleep unless stopped first. Returns `false` if the sleep was cut short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stopped() => false,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::never()
    }
}
