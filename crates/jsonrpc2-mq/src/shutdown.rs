//! Stop flag shared between a long-running loop and whoever controls it.
//!
//! Servers and subscription workers check the flag between polls, so a stop
//! request takes effect within one poll interval. Loops that can also wait
//! on [`StopSignal::stopped`] wake up immediately.

use tokio::sync::watch;

/// Cooperative stop request; clones observe the same flag
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Request a stop. Calling it again has no further effect.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        // wait_for checks the current value first
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
