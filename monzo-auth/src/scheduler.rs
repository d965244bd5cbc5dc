//! Periodic token renewal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, RenewOutcome};

/// Drives [`Backend::renew`] on a fixed interval until told to stop.
pub struct Scheduler {
    backend: Arc<Backend>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(backend: Arc<Backend>, interval: Duration) -> Self {
        Self { backend, interval }
    }

    /// Run renewal passes until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A failed pass is logged and the next tick tries again.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Token renewal scheduler started, interval {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Token renewal scheduler stopped");
    }

    async fn tick(&self) {
        match self.backend.renew().await {
            Ok(RenewOutcome::Refreshed { expiry }) => {
                info!("Scheduled renewal refreshed token, expires at {}", expiry)
            }
            Ok(outcome) => debug!("Scheduled renewal: {:?}", outcome),
            Err(e) if e.is_transient() => warn!("Scheduled renewal will retry: {}", e),
            Err(e) => error!("Scheduled renewal failed: {}", e),
        }
    }
}
