//! Periodic restoration of lapsed PIN windows.

use clinicq_core::ClinicFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Background loop returning the authorization of every arrival whose PIN
/// window lapsed without a further attempt.
pub struct Sweeper {
    flow: Arc<ClinicFlow>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(flow: Arc<ClinicFlow>, interval: Duration) -> Self {
        Self {
            flow,
            interval: interval.max(Duration::from_millis(100)),
        }
    }

    /// Run one sweep. Returns how many authorizations were restored.
    pub async fn sweep_once(&self) -> usize {
        let restored = self.flow.verifier().sweep_expired().await;
        if restored > 0 {
            info!(restored, "Restored lapsed arrival authorizations");
        }
        restored
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "Sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Sweeper stopping");
                        break;
                    }
                }
            }
        }
    }
}
