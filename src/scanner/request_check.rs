//! Opportunistic expiry check driven by inbound requests

use super::ExpiryScanner;
use crate::settlement::SettlementTrigger;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Admits at most one background scan per `min_interval`
pub struct RequestCheck {
    scanner: Arc<ExpiryScanner>,
    min_interval: Duration,
    last_check: Mutex<Option<Instant>>,
}

impl RequestCheck {
    pub fn new(scanner: Arc<ExpiryScanner>, min_interval: Duration) -> Self {
        Self {
            scanner,
            min_interval,
            last_check: Mutex::new(None),
        }
    }

    /// Claims the slot if the previous check is at least `min_interval` old
    pub fn try_acquire(&self, now: Instant) -> bool {
        let mut last = self.last_check.lock();
        match *last {
            Some(previous) if now.duration_since(previous) < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Spawn a scan if due; never delays the request
    pub fn on_request(&self) -> bool {
        if !self.try_acquire(Instant::now()) {
            return false;
        }

        let scanner = self.scanner.clone();
        tokio::spawn(async move {
            match scanner.run_once(Utc::now(), SettlementTrigger::RequestCheck).await {
                Ok(report) if report.settled_count() > 0 => {
                    debug!(closed = report.settled_count(), "Request check closed expired cycles")
                }
                Ok(_) => {}
                Err(e) => warn!("Request-triggered expiry check failed: {}", e),
            }
        });
        true
    }
}
