//! Expiry scanner
//!
//! Stateless periodic check: each tick lists open cycles whose bidding window
//! has elapsed and settles them. Safe to kill and restart at any point.

mod request_check;


pub use request_check::RequestCheck;

use crate::config::ScannerConfig;
use crate::error::{ErrorKind, Result};
use crate::settlement::{SettlementEngine, SettlementTrigger};
use crate::types::{CycleId, SettlementSummary};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Outcome of one scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub expired: usize,
    pub settled: Vec<SettlementSummary>,
    pub already_settled: usize,
    pub failed: Vec<(CycleId, String)>,
}

impl ScanReport {
    pub fn settled_count(&self) -> usize {
        self.settled.len()
    }
}

pub struct ExpiryScanner {
    engine: Arc<SettlementEngine>,
    interval: Duration,
    initial_delay: Duration,
}

impl ExpiryScanner {
    pub fn new(engine: Arc<SettlementEngine>, config: &ScannerConfig) -> Self {
        Self {
            engine,
            interval: config.interval(),
            initial_delay: config.initial_delay(),
        }
    }

    pub fn engine(&self) -> &Arc<SettlementEngine> {
        &self.engine
    }

    /// Settle every cycle expired at `now`; one failure never stops the rest
    pub async fn run_once(
        &self,
        now: DateTime<Utc>,
        trigger: SettlementTrigger,
    ) -> Result<ScanReport> {
        let expired = self.engine.database().list_expired_open_cycles(now).await?;
        let mut report = ScanReport {
            expired: expired.len(),
            ..Default::default()
        };

        if expired.is_empty() {
            return Ok(report);
        }
        debug!(count = expired.len(), %trigger, "Found expired bidding cycles");

        let results = join_all(expired.iter().map(|&cycle_id| {
            let engine = self.engine.clone();
            async move { (cycle_id, engine.settle(cycle_id, trigger).await) }
        }))
        .await;

        for (cycle_id, result) in results {
            match result {
                Ok(summary) => report.settled.push(summary),
                Err(e) if e.is_benign() => report.already_settled += 1,
                Err(e) => {
                    if e.kind() == ErrorKind::NoEligibleWinner {
                        error!(cycle_id, "Expired cycle cannot be settled: {}", e);
                    }
                    report.failed.push((cycle_id, e.to_string()));
                }
            }
        }

        if report.settled_count() > 0 {
            info!(
                closed = report.settled_count(),
                already_settled = report.already_settled,
                failed = report.failed.len(),
                %trigger,
                "Closed expired cycle(s)"
            );
        }
        Ok(report)
    }

    /// Poll forever
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting expiry scanner"
        );
        tokio::time::sleep(self.initial_delay).await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once(Utc::now(), SettlementTrigger::Scanner).await {
                warn!("Expiry scan failed: {}", e);
            }
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
