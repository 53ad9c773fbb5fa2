//! Chit Fund Settlement Engine
//!
//! Settles bidding cycles of rotating-savings groups: members bid in a reverse
//! auction for the pooled amount, the lowest bid wins and the discount is split
//! equally across the group.
//!
//! ## Architecture
//!
//! ```text
//! CycleOpener ──► cycle + contributions ──► announce (best-effort)
//!
//! BidLedger ──► bids ──┐
//!                      ▼
//! ExpiryScanner ─┐   SettlementEngine ──► cycle / contributions / profit rows
//! RequestCheck ──┼──►  (one atomic claim)  └──► NotificationDispatcher (best-effort)
//! Admin (api/cli)┘
//!
//! approve payout ──► CompletionWatcher ──► group completed
//! ```

pub mod api;
pub mod completion;
pub mod config;
pub mod cycles;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod scanner;
pub mod settlement;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod config_tests;
