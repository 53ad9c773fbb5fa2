//! Error types for the settlement engine

use crate::types::{CycleId, GroupId, MemberId, Money};
use thiserror::Error;

/// Coarse classification used by callers to decide how to surface an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Validation,
    NoEligibleWinner,
    Persistence,
    Notification,
    Config,
}

#[derive(Error, Debug)]
pub enum ChitError {
    #[error("Bidding cycle {0} not found")]
    CycleNotFound(CycleId),

    #[error("Group {0} not found")]
    GroupNotFound(GroupId),

    #[error("Bidding cycle {0} is not open")]
    CycleNotOpen(CycleId),

    #[error("Bidding cycle {0} is already closed")]
    AlreadySettled(CycleId),

    #[error("Group {0} is completed, all members have received the pool")]
    GroupCompleted(GroupId),

    #[error("Bidding for cycle {0} has not started yet")]
    BiddingNotStarted(CycleId),

    #[error("Bidding period for cycle {0} has ended")]
    BiddingEnded(CycleId),

    #[error("Member {member_id} is not a member of group {group_id}")]
    NotAMember { member_id: MemberId, group_id: GroupId },

    #[error("Member {member_id} already won a cycle in group {group_id} and cannot bid again")]
    AlreadyWon { member_id: MemberId, group_id: GroupId },

    #[error("Bid amount {amount} must be less than the pool amount {pool}")]
    BidTooHigh { amount: Money, pool: Money },

    #[error("Bid {amount} is below the minimum {floor} (max reduction {max_reduction_pct}%)")]
    BidBelowFloor {
        amount: Money,
        floor: Money,
        max_reduction_pct: rust_decimal::Decimal,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No eligible winner for cycle {0}: every member has already won")]
    NoEligibleWinner(CycleId),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ChitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChitError::CycleNotFound(_) | ChitError::GroupNotFound(_) => ErrorKind::NotFound,
            ChitError::CycleNotOpen(_)
            | ChitError::AlreadySettled(_)
            | ChitError::GroupCompleted(_)
            | ChitError::BiddingNotStarted(_)
            | ChitError::BiddingEnded(_)
            | ChitError::NotAMember { .. }
            | ChitError::AlreadyWon { .. }
            | ChitError::InvalidState(_) => ErrorKind::InvalidState,
            ChitError::BidTooHigh { .. }
            | ChitError::BidBelowFloor { .. }
            | ChitError::InvalidAmount(_)
            | ChitError::Validation(_) => ErrorKind::Validation,
            ChitError::NoEligibleWinner(_) => ErrorKind::NoEligibleWinner,
            ChitError::Database(_) | ChitError::Migration(_) => ErrorKind::Persistence,
            ChitError::Notification(_) | ChitError::Http(_) => ErrorKind::Notification,
            ChitError::Config(_) => ErrorKind::Config,
        }
    }

    /// Losing a settlement race is expected when several triggers fire at once.
    pub fn is_benign(&self) -> bool {
        matches!(self, ChitError::AlreadySettled(_))
    }
}

pub type Result<T> = std::result::Result<T, ChitError>;
