use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::amounts::Component;
use crate::models::{AccountId, ApprovalTier, Disposition, GroupId};

#[derive(Debug, Error)]
pub enum WaiverError {
    #[error("invalid {component} percentage {value}: must be within [0, 1]")]
    InvalidPercentage { component: Component, value: Decimal },

    #[error(
        "reference {component} total {requested} for obligation group {group_id} does not fit outstanding {available}"
    )]
    ReferenceBudgetMismatch {
        group_id: GroupId,
        component: Component,
        requested: i64,
        available: i64,
    },

    #[error("approver {approver_id} may not act as {tier}: {reason}")]
    UnauthorizedTier {
        approver_id: String,
        tier: ApprovalTier,
        reason: String,
    },

    #[error("waiver request {request_id} is already {disposition}")]
    AlreadyTerminal {
        request_id: Uuid,
        disposition: Disposition,
    },

    #[error("account {account_id} has no outstanding obligations")]
    NoActiveObligations { account_id: AccountId },

    #[error("account {account_id} is busy: gave up after {attempts} attempts")]
    ConcurrentMutationConflict { account_id: AccountId, attempts: u32 },

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WaiverError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Bugs in allocation or ledger arithmetic, as opposed to rejected input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("account {account_id} changed concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        account_id: AccountId,
        expected: u64,
        found: u64,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
