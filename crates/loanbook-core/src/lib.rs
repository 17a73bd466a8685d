pub mod amounts;
pub mod clock;
pub mod error;
pub mod events;
pub mod ledger;
pub mod models;
pub mod storage;

pub use amounts::{Component, ComponentAmounts, Percentages, ceil_share};
pub use clock::{Clock, SystemClock};
pub use error::{StoreError, WaiverError};
pub use events::WaiverEvent;
pub use ledger::{
    AccountLedger, Forgiveness, LedgerMutation, PaymentEffect, PaymentStatus, PostedPayment,
};
pub use models::{
    AccountId, Allocation, ApprovalTier, Decision, DelinquencyBucket, Disposition,
    GroupAllocation, GroupId, MultiplePaymentPtp, Obligation, ObligationAllocation,
    ObligationGroup, ObligationId, ObligationWaiver, PendingWaiver, PendingWaiverGroupEntry,
    PendingWaiverStatus, ReferenceTotals, TierProgress, WaiverApproval, WaiverRequest,
};
pub use storage::{AccountState, ChangeSet, Notifier, ServicingStore};
