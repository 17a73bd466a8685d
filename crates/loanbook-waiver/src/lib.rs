pub mod allocator;
pub mod approval;
pub mod config;
pub mod draft;
pub mod engine;
pub mod lifecycle;
pub mod locks;
pub mod multi_ptp;
pub mod ptp;
pub mod snapshot;

pub use allocator::{allocate, check_invariants};
pub use approval::{ApprovalDecision, ApprovalPolicy, ApprovalTerms, Approver, Transition};
pub use config::EngineConfig;
pub use draft::AccountDraft;
pub use engine::{
    AccountWaiverSummary, DecisionOutcome, SubmitWaiverRequest, SubmittedRequest, WaiverEngine,
};
pub use lifecycle::PaymentOutcome;
pub use locks::{AccountLockGuard, AccountLocks};
pub use multi_ptp::{PromisedPayment, ScheduleProgress};
pub use ptp::{PtpOutcome, allocate_ptp};
pub use snapshot::ObligationSnapshot;
