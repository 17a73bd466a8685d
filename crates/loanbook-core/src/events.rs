use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{AccountId, ApprovalTier};

/// Fire-and-forget notifications emitted after a committed state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WaiverEvent {
    RequestSubmitted {
        account_id: AccountId,
        request_id: Uuid,
        total_waived: i64,
    },
    ApprovalNeeded {
        account_id: AccountId,
        request_id: Uuid,
        tier: ApprovalTier,
    },
    Approved {
        account_id: AccountId,
        request_id: Uuid,
        pending_waiver_id: Uuid,
    },
    Rejected {
        account_id: AccountId,
        request_id: Uuid,
        tier: ApprovalTier,
    },
    WaiverImplemented {
        account_id: AccountId,
        pending_waiver_id: Uuid,
        replayed_payments: usize,
    },
    WaiverExpired {
        account_id: AccountId,
        request_id: Uuid,
        pending_waiver_id: Option<Uuid>,
    },
    PtpInstallmentPaid {
        account_id: AccountId,
        request_id: Uuid,
        sequence: u32,
    },
}

impl WaiverEvent {
    pub fn account_id(&self) -> AccountId {
        match self {
            WaiverEvent::RequestSubmitted { account_id, .. }
            | WaiverEvent::ApprovalNeeded { account_id, .. }
            | WaiverEvent::Approved { account_id, .. }
            | WaiverEvent::Rejected { account_id, .. }
            | WaiverEvent::WaiverImplemented { account_id, .. }
            | WaiverEvent::WaiverExpired { account_id, .. }
            | WaiverEvent::PtpInstallmentPaid { account_id, .. } => *account_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_name() {
        let event = WaiverEvent::ApprovalNeeded {
            account_id: 3,
            request_id: Uuid::nil(),
            tier: ApprovalTier::CollectionsHead,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "approval_needed");
        assert_eq!(value["tier"], "collections_head");

        let back: WaiverEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back.account_id(), 3);
    }
}
