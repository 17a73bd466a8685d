use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::WaiverEvent;
use crate::ledger::{AccountLedger, LedgerMutation};
use crate::models::{AccountId, MultiplePaymentPtp, PendingWaiver, WaiverApproval, WaiverRequest};

/// Everything the waiver engine knows about one account, read in one go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub version: u64,
    pub ledger: AccountLedger,
    pub requests: Vec<WaiverRequest>,
    pub approvals: Vec<WaiverApproval>,
    pub pending_waivers: Vec<PendingWaiver>,
    pub ptp_schedules: Vec<MultiplePaymentPtp>,
}

impl AccountState {
    pub fn new(ledger: AccountLedger) -> Self {
        Self {
            ledger,
            ..Self::default()
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.ledger.account_id
    }

    pub fn request(&self, request_id: Uuid) -> Option<&WaiverRequest> {
        self.requests.iter().find(|request| request.id == request_id)
    }

    pub fn approvals_for(&self, request_id: Uuid) -> Vec<&WaiverApproval> {
        let mut approvals: Vec<&WaiverApproval> = self
            .approvals
            .iter()
            .filter(|approval| approval.request_id == request_id)
            .collect();
        approvals.sort_by_key(|approval| (approval.decided_at, approval.tier));
        approvals
    }

    pub fn latest_approval(&self, request_id: Uuid) -> Option<&WaiverApproval> {
        self.approvals_for(request_id).last().copied()
    }

    pub fn active_pending_waiver(&self) -> Option<&PendingWaiver> {
        self.pending_waivers.iter().find(|pending| pending.is_active())
    }

    pub fn schedule_for(&self, request_id: Uuid) -> Vec<&MultiplePaymentPtp> {
        let mut schedule: Vec<&MultiplePaymentPtp> = self
            .ptp_schedules
            .iter()
            .filter(|entry| entry.request_id == request_id)
            .collect();
        schedule.sort_by_key(|entry| entry.sequence);
        schedule
    }

    pub fn has_open_waivers(&self) -> bool {
        self.requests.iter().any(WaiverRequest::is_open)
            || self.pending_waivers.iter().any(PendingWaiver::is_active)
    }
}

/// One all-or-nothing unit of work against an account.
///
/// Records are upserts keyed by id, except approvals which are insert-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub ledger: Vec<LedgerMutation>,
    pub requests: Vec<WaiverRequest>,
    pub approvals: Vec<WaiverApproval>,
    pub pending_waivers: Vec<PendingWaiver>,
    pub ptp_schedules: Vec<MultiplePaymentPtp>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty()
            && self.requests.is_empty()
            && self.approvals.is_empty()
            && self.pending_waivers.is_empty()
            && self.ptp_schedules.is_empty()
    }

    pub fn put_request(&mut self, request: WaiverRequest) {
        upsert(&mut self.requests, request, |existing| existing.id);
    }

    pub fn put_pending_waiver(&mut self, pending: PendingWaiver) {
        upsert(&mut self.pending_waivers, pending, |existing| existing.id);
    }

    pub fn put_ptp_entry(&mut self, entry: MultiplePaymentPtp) {
        upsert(&mut self.ptp_schedules, entry, |existing| existing.id);
    }
}

pub fn upsert<T, F>(records: &mut Vec<T>, record: T, key: F)
where
    F: Fn(&T) -> Uuid,
{
    let id = key(&record);
    match records.iter_mut().find(|existing| key(existing) == id) {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}

#[async_trait]
pub trait ServicingStore: Send + Sync {
    async fn load_account(&self, account_id: AccountId) -> Result<AccountState, StoreError>;

    async fn find_request_account(&self, request_id: Uuid)
    -> Result<Option<AccountId>, StoreError>;

    /// Applies `changes` atomically if the account is still at
    /// `expected_version`, returning the new version.
    async fn commit(
        &self,
        account_id: AccountId,
        expected_version: u64,
        changes: ChangeSet,
    ) -> Result<u64, StoreError>;

    async fn accounts_with_open_waivers(&self) -> Result<Vec<AccountId>, StoreError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &WaiverEvent) -> anyhow::Result<()>;
}
