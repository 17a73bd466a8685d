use loanbook_core::{
    AccountState, ChangeSet, LedgerMutation, MultiplePaymentPtp, PendingWaiver, WaiverApproval,
    WaiverError, WaiverEvent, WaiverRequest, storage::upsert,
};
use uuid::Uuid;

/// A loaded account plus the changes made to it so far in this operation.
///
/// Every mutation is applied to the working state immediately and recorded
/// in the change set, so later steps of the same operation see earlier ones.
#[derive(Debug, Clone)]
pub struct AccountDraft {
    pub state: AccountState,
    pub changes: ChangeSet,
    pub events: Vec<WaiverEvent>,
}

impl AccountDraft {
    pub fn new(state: AccountState) -> Self {
        Self {
            state,
            changes: ChangeSet::default(),
            events: Vec::new(),
        }
    }

    pub fn apply_ledger(&mut self, mutation: LedgerMutation) -> Result<(), WaiverError> {
        self.state.ledger.apply(&mutation)?;
        self.changes.ledger.push(mutation);
        Ok(())
    }

    pub fn put_request(&mut self, request: WaiverRequest) {
        upsert(&mut self.state.requests, request.clone(), |record| record.id);
        self.changes.put_request(request);
    }

    pub fn insert_approval(&mut self, approval: WaiverApproval) {
        self.state.approvals.push(approval.clone());
        self.changes.approvals.push(approval);
    }

    pub fn put_pending_waiver(&mut self, pending: PendingWaiver) {
        upsert(&mut self.state.pending_waivers, pending.clone(), |record| record.id);
        self.changes.put_pending_waiver(pending);
    }

    pub fn put_ptp_entry(&mut self, entry: MultiplePaymentPtp) {
        upsert(&mut self.state.ptp_schedules, entry.clone(), |record| record.id);
        self.changes.put_ptp_entry(entry);
    }

    pub fn emit(&mut self, event: WaiverEvent) {
        self.events.push(event);
    }

    pub fn request(&self, request_id: Uuid) -> Result<WaiverRequest, WaiverError> {
        self.state
            .request(request_id)
            .cloned()
            .ok_or_else(|| WaiverError::NotFound(format!("waiver request {request_id}")))
    }
}
