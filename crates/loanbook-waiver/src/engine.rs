use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use loanbook_core::{
    AccountId, ApprovalTier, Clock, Decision, DelinquencyBucket, Disposition, GroupId,
    MultiplePaymentPtp, Notifier, PendingWaiver, Percentages, ReferenceTotals, ServicingStore,
    StoreError, SystemClock, TierProgress, WaiverApproval, WaiverError, WaiverEvent,
    WaiverRequest,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::allocator::allocate;
use crate::approval::{self, ApprovalDecision, Approver, Transition};
use crate::config::EngineConfig;
use crate::draft::AccountDraft;
use crate::lifecycle::{self, PaymentOutcome};
use crate::locks::AccountLocks;
use crate::multi_ptp::{self, PromisedPayment};
use crate::snapshot::ObligationSnapshot;

/// An agent's waiver proposal for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitWaiverRequest {
    pub account_id: AccountId,
    pub program: String,
    pub agent_id: String,
    pub percentages: Percentages,
    pub ptp_amount: i64,
    /// `None` waives across every open group.
    pub selected_groups: Option<Vec<GroupId>>,
    pub reference_totals: Option<ReferenceTotals>,
    pub days_past_due: i64,
    pub special_reason: Option<String>,
    pub valid_until: Option<NaiveDate>,
    pub ptp_schedule: Option<Vec<PromisedPayment>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedRequest {
    pub request_id: Uuid,
    pub disposition: Disposition,
    pub next_tier: Option<ApprovalTier>,
    pub pending_waiver_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionOutcome {
    pub request_id: Uuid,
    pub tier: ApprovalTier,
    pub terminal: bool,
    pub disposition: Disposition,
    pub next_tier: Option<ApprovalTier>,
    pub pending_waiver_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountWaiverSummary {
    pub active_request: Option<WaiverRequest>,
    pub active_approval: Option<WaiverApproval>,
    pub active_pending_waiver: Option<PendingWaiver>,
    pub ptp_schedule: Vec<MultiplePaymentPtp>,
}

/// Entry point for every waiver operation.
///
/// Each operation runs under the account's lock against a freshly loaded
/// [`AccountDraft`] and commits all of its changes in one store call. A commit
/// that loses a version race is retried from a fresh load.
pub struct WaiverEngine<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    clock: Arc<dyn Clock>,
    locks: AccountLocks,
    config: EngineConfig,
}

impl<S, N> WaiverEngine<S, N>
where
    S: ServicingStore,
    N: Notifier,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: EngineConfig) -> Self {
        Self {
            store,
            notifier,
            clock: Arc::new(SystemClock),
            locks: AccountLocks::new(),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub async fn submit_request(
        &self,
        input: SubmitWaiverRequest,
    ) -> Result<SubmittedRequest, WaiverError> {
        let program = normalize_required("program", &input.program)?;
        let agent_id = normalize_required("agent_id", &input.agent_id)?;
        input.percentages.validate()?;
        if input.ptp_amount < 0 {
            return Err(WaiverError::validation("ptp_amount must not be negative"));
        }
        if input.days_past_due < 0 {
            return Err(WaiverError::validation("days_past_due must not be negative"));
        }
        let special_reason = input
            .special_reason
            .as_deref()
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .map(str::to_string);

        let now = self.clock.now();
        let today = now.date_naive();
        let valid_until = input
            .valid_until
            .unwrap_or(today + Duration::days(self.config.default_validity_days));
        if valid_until < today {
            return Err(WaiverError::validation(format!(
                "valid_until {valid_until} is in the past"
            )));
        }
        let bucket = DelinquencyBucket::from_days_past_due(input.days_past_due);
        let policy = &self.config.policy;

        let submitted = self
            .transact(input.account_id, |draft| {
                lifecycle::expire_stale(draft, today)?;

                let snapshot =
                    ObligationSnapshot::build(&draft.state.ledger, input.selected_groups.as_deref())?;
                let allocation = allocate(
                    snapshot.groups(),
                    &input.percentages,
                    input.reference_totals.as_ref(),
                    input.ptp_amount,
                )?;
                let waived = allocation.total_waived();
                if waived.is_zero() {
                    return Err(WaiverError::validation(
                        "request would not waive anything",
                    ));
                }
                let after_waiver = allocation.total_after_waiver().total();
                if input.ptp_amount > after_waiver {
                    return Err(WaiverError::validation(format!(
                        "ptp_amount {} exceeds the {after_waiver} left after the waiver",
                        input.ptp_amount
                    )));
                }

                let superseded: Vec<WaiverRequest> = draft
                    .state
                    .requests
                    .iter()
                    .filter(|request| request.is_open())
                    .cloned()
                    .collect();
                for mut older in superseded {
                    info!(
                        account_id = older.account_id,
                        request_id = %older.id,
                        "superseding open waiver request"
                    );
                    older.disposition = Disposition::Expired;
                    older.updated_at = now;
                    draft.emit(WaiverEvent::WaiverExpired {
                        account_id: older.account_id,
                        request_id: older.id,
                        pending_waiver_id: None,
                    });
                    draft.put_request(older);
                }

                let tiers = policy.required_tiers(bucket, &waived, special_reason.is_some());
                let mut request = WaiverRequest {
                    id: Uuid::new_v4(),
                    account_id: input.account_id,
                    program: program.clone(),
                    agent_id: agent_id.clone(),
                    requested_pct: input.percentages,
                    display_pct: input.percentages.display_percent(),
                    total_waived: waived.total(),
                    ptp_amount: input.ptp_amount,
                    created_on: today,
                    valid_until,
                    bucket,
                    special_reason: special_reason.clone(),
                    reference_totals: input.reference_totals.clone(),
                    tiers: TierProgress::new(tiers),
                    disposition: Disposition::Pending,
                    multiple_ptp: false,
                    allocation: allocation.clone(),
                    created_at: now,
                    updated_at: now,
                };

                if let Some(promises) = &input.ptp_schedule {
                    let schedule = multi_ptp::build_schedule(
                        request.id,
                        promises,
                        request.ptp_amount,
                        today,
                        valid_until,
                    )?;
                    for entry in schedule {
                        draft.put_ptp_entry(entry);
                    }
                    request.multiple_ptp = true;
                }

                draft.emit(WaiverEvent::RequestSubmitted {
                    account_id: request.account_id,
                    request_id: request.id,
                    total_waived: request.total_waived,
                });

                let next_tier = request.tiers.next_required();
                let mut pending_waiver_id = None;
                match next_tier {
                    Some(tier) => {
                        draft.emit(WaiverEvent::ApprovalNeeded {
                            account_id: request.account_id,
                            request_id: request.id,
                            tier,
                        });
                        draft.put_request(request.clone());
                    }
                    None => {
                        request.disposition = Disposition::Approved;
                        draft.put_request(request.clone());
                        let pending = lifecycle::materialize(
                            draft,
                            &request,
                            None,
                            &allocation,
                            request.ptp_amount,
                            valid_until,
                            now,
                        );
                        draft.emit(WaiverEvent::Approved {
                            account_id: request.account_id,
                            request_id: request.id,
                            pending_waiver_id: pending.id,
                        });
                        pending_waiver_id = Some(pending.id);
                    }
                }

                Ok(SubmittedRequest {
                    request_id: request.id,
                    disposition: request.disposition,
                    next_tier,
                    pending_waiver_id,
                })
            })
            .await?;

        info!(
            account_id = input.account_id,
            request_id = %submitted.request_id,
            disposition = %submitted.disposition,
            %bucket,
            "waiver request submitted"
        );
        Ok(submitted)
    }

    pub async fn submit_decision(
        &self,
        request_id: Uuid,
        approver: &Approver,
        decision: ApprovalDecision,
    ) -> Result<DecisionOutcome, WaiverError> {
        let approver_id = normalize_required("approver_id", &approver.id)?;
        let notes = decision
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(str::to_string);
        if decision.decision == Decision::Reject && notes.is_none() {
            return Err(WaiverError::validation("a rejection needs notes"));
        }

        let account_id = self
            .store
            .find_request_account(request_id)
            .await?
            .ok_or_else(|| WaiverError::NotFound(format!("waiver request {request_id}")))?;
        let now = self.clock.now();
        let today = now.date_naive();

        // The inner result lets a lazily detected expiry commit before the
        // caller sees the rejection.
        let outcome = self
            .transact(account_id, |draft| {
                let current = draft.request(request_id)?;
                if current.is_open() && current.valid_until < today {
                    lifecycle::expire_stale(draft, today)?;
                    return Ok(Err(WaiverError::AlreadyTerminal {
                        request_id,
                        disposition: Disposition::Expired,
                    }));
                }

                let tier = approval::authorize(&current, approver, decision.tier)?;
                let previous = draft.state.latest_approval(request_id).cloned();
                let terms = approval::resolve_terms(&current, previous.as_ref(), &decision)?;
                if terms.valid_until < today {
                    return Err(WaiverError::validation(format!(
                        "valid_until {} is in the past",
                        terms.valid_until
                    )));
                }

                let allocation = match decision.decision {
                    Decision::Approve => {
                        let snapshot = ObligationSnapshot::build(&draft.state.ledger, None)?
                            .restricted_to(&current.allocation.group_ids())?;
                        let allocation = allocate(
                            snapshot.groups(),
                            &terms.pct,
                            terms.reference_totals.as_ref(),
                            terms.ptp_amount,
                        )?;
                        let after_waiver = allocation.total_after_waiver().total();
                        if terms.ptp_amount > after_waiver {
                            return Err(WaiverError::validation(format!(
                                "approved ptp {} exceeds the {after_waiver} left after the waiver",
                                terms.ptp_amount
                            )));
                        }
                        Some(allocation)
                    }
                    Decision::Reject => None,
                };

                let approval = WaiverApproval {
                    id: Uuid::new_v4(),
                    request_id,
                    tier,
                    decision: decision.decision,
                    approved_pct: terms.pct,
                    approved_ptp: terms.ptp_amount,
                    reference_totals: terms.reference_totals.clone(),
                    valid_from: today,
                    valid_until: terms.valid_until,
                    approver_id: approver_id.clone(),
                    notes: notes.clone(),
                    allocation: allocation.clone(),
                    decided_at: now,
                };
                draft.insert_approval(approval.clone());

                let mut request = current;
                let transition = approval::record_decision(&mut request, tier, decision.decision);
                request.updated_at = now;

                let mut pending_waiver_id = None;
                let mut next_tier = None;
                match transition {
                    Transition::Advanced { next } => {
                        next_tier = Some(next);
                        draft.emit(WaiverEvent::ApprovalNeeded {
                            account_id,
                            request_id,
                            tier: next,
                        });
                        draft.put_request(request.clone());
                    }
                    Transition::Rejected => {
                        draft.emit(WaiverEvent::Rejected {
                            account_id,
                            request_id,
                            tier,
                        });
                        draft.put_request(request.clone());
                    }
                    Transition::Approved => {
                        let Some(allocation) = allocation else {
                            return Err(WaiverError::InvariantViolation(format!(
                                "request {request_id} approved without an allocation"
                            )));
                        };
                        request.valid_until = terms.valid_until;
                        draft.put_request(request.clone());
                        let pending = lifecycle::materialize(
                            draft,
                            &request,
                            Some(approval.id),
                            &allocation,
                            terms.ptp_amount,
                            terms.valid_until,
                            now,
                        );
                        draft.emit(WaiverEvent::Approved {
                            account_id,
                            request_id,
                            pending_waiver_id: pending.id,
                        });
                        pending_waiver_id = Some(pending.id);
                    }
                }

                Ok(Ok(DecisionOutcome {
                    request_id,
                    tier,
                    terminal: transition.is_terminal(),
                    disposition: request.disposition,
                    next_tier,
                    pending_waiver_id,
                }))
            })
            .await??;

        info!(
            account_id,
            request_id = %request_id,
            tier = %outcome.tier,
            approver_id = %approver_id,
            disposition = %outcome.disposition,
            "waiver decision recorded"
        );
        Ok(outcome)
    }

    /// Applies a cleared payment, activating the account's pending waiver
    /// once enough has been paid inside its window.
    pub async fn on_payment_cleared(
        &self,
        account_id: AccountId,
        amount: i64,
        paid_at: DateTime<Utc>,
    ) -> Result<PaymentOutcome, WaiverError> {
        if amount <= 0 {
            return Err(WaiverError::validation("payment amount must be positive"));
        }

        let outcome = self
            .transact(account_id, |draft| lifecycle::on_payment(draft, amount, paid_at))
            .await?;
        debug!(account_id, amount, ?outcome, "payment processed");
        Ok(outcome)
    }

    /// Read-only view of what is currently in play on the account. Nothing
    /// is expired here; stale records show as they were last stored.
    pub async fn account_summary(
        &self,
        account_id: AccountId,
    ) -> Result<AccountWaiverSummary, WaiverError> {
        let state = self.store.load_account(account_id).await?;
        let today = self.clock.today();

        let active_request = state
            .requests
            .iter()
            .filter(|request| {
                request.is_open()
                    || (request.disposition == Disposition::Approved
                        && state
                            .active_pending_waiver()
                            .is_some_and(|pending| pending.request_id == request.id))
            })
            .filter(|request| request.valid_until >= today)
            .max_by_key(|request| request.created_at)
            .cloned();
        let active_approval = active_request
            .as_ref()
            .and_then(|request| state.latest_approval(request.id))
            .cloned();
        let active_pending_waiver = state
            .active_pending_waiver()
            .filter(|pending| pending.valid_until >= today)
            .cloned();
        let ptp_schedule = active_request
            .as_ref()
            .map(|request| state.schedule_for(request.id).into_iter().cloned().collect())
            .unwrap_or_default();

        Ok(AccountWaiverSummary {
            active_request,
            active_approval,
            active_pending_waiver,
            ptp_schedule,
        })
    }

    /// Expires every request and pending waiver whose validity date is
    /// before `today`. Returns how many records were expired; failing
    /// accounts are logged and skipped.
    pub async fn sweep_expired(&self, today: NaiveDate) -> Result<usize, WaiverError> {
        let accounts = self.store.accounts_with_open_waivers().await?;

        let mut expired = 0;
        for account_id in accounts {
            match self
                .transact(account_id, |draft| lifecycle::expire_stale(draft, today))
                .await
            {
                Ok(count) => expired += count,
                Err(err) => warn!(account_id, error = %err, "expiry sweep skipped account"),
            }
        }
        if expired > 0 {
            info!(expired, %today, "expiry sweep finished");
        }
        Ok(expired)
    }

    async fn transact<T, F>(&self, account_id: AccountId, mut work: F) -> Result<T, WaiverError>
    where
        F: FnMut(&mut AccountDraft) -> Result<T, WaiverError>,
    {
        let _guard = self
            .locks
            .acquire(account_id, self.config.lock_timeout())
            .await?;

        let attempts = self.config.commit_retries + 1;
        for attempt in 1..=attempts {
            let state = self.store.load_account(account_id).await?;
            let version = state.version;
            let mut draft = AccountDraft::new(state);

            let output = match work(&mut draft) {
                Ok(output) => output,
                Err(err) => {
                    if err.is_fatal() {
                        error!(account_id, error = %err, "waiver operation aborted");
                    }
                    return Err(err);
                }
            };

            let AccountDraft { changes, events, .. } = draft;
            if changes.is_empty() {
                return Ok(output);
            }

            match self.store.commit(account_id, version, changes).await {
                Ok(new_version) => {
                    debug!(account_id, version = new_version, "account committed");
                    self.publish(&events).await;
                    return Ok(output);
                }
                Err(StoreError::VersionConflict { found, .. }) => {
                    warn!(
                        account_id,
                        attempt,
                        expected = version,
                        found,
                        "account changed during operation, retrying"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(WaiverError::ConcurrentMutationConflict {
            account_id,
            attempts,
        })
    }

    async fn publish(&self, events: &[WaiverEvent]) {
        for event in events {
            if let Err(err) = self.notifier.notify(event).await {
                warn!(
                    account_id = event.account_id(),
                    error = %err,
                    "failed to deliver waiver notification"
                );
            }
        }
    }
}

fn normalize_required(field: &str, value: &str) -> Result<String, WaiverError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(WaiverError::validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}
