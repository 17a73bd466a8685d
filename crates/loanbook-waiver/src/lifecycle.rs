//! Turning approved waivers into pending ledger adjustments and consuming
//! them when the borrower pays.

use chrono::{DateTime, NaiveDate, Utc};
use loanbook_core::{
    Allocation, Component, Disposition, Forgiveness, LedgerMutation, ObligationWaiver,
    PaymentStatus, PendingWaiver, PendingWaiverGroupEntry, PendingWaiverStatus, PostedPayment,
    WaiverError, WaiverEvent, WaiverRequest,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::draft::AccountDraft;
use crate::multi_ptp;
use crate::ptp::distribute_payment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// No waiver in play; the payment went against un-waived balances.
    Unwaived,
    /// The pending waiver had lapsed before this payment arrived.
    Expired { pending_waiver_id: Uuid },
    /// Still short of the amount needed to activate the waiver.
    Accruing { accumulated: i64, need_to_pay: i64 },
    Implemented {
        pending_waiver_id: Uuid,
        replayed_payments: usize,
    },
}

/// Creates the account's one active pending waiver, expiring any older one.
pub fn materialize(
    draft: &mut AccountDraft,
    request: &WaiverRequest,
    approval_id: Option<Uuid>,
    allocation: &Allocation,
    need_to_pay: i64,
    valid_until: NaiveDate,
    now: DateTime<Utc>,
) -> PendingWaiver {
    let superseded: Vec<PendingWaiver> = draft
        .state
        .pending_waivers
        .iter()
        .filter(|pending| pending.is_active())
        .cloned()
        .collect();
    for mut old in superseded {
        info!(
            account_id = old.account_id,
            pending_waiver_id = %old.id,
            superseded_by = %request.id,
            "superseding active pending waiver"
        );
        old.status = PendingWaiverStatus::Expired;
        draft.emit(WaiverEvent::WaiverExpired {
            account_id: old.account_id,
            request_id: old.request_id,
            pending_waiver_id: Some(old.id),
        });
        draft.put_pending_waiver(old);
    }

    let groups = allocation
        .groups
        .iter()
        .filter(|group| !group.waived.is_zero())
        .map(|group| PendingWaiverGroupEntry {
            group_id: group.group_id,
            due_date: group.due_date,
            waived: group.waived,
            obligations: group
                .obligations
                .iter()
                .filter(|row| !row.waived.is_zero())
                .map(|row| ObligationWaiver {
                    obligation_id: row.obligation_id,
                    waived: row.waived,
                })
                .collect(),
        })
        .collect();

    let pending = PendingWaiver {
        id: Uuid::new_v4(),
        account_id: request.account_id,
        request_id: request.id,
        approval_id,
        waived: allocation.total_waived(),
        need_to_pay,
        created_on: now.date_naive(),
        created_at: now,
        valid_until,
        status: PendingWaiverStatus::Active,
        groups,
        implemented_on: None,
    };
    info!(
        account_id = pending.account_id,
        pending_waiver_id = %pending.id,
        request_id = %request.id,
        need_to_pay,
        %valid_until,
        "pending waiver created"
    );
    draft.put_pending_waiver(pending.clone());
    pending
}

/// Forgives the stored amounts against the ledger, oldest group first.
/// Returns `false` without touching anything when the waiver is no longer
/// active, so consuming twice is harmless.
pub fn consume(
    draft: &mut AccountDraft,
    pending_waiver_id: Uuid,
    today: NaiveDate,
) -> Result<bool, WaiverError> {
    let Some(mut pending) = draft
        .state
        .pending_waivers
        .iter()
        .find(|pending| pending.id == pending_waiver_id)
        .cloned()
    else {
        return Err(WaiverError::NotFound(format!(
            "pending waiver {pending_waiver_id}"
        )));
    };
    if !pending.is_active() {
        return Ok(false);
    }

    let mut entries = pending.groups.clone();
    entries.sort_by_key(|entry| (entry.due_date, entry.group_id));

    for entry in &entries {
        for waiver in &entry.obligations {
            for component in Component::ORDER {
                let wanted = waiver.waived.get(component);
                if wanted == 0 {
                    continue;
                }
                let Some(obligation) = draft.state.ledger.obligation(waiver.obligation_id) else {
                    warn!(
                        obligation_id = waiver.obligation_id,
                        "waived obligation no longer on the ledger"
                    );
                    break;
                };
                let available = obligation.remaining.get(component);
                let amount = wanted.min(available);
                if amount < wanted {
                    warn!(
                        obligation_id = waiver.obligation_id,
                        %component,
                        wanted,
                        available,
                        "forgiveness clamped to outstanding balance"
                    );
                }
                if amount > 0 {
                    draft.apply_ledger(LedgerMutation::Forgive(Forgiveness {
                        pending_waiver_id,
                        group_id: entry.group_id,
                        obligation_id: waiver.obligation_id,
                        component,
                        amount,
                    }))?;
                }
            }
        }
        mark_paid_off(draft, entry.group_id)?;
    }

    pending.status = PendingWaiverStatus::Implemented;
    pending.implemented_on = Some(today);
    draft.put_pending_waiver(pending);
    Ok(true)
}

/// Distributes a payment over the ledger and records it.
pub fn post_payment(
    draft: &mut AccountDraft,
    amount: i64,
    paid_at: DateTime<Utc>,
    replayed_from: Option<Uuid>,
) -> Result<Uuid, WaiverError> {
    let (effects, unapplied) = distribute_payment(&draft.state.ledger, amount);
    let mut touched: Vec<i64> = effects.iter().map(|effect| effect.group_id).collect();
    touched.dedup();

    let payment = PostedPayment {
        id: Uuid::new_v4(),
        account_id: draft.state.account_id(),
        amount,
        paid_at,
        status: PaymentStatus::Posted,
        effects,
        unapplied,
        replayed_from,
    };
    let payment_id = payment.id;
    draft.apply_ledger(LedgerMutation::PostPayment(payment))?;
    for group_id in touched {
        mark_paid_off(draft, group_id)?;
    }
    Ok(payment_id)
}

fn mark_paid_off(draft: &mut AccountDraft, group_id: i64) -> Result<(), WaiverError> {
    let settled = draft
        .state
        .ledger
        .group(group_id)
        .is_some_and(|group| !group.paid_off && group.remaining().total() == 0);
    if settled {
        draft.apply_ledger(LedgerMutation::MarkPaidOff { group_id })?;
    }
    Ok(())
}

/// Expires open requests and active pending waivers whose validity date is
/// before `today`. Returns how many records changed.
pub fn expire_stale(draft: &mut AccountDraft, today: NaiveDate) -> Result<usize, WaiverError> {
    let mut expired = 0;

    let stale_pending: Vec<PendingWaiver> = draft
        .state
        .pending_waivers
        .iter()
        .filter(|pending| pending.is_active() && pending.valid_until < today)
        .cloned()
        .collect();
    for mut pending in stale_pending {
        info!(
            account_id = pending.account_id,
            pending_waiver_id = %pending.id,
            valid_until = %pending.valid_until,
            "pending waiver expired"
        );
        pending.status = PendingWaiverStatus::Expired;
        if let Ok(mut request) = draft.request(pending.request_id)
            && request.disposition == Disposition::Approved
        {
            request.disposition = Disposition::Expired;
            draft.put_request(request);
        }
        draft.emit(WaiverEvent::WaiverExpired {
            account_id: pending.account_id,
            request_id: pending.request_id,
            pending_waiver_id: Some(pending.id),
        });
        draft.put_pending_waiver(pending);
        expired += 1;
    }

    let stale_requests: Vec<WaiverRequest> = draft
        .state
        .requests
        .iter()
        .filter(|request| request.is_open() && request.valid_until < today)
        .cloned()
        .collect();
    for mut request in stale_requests {
        info!(
            account_id = request.account_id,
            request_id = %request.id,
            "pending waiver request expired"
        );
        request.disposition = Disposition::Expired;
        draft.emit(WaiverEvent::WaiverExpired {
            account_id: request.account_id,
            request_id: request.id,
            pending_waiver_id: None,
        });
        draft.put_request(request);
        expired += 1;
    }

    Ok(expired)
}

/// Handles one cleared payment for the account held by `draft`.
pub fn on_payment(
    draft: &mut AccountDraft,
    amount: i64,
    paid_at: DateTime<Utc>,
) -> Result<PaymentOutcome, WaiverError> {
    let today = paid_at.date_naive();
    let active_before = draft.state.active_pending_waiver().map(|pending| pending.id);
    expire_stale(draft, today)?;

    let Some(pending) = draft.state.active_pending_waiver().cloned() else {
        post_payment(draft, amount, paid_at, None)?;
        return Ok(match active_before {
            Some(pending_waiver_id) => PaymentOutcome::Expired { pending_waiver_id },
            None => PaymentOutcome::Unwaived,
        });
    };

    let mut prior: Vec<PostedPayment> = draft
        .state
        .ledger
        .payments
        .iter()
        .filter(|payment| {
            payment.is_posted()
                && payment.paid_at >= pending.created_at
                && payment.paid_on() <= pending.valid_until
        })
        .cloned()
        .collect();
    prior.sort_by_key(|payment| (payment.paid_at, payment.id));

    let accumulated = prior.iter().map(|payment| payment.amount).sum::<i64>() + amount;
    track_schedule(draft, pending.request_id, amount, today);

    if accumulated < pending.need_to_pay {
        post_payment(draft, amount, paid_at, None)?;
        info!(
            account_id = pending.account_id,
            pending_waiver_id = %pending.id,
            accumulated,
            need_to_pay = pending.need_to_pay,
            "payment accrued toward waiver activation"
        );
        return Ok(PaymentOutcome::Accruing {
            accumulated,
            need_to_pay: pending.need_to_pay,
        });
    }

    // Earlier partial payments were split against pre-waiver balances; undo
    // them newest first, forgive, then run them again through the new balances.
    for payment in prior.iter().rev() {
        draft.apply_ledger(LedgerMutation::VoidPayment {
            payment_id: payment.id,
        })?;
    }
    consume(draft, pending.id, today)?;
    for payment in &prior {
        post_payment(draft, payment.amount, payment.paid_at, Some(payment.id))?;
    }
    post_payment(draft, amount, paid_at, None)?;

    let replayed_payments = prior.len();
    info!(
        account_id = pending.account_id,
        pending_waiver_id = %pending.id,
        replayed_payments,
        "pending waiver implemented"
    );
    draft.emit(WaiverEvent::WaiverImplemented {
        account_id: pending.account_id,
        pending_waiver_id: pending.id,
        replayed_payments,
    });
    Ok(PaymentOutcome::Implemented {
        pending_waiver_id: pending.id,
        replayed_payments,
    })
}

/// Only payments made while the request's waiver is active count toward its
/// schedule, the same set that counts toward activation.
fn track_schedule(draft: &mut AccountDraft, request_id: Uuid, amount: i64, today: NaiveDate) {
    let mut schedule: Vec<_> = draft
        .state
        .schedule_for(request_id)
        .into_iter()
        .cloned()
        .collect();
    if schedule.is_empty() {
        return;
    }

    let progress = multi_ptp::apply_payment(&mut schedule, amount, today);
    let account_id = draft.state.account_id();
    for entry in schedule {
        if progress.touched.contains(&entry.sequence) {
            draft.put_ptp_entry(entry);
        }
    }
    for sequence in progress.newly_paid {
        draft.emit(WaiverEvent::PtpInstallmentPaid {
            account_id,
            request_id,
            sequence,
        });
    }
}
