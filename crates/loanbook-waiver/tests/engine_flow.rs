use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use loanbook_core::{
    AccountLedger, ApprovalTier, Clock, Component, ComponentAmounts, DelinquencyBucket,
    Disposition, Obligation, ObligationGroup, PaymentStatus, PendingWaiverStatus, Percentages,
    ServicingStore, StoreError, WaiverError, WaiverEvent,
};
use loanbook_store::{InMemoryServicingStore, ManualClock, RecordingNotifier};
use loanbook_waiver::{
    AccountDraft, ApprovalDecision, Approver, EngineConfig, PaymentOutcome, PromisedPayment,
    SubmitWaiverRequest, WaiverEngine, check_invariants, lifecycle,
};
use rust_decimal::Decimal;

const ACCOUNT: i64 = 7;

type Engine = WaiverEngine<InMemoryServicingStore, RecordingNotifier>;

struct Harness {
    engine: Engine,
    store: Arc<InMemoryServicingStore>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 1, 10, 0, 0).unwrap()
}

fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, day).unwrap()
}

fn pct(hundredths: i64) -> Decimal {
    Decimal::new(hundredths, 2)
}

/// Two billing cycles: 40/60/1000 due in July, 30/50/1000 due in August.
fn ledger() -> AccountLedger {
    let group = |id: i64, due: NaiveDate, remaining| ObligationGroup {
        id,
        account_id: ACCOUNT,
        due_date: due,
        paid_off: false,
        obligations: vec![Obligation {
            id: id * 10,
            group_id: id,
            due_date: due,
            remaining,
        }],
    };
    AccountLedger::new(
        ACCOUNT,
        vec![
            group(10, date(7, 1), ComponentAmounts::new(40, 60, 1000)),
            group(11, date(8, 1), ComponentAmounts::new(30, 50, 1000)),
        ],
    )
}

async fn harness() -> Harness {
    let store = Arc::new(InMemoryServicingStore::new());
    store.seed_account(ledger()).await;
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(ManualClock::new(start()));
    let engine = WaiverEngine::new(store.clone(), notifier.clone(), EngineConfig::default())
        .with_clock(clock.clone());
    Harness {
        engine,
        store,
        notifier,
        clock,
    }
}

fn request(percentages: Percentages, ptp_amount: i64) -> SubmitWaiverRequest {
    SubmitWaiverRequest {
        account_id: ACCOUNT,
        program: "general_paid_waiver".to_string(),
        agent_id: "agent-17".to_string(),
        percentages,
        ptp_amount,
        selected_groups: None,
        reference_totals: None,
        days_past_due: 5,
        special_reason: None,
        valid_until: None,
        ptp_schedule: None,
    }
}

fn late_fee_only() -> Percentages {
    Percentages::new(Decimal::ONE, Decimal::ZERO, Decimal::ZERO)
}

fn some_principal() -> Percentages {
    Percentages::new(Decimal::ZERO, Decimal::ZERO, pct(10))
}

fn team_lead() -> Approver {
    Approver::new("tl-1", [ApprovalTier::TeamLead], [DelinquencyBucket::Bucket1])
}

fn supervisor() -> Approver {
    Approver::new("spv-1", [ApprovalTier::Supervisor], [DelinquencyBucket::Bucket1])
}

#[tokio::test]
async fn small_late_fee_waiver_is_auto_approved_and_implemented_on_payment() {
    let h = harness().await;

    let submitted = h.engine.submit_request(request(late_fee_only(), 500)).await.unwrap();
    assert_eq!(submitted.disposition, Disposition::Approved);
    assert_eq!(submitted.next_tier, None);
    let pending_id = submitted.pending_waiver_id.unwrap();

    let summary = h.engine.account_summary(ACCOUNT).await.unwrap();
    let pending = summary.active_pending_waiver.unwrap();
    assert_eq!(pending.id, pending_id);
    assert_eq!(pending.waived, ComponentAmounts::new(70, 0, 0));
    assert_eq!(pending.need_to_pay, 500);

    let outcome = h.engine.on_payment_cleared(ACCOUNT, 500, h.clock.now()).await.unwrap();
    assert_eq!(
        outcome,
        PaymentOutcome::Implemented {
            pending_waiver_id: pending_id,
            replayed_payments: 0,
        }
    );

    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    assert_eq!(state.ledger.outstanding().total(), 2180 - 70 - 500);
    assert_eq!(state.ledger.outstanding().late_fee, 0);
    let pending = state.active_pending_waiver();
    assert!(pending.is_none());
    assert_eq!(state.pending_waivers[0].status, PendingWaiverStatus::Implemented);
    assert_eq!(state.pending_waivers[0].implemented_on, Some(date(9, 1)));

    let events = h.notifier.events().await;
    assert!(events.iter().any(|event| matches!(event, WaiverEvent::Approved { .. })));
    assert!(events.iter().any(|event| matches!(
        event,
        WaiverEvent::WaiverImplemented { replayed_payments: 0, .. }
    )));
}

#[tokio::test]
async fn allocation_sums_hold_for_stored_request() {
    let h = harness().await;
    let mut input = request(Percentages::new(pct(33), pct(50), pct(10)), 0);
    let mut reference = BTreeMap::new();
    reference.insert(10, ComponentAmounts::new(35, 25, 80));
    input.reference_totals = Some(reference);

    let submitted = h.engine.submit_request(input).await.unwrap();
    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    let stored = state.request(submitted.request_id).unwrap();

    check_invariants(&stored.allocation).unwrap();
    for group in &stored.allocation.groups {
        let waived: ComponentAmounts = group.obligations.iter().map(|row| row.waived).sum();
        assert_eq!(waived, group.waived);
        for row in &group.obligations {
            assert!(!row.remaining.has_negative());
        }
    }
    assert_eq!(stored.allocation.groups[0].waived, ComponentAmounts::new(35, 25, 80));
    assert_eq!(stored.total_waived, stored.allocation.total_waived().total());
    assert_eq!(stored.display_pct.late_fee, Decimal::from(33));
}

#[tokio::test]
async fn team_lead_then_supervisor_approves_in_order() {
    let h = harness().await;
    let submitted = h.engine.submit_request(request(some_principal(), 0)).await.unwrap();
    assert_eq!(submitted.disposition, Disposition::Pending);
    assert_eq!(submitted.next_tier, Some(ApprovalTier::TeamLead));
    let request_id = submitted.request_id;

    let early = h
        .engine
        .submit_decision(request_id, &supervisor(), ApprovalDecision::approve(ApprovalTier::Supervisor))
        .await;
    assert!(matches!(early, Err(WaiverError::UnauthorizedTier { .. })));

    let first = h
        .engine
        .submit_decision(request_id, &team_lead(), ApprovalDecision::approve(ApprovalTier::TeamLead))
        .await
        .unwrap();
    assert!(!first.terminal);
    assert_eq!(first.next_tier, Some(ApprovalTier::Supervisor));

    let again = h
        .engine
        .submit_decision(request_id, &team_lead(), ApprovalDecision::approve(ApprovalTier::TeamLead))
        .await;
    assert!(matches!(again, Err(WaiverError::UnauthorizedTier { .. })));

    let last = h
        .engine
        .submit_decision(request_id, &supervisor(), ApprovalDecision::approve(ApprovalTier::Supervisor))
        .await
        .unwrap();
    assert!(last.terminal);
    assert_eq!(last.disposition, Disposition::Approved);
    assert!(last.pending_waiver_id.is_some());

    let after = h
        .engine
        .submit_decision(request_id, &supervisor(), ApprovalDecision::approve(ApprovalTier::Supervisor))
        .await;
    assert!(matches!(
        after,
        Err(WaiverError::AlreadyTerminal { disposition: Disposition::Approved, .. })
    ));

    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    assert_eq!(state.approvals_for(request_id).len(), 2);
    assert_eq!(
        state.active_pending_waiver().unwrap().waived,
        ComponentAmounts::new(0, 0, 200)
    );
}

#[tokio::test]
async fn approver_outside_bucket_is_refused_but_top_level_is_not() {
    let h = harness().await;
    let submitted = h.engine.submit_request(request(some_principal(), 0)).await.unwrap();

    let wrong_bucket = Approver::new("tl-9", [ApprovalTier::TeamLead], [DelinquencyBucket::Bucket4]);
    let refused = h
        .engine
        .submit_decision(
            submitted.request_id,
            &wrong_bucket,
            ApprovalDecision::approve(ApprovalTier::TeamLead),
        )
        .await;
    assert!(matches!(refused, Err(WaiverError::UnauthorizedTier { .. })));

    let head = Approver::new(
        "head-1",
        [ApprovalTier::TeamLead, ApprovalTier::Supervisor],
        [],
    );
    let outcome = h
        .engine
        .submit_decision(
            submitted.request_id,
            &head,
            ApprovalDecision::approve(ApprovalTier::TeamLead),
        )
        .await
        .unwrap();
    assert_eq!(outcome.next_tier, Some(ApprovalTier::Supervisor));
}

#[tokio::test]
async fn rejection_short_circuits_remaining_tiers() {
    let h = harness().await;
    let submitted = h.engine.submit_request(request(some_principal(), 0)).await.unwrap();

    let outcome = h
        .engine
        .submit_decision(
            submitted.request_id,
            &team_lead(),
            ApprovalDecision::reject(ApprovalTier::TeamLead, "borrower declined the PTP"),
        )
        .await
        .unwrap();
    assert!(outcome.terminal);
    assert_eq!(outcome.disposition, Disposition::Rejected);
    assert_eq!(outcome.pending_waiver_id, None);

    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    assert!(state.active_pending_waiver().is_none());
    let events = h.notifier.events().await;
    assert!(events.iter().any(|event| matches!(
        event,
        WaiverEvent::Rejected { tier: ApprovalTier::TeamLead, .. }
    )));
}

#[tokio::test]
async fn later_tiers_inherit_overridden_terms() {
    let h = harness().await;
    let submitted = h.engine.submit_request(request(some_principal(), 0)).await.unwrap();

    let mut reduced = ApprovalDecision::approve(ApprovalTier::TeamLead);
    reduced.approved_pct = Some(Percentages::new(Decimal::ZERO, Decimal::ZERO, pct(5)));
    h.engine
        .submit_decision(submitted.request_id, &team_lead(), reduced)
        .await
        .unwrap();
    h.engine
        .submit_decision(
            submitted.request_id,
            &supervisor(),
            ApprovalDecision::approve(ApprovalTier::Supervisor),
        )
        .await
        .unwrap();

    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    let approvals = state.approvals_for(submitted.request_id);
    assert_eq!(approvals[1].approved_pct.principal, pct(5));
    assert_eq!(
        state.active_pending_waiver().unwrap().waived,
        ComponentAmounts::new(0, 0, 100)
    );
}

#[tokio::test]
async fn earlier_partial_payment_is_reversed_and_replayed() {
    let h = harness().await;
    let submitted = h.engine.submit_request(request(late_fee_only(), 500)).await.unwrap();
    let pending_id = submitted.pending_waiver_id.unwrap();

    let first = h.engine.on_payment_cleared(ACCOUNT, 200, h.clock.now()).await.unwrap();
    assert_eq!(
        first,
        PaymentOutcome::Accruing {
            accumulated: 200,
            need_to_pay: 500,
        }
    );
    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    let original = state.ledger.payments[0].clone();
    assert!(original
        .effects
        .iter()
        .any(|effect| effect.component == Component::LateFee));

    h.clock.advance(Duration::days(1));
    let second = h.engine.on_payment_cleared(ACCOUNT, 300, h.clock.now()).await.unwrap();
    assert_eq!(
        second,
        PaymentOutcome::Implemented {
            pending_waiver_id: pending_id,
            replayed_payments: 1,
        }
    );

    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    let voided = state.ledger.payment(original.id).unwrap();
    assert_eq!(voided.status, PaymentStatus::Voided);

    let replayed = state
        .ledger
        .payments
        .iter()
        .find(|payment| payment.replayed_from == Some(original.id))
        .unwrap();
    assert!(replayed.is_posted());
    assert_eq!(replayed.amount, 200);
    assert_eq!(replayed.paid_at, original.paid_at);

    // Late fees were forgiven before the replay, so no posted payment touches them.
    for payment in state.ledger.payments.iter().filter(|payment| payment.is_posted()) {
        assert!(payment
            .effects
            .iter()
            .all(|effect| effect.component != Component::LateFee));
    }
    assert_eq!(state.ledger.outstanding().total(), 2180 - 70 - 500);
}

#[tokio::test]
async fn consuming_twice_changes_nothing() {
    let h = harness().await;
    let submitted = h.engine.submit_request(request(late_fee_only(), 0)).await.unwrap();
    let pending_id = submitted.pending_waiver_id.unwrap();

    let state = h.store.load_account(ACCOUNT).await.unwrap();
    let mut draft = AccountDraft::new(state);
    assert!(lifecycle::consume(&mut draft, pending_id, date(9, 1)).unwrap());
    let after_first = draft.state.ledger.clone();
    let mutations = draft.changes.ledger.len();

    assert!(!lifecycle::consume(&mut draft, pending_id, date(9, 2)).unwrap());
    assert_eq!(draft.state.ledger, after_first);
    assert_eq!(draft.changes.ledger.len(), mutations);
}

#[tokio::test]
async fn payment_after_deadline_expires_instead_of_consuming() {
    let h = harness().await;
    let mut input = request(late_fee_only(), 100);
    input.valid_until = Some(date(9, 3));
    let submitted = h.engine.submit_request(input).await.unwrap();
    let pending_id = submitted.pending_waiver_id.unwrap();

    h.clock.advance(Duration::days(5));
    let outcome = h.engine.on_payment_cleared(ACCOUNT, 100, h.clock.now()).await.unwrap();
    assert_eq!(outcome, PaymentOutcome::Expired { pending_waiver_id: pending_id });

    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    assert_eq!(state.pending_waivers[0].status, PendingWaiverStatus::Expired);
    assert_eq!(
        state.request(submitted.request_id).unwrap().disposition,
        Disposition::Expired
    );
    // The payment still lands, against un-waived balances.
    assert_eq!(state.ledger.outstanding().total(), 2180 - 100);
    assert_eq!(state.ledger.outstanding().late_fee, 30);
}

#[tokio::test]
async fn sweep_and_lazy_checks_expire_stale_requests() {
    let h = harness().await;
    let mut input = request(some_principal(), 0);
    input.valid_until = Some(date(9, 2));
    let swept = h.engine.submit_request(input).await.unwrap();

    h.clock.advance(Duration::days(3));
    let expired = h.engine.sweep_expired(h.engine.today()).await.unwrap();
    assert_eq!(expired, 1);
    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    assert_eq!(state.request(swept.request_id).unwrap().disposition, Disposition::Expired);
    assert_eq!(h.engine.sweep_expired(h.engine.today()).await.unwrap(), 0);

    let mut input = request(some_principal(), 0);
    input.valid_until = Some(date(9, 5));
    let lazy = h.engine.submit_request(input).await.unwrap();
    h.clock.advance(Duration::days(3));

    let refused = h
        .engine
        .submit_decision(
            lazy.request_id,
            &team_lead(),
            ApprovalDecision::approve(ApprovalTier::TeamLead),
        )
        .await;
    assert!(matches!(
        refused,
        Err(WaiverError::AlreadyTerminal { disposition: Disposition::Expired, .. })
    ));
    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    assert_eq!(state.request(lazy.request_id).unwrap().disposition, Disposition::Expired);
    assert!(state.approvals_for(lazy.request_id).is_empty());
}

#[tokio::test]
async fn newer_requests_and_approvals_supersede_older_ones() {
    let h = harness().await;

    let waiting = h.engine.submit_request(request(some_principal(), 0)).await.unwrap();
    let first = h.engine.submit_request(request(late_fee_only(), 0)).await.unwrap();
    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    assert_eq!(state.request(waiting.request_id).unwrap().disposition, Disposition::Expired);

    let second = h
        .engine
        .submit_request(request(Percentages::new(pct(50), Decimal::ZERO, Decimal::ZERO), 0))
        .await
        .unwrap();
    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    let active: Vec<_> = state
        .pending_waivers
        .iter()
        .filter(|pending| pending.is_active())
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(Some(active[0].id), second.pending_waiver_id);

    let old = state
        .pending_waivers
        .iter()
        .find(|pending| Some(pending.id) == first.pending_waiver_id)
        .unwrap();
    assert_eq!(old.status, PendingWaiverStatus::Expired);
}

#[tokio::test]
async fn multi_payment_schedule_tracks_installments() {
    let h = harness().await;
    let mut input = request(late_fee_only(), 500);
    input.valid_until = Some(date(9, 20));
    input.ptp_schedule = Some(vec![
        PromisedPayment {
            promised_date: date(9, 5),
            amount: 300,
        },
        PromisedPayment {
            promised_date: date(9, 15),
            amount: 200,
        },
    ]);
    let submitted = h.engine.submit_request(input).await.unwrap();

    let first = h.engine.on_payment_cleared(ACCOUNT, 300, h.clock.now()).await.unwrap();
    assert!(matches!(first, PaymentOutcome::Accruing { accumulated: 300, .. }));

    let summary = h.engine.account_summary(ACCOUNT).await.unwrap();
    assert_eq!(summary.ptp_schedule.len(), 2);
    assert!(summary.ptp_schedule[0].fully_paid);
    assert_eq!(summary.ptp_schedule[1].paid_amount, 0);

    h.clock.advance(Duration::days(10));
    let second = h.engine.on_payment_cleared(ACCOUNT, 200, h.clock.now()).await.unwrap();
    assert!(matches!(second, PaymentOutcome::Implemented { replayed_payments: 1, .. }));

    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    let schedule = state.schedule_for(submitted.request_id);
    assert!(schedule.iter().all(|entry| entry.fully_paid && entry.remaining_amount == 0));
    assert_eq!(schedule[1].paid_on, Some(date(9, 11)));

    let paid: Vec<u32> = h
        .notifier
        .events()
        .await
        .into_iter()
        .filter_map(|event| match event {
            WaiverEvent::PtpInstallmentPaid { sequence, .. } => Some(sequence),
            _ => None,
        })
        .collect();
    assert_eq!(paid, vec![1, 2]);
}

#[tokio::test]
async fn payments_before_approval_do_not_fill_the_schedule() {
    let h = harness().await;
    let mut input = request(some_principal(), 500);
    input.valid_until = Some(date(9, 20));
    input.ptp_schedule = Some(vec![
        PromisedPayment {
            promised_date: date(9, 5),
            amount: 300,
        },
        PromisedPayment {
            promised_date: date(9, 15),
            amount: 200,
        },
    ]);
    let submitted = h.engine.submit_request(input).await.unwrap();
    assert_eq!(submitted.disposition, Disposition::Pending);
    let request_id = submitted.request_id;

    let early = h.engine.on_payment_cleared(ACCOUNT, 300, h.clock.now()).await.unwrap();
    assert_eq!(early, PaymentOutcome::Unwaived);
    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    assert!(state.schedule_for(request_id).iter().all(|entry| entry.paid_amount == 0));

    h.clock.advance(Duration::days(1));
    h.engine
        .submit_decision(request_id, &team_lead(), ApprovalDecision::approve(ApprovalTier::TeamLead))
        .await
        .unwrap();
    let approved = h
        .engine
        .submit_decision(request_id, &supervisor(), ApprovalDecision::approve(ApprovalTier::Supervisor))
        .await
        .unwrap();
    let pending_id = approved.pending_waiver_id.unwrap();

    h.clock.advance(Duration::days(1));
    let second = h.engine.on_payment_cleared(ACCOUNT, 200, h.clock.now()).await.unwrap();
    assert_eq!(
        second,
        PaymentOutcome::Accruing {
            accumulated: 200,
            need_to_pay: 500,
        }
    );
    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    let schedule = state.schedule_for(request_id);
    assert_eq!(schedule[0].paid_amount, 200);
    assert!(!schedule[0].fully_paid);
    assert_eq!(schedule[1].paid_amount, 0);

    h.clock.advance(Duration::days(1));
    let third = h.engine.on_payment_cleared(ACCOUNT, 300, h.clock.now()).await.unwrap();
    assert_eq!(
        third,
        PaymentOutcome::Implemented {
            pending_waiver_id: pending_id,
            replayed_payments: 1,
        }
    );
    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    assert!(state.schedule_for(request_id).iter().all(|entry| entry.fully_paid));
    assert_eq!(state.pending_waivers[0].status, PendingWaiverStatus::Implemented);
}

#[tokio::test]
async fn same_day_payment_before_the_waiver_does_not_count() {
    let h = harness().await;
    let morning = start() - Duration::hours(2);
    let before = h.engine.on_payment_cleared(ACCOUNT, 200, morning).await.unwrap();
    assert_eq!(before, PaymentOutcome::Unwaived);

    let submitted = h.engine.submit_request(request(late_fee_only(), 500)).await.unwrap();
    let pending_id = submitted.pending_waiver_id.unwrap();

    let late_morning = start() + Duration::hours(1);
    let first = h.engine.on_payment_cleared(ACCOUNT, 300, late_morning).await.unwrap();
    assert_eq!(
        first,
        PaymentOutcome::Accruing {
            accumulated: 300,
            need_to_pay: 500,
        }
    );

    let noon = start() + Duration::hours(2);
    let second = h.engine.on_payment_cleared(ACCOUNT, 200, noon).await.unwrap();
    assert_eq!(
        second,
        PaymentOutcome::Implemented {
            pending_waiver_id: pending_id,
            replayed_payments: 1,
        }
    );

    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    let untouched = &state.ledger.payments[0];
    assert_eq!(untouched.paid_at, morning);
    assert_eq!(untouched.status, PaymentStatus::Posted);
    assert!(untouched.replayed_from.is_none());
}

#[tokio::test]
async fn invalid_input_is_rejected_before_anything_is_stored() {
    let h = harness().await;

    let too_much = request(Percentages::new(pct(150), Decimal::ZERO, Decimal::ZERO), 0);
    assert!(matches!(
        h.engine.submit_request(too_much).await,
        Err(WaiverError::InvalidPercentage { .. })
    ));

    let ptp_over = request(late_fee_only(), 5_000);
    assert!(matches!(
        h.engine.submit_request(ptp_over).await,
        Err(WaiverError::Validation(_))
    ));

    let nothing = request(Percentages::default(), 0);
    assert!(matches!(
        h.engine.submit_request(nothing).await,
        Err(WaiverError::Validation(_))
    ));

    let mut unknown = request(late_fee_only(), 0);
    unknown.account_id = 404;
    assert!(matches!(
        h.engine.submit_request(unknown).await,
        Err(WaiverError::Store(StoreError::AccountNotFound(404)))
    ));

    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    assert_eq!(state.version, 0);
    assert!(state.requests.is_empty());
    assert!(h.notifier.events().await.is_empty());
}

#[tokio::test]
async fn settled_account_has_nothing_to_waive() {
    let h = harness().await;
    h.engine.on_payment_cleared(ACCOUNT, 2180, h.clock.now()).await.unwrap();

    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    assert!(state.ledger.groups.iter().all(|group| group.paid_off));

    let result = h.engine.submit_request(request(late_fee_only(), 0)).await;
    assert!(matches!(
        result,
        Err(WaiverError::NoActiveObligations { account_id: ACCOUNT })
    ));
}

#[tokio::test]
async fn concurrent_payments_on_one_account_both_land() {
    let h = harness().await;
    let now = h.clock.now();

    let (left, right) = tokio::join!(
        h.engine.on_payment_cleared(ACCOUNT, 100, now),
        h.engine.on_payment_cleared(ACCOUNT, 150, now),
    );
    left.unwrap();
    right.unwrap();

    let state = h.store.snapshot(ACCOUNT).await.unwrap();
    assert_eq!(state.version, 2);
    assert_eq!(state.ledger.payments.len(), 2);
    assert_eq!(state.ledger.outstanding().total(), 2180 - 250);
}
