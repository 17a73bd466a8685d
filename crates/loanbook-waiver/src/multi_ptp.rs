use chrono::NaiveDate;
use loanbook_core::{MultiplePaymentPtp, WaiverError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One installment the borrower commits to, as submitted by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromisedPayment {
    pub promised_date: NaiveDate,
    pub amount: i64,
}

/// Validates the promises against the request window and PTP amount and
/// numbers them from 1 in date order.
pub fn build_schedule(
    request_id: Uuid,
    promises: &[PromisedPayment],
    ptp_amount: i64,
    starts_on: NaiveDate,
    valid_until: NaiveDate,
) -> Result<Vec<MultiplePaymentPtp>, WaiverError> {
    if promises.is_empty() {
        return Err(WaiverError::validation("payment schedule must not be empty"));
    }

    let mut previous: Option<NaiveDate> = None;
    for promise in promises {
        if promise.amount <= 0 {
            return Err(WaiverError::validation("promised amounts must be positive"));
        }
        if promise.promised_date < starts_on || promise.promised_date > valid_until {
            return Err(WaiverError::validation(format!(
                "promised date {} falls outside {starts_on}..={valid_until}",
                promise.promised_date
            )));
        }
        if previous.is_some_and(|date| promise.promised_date <= date) {
            return Err(WaiverError::validation(
                "promised dates must be strictly ascending",
            ));
        }
        previous = Some(promise.promised_date);
    }

    let promised_total: i64 = promises.iter().map(|promise| promise.amount).sum();
    if promised_total != ptp_amount {
        return Err(WaiverError::validation(format!(
            "schedule totals {promised_total} but the PTP amount is {ptp_amount}"
        )));
    }

    Ok(promises
        .iter()
        .zip(1u32..)
        .map(|(promise, sequence)| MultiplePaymentPtp {
            id: Uuid::new_v4(),
            request_id,
            sequence,
            promised_date: promise.promised_date,
            promised_amount: promise.amount,
            paid_amount: 0,
            remaining_amount: promise.amount,
            fully_paid: false,
            paid_on: None,
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleProgress {
    pub applied: i64,
    pub leftover: i64,
    pub touched: Vec<u32>,
    pub newly_paid: Vec<u32>,
}

/// Pours `amount` into the schedule in sequence order. `paid_amount` only
/// ever grows and `remaining_amount` is always derived from it.
pub fn apply_payment(
    schedule: &mut [MultiplePaymentPtp],
    amount: i64,
    paid_on: NaiveDate,
) -> ScheduleProgress {
    schedule.sort_by_key(|entry| entry.sequence);

    let mut left = amount.max(0);
    let mut progress = ScheduleProgress::default();
    for entry in schedule.iter_mut() {
        if left == 0 {
            break;
        }
        if entry.fully_paid {
            continue;
        }
        let take = entry.remaining_amount.min(left);
        if take <= 0 {
            continue;
        }
        entry.paid_amount += take;
        entry.remaining_amount = entry.promised_amount - entry.paid_amount;
        left -= take;
        progress.applied += take;
        progress.touched.push(entry.sequence);
        if entry.remaining_amount == 0 {
            entry.fully_paid = true;
            entry.paid_on = Some(paid_on);
            progress.newly_paid.push(entry.sequence);
        }
    }
    progress.leftover = left;
    progress
}
