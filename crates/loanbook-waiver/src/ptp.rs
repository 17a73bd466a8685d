//! Lump-sum consumption: PTP amounts against post-waiver balances and real
//! payments against the ledger. Both walk obligations oldest first and, inside
//! each obligation, late fee before interest before principal.

use loanbook_core::{AccountLedger, Component, ComponentAmounts, PaymentEffect};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtpOutcome {
    pub consumed: ComponentAmounts,
    pub remaining: ComponentAmounts,
    pub unapplied: i64,
}

pub fn allocate_ptp(outstanding: ComponentAmounts, ptp_amount: i64) -> PtpOutcome {
    let mut balances = [outstanding];
    let unapplied = apply_ptp(&mut balances, ptp_amount);
    PtpOutcome {
        consumed: outstanding - balances[0],
        remaining: balances[0],
        unapplied,
    }
}

/// Consumes `ptp_amount` across `balances` in place; returns what was left over.
pub fn apply_ptp(balances: &mut [ComponentAmounts], ptp_amount: i64) -> i64 {
    let mut left = ptp_amount.max(0);
    for balance in balances.iter_mut() {
        for component in Component::ORDER {
            if left == 0 {
                return 0;
            }
            let slot = balance.get_mut(component);
            let take = (*slot).min(left).max(0);
            *slot -= take;
            left -= take;
        }
    }
    left
}

/// Splits a payment across the account's open obligations.
pub fn distribute_payment(ledger: &AccountLedger, amount: i64) -> (Vec<PaymentEffect>, i64) {
    let mut left = amount.max(0);
    let mut effects = Vec::new();

    for group in ledger.open_groups() {
        let mut obligations: Vec<_> = group.obligations.iter().collect();
        obligations.sort_by_key(|obligation| (obligation.due_date, obligation.id));
        for obligation in obligations {
            for component in Component::ORDER {
                if left == 0 {
                    return (effects, 0);
                }
                let take = obligation.remaining.get(component).min(left);
                if take > 0 {
                    effects.push(PaymentEffect {
                        group_id: group.id,
                        obligation_id: obligation.id,
                        component,
                        amount: take,
                    });
                    left -= take;
                }
            }
        }
    }

    (effects, left)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use loanbook_core::{Obligation, ObligationGroup};

    use super::*;

    #[test]
    fn ptp_consumes_late_fee_then_interest_then_principal() {
        let outcome = allocate_ptp(ComponentAmounts::new(0, 100, 200), 150);
        assert_eq!(outcome.remaining, ComponentAmounts::new(0, 0, 150));
        assert_eq!(outcome.consumed, ComponentAmounts::new(0, 100, 50));
        assert_eq!(outcome.unapplied, 0);
    }

    #[test]
    fn ptp_walks_obligations_oldest_first() {
        let mut balances = [ComponentAmounts::new(5, 10, 20), ComponentAmounts::new(7, 0, 40)];
        let left = apply_ptp(&mut balances, 45);
        assert_eq!(left, 0);
        assert_eq!(balances[0], ComponentAmounts::ZERO);
        assert_eq!(balances[1], ComponentAmounts::new(0, 0, 37));
    }

    #[test]
    fn ptp_larger_than_balance_reports_unapplied() {
        let outcome = allocate_ptp(ComponentAmounts::new(1, 2, 3), 10);
        assert_eq!(outcome.remaining, ComponentAmounts::ZERO);
        assert_eq!(outcome.unapplied, 4);
    }

    #[test]
    fn payment_distribution_skips_paid_off_groups() {
        let due = |day| NaiveDate::from_ymd_opt(2026, 5, day).unwrap();
        let obligation = |id, group_id, day, remaining| Obligation {
            id,
            group_id,
            due_date: due(day),
            remaining,
        };
        let ledger = AccountLedger::new(
            1,
            vec![
                ObligationGroup {
                    id: 2,
                    account_id: 1,
                    due_date: due(20),
                    paid_off: false,
                    obligations: vec![obligation(20, 2, 20, ComponentAmounts::new(3, 3, 3))],
                },
                ObligationGroup {
                    id: 1,
                    account_id: 1,
                    due_date: due(1),
                    paid_off: false,
                    obligations: vec![obligation(10, 1, 1, ComponentAmounts::new(0, 4, 6))],
                },
                ObligationGroup {
                    id: 0,
                    account_id: 1,
                    due_date: due(1),
                    paid_off: true,
                    obligations: vec![obligation(5, 0, 1, ComponentAmounts::ZERO)],
                },
            ],
        );

        let (effects, unapplied) = distribute_payment(&ledger, 12);
        assert_eq!(unapplied, 0);
        let flat: Vec<(i64, Component, i64)> = effects
            .iter()
            .map(|effect| (effect.obligation_id, effect.component, effect.amount))
            .collect();
        assert_eq!(
            flat,
            vec![
                (10, Component::Interest, 4),
                (10, Component::Principal, 6),
                (20, Component::LateFee, 2),
            ]
        );

        let (_, unapplied) = distribute_payment(&ledger, 100);
        assert_eq!(unapplied, 81);
    }
}
