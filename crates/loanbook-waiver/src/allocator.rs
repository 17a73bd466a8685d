//! Waterfall allocation of a waiver across obligation groups and the
//! installments inside them.
//!
//! Request-time and approval-time allocations share this one path; the only
//! difference between them is which percentages, PTP amount and reference
//! totals are passed in.

use loanbook_core::{
    Allocation, Component, ComponentAmounts, GroupAllocation, ObligationAllocation,
    ObligationGroup, Percentages, ReferenceTotals, WaiverError,
};
use tracing::{error, warn};

use crate::ptp::apply_ptp;

#[derive(Debug, Clone)]
struct WorkingRow {
    obligation_id: i64,
    group_id: i64,
    due_date: chrono::NaiveDate,
    outstanding: ComponentAmounts,
    waived: ComponentAmounts,
}

impl WorkingRow {
    fn room(&self, component: Component) -> i64 {
        self.outstanding.get(component) - self.waived.get(component)
    }
}

/// Splits the waiver for `groups` (already ordered oldest first) and applies
/// `ptp_amount` against what is left.
///
/// With `reference` totals for a group, each obligation's percentage share is
/// drawn from that group's budget until it runs dry and any leftover budget is
/// then pushed onto obligations that still have room. Without them, the last
/// obligations absorb the rounding drift so the group total equals
/// `ceil(pct * group outstanding)`.
pub fn allocate(
    groups: &[ObligationGroup],
    pct: &Percentages,
    reference: Option<&ReferenceTotals>,
    ptp_amount: i64,
) -> Result<Allocation, WaiverError> {
    pct.validate()?;
    if ptp_amount < 0 {
        return Err(WaiverError::validation("ptp_amount must not be negative"));
    }

    if let Some(reference) = reference {
        for group_id in reference.keys() {
            if !groups.iter().any(|group| group.id == *group_id) {
                warn!(group_id, "ignoring reference totals for unknown obligation group");
            }
        }
    }

    let mut rows: Vec<WorkingRow> = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::with_capacity(groups.len());

    for group in groups {
        let start = rows.len();
        rows.extend(group.obligations.iter().map(|obligation| WorkingRow {
            obligation_id: obligation.id,
            group_id: group.id,
            due_date: obligation.due_date,
            outstanding: obligation.remaining,
            waived: ComponentAmounts::ZERO,
        }));
        spans.push((start, rows.len()));

        let group_rows = &mut rows[start..];
        let budget = reference.and_then(|reference| reference.get(&group.id));
        match budget {
            Some(totals) => {
                check_reference(group, totals)?;
                for component in Component::ORDER {
                    consume_reference(group.id, group_rows, component, pct, totals.get(component))?;
                }
            }
            None => {
                for component in Component::ORDER {
                    waive_by_percentage(group.id, group_rows, component, pct)?;
                }
            }
        }
    }

    let mut after_waiver: Vec<ComponentAmounts> =
        rows.iter().map(|row| row.outstanding - row.waived).collect();
    let ptp_unapplied = apply_ptp(&mut after_waiver, ptp_amount);

    let mut allocation = Allocation {
        groups: Vec::with_capacity(groups.len()),
        ptp_amount,
        ptp_unapplied,
    };
    for (group, (start, end)) in groups.iter().zip(spans) {
        let obligations: Vec<ObligationAllocation> = rows[start..end]
            .iter()
            .zip(&after_waiver[start..end])
            .map(|(row, remaining)| ObligationAllocation {
                obligation_id: row.obligation_id,
                group_id: row.group_id,
                due_date: row.due_date,
                outstanding: row.outstanding,
                waived: row.waived,
                remaining: *remaining,
            })
            .collect();
        allocation.groups.push(GroupAllocation {
            group_id: group.id,
            due_date: group.due_date,
            outstanding: obligations.iter().map(|row| row.outstanding).sum(),
            waived: obligations.iter().map(|row| row.waived).sum(),
            remaining: obligations.iter().map(|row| row.remaining).sum(),
            obligations,
        });
    }

    check_invariants(&allocation)?;
    Ok(allocation)
}

fn check_reference(group: &ObligationGroup, totals: &ComponentAmounts) -> Result<(), WaiverError> {
    let available = group.remaining();
    for component in Component::ORDER {
        let requested = totals.get(component);
        if requested < 0 || requested > available.get(component) {
            return Err(WaiverError::ReferenceBudgetMismatch {
                group_id: group.id,
                component,
                requested,
                available: available.get(component),
            });
        }
    }
    Ok(())
}

fn consume_reference(
    group_id: i64,
    rows: &mut [WorkingRow],
    component: Component,
    pct: &Percentages,
    total: i64,
) -> Result<(), WaiverError> {
    let mut budget = total;
    for row in rows.iter_mut() {
        let naive = pct.ceil_share(component, row.outstanding.get(component));
        let take = budget.min(naive);
        row.waived.set(component, take);
        budget -= take;
    }

    // The percentage loop can leave budget behind when the agent asked for
    // more than the percentage implies; place it wherever there is room.
    for row in rows.iter_mut() {
        if budget == 0 {
            break;
        }
        let take = row.room(component).min(budget);
        if take > 0 {
            *row.waived.get_mut(component) += take;
            budget -= take;
        }
    }

    if budget != 0 {
        return Err(WaiverError::ReferenceBudgetMismatch {
            group_id,
            component,
            requested: total,
            available: total - budget,
        });
    }
    Ok(())
}

fn waive_by_percentage(
    group_id: i64,
    rows: &mut [WorkingRow],
    component: Component,
    pct: &Percentages,
) -> Result<(), WaiverError> {
    let mut waived_sum = 0;
    let mut outstanding_sum = 0;
    for row in rows.iter_mut() {
        let outstanding = row.outstanding.get(component);
        let naive = pct.ceil_share(component, outstanding);
        row.waived.set(component, naive);
        waived_sum += naive;
        outstanding_sum += outstanding;
    }

    let target = pct.ceil_share(component, outstanding_sum);
    let mut drift = target - waived_sum;

    // Fold the drift into the last obligation; walk further back only when the
    // last one cannot absorb it without going negative or over its balance.
    for row in rows.iter_mut().rev() {
        if drift == 0 {
            break;
        }
        let current = row.waived.get(component);
        let adjustment = if drift < 0 {
            drift.max(-current)
        } else {
            drift.min(row.room(component))
        };
        row.waived.set(component, current + adjustment);
        drift -= adjustment;
    }

    if drift != 0 {
        error!(group_id, %component, drift, "rounding drift could not be reconciled");
        return Err(WaiverError::InvariantViolation(format!(
            "group {group_id} {component} drift {drift} left after reconciliation"
        )));
    }
    Ok(())
}

/// Group rows must equal the column sums of their obligations and nothing
/// may go negative. A failure here is an allocator bug.
pub fn check_invariants(allocation: &Allocation) -> Result<(), WaiverError> {
    for group in &allocation.groups {
        let outstanding: ComponentAmounts = group.obligations.iter().map(|row| row.outstanding).sum();
        let waived: ComponentAmounts = group.obligations.iter().map(|row| row.waived).sum();
        let remaining: ComponentAmounts = group.obligations.iter().map(|row| row.remaining).sum();
        if outstanding != group.outstanding || waived != group.waived || remaining != group.remaining {
            error!(group_id = group.group_id, "group allocation differs from its obligations");
            return Err(WaiverError::InvariantViolation(format!(
                "group {} allocation differs from the sum of its obligations",
                group.group_id
            )));
        }

        for row in &group.obligations {
            let after_waiver = row.outstanding - row.waived;
            if row.waived.has_negative()
                || after_waiver.has_negative()
                || row.remaining.has_negative()
            {
                error!(
                    obligation_id = row.obligation_id,
                    "obligation allocation has a negative amount"
                );
                return Err(WaiverError::InvariantViolation(format!(
                    "obligation {} allocation has a negative amount",
                    row.obligation_id
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use loanbook_core::Obligation;
    use rust_decimal::Decimal;

    use super::*;

    fn group(id: i64, month: u32, rows: &[(i64, ComponentAmounts)]) -> ObligationGroup {
        let due = NaiveDate::from_ymd_opt(2026, month, 1).unwrap();
        ObligationGroup {
            id,
            account_id: 1,
            due_date: due,
            paid_off: false,
            obligations: rows
                .iter()
                .map(|(obligation_id, remaining)| Obligation {
                    id: *obligation_id,
                    group_id: id,
                    due_date: due,
                    remaining: *remaining,
                })
                .collect(),
        }
    }

    fn pct(late_fee: i64, interest: i64, principal: i64) -> Percentages {
        Percentages::new(
            Decimal::new(late_fee, 2),
            Decimal::new(interest, 2),
            Decimal::new(principal, 2),
        )
    }

    fn waived_of(allocation: &Allocation, component: Component) -> Vec<i64> {
        allocation.obligations().map(|row| row.waived.get(component)).collect()
    }

    #[test]
    fn last_obligation_absorbs_rounding_drift() {
        let groups = vec![group(
            1,
            1,
            &[(1, ComponentAmounts::new(7, 0, 0)), (2, ComponentAmounts::new(8, 0, 0))],
        )];
        let allocation = allocate(&groups, &pct(33, 0, 0), None, 0).unwrap();

        assert_eq!(waived_of(&allocation, Component::LateFee), vec![3, 2]);
        assert_eq!(allocation.groups[0].waived.late_fee, 5);
        assert_eq!(allocation.total_waived().total(), 5);
    }

    #[test]
    fn drift_walks_back_past_obligations_with_nothing_to_give() {
        let groups = vec![group(
            1,
            1,
            &[
                (1, ComponentAmounts::new(1, 0, 0)),
                (2, ComponentAmounts::new(1, 0, 0)),
                (3, ComponentAmounts::new(1, 0, 0)),
                (4, ComponentAmounts::new(0, 5, 0)),
            ],
        )];
        let allocation = allocate(&groups, &pct(10, 0, 0), None, 0).unwrap();

        assert_eq!(waived_of(&allocation, Component::LateFee), vec![1, 0, 0, 0]);
        assert_eq!(allocation.total_waived().late_fee, 1);
    }

    #[test]
    fn group_totals_are_column_sums_of_obligations() {
        let groups = vec![
            group(
                1,
                1,
                &[
                    (1, ComponentAmounts::new(13, 211, 1_999)),
                    (2, ComponentAmounts::new(7, 97, 3_001)),
                    (3, ComponentAmounts::new(5, 33, 777)),
                ],
            ),
            group(2, 2, &[(4, ComponentAmounts::new(19, 401, 2_500))]),
        ];
        let allocation = allocate(&groups, &pct(100, 47, 13), None, 1_000).unwrap();

        for group in &allocation.groups {
            for component in Component::ORDER {
                let sum: i64 = group.obligations.iter().map(|row| row.waived.get(component)).sum();
                assert_eq!(sum, group.waived.get(component));
                let remaining: i64 = group
                    .obligations
                    .iter()
                    .map(|row| row.remaining.get(component))
                    .sum();
                assert_eq!(remaining, group.remaining.get(component));
            }
        }
        let group_sum: i64 = allocation.groups.iter().map(|group| group.waived.total()).sum();
        assert_eq!(group_sum, allocation.total_waived().total());
        check_invariants(&allocation).unwrap();

        let one = &groups[0];
        let expected = pct(100, 47, 13).ceil_share(Component::Interest, one.remaining().interest);
        assert_eq!(allocation.groups[0].waived.interest, expected);
    }

    #[test]
    fn reference_totals_are_consumed_exactly() {
        let groups = vec![group(
            1,
            1,
            &[(1, ComponentAmounts::new(50, 100, 400)), (2, ComponentAmounts::new(50, 100, 600))],
        )];
        let mut reference = ReferenceTotals::new();
        reference.insert(1, ComponentAmounts::new(60, 30, 0));

        let allocation = allocate(&groups, &pct(50, 50, 0), Some(&reference), 0).unwrap();

        // Late fee: naive 25 + 25 leaves 10 which spills back onto the first row.
        assert_eq!(waived_of(&allocation, Component::LateFee), vec![35, 25]);
        // Interest: first row takes min(30, 50) and exhausts the budget.
        assert_eq!(waived_of(&allocation, Component::Interest), vec![30, 0]);
        assert_eq!(waived_of(&allocation, Component::Principal), vec![0, 0]);
        assert_eq!(allocation.total_waived(), ComponentAmounts::new(60, 30, 0));
    }

    #[test]
    fn reference_totals_beyond_outstanding_are_rejected() {
        let groups = vec![group(1, 1, &[(1, ComponentAmounts::new(10, 0, 0))])];
        let mut reference = ReferenceTotals::new();
        reference.insert(1, ComponentAmounts::new(11, 0, 0));

        match allocate(&groups, &pct(100, 0, 0), Some(&reference), 0) {
            Err(WaiverError::ReferenceBudgetMismatch {
                group_id,
                component,
                requested,
                available,
            }) => {
                assert_eq!((group_id, component, requested, available), (1, Component::LateFee, 11, 10));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn reference_totals_for_unknown_groups_are_ignored() {
        let groups = vec![group(1, 1, &[(1, ComponentAmounts::new(10, 0, 0))])];
        let mut reference = ReferenceTotals::new();
        reference.insert(99, ComponentAmounts::new(1, 1, 1));

        let allocation = allocate(&groups, &pct(50, 0, 0), Some(&reference), 0).unwrap();
        assert_eq!(allocation.total_waived(), ComponentAmounts::new(5, 0, 0));
    }

    #[test]
    fn ptp_is_applied_after_the_waiver_across_all_groups() {
        let groups = vec![
            group(1, 1, &[(1, ComponentAmounts::new(10, 100, 200))]),
            group(2, 2, &[(2, ComponentAmounts::new(10, 100, 200))]),
        ];
        let allocation = allocate(&groups, &pct(100, 0, 0), None, 350).unwrap();

        let remaining: Vec<ComponentAmounts> = allocation.obligations().map(|row| row.remaining).collect();
        assert_eq!(remaining[0], ComponentAmounts::ZERO);
        assert_eq!(remaining[1], ComponentAmounts::new(0, 50, 200));
        assert_eq!(allocation.ptp_unapplied, 0);
        assert_eq!(allocation.total_after_waiver().total(), 600);
    }

    #[test]
    fn out_of_range_percentage_is_rejected() {
        let groups = vec![group(1, 1, &[(1, ComponentAmounts::new(10, 0, 0))])];
        assert!(matches!(
            allocate(&groups, &pct(101, 0, 0), None, 0),
            Err(WaiverError::InvalidPercentage { component: Component::LateFee, .. })
        ));
    }
}
