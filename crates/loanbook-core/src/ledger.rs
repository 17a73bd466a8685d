//! Ledger-side view of an account: obligation balances plus the payments
//! that moved them. Every balance change goes through [`LedgerMutation`] so
//! stores and in-flight drafts apply identical arithmetic.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amounts::{Component, ComponentAmounts};
use crate::error::WaiverError;
use crate::models::{AccountId, GroupId, Obligation, ObligationGroup, ObligationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Posted,
    Voided,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEffect {
    pub group_id: GroupId,
    pub obligation_id: ObligationId,
    pub component: Component,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedPayment {
    pub id: Uuid,
    pub account_id: AccountId,
    pub amount: i64,
    pub paid_at: DateTime<Utc>,
    pub status: PaymentStatus,
    pub effects: Vec<PaymentEffect>,
    pub unapplied: i64,
    pub replayed_from: Option<Uuid>,
}

impl PostedPayment {
    pub fn paid_on(&self) -> NaiveDate {
        self.paid_at.date_naive()
    }

    pub fn is_posted(&self) -> bool {
        self.status == PaymentStatus::Posted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Forgiveness {
    pub pending_waiver_id: Uuid,
    pub group_id: GroupId,
    pub obligation_id: ObligationId,
    pub component: Component,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerMutation {
    PostPayment(PostedPayment),
    VoidPayment { payment_id: Uuid },
    Forgive(Forgiveness),
    MarkPaidOff { group_id: GroupId },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLedger {
    pub account_id: AccountId,
    pub groups: Vec<ObligationGroup>,
    pub payments: Vec<PostedPayment>,
}

impl AccountLedger {
    pub fn new(account_id: AccountId, groups: Vec<ObligationGroup>) -> Self {
        Self {
            account_id,
            groups,
            payments: Vec::new(),
        }
    }

    pub fn outstanding(&self) -> ComponentAmounts {
        self.groups.iter().map(ObligationGroup::remaining).sum()
    }

    pub fn group(&self, group_id: GroupId) -> Option<&ObligationGroup> {
        self.groups.iter().find(|group| group.id == group_id)
    }

    pub fn obligation(&self, obligation_id: ObligationId) -> Option<&Obligation> {
        self.groups
            .iter()
            .flat_map(|group| group.obligations.iter())
            .find(|obligation| obligation.id == obligation_id)
    }

    pub fn payment(&self, payment_id: Uuid) -> Option<&PostedPayment> {
        self.payments.iter().find(|payment| payment.id == payment_id)
    }

    /// Groups with something left to pay, oldest first.
    pub fn open_groups(&self) -> Vec<&ObligationGroup> {
        let mut groups: Vec<&ObligationGroup> = self
            .groups
            .iter()
            .filter(|group| !group.paid_off && group.remaining().total() > 0)
            .collect();
        groups.sort_by_key(|group| (group.due_date, group.id));
        groups
    }

    pub fn apply(&mut self, mutation: &LedgerMutation) -> Result<(), WaiverError> {
        match mutation {
            LedgerMutation::PostPayment(payment) => {
                if self.payment(payment.id).is_some() {
                    return Err(WaiverError::InvariantViolation(format!(
                        "payment {} posted twice",
                        payment.id
                    )));
                }
                for effect in &payment.effects {
                    self.adjust(effect.obligation_id, effect.component, -effect.amount)?;
                }
                self.payments.push(payment.clone());
            }
            LedgerMutation::VoidPayment { payment_id } => {
                let effects = match self.payment(*payment_id) {
                    Some(payment) if payment.is_posted() => payment.effects.clone(),
                    Some(_) => {
                        return Err(WaiverError::InvariantViolation(format!(
                            "payment {payment_id} voided twice"
                        )));
                    }
                    None => return Err(WaiverError::NotFound(format!("payment {payment_id}"))),
                };
                for effect in effects.iter().rev() {
                    self.adjust(effect.obligation_id, effect.component, effect.amount)?;
                }
                if let Some(payment) = self.payments.iter_mut().find(|p| p.id == *payment_id) {
                    payment.status = PaymentStatus::Voided;
                }
                for group in &mut self.groups {
                    if group.paid_off && group.remaining().total() > 0 {
                        group.paid_off = false;
                    }
                }
            }
            LedgerMutation::Forgive(forgiveness) => {
                self.adjust(
                    forgiveness.obligation_id,
                    forgiveness.component,
                    -forgiveness.amount,
                )?;
            }
            LedgerMutation::MarkPaidOff { group_id } => {
                let group = self
                    .groups
                    .iter_mut()
                    .find(|group| group.id == *group_id)
                    .ok_or_else(|| WaiverError::NotFound(format!("obligation group {group_id}")))?;
                if group.remaining().total() != 0 {
                    return Err(WaiverError::InvariantViolation(format!(
                        "obligation group {group_id} marked paid off with balance outstanding"
                    )));
                }
                group.paid_off = true;
            }
        }
        Ok(())
    }

    fn adjust(
        &mut self,
        obligation_id: ObligationId,
        component: Component,
        delta: i64,
    ) -> Result<(), WaiverError> {
        let obligation = self
            .groups
            .iter_mut()
            .flat_map(|group| group.obligations.iter_mut())
            .find(|obligation| obligation.id == obligation_id)
            .ok_or_else(|| WaiverError::NotFound(format!("obligation {obligation_id}")))?;

        let balance = obligation.remaining.get_mut(component);
        let updated = *balance + delta;
        if updated < 0 {
            return Err(WaiverError::InvariantViolation(format!(
                "obligation {obligation_id} {component} would go negative ({updated})"
            )));
        }
        *balance = updated;
        Ok(())
    }
}
