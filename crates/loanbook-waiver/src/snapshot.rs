use loanbook_core::{
    AccountId, AccountLedger, ComponentAmounts, GroupId, ObligationGroup, WaiverError,
};

/// Ordered, read-only view of what an account still owes.
///
/// Groups are sorted by due date then id, obligations likewise, and anything
/// with nothing outstanding is left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObligationSnapshot {
    account_id: AccountId,
    groups: Vec<ObligationGroup>,
}

impl ObligationSnapshot {
    pub fn build(ledger: &AccountLedger, selected: Option<&[GroupId]>) -> Result<Self, WaiverError> {
        let open: Vec<ObligationGroup> = ledger
            .open_groups()
            .into_iter()
            .map(|group| {
                let mut group = group.clone();
                group.obligations.retain(|obligation| obligation.remaining.total() > 0);
                group.obligations.sort_by_key(|obligation| (obligation.due_date, obligation.id));
                group
            })
            .collect();

        let groups = match selected {
            Some(selected) => {
                if selected.is_empty() {
                    return Err(WaiverError::validation(
                        "at least one obligation group must be selected",
                    ));
                }
                for group_id in selected {
                    if !open.iter().any(|group| group.id == *group_id) {
                        return Err(WaiverError::validation(format!(
                            "obligation group {group_id} has nothing outstanding on account {}",
                            ledger.account_id
                        )));
                    }
                }
                open.into_iter()
                    .filter(|group| selected.contains(&group.id))
                    .collect()
            }
            None => open,
        };

        if groups.is_empty() {
            return Err(WaiverError::NoActiveObligations {
                account_id: ledger.account_id,
            });
        }

        Ok(Self {
            account_id: ledger.account_id,
            groups,
        })
    }

    /// Narrows the snapshot to `group_ids`, silently dropping groups that
    /// have been paid off since they were chosen.
    pub fn restricted_to(self, group_ids: &[GroupId]) -> Result<Self, WaiverError> {
        let groups: Vec<ObligationGroup> = self
            .groups
            .into_iter()
            .filter(|group| group_ids.contains(&group.id))
            .collect();
        if groups.is_empty() {
            return Err(WaiverError::NoActiveObligations {
                account_id: self.account_id,
            });
        }
        Ok(Self {
            account_id: self.account_id,
            groups,
        })
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn groups(&self) -> &[ObligationGroup] {
        &self.groups
    }

    pub fn outstanding(&self) -> ComponentAmounts {
        self.groups.iter().map(ObligationGroup::remaining).sum()
    }
}
