use std::collections::BTreeSet;

use chrono::NaiveDate;
use loanbook_core::{
    ApprovalTier, ComponentAmounts, Decision, DelinquencyBucket, Disposition, Percentages,
    ReferenceTotals, WaiverApproval, WaiverError, WaiverRequest,
};
use serde::{Deserialize, Serialize};

/// Amount thresholds (minor units) that decide which tiers must sign off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub auto_approve_max: i64,
    pub supervisor_min: i64,
    pub collections_head_min: i64,
    pub operations_head_min: i64,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            auto_approve_max: 50_000,
            supervisor_min: 500_000,
            collections_head_min: 2_000_000,
            operations_head_min: 5_000_000,
        }
    }
}

impl ApprovalPolicy {
    /// An empty set means the request is auto-approved.
    pub fn required_tiers(
        &self,
        bucket: DelinquencyBucket,
        waived: &ComponentAmounts,
        special_reason: bool,
    ) -> BTreeSet<ApprovalTier> {
        let total = waived.total();
        let mut tiers = BTreeSet::new();

        if total <= self.auto_approve_max && waived.principal == 0 && !special_reason {
            return tiers;
        }

        tiers.insert(ApprovalTier::TeamLead);
        if total >= self.supervisor_min
            || waived.principal > 0
            || bucket >= DelinquencyBucket::Bucket3
        {
            tiers.insert(ApprovalTier::Supervisor);
        }
        if total >= self.collections_head_min || special_reason {
            tiers.insert(ApprovalTier::CollectionsHead);
        }
        if total >= self.operations_head_min || bucket == DelinquencyBucket::Bucket5 {
            tiers.insert(ApprovalTier::OperationsHead);
        }
        tiers
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    pub id: String,
    pub tiers: BTreeSet<ApprovalTier>,
    pub buckets: BTreeSet<DelinquencyBucket>,
}

impl Approver {
    pub fn new(
        id: impl Into<String>,
        tiers: impl IntoIterator<Item = ApprovalTier>,
        buckets: impl IntoIterator<Item = DelinquencyBucket>,
    ) -> Self {
        Self {
            id: id.into(),
            tiers: tiers.into_iter().collect(),
            buckets: buckets.into_iter().collect(),
        }
    }

    /// Roles spanning several tiers are not bound to a bucket.
    pub fn is_top_level(&self) -> bool {
        self.tiers.len() > 1
    }

    pub fn may_act(&self, tier: ApprovalTier, bucket: DelinquencyBucket) -> Result<(), String> {
        if !self.tiers.contains(&tier) {
            return Err(format!("approver does not hold the {tier} role"));
        }
        if !self.is_top_level() && !self.buckets.contains(&bucket) {
            return Err(format!("approver is not assigned to {bucket}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub tier: ApprovalTier,
    pub decision: Decision,
    pub approved_pct: Option<Percentages>,
    pub approved_ptp: Option<i64>,
    pub approved_totals: Option<ReferenceTotals>,
    pub valid_until: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl ApprovalDecision {
    pub fn approve(tier: ApprovalTier) -> Self {
        Self {
            tier,
            decision: Decision::Approve,
            approved_pct: None,
            approved_ptp: None,
            approved_totals: None,
            valid_until: None,
            notes: None,
        }
    }

    pub fn reject(tier: ApprovalTier, notes: impl Into<String>) -> Self {
        Self {
            decision: Decision::Reject,
            notes: Some(notes.into()),
            ..Self::approve(tier)
        }
    }
}

/// Effective waiver terms after a decision has been layered on top of the
/// request and any earlier approvals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalTerms {
    pub pct: Percentages,
    pub ptp_amount: i64,
    pub reference_totals: Option<ReferenceTotals>,
    pub valid_until: NaiveDate,
}

pub fn resolve_terms(
    request: &WaiverRequest,
    previous: Option<&WaiverApproval>,
    decision: &ApprovalDecision,
) -> Result<ApprovalTerms, WaiverError> {
    let (base_pct, base_ptp, base_totals, base_valid_until) = match previous {
        Some(approval) => (
            approval.approved_pct,
            approval.approved_ptp,
            approval.reference_totals.clone(),
            approval.valid_until,
        ),
        None => (
            request.requested_pct,
            request.ptp_amount,
            request.reference_totals.clone(),
            request.valid_until,
        ),
    };

    let reference_totals = match (&decision.approved_totals, &decision.approved_pct) {
        (Some(totals), _) => Some(totals.clone()),
        (None, Some(_)) => None,
        (None, None) => base_totals,
    };

    let terms = ApprovalTerms {
        pct: decision.approved_pct.unwrap_or(base_pct),
        ptp_amount: decision.approved_ptp.unwrap_or(base_ptp),
        reference_totals,
        valid_until: decision.valid_until.unwrap_or(base_valid_until),
    };
    terms.pct.validate()?;
    if terms.ptp_amount < 0 {
        return Err(WaiverError::validation("approved_ptp must not be negative"));
    }
    Ok(terms)
}

/// Checks that `approver` may record `submitted` on `request` and returns
/// the tier being satisfied: always the lowest required tier still open.
pub fn authorize(
    request: &WaiverRequest,
    approver: &Approver,
    submitted: ApprovalTier,
) -> Result<ApprovalTier, WaiverError> {
    if request.disposition.is_terminal() {
        return Err(WaiverError::AlreadyTerminal {
            request_id: request.id,
            disposition: request.disposition,
        });
    }

    let Some(next) = request.tiers.next_required() else {
        return Err(WaiverError::AlreadyTerminal {
            request_id: request.id,
            disposition: request.disposition,
        });
    };

    if submitted != next {
        return Err(WaiverError::UnauthorizedTier {
            approver_id: approver.id.clone(),
            tier: submitted,
            reason: format!("{next} has not decided yet"),
        });
    }

    approver
        .may_act(next, request.bucket)
        .map_err(|reason| WaiverError::UnauthorizedTier {
            approver_id: approver.id.clone(),
            tier: next,
            reason,
        })?;

    Ok(next)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advanced { next: ApprovalTier },
    Approved,
    Rejected,
}

impl Transition {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Transition::Advanced { .. })
    }
}

/// Applies an authorized decision to the request's tier flags and disposition.
pub fn record_decision(
    request: &mut WaiverRequest,
    tier: ApprovalTier,
    decision: Decision,
) -> Transition {
    match decision {
        Decision::Reject => {
            request.disposition = Disposition::Rejected;
            Transition::Rejected
        }
        Decision::Approve => {
            request.tiers.satisfied.insert(tier);
            match request.tiers.next_required() {
                Some(next) => Transition::Advanced { next },
                None => {
                    request.disposition = Disposition::Approved;
                    Transition::Approved
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use loanbook_core::{Allocation, TierProgress};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::*;

    fn request(required: &[ApprovalTier], bucket: DelinquencyBucket) -> WaiverRequest {
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let pct = Percentages::new(Decimal::ONE, Decimal::new(5, 1), Decimal::ZERO);
        WaiverRequest {
            id: Uuid::new_v4(),
            account_id: 1,
            program: "GENERAL".to_string(),
            agent_id: "agent-1".to_string(),
            requested_pct: pct,
            display_pct: pct.display_percent(),
            total_waived: 1_000,
            ptp_amount: 500,
            created_on: today,
            valid_until: today,
            bucket,
            special_reason: None,
            reference_totals: None,
            tiers: TierProgress::new(required.iter().copied().collect()),
            disposition: Disposition::Pending,
            multiple_ptp: false,
            allocation: Allocation::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn team_lead() -> Approver {
        Approver::new("tl-1", [ApprovalTier::TeamLead], [DelinquencyBucket::Bucket2])
    }

    fn supervisor() -> Approver {
        Approver::new("sup-1", [ApprovalTier::Supervisor], [DelinquencyBucket::Bucket2])
    }

    #[test]
    fn small_late_fee_waivers_are_auto_approved() {
        let policy = ApprovalPolicy::default();
        let tiers = policy.required_tiers(
            DelinquencyBucket::Bucket1,
            &ComponentAmounts::new(10_000, 0, 0),
            false,
        );
        assert!(tiers.is_empty());
    }

    #[test]
    fn principal_and_bucket_drive_the_tier_set() {
        let policy = ApprovalPolicy::default();
        let principal = policy.required_tiers(
            DelinquencyBucket::Bucket1,
            &ComponentAmounts::new(0, 0, 100),
            false,
        );
        assert_eq!(
            principal.into_iter().collect::<Vec<_>>(),
            vec![ApprovalTier::TeamLead, ApprovalTier::Supervisor]
        );

        let write_off = policy.required_tiers(
            DelinquencyBucket::Bucket5,
            &ComponentAmounts::new(60_000, 0, 0),
            true,
        );
        assert_eq!(
            write_off.into_iter().collect::<Vec<_>>(),
            ApprovalTier::ALL.to_vec()
        );
    }

    #[test]
    fn supervisor_cannot_decide_before_team_lead() {
        let request = request(
            &[ApprovalTier::TeamLead, ApprovalTier::Supervisor],
            DelinquencyBucket::Bucket2,
        );
        let result = authorize(&request, &supervisor(), ApprovalTier::Supervisor);
        assert!(matches!(result, Err(WaiverError::UnauthorizedTier { .. })));
    }

    #[test]
    fn tiers_approve_in_order_until_terminal() {
        let mut request = request(
            &[ApprovalTier::TeamLead, ApprovalTier::Supervisor],
            DelinquencyBucket::Bucket2,
        );

        let tier = authorize(&request, &team_lead(), ApprovalTier::TeamLead).unwrap();
        assert_eq!(
            record_decision(&mut request, tier, Decision::Approve),
            Transition::Advanced {
                next: ApprovalTier::Supervisor
            }
        );
        assert_eq!(request.disposition, Disposition::Pending);

        // The team lead cannot sign twice once satisfied.
        assert!(authorize(&request, &team_lead(), ApprovalTier::TeamLead).is_err());

        let tier = authorize(&request, &supervisor(), ApprovalTier::Supervisor).unwrap();
        assert_eq!(
            record_decision(&mut request, tier, Decision::Approve),
            Transition::Approved
        );
        assert_eq!(request.disposition, Disposition::Approved);

        assert!(matches!(
            authorize(&request, &supervisor(), ApprovalTier::Supervisor),
            Err(WaiverError::AlreadyTerminal { .. })
        ));
    }

    #[test]
    fn rejection_short_circuits_remaining_tiers() {
        let mut request = request(
            &[ApprovalTier::TeamLead, ApprovalTier::Supervisor],
            DelinquencyBucket::Bucket2,
        );
        let tier = authorize(&request, &team_lead(), ApprovalTier::TeamLead).unwrap();
        assert_eq!(
            record_decision(&mut request, tier, Decision::Reject),
            Transition::Rejected
        );
        assert_eq!(request.disposition, Disposition::Rejected);
        assert!(request.tiers.satisfied.is_empty());
    }

    #[test]
    fn bucket_scoping_applies_to_single_tier_approvers_only() {
        let request = request(&[ApprovalTier::TeamLead], DelinquencyBucket::Bucket4);
        assert!(authorize(&request, &team_lead(), ApprovalTier::TeamLead).is_err());

        let head = Approver::new(
            "head-1",
            [ApprovalTier::TeamLead, ApprovalTier::Supervisor],
            [],
        );
        assert_eq!(
            authorize(&request, &head, ApprovalTier::TeamLead).unwrap(),
            ApprovalTier::TeamLead
        );
    }

    #[test]
    fn percentages_without_totals_drop_inherited_totals() {
        let mut request = request(&[ApprovalTier::TeamLead], DelinquencyBucket::Bucket2);
        let mut totals = ReferenceTotals::new();
        totals.insert(1, ComponentAmounts::new(5, 0, 0));
        request.reference_totals = Some(totals);

        let inherited = resolve_terms(&request, None, &ApprovalDecision::approve(ApprovalTier::TeamLead)).unwrap();
        assert!(inherited.reference_totals.is_some());
        assert_eq!(inherited.ptp_amount, 500);

        let mut decision = ApprovalDecision::approve(ApprovalTier::TeamLead);
        decision.approved_pct = Some(Percentages::new(Decimal::new(5, 1), Decimal::ZERO, Decimal::ZERO));
        decision.approved_ptp = Some(700);
        let overridden = resolve_terms(&request, None, &decision).unwrap();
        assert!(overridden.reference_totals.is_none());
        assert_eq!(overridden.ptp_amount, 700);
        assert_eq!(overridden.pct.late_fee, Decimal::new(5, 1));
    }
}
