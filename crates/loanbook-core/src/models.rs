use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::amounts::{ComponentAmounts, Percentages};

pub type AccountId = i64;
pub type GroupId = i64;
pub type ObligationId = i64;

/// Agent- or approver-supplied absolute waived totals per obligation group.
pub type ReferenceTotals = BTreeMap<GroupId, ComponentAmounts>;

/// One installment's outstanding debt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: ObligationId,
    pub group_id: GroupId,
    pub due_date: NaiveDate,
    pub remaining: ComponentAmounts,
}

/// A billing cycle ("account payment") holding one or more installments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationGroup {
    pub id: GroupId,
    pub account_id: AccountId,
    pub due_date: NaiveDate,
    pub paid_off: bool,
    pub obligations: Vec<Obligation>,
}

impl ObligationGroup {
    pub fn remaining(&self) -> ComponentAmounts {
        self.obligations.iter().map(|obligation| obligation.remaining).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelinquencyBucket {
    Current,
    Bucket1,
    Bucket2,
    Bucket3,
    Bucket4,
    Bucket5,
}

impl DelinquencyBucket {
    pub fn from_days_past_due(days_past_due: i64) -> Self {
        match days_past_due {
            i64::MIN..=0 => DelinquencyBucket::Current,
            1..=10 => DelinquencyBucket::Bucket1,
            11..=40 => DelinquencyBucket::Bucket2,
            41..=70 => DelinquencyBucket::Bucket3,
            71..=90 => DelinquencyBucket::Bucket4,
            _ => DelinquencyBucket::Bucket5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DelinquencyBucket::Current => "current",
            DelinquencyBucket::Bucket1 => "bucket_1",
            DelinquencyBucket::Bucket2 => "bucket_2",
            DelinquencyBucket::Bucket3 => "bucket_3",
            DelinquencyBucket::Bucket4 => "bucket_4",
            DelinquencyBucket::Bucket5 => "bucket_5",
        }
    }
}

impl fmt::Display for DelinquencyBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approval tiers in sign-off order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalTier {
    TeamLead,
    Supervisor,
    CollectionsHead,
    OperationsHead,
}

impl ApprovalTier {
    pub const ALL: [ApprovalTier; 4] = [
        ApprovalTier::TeamLead,
        ApprovalTier::Supervisor,
        ApprovalTier::CollectionsHead,
        ApprovalTier::OperationsHead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalTier::TeamLead => "team_lead",
            ApprovalTier::Supervisor => "supervisor",
            ApprovalTier::CollectionsHead => "collections_head",
            ApprovalTier::OperationsHead => "operations_head",
        }
    }
}

impl fmt::Display for ApprovalTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl Disposition {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Disposition::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Pending => "pending",
            Disposition::Approved => "approved",
            Disposition::Rejected => "rejected",
            Disposition::Expired => "expired",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Which tiers a request needs and which have signed off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierProgress {
    pub required: BTreeSet<ApprovalTier>,
    pub satisfied: BTreeSet<ApprovalTier>,
}

impl TierProgress {
    pub fn new(required: BTreeSet<ApprovalTier>) -> Self {
        Self {
            required,
            satisfied: BTreeSet::new(),
        }
    }

    pub fn next_required(&self) -> Option<ApprovalTier> {
        self.required.difference(&self.satisfied).next().copied()
    }

    pub fn is_complete(&self) -> bool {
        self.next_required().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationAllocation {
    pub obligation_id: ObligationId,
    pub group_id: GroupId,
    pub due_date: NaiveDate,
    pub outstanding: ComponentAmounts,
    pub waived: ComponentAmounts,
    /// Left after the waiver and the PTP amount.
    pub remaining: ComponentAmounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAllocation {
    pub group_id: GroupId,
    pub due_date: NaiveDate,
    pub outstanding: ComponentAmounts,
    pub waived: ComponentAmounts,
    pub remaining: ComponentAmounts,
    pub obligations: Vec<ObligationAllocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub groups: Vec<GroupAllocation>,
    pub ptp_amount: i64,
    /// PTP amount exceeding the post-waiver outstanding.
    pub ptp_unapplied: i64,
}

impl Allocation {
    pub fn total_outstanding(&self) -> ComponentAmounts {
        self.groups.iter().map(|group| group.outstanding).sum()
    }

    pub fn total_waived(&self) -> ComponentAmounts {
        self.groups.iter().map(|group| group.waived).sum()
    }

    pub fn total_remaining(&self) -> ComponentAmounts {
        self.groups.iter().map(|group| group.remaining).sum()
    }

    /// Outstanding once the waiver is applied, before any PTP.
    pub fn total_after_waiver(&self) -> ComponentAmounts {
        self.total_outstanding() - self.total_waived()
    }

    pub fn obligations(&self) -> impl Iterator<Item = &ObligationAllocation> {
        self.groups.iter().flat_map(|group| group.obligations.iter())
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.iter().map(|group| group.group_id).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiverRequest {
    pub id: Uuid,
    pub account_id: AccountId,
    pub program: String,
    pub agent_id: String,
    pub requested_pct: Percentages,
    pub display_pct: Percentages,
    pub total_waived: i64,
    pub ptp_amount: i64,
    pub created_on: NaiveDate,
    pub valid_until: NaiveDate,
    pub bucket: DelinquencyBucket,
    pub special_reason: Option<String>,
    pub reference_totals: Option<ReferenceTotals>,
    pub tiers: TierProgress,
    pub disposition: Disposition,
    pub multiple_ptp: bool,
    pub allocation: Allocation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WaiverRequest {
    pub fn is_open(&self) -> bool {
        self.disposition == Disposition::Pending
    }
}

/// One tier's decision. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiverApproval {
    pub id: Uuid,
    pub request_id: Uuid,
    pub tier: ApprovalTier,
    pub decision: Decision,
    pub approved_pct: Percentages,
    pub approved_ptp: i64,
    pub reference_totals: Option<ReferenceTotals>,
    pub valid_from: NaiveDate,
    pub valid_until: NaiveDate,
    pub approver_id: String,
    pub notes: Option<String>,
    pub allocation: Option<Allocation>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingWaiverStatus {
    Active,
    Implemented,
    Expired,
}

impl PendingWaiverStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PendingWaiverStatus::Active => "active",
            PendingWaiverStatus::Implemented => "implemented",
            PendingWaiverStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationWaiver {
    pub obligation_id: ObligationId,
    pub waived: ComponentAmounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWaiverGroupEntry {
    pub group_id: GroupId,
    pub due_date: NaiveDate,
    pub waived: ComponentAmounts,
    pub obligations: Vec<ObligationWaiver>,
}

/// An approved waiver waiting for the payment that activates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWaiver {
    pub id: Uuid,
    pub account_id: AccountId,
    pub request_id: Uuid,
    pub approval_id: Option<Uuid>,
    pub waived: ComponentAmounts,
    pub need_to_pay: i64,
    pub created_on: NaiveDate,
    /// Payments cleared before this instant never count toward `need_to_pay`.
    pub created_at: DateTime<Utc>,
    pub valid_until: NaiveDate,
    pub status: PendingWaiverStatus,
    pub groups: Vec<PendingWaiverGroupEntry>,
    pub implemented_on: Option<NaiveDate>,
}

impl PendingWaiver {
    pub fn is_active(&self) -> bool {
        self.status == PendingWaiverStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplePaymentPtp {
    pub id: Uuid,
    pub request_id: Uuid,
    pub sequence: u32,
    pub promised_date: NaiveDate,
    pub promised_amount: i64,
    pub paid_amount: i64,
    pub remaining_amount: i64,
    pub fully_paid: bool,
    pub paid_on: Option<NaiveDate>,
}
