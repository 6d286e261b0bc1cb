//! Payment approval state machine: states, transition table, dual control

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::traits::{CoreEntity, SoftDeletable};
use crate::types::*;

/// States a payment moves through from draft to completed funds release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Draft,
    PendingApproval,
    Approved,
    Rejected,
    Scheduled,
    Released,
    Completed,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Draft => "draft",
            PaymentState::PendingApproval => "pending_approval",
            PaymentState::Approved => "approved",
            PaymentState::Rejected => "rejected",
            PaymentState::Scheduled => "scheduled",
            PaymentState::Released => "released",
            PaymentState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The complete set of legal edges. `completed` is terminal.
pub const LEGAL_TRANSITIONS: [(PaymentState, PaymentState); 7] = [
    (PaymentState::Draft, PaymentState::PendingApproval),
    (PaymentState::PendingApproval, PaymentState::Approved),
    (PaymentState::PendingApproval, PaymentState::Rejected),
    (PaymentState::Approved, PaymentState::Scheduled),
    (PaymentState::Rejected, PaymentState::Draft),
    (PaymentState::Scheduled, PaymentState::Released),
    (PaymentState::Released, PaymentState::Completed),
];

/// Pure table lookup; never infers a path between states
pub fn validate_state_transition(from: PaymentState, to: PaymentState) -> bool {
    LEGAL_TRANSITIONS.contains(&(from, to))
}

/// Action recorded against a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    Created,
    Submitted,
    Approved,
    Rejected,
    Resubmitted,
    Scheduled,
    Released,
    Completed,
}

/// One append-only entry in the workflow audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub state: PaymentState,
    pub timestamp: NaiveDateTime,
    pub actor: ActorId,
    pub action: WorkflowAction,
}

/// Recorded approval decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approver_id: ActorId,
    pub timestamp: NaiveDateTime,
    pub status: ApprovalStatus,
    /// Approval cycle the record belongs to; resubmission starts a new one
    pub cycle: u32,
}

/// Approval policy for a payment, supplied at creation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRules {
    /// Payments at or above this amount start in pending_approval
    pub threshold_amount: BigDecimal,
    /// Whether two distinct approvers are required before release
    pub requires_dual_control: bool,
    /// Identities eligible to approve; empty means any authenticated actor
    pub approvers: HashSet<ActorId>,
}

impl ApprovalRules {
    pub fn new(threshold_amount: BigDecimal, requires_dual_control: bool) -> Self {
        Self {
            threshold_amount,
            requires_dual_control,
            approvers: HashSet::new(),
        }
    }

    pub fn with_approvers(mut self, approvers: impl IntoIterator<Item = ActorId>) -> Self {
        self.approvers = approvers.into_iter().collect();
        self
    }
}

/// Outcome of a dual-control check. The distinct variants are a user-facing
/// requirement: callers render the specific reason, not a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DualControlStatus {
    Satisfied,
    FirstApprovalNeeded,
    SecondApprovalNeeded,
    ActorAlreadyApproved,
}

impl DualControlStatus {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, DualControlStatus::Satisfied)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            DualControlStatus::Satisfied => "dual control satisfied",
            DualControlStatus::FirstApprovalNeeded => "first approval needed",
            DualControlStatus::SecondApprovalNeeded => "second approval needed",
            DualControlStatus::ActorAlreadyApproved => {
                "you already approved, a different approver is required"
            }
        }
    }
}

impl std::fmt::Display for DualControlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Workflow sub-record embedded in a payment. The payment's visible status
/// is always derived from `current_state`; there is no independently
/// written mirror column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentWorkflow {
    pub current_state: PaymentState,
    /// Append-only; `current_state` always equals the state of the last entry
    pub state_history: Vec<StateHistoryEntry>,
    pub approval_rules: ApprovalRules,
    /// Append-only for the payment's whole life. Records are never removed;
    /// only those from the current cycle count toward dual control.
    pub approvals: Vec<ApprovalRecord>,
    /// Current approval cycle, bumped on resubmission
    pub approval_cycle: u32,
}

impl PaymentWorkflow {
    /// Approver identities with an approval in the current cycle,
    /// deduplicated by exact id equality
    pub fn distinct_approvers(&self) -> HashSet<&ActorId> {
        self.approvals
            .iter()
            .filter(|a| a.status == ApprovalStatus::Approved && a.cycle == self.approval_cycle)
            .map(|a| &a.approver_id)
            .collect()
    }

    pub fn has_approved(&self, actor: &ActorId) -> bool {
        self.distinct_approvers().contains(actor)
    }

    /// Append one history entry and move the current state. The entry's
    /// state field is what keeps the reconstruction invariant: replaying
    /// history always ends on `current_state`.
    pub(crate) fn record_transition(
        &mut self,
        to: PaymentState,
        actor: ActorId,
        action: WorkflowAction,
    ) {
        self.state_history.push(StateHistoryEntry {
            state: to,
            timestamp: chrono::Utc::now().naive_utc(),
            actor,
            action,
        });
        self.current_state = to;
    }

    /// Append a history entry without moving state (e.g. the first of two
    /// required approvals)
    pub(crate) fn record_action(&mut self, actor: ActorId, action: WorkflowAction) {
        self.state_history.push(StateHistoryEntry {
            state: self.current_state,
            timestamp: chrono::Utc::now().naive_utc(),
            actor,
            action,
        });
    }

    pub(crate) fn record_approval(&mut self, actor: ActorId) {
        self.approvals.push(ApprovalRecord {
            approver_id: actor,
            timestamp: chrono::Utc::now().naive_utc(),
            status: ApprovalStatus::Approved,
            cycle: self.approval_cycle,
        });
    }

    /// Start a fresh approval cycle. Earlier records stay in the list for
    /// audit; they stop counting toward dual control.
    pub(crate) fn begin_approval_cycle(&mut self) {
        self.approval_cycle += 1;
    }
}

/// Initial routing: amounts at or above the approval threshold start in
/// pending_approval, everything else in draft. This is the only place state
/// is chosen implicitly rather than via an explicit transition call.
pub fn create_initial_workflow_metadata(
    amount: &BigDecimal,
    rules: ApprovalRules,
    created_by: &ActorId,
) -> PaymentWorkflow {
    let initial = if *amount >= rules.threshold_amount {
        PaymentState::PendingApproval
    } else {
        PaymentState::Draft
    };
    PaymentWorkflow {
        current_state: initial,
        state_history: vec![StateHistoryEntry {
            state: initial,
            timestamp: chrono::Utc::now().naive_utc(),
            actor: created_by.clone(),
            action: WorkflowAction::Created,
        }],
        approval_rules: rules,
        approvals: Vec::new(),
        approval_cycle: 0,
    }
}

/// Would an approval by `actor` satisfy dual control? Counts the actor's
/// prospective approval alongside those already recorded; the same actor is
/// never permitted to provide both.
pub fn check_dual_control(workflow: &PaymentWorkflow, actor: &ActorId) -> DualControlStatus {
    if !workflow.approval_rules.requires_dual_control {
        return DualControlStatus::Satisfied;
    }
    let recorded = workflow.distinct_approvers();
    if recorded.contains(actor) {
        return DualControlStatus::ActorAlreadyApproved;
    }
    // The candidate counts as one distinct approver
    if recorded.len() + 1 >= 2 {
        DualControlStatus::Satisfied
    } else {
        DualControlStatus::FirstApprovalNeeded
    }
}

/// How far the recorded approvals have progressed, independent of any
/// candidate actor. Drives the actual pending_approval -> approved edge.
pub fn dual_control_progress(workflow: &PaymentWorkflow) -> DualControlStatus {
    if !workflow.approval_rules.requires_dual_control {
        return DualControlStatus::Satisfied;
    }
    match workflow.distinct_approvers().len() {
        0 => DualControlStatus::FirstApprovalNeeded,
        1 => DualControlStatus::SecondApprovalNeeded,
        _ => DualControlStatus::Satisfied,
    }
}

/// A money-movement record with its embedded approval workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: EntityId,
    pub amount: BigDecimal,
    pub currency: String,
    pub created_by: ActorId,
    pub workflow: PaymentWorkflow,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
    pub deleted_by: Option<ActorId>,
}

impl Payment {
    pub fn new(
        amount: BigDecimal,
        currency: String,
        created_by: ActorId,
        rules: ApprovalRules,
    ) -> Self {
        let workflow = create_initial_workflow_metadata(&amount, rules, &created_by);
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: EntityId::new(),
            amount,
            currency,
            created_by,
            workflow,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
        }
    }

    /// Visible status, always derived from the workflow
    pub fn status(&self) -> PaymentState {
        self.workflow.current_state
    }
}

impl CoreEntity for Payment {
    const KIND: EntityKind = EntityKind::Payment;

    fn id(&self) -> EntityId {
        self.id
    }
}

impl SoftDeletable for Payment {
    fn deleted_at(&self) -> Option<NaiveDateTime> {
        self.deleted_at
    }

    fn set_deleted(&mut self, at: Option<NaiveDateTime>, by: Option<ActorId>) {
        self.deleted_at = at;
        self.deleted_by = by;
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}
