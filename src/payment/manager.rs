//! Payment operations: creation, submission, approval, release

use bigdecimal::BigDecimal;

use crate::payment::workflow::*;
use crate::repository::Repository;
use crate::traits::{EntityStore, NoopNotificationSink, NotificationSink, TransitionEvent};
use crate::types::*;
use crate::utils::validation::{validate_currency, validate_positive_amount};

/// Manager for payment workflow operations. Every transition is applied as a
/// conditional write: the source state is re-read inside the same store
/// update that writes the new state, so two concurrent approvals against one
/// payment cannot both succeed.
pub struct PaymentManager<S: EntityStore<Payment>> {
    repo: Repository<Payment, S>,
    notifier: Box<dyn NotificationSink>,
}

impl<S: EntityStore<Payment>> PaymentManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            repo: Repository::new(store),
            notifier: Box::new(NoopNotificationSink),
        }
    }

    pub fn with_notifier(store: S, notifier: Box<dyn NotificationSink>) -> Self {
        Self {
            repo: Repository::new(store),
            notifier,
        }
    }

    /// Create a payment, routing its initial state from the approval
    /// threshold
    pub async fn create_payment(
        &mut self,
        amount: BigDecimal,
        currency: String,
        created_by: ActorId,
        rules: ApprovalRules,
    ) -> CoreResult<Payment> {
        validate_positive_amount(&amount)?;
        validate_currency(&currency)?;

        let payment = Payment::new(amount, currency, created_by, rules);
        self.repo.insert(&payment).await?;
        tracing::info!(
            payment_id = %payment.id,
            state = %payment.status(),
            "payment created"
        );
        Ok(payment)
    }

    pub async fn get_payment(&self, id: EntityId) -> CoreResult<Option<Payment>> {
        self.repo.find_by_id(id).await
    }

    /// Submit a draft payment for approval
    pub async fn submit(&mut self, id: EntityId, actor: &ActorId) -> CoreResult<Payment> {
        self.apply_transition(
            id,
            PaymentState::PendingApproval,
            actor.clone(),
            WorkflowAction::Submitted,
        )
        .await
    }

    /// Can this actor's approval complete the pending_approval -> approved
    /// edge right now? Fails closed: the transition must be legal from the
    /// current state and dual control must be satisfied by this actor's
    /// prospective approval.
    pub fn can_approve_payment(&self, payment: &Payment, actor: &ActorId) -> CoreResult<()> {
        let current = payment.status();
        if !validate_state_transition(current, PaymentState::Approved) {
            return Err(CoreError::InvalidTransition(format!(
                "approval requires state {}, payment is {current}",
                PaymentState::PendingApproval
            )));
        }
        self.check_eligibility(payment, actor)?;
        let status = check_dual_control(&payment.workflow, actor);
        if status.is_satisfied() {
            Ok(())
        } else {
            Err(CoreError::DualControlUnsatisfied(status.reason().to_string()))
        }
    }

    /// Release gating: only legal from approved or scheduled
    pub fn can_release_payment(&self, payment: &Payment) -> CoreResult<()> {
        match payment.status() {
            PaymentState::Approved | PaymentState::Scheduled => Ok(()),
            other => Err(CoreError::InvalidTransition(format!(
                "release requires state {} or {}, payment is {other}",
                PaymentState::Approved,
                PaymentState::Scheduled
            ))),
        }
    }

    /// Record an approval by `actor`. The payment moves to approved once
    /// dual control is satisfied; an earlier approval of a dual-control
    /// payment is recorded without changing state. Both the approval record
    /// and the history entry are appended inside the conditional write.
    pub async fn approve(&mut self, id: EntityId, actor: &ActorId) -> CoreResult<Payment> {
        let actor = actor.clone();
        let payment = self
            .repo
            .update_guarded(
                id,
                Box::new(move |current: &Payment| {
                    let from = current.status();
                    if !validate_state_transition(from, PaymentState::Approved) {
                        return Err(CoreError::InvalidTransition(format!(
                            "approval requires state {}, payment is {from}",
                            PaymentState::PendingApproval
                        )));
                    }
                    let rules = &current.workflow.approval_rules;
                    if !rules.approvers.is_empty() && !rules.approvers.contains(&actor) {
                        return Err(CoreError::Validation(format!(
                            "{actor} is not an eligible approver for this payment"
                        )));
                    }
                    if current.workflow.has_approved(&actor) {
                        return Err(CoreError::DualControlUnsatisfied(
                            DualControlStatus::ActorAlreadyApproved.reason().to_string(),
                        ));
                    }

                    let mut next = current.clone();
                    next.workflow.record_approval(actor.clone());
                    if dual_control_progress(&next.workflow).is_satisfied() {
                        next.workflow.record_transition(
                            PaymentState::Approved,
                            actor.clone(),
                            WorkflowAction::Approved,
                        );
                    } else {
                        next.workflow.record_action(actor.clone(), WorkflowAction::Approved);
                    }
                    next.updated_at = chrono::Utc::now().naive_utc();
                    Ok(next)
                }),
            )
            .await?;

        if payment.status() == PaymentState::Approved {
            self.emit(&payment, PaymentState::PendingApproval, WorkflowAction::Approved);
        } else {
            tracing::info!(
                payment_id = %payment.id,
                approvals = payment.workflow.approvals.len(),
                "approval recorded, awaiting second approver"
            );
        }
        Ok(payment)
    }

    /// Reject a pending payment
    pub async fn reject(&mut self, id: EntityId, actor: &ActorId) -> CoreResult<Payment> {
        self.apply_transition(
            id,
            PaymentState::Rejected,
            actor.clone(),
            WorkflowAction::Rejected,
        )
        .await
    }

    /// Return a rejected payment to draft for resubmission. A fresh
    /// approval cycle starts; records from the rejected round stay in the
    /// append-only list and stop counting toward dual control.
    pub async fn resubmit(&mut self, id: EntityId, actor: &ActorId) -> CoreResult<Payment> {
        let actor = actor.clone();
        let payment = self
            .repo
            .update_guarded(
                id,
                Box::new(move |current: &Payment| {
                    let from = current.status();
                    if !validate_state_transition(from, PaymentState::Draft) {
                        return Err(CoreError::InvalidTransition(format!(
                            "resubmission requires state {}, payment is {from}",
                            PaymentState::Rejected
                        )));
                    }
                    let mut next = current.clone();
                    next.workflow.begin_approval_cycle();
                    next.workflow.record_transition(
                        PaymentState::Draft,
                        actor.clone(),
                        WorkflowAction::Resubmitted,
                    );
                    next.updated_at = chrono::Utc::now().naive_utc();
                    Ok(next)
                }),
            )
            .await?;
        self.emit(&payment, PaymentState::Rejected, WorkflowAction::Resubmitted);
        Ok(payment)
    }

    /// Schedule an approved payment for release
    pub async fn schedule(&mut self, id: EntityId, actor: &ActorId) -> CoreResult<Payment> {
        self.apply_transition(
            id,
            PaymentState::Scheduled,
            actor.clone(),
            WorkflowAction::Scheduled,
        )
        .await
    }

    /// Release scheduled funds
    pub async fn release(&mut self, id: EntityId, actor: &ActorId) -> CoreResult<Payment> {
        self.apply_transition(
            id,
            PaymentState::Released,
            actor.clone(),
            WorkflowAction::Released,
        )
        .await
    }

    /// Mark released funds as completed (terminal)
    pub async fn complete(&mut self, id: EntityId, actor: &ActorId) -> CoreResult<Payment> {
        self.apply_transition(
            id,
            PaymentState::Completed,
            actor.clone(),
            WorkflowAction::Completed,
        )
        .await
    }

    fn check_eligibility(&self, payment: &Payment, actor: &ActorId) -> CoreResult<()> {
        let rules = &payment.workflow.approval_rules;
        if !rules.approvers.is_empty() && !rules.approvers.contains(actor) {
            return Err(CoreError::Validation(format!(
                "{actor} is not an eligible approver for this payment"
            )));
        }
        Ok(())
    }

    /// Apply one table-checked transition inside a conditional write
    async fn apply_transition(
        &mut self,
        id: EntityId,
        to: PaymentState,
        actor: ActorId,
        action: WorkflowAction,
    ) -> CoreResult<Payment> {
        let closure_actor = actor.clone();
        let payment = self
            .repo
            .update_guarded(
                id,
                Box::new(move |current: &Payment| {
                    let from = current.status();
                    if !validate_state_transition(from, to) {
                        return Err(CoreError::InvalidTransition(format!(
                            "payment cannot move from {from} to {to}"
                        )));
                    }
                    let mut next = current.clone();
                    next.workflow.record_transition(to, closure_actor.clone(), action);
                    next.updated_at = chrono::Utc::now().naive_utc();
                    Ok(next)
                }),
            )
            .await?;

        let len = payment.workflow.state_history.len();
        let from = if len >= 2 {
            payment.workflow.state_history[len - 2].state
        } else {
            payment.status()
        };
        self.emit(&payment, from, action);
        Ok(payment)
    }

    /// Log the accepted transition and hand it to the notification sink.
    /// Sink failures are logged and swallowed; the transition has already
    /// committed and must not depend on the side channel.
    fn emit(&self, payment: &Payment, from: PaymentState, action: WorkflowAction) {
        let to = payment.status();
        tracing::info!(
            payment_id = %payment.id,
            from = %from,
            to = %to,
            action = ?action,
            "payment state transition"
        );
        let event = TransitionEvent {
            kind: EntityKind::Payment,
            entity_id: payment.id,
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
            actor: payment
                .workflow
                .state_history
                .last()
                .map(|entry| entry.actor.clone()),
            at: chrono::Utc::now().naive_utc(),
        };
        if let Err(reason) = self.notifier.notify(&event) {
            tracing::warn!(payment_id = %payment.id, %reason, "transition notification failed");
        }
    }
}
