//! Approval workflow: create, read, decide, cancel and apply approval requests.
//!
//! Authorization is resolved from the store on every call. Reads outside the
//! caller's scope report `NotFound` so request ids never leak across tenants;
//! mutations by a member lacking the right role report `Unauthorized`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use crewbook_approvals::{
    ApprovalDecision, ApprovalFilter, ApprovalKind, ApprovalPolicy, ApprovalRequest, ApprovalStatus,
    ApprovalTarget, Decision, EffectOutcome, NewApprovalRequest,
};
use crewbook_auth::{authorize, Membership, Permission};
use crewbook_core::{
    ApprovalRequestId, CompanyId, DomainError, DomainResult, Page, Pagination, ProfileId, ValidationReport,
};

use crate::effects::EffectRegistry;
use crate::resolver::TenantResolver;
use crate::store::ApprovalStore;

pub const MAX_COMMENT_LEN: usize = 1000;

/// Caller-supplied list parameters, before scoping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalQuery {
    pub company_id: Option<CompanyId>,
    pub status: Option<ApprovalStatus>,
    pub kind: Option<ApprovalKind>,
    pub requested_by: Option<ProfileId>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub pagination: Pagination,
}

#[derive(Clone)]
pub struct ApprovalWorkflow {
    approvals: Arc<dyn ApprovalStore>,
    resolver: TenantResolver,
    effects: EffectRegistry,
    policy: ApprovalPolicy,
}

impl ApprovalWorkflow {
    pub fn new(
        approvals: Arc<dyn ApprovalStore>,
        resolver: TenantResolver,
        effects: EffectRegistry,
        policy: ApprovalPolicy,
    ) -> Self {
        Self {
            approvals,
            resolver,
            effects,
            policy,
        }
    }

    #[instrument(skip_all, fields(actor = %actor, company_id = %input.company_id, kind = %input.kind), err)]
    pub async fn create(&self, actor: ProfileId, input: NewApprovalRequest) -> DomainResult<ApprovalRequest> {
        self.resolver
            .require_membership(actor, input.company_id, Permission::ApprovalsRequest)
            .await?;

        let target = input.validate()?;
        if let ApprovalTarget::Profile(profile) = &target {
            let is_owner = self.resolver.is_owner(*profile, input.company_id).await?;
            match input.kind {
                ApprovalKind::OwnerRemoval if !is_owner => {
                    return Err(DomainError::validation("target_ref", "is not an owner of this company"));
                }
                ApprovalKind::OwnerAddition if is_owner => {
                    return Err(DomainError::validation("target_ref", "is already an owner of this company"));
                }
                _ => {}
            }
        }

        let request = input.into_request(&target, actor, ApprovalRequestId::new(), Utc::now());
        self.approvals.insert(request.clone()).await?;
        info!(approval_id = %request.id, "approval request created");
        Ok(request)
    }

    pub async fn get(&self, actor: ProfileId, id: ApprovalRequestId) -> DomainResult<ApprovalRequest> {
        let request = self.load(id).await?;
        self.ensure_visible(actor, &request).await?;
        Ok(request)
    }

    /// Approvals in one company, newest first.
    ///
    /// Without an explicit company the caller's active context decides it.
    /// Employees only ever see their own requests.
    pub async fn list(&self, actor: ProfileId, query: ApprovalQuery) -> DomainResult<Page<ApprovalRequest>> {
        let mut report = ValidationReport::new();
        if let (Some(after), Some(before)) = (query.created_after, query.created_before) {
            report.check(after < before, "created_after", "must be earlier than created_before");
        }
        report.finish()?;

        let company_id = match query.company_id {
            Some(id) => id,
            None => match self.resolver.active_context(actor).await? {
                Some(ctx) => ctx.company_id,
                None => {
                    return Err(DomainError::validation(
                        "company_id",
                        "required when no active context is set",
                    ));
                }
            },
        };

        let memberships = self.resolver.memberships(actor).await?;
        let mut filter = ApprovalFilter {
            company_id,
            status: query.status,
            kind: query.kind,
            requested_by: query.requested_by,
            created_after: query.created_after,
            created_before: query.created_before,
        };

        if authorize(&memberships, company_id, Permission::ApprovalsRead).is_err() {
            authorize(&memberships, company_id, Permission::ApprovalsReadOwn)?;
            if filter.requested_by.is_some_and(|p| p != actor) {
                return Ok(Page::empty(query.pagination));
            }
            filter.requested_by = Some(actor);
        }

        Ok(self.approvals.list(&filter, query.pagination).await?)
    }

    pub async fn decisions(&self, actor: ProfileId, id: ApprovalRequestId) -> DomainResult<Vec<ApprovalDecision>> {
        self.get(actor, id).await?;
        Ok(self.approvals.decisions(id).await?)
    }

    pub async fn approve(
        &self,
        actor: ProfileId,
        id: ApprovalRequestId,
        comment: Option<String>,
    ) -> DomainResult<ApprovalRequest> {
        self.decide(actor, id, Decision::Approve, comment).await
    }

    pub async fn reject(
        &self,
        actor: ProfileId,
        id: ApprovalRequestId,
        comment: Option<String>,
    ) -> DomainResult<ApprovalRequest> {
        self.decide(actor, id, Decision::Reject, comment).await
    }

    #[instrument(skip_all, fields(actor = %actor, approval_id = %id, decision = %decision), err)]
    async fn decide(
        &self,
        actor: ProfileId,
        id: ApprovalRequestId,
        decision: Decision,
        comment: Option<String>,
    ) -> DomainResult<ApprovalRequest> {
        if comment.as_ref().is_some_and(|c| c.chars().count() > MAX_COMMENT_LEN) {
            return Err(DomainError::validation("comment", "must be at most 1000 characters"));
        }

        let request = self.load(id).await?;
        self.resolver
            .require_membership(actor, request.company_id, Permission::ApprovalsDecide)
            .await?;

        let owner_count = self.resolver.owner_count(request.company_id).await?;
        self.policy.check_decider(&request, actor, owner_count).inspect_err(|_| {
            warn!("self-decision denied");
        })?;
        request.ensure_pending()?;

        let required = self
            .policy
            .required_approvals(self.policy.eligible_approvers(owner_count));
        let vote = ApprovalDecision::new(id, actor, decision, comment, Utc::now());
        let updated = self.approvals.record_decision(vote, required).await?;
        info!(status = %updated.status, required, "approval decision recorded");

        if updated.awaits_effect() {
            return self.execute_effect(updated.id).await;
        }
        Ok(updated)
    }

    /// Withdraw a pending request. Only its requester may cancel it.
    #[instrument(skip_all, fields(actor = %actor, approval_id = %id), err)]
    pub async fn cancel(&self, actor: ProfileId, id: ApprovalRequestId) -> DomainResult<ApprovalRequest> {
        let request = self.get(actor, id).await?;
        if request.requested_by != actor {
            return Err(DomainError::unauthorized("only the requester can cancel an approval request"));
        }
        request.ensure_pending()?;

        let cancelled = self.approvals.cancel(id, Utc::now()).await?;
        info!("approval request cancelled");
        Ok(cancelled)
    }

    /// Retry the effect of an approved request that was never claimed.
    ///
    /// A request whose claim succeeded but whose outcome was never recorded
    /// stays `approved` with `effect_attempted_at` set, and every retry is a
    /// `Conflict`. Those are logged by `execute_effect` and need an operator.
    #[instrument(skip_all, fields(actor = %actor, approval_id = %id), err)]
    pub async fn apply(&self, actor: ProfileId, id: ApprovalRequestId) -> DomainResult<ApprovalRequest> {
        let request = self.load(id).await?;
        self.resolver
            .require_membership(actor, request.company_id, Permission::ApprovalsDecide)
            .await?;
        self.execute_effect(id).await
    }

    /// Claim, run and resolve the effect. At most one attempt per request.
    async fn execute_effect(&self, id: ApprovalRequestId) -> DomainResult<ApprovalRequest> {
        let now = Utc::now();
        let claimed = self.approvals.claim_effect(id, now).await?;

        let outcome = match self.effects.get(claimed.kind) {
            Some(effect) => match effect.apply(&claimed, now).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(approval_id = %id, error = %e, "approval effect errored");
                    EffectOutcome::Failed(format!("effect error: {e}"))
                }
            },
            None => EffectOutcome::Failed(format!("no effect registered for {}", claimed.kind)),
        };

        let resolved = self
            .approvals
            .resolve_effect(id, &outcome, Utc::now())
            .await
            .inspect_err(|e| {
                error!(
                    approval_id = %id,
                    outcome = ?outcome,
                    error = %e,
                    "effect outcome not recorded; request is stuck in approved with its effect claimed"
                );
            })?;
        match &outcome {
            EffectOutcome::Applied => info!(approval_id = %id, "approval effect applied"),
            EffectOutcome::Failed(reason) => warn!(approval_id = %id, reason = %reason, "approval effect failed"),
        }
        Ok(resolved)
    }

    async fn load(&self, id: ApprovalRequestId) -> DomainResult<ApprovalRequest> {
        self.approvals
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("approval request {id}")))
    }

    /// Owners of the company see every request; members see their own.
    async fn ensure_visible(&self, actor: ProfileId, request: &ApprovalRequest) -> DomainResult<()> {
        let memberships: Vec<Membership> = self.resolver.memberships(actor).await?;
        let visible = authorize(&memberships, request.company_id, Permission::ApprovalsRead).is_ok()
            || (request.requested_by == actor
                && authorize(&memberships, request.company_id, Permission::ApprovalsReadOwn).is_ok());
        if visible {
            Ok(())
        } else {
            Err(DomainError::not_found(format!("approval request {}", request.id)))
        }
    }
}
